use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::conflict::{resolve, DefaultProbe, Probe};
use super::model::{Plan, PlanAction, PlanItem, ShapeLimits};
use super::tree_shaper::shape_cluster_moves;
use crate::events::{ClusterAssignment, ClustersFormed, DomainEvent, NOISE_CLUSTER};
use crate::platform::resolve_against;
use crate::projection::Projection;
use crate::storage::EventRecord;

const RULE_CONFIDENCE: f64 = 0.75;
const CREATE_DIR_CONFIDENCE: f64 = 0.6;
const DEFAULT_CLUSTER_CONFIDENCE: f64 = 0.5;

/// Folds rule matches and cluster assignments into plan items.
///
/// Every event upserts items by content id, so replaying the same event
/// twice leaves the view unchanged and separate clusterings accumulate.
#[derive(Debug, Clone, Default)]
pub struct PlanProjection {
    items: BTreeMap<String, PlanItem>,
    correction_gen: u64,
    root: Option<PathBuf>,
    limits: ShapeLimits,
}

impl PlanProjection {
    pub fn new(limits: ShapeLimits) -> Self {
        PlanProjection {
            limits,
            ..Default::default()
        }
    }

    pub fn limits(&self) -> ShapeLimits {
        self.limits
    }

    pub fn correction_gen(&self) -> u64 {
        self.correction_gen
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Raw items before collision handling, keyed by id.
    pub fn items(&self) -> &BTreeMap<String, PlanItem> {
        &self.items
    }

    pub fn apply_event(&mut self, event: &DomainEvent) {
        match event {
            DomainEvent::FilesScanned(scanned) => {
                self.root = Some(scanned.root.clone());
            }
            DomainEvent::RuleMatched(matched) => {
                let item = PlanItem::new(
                    PlanAction::Rule(matched.rule_id.clone()),
                    matched.path.clone(),
                    format!("Matched rule {}", matched.rule_id),
                    RULE_CONFIDENCE,
                );
                self.items.insert(item.id.clone(), item);
            }
            DomainEvent::CorrectionAdded(_) => {
                self.correction_gen += 1;
            }
            DomainEvent::ClustersFormed(formed) => self.apply_clusters(formed),
            _ => {}
        }
    }

    fn apply_clusters(&mut self, formed: &ClustersFormed) {
        let assignments = match &formed.items {
            Some(items) => items,
            None => return,
        };

        let mut clusters: BTreeMap<i64, Vec<&ClusterAssignment>> = BTreeMap::new();
        for assignment in assignments {
            if assignment.cluster_id == NOISE_CLUSTER {
                continue;
            }
            clusters.entry(assignment.cluster_id).or_default().push(assignment);
        }

        for (cluster_id, members) in clusters {
            let root = match self.root.clone().or_else(|| members[0].path.parent().map(Path::to_path_buf)) {
                Some(root) => root,
                None => {
                    warn!("Cluster {} has no usable root, skipped", cluster_id);
                    continue;
                }
            };
            let label = members
                .iter()
                .find_map(|m| m.label.clone())
                .unwrap_or_else(|| format!("cluster-{}", cluster_id));
            self.add_cluster(&root, &label, &members);
        }
    }

    fn add_cluster(&mut self, root: &Path, label: &str, members: &[&ClusterAssignment]) {
        let known: Vec<f64> = members.iter().filter_map(|m| m.confidence).collect();
        let average = if known.is_empty() {
            DEFAULT_CLUSTER_CONFIDENCE
        } else {
            known.iter().sum::<f64>() / known.len() as f64
        };

        let mut confidence_of: BTreeMap<PathBuf, f64> = BTreeMap::new();
        let sources: Vec<PathBuf> = members
            .iter()
            .map(|m| {
                let abs = resolve_against(Some(root), &m.path);
                confidence_of.insert(abs.clone(), m.confidence.unwrap_or(average));
                abs
            })
            .collect();

        let shaped = shape_cluster_moves(
            root,
            label,
            &sources,
            self.limits.max_depth,
            self.limits.max_children,
        );

        for dir in shaped.dirs {
            let item = PlanItem::new(
                PlanAction::CreateDir,
                dir,
                format!("cluster:{}", label),
                CREATE_DIR_CONFIDENCE,
            );
            self.items.insert(item.id.clone(), item);
        }
        for (src, dst) in shaped.moves {
            let name = src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let reason = format!("cluster:{} from {} src={}", label, name, src.display());
            let confidence = confidence_of.get(&src).copied().unwrap_or(average);
            let item = PlanItem::new(PlanAction::Move, dst, reason, confidence).with_source(src);
            self.items.insert(item.id.clone(), item);
        }
        debug!("Cluster '{}' projected with {} members", label, members.len());
    }

    /// Materialize the plan with the default probe.
    pub fn current_plan(&self) -> Plan {
        self.current_plan_with_probe(&DefaultProbe)
    }

    pub fn current_plan_with_probe(&self, probe: &dyn Probe) -> Plan {
        let root = self.root.clone().unwrap_or_default();
        let mut items = resolve(self.items.values().cloned().collect(), &root, probe);
        for item in &mut items {
            item.readdress();
        }
        Plan::from_items(items, self.correction_gen, self.limits)
    }
}

impl Projection for PlanProjection {
    fn apply(&mut self, record: &EventRecord) {
        self.apply_event(&record.decode());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CorrectionAdded, FilesScanned, RuleMatched};

    fn scanned(root: &str) -> DomainEvent {
        DomainEvent::FilesScanned(FilesScanned {
            root: PathBuf::from(root),
            count: 0,
            batch: None,
        })
    }

    fn member(path: &str, cluster_id: i64, label: Option<&str>) -> ClusterAssignment {
        ClusterAssignment {
            path: PathBuf::from(path),
            cluster_id,
            confidence: None,
            label: label.map(str::to_string),
        }
    }

    #[test]
    fn test_rule_match_is_idempotent() {
        let mut view = PlanProjection::default();
        let matched = DomainEvent::RuleMatched(RuleMatched {
            path: PathBuf::from("/r/a.txt"),
            rule_id: "R1".into(),
        });
        view.apply_event(&matched);
        view.apply_event(&matched);
        assert_eq!(view.items().len(), 1);
        let item = view.items().values().next().unwrap();
        assert_eq!(item.reason, "Matched rule R1");
        assert_eq!(item.confidence, 0.75);
    }

    #[test]
    fn test_missing_label_and_confidence_defaults() {
        let mut view = PlanProjection::default();
        view.apply_event(&scanned("/r"));
        view.apply_event(&DomainEvent::ClustersFormed(ClustersFormed {
            count: 1,
            items: Some(vec![member("/r/a.pdf", 4, None)]),
        }));
        let moves: Vec<_> = view
            .items()
            .values()
            .filter(|i| i.action == PlanAction::Move)
            .collect();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].target, PathBuf::from("/r/cluster-4/a.pdf"));
        assert_eq!(moves[0].confidence, 0.5);
        assert_eq!(moves[0].reason, "cluster:cluster-4 from a.pdf src=/r/a.pdf");
    }

    #[test]
    fn test_root_falls_back_to_member_parent() {
        let mut view = PlanProjection::default();
        view.apply_event(&DomainEvent::ClustersFormed(ClustersFormed {
            count: 1,
            items: Some(vec![member("/data/x/a.txt", 0, Some("docs"))]),
        }));
        assert!(view
            .items()
            .values()
            .any(|i| i.action == PlanAction::CreateDir && i.target == Path::new("/data/x/docs")));
    }

    #[test]
    fn test_separate_clusterings_accumulate() {
        let mut view = PlanProjection::default();
        view.apply_event(&scanned("/r"));
        view.apply_event(&DomainEvent::ClustersFormed(ClustersFormed {
            count: 1,
            items: Some(vec![member("/r/a.txt", 0, Some("docs"))]),
        }));
        view.apply_event(&DomainEvent::ClustersFormed(ClustersFormed {
            count: 1,
            items: Some(vec![member("/r/b.png", 1, Some("pics"))]),
        }));
        let dirs: Vec<&Path> = view
            .items()
            .values()
            .filter(|i| i.action == PlanAction::CreateDir)
            .map(|i| i.target.as_path())
            .collect();
        assert_eq!(dirs.len(), 2);
        assert!(dirs.contains(&Path::new("/r/docs")));
        assert!(dirs.contains(&Path::new("/r/pics")));
        assert_eq!(view.items().len(), 4);
    }

    #[test]
    fn test_correction_bumps_generation() {
        let mut view = PlanProjection::default();
        let before = view.current_plan().id;
        view.apply_event(&DomainEvent::CorrectionAdded(CorrectionAdded {
            plan_id: before.clone(),
            note: "no".into(),
            paths: Vec::new(),
        }));
        assert_eq!(view.correction_gen(), 1);
        assert_ne!(view.current_plan().id, before);
    }
}
