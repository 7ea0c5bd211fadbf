//! Incremental re-execution of the scan → rule → cluster pipeline.
//!
//! Each pass pulls the events committed since the last pass, decides how
//! much of the pipeline they invalidate (everything, or a set of paths),
//! re-runs only the affected stages and then advances the live plan view.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clustering::{cluster_by_extension, extension_key};
use crate::error::Error;
use crate::events::{DomainEvent, RuleMatched};
use crate::planning::{Plan, PlanProjection, ShapeLimits};
use crate::platform::resolve_against;
use crate::projection::replay;
use crate::rules::RuleMatcher;
use crate::scanner::{DirectChildren, TreeScanner};
use crate::storage::{EventLog, EventRecord};

const STATE_CHECKPOINT: &str = "scheduler.pipeline";

/// How often each stage ran, and how many paths the last run looked at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRunStats {
    pub scanner_runs: u64,
    pub rule_runs: u64,
    pub cluster_runs: u64,
    pub rule_paths_evaluated: usize,
    pub cluster_paths_evaluated: usize,
}

/// Everything the scheduler derives from the log. Rebuildable by replaying
/// from id 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub cursor: i64,
    pub root: Option<PathBuf>,
    pub known_paths: BTreeSet<PathBuf>,
    pub rule_matches: BTreeMap<PathBuf, String>,
    pub clusters: BTreeMap<String, Vec<PathBuf>>,
    pub dirty_paths: BTreeSet<PathBuf>,
    pub full_invalidate: bool,
    pub runs: NodeRunStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// New log records consumed by this pass; 0 means nothing to do.
    pub events_processed: usize,
    pub rule_matches_emitted: usize,
    pub full_invalidation: bool,
}

/// Cooperative stop flag for [`IncrementalScheduler::run_forever`].
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

impl StopSignal {
    pub fn stop(&self) {
        if let Ok(mut stopped) = self.stopped.lock() {
            *stopped = true;
        }
        self.wakeup.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.lock().map(|s| *s).unwrap_or(true)
    }

    /// Sleep up to `timeout` or until stopped. Returns whether stop was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = match self.stopped.lock() {
            Ok(guard) => guard,
            Err(_) => return true,
        };
        match self.wakeup.wait_timeout_while(guard, timeout, |stopped| !*stopped) {
            Ok((stopped, _)) => *stopped,
            Err(_) => true,
        }
    }
}

struct LivePlan {
    view: PlanProjection,
    cursor: i64,
}

pub struct IncrementalScheduler {
    log: Arc<EventLog>,
    run_guard: Mutex<()>,
    state: Mutex<PipelineState>,
    plan: Mutex<LivePlan>,
    matcher: Mutex<Option<Arc<dyn RuleMatcher>>>,
    scanner: Box<dyn TreeScanner>,
    stop: Arc<StopSignal>,
    persist: bool,
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, Error> {
    mutex
        .lock()
        .map_err(|e| Error::Other(format!("Failed to lock {}: {}", what, e)))
}

impl IncrementalScheduler {
    pub fn new(log: Arc<EventLog>, limits: ShapeLimits) -> Self {
        IncrementalScheduler {
            log,
            run_guard: Mutex::new(()),
            state: Mutex::new(PipelineState::default()),
            plan: Mutex::new(LivePlan {
                view: PlanProjection::new(limits),
                cursor: 0,
            }),
            matcher: Mutex::new(None),
            scanner: Box::new(DirectChildren),
            stop: Arc::new(StopSignal::default()),
            persist: false,
        }
    }

    /// Like [`new`](Self::new), but picks up the pipeline state checkpointed
    /// in `log` by an earlier process and checkpoints after every pass.
    /// An unreadable checkpoint is discarded and the log is reprocessed.
    pub fn resume(log: Arc<EventLog>, limits: ShapeLimits) -> Result<Self, Error> {
        let mut scheduler = Self::new(log, limits);
        scheduler.persist = true;
        if let Some(saved) = scheduler.log.load_checkpoint(STATE_CHECKPOINT)? {
            match serde_json::from_value::<PipelineState>(saved) {
                Ok(state) => {
                    info!("Resuming scheduler after event #{}", state.cursor);
                    scheduler.state = Mutex::new(state);
                }
                Err(e) => warn!("Discarding unreadable scheduler checkpoint: {}", e),
            }
        }
        Ok(scheduler)
    }

    pub fn with_scanner(mut self, scanner: Box<dyn TreeScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_rules(self, matcher: Arc<dyn RuleMatcher>) -> Self {
        if let Ok(mut slot) = self.matcher.lock() {
            *slot = Some(matcher);
        }
        self
    }

    /// Attach or detach the rule matcher. Without one the rule stage is skipped.
    pub fn set_rules(&self, matcher: Option<Arc<dyn RuleMatcher>>) -> Result<(), Error> {
        *lock(&self.matcher, "rule matcher")? = matcher;
        Ok(())
    }

    pub fn stop_signal(&self) -> Arc<StopSignal> {
        Arc::clone(&self.stop)
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn run_stats(&self) -> Result<NodeRunStats, Error> {
        Ok(lock(&self.state, "pipeline state")?.runs)
    }

    pub fn state_snapshot(&self) -> Result<PipelineState, Error> {
        Ok(lock(&self.state, "pipeline state")?.clone())
    }

    pub fn current_plan(&self) -> Result<Plan, Error> {
        Ok(lock(&self.plan, "plan view")?.view.current_plan())
    }

    pub fn current_plan_id(&self) -> Option<String> {
        self.current_plan().ok().map(|plan| plan.id)
    }

    /// Process everything committed since the previous pass.
    ///
    /// If an append fails the pass is abandoned: the cursor stays put and the
    /// invalidation carries over to the next pass.
    pub fn run_once(&self) -> Result<RunOutcome, Error> {
        let _running = lock(&self.run_guard, "scheduler")?;

        let mut working = lock(&self.state, "pipeline state")?.clone();
        let records = self.log.read_since(working.cursor)?;
        let last_id = match records.last() {
            Some(record) => record.id,
            None => {
                self.sync_plan()?;
                return Ok(RunOutcome::default());
            }
        };

        classify(&mut working, &records);
        let full_invalidation = working.full_invalidate;
        debug!(
            "Pass over {} events: full={}, dirty={}",
            records.len(),
            full_invalidation,
            working.dirty_paths.len()
        );

        self.run_scanner(&mut working)?;
        let emitted = self.run_rules(&mut working)?;
        run_clusters(&mut working);

        working.dirty_paths.clear();
        working.full_invalidate = false;
        working.cursor = last_id;
        if self.persist {
            self.log
                .save_checkpoint(STATE_CHECKPOINT, &serde_json::to_value(&working)?)?;
        }
        *lock(&self.state, "pipeline state")? = working;

        self.sync_plan()?;
        Ok(RunOutcome {
            events_processed: records.len(),
            rule_matches_emitted: emitted,
            full_invalidation,
        })
    }

    /// Call [`run_once`](Self::run_once) every `poll_interval` until stopped.
    /// A failed pass is logged and retried on the next tick.
    pub fn run_forever(&self, poll_interval: Duration) {
        info!("Scheduler started (poll every {:?})", poll_interval);
        while !self.stop.is_stopped() {
            if let Err(e) = self.run_once() {
                warn!("Scheduler pass failed, will retry: {}", e);
            }
            if self.stop.wait(poll_interval) {
                break;
            }
        }
        info!("Scheduler stopped");
    }

    fn sync_plan(&self) -> Result<(), Error> {
        let mut plan = lock(&self.plan, "plan view")?;
        let since = plan.cursor;
        plan.cursor = replay(&mut plan.view, &self.log, since)?;
        Ok(())
    }

    fn run_scanner(&self, state: &mut PipelineState) -> Result<(), Error> {
        if !state.full_invalidate {
            return Ok(());
        }
        let root = match &state.root {
            Some(root) => root.clone(),
            None => return Ok(()),
        };
        match self.scanner.list_files(&root) {
            Ok(paths) => {
                info!("Scanner stage: {} files under {}", paths.len(), root.display());
                state.known_paths = paths;
                state.runs.scanner_runs += 1;
            }
            Err(e) => warn!("Scanner stage skipped for {}: {}", root.display(), e),
        }
        Ok(())
    }

    fn run_rules(&self, state: &mut PipelineState) -> Result<usize, Error> {
        let matcher = match lock(&self.matcher, "rule matcher")?.clone() {
            Some(matcher) => matcher,
            None => return Ok(0),
        };

        let to_eval: BTreeSet<PathBuf> = if state.full_invalidate || state.rule_matches.is_empty() {
            state.known_paths.clone()
        } else {
            state
                .dirty_paths
                .intersection(&state.known_paths)
                .cloned()
                .collect()
        };
        if to_eval.is_empty() && !state.full_invalidate {
            return Ok(0);
        }

        let matches: BTreeMap<PathBuf, String> = to_eval
            .iter()
            .filter_map(|path| matcher.match_path(path).map(|id| (path.clone(), id)))
            .collect();

        for path in &to_eval {
            match matches.get(path) {
                Some(id) => {
                    state.rule_matches.insert(path.clone(), id.clone());
                }
                None => {
                    state.rule_matches.remove(path);
                }
            }
        }

        for (path, rule_id) in &matches {
            self.log.append(&DomainEvent::RuleMatched(RuleMatched {
                path: path.clone(),
                rule_id: rule_id.clone(),
            }))?;
        }

        state.runs.rule_runs += 1;
        state.runs.rule_paths_evaluated = to_eval.len();
        info!(
            "Rule stage: {} paths evaluated, {} matched",
            to_eval.len(),
            matches.len()
        );
        Ok(matches.len())
    }
}

fn classify(state: &mut PipelineState, records: &[EventRecord]) {
    for record in records {
        match record.decode() {
            DomainEvent::FilesScanned(scanned) => {
                state.root = Some(scanned.root);
                state.full_invalidate = true;
            }
            DomainEvent::CorrectionAdded(correction) => {
                let root = state.root.clone();
                let scope: Vec<PathBuf> = if correction.paths.is_empty() {
                    extract_path_hint(&correction.note).into_iter().collect()
                } else {
                    correction.paths
                };
                if scope.is_empty() {
                    debug!("Correction #{} has no path scope, full invalidation", record.id);
                    state.full_invalidate = true;
                } else {
                    state.dirty_paths.extend(
                        scope
                            .iter()
                            .map(|path| resolve_against(root.as_deref(), path)),
                    );
                }
            }
            _ => {}
        }
    }
}

fn run_clusters(state: &mut PipelineState) {
    if state.rule_matches.is_empty() && !state.full_invalidate {
        return;
    }
    let impacted: BTreeSet<PathBuf> = if state.full_invalidate || state.clusters.is_empty() {
        state.rule_matches.keys().cloned().collect()
    } else {
        state
            .dirty_paths
            .iter()
            .filter(|path| state.rule_matches.contains_key(*path))
            .cloned()
            .collect()
    };
    if impacted.is_empty() && !state.full_invalidate {
        return;
    }

    let evaluated = if state.full_invalidate {
        state.clusters = cluster_by_extension(state.rule_matches.keys());
        state.rule_matches.len()
    } else {
        let extensions: BTreeSet<String> = impacted.iter().map(|p| extension_key(p)).collect();
        for ext in extensions {
            let bucket: Vec<PathBuf> = state
                .rule_matches
                .keys()
                .filter(|path| extension_key(path) == ext)
                .cloned()
                .collect();
            if bucket.is_empty() {
                state.clusters.remove(&ext);
            } else {
                state.clusters.insert(ext, bucket);
            }
        }
        impacted.len()
    };

    state.runs.cluster_runs += 1;
    state.runs.cluster_paths_evaluated = evaluated;
    debug!("Cluster stage: {} paths, {} buckets", evaluated, state.clusters.len());
}

/// First `path=<value>` in a correction note. The value ends at whitespace,
/// a comma or a closing bracket; surrounding brackets are stripped.
pub fn extract_path_hint(note: &str) -> Option<PathBuf> {
    let (_, rest) = note.trim().split_once("path=")?;
    let end = rest
        .find(|c: char| c.is_whitespace() || matches!(c, ',' | ')' | ']' | '}' | '>'))
        .unwrap_or(rest.len());
    let raw = rest[..end].trim_matches(|c: char| "()[]{}<>".contains(c));
    if raw.is_empty() {
        return None;
    }
    Some(Path::new(raw).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_hint_forms() {
        assert_eq!(extract_path_hint("path=/tmp/a.txt"), Some(PathBuf::from("/tmp/a.txt")));
        assert_eq!(extract_path_hint("fix name (path=a.txt)"), Some(PathBuf::from("a.txt")));
        assert_eq!(extract_path_hint("path=b.log, please"), Some(PathBuf::from("b.log")));
        assert_eq!(extract_path_hint("see [path=<c.md>]"), Some(PathBuf::from("c.md")));
        assert_eq!(extract_path_hint("path= x"), None);
        assert_eq!(extract_path_hint("wrong everywhere"), None);
    }

    #[test]
    fn test_classify_scopes_corrections() {
        let mut state = PipelineState {
            root: Some(PathBuf::from("/ws")),
            ..Default::default()
        };
        let record = |id: i64, data: serde_json::Value| EventRecord {
            id,
            ts: 0,
            event_type: "CorrectionAdded".to_string(),
            data,
            checksum: String::new(),
            schema_ver: 1,
        };
        classify(
            &mut state,
            &[
                record(1, serde_json::json!({"plan_id": "p", "note": "fix (path=a.txt)"})),
                record(2, serde_json::json!({"plan_id": "p", "note": "", "paths": ["sub/../b.log"]})),
            ],
        );
        assert!(!state.full_invalidate);
        assert_eq!(
            state.dirty_paths.iter().cloned().collect::<Vec<_>>(),
            vec![PathBuf::from("/ws/a.txt"), PathBuf::from("/ws/b.log")]
        );

        classify(&mut state, &[record(3, serde_json::json!({"plan_id": "p", "note": "all wrong"}))]);
        assert!(state.full_invalidate);
    }

    #[test]
    fn test_stop_signal_wakes_waiter() {
        let signal = Arc::new(StopSignal::default());
        let remote = Arc::clone(&signal);
        let handle = std::thread::spawn(move || remote.wait(Duration::from_secs(30)));
        signal.stop();
        assert!(handle.join().unwrap());
        assert!(signal.is_stopped());
    }
}
