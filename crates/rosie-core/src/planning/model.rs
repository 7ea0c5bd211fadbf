use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::events::canonical_json;

/// Bumped whenever the meaning of plan fields changes.
pub const PLAN_VERSION: u32 = 1;

/// What a plan item proposes to do with its target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PlanAction {
    Info,
    CreateDir,
    Move,
    /// Flagged by the rule with this id.
    Rule(String),
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanAction::Info => f.write_str("info"),
            PlanAction::CreateDir => f.write_str("create_dir"),
            PlanAction::Move => f.write_str("move"),
            PlanAction::Rule(id) => write!(f, "rule:{}", id),
        }
    }
}

impl FromStr for PlanAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(PlanAction::Info),
            "create_dir" => Ok(PlanAction::CreateDir),
            "move" => Ok(PlanAction::Move),
            other => match other.strip_prefix("rule:") {
                Some(id) if !id.is_empty() => Ok(PlanAction::Rule(id.to_string())),
                _ => Err(format!("unknown plan action '{}'", other)),
            },
        }
    }
}

impl From<PlanAction> for String {
    fn from(action: PlanAction) -> Self {
        action.to_string()
    }
}

impl TryFrom<String> for PlanAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One proposed action. `id` is the content hash of (action, target, reason).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: String,
    pub action: PlanAction,
    pub target: PathBuf,
    pub reason: String,
    pub confidence: f64,
    /// Source of a move. The same path is also written into `reason` as
    /// `src=<path>` for consumers that only read the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl PlanItem {
    pub fn new(action: PlanAction, target: PathBuf, reason: String, confidence: f64) -> Self {
        let id = item_id(&action, &target, &reason);
        PlanItem {
            id,
            action,
            target,
            reason,
            confidence: clamp_confidence(confidence),
            source: None,
        }
    }

    pub fn with_source(mut self, source: PathBuf) -> Self {
        self.source = Some(source);
        self
    }

    /// Recompute `id` after the target or reason changed.
    pub fn readdress(&mut self) {
        self.id = item_id(&self.action, &self.target, &self.reason);
    }

    pub fn is_filesystem_change(&self) -> bool {
        matches!(self.action, PlanAction::CreateDir | PlanAction::Move)
    }
}

pub fn item_id(action: &PlanAction, target: &Path, reason: &str) -> String {
    let fields = json!([action.to_string(), target.to_string_lossy(), reason]);
    content_hash(&fields)
}

/// Clamp into [0, 1]; NaN counts as no confidence at all.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn content_hash(value: &Value) -> String {
    blake3::hash(canonical_json(value).as_bytes())
        .to_hex()
        .to_string()
}

/// Depth/width limits for cluster directories. Part of the plan identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeLimits {
    pub max_depth: Option<i64>,
    pub max_children: Option<i64>,
}

/// A materialized plan: items sorted by id plus a content-addressed id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub items: Vec<PlanItem>,
}

impl Plan {
    pub fn from_items(mut items: Vec<PlanItem>, correction_gen: u64, limits: ShapeLimits) -> Plan {
        items.sort_by(|a, b| a.id.cmp(&b.id));
        let id = plan_id(&items, correction_gen, limits);
        Plan { id, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }
}

fn plan_id(items: &[PlanItem], correction_gen: u64, limits: ShapeLimits) -> String {
    let items: Vec<Value> = items
        .iter()
        .map(|item| {
            json!({
                "id": item.id,
                "action": item.action.to_string(),
                "target": item.target.to_string_lossy(),
                "reason": item.reason,
                "confidence": item.confidence,
                "source": item.source.as_ref().map(|s| s.to_string_lossy()),
            })
        })
        .collect();
    content_hash(&json!({
        "version": PLAN_VERSION,
        "correction_gen": correction_gen,
        "limits": {
            "max_depth": limits.max_depth,
            "max_children": limits.max_children,
        },
        "items": items,
    }))
}
