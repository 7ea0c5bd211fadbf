//! Typed domain events and their canonical JSON form.
//!
//! The log stores `(type, data)` pairs. [`DomainEvent`] is the closed set of
//! kinds this crate understands; anything else decodes to
//! [`DomainEvent::Ignored`] so replay stays total.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

/// Version stamped on every appended record.
pub const SCHEMA_VERSION: i64 = 1;

/// One entry of a `FilesScanned` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedEntry {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: i64,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesScanned {
    pub root: PathBuf,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<Vec<ScannedEntry>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatched {
    pub path: PathBuf,
    pub rule_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingsComputed {
    pub count: u64,
}

/// Cluster membership for one path. `cluster_id == -1` marks noise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub path: PathBuf,
    pub cluster_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

pub const NOISE_CLUSTER: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClustersFormed {
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ClusterAssignment>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProposed {
    pub plan_id: String,
    pub item_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserApproved {
    pub plan_id: String,
    pub item_ids: Vec<String>,
}

/// A user correction against a plan.
///
/// `paths` is the structured scope. When it is empty, the scheduler falls
/// back to a `path=<value>` hint inside `note`, and then to full
/// invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionAdded {
    pub plan_id: String,
    pub note: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFinalized {
    pub plan_id: String,
    pub approved_item_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyStarted {
    pub plan_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionApplied {
    pub item_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoPerformed {
    pub checkpoint_path: PathBuf,
}

macro_rules! domain_events {
    ($($kind:ident),+ $(,)?) => {
        #[derive(Debug, Clone, PartialEq)]
        pub enum DomainEvent {
            $($kind($kind),)+
            /// A record whose type this build does not know, or whose payload
            /// could not be decoded.
            Ignored { event_type: String },
        }

        impl DomainEvent {
            /// The `type` tag stored alongside the payload.
            pub fn event_type(&self) -> &str {
                match self {
                    $(DomainEvent::$kind(_) => stringify!($kind),)+
                    DomainEvent::Ignored { event_type } => event_type,
                }
            }

            /// Payload as a JSON value; `Ignored` has no payload.
            pub fn payload(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $(DomainEvent::$kind(inner) => serde_json::to_value(inner),)+
                    DomainEvent::Ignored { .. } => Ok(Value::Object(Default::default())),
                }
            }

            fn decode_strict(event_type: &str, data: &Value) -> Option<DomainEvent> {
                match event_type {
                    $(stringify!($kind) => decode_payload::<$kind>(event_type, data).map(DomainEvent::$kind),)+
                    _ => None,
                }
            }
        }

        $(
            impl From<$kind> for DomainEvent {
                fn from(inner: $kind) -> Self {
                    DomainEvent::$kind(inner)
                }
            }
        )+
    };
}

domain_events!(
    FilesScanned,
    RuleMatched,
    EmbeddingsComputed,
    ClustersFormed,
    PlanProposed,
    UserApproved,
    CorrectionAdded,
    PlanFinalized,
    ApplyStarted,
    ActionApplied,
    UndoPerformed,
);

impl DomainEvent {
    /// Decode a stored `(type, data)` pair. Never fails: list items that do
    /// not parse are dropped, and a payload missing required fields becomes
    /// `Ignored`.
    pub fn decode(event_type: &str, data: &Value) -> DomainEvent {
        let decoded = match event_type {
            "FilesScanned" => decode_files_scanned(data),
            "ClustersFormed" => decode_clusters_formed(data),
            _ => Self::decode_strict(event_type, data),
        };
        decoded.unwrap_or_else(|| DomainEvent::Ignored {
            event_type: event_type.to_string(),
        })
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, DomainEvent::Ignored { .. })
    }
}

fn decode_payload<T: DeserializeOwned>(event_type: &str, data: &Value) -> Option<T> {
    match serde_json::from_value::<T>(data.clone()) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!("Skipping malformed {} payload: {}", event_type, e);
            None
        }
    }
}

/// Decode `data[field]` as a list, keeping only the elements that parse.
fn decode_items<T: DeserializeOwned>(event_type: &str, data: &Value, field: &str) -> Option<Vec<T>> {
    let raw = data.get(field)?.as_array()?;
    let mut items = Vec::with_capacity(raw.len());
    for (index, value) in raw.iter().enumerate() {
        match serde_json::from_value::<T>(value.clone()) {
            Ok(item) => items.push(item),
            Err(e) => warn!("Skipping {}.{}[{}]: {}", event_type, field, index, e),
        }
    }
    Some(items)
}

fn decode_files_scanned(data: &Value) -> Option<DomainEvent> {
    let root = match data.get("root").and_then(Value::as_str) {
        Some(root) if !root.is_empty() => PathBuf::from(root),
        _ => {
            warn!("Skipping FilesScanned without a root");
            return None;
        }
    };
    let batch = decode_items::<ScannedEntry>("FilesScanned", data, "batch");
    let count = data
        .get("count")
        .and_then(Value::as_u64)
        .unwrap_or_else(|| batch.as_ref().map_or(0, |b| b.len() as u64));
    Some(DomainEvent::FilesScanned(FilesScanned { root, count, batch }))
}

fn decode_clusters_formed(data: &Value) -> Option<DomainEvent> {
    let items = decode_items::<ClusterAssignment>("ClustersFormed", data, "items");
    let count = data.get("count").and_then(Value::as_u64).unwrap_or(0);
    Some(DomainEvent::ClustersFormed(ClustersFormed { count, items }))
}

/// Serialize with sorted object keys and no insignificant whitespace.
///
/// `serde_json::Map` is ordered by key unless the `preserve_order` feature is
/// enabled, which this workspace never turns on.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}
