//! Plan construction: item model, cluster directory shaping, collision
//! handling and the replay-driven plan projection.

pub mod conflict;
pub mod model;
pub mod projection;
pub mod tree_shaper;

pub use conflict::{infer_source, resolve, DefaultProbe, Probe};
pub use model::{item_id, Plan, PlanAction, PlanItem, ShapeLimits, PLAN_VERSION};
pub use projection::PlanProjection;
pub use tree_shaper::{sanitize_label, shape_cluster_moves, ShapedCluster};
