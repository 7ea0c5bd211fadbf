pub mod clustering;
pub mod config;
pub mod error;
pub mod events;
pub mod planning;
pub mod platform;
pub mod progress;
pub mod projection;
pub mod rules;
pub mod scanner;
pub mod scheduler;
pub mod storage;

pub use config::AppConfig;
pub use error::Error;
pub use events::DomainEvent;
pub use planning::{Plan, PlanAction, PlanItem, PlanProjection, ShapeLimits};
pub use progress::{ScanReporter, SilentReporter};
pub use projection::{replay, PlanStatus, Projection};
pub use rules::{RuleMatcher, RuleSet};
pub use scheduler::{IncrementalScheduler, NodeRunStats, RunOutcome};
pub use storage::{EventLog, EventRecord};
