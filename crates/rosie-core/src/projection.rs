//! Replay of the event log into derived views.
//!
//! A projection is any state built by folding [`Projection::apply`] over
//! records in id order. Because the fold is deterministic, every projection
//! can be rebuilt from the log alone after a restart.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::Error;
use crate::events::DomainEvent;
use crate::storage::{EventLog, EventRecord};

pub trait Projection {
    /// Fold one record into the view. Must accept every record: unknown or
    /// malformed events are a no-op.
    fn apply(&mut self, record: &EventRecord);
}

/// Apply every record after `since_id` and return the last id processed,
/// or `since_id` when nothing new was committed.
pub fn replay<P: Projection + ?Sized>(
    projection: &mut P,
    log: &EventLog,
    since_id: i64,
) -> Result<i64, Error> {
    let records = log.read_since(since_id)?;
    let mut last = since_id;
    for record in &records {
        projection.apply(record);
        last = record.id;
    }
    if !records.is_empty() {
        debug!("Replayed {} events ({}..={})", records.len(), since_id + 1, last);
    }
    Ok(last)
}

/// Review state of one plan id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanReview {
    pub proposed_items: BTreeSet<String>,
    pub approved_items: BTreeSet<String>,
    pub finalized_items: Option<BTreeSet<String>>,
    pub corrections: usize,
}

/// Tracks proposal, approval and finalization per plan id, so callers can
/// refuse to hand an unapproved plan to an executor.
#[derive(Debug, Clone, Default)]
pub struct PlanStatus {
    plans: BTreeMap<String, PlanReview>,
}

impl PlanStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn review(&self, plan_id: &str) -> Option<&PlanReview> {
        self.plans.get(plan_id)
    }

    pub fn is_finalized(&self, plan_id: &str) -> bool {
        self.plans
            .get(plan_id)
            .is_some_and(|review| review.finalized_items.is_some())
    }
}

impl Projection for PlanStatus {
    fn apply(&mut self, record: &EventRecord) {
        match record.decode() {
            DomainEvent::PlanProposed(proposed) => {
                let review = self.plans.entry(proposed.plan_id).or_default();
                review.proposed_items.extend(proposed.item_ids);
            }
            DomainEvent::UserApproved(approved) => {
                let review = self.plans.entry(approved.plan_id).or_default();
                review.approved_items.extend(approved.item_ids);
            }
            DomainEvent::PlanFinalized(finalized) => {
                let review = self.plans.entry(finalized.plan_id).or_default();
                review.finalized_items = Some(finalized.approved_item_ids.into_iter().collect());
            }
            DomainEvent::CorrectionAdded(correction) => {
                self.plans.entry(correction.plan_id).or_default().corrections += 1;
            }
            _ => {}
        }
    }
}
