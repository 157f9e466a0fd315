// src/chain/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use std::collections::BTreeSet;

use crate::bus::StatusEvent;
use crate::chain::{ChainId, UnitId};
use crate::data::Data;

/// Description of a unit the scheduler wants a worker to run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledUnit {
    pub unit: UnitId,
    pub chain: ChainId,
    pub chain_name: String,
    pub kind: String,
    /// Frozen input for this execution.
    pub input: Data,
}

/// Structured result of a single scheduler "step".
///
/// The IO shell turns this into executor calls, bus publications and store
/// writes; tests inspect it directly.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Units that moved to `Running` and must be handed to a worker.
    pub dispatched: Vec<ScheduledUnit>,
    /// Running units whose bodies must be asked to stop.
    pub cancel_running: Vec<UnitId>,
    /// Every transition produced by this step, in order.
    pub events: Vec<StatusEvent>,
    /// Chains whose stored state changed.
    pub touched: BTreeSet<ChainId>,
    /// Chains that were dropped from the scheduler.
    pub purged: Vec<ChainId>,
}

impl SchedulerStep {
    pub fn merge(&mut self, other: SchedulerStep) {
        self.dispatched.extend(other.dispatched);
        self.cancel_running.extend(other.cancel_running);
        self.events.extend(other.events);
        self.touched.extend(other.touched);
        self.purged.extend(other.purged);
    }

    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty()
            && self.cancel_running.is_empty()
            && self.events.is_empty()
            && self.touched.is_empty()
            && self.purged.is_empty()
    }
}
