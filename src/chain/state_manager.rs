// src/chain/state_manager.rs

//! Per-chain state transitions.
//!
//! Every mutation of a unit's state goes through [`StateManager`] so that the
//! matching [`StatusEvent`] is recorded in the same order the state machine
//! produced it.

use tracing::{debug, info};

use crate::bus::StatusEvent;
use crate::chain::scheduler_step::SchedulerStep;
use crate::chain::unit::{UnitId, WorkState};
use crate::chain::work_chain::WorkChain;
use crate::data::Data;

pub struct StateManager<'a> {
    chain: &'a mut WorkChain,
    step: &'a mut SchedulerStep,
}

impl<'a> StateManager<'a> {
    pub fn new(chain: &'a mut WorkChain, step: &'a mut SchedulerStep) -> Self {
        Self { chain, step }
    }

    pub fn chain(&self) -> &WorkChain {
        self.chain
    }

    /// Move unit `idx` to `to`, recording the event. No-op if already there.
    pub fn transition(&mut self, idx: usize, to: WorkState) {
        let unit = &mut self.chain.units[idx];
        let from = unit.state;
        if from == to {
            return;
        }

        if to != WorkState::Succeeded {
            unit.output = None;
        }
        unit.state = to;

        debug!(
            chain = %self.chain.name,
            unit = %unit.id,
            kind = %unit.kind,
            from = %from,
            to = %to,
            "unit transition"
        );

        let event = StatusEvent::for_unit(self.chain, &self.chain.units[idx], Some(from), to);
        self.step.events.push(event);
        self.step.touched.insert(self.chain.id);
    }

    /// Record a successful completion together with its output.
    pub fn succeed(&mut self, idx: usize, output: Data) {
        self.chain.units[idx].output = Some(output);
        self.transition(idx, WorkState::Succeeded);
    }

    /// Fix the effective input of unit `idx` (only while it has not started).
    pub fn wire_input(&mut self, idx: usize, input: Data) {
        let unit = &mut self.chain.units[idx];
        if matches!(unit.state, WorkState::Enqueued | WorkState::Blocked) && unit.input != input {
            unit.input = input;
            self.step.touched.insert(self.chain.id);
        }
    }

    /// Cancel every unit from `start` onwards that has not started yet.
    ///
    /// Returns the ids that were cancelled.
    pub fn cancel_pending_from(&mut self, start: usize) -> Vec<UnitId> {
        let mut cancelled = Vec::new();
        for idx in start..self.chain.units.len() {
            if matches!(
                self.chain.units[idx].state,
                WorkState::Enqueued | WorkState::Blocked
            ) {
                self.transition(idx, WorkState::Cancelled);
                cancelled.push(self.chain.units[idx].id);
            }
        }
        cancelled
    }

    /// Flag the running unit (if any) for cooperative cancellation.
    ///
    /// Returns its id the first time it is flagged.
    pub fn request_cancel_running(&mut self) -> Option<UnitId> {
        let unit = self
            .chain
            .units
            .iter_mut()
            .find(|u| u.state == WorkState::Running)?;
        if unit.cancel_requested {
            return None;
        }
        unit.cancel_requested = true;
        let id = unit.id;
        self.step.touched.insert(self.chain.id);
        Some(id)
    }

    /// Publish the derived chain state if it changed since the last publish.
    pub fn publish_chain_state(&mut self) {
        let state = self.chain.state();
        if self.chain.published == Some(state) {
            return;
        }
        let old = self.chain.published;
        self.chain.published = Some(state);

        if state.is_terminal() {
            info!(chain = %self.chain.name, id = %self.chain.id, state = %state, "chain finished");
        } else {
            debug!(chain = %self.chain.name, id = %self.chain.id, ?old, new = %state, "chain transition");
        }

        let event = StatusEvent::for_chain(self.chain, old, state);
        self.step.events.push(event);
        self.step.touched.insert(self.chain.id);
    }

    /// Emit a first-sighting event for every unit and the chain itself.
    pub fn announce(&mut self) {
        for idx in 0..self.chain.units.len() {
            let unit = &self.chain.units[idx];
            let event = StatusEvent::for_unit(self.chain, unit, None, unit.state);
            self.step.events.push(event);
        }
        self.chain.published = None;
        self.publish_chain_state();
    }
}
