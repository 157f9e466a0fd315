// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from the channel
//! - handing dispatched units to the executor
//! - publishing events, persisting chains, answering handles
//! - grace-period timers and shutdown
//!
//! The core reads constraint state through evaluator snapshots and is unit
//! tested without Tokio, channels or threads.

use std::sync::Arc;

use tracing::info;

use crate::chain::{ChainId, Scheduler, WorkChain};
use crate::constraints::ConstraintEvaluator;
use crate::engine::event_handlers::{CoreStep, Pending};
use crate::engine::queue::PendingSubmissions;
use crate::engine::registry::UniqueWorkRegistry;
use crate::engine::RuntimeEvent;

/// Pure core runtime state.
///
/// This owns:
/// - the chain scheduler
/// - the unique-work registry
/// - submissions waiting on a replacement
///
/// It has no channels and performs no IO.
#[derive(Debug)]
pub struct CoreRuntime {
    pub(super) scheduler: Scheduler,
    pub(super) registry: UniqueWorkRegistry,
    pub(super) pending: PendingSubmissions,
    pub(super) constraints: Arc<ConstraintEvaluator>,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, constraints: Arc<ConstraintEvaluator>) -> Self {
        Self {
            scheduler,
            registry: UniqueWorkRegistry::new(),
            pending: PendingSubmissions::new(),
            constraints,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &UniqueWorkRegistry {
        &self.registry
    }

    /// No chain in flight and no submission waiting.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle() && self.pending.is_empty()
    }

    /// Re-adopt chains loaded from a store and rebuild the registry from
    /// their names.
    pub fn restore(&mut self, mut chains: Vec<WorkChain>) -> CoreStep {
        chains.sort_by_key(|c| c.id);
        let names: Vec<(String, ChainId)> = chains.iter().map(|c| (c.name.clone(), c.id)).collect();

        let env = self.constraints.snapshot();
        let step = self.scheduler.restore(chains, env.as_ref());

        for (name, id) in names {
            if self.scheduler.chain(id).is_some() {
                self.registry.register(&name, id);
            }
        }
        info!(names = self.registry.names().count(), "restored stored chains");

        self.finish(Pending {
            step,
            replies: Vec::new(),
        })
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::SubmitRequested { request, chain } => self.handle_submit(request, chain),
            RuntimeEvent::CancelRequested { request, name } => self.handle_cancel(request, name),
            RuntimeEvent::PurgeRequested { request, name } => self.handle_purge(request, name),
            RuntimeEvent::UnitCompleted { unit, outcome } => self.handle_completion(unit, outcome),
            RuntimeEvent::CancelGraceElapsed { unit } => self.handle_grace_elapsed(unit),
            RuntimeEvent::ConstraintsChanged => self.handle_constraints_changed(),
            RuntimeEvent::ShutdownRequested => CoreStep::stop(),
        }
    }

    pub(super) fn chain_is_terminal(&self, id: ChainId) -> bool {
        self.scheduler.chain(id).is_none_or(|c| c.is_terminal())
    }
}
