// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the unique-work registry (which chain currently owns a name)
//! - the pending-submission queue (submissions waiting for a replaced chain
//!   to acknowledge its cancellation)
//! - the chain scheduler
//! - the main runtime event loop that reacts to:
//!   - submissions, cancellations and purges from [`Engine`] handles
//!   - unit completion events from the executor
//!   - grace-period timers
//!   - constraint changes
//!   - shutdown requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]; [`handle`] is the public API.

use std::time::Duration;

use crate::chain::{ChainId, UnitId, WorkChain};
use crate::data::Data;

/// Default number of bodies allowed to run at once.
pub const DEFAULT_WORKERS: usize = 2;

/// Default time a running body gets to stop after cancellation.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(3);

/// Outcome of a unit body as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded(Data),
    Failed(String),
}

/// Options shared by the core and the async shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Worker-pool size; clamped to at least 1.
    pub workers: usize,
    /// How long a cancelled body may keep running before it is forced to
    /// `Cancelled`.
    pub cancel_grace: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

/// Correlates a request from an [`Engine`] handle with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

/// What happened to a submitted chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Registered under its name with this id.
    Accepted(ChainId),
    /// Not registered (`Keep` with active work, or a queued submission that a
    /// cancellation swept away).
    Rejected(String),
}

impl SubmitOutcome {
    pub fn chain_id(&self) -> Option<ChainId> {
        match self {
            SubmitOutcome::Accepted(id) => Some(*id),
            SubmitOutcome::Rejected(_) => None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }
}

/// Answer to a request, delivered to the waiting handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Submitted(SubmitOutcome),
    /// Whether any chain was actually cancelled.
    Cancelled(bool),
    /// Number of chains forgotten.
    Purged(usize),
}

/// Events flowing into the runtime from handles, executors and timers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Register a built chain under its name, honouring its policy.
    SubmitRequested { request: RequestId, chain: WorkChain },
    /// Cancel every in-flight chain registered under `name`.
    CancelRequested { request: RequestId, name: String },
    /// Forget every terminal chain registered under `name`.
    PurgeRequested { request: RequestId, name: String },
    /// A unit body returned (or could not be started).
    UnitCompleted { unit: UnitId, outcome: UnitOutcome },
    /// The cooperative-cancellation grace period of `unit` ran out.
    CancelGraceElapsed { unit: UnitId },
    /// Some constraint predicate flipped.
    ConstraintsChanged,
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod handle;
pub mod queue;
pub mod registry;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use handle::{Engine, EngineBuilder};
pub use queue::{PendingSubmissions, QueuedSubmission};
pub use registry::{Resolution, UniqueWorkRegistry};
pub use runtime::Runtime;
