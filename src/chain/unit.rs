// src/chain/unit.rs

//! Task unit metadata and per-unit state.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::Data;

/// Identifier of a task unit, assigned when its chain is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u64);

impl UnitId {
    /// Placeholder carried by units that have not been enqueued yet.
    pub const UNASSIGNED: UnitId = UnitId(0);
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// State of a task unit, also used for the derived state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkState {
    /// Waiting for its predecessor, or ready and waiting for a worker slot.
    Enqueued,
    /// Predecessor done but at least one constraint does not hold.
    Blocked,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkState::Succeeded | WorkState::Failed | WorkState::Cancelled
        )
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkState::Enqueued => "ENQUEUED",
            WorkState::Blocked => "BLOCKED",
            WorkState::Running => "RUNNING",
            WorkState::Succeeded => "SUCCEEDED",
            WorkState::Failed => "FAILED",
            WorkState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// A single schedulable step of a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUnit {
    pub id: UnitId,
    /// Which registered body runs this unit (e.g. `"blur"`).
    pub kind: String,
    /// Input supplied when the chain was built.
    pub static_input: Data,
    /// Effective input; fixed once the unit becomes ready to run.
    pub input: Data,
    /// Present iff `state == Succeeded`.
    pub output: Option<Data>,
    /// Predicate names that must all hold before the unit may start.
    pub constraints: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub state: WorkState,
    /// Cancellation was requested while the body was running.
    #[serde(default)]
    pub cancel_requested: bool,
}

impl TaskUnit {
    pub fn new(
        kind: impl Into<String>,
        static_input: Data,
        constraints: BTreeSet<String>,
        tags: BTreeSet<String>,
    ) -> Self {
        Self {
            id: UnitId::UNASSIGNED,
            kind: kind.into(),
            input: static_input.clone(),
            static_input,
            output: None,
            constraints,
            tags,
            state: WorkState::Enqueued,
            cancel_requested: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}
