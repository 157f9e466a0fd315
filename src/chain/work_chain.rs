// src/chain/work_chain.rs

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chain::unit::{TaskUnit, UnitId, WorkState};
use crate::data::Data;
use crate::types::ExistingWorkPolicy;

/// Identifier of an enqueued chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl ChainId {
    pub const UNASSIGNED: ChainId = ChainId(0);
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Ordered sequence of units where unit `i + 1` depends on unit `i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkChain {
    pub id: ChainId,
    pub name: String,
    pub policy: ExistingWorkPolicy,
    pub units: Vec<TaskUnit>,
    /// Chain this one was appended to; its first unit waits for that chain.
    #[serde(default)]
    pub after: Option<ChainId>,
    /// Last chain state handed to observers.
    #[serde(skip)]
    pub(crate) published: Option<WorkState>,
}

impl WorkChain {
    pub fn new(name: impl Into<String>, policy: ExistingWorkPolicy, units: Vec<TaskUnit>) -> Self {
        Self {
            id: ChainId::UNASSIGNED,
            name: name.into(),
            policy,
            units,
            after: None,
            published: None,
        }
    }

    /// Derived chain state.
    ///
    /// - `Failed` as soon as any unit failed.
    /// - `Succeeded` once every unit succeeded.
    /// - `Cancelled` once every unit is terminal otherwise.
    /// - `Running` while anything is still in flight.
    pub fn state(&self) -> WorkState {
        if self.units.iter().any(|u| u.state == WorkState::Failed) {
            return WorkState::Failed;
        }
        if self.units.iter().all(|u| u.state == WorkState::Succeeded) {
            return WorkState::Succeeded;
        }
        if self.units.iter().all(|u| u.is_terminal()) {
            return WorkState::Cancelled;
        }
        WorkState::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Union of all unit tags; a chain matches a tag if any unit carries it.
    pub fn tags(&self) -> BTreeSet<String> {
        self.units
            .iter()
            .flat_map(|u| u.tags.iter().cloned())
            .collect()
    }

    /// Output of the terminal unit, if the chain succeeded.
    pub fn terminal_output(&self) -> Option<&Data> {
        self.units.last().and_then(|u| u.output.as_ref())
    }

    /// Index of the first unit that has not succeeded.
    pub fn frontier(&self) -> Option<usize> {
        self.units
            .iter()
            .position(|u| u.state != WorkState::Succeeded)
    }

    pub fn unit(&self, id: UnitId) -> Option<&TaskUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn position_of(&self, id: UnitId) -> Option<usize> {
        self.units.iter().position(|u| u.id == id)
    }

    pub fn running_unit(&self) -> Option<&TaskUnit> {
        self.units.iter().find(|u| u.state == WorkState::Running)
    }
}
