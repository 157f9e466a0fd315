// src/bus/event.rs

//! Status events and snapshots published for units and chains.

use std::collections::BTreeSet;
use std::fmt;

use crate::chain::{ChainId, TaskUnit, UnitId, WorkChain, WorkState};
use crate::data::Data;

/// Whether an event describes a single unit or a whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Task,
    Chain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityId {
    Unit(UnitId),
    Chain(ChainId),
}

impl EntityId {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityId::Unit(_) => EntityKind::Task,
            EntityId::Chain(_) => EntityKind::Chain,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Unit(id) => write!(f, "{id}"),
            EntityId::Chain(id) => write!(f, "{id}"),
        }
    }
}

/// A single state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub entity: EntityId,
    pub chain_id: ChainId,
    pub chain_name: String,
    /// Unit kind; `None` for chain events.
    pub kind: Option<String>,
    pub tags: BTreeSet<String>,
    /// `None` for the first event of an entity and for synthetic snapshots.
    pub old_state: Option<WorkState>,
    pub new_state: WorkState,
    pub output: Option<Data>,
    /// Built from the current snapshot at subscription time, not from a live
    /// transition.
    pub synthetic: bool,
}

impl StatusEvent {
    pub fn for_unit(
        chain: &WorkChain,
        unit: &TaskUnit,
        old_state: Option<WorkState>,
        new_state: WorkState,
    ) -> Self {
        Self {
            entity: EntityId::Unit(unit.id),
            chain_id: chain.id,
            chain_name: chain.name.clone(),
            kind: Some(unit.kind.clone()),
            tags: unit.tags.clone(),
            old_state,
            new_state,
            output: unit.output.clone(),
            synthetic: false,
        }
    }

    pub fn for_chain(chain: &WorkChain, old_state: Option<WorkState>, new_state: WorkState) -> Self {
        let output = if new_state == WorkState::Succeeded {
            chain.terminal_output().cloned()
        } else {
            None
        };

        Self {
            entity: EntityId::Chain(chain.id),
            chain_id: chain.id,
            chain_name: chain.name.clone(),
            kind: None,
            tags: chain.tags(),
            old_state,
            new_state,
            output,
            synthetic: false,
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.entity.kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.new_state.is_terminal()
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.kind.as_deref().unwrap_or("chain");
        match self.old_state {
            Some(old) => write!(
                f,
                "[{}] {} {} {} -> {}",
                self.chain_name, self.entity, label, old, self.new_state
            ),
            None => write!(
                f,
                "[{}] {} {} {}",
                self.chain_name, self.entity, label, self.new_state
            ),
        }
    }
}

/// Latest known state of an entity, as returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkInfo {
    pub entity: EntityId,
    pub chain_id: ChainId,
    pub chain_name: String,
    pub kind: Option<String>,
    pub tags: BTreeSet<String>,
    pub state: WorkState,
    pub output: Option<Data>,
}

impl WorkInfo {
    pub fn from_event(event: &StatusEvent) -> Self {
        Self {
            entity: event.entity,
            chain_id: event.chain_id,
            chain_name: event.chain_name.clone(),
            kind: event.kind.clone(),
            tags: event.tags.clone(),
            state: event.new_state,
            output: event.output.clone(),
        }
    }

    /// Synthetic event handed to a fresh subscriber.
    pub fn to_synthetic_event(&self) -> StatusEvent {
        StatusEvent {
            entity: self.entity,
            chain_id: self.chain_id,
            chain_name: self.chain_name.clone(),
            kind: self.kind.clone(),
            tags: self.tags.clone(),
            old_state: None,
            new_state: self.state,
            output: self.output.clone(),
            synthetic: true,
        }
    }
}
