// src/chain/mod.rs

//! Work chains and their scheduling.
//!
//! - [`unit`] holds the per-step state machine types.
//! - [`work_chain`] is an ordered, linearly dependent sequence of units.
//! - [`builder`] turns unit specs into a [`WorkChain`], checking kinds
//!   against the body registry.
//! - [`scheduler`] is the pure state machine that advances chains.
//! - [`state_manager`] applies individual transitions and records events.
//! - [`scheduler_step`] defines the result type for scheduler steps.

pub mod builder;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod unit;
pub mod work_chain;

pub use builder::{ChainBuilder, UnitSpec};
pub use scheduler::Scheduler;
pub use scheduler_step::{ScheduledUnit, SchedulerStep};
pub use unit::{TaskUnit, UnitId, WorkState};
pub use work_chain::{ChainId, WorkChain};
