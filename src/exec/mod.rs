// src/exec/mod.rs

//! Unit execution layer.
//!
//! Bodies are plain synchronous functions; this module runs them on Tokio's
//! blocking pool, bounds concurrency, wires cancellation tokens and reports
//! outcomes back to the runtime as `RuntimeEvent`s.
//!
//! - [`body`] defines the `UnitBody` trait, `UnitContext` and `BodyRegistry`.
//! - [`executor_loop`] owns the loop that tracks running units.
//! - [`task_runner`] runs one unit body to completion.
//! - [`backend`] provides the `ExecutorBackend` trait and the concrete
//!   `RealExecutorBackend`, which tests can replace with a fake.

pub mod backend;
pub mod body;
pub mod executor_loop;
pub mod task_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use body::{BodyOutcome, BodyRegistry, Cancelled, UnitBody, UnitContext};
pub use executor_loop::{spawn_executor, ExecutorCommand};
