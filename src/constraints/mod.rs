// src/constraints/mod.rs

//! Runtime conditions gating task units.
//!
//! A constraint is a named boolean predicate over the latest value of one
//! environment signal (e.g. `requires_charging` over `charging`).
//!
//! - [`evaluator`] owns the signal cache, predicate table and change
//!   callbacks.
//! - [`power`] is the handle through which power-state changes are reported.

pub mod evaluator;
pub mod power;

pub use evaluator::{ConstraintEvaluator, ConstraintSnapshot, Predicate};
pub use power::PowerStateSource;

pub const REQUIRES_CHARGING: &str = "requires_charging";
pub const REQUIRES_BATTERY_NOT_LOW: &str = "requires_battery_not_low";
pub const REQUIRES_DEVICE_IDLE: &str = "requires_device_idle";
pub const REQUIRES_STORAGE_NOT_LOW: &str = "requires_storage_not_low";
pub const REQUIRES_NETWORK: &str = "requires_network";

pub const SIGNAL_CHARGING: &str = "charging";
pub const SIGNAL_BATTERY_LOW: &str = "battery_low";
pub const SIGNAL_DEVICE_IDLE: &str = "device_idle";
pub const SIGNAL_STORAGE_LOW: &str = "storage_low";
pub const SIGNAL_NETWORK_CONNECTED: &str = "network_connected";

/// Read-only view used by the scheduler to decide whether a predicate holds.
pub trait ConstraintCheck {
    fn is_satisfied(&self, predicate: &str) -> bool;
}

impl<F> ConstraintCheck for F
where
    F: Fn(&str) -> bool,
{
    fn is_satisfied(&self, predicate: &str) -> bool {
        self(predicate)
    }
}
