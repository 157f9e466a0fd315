// src/constraints/power.rs

use std::sync::Arc;

use super::{ConstraintEvaluator, SIGNAL_CHARGING};

/// Reports "device is charging" transitions into a [`ConstraintEvaluator`].
#[derive(Debug, Clone)]
pub struct PowerStateSource {
    evaluator: Arc<ConstraintEvaluator>,
}

impl PowerStateSource {
    pub fn new(evaluator: Arc<ConstraintEvaluator>) -> Self {
        Self { evaluator }
    }

    /// Returns `true` if the charging state actually changed.
    pub fn set_charging(&self, charging: bool) -> bool {
        self.evaluator.report(SIGNAL_CHARGING, charging)
    }

    pub fn is_charging(&self) -> bool {
        self.evaluator.snapshot().signal(SIGNAL_CHARGING)
    }
}
