use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use workchain::chain::{ScheduledUnit, UnitId};
use workchain::engine::{RuntimeEvent, UnitOutcome};
use workchain::errors::Result;
use workchain::exec::ExecutorBackend;

/// What the fake does with dispatched units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeMode {
    /// Complete every unit immediately, echoing its input as output.
    Echo,
    /// Leave units running until the test calls [`FakeLog::complete`].
    Hold,
}

#[derive(Default)]
struct LogInner {
    dispatched: Vec<ScheduledUnit>,
    cancelled: Vec<UnitId>,
    runtime_tx: Option<mpsc::UnboundedSender<RuntimeEvent>>,
}

/// Shared record of what the runtime asked the fake executor to do.
#[derive(Clone, Default)]
pub struct FakeLog {
    inner: Arc<Mutex<LogInner>>,
}

impl FakeLog {
    pub fn dispatched(&self) -> Vec<ScheduledUnit> {
        self.inner.lock().unwrap().dispatched.clone()
    }

    pub fn dispatched_kinds(&self) -> Vec<String> {
        self.dispatched().into_iter().map(|u| u.kind).collect()
    }

    pub fn cancelled(&self) -> Vec<UnitId> {
        self.inner.lock().unwrap().cancelled.clone()
    }

    /// Report a held unit as finished.
    pub fn complete(&self, unit: UnitId, outcome: UnitOutcome) {
        let tx = self
            .inner
            .lock()
            .unwrap()
            .runtime_tx
            .clone()
            .expect("fake executor was never constructed");
        tx.send(RuntimeEvent::UnitCompleted { unit, outcome })
            .expect("runtime loop is gone");
    }
}

/// A fake executor that:
/// - records which units were dispatched and which were cancelled
/// - in `Echo` mode immediately reports each unit as succeeded (or failed
///   for kinds listed via [`FakeExecutor::failing`])
pub struct FakeExecutor {
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    log: FakeLog,
    mode: FakeMode,
    failing: BTreeSet<String>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
        log: FakeLog,
        mode: FakeMode,
    ) -> Self {
        log.inner.lock().unwrap().runtime_tx = Some(runtime_tx.clone());
        Self {
            runtime_tx,
            log,
            mode,
            failing: BTreeSet::new(),
        }
    }

    pub fn failing(mut self, kind: &str) -> Self {
        self.failing.insert(kind.to_string());
        self
    }

    fn outcome_for(&self, unit: &ScheduledUnit) -> UnitOutcome {
        if self.failing.contains(&unit.kind) {
            UnitOutcome::Failed(format!("{} failed", unit.kind))
        } else {
            let mut output = unit.input.clone();
            output.insert("ran", unit.kind.clone());
            UnitOutcome::Succeeded(output)
        }
    }
}

impl ExecutorBackend for FakeExecutor {
    fn dispatch(
        &mut self,
        units: Vec<ScheduledUnit>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for unit in units {
                self.log.inner.lock().unwrap().dispatched.push(unit.clone());

                if self.mode == FakeMode::Echo {
                    let outcome = self.outcome_for(&unit);
                    self.runtime_tx
                        .send(RuntimeEvent::UnitCompleted {
                            unit: unit.unit,
                            outcome,
                        })
                        .map_err(anyhow::Error::from)?;
                }
            }
            Ok(())
        })
    }

    fn cancel(
        &mut self,
        units: Vec<UnitId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.log.inner.lock().unwrap().cancelled.extend(units);
            Ok(())
        })
    }
}

