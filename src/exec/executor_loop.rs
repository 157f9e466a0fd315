// src/exec/executor_loop.rs

//! Executor loop that tracks running units and their cancellation tokens.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{ScheduledUnit, UnitId};
use crate::engine::{RuntimeEvent, UnitOutcome};
use crate::exec::body::BodyRegistry;
use crate::exec::task_runner::run_unit;
use crate::notify::NotificationSink;

/// Commands accepted by the executor loop.
#[derive(Debug, Clone)]
pub enum ExecutorCommand {
    Run(ScheduledUnit),
    Cancel(UnitId),
}

/// Handle for a unit whose body has been started.
struct ActiveUnit {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// Every `Run` gets its own Tokio task; a shared semaphore with `workers`
/// permits bounds how many bodies execute at once. A `Cancel` fires the
/// unit's token; the body decides when to stop.
pub fn spawn_executor(
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    bodies: BodyRegistry,
    workers: usize,
    notifier: Arc<dyn NotificationSink>,
) -> mpsc::Sender<ExecutorCommand> {
    let (tx, mut rx) = mpsc::channel::<ExecutorCommand>(64);
    let permits = Arc::new(Semaphore::new(workers.max(1)));

    tokio::spawn(async move {
        info!(workers = workers.max(1), "executor loop started");

        let mut active: HashMap<UnitId, ActiveUnit> = HashMap::new();

        while let Some(command) = rx.recv().await {
            active.retain(|_, a| !a.handle.is_finished());

            match command {
                ExecutorCommand::Run(unit) => start_unit(
                    unit,
                    &mut active,
                    &bodies,
                    &permits,
                    &runtime_tx,
                    &notifier,
                ),
                ExecutorCommand::Cancel(unit) => cancel_unit(unit, &active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn start_unit(
    unit: ScheduledUnit,
    active: &mut HashMap<UnitId, ActiveUnit>,
    bodies: &BodyRegistry,
    permits: &Arc<Semaphore>,
    runtime_tx: &mpsc::UnboundedSender<RuntimeEvent>,
    notifier: &Arc<dyn NotificationSink>,
) {
    if active.contains_key(&unit.unit) {
        warn!(unit = %unit.unit, kind = %unit.kind, "unit already running; ignoring duplicate dispatch");
        return;
    }

    let Some(body) = bodies.get(&unit.kind) else {
        warn!(unit = %unit.unit, kind = %unit.kind, "no body registered for kind");
        let _ = runtime_tx.send(RuntimeEvent::UnitCompleted {
            unit: unit.unit,
            outcome: UnitOutcome::Failed(format!("no body registered for kind '{}'", unit.kind)),
        });
        return;
    };

    let cancel = CancellationToken::new();
    let id = unit.unit;
    let handle = tokio::spawn(run_unit(
        unit,
        body,
        Arc::clone(permits),
        cancel.clone(),
        runtime_tx.clone(),
        Arc::clone(notifier),
    ));

    active.insert(id, ActiveUnit { cancel, handle });
}

fn cancel_unit(unit: UnitId, active: &HashMap<UnitId, ActiveUnit>) {
    match active.get(&unit) {
        Some(running) => {
            info!(unit = %unit, "cancellation requested for running unit");
            running.cancel.cancel();
        }
        None => {
            debug!(unit = %unit, "cancel for unit that is not running; ignoring");
        }
    }
}
