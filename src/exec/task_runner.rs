// src/exec/task_runner.rs

//! Runs a single unit body and reports its outcome.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::chain::ScheduledUnit;
use crate::engine::{RuntimeEvent, UnitOutcome};
use crate::exec::body::{BodyOutcome, UnitBody, UnitContext};
use crate::notify::NotificationSink;

/// Wait for a worker permit, run the body on the blocking pool and send
/// `UnitCompleted`.
///
/// The permit is held by the blocking closure, so a body that ignores its
/// cancellation token keeps its worker busy until it actually returns.
pub async fn run_unit(
    unit: ScheduledUnit,
    body: Arc<dyn UnitBody>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    notifier: Arc<dyn NotificationSink>,
) {
    let id = unit.unit;

    let permit = tokio::select! {
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                report(&runtime_tx, &unit, UnitOutcome::Failed("worker pool closed".into()));
                return;
            }
        },
        _ = cancel.cancelled() => {
            debug!(unit = %id, kind = %unit.kind, "cancelled while waiting for a worker");
            report(&runtime_tx, &unit, UnitOutcome::Failed("cancelled before start".into()));
            return;
        }
    };

    info!(chain = %unit.chain_name, unit = %id, kind = %unit.kind, "starting unit body");
    notifier.notify(&format!("Starting {} ({})", unit.kind, unit.chain_name));

    let ctx = UnitContext::new(
        id,
        unit.chain,
        unit.chain_name.clone(),
        unit.kind.clone(),
        unit.input.clone(),
        cancel,
        Arc::clone(&notifier),
    );

    let joined = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        body.execute(&ctx)
    })
    .await;

    let outcome = match joined {
        Ok(BodyOutcome::Success(output)) => UnitOutcome::Succeeded(output),
        Ok(BodyOutcome::Failure(reason)) => UnitOutcome::Failed(reason),
        Err(err) if err.is_panic() => {
            error!(unit = %id, kind = %unit.kind, "unit body panicked");
            UnitOutcome::Failed("body panicked".into())
        }
        Err(err) => {
            error!(unit = %id, kind = %unit.kind, error = %err, "unit body did not complete");
            UnitOutcome::Failed(err.to_string())
        }
    };

    report(&runtime_tx, &unit, outcome);
}

fn report(
    runtime_tx: &mpsc::UnboundedSender<RuntimeEvent>,
    unit: &ScheduledUnit,
    outcome: UnitOutcome,
) {
    debug!(unit = %unit.unit, kind = %unit.kind, ?outcome, "reporting unit outcome");
    if runtime_tx
        .send(RuntimeEvent::UnitCompleted {
            unit: unit.unit,
            outcome,
        })
        .is_err()
    {
        debug!(unit = %unit.unit, "runtime gone; dropping unit outcome");
    }
}
