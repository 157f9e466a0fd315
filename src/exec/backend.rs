// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw channel, so
//! tests can swap in a fake that completes units directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::chain::{ScheduledUnit, UnitId};
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};
use crate::notify::NotificationSink;

use super::body::BodyRegistry;
use super::executor_loop::{spawn_executor, ExecutorCommand};

/// How dispatched units get executed.
pub trait ExecutorBackend: Send {
    /// Start running the given units. Each must eventually produce a
    /// `RuntimeEvent::UnitCompleted`.
    fn dispatch(
        &mut self,
        units: Vec<ScheduledUnit>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask running units to stop cooperatively.
    fn cancel(
        &mut self,
        units: Vec<UnitId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production backend: forwards commands to the loop started by
/// [`spawn_executor`].
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorCommand>,
}

impl RealExecutorBackend {
    /// Spawns the executor loop immediately; at most `workers` bodies run at
    /// once.
    pub fn new(
        runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
        bodies: BodyRegistry,
        workers: usize,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let tx = spawn_executor(runtime_tx, bodies, workers, notifier);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn dispatch(
        &mut self,
        units: Vec<ScheduledUnit>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            for unit in units {
                tx.send(ExecutorCommand::Run(unit))
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel(
        &mut self,
        units: Vec<UnitId>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            for unit in units {
                tx.send(ExecutorCommand::Cancel(unit))
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        })
    }
}
