// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bus::{EntityKind, StatusBus, StatusEvent};
use crate::chain::{ChainId, ScheduledUnit, UnitId, WorkChain};
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::notify::NotificationSink;
use crate::persist::ChainStore;

use super::core::CoreRuntime;
use super::{CoreCommand, Reply, RequestId, RuntimeEvent};

/// Reply channels of requests still being processed, shared with the
/// handles that issued them.
pub type ReplyMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Reply>>>>;

/// Everything the shell talks to besides the executor.
pub struct RuntimeServices {
    pub bus: Arc<StatusBus>,
    pub store: Arc<dyn ChainStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub replies: ReplyMap,
    /// Used to schedule grace-period timers back into the loop.
    pub event_tx: mpsc::UnboundedSender<RuntimeEvent>,
    pub cancel_grace: Duration,
}

/// Drives the core in response to `RuntimeEvent`s and carries out the
/// commands it returns.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    executor: E,
    services: RuntimeServices,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
        executor: E,
        services: RuntimeServices,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            services,
        }
    }

    /// Adopt chains from the store before the loop starts.
    pub async fn restore(&mut self, chains: Vec<WorkChain>) -> Result<()> {
        if chains.is_empty() {
            return Ok(());
        }
        let step = self.core.restore(chains);
        for command in step.commands {
            self.execute_command(command).await?;
        }
        Ok(())
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core.
    pub async fn run(mut self) -> Result<()> {
        info!("workchain runtime started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        // Dropping the senders wakes every waiting handle with an error.
        self.services
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        info!("runtime exiting");
        Ok(())
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Publish(events) => self.publish(events),
            CoreCommand::Forget(ids) => self.forget(ids),
            CoreCommand::Persist(chains) => self.persist(chains),
            CoreCommand::CancelRunning(units) => {
                self.cancel_running(units).await?;
            }
            CoreCommand::Dispatch(units) => {
                self.dispatch(units).await?;
            }
            CoreCommand::Reply { request, reply } => self.reply(request, reply),
        }
        Ok(())
    }

    fn publish(&self, events: Vec<StatusEvent>) {
        for event in events {
            if event.entity_kind() == EntityKind::Chain && event.is_terminal() {
                self.services
                    .notifier
                    .notify(&format!("Chain '{}' {}", event.chain_name, event.new_state));
            }
            self.services.bus.publish(event);
        }
    }

    fn forget(&self, ids: Vec<ChainId>) {
        for id in ids {
            self.services.bus.forget(id);
            if let Err(err) = self.services.store.remove(id) {
                warn!(chain = %id, error = %err, "failed to remove chain from store");
            }
        }
    }

    fn persist(&self, chains: Vec<WorkChain>) {
        for chain in chains.iter() {
            if let Err(err) = self.services.store.save(chain) {
                warn!(chain = %chain.name, id = %chain.id, error = %err, "failed to persist chain");
            }
        }
    }

    async fn cancel_running(&mut self, units: Vec<UnitId>) -> Result<()> {
        let grace = self.services.cancel_grace;
        for unit in units.iter().copied() {
            let tx = self.services.event_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = tx.send(RuntimeEvent::CancelGraceElapsed { unit });
            });
        }

        debug!(?units, ?grace, "requesting cooperative stop");
        self.executor.cancel(units).await
    }

    async fn dispatch(&mut self, units: Vec<ScheduledUnit>) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }

        let ids: Vec<_> = units.iter().map(|u| u.unit).collect();
        debug!(?ids, "dispatching ready units");

        self.executor.dispatch(units).await
    }

    fn reply(&self, request: RequestId, reply: Reply) {
        let sender = self
            .services
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&request);

        match sender {
            Some(tx) => {
                if tx.send(reply).is_err() {
                    debug!(request = request.0, "requester went away before the reply");
                }
            }
            None => debug!(request = request.0, "no waiter registered for reply"),
        }
    }
}
