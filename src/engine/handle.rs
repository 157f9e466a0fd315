// src/engine/handle.rs

//! Public engine API.
//!
//! An [`Engine`] is a cheap front for the runtime loop: every mutating call
//! becomes a `RuntimeEvent`, and the caller awaits the core's reply.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{StatusBus, StatusFilter, Subscription, WorkInfo};
use crate::chain::builder::build_chain;
use crate::chain::{Scheduler, UnitSpec, WorkChain};
use crate::constraints::{ConstraintEvaluator, PowerStateSource};
use crate::errors::{Result, WorkchainError};
use crate::exec::{BodyRegistry, ExecutorBackend, RealExecutorBackend};
use crate::notify::{NotificationSink, TracingNotifier};
use crate::persist::{ChainStore, MemoryChainStore};
use crate::types::ExistingWorkPolicy;

use super::core::CoreRuntime;
use super::runtime::{ReplyMap, Runtime, RuntimeServices};
use super::{EngineOptions, Reply, RequestId, RuntimeEvent, SubmitOutcome};

/// What an executor backend gets to work with.
pub struct ExecutorSetup {
    pub runtime_tx: mpsc::UnboundedSender<RuntimeEvent>,
    pub bodies: BodyRegistry,
    pub workers: usize,
    pub notifier: Arc<dyn NotificationSink>,
}

/// Configures and starts an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    options: EngineOptions,
    bodies: BodyRegistry,
    constraints: Option<Arc<ConstraintEvaluator>>,
    store: Option<Arc<dyn ChainStore>>,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("options", &self.options)
            .field("bodies", &self.bodies)
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.options.workers = workers;
        self
    }

    pub fn cancel_grace(mut self, grace: Duration) -> Self {
        self.options.cancel_grace = grace;
        self
    }

    pub fn bodies(mut self, bodies: BodyRegistry) -> Self {
        self.bodies = bodies;
        self
    }

    /// Defaults to an evaluator with the builtin predicates.
    pub fn constraints(mut self, constraints: Arc<ConstraintEvaluator>) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Defaults to [`MemoryChainStore`].
    pub fn store(mut self, store: Arc<dyn ChainStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to [`TracingNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Start the runtime loop with the real worker pool.
    pub async fn start(self) -> Result<Engine> {
        self.start_with(|setup| {
            RealExecutorBackend::new(setup.runtime_tx, setup.bodies, setup.workers, setup.notifier)
        })
        .await
    }

    /// Start the runtime loop with a custom executor backend.
    ///
    /// Chains left in the store are restored before this returns.
    pub async fn start_with<E, F>(self, make_executor: F) -> Result<Engine>
    where
        E: ExecutorBackend + 'static,
        F: FnOnce(ExecutorSetup) -> E,
    {
        let options = EngineOptions {
            workers: self.options.workers.max(1),
            ..self.options
        };
        let constraints = self
            .constraints
            .unwrap_or_else(|| Arc::new(ConstraintEvaluator::with_builtin_predicates()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryChainStore::new()));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));

        let bus = Arc::new(StatusBus::new());
        let replies: ReplyMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel::<RuntimeEvent>();

        // The callback only posts a message; re-evaluation happens on the
        // runtime loop.
        {
            let tx = tx.clone();
            constraints.on_any_change(move |predicate, value| {
                debug!(predicate, value, "constraint changed");
                let _ = tx.send(RuntimeEvent::ConstraintsChanged);
            });
        }

        let executor = make_executor(ExecutorSetup {
            runtime_tx: tx.clone(),
            bodies: self.bodies.clone(),
            workers: options.workers,
            notifier: Arc::clone(&notifier),
        });

        let core = CoreRuntime::new(Scheduler::new(options.workers), Arc::clone(&constraints));
        let services = RuntimeServices {
            bus: Arc::clone(&bus),
            store: Arc::clone(&store),
            notifier,
            replies: Arc::clone(&replies),
            event_tx: tx.clone(),
            cancel_grace: options.cancel_grace,
        };
        let mut runtime = Runtime::new(core, rx, executor, services);

        let stored = store.load_all()?;
        if !stored.is_empty() {
            info!(chains = stored.len(), "restoring chains from store");
        }
        runtime.restore(stored).await?;

        let join = tokio::spawn(async move {
            let result = runtime.run().await;
            if let Err(ref err) = result {
                warn!(error = %err, "runtime stopped with an error");
            }
            result
        });

        info!(
            workers = options.workers,
            cancel_grace = ?options.cancel_grace,
            "engine started"
        );

        Ok(Engine {
            tx,
            replies,
            next_request: AtomicU64::new(1),
            bodies: self.bodies,
            bus,
            constraints,
            options,
            runtime: Mutex::new(Some(join)),
        })
    }
}

/// Handle to a running engine.
///
/// Dropping it asks the runtime loop to stop.
pub struct Engine {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
    replies: ReplyMap,
    next_request: AtomicU64,
    bodies: BodyRegistry,
    bus: Arc<StatusBus>,
    constraints: Arc<ConstraintEvaluator>,
    options: EngineOptions,
    runtime: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn bodies(&self) -> &BodyRegistry {
        &self.bodies
    }

    pub fn bus(&self) -> &Arc<StatusBus> {
        &self.bus
    }

    pub fn constraints(&self) -> &Arc<ConstraintEvaluator> {
        &self.constraints
    }

    pub fn power(&self) -> PowerStateSource {
        PowerStateSource::new(Arc::clone(&self.constraints))
    }

    /// Report an environment signal; returns `true` if it changed.
    pub fn report_signal(&self, signal: &str, value: bool) -> bool {
        self.constraints.report(signal, value)
    }

    /// Build a chain from `specs` and submit it under `name`.
    ///
    /// Resolves once the chain is registered, which under `Replace` means
    /// after the chains it replaces have acknowledged cancellation.
    pub async fn apply_chain(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        specs: Vec<UnitSpec>,
    ) -> Result<SubmitOutcome> {
        let chain = build_chain(name, policy, specs, &self.bodies)?;
        self.submit(chain).await
    }

    /// Submit an already built chain.
    pub async fn submit(&self, chain: WorkChain) -> Result<SubmitOutcome> {
        if let Some(unit) = chain.units.iter().find(|u| !self.bodies.contains(&u.kind)) {
            return Err(WorkchainError::InvalidSpec(format!(
                "no body registered for kind '{}'",
                unit.kind
            )));
        }

        match self
            .request(|request| RuntimeEvent::SubmitRequested { request, chain })
            .await?
        {
            Reply::Submitted(outcome) => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    /// Cancel every in-flight chain registered under `name`.
    ///
    /// Returns whether anything was cancelled; unknown names are a no-op.
    pub async fn cancel_chain(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        match self
            .request(|request| RuntimeEvent::CancelRequested { request, name })
            .await?
        {
            Reply::Cancelled(any) => Ok(any),
            other => Err(unexpected(other)),
        }
    }

    /// Forget terminal chains registered under `name`; returns how many.
    pub async fn purge(&self, name: &str) -> Result<usize> {
        let name = name.to_string();
        match self
            .request(|request| RuntimeEvent::PurgeRequested { request, name })
            .await?
        {
            Reply::Purged(n) => Ok(n),
            other => Err(unexpected(other)),
        }
    }

    pub fn observe_by_tag(&self, tag: &str) -> Subscription {
        self.bus.subscribe_by_tag(tag)
    }

    pub fn observe_by_name(&self, name: &str) -> Subscription {
        self.bus.subscribe_by_name(name)
    }

    pub fn work_infos_by_tag(&self, tag: &str) -> Vec<WorkInfo> {
        self.bus.infos(&StatusFilter::Tag(tag.to_string()))
    }

    pub fn work_infos_by_name(&self, name: &str) -> Vec<WorkInfo> {
        self.bus.infos(&StatusFilter::Name(name.to_string()))
    }

    /// Stop the runtime loop and wait for it to exit.
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.tx.send(RuntimeEvent::ShutdownRequested);

        let handle = self
            .runtime
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| WorkchainError::Other(e.into()))?,
            None => Ok(()),
        }
    }

    async fn request(&self, make: impl FnOnce(RequestId) -> RuntimeEvent) -> Result<Reply> {
        let request = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
        let (reply_tx, reply_rx) = oneshot::channel();

        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request, reply_tx);

        if self.tx.send(make(request)).is_err() {
            self.replies
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request);
            return Err(WorkchainError::EngineStopped);
        }

        reply_rx.await.map_err(|_| WorkchainError::EngineStopped)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.tx.send(RuntimeEvent::ShutdownRequested);
    }
}

fn unexpected(reply: Reply) -> WorkchainError {
    WorkchainError::Other(anyhow::anyhow!("unexpected reply from runtime: {reply:?}"))
}
