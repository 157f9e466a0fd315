// src/exec/body.rs

//! Unit bodies: the code a task unit actually runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::chain::{ChainId, UnitId};
use crate::data::Data;
use crate::notify::NotificationSink;

/// Result of one body invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyOutcome {
    Success(Data),
    Failure(String),
}

/// The body asked for a cancellation checkpoint after cancellation was
/// requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cancellation requested")
    }
}

impl std::error::Error for Cancelled {}

/// Everything a body can see while it runs.
#[derive(Clone)]
pub struct UnitContext {
    pub unit: UnitId,
    pub chain: ChainId,
    pub chain_name: String,
    pub kind: String,
    pub input: Data,
    cancel: CancellationToken,
    notifier: Arc<dyn NotificationSink>,
}

impl fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitContext")
            .field("unit", &self.unit)
            .field("chain", &self.chain)
            .field("kind", &self.kind)
            .field("input", &self.input)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

const PAUSE_SLICE: Duration = Duration::from_millis(10);

impl UnitContext {
    pub fn new(
        unit: UnitId,
        chain: ChainId,
        chain_name: impl Into<String>,
        kind: impl Into<String>,
        input: Data,
        cancel: CancellationToken,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            unit,
            chain,
            chain_name: chain_name.into(),
            kind: kind.into(),
            input,
            cancel,
            notifier,
        }
    }

    pub fn input(&self) -> &Data {
        &self.input
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err(Cancelled)` once cancellation was requested; use with `?` between
    /// steps of a long body.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Block for `duration`, waking early on cancellation.
    ///
    /// Returns `false` if cancellation interrupted the pause.
    pub fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }

    pub fn notify(&self, message: &str) {
        self.notifier.notify(message);
    }
}

/// A unit body. Runs on a blocking worker thread.
pub trait UnitBody: Send + Sync {
    fn execute(&self, ctx: &UnitContext) -> BodyOutcome;
}

impl<F> UnitBody for F
where
    F: Fn(&UnitContext) -> BodyOutcome + Send + Sync,
{
    fn execute(&self, ctx: &UnitContext) -> BodyOutcome {
        self(ctx)
    }
}

/// Maps unit kinds to their bodies.
#[derive(Clone, Default)]
pub struct BodyRegistry {
    bodies: HashMap<String, Arc<dyn UnitBody>>,
}

impl fmt::Debug for BodyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.bodies.keys().collect();
        kinds.sort();
        f.debug_struct("BodyRegistry").field("kinds", &kinds).finish()
    }
}

impl BodyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `body` for `kind`, replacing any previous body.
    pub fn register(&mut self, kind: impl Into<String>, body: Arc<dyn UnitBody>) -> &mut Self {
        self.bodies.insert(kind.into(), body);
        self
    }

    pub fn register_fn<F>(&mut self, kind: impl Into<String>, body: F) -> &mut Self
    where
        F: Fn(&UnitContext) -> BodyOutcome + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(body))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.bodies.contains_key(kind)
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn UnitBody>> {
        self.bodies.get(kind).cloned()
    }
}
