//! Scripted unit bodies for engine tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use workchain::exec::{BodyOutcome, BodyRegistry, UnitContext};

const POLL: Duration = Duration::from_millis(5);

/// Body that appends its kind to the `trail` string input and succeeds.
pub fn trail_body(ctx: &UnitContext) -> BodyOutcome {
    let mut output = ctx.input().clone();
    let trail = match ctx.input().get_str("trail") {
        Some(prev) => format!("{prev},{}", ctx.kind),
        None => ctx.kind.clone(),
    };
    output.insert("trail", trail);
    BodyOutcome::Success(output)
}

/// Body that always fails.
pub fn failing_body(ctx: &UnitContext) -> BodyOutcome {
    BodyOutcome::Failure(format!("{} always fails", ctx.kind))
}

/// A latch: bodies built from it block until [`Gate::open`] is called.
///
/// Cooperative bodies give up as soon as cancellation is requested;
/// stubborn ones ignore it and keep waiting for the gate.
#[derive(Clone, Default)]
pub struct Gate {
    open: Arc<AtomicBool>,
    started: Arc<AtomicUsize>,
    finished: Arc<Mutex<Vec<String>>>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// How many bodies have entered the gate so far.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Kinds of the bodies that returned, in order.
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    /// Wait (async) until at least `n` bodies have entered.
    pub async fn wait_started(&self, n: usize) {
        while self.started() < n {
            tokio::time::sleep(POLL).await;
        }
    }

    pub fn cooperative(&self) -> impl Fn(&UnitContext) -> BodyOutcome + Send + Sync + 'static {
        let gate = self.clone();
        move |ctx: &UnitContext| gate.wait(ctx, true)
    }

    pub fn stubborn(&self) -> impl Fn(&UnitContext) -> BodyOutcome + Send + Sync + 'static {
        let gate = self.clone();
        move |ctx: &UnitContext| gate.wait(ctx, false)
    }

    fn wait(&self, ctx: &UnitContext, cooperative: bool) -> BodyOutcome {
        self.started.fetch_add(1, Ordering::SeqCst);
        let outcome = loop {
            if self.open.load(Ordering::SeqCst) {
                break trail_body(ctx);
            }
            if cooperative && ctx.checkpoint().is_err() {
                break BodyOutcome::Failure("stopped".to_string());
            }
            std::thread::sleep(POLL);
        };
        self.finished.lock().unwrap().push(ctx.kind.clone());
        outcome
    }
}

/// Registry with `a`, `b`, `c` trail bodies and a failing `boom`.
pub fn trail_registry() -> BodyRegistry {
    let mut reg = BodyRegistry::new();
    reg.register_fn("a", trail_body)
        .register_fn("b", trail_body)
        .register_fn("c", trail_body)
        .register_fn("boom", failing_body);
    reg
}
