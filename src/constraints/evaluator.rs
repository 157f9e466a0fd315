// src/constraints/evaluator.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, trace};

use super::{
    ConstraintCheck, REQUIRES_BATTERY_NOT_LOW, REQUIRES_CHARGING, REQUIRES_DEVICE_IDLE,
    REQUIRES_NETWORK, REQUIRES_STORAGE_NOT_LOW, SIGNAL_BATTERY_LOW, SIGNAL_CHARGING,
    SIGNAL_DEVICE_IDLE, SIGNAL_NETWORK_CONNECTED, SIGNAL_STORAGE_LOW,
};

/// A predicate holds when `signal` currently equals `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub signal: String,
    pub expected: bool,
}

/// Immutable view of signals and predicates at one instant.
///
/// Signals that were never reported read as `false`; predicates that were
/// never registered never hold.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSnapshot {
    signals: HashMap<String, bool>,
    predicates: HashMap<String, Predicate>,
}

impl ConstraintSnapshot {
    pub fn signal(&self, signal: &str) -> bool {
        self.signals.get(signal).copied().unwrap_or(false)
    }

    pub fn evaluate(&self, predicate: &str) -> bool {
        match self.predicates.get(predicate) {
            Some(p) => self.signal(&p.signal) == p.expected,
            None => false,
        }
    }
}

impl ConstraintCheck for ConstraintSnapshot {
    fn is_satisfied(&self, predicate: &str) -> bool {
        self.evaluate(predicate)
    }
}

type ChangeCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

struct Watcher {
    /// `None` watches every predicate.
    predicate: Option<String>,
    callback: ChangeCallback,
}

/// Observes environment signals and answers whether constraints hold.
///
/// The current state is a copy-on-write snapshot: readers clone an `Arc`,
/// writers build a new snapshot and swap it in. Change callbacks run outside
/// the state lock, at most once per actual predicate transition, and in the
/// order the transitions happened. A callback may read the evaluator but
/// must not call [`report`](Self::report) on it.
pub struct ConstraintEvaluator {
    state: RwLock<Arc<ConstraintSnapshot>>,
    watchers: Mutex<Vec<Watcher>>,
    /// Held from a report's write until its callbacks return.
    delivery: Mutex<()>,
}

impl fmt::Debug for ConstraintEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintEvaluator")
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl Default for ConstraintEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintEvaluator {
    /// An evaluator with no predicates and no signals.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(ConstraintSnapshot::default())),
            watchers: Mutex::new(Vec::new()),
            delivery: Mutex::new(()),
        }
    }

    /// An evaluator with the builtin device predicates registered.
    pub fn with_builtin_predicates() -> Self {
        let evaluator = Self::new();
        evaluator.register(REQUIRES_CHARGING, SIGNAL_CHARGING, true);
        evaluator.register(REQUIRES_BATTERY_NOT_LOW, SIGNAL_BATTERY_LOW, false);
        evaluator.register(REQUIRES_DEVICE_IDLE, SIGNAL_DEVICE_IDLE, true);
        evaluator.register(REQUIRES_STORAGE_NOT_LOW, SIGNAL_STORAGE_LOW, false);
        evaluator.register(REQUIRES_NETWORK, SIGNAL_NETWORK_CONNECTED, true);
        evaluator
    }

    /// Register (or redefine) `predicate` as "`signal` equals `expected`".
    pub fn register(&self, predicate: impl Into<String>, signal: impl Into<String>, expected: bool) {
        let predicate = predicate.into();
        let signal = signal.into();

        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        let mut next = (**guard).clone();
        debug!(predicate = %predicate, signal = %signal, expected, "registered predicate");
        next.predicates.insert(predicate, Predicate { signal, expected });
        *guard = Arc::new(next);
    }

    /// Current value of `predicate`. Pure and idempotent.
    pub fn evaluate(&self, predicate: &str) -> bool {
        self.snapshot().evaluate(predicate)
    }

    /// Latest copy-on-write snapshot.
    pub fn snapshot(&self) -> Arc<ConstraintSnapshot> {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Call `callback` with the new value every time `predicate` flips.
    pub fn on_change<F>(&self, predicate: impl Into<String>, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let watcher = Watcher {
            predicate: Some(predicate.into()),
            callback: Arc::new(move |_name: &str, value: bool| callback(value)),
        };
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(watcher);
    }

    /// Call `callback(predicate, value)` whenever any predicate flips.
    pub fn on_any_change<F>(&self, callback: F)
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        let watcher = Watcher {
            predicate: None,
            callback: Arc::new(callback),
        };
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(watcher);
    }

    /// Report the latest reading of a signal.
    ///
    /// Repeating the current value is a no-op. Returns `true` if the stored
    /// value actually changed.
    pub fn report(&self, signal: &str, value: bool) -> bool {
        let _delivery = self.delivery.lock().unwrap_or_else(|e| e.into_inner());

        let (before, after) = {
            let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
            let previous = guard.signals.get(signal).copied();
            if previous == Some(value) {
                trace!(signal, value, "repeated signal reading; ignoring");
                return false;
            }

            let before = Arc::clone(&guard);
            let mut next = (**guard).clone();
            next.signals.insert(signal.to_string(), value);
            let after = Arc::new(next);
            *guard = Arc::clone(&after);

            if previous.unwrap_or(false) == value {
                // First reading equal to the implicit default; nothing flips.
                return false;
            }
            (before, after)
        };

        let flipped: Vec<(String, bool)> = after
            .predicates
            .iter()
            .filter(|(_, p)| p.signal == signal)
            .filter_map(|(name, _)| {
                let now = after.evaluate(name);
                (before.evaluate(name) != now).then(|| (name.clone(), now))
            })
            .collect();

        info!(signal, value, flipped = flipped.len(), "signal changed");

        let callbacks: Vec<(String, bool, ChangeCallback)> = {
            let watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
            flipped
                .iter()
                .flat_map(|(name, now)| {
                    watchers
                        .iter()
                        .filter(move |w| w.predicate.as_deref().is_none_or(|p| p == name))
                        .map(move |w| (name.clone(), *now, Arc::clone(&w.callback)))
                })
                .collect()
        };

        for (name, now, callback) in callbacks {
            callback(&name, now);
        }

        true
    }
}

impl ConstraintCheck for ConstraintEvaluator {
    fn is_satisfied(&self, predicate: &str) -> bool {
        self.evaluate(predicate)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn builtin_charging_predicate_follows_signal() {
        let evaluator = ConstraintEvaluator::with_builtin_predicates();
        assert!(!evaluator.evaluate(REQUIRES_CHARGING));

        evaluator.report(SIGNAL_CHARGING, true);
        assert!(evaluator.evaluate(REQUIRES_CHARGING));

        // Unreported "low" signals read as false, so the "not low" predicates hold.
        assert!(evaluator.evaluate(REQUIRES_BATTERY_NOT_LOW));
        assert!(evaluator.evaluate(REQUIRES_STORAGE_NOT_LOW));
    }

    #[test]
    fn unregistered_predicate_never_holds() {
        let evaluator = ConstraintEvaluator::new();
        evaluator.report("anything", true);
        assert!(!evaluator.evaluate("requires_anything"));
    }

    #[test]
    fn repeated_readings_do_not_notify_twice() {
        let evaluator = ConstraintEvaluator::with_builtin_predicates();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        evaluator.on_change(REQUIRES_CHARGING, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(evaluator.report(SIGNAL_CHARGING, true));
        assert!(!evaluator.report(SIGNAL_CHARGING, true));
        assert!(!evaluator.report(SIGNAL_CHARGING, true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        evaluator.report(SIGNAL_CHARGING, false);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn first_false_reading_is_not_a_transition() {
        let evaluator = ConstraintEvaluator::with_builtin_predicates();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        evaluator.on_any_change(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!evaluator.report(SIGNAL_CHARGING, false));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callbacks_may_read_the_evaluator() {
        let evaluator = Arc::new(ConstraintEvaluator::with_builtin_predicates());
        let observed = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::clone(&evaluator);
        let sink = Arc::clone(&observed);
        evaluator.on_change(REQUIRES_CHARGING, move |value| {
            // Would deadlock if callbacks ran under the state lock.
            let now = inner.evaluate(REQUIRES_CHARGING);
            sink.lock().unwrap().push((value, now));
        });

        evaluator.report(SIGNAL_CHARGING, true);
        assert_eq!(*observed.lock().unwrap(), vec![(true, true)]);
    }

    #[test]
    fn concurrent_reports_notify_in_transition_order() {
        let evaluator = Arc::new(ConstraintEvaluator::with_builtin_predicates());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        evaluator.on_change(REQUIRES_CHARGING, move |value| {
            // Widen the window between a report's write and its delivery.
            std::thread::yield_now();
            sink.lock().unwrap().push(value);
        });

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let evaluator = Arc::clone(&evaluator);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        evaluator.report(SIGNAL_CHARGING, i % 2 == 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        // Every delivered transition flips the previous one, starting from
        // the implicit `false`, and the last one matches the final state.
        let mut expected = true;
        for value in seen.iter() {
            assert_eq!(*value, expected);
            expected = !expected;
        }
        assert_eq!(seen.last().copied(), Some(evaluator.evaluate(REQUIRES_CHARGING)));
    }

    #[test]
    fn snapshots_are_not_affected_by_later_reports() {
        let evaluator = ConstraintEvaluator::with_builtin_predicates();
        let before = evaluator.snapshot();
        evaluator.report(SIGNAL_CHARGING, true);

        assert!(!before.evaluate(REQUIRES_CHARGING));
        assert!(evaluator.snapshot().evaluate(REQUIRES_CHARGING));
    }
}
