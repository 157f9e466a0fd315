// src/engine/queue.rs

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::chain::{ChainId, WorkChain};
use crate::engine::RequestId;

/// A submission that could not be resolved yet.
#[derive(Debug, Clone)]
pub struct QueuedSubmission {
    pub request: RequestId,
    pub chain: WorkChain,
}

#[derive(Debug, Default)]
struct NameQueue {
    /// Replaced chains that have not acknowledged cancellation yet.
    blockers: BTreeSet<ChainId>,
    /// Front entry is the submission that caused the block.
    queued: VecDeque<QueuedSubmission>,
}

/// Submissions waiting for a `Replace` to complete, per chain name.
///
/// Semantics:
/// - A `Replace` against in-flight chains parks the submission here together
///   with the set of chains it cancelled (`block`).
/// - Any later submission for the same name queues behind it (`push`) so
///   submissions for one name are always resolved in arrival order.
/// - Once every blocker is terminal the runtime takes the queue (`release`)
///   and resolves the entries again, in order.
#[derive(Debug, Default)]
pub struct PendingSubmissions {
    names: BTreeMap<String, NameQueue>,
}

impl PendingSubmissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// `true` if submissions for `name` must queue.
    pub fn is_blocked(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn len(&self, name: &str) -> usize {
        self.names.get(name).map_or(0, |q| q.queued.len())
    }

    /// Park `submission` until every chain in `blockers` is terminal.
    ///
    /// It goes in front of anything already queued for the name.
    pub fn block(
        &mut self,
        name: &str,
        blockers: impl IntoIterator<Item = ChainId>,
        submission: QueuedSubmission,
    ) {
        let queue = self.names.entry(name.to_string()).or_default();
        queue.blockers.extend(blockers);
        debug!(
            name,
            request = submission.request.0,
            blockers = ?queue.blockers,
            "submission waiting for replaced chains"
        );
        queue.queued.push_front(submission);
    }

    /// Queue `submission` behind a blocked name.
    pub fn push(&mut self, name: &str, submission: QueuedSubmission) {
        let queue = self.names.entry(name.to_string()).or_default();
        debug!(
            name,
            request = submission.request.0,
            position = queue.queued.len(),
            "queued submission behind pending replacement"
        );
        queue.queued.push_back(submission);
    }

    /// Names whose blockers are all terminal, according to `is_terminal`.
    pub fn ready_names(&self, is_terminal: impl Fn(ChainId) -> bool) -> Vec<String> {
        self.names
            .iter()
            .filter(|(_, q)| q.blockers.iter().all(|id| is_terminal(*id)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Unblock `name` and hand back its queued submissions in order.
    pub fn release(&mut self, name: &str) -> VecDeque<QueuedSubmission> {
        self.names
            .remove(name)
            .map(|q| q.queued)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExistingWorkPolicy;

    fn sub(request: u64) -> QueuedSubmission {
        QueuedSubmission {
            request: RequestId(request),
            chain: WorkChain::new("img", ExistingWorkPolicy::Replace, Vec::new()),
        }
    }

    #[test]
    fn blocked_submission_is_released_first() {
        let mut pending = PendingSubmissions::new();
        pending.push("img", sub(2));
        pending.block("img", [ChainId(1)], sub(1));

        assert!(pending.is_blocked("img"));
        assert!(pending.ready_names(|_| false).is_empty());

        let ready = pending.ready_names(|_| true);
        assert_eq!(ready, vec!["img".to_string()]);

        let released: Vec<u64> = pending.release("img").into_iter().map(|s| s.request.0).collect();
        assert_eq!(released, vec![1, 2]);
        assert!(pending.is_empty());
    }

    #[test]
    fn names_are_independent() {
        let mut pending = PendingSubmissions::new();
        pending.block("a", [ChainId(1)], sub(1));
        pending.block("b", [ChainId(2)], sub(2));

        let ready = pending.ready_names(|id| id == ChainId(2));
        assert_eq!(ready, vec!["b".to_string()]);
        assert_eq!(pending.len("a"), 1);
    }
}
