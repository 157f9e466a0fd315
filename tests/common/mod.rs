#![allow(dead_code)]

use std::time::Duration;

use workchain::bus::{EntityId, StatusEvent, Subscription};
use workchain::chain::{ChainId, WorkState};

pub use workchain_test_utils::{init_tracing, with_timeout};

/// Read events until one matches `pred`; returns everything read, the
/// matching event last.
pub async fn wait_for<F>(sub: &mut Subscription, pred: F) -> Vec<StatusEvent>
where
    F: Fn(&StatusEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = with_timeout(sub.next())
            .await
            .expect("status bus closed before the expected event");
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Read events until chain `id` publishes a terminal state.
pub async fn until_chain_terminal(sub: &mut Subscription, id: ChainId) -> Vec<StatusEvent> {
    wait_for(sub, |e| e.entity == EntityId::Chain(id) && e.is_terminal()).await
}

/// Final state published for chain `id` in `events`.
pub fn chain_state(events: &[StatusEvent], id: ChainId) -> Option<WorkState> {
    events
        .iter()
        .rev()
        .find(|e| e.entity == EntityId::Chain(id))
        .map(|e| e.new_state)
}

/// States a unit of `kind` in chain `id` went through, in order.
pub fn unit_states(events: &[StatusEvent], id: ChainId, kind: &str) -> Vec<WorkState> {
    events
        .iter()
        .filter(|e| e.chain_id == id && e.kind.as_deref() == Some(kind))
        .map(|e| e.new_state)
        .collect()
}

/// Let in-flight messages settle before a negative assertion.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
