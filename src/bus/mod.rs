// src/bus/mod.rs

//! Fan-out of unit and chain state transitions to observers.
//!
//! The bus keeps the latest [`WorkInfo`] for every known entity so late
//! subscribers first receive a synthetic snapshot and then every later
//! transition, in publication order, without gaps.

pub mod event;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::chain::ChainId;

pub use event::{EntityId, EntityKind, StatusEvent, WorkInfo};

/// Which entities a subscription or query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFilter {
    Tag(String),
    Name(String),
}

impl StatusFilter {
    pub fn matches_event(&self, event: &StatusEvent) -> bool {
        match self {
            StatusFilter::Tag(tag) => event.tags.contains(tag),
            StatusFilter::Name(name) => &event.chain_name == name,
        }
    }

    pub fn matches_info(&self, info: &WorkInfo) -> bool {
        match self {
            StatusFilter::Tag(tag) => info.tags.contains(tag),
            StatusFilter::Name(name) => &info.chain_name == name,
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusFilter::Tag(tag) => write!(f, "tag={tag}"),
            StatusFilter::Name(name) => write!(f, "name={name}"),
        }
    }
}

/// Receiving side of a bus subscription.
///
/// Dropping it unsubscribes; the bus prunes closed subscribers lazily on the
/// next publish.
#[derive(Debug)]
pub struct Subscription {
    filter: StatusFilter,
    rx: mpsc::UnboundedReceiver<StatusEvent>,
}

impl Subscription {
    pub fn filter(&self) -> &StatusFilter {
        &self.filter
    }

    /// Wait for the next event. `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_next(&mut self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }
}

struct Subscriber {
    filter: StatusFilter,
    tx: mpsc::UnboundedSender<StatusEvent>,
}

#[derive(Default)]
struct BusState {
    latest: BTreeMap<EntityId, WorkInfo>,
    subscribers: Vec<Subscriber>,
}

/// In-process status bus.
#[derive(Default)]
pub struct StatusBus {
    state: Mutex<BusState>,
}

impl fmt::Debug for StatusBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("StatusBus")
            .field("entities", &state.latest.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event` as the latest state of its entity and deliver it to
    /// every matching subscriber.
    pub fn publish(&self, event: StatusEvent) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        trace!(%event, "publishing status event");

        state
            .latest
            .insert(event.entity, WorkInfo::from_event(&event));

        state.subscribers.retain(|sub| {
            if !sub.filter.matches_event(&event) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(event.clone()).is_ok()
        });
    }

    /// Subscribe to every entity matching `filter`.
    ///
    /// The current state of each matching entity is queued first as a
    /// synthetic event; registration happens under the same lock, so no live
    /// transition can slip in between.
    pub fn subscribe(&self, filter: StatusFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let snapshot = ordered_infos(&state.latest, &filter);
        debug!(%filter, snapshot = snapshot.len(), "new status subscription");
        for info in snapshot {
            // Receiver is alive; it is still in this scope.
            let _ = tx.send(info.to_synthetic_event());
        }

        state.subscribers.push(Subscriber {
            filter: filter.clone(),
            tx,
        });

        Subscription { filter, rx }
    }

    pub fn subscribe_by_tag(&self, tag: impl Into<String>) -> Subscription {
        self.subscribe(StatusFilter::Tag(tag.into()))
    }

    pub fn subscribe_by_name(&self, name: impl Into<String>) -> Subscription {
        self.subscribe(StatusFilter::Name(name.into()))
    }

    /// Latest state of every entity matching `filter`.
    pub fn infos(&self, filter: &StatusFilter) -> Vec<WorkInfo> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        ordered_infos(&state.latest, filter)
    }

    /// Drop snapshot entries of a purged chain.
    pub fn forget(&self, chain: ChainId) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.latest.retain(|_, info| info.chain_id != chain);
        debug!(chain = %chain, "forgot chain snapshot");
    }

    pub fn subscriber_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.subscribers.iter().filter(|s| !s.tx.is_closed()).count()
    }
}

/// Matching infos ordered by chain, units before their chain entry.
fn ordered_infos(latest: &BTreeMap<EntityId, WorkInfo>, filter: &StatusFilter) -> Vec<WorkInfo> {
    let mut infos: Vec<WorkInfo> = latest
        .values()
        .filter(|info| filter.matches_info(info))
        .cloned()
        .collect();
    infos.sort_by_key(|info| {
        let chain_last = matches!(info.entity, EntityId::Chain(_));
        (info.chain_id, chain_last, info.entity)
    });
    infos
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::chain::{UnitId, WorkState};

    fn unit_event(unit: u64, chain: u64, name: &str, tag: &str, old: Option<WorkState>, new: WorkState) -> StatusEvent {
        StatusEvent {
            entity: EntityId::Unit(UnitId(unit)),
            chain_id: ChainId(chain),
            chain_name: name.to_string(),
            kind: Some("blur".to_string()),
            tags: BTreeSet::from([tag.to_string()]),
            old_state: old,
            new_state: new,
            output: None,
            synthetic: false,
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_snapshot_then_live_events() {
        let bus = StatusBus::new();
        bus.publish(unit_event(1, 1, "img", "OUTPUT", None, WorkState::Enqueued));
        bus.publish(unit_event(
            1,
            1,
            "img",
            "OUTPUT",
            Some(WorkState::Enqueued),
            WorkState::Running,
        ));

        let mut sub = bus.subscribe_by_tag("OUTPUT");
        let first = sub.next().await.unwrap();
        assert!(first.synthetic);
        assert_eq!(first.new_state, WorkState::Running);
        assert_eq!(first.old_state, None);

        bus.publish(unit_event(
            1,
            1,
            "img",
            "OUTPUT",
            Some(WorkState::Running),
            WorkState::Succeeded,
        ));
        let live = sub.next().await.unwrap();
        assert!(!live.synthetic);
        assert_eq!(live.old_state, Some(WorkState::Running));
        assert_eq!(live.new_state, WorkState::Succeeded);
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn filters_by_name_and_tag() {
        let bus = StatusBus::new();
        bus.publish(unit_event(1, 1, "a", "x", None, WorkState::Enqueued));
        bus.publish(unit_event(2, 2, "b", "y", None, WorkState::Enqueued));

        let by_name = bus.infos(&StatusFilter::Name("b".into()));
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].entity, EntityId::Unit(UnitId(2)));

        let by_tag = bus.infos(&StatusFilter::Tag("x".into()));
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].chain_name, "a");
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = StatusBus::new();
        let sub = bus.subscribe_by_name("a");
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        bus.publish(unit_event(1, 1, "a", "x", None, WorkState::Enqueued));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn forget_removes_chain_entries() {
        let bus = StatusBus::new();
        bus.publish(unit_event(1, 1, "a", "x", None, WorkState::Succeeded));
        bus.publish(unit_event(2, 2, "a", "x", None, WorkState::Enqueued));
        bus.forget(ChainId(1));

        let infos = bus.infos(&StatusFilter::Name("a".into()));
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].chain_id, ChainId(2));
    }
}
