mod common;
use crate::common::{chain_state, init_tracing, unit_states, until_chain_terminal};

use std::error::Error;
use std::sync::Arc;

use workchain::bus::EntityId;
use workchain::chain::{UnitSpec, WorkState};
use workchain::data::Data;
use workchain::engine::Engine;
use workchain::notify::RecordingNotifier;
use workchain::types::ExistingWorkPolicy;
use workchain_test_utils::bodies::trail_registry;
use workchain_test_utils::builders::specs;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn outputs_flow_from_unit_to_unit() -> TestResult {
    init_tracing();

    let engine = Engine::builder().bodies(trail_registry()).start().await?;
    let mut sub = engine.observe_by_name("trail");

    let chain = vec![
        UnitSpec::new("a").input(Data::new().with("trail", "start")),
        UnitSpec::new("b"),
        UnitSpec::new("c"),
    ];
    let id = engine
        .apply_chain("trail", ExistingWorkPolicy::Replace, chain)
        .await?
        .chain_id()
        .expect("accepted");

    let events = until_chain_terminal(&mut sub, id).await;
    assert_eq!(chain_state(&events, id), Some(WorkState::Succeeded));

    let output = events.last().and_then(|e| e.output.clone()).expect("chain output");
    assert_eq!(output.get_str("trail"), Some("start,a,b,c"));

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn failure_short_circuits_the_chain() -> TestResult {
    init_tracing();

    let engine = Engine::builder().bodies(trail_registry()).start().await?;
    let mut sub = engine.observe_by_name("broken");

    let id = engine
        .apply_chain("broken", ExistingWorkPolicy::Replace, specs(&["a", "boom", "b", "c"]))
        .await?
        .chain_id()
        .expect("accepted");

    let events = until_chain_terminal(&mut sub, id).await;
    assert_eq!(chain_state(&events, id), Some(WorkState::Failed));

    assert_eq!(unit_states(&events, id, "a").last(), Some(&WorkState::Succeeded));
    assert_eq!(unit_states(&events, id, "boom").last(), Some(&WorkState::Failed));
    for kind in ["b", "c"] {
        let states = unit_states(&events, id, kind);
        assert!(!states.contains(&WorkState::Running), "{kind} ran: {states:?}");
        assert_eq!(states.last(), Some(&WorkState::Cancelled));
    }

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn late_subscriber_gets_synthetic_snapshot_first() -> TestResult {
    init_tracing();

    let engine = Engine::builder().bodies(trail_registry()).start().await?;
    let mut early = engine.observe_by_name("snap");

    let id = engine
        .apply_chain("snap", ExistingWorkPolicy::Replace, specs(&["a", "b"]))
        .await?
        .chain_id()
        .expect("accepted");
    until_chain_terminal(&mut early, id).await;

    let mut late = engine.observe_by_name("snap");
    let mut snapshot = Vec::new();
    while let Some(event) = late.try_next() {
        snapshot.push(event);
    }

    assert_eq!(snapshot.len(), 3);
    assert!(snapshot.iter().all(|e| e.synthetic && e.new_state == WorkState::Succeeded));
    // Units come before their chain.
    assert_eq!(snapshot.last().map(|e| e.entity), Some(EntityId::Chain(id)));
    assert!(snapshot[..2].iter().all(|e| e.kind.is_some()));

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn tag_subscription_sees_tagged_units_and_their_chain() -> TestResult {
    init_tracing();

    let engine = Engine::builder().bodies(trail_registry()).start().await?;
    let mut tagged = engine.observe_by_tag("OUTPUT");
    let mut by_name = engine.observe_by_name("tags");

    let chain = vec![UnitSpec::new("a"), UnitSpec::new("b").tag("OUTPUT")];
    let id = engine
        .apply_chain("tags", ExistingWorkPolicy::Replace, chain)
        .await?
        .chain_id()
        .expect("accepted");
    until_chain_terminal(&mut by_name, id).await;

    let events = until_chain_terminal(&mut tagged, id).await;
    assert!(events.iter().all(|e| e.kind.as_deref() != Some("a")));
    assert_eq!(unit_states(&events, id, "b").last(), Some(&WorkState::Succeeded));

    let infos = engine.work_infos_by_tag("OUTPUT");
    assert_eq!(infos.len(), 2);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn notifications_for_unit_start_and_chain_end() -> TestResult {
    init_tracing();

    let notifier = Arc::new(RecordingNotifier::new());
    let engine = Engine::builder()
        .bodies(trail_registry())
        .notifier(notifier.clone())
        .start()
        .await?;
    let mut sub = engine.observe_by_name("note");

    let id = engine
        .apply_chain("note", ExistingWorkPolicy::Replace, specs(&["a"]))
        .await?
        .chain_id()
        .expect("accepted");
    until_chain_terminal(&mut sub, id).await;

    let messages = notifier.messages();
    assert!(messages.iter().any(|m| m == "Starting a (note)"), "{messages:?}");
    assert!(messages.iter().any(|m| m == "Chain 'note' SUCCEEDED"), "{messages:?}");

    engine.shutdown().await?;
    Ok(())
}
