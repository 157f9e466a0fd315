mod common;
use crate::common::{
    chain_state, init_tracing, settle, unit_states, until_chain_terminal, wait_for,
};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use workchain::bodies::{blur_chain_specs, ImageBodies, KIND_BLUR, KIND_SAVE, SAVED_PREFIX};
use workchain::bus::EntityId;
use workchain::chain::WorkState;
use workchain::data::KEY_IMAGE_URI;
use workchain::engine::Engine;
use workchain::exec::BodyRegistry;
use workchain::fs::mock::MockFileSystem;
use workchain::types::ExistingWorkPolicy;

type TestResult = Result<(), Box<dyn Error>>;

const NAME: &str = "img";
const IMAGE: &str = "cupcake.png";

fn image_bodies(fs: &MockFileSystem, delay: Duration) -> BodyRegistry {
    let mut reg = BodyRegistry::new();
    ImageBodies::new(Arc::new(fs.clone()), "out", "saved")
        .with_delay(delay)
        .register(&mut reg);
    reg
}

fn mock_fs() -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_file(IMAGE, vec![0u8, 90, 180, 255, 30, 60]);
    fs
}

async fn engine(fs: &MockFileSystem, delay: Duration) -> Result<Engine, Box<dyn Error>> {
    Ok(Engine::builder()
        .workers(2)
        .bodies(image_bodies(fs, delay))
        .start()
        .await?)
}

#[tokio::test]
async fn save_waits_blocked_until_charging() -> TestResult {
    init_tracing();

    let fs = mock_fs();
    let engine = engine(&fs, Duration::ZERO).await?;
    let mut sub = engine.observe_by_name(NAME);

    let id = engine
        .apply_chain(NAME, ExistingWorkPolicy::Replace, blur_chain_specs(IMAGE, 2))
        .await?
        .chain_id()
        .expect("chain accepted");

    wait_for(&mut sub, |e| {
        e.kind.as_deref() == Some(KIND_SAVE) && e.new_state == WorkState::Blocked
    })
    .await;

    let infos = engine.work_infos_by_name(NAME);
    let chain = infos
        .iter()
        .find(|i| i.entity == EntityId::Chain(id))
        .expect("chain info");
    assert_eq!(chain.state, WorkState::Running);

    let mut unit_infos: Vec<_> = infos.iter().filter(|i| i.kind.is_some()).collect();
    unit_infos.sort_by_key(|i| i.entity);
    let states: Vec<WorkState> = unit_infos.iter().map(|i| i.state).collect();
    assert_eq!(
        states,
        vec![
            WorkState::Succeeded,
            WorkState::Succeeded,
            WorkState::Succeeded,
            WorkState::Blocked
        ]
    );

    // Still blocked a while later.
    settle().await;
    assert!(sub.try_next().is_none());

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn charging_releases_save_and_chain_succeeds() -> TestResult {
    init_tracing();

    let fs = mock_fs();
    let engine = engine(&fs, Duration::ZERO).await?;
    let mut sub = engine.observe_by_name(NAME);

    let id = engine
        .apply_chain(NAME, ExistingWorkPolicy::Replace, blur_chain_specs(IMAGE, 2))
        .await?
        .chain_id()
        .expect("chain accepted");

    let mut events = wait_for(&mut sub, |e| {
        e.kind.as_deref() == Some(KIND_SAVE) && e.new_state == WorkState::Blocked
    })
    .await;

    assert!(engine.power().set_charging(true));
    events.extend(until_chain_terminal(&mut sub, id).await);

    assert_eq!(chain_state(&events, id), Some(WorkState::Succeeded));
    assert_eq!(
        unit_states(&events, id, KIND_SAVE),
        vec![
            WorkState::Enqueued,
            WorkState::Blocked,
            WorkState::Running,
            WorkState::Succeeded
        ]
    );

    let last = events.last().expect("terminal event");
    let saved = last
        .output
        .as_ref()
        .and_then(|o| o.get_str(KEY_IMAGE_URI))
        .expect("chain output carries the saved image");
    assert!(saved.contains(SAVED_PREFIX), "unexpected saved path {saved}");
    assert!(fs.contents(saved).is_some());

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn replace_mid_blur_cancels_old_chain_and_restarts_at_cleanup() -> TestResult {
    init_tracing();

    let fs = mock_fs();
    let engine = engine(&fs, Duration::from_millis(100)).await?;
    engine.power().set_charging(true);
    let mut sub = engine.observe_by_name(NAME);

    let old = engine
        .apply_chain(NAME, ExistingWorkPolicy::Replace, blur_chain_specs(IMAGE, 2))
        .await?
        .chain_id()
        .expect("chain accepted");

    let mut events = wait_for(&mut sub, |e| {
        e.chain_id == old && e.kind.as_deref() == Some(KIND_BLUR) && e.new_state == WorkState::Running
    })
    .await;

    let new = engine
        .apply_chain(NAME, ExistingWorkPolicy::Replace, blur_chain_specs(IMAGE, 2))
        .await?
        .chain_id()
        .expect("replacement accepted");
    assert_ne!(old, new);

    events.extend(until_chain_terminal(&mut sub, new).await);

    assert_eq!(chain_state(&events, old), Some(WorkState::Cancelled));
    assert_eq!(chain_state(&events, new), Some(WorkState::Succeeded));

    let old_cancelled = events
        .iter()
        .position(|e| e.entity == EntityId::Chain(old) && e.new_state == WorkState::Cancelled)
        .expect("old chain cancelled");
    let first_new_running = events
        .iter()
        .position(|e| e.chain_id == new && e.kind.is_some() && e.new_state == WorkState::Running)
        .expect("new chain ran");
    assert!(
        old_cancelled < first_new_running,
        "new chain started (event {first_new_running}) before the old one was cancelled (event {old_cancelled})"
    );
    assert_eq!(events[first_new_running].kind.as_deref(), Some("cleanup"));

    // The old save never ran.
    assert!(!unit_states(&events, old, KIND_SAVE).contains(&WorkState::Running));

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn cancel_without_registered_chain_is_a_silent_noop() -> TestResult {
    init_tracing();

    let fs = mock_fs();
    let engine = engine(&fs, Duration::ZERO).await?;
    let mut sub = engine.observe_by_name(NAME);

    assert!(!engine.cancel_chain(NAME).await?);

    settle().await;
    assert!(sub.try_next().is_none());
    assert!(engine.work_infos_by_name(NAME).is_empty());

    engine.shutdown().await?;
    Ok(())
}
