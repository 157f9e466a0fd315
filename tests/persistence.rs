mod common;
use crate::common::{chain_state, init_tracing, until_chain_terminal};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use workchain::chain::WorkState;
use workchain::data::Data;
use workchain::engine::{Engine, SubmitOutcome, UnitOutcome};
use workchain::persist::{ChainStore, FileChainStore};
use workchain::types::ExistingWorkPolicy;
use workchain_test_utils::bodies::trail_registry;
use workchain_test_utils::builders::specs;
use workchain_test_utils::fake_executor::{FakeExecutor, FakeLog, FakeMode};
use workchain_test_utils::with_timeout;

type TestResult = Result<(), Box<dyn Error>>;

async fn engine_over(store: Arc<FileChainStore>, log: &FakeLog) -> Result<Engine, Box<dyn Error>> {
    let log = log.clone();
    Ok(Engine::builder()
        .bodies(trail_registry())
        .store(store)
        .start_with(move |setup| FakeExecutor::new(setup.runtime_tx, log, FakeMode::Hold))
        .await?)
}

async fn wait_dispatched(log: &FakeLog, n: usize) {
    with_timeout(async {
        while log.dispatched().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn interrupted_chain_resumes_after_restart() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let store = Arc::new(FileChainStore::new(dir.path()));

    // First process: `a` finishes, `b` is running when we stop.
    let first_log = FakeLog::default();
    let first = engine_over(Arc::clone(&store), &first_log).await?;
    let id = first
        .apply_chain("img", ExistingWorkPolicy::Keep, specs(&["a", "b"]))
        .await?
        .chain_id()
        .expect("accepted");

    wait_dispatched(&first_log, 1).await;
    let a = first_log.dispatched()[0].unit;
    first_log.complete(a, UnitOutcome::Succeeded(Data::new().with("frame", 7i64)));
    wait_dispatched(&first_log, 2).await;
    first.shutdown().await?;
    drop(first);

    let stored = store.load_all()?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].units[1].state, WorkState::Running);

    // Second process picks `b` up again with the same input.
    let log = FakeLog::default();
    let engine = engine_over(Arc::clone(&store), &log).await?;
    let mut sub = engine.observe_by_name("img");

    wait_dispatched(&log, 1).await;
    let b = &log.dispatched()[0];
    assert_eq!(b.kind, "b");
    assert_eq!(b.chain, id);
    assert_eq!(b.input.get_int("frame"), Some(7));

    // The name is still taken.
    let rejected = engine
        .apply_chain("img", ExistingWorkPolicy::Keep, specs(&["a"]))
        .await?;
    assert!(matches!(rejected, SubmitOutcome::Rejected(_)));

    log.complete(b.unit, UnitOutcome::Succeeded(Data::new()));
    let events = until_chain_terminal(&mut sub, id).await;
    assert_eq!(chain_state(&events, id), Some(WorkState::Succeeded));

    // New ids continue past the restored ones.
    let next = engine
        .apply_chain("other", ExistingWorkPolicy::Keep, specs(&["c"]))
        .await?
        .chain_id()
        .expect("accepted");
    assert!(next > id);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn replaced_chain_is_removed_from_store() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let store = Arc::new(FileChainStore::new(dir.path()));
    let log = FakeLog::default();
    let engine = engine_over(Arc::clone(&store), &log).await?;
    let mut sub = engine.observe_by_name("img");

    let old = engine
        .apply_chain("img", ExistingWorkPolicy::Replace, specs(&["a"]))
        .await?
        .chain_id()
        .expect("accepted");
    wait_dispatched(&log, 1).await;
    log.complete(log.dispatched()[0].unit, UnitOutcome::Succeeded(Data::new()));
    until_chain_terminal(&mut sub, old).await;

    let new = engine
        .apply_chain("img", ExistingWorkPolicy::Replace, specs(&["b"]))
        .await?
        .chain_id()
        .expect("accepted");

    let ids: Vec<_> = store.load_all()?.into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![new]);

    engine.shutdown().await?;
    Ok(())
}
