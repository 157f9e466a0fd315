// src/lib.rs

pub mod bodies;
pub mod bus;
pub mod chain;
pub mod cli;
pub mod config;
pub mod constraints;
pub mod data;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod notify;
pub mod persist;
pub mod types;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bodies::ImageBodies;
use crate::bus::{EntityId, StatusEvent};
use crate::chain::ChainId;
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::constraints::{ConstraintEvaluator, SIGNAL_CHARGING};
use crate::engine::{EngineBuilder, SubmitOutcome};
use crate::exec::BodyRegistry;
use crate::fs::{FileSystem, RealFileSystem};
use crate::persist::{ChainStore, FileChainStore, MemoryChainStore};
use crate::types::PersistenceMode;

pub use crate::bus::{StatusBus, Subscription, WorkInfo};
pub use crate::chain::{ChainBuilder, UnitSpec, WorkChain, WorkState};
pub use crate::data::{Data, DataValue};
pub use crate::engine::{Engine, EngineOptions};
pub use crate::exec::{BodyOutcome, UnitBody, UnitContext};
pub use crate::types::ExistingWorkPolicy;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - constraint signals (initial values, `--charging`, `--charge-after`)
/// - the demo bodies and the engine
/// - printing status events until every submitted chain is terminal
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let selected = select_chains(&cfg, &args.chains)?;

    if args.dry_run {
        print_dry_run(&cfg, &selected);
        return Ok(());
    }

    let constraints = Arc::new(ConstraintEvaluator::with_builtin_predicates());
    for (signal, value) in cfg.signals.iter() {
        constraints.report(signal, *value);
    }
    if args.charging {
        constraints.report(SIGNAL_CHARGING, true);
    }

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let mut bodies = BodyRegistry::new();
    ImageBodies::new(fs, &cfg.bodies.output_dir, &cfg.bodies.saved_dir)
        .with_delay(cfg.bodies.delay)
        .register(&mut bodies);

    let store: Arc<dyn ChainStore> = match cfg.engine.persistence {
        PersistenceMode::Memory => Arc::new(MemoryChainStore::new()),
        PersistenceMode::File => Arc::new(FileChainStore::new(&cfg.engine.state_dir)),
    };

    let engine = EngineBuilder::new()
        .options(cfg.engine.options)
        .bodies(bodies)
        .constraints(Arc::clone(&constraints))
        .store(store)
        .start()
        .await?;

    // Subscribe before submitting so no transition is missed.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<StatusEvent>();
    for name in selected.iter() {
        let mut sub = engine.observe_by_name(name);
        let tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = sub.next().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
    }
    drop(event_tx);

    let mut waiting: BTreeSet<ChainId> = BTreeSet::new();
    for name in selected.iter() {
        let chain = &cfg.chain[name];
        match engine.apply_chain(name, chain.policy, chain.unit_specs()).await? {
            SubmitOutcome::Accepted(id) => {
                info!(chain = %name, id = %id, "submitted chain");
                waiting.insert(id);
            }
            SubmitOutcome::Rejected(reason) => {
                warn!(chain = %name, %reason, "chain was not submitted");
            }
        }
    }

    if let Some(delay) = args.charge_after {
        let power = engine.power();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!(?delay, "reporting device as charging");
            power.set_charging(true);
        });
    }

    let mut interrupted = false;
    while !waiting.is_empty() {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                println!("{event}");
                if let EntityId::Chain(id) = event.entity {
                    if event.is_terminal() && waiting.remove(&id) {
                        debug!(chain = %event.chain_name, id = %id, state = %event.new_state, "chain finished");
                    }
                }
            }
            res = tokio::signal::ctrl_c(), if !interrupted => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                }
                interrupted = true;
                info!("interrupted; cancelling submitted chains");
                for name in selected.iter() {
                    engine.cancel_chain(name).await?;
                }
            }
        }
    }

    engine.shutdown().await?;
    Ok(())
}

/// Chains named on the command line, or every configured chain.
fn select_chains(cfg: &ConfigFile, requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(cfg.chain.keys().cloned().collect());
    }

    for name in requested {
        if !cfg.chain.contains_key(name) {
            bail!("unknown chain '{name}' (not in config)");
        }
    }
    Ok(requested.to_vec())
}

/// Simple dry-run output: print engine settings and chains.
fn print_dry_run(cfg: &ConfigFile, selected: &[String]) {
    println!("workchain dry-run");
    println!("  engine.workers = {}", cfg.engine.options.workers);
    println!("  engine.cancel_grace = {:?}", cfg.engine.options.cancel_grace);
    println!("  engine.persistence = {:?}", cfg.engine.persistence);
    if !cfg.signals.is_empty() {
        println!("  signals = {:?}", cfg.signals);
    }
    println!();

    println!("chains ({}):", selected.len());
    for name in selected {
        let chain = &cfg.chain[name];
        println!("  - {name} (policy = {})", chain.policy);
        for spec in chain.unit_specs() {
            print!("      {}", spec.kind);
            if !spec.constraints.is_empty() {
                print!(" constraints={:?}", spec.constraints);
            }
            if !spec.tags.is_empty() {
                print!(" tags={:?}", spec.tags);
            }
            if let Some(ref input) = spec.static_input {
                print!(" input={:?}", input.iter().collect::<Vec<_>>());
            }
            println!();
        }
    }

    debug!("dry-run complete (no execution)");
}
