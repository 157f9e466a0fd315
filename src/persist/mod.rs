// src/persist/mod.rs

//! Durable chain storage.
//!
//! The runtime saves every chain a step touched and removes purged ones; on
//! start the engine restores whatever the store still holds.

mod file;
mod memory;

use anyhow::Result;

use crate::chain::{ChainId, WorkChain};

pub use file::{FileChainStore, CHAINS_DIR};
pub use memory::MemoryChainStore;

/// Abstract storage for chains.
pub trait ChainStore: Send + Sync {
    /// Every stored chain, in no particular order.
    fn load_all(&self) -> Result<Vec<WorkChain>>;
    /// Insert or overwrite `chain`.
    fn save(&self, chain: &WorkChain) -> Result<()>;
    /// Remove a chain; removing an unknown id is not an error.
    fn remove(&self, id: ChainId) -> Result<()>;
}
