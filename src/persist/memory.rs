// src/persist/memory.rs

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use tracing::trace;

use super::ChainStore;
use crate::chain::{ChainId, WorkChain};

/// Keeps chains in memory only; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    chains: Mutex<BTreeMap<ChainId, WorkChain>>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chains.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: ChainId) -> Option<WorkChain> {
        self.chains
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }
}

impl ChainStore for MemoryChainStore {
    fn load_all(&self) -> Result<Vec<WorkChain>> {
        let chains = self.chains.lock().unwrap_or_else(|e| e.into_inner());
        Ok(chains.values().cloned().collect())
    }

    fn save(&self, chain: &WorkChain) -> Result<()> {
        trace!(chain = %chain.name, id = %chain.id, "stored chain (memory)");
        self.chains
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chain.id, chain.clone());
        Ok(())
    }

    fn remove(&self, id: ChainId) -> Result<()> {
        self.chains
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        Ok(())
    }
}
