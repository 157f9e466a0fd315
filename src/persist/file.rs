// src/persist/file.rs

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::ChainStore;
use crate::chain::{ChainId, WorkChain};

/// Directory (under the state dir) holding one JSON document per chain.
///
/// The effective path of a chain on disk is `<state_dir>/chains/<id>.json`.
pub const CHAINS_DIR: &str = "chains";

/// Stores each chain as `<state_dir>/chains/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileChainStore {
    root: PathBuf,
}

impl FileChainStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: state_dir.into().join(CHAINS_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.root
    }

    fn chain_path(&self, id: ChainId) -> PathBuf {
        self.root.join(format!("{}.json", id.0))
    }
}

impl ChainStore for FileChainStore {
    fn load_all(&self) -> Result<Vec<WorkChain>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut chains = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("reading chain directory {:?}", self.root))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let file = File::open(&path)
                .with_context(|| format!("opening stored chain {:?}", path))?;
            match serde_json::from_reader::<_, WorkChain>(BufReader::new(file)) {
                Ok(chain) => chains.push(chain),
                Err(err) => {
                    warn!(path = ?path, error = %err, "skipping unreadable stored chain");
                }
            }
        }

        debug!(count = chains.len(), dir = ?self.root, "loaded stored chains");
        Ok(chains)
    }

    fn save(&self, chain: &WorkChain) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating chain directory at {:?}", self.root))?;

        let path = self.chain_path(chain.id);
        let tmp = path.with_extension("json.tmp");

        {
            let file = File::create(&tmp)
                .with_context(|| format!("creating chain file at {:?}", tmp))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, chain)?;
            writer.flush()?;
        }

        fs::rename(&tmp, &path)
            .with_context(|| format!("moving chain file into place at {:?}", path))?;
        debug!(chain = %chain.name, id = %chain.id, "stored chain (file)");
        Ok(())
    }

    fn remove(&self, id: ChainId) -> Result<()> {
        match fs::remove_file(self.chain_path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing stored chain {id}")),
        }
    }
}
