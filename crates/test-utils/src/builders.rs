#![allow(dead_code)]

use std::collections::BTreeMap;

use workchain::chain::UnitSpec;
use workchain::config::{
    BodiesSection, ChainConfig, ConfigFile, EngineSection, RawConfigFile, UnitConfig,
};
use workchain::data::Data;
use workchain::types::ExistingWorkPolicy;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                engine: EngineSection::default(),
                signals: BTreeMap::new(),
                bodies: BodiesSection::default(),
                chain: BTreeMap::new(),
            },
        }
    }

    pub fn with_chain(mut self, name: &str, chain: ChainConfig) -> Self {
        self.config.chain.insert(name.to_string(), chain);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.engine.workers = workers;
        self
    }

    pub fn with_cancel_grace(mut self, grace: &str) -> Self {
        self.config.engine.cancel_grace = grace.to_string();
        self
    }

    pub fn with_signal(mut self, signal: &str, value: bool) -> Self {
        self.config.signals.insert(signal.to_string(), value);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ChainConfig`.
pub struct ChainConfigBuilder {
    chain: ChainConfig,
}

impl ChainConfigBuilder {
    pub fn new(policy: ExistingWorkPolicy) -> Self {
        Self {
            chain: ChainConfig {
                policy,
                units: Vec::new(),
            },
        }
    }

    pub fn unit(mut self, kind: &str) -> Self {
        self.chain.units.push(unit_config(kind));
        self
    }

    pub fn repeated(mut self, kind: &str, repeat: usize) -> Self {
        let mut unit = unit_config(kind);
        unit.repeat = repeat;
        self.chain.units.push(unit);
        self
    }

    pub fn with_input(mut self, kind: &str, input: Data) -> Self {
        let mut unit = unit_config(kind);
        unit.input = input;
        self.chain.units.push(unit);
        self
    }

    pub fn constrained(mut self, kind: &str, predicate: &str) -> Self {
        let mut unit = unit_config(kind);
        unit.constraints.push(predicate.to_string());
        self.chain.units.push(unit);
        self
    }

    pub fn build(self) -> ChainConfig {
        self.chain
    }
}

fn unit_config(kind: &str) -> UnitConfig {
    UnitConfig {
        kind: kind.to_string(),
        repeat: 1,
        constraints: Vec::new(),
        tags: Vec::new(),
        input: Data::new(),
    }
}

/// Plain specs, one per kind, in order.
pub fn specs(kinds: &[&str]) -> Vec<UnitSpec> {
    kinds.iter().map(|k| UnitSpec::new(*k)).collect()
}
