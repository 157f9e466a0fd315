// src/config/validate.rs

use crate::config::duration::parse_duration;
use crate::config::model::{BodiesConfig, ConfigFile, EngineConfig, RawConfigFile};
use crate::engine::EngineOptions;
use crate::errors::{Result, WorkchainError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = WorkchainError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let engine = EngineConfig {
            options: EngineOptions {
                workers: raw.engine.workers,
                cancel_grace: duration_field("[engine].cancel_grace", &raw.engine.cancel_grace)?,
            },
            persistence: raw.engine.persistence,
            state_dir: raw.engine.state_dir,
        };
        let bodies = BodiesConfig {
            output_dir: raw.bodies.output_dir,
            saved_dir: raw.bodies.saved_dir,
            delay: duration_field("[bodies].delay", &raw.bodies.delay)?,
        };

        Ok(ConfigFile::new_unchecked(engine, raw.signals, bodies, raw.chain))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_chains(cfg)?;
    validate_engine(cfg)?;
    validate_units(cfg)?;
    Ok(())
}

fn ensure_has_chains(cfg: &RawConfigFile) -> Result<()> {
    if cfg.chain.is_empty() {
        return Err(WorkchainError::ConfigError(
            "config must contain at least one [chain.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.workers == 0 {
        return Err(WorkchainError::ConfigError(
            "[engine].workers must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_units(cfg: &RawConfigFile) -> Result<()> {
    for (name, chain) in cfg.chain.iter() {
        if name.trim().is_empty() {
            return Err(WorkchainError::ConfigError(
                "chain names must not be empty".to_string(),
            ));
        }
        if chain.units.is_empty() {
            return Err(WorkchainError::ConfigError(format!(
                "chain '{}' must contain at least one [[chain.{}.unit]]",
                name, name
            )));
        }
        for (idx, unit) in chain.units.iter().enumerate() {
            if unit.kind.trim().is_empty() {
                return Err(WorkchainError::ConfigError(format!(
                    "chain '{}' unit #{} has an empty kind",
                    name, idx
                )));
            }
            if unit.repeat == 0 {
                return Err(WorkchainError::ConfigError(format!(
                    "chain '{}' unit #{} ('{}') must have repeat >= 1",
                    name, idx, unit.kind
                )));
            }
        }
    }
    Ok(())
}

fn duration_field(field: &str, value: &str) -> Result<std::time::Duration> {
    parse_duration(value)
        .map_err(|e| WorkchainError::ConfigError(format!("{field}: {e}")))
}
