// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::chain::UnitSpec;
use crate::data::Data;
use crate::engine::EngineOptions;
use crate::types::{ExistingWorkPolicy, PersistenceMode};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [engine]
/// workers = 2
/// cancel_grace = "3s"
/// persistence = "file"
/// state_dir = ".workchain"
///
/// [signals]
/// charging = false
///
/// [bodies]
/// output_dir = "blur_filter_outputs"
/// delay = "1s"
///
/// [chain.img]
/// policy = "replace"
///
/// [[chain.img.unit]]
/// kind = "cleanup"
///
/// [[chain.img.unit]]
/// kind = "blur"
/// repeat = 2
/// input = { image_uri = "cupcake.png" }
///
/// [[chain.img.unit]]
/// kind = "save"
/// constraints = ["requires_charging"]
/// tags = ["OUTPUT"]
/// ```
///
/// All sections except `[chain.<name>]` are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    /// Initial signal values reported before any chain is submitted.
    #[serde(default)]
    pub signals: BTreeMap<String, bool>,

    #[serde(default)]
    pub bodies: BodiesSection,

    /// All chains from `[chain.<name>]`, keyed by unique chain name.
    #[serde(default)]
    pub chain: BTreeMap<String, ChainConfig>,
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Duration string such as `"3s"` or `"500ms"`.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace: String,

    #[serde(default)]
    pub persistence: PersistenceMode,

    /// Root for `persistence = "file"`; chains land in `<state_dir>/chains`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_workers() -> usize {
    crate::engine::DEFAULT_WORKERS
}

fn default_cancel_grace() -> String {
    "3s".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".workchain")
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            cancel_grace: default_cancel_grace(),
            persistence: PersistenceMode::default(),
            state_dir: default_state_dir(),
        }
    }
}

/// `[bodies]` section: where the demo image bodies read and write.
#[derive(Debug, Clone, Deserialize)]
pub struct BodiesSection {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_saved_dir")]
    pub saved_dir: PathBuf,

    /// Artificial delay at the start of every body.
    #[serde(default = "default_delay")]
    pub delay: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("blur_filter_outputs")
}

fn default_saved_dir() -> PathBuf {
    PathBuf::from("saved_images")
}

fn default_delay() -> String {
    "3s".to_string()
}

impl Default for BodiesSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            saved_dir: default_saved_dir(),
            delay: default_delay(),
        }
    }
}

/// `[chain.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub policy: ExistingWorkPolicy,

    /// `[[chain.<name>.unit]]` entries, in execution order.
    #[serde(default, rename = "unit")]
    pub units: Vec<UnitConfig>,
}

/// One `[[chain.<name>.unit]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitConfig {
    pub kind: String,

    /// Number of consecutive copies of this unit. Only the first copy keeps
    /// `input`; later copies take their predecessor's output.
    #[serde(default = "default_repeat")]
    pub repeat: usize,

    #[serde(default)]
    pub constraints: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub input: Data,
}

fn default_repeat() -> usize {
    1
}

impl ChainConfig {
    /// Expand `repeat` into an ordered list of unit specs.
    pub fn unit_specs(&self) -> Vec<UnitSpec> {
        let mut specs = Vec::new();
        for unit in self.units.iter() {
            for copy in 0..unit.repeat {
                let mut spec = UnitSpec::new(unit.kind.clone());
                for c in unit.constraints.iter() {
                    spec = spec.constraint(c.clone());
                }
                for t in unit.tags.iter() {
                    spec = spec.tag(t.clone());
                }
                if copy == 0 && !unit.input.is_empty() {
                    spec = spec.input(unit.input.clone());
                }
                specs.push(spec);
            }
        }
        specs
    }
}

/// Validated `[engine]` settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub options: EngineOptions,
    pub persistence: PersistenceMode,
    pub state_dir: PathBuf,
}

/// Validated `[bodies]` settings.
#[derive(Debug, Clone)]
pub struct BodiesConfig {
    pub output_dir: PathBuf,
    pub saved_dir: PathBuf,
    pub delay: Duration,
}

/// Validated configuration. Only constructed through
/// `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineConfig,
    pub signals: BTreeMap<String, bool>,
    pub bodies: BodiesConfig,
    pub chain: BTreeMap<String, ChainConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        engine: EngineConfig,
        signals: BTreeMap<String, bool>,
        bodies: BodiesConfig,
        chain: BTreeMap<String, ChainConfig>,
    ) -> Self {
        Self {
            engine,
            signals,
            bodies,
            chain,
        }
    }
}
