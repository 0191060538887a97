mod env;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

pub use crate::kinematics::{HistoryConfig, ReappearPolicy, ReferencePoint};
pub use crate::sink::OutputConfig;

/// Complete collector configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub collector: LoopConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Collection loop parameters
#[derive(Debug, Clone, Deserialize)]
pub struct LoopConfig {
    /// Distance measurement origin
    #[serde(default)]
    pub reference_point: ReferencePoint,

    /// Attribute queried per entity for the visibility column.
    /// `None` records every row as unavailable.
    #[serde(default = "default_attribute_key")]
    pub attribute_key: Option<String>,

    /// Overrides the step length reported by the simulation (seconds)
    #[serde(default)]
    pub step_length_seconds: Option<f64>,
}

fn default_attribute_key() -> Option<String> {
    Some("junctionModel.visibility".to_string())
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            reference_point: ReferencePoint::default(),
            attribute_key: default_attribute_key(),
            step_length_seconds: None,
        }
    }
}

/// Scripted simulation source
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulationConfig {
    /// Scenario file (.json or .json.gz)
    pub scenario: Option<PathBuf>,
}

impl CollectorConfig {
    /// Reject values the collector cannot run with
    pub fn validate(&self) -> Result<()> {
        if let Some(len) = self.collector.step_length_seconds {
            if !(len.is_finite() && len > 0.0) {
                bail!("collector.step_length_seconds must be positive, got {}", len);
            }
        }
        if self.history.max_entries == 0 {
            bail!("history.max_entries must be at least 1");
        }
        if self.output.file_prefix.is_empty() {
            bail!("output.file_prefix must not be empty");
        }
        Ok(())
    }

    /// Apply `TELEMETRY_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        env::apply(self, |key| std::env::var(key).ok())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<CollectorConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: CollectorConfig =
        toml::from_str(&contents).context("Failed to parse config TOML")?;
    Ok(config)
}
