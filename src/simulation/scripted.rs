use crate::error::{EntityQueryFault, SimulationFault};
use crate::simulation::SimulationAdapter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Recorded or hand-written simulation run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    /// Simulated seconds per step
    #[serde(default = "default_step_length")]
    pub step_length_seconds: f64,

    /// One frame per step, in order
    #[serde(default)]
    pub steps: Vec<StepFrame>,

    /// Step whose advance fails as if the engine crashed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_at_step: Option<u64>,
}

fn default_step_length() -> f64 {
    1.0
}

/// Entities present at one step
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StepFrame {
    #[serde(default)]
    pub entities: Vec<EntityFrame>,
}

/// Raw state of one entity at one step
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityFrame {
    pub id: String,
    pub x: f64,
    pub y: f64,
    /// m/s
    pub speed: f64,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,

    /// Listed at this step, but gone by the time it is queried
    #[serde(default)]
    pub vanished: bool,
}

impl Scenario {
    pub fn new(steps: Vec<StepFrame>) -> Self {
        Self {
            step_length_seconds: default_step_length(),
            steps,
            crash_at_step: None,
        }
    }

    pub fn with_crash_at_step(mut self, step: u64) -> Self {
        self.crash_at_step = Some(step);
        self
    }

    /// Load a scenario from `.json` or gzip-compressed `.json.gz`
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open scenario file {}", path.display()))?;

        let is_compressed = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == "gz")
            .unwrap_or(false);

        let mut json = String::new();
        if is_compressed {
            GzDecoder::new(file)
                .read_to_string(&mut json)
                .context("Failed to decompress scenario file")?;
        } else {
            let mut file = file;
            file.read_to_string(&mut json)
                .context("Failed to read scenario file")?;
        }

        let scenario: Scenario =
            serde_json::from_str(&json).context("Failed to deserialize scenario JSON")?;

        info!(
            path = %path.display(),
            steps = scenario.steps.len(),
            step_length_seconds = scenario.step_length_seconds,
            "Loaded scenario"
        );

        Ok(scenario)
    }
}

impl StepFrame {
    pub fn new(entities: Vec<EntityFrame>) -> Self {
        Self { entities }
    }
}

impl EntityFrame {
    pub fn new(id: &str, x: f64, y: f64, speed: f64) -> Self {
        Self {
            id: id.to_string(),
            x,
            y,
            speed,
            attributes: HashMap::new(),
            vanished: false,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn vanished(mut self) -> Self {
        self.vanished = true;
        self
    }
}

/// Simulation adapter that replays a `Scenario` step by step
pub struct ScriptedSimulation {
    scenario: Scenario,
    /// Steps advanced so far; the current frame is `steps[current - 1]`
    current: usize,
    closed: bool,
}

impl ScriptedSimulation {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            current: 0,
            closed: false,
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        Ok(Self::new(Scenario::load_from_file(path)?))
    }

    pub fn steps_advanced(&self) -> usize {
        self.current
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn entity(&self, entity_id: &str) -> Result<&EntityFrame, EntityQueryFault> {
        if self.closed {
            return Err(EntityQueryFault::Disconnected {
                entity_id: entity_id.to_string(),
            });
        }

        self.current
            .checked_sub(1)
            .and_then(|idx| self.scenario.steps.get(idx))
            .and_then(|frame| frame.entities.iter().find(|e| e.id == entity_id))
            .filter(|e| !e.vanished)
            .ok_or_else(|| EntityQueryFault::Vanished {
                entity_id: entity_id.to_string(),
            })
    }
}

#[async_trait]
impl SimulationAdapter for ScriptedSimulation {
    async fn has_more_work(&self) -> Result<bool, SimulationFault> {
        if self.closed {
            return Err(SimulationFault::Closed);
        }
        Ok(self.current < self.scenario.steps.len())
    }

    async fn advance_step(&mut self) -> Result<(), SimulationFault> {
        if self.closed {
            return Err(SimulationFault::Closed);
        }

        let next = self.current as u64 + 1;
        if self.scenario.crash_at_step == Some(next) {
            return Err(SimulationFault::Unresponsive {
                step: next,
                reason: "scripted engine crash".to_string(),
            });
        }

        self.current += 1;
        debug!(step = next, "Advanced scripted simulation");
        Ok(())
    }

    async fn list_active_entity_ids(&self) -> Result<Vec<String>, SimulationFault> {
        if self.closed {
            return Err(SimulationFault::Closed);
        }

        let ids: Vec<String> = self
            .current
            .checked_sub(1)
            .and_then(|idx| self.scenario.steps.get(idx))
            .map(|frame| frame.entities.iter().map(|e| e.id.clone()).collect())
            .unwrap_or_default();
        Ok(ids)
    }

    async fn get_position(&self, entity_id: &str) -> Result<(f64, f64), EntityQueryFault> {
        let entity = self.entity(entity_id)?;
        Ok((entity.x, entity.y))
    }

    async fn get_speed(&self, entity_id: &str) -> Result<f64, EntityQueryFault> {
        Ok(self.entity(entity_id)?.speed)
    }

    async fn get_attribute(
        &self,
        entity_id: &str,
        key: &str,
    ) -> Result<String, EntityQueryFault> {
        self.entity(entity_id)?
            .attributes
            .get(key)
            .cloned()
            .ok_or_else(|| EntityQueryFault::AttributeUnsupported {
                entity_id: entity_id.to_string(),
                key: key.to_string(),
            })
    }

    fn step_length_seconds(&self) -> f64 {
        self.scenario.step_length_seconds
    }

    async fn close(&mut self) -> Result<(), SimulationFault> {
        if !self.closed {
            self.closed = true;
            debug!(steps = self.current, "Scripted simulation closed");
        }
        Ok(())
    }
}
