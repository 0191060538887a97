use crate::error::{EntityQueryFault, SimulationFault};
use async_trait::async_trait;

mod scripted;

pub use scripted::{EntityFrame, Scenario, ScriptedSimulation, StepFrame};

/// Query surface of a running, step-driven simulation session.
///
/// Implementations wrap an external engine (a network client, an embedded
/// engine, a recorded scenario) and receive their connection settings
/// explicitly at construction.
///
/// # Lifecycle
/// 1. The collector checks `has_more_work()`
/// 2. `advance_step()` moves simulated time forward one tick
/// 3. `list_active_entity_ids()` returns the entities present at that tick
/// 4. Per-entity getters are called for each listed ID, possibly concurrently
/// 5. `close()` is called exactly once when the run ends, on every path
#[async_trait]
pub trait SimulationAdapter: Send + Sync {
    /// True while the simulation still expects activity
    async fn has_more_work(&self) -> Result<bool, SimulationFault>;

    /// Advance simulated time by one discrete tick.
    ///
    /// A failure means the engine is unusable; the run aborts.
    async fn advance_step(&mut self) -> Result<(), SimulationFault>;

    /// Entities present at the current step, in a stable order
    async fn list_active_entity_ids(&self) -> Result<Vec<String>, SimulationFault>;

    async fn get_position(&self, entity_id: &str) -> Result<(f64, f64), EntityQueryFault>;

    /// Speed in meters per second
    async fn get_speed(&self, entity_id: &str) -> Result<f64, EntityQueryFault>;

    async fn get_attribute(&self, entity_id: &str, key: &str)
        -> Result<String, EntityQueryFault>;

    /// Simulated seconds per step
    fn step_length_seconds(&self) -> f64 {
        1.0
    }

    /// Release the session
    async fn close(&mut self) -> Result<(), SimulationFault>;
}
