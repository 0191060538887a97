// Kinematics derivation and per-entity speed history

mod engine;
mod history;

pub use engine::{KinematicsEngine, RawEntityState, MPS_TO_KMH};
pub use history::{EntityHistory, HistoryConfig, ReappearPolicy};

use serde::{Deserialize, Serialize};

/// Fixed 2D coordinate distances are measured against
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub x: f64,
    pub y: f64,
}
