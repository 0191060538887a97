use crate::kinematics::history::{EntityHistory, HistoryConfig};
use crate::kinematics::ReferencePoint;
use crate::observation::Observation;

/// m/s -> km/h
pub const MPS_TO_KMH: f64 = 3.6;

/// Raw per-entity state pulled from the simulation for one step
#[derive(Clone, Debug, PartialEq)]
pub struct RawEntityState {
    pub x: f64,
    pub y: f64,
    pub speed_mps: f64,
    pub visibility: String,
}

/// Derives observations from raw state and owns the per-entity history
pub struct KinematicsEngine {
    reference: ReferencePoint,
    step_length_seconds: f64,
    history: EntityHistory,
}

impl KinematicsEngine {
    /// `step_length_seconds` must be positive; acceleration is the speed
    /// delta divided by it.
    pub fn new(
        reference: ReferencePoint,
        step_length_seconds: f64,
        history_config: HistoryConfig,
    ) -> Self {
        Self {
            reference,
            step_length_seconds,
            history: EntityHistory::new(history_config),
        }
    }

    /// Derive the observation for one entity at one step.
    ///
    /// The history is updated unconditionally, so the next step's delta is
    /// correct even if the caller drops this observation.
    pub fn derive(&self, step: u64, entity_id: &str, raw: RawEntityState) -> Observation {
        let distance = (raw.x - self.reference.x).hypot(raw.y - self.reference.y);
        let speed_kmh = raw.speed_mps * MPS_TO_KMH;

        let prior = self.history.prior_speed(entity_id, step);
        let acceleration = (raw.speed_mps - prior) / self.step_length_seconds;
        self.history.record(entity_id, raw.speed_mps, step);

        Observation {
            step,
            entity_id: entity_id.to_string(),
            pos_x: raw.x,
            pos_y: raw.y,
            distance_to_reference: distance,
            speed_kmh,
            acceleration,
            visibility: raw.visibility,
        }
    }

    pub fn reference_point(&self) -> ReferencePoint {
        self.reference
    }

    pub fn step_length_seconds(&self) -> f64 {
        self.step_length_seconds
    }

    pub fn history(&self) -> &EntityHistory {
        &self.history
    }
}
