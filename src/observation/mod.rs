use serde::{Deserialize, Serialize};


/// Placeholder recorded when the visibility attribute could not be read
pub const VISIBILITY_UNAVAILABLE: &str = "unavailable";

/// Observation is one derived metrics record for one entity at one step.
///
/// Values are kept at full precision in memory; rounding happens only
/// when the observation is turned into a row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Simulation step (1-based)
    pub step: u64,

    /// Entity identifier as reported by the simulation
    pub entity_id: String,

    pub pos_x: f64,
    pub pos_y: f64,

    /// Euclidean distance to the reference point (meters)
    pub distance_to_reference: f64,

    pub speed_kmh: f64,

    /// Speed delta per step length (m/s²), signed
    pub acceleration: f64,

    /// Raw visibility attribute, or `VISIBILITY_UNAVAILABLE`
    pub visibility: String,
}

impl Observation {
    /// Render the observation as row fields in schema order.
    ///
    /// Numeric fields are rounded to 2 decimal places here.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.step.to_string(),
            self.entity_id.clone(),
            format_decimal(self.pos_x),
            format_decimal(self.pos_y),
            format_decimal(self.distance_to_reference),
            format_decimal(self.speed_kmh),
            format_decimal(self.acceleration),
            self.visibility.clone(),
        ]
    }

    /// Human-readable console line for this observation
    pub fn summary(&self) -> String {
        format!(
            "Step {}: Vehicle {} | Pos: x={:.2}, y={:.2} | Distance: {:.2} m | Speed: {:.2} km/h | Accel: {:.2} m/s² | Visibility: {}",
            self.step,
            self.entity_id,
            self.pos_x,
            self.pos_y,
            self.distance_to_reference,
            self.speed_kmh,
            self.acceleration,
            self.visibility
        )
    }
}

/// Format to 2 decimal places, normalizing negative zero
fn format_decimal(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded == 0.0 {
        return "0.00".to_string();
    }
    format!("{:.2}", rounded)
}
