// Fault taxonomy
pub mod error;

// Configuration loading and env overrides
pub mod config;

// Observation record model
pub mod observation;

// Kinematics derivation and entity history
pub mod kinematics;

// Ordered record sinks
pub mod sink;

// Simulation adapter interface and scripted replay
pub mod simulation;

// Collection loop
pub mod collector;

pub use collector::{Collector, CollectorState, RunOutcome, RunReport};
pub use config::{load_config, CollectorConfig};
pub use error::{CollectorError, EntityQueryFault, SimulationFault, SinkError};
pub use observation::Observation;
