use std::path::PathBuf;
use thiserror::Error;

/// Engine-level failure. Fatal: aborts the collection loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationFault {
    #[error("simulation engine unresponsive at step {step}: {reason}")]
    Unresponsive { step: u64, reason: String },

    #[error("simulation connection is closed")]
    Closed,
}

/// Per-entity query failure. Recovered locally by the collection loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntityQueryFault {
    /// Entity was listed but disappeared before it could be queried
    #[error("entity '{entity_id}' vanished before it could be queried")]
    Vanished { entity_id: String },

    #[error("attribute '{key}' is not supported for entity '{entity_id}'")]
    AttributeUnsupported { entity_id: String, key: String },

    /// The session went away underneath a query
    #[error("simulation unavailable while querying '{entity_id}'")]
    Disconnected { entity_id: String },
}

/// Record sink failures
#[derive(Debug, Error)]
pub enum SinkError {
    /// Backing store could not be created (fatal, no rows written)
    #[error("failed to create output store at {}: {source}", path.display())]
    Init {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("row has {got} fields but the schema has {expected} columns")]
    SchemaMismatch { expected: usize, got: usize },

    #[error("output has already been finalized")]
    AlreadyFinalized,

    #[error("sink lock poisoned")]
    Poisoned,

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end a run without a finalized output
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("cannot open record sink: {0}")]
    SinkInit(#[source] SinkError),

    /// Rows collected so far remain at `staging`
    #[error("failed to finalize output (rows remain in {}): {source}", staging.display())]
    Finalize {
        staging: PathBuf,
        #[source]
        source: SinkError,
    },

    #[error("collector cannot start from state '{0}'")]
    InvalidState(crate::collector::CollectorState),
}
