use crate::error::SinkError;
use crate::observation::Observation;
use serde::Deserialize;
use std::path::{Path, PathBuf};

mod csv;

pub use self::csv::CsvSink;


/// Column header of the vehicle tracking output
pub const VEHICLE_TRACKING_COLUMNS: [&str; 8] = [
    "Step",
    "VehicleID",
    "PosX",
    "PosY",
    "DistanceToIntersection_m",
    "Speed_kmh",
    "Acceleration_mps2",
    "Visibility",
];

/// Fixed, ordered column schema of a record store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordSchema {
    columns: Vec<String>,
}

impl RecordSchema {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Step, VehicleID, PosX, PosY, DistanceToIntersection_m, Speed_kmh,
    /// Acceleration_mps2, Visibility
    pub fn vehicle_tracking() -> Self {
        Self::new(VEHICLE_TRACKING_COLUMNS)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Output location and format
#[derive(Clone, Debug, Deserialize)]
pub struct OutputConfig {
    /// Directory the output file is written to (created if missing)
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Filename prefix; a generation timestamp is appended
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Write gzip-compressed output (.csv.gz)
    #[serde(default)]
    pub compress: bool,
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_file_prefix() -> String {
    "vehicle_tracking".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            file_prefix: default_file_prefix(),
            compress: false,
        }
    }
}

/// Ordered, append-only store of observations.
///
/// Implementations must keep call order and serialize concurrent appends.
/// `finalize` persists everything appended so far and may succeed only once.
pub trait RecordSink: Send + Sync {
    fn append_row(&self, observation: &Observation) -> Result<(), SinkError>;

    /// Persist all rows and return the output locator
    fn finalize(&self) -> Result<PathBuf, SinkError>;

    /// Rows accepted so far
    fn rows_written(&self) -> u64;

    /// Where the output will land once finalized
    fn destination(&self) -> &Path;

    /// Where rows live until `finalize` succeeds; also where they stay if it fails
    fn staging_path(&self) -> &Path {
        self.destination()
    }
}
