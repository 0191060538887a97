use crate::error::SinkError;
use crate::observation::Observation;
use crate::sink::{OutputConfig, RecordSchema, RecordSink};
use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

enum RowWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl RowWriter {
    /// Flush buffers, finish compression and hand back the file
    fn finish(self) -> io::Result<File> {
        match self {
            RowWriter::Plain(w) => w.into_inner().map_err(|e| e.into_error()),
            RowWriter::Gzip(encoder) => encoder.finish()?.into_inner().map_err(|e| e.into_error()),
        }
    }
}

impl Write for RowWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RowWriter::Plain(w) => w.write(buf),
            RowWriter::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RowWriter::Plain(w) => w.flush(),
            RowWriter::Gzip(w) => w.flush(),
        }
    }
}

enum SinkState {
    Open(RowWriter),
    Finalized,
}

/// Comma-separated tabular file sink.
///
/// Rows stream into a `.tmp` sibling of the destination. `finalize` flushes,
/// fsyncs and renames it into place, so a finished file is never partial.
pub struct CsvSink {
    schema: RecordSchema,
    destination: PathBuf,
    tmp_path: PathBuf,
    state: Mutex<SinkState>,
    rows: AtomicU64,
}

impl CsvSink {
    /// Create the output store and write the header row.
    ///
    /// Any failure here is a `SinkError::Init`.
    pub fn open(config: &OutputConfig, schema: RecordSchema) -> Result<Self, SinkError> {
        fs::create_dir_all(&config.directory).map_err(|source| SinkError::Init {
            path: config.directory.clone(),
            source,
        })?;

        let (destination, tmp_path, file) = create_unique(config)?;

        let buffered = BufWriter::new(file);
        let mut writer = if config.compress {
            RowWriter::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            RowWriter::Plain(buffered)
        };

        write_record(&mut writer, schema.columns()).map_err(|source| SinkError::Init {
            path: tmp_path.clone(),
            source,
        })?;

        info!(
            path = %destination.display(),
            columns = schema.len(),
            compressed = config.compress,
            "Output store opened"
        );

        Ok(Self {
            schema,
            destination,
            tmp_path,
            state: Mutex::new(SinkState::Open(writer)),
            rows: AtomicU64::new(0),
        })
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Flush, fsync and move the staged file into place
    fn commit(&self, writer: RowWriter) -> io::Result<()> {
        let file = writer.finish()?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.tmp_path, &self.destination)
    }
}

impl RecordSink for CsvSink {
    fn append_row(&self, observation: &Observation) -> Result<(), SinkError> {
        let row = observation.to_row();
        if row.len() != self.schema.len() {
            return Err(SinkError::SchemaMismatch {
                expected: self.schema.len(),
                got: row.len(),
            });
        }

        let mut state = self.state.lock().map_err(|_| SinkError::Poisoned)?;
        match &mut *state {
            SinkState::Open(writer) => {
                write_record(writer, row.as_slice())?;
                self.rows.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            SinkState::Finalized => Err(SinkError::AlreadyFinalized),
        }
    }

    fn finalize(&self) -> Result<PathBuf, SinkError> {
        let mut state = self.state.lock().map_err(|_| SinkError::Poisoned)?;
        let writer = match std::mem::replace(&mut *state, SinkState::Finalized) {
            SinkState::Open(writer) => writer,
            SinkState::Finalized => return Err(SinkError::AlreadyFinalized),
        };

        self.commit(writer)?;

        debug!(
            path = %self.destination.display(),
            rows = self.rows_written(),
            "Output store finalized"
        );

        Ok(self.destination.clone())
    }

    fn rows_written(&self) -> u64 {
        self.rows.load(Ordering::SeqCst)
    }

    fn destination(&self) -> &Path {
        &self.destination
    }

    fn staging_path(&self) -> &Path {
        &self.tmp_path
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        // Best-effort finalize when the owner went away without calling it
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let writer = match std::mem::replace(state, SinkState::Finalized) {
            SinkState::Open(writer) => writer,
            SinkState::Finalized => return,
        };

        match self.commit(writer) {
            Ok(()) => warn!(
                rows = self.rows_written(),
                "Output store dropped before finalize. Data written to: {}",
                self.destination.display()
            ),
            Err(e) => warn!(
                error = %e,
                "Output store dropped before finalize. Data left in: {}",
                self.tmp_path.display()
            ),
        }
    }
}

/// Claim `<prefix>_<timestamp>.csv[.gz]`, suffixing `_N` while that name is
/// taken. The staging file is created exclusively, so concurrent runs that
/// pick the same name move on to the next suffix.
fn create_unique(config: &OutputConfig) -> Result<(PathBuf, PathBuf, File), SinkError> {
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let extension = if config.compress { "csv.gz" } else { "csv" };
    let stem = format!("{}_{}", config.file_prefix, timestamp);

    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            config.directory.join(format!("{}.{}", stem, extension))
        } else {
            config.directory.join(format!("{}_{}.{}", stem, n, extension))
        };
        n += 1;

        if candidate.exists() {
            continue;
        }

        let tmp_path = tmp_path_for(&candidate);
        match OpenOptions::new().write(true).create_new(true).open(&tmp_path) {
            Ok(file) => return Ok((candidate, tmp_path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %tmp_path.display(), "Output name taken, trying next");
            }
            Err(source) => {
                return Err(SinkError::Init {
                    path: tmp_path,
                    source,
                })
            }
        }
    }
}

fn tmp_path_for(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    destination.with_file_name(name)
}

fn write_record<W: Write, S: AsRef<str>>(writer: &mut W, fields: &[S]) -> io::Result<()> {
    let line = fields
        .iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")
}

fn escape_field(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
