use crate::history::Batch;
use crate::sequence::Sequence;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Log I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Log metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Log table error: {0}")]
    Csv(#[from] csv::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RecorderError + '_ {
    move |source| RecorderError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), RecorderError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            fs::create_dir_all(dir).map_err(io_err(dir))
        }
        _ => Ok(()),
    }
}

fn table_writer<W: Write>(sink: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().has_headers(false).from_writer(sink)
}

pub const BATCH_LOG_HEADER: &str = "batch,sequence,true_score,model_score,batch_size,measurement_cost,virtual_evals,landscape_id,start_id,model_type,virtual_screen,horizon,explorer_type";

/// Per-round values repeated on every row of the batch log.
#[derive(Debug, Clone)]
pub struct BatchLogContext<'a> {
    pub batch_size: usize,
    pub measurement_cost: u64,
    pub virtual_evals: u64,
    pub landscape_id: &'a str,
    pub start_id: &'a str,
    pub model_type: &'a str,
    pub virtual_screen: usize,
    pub horizon: usize,
    pub explorer_type: &'a str,
}

/// Appends one CSV row per measured sequence to `<directory>/<explorer_type>.csv`.
#[derive(Debug, Clone)]
pub struct BatchCsvRecorder {
    directory: PathBuf,
    explorer_type: String,
}

impl BatchCsvRecorder {
    pub fn new(directory: impl Into<PathBuf>, explorer_type: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            explorer_type: explorer_type.into(),
        }
    }

    pub fn file_path(&self) -> PathBuf {
        self.directory.join(format!("{}.csv", self.explorer_type))
    }

    /// Writes the rows of `batch`. The file is (re)created with a header when it does
    /// not exist yet or when `round == 0 && overwrite`; otherwise rows are appended.
    pub fn write(
        &self,
        round: usize,
        overwrite: bool,
        batch_id: usize,
        batch: &Batch,
        context: &BatchLogContext<'_>,
    ) -> Result<(), RecorderError> {
        let path = self.file_path();
        ensure_parent_dir(&path)?;

        let fresh = !path.exists() || (round == 0 && overwrite);
        let file = if fresh {
            File::create(&path).map_err(io_err(&path))?
        } else {
            OpenOptions::new()
                .append(true)
                .open(&path)
                .map_err(io_err(&path))?
        };

        let mut writer = table_writer(file);
        if fresh {
            writer.write_record(BATCH_LOG_HEADER.split(','))?;
        }
        for entry in batch.entries() {
            writer.write_record([
                batch_id.to_string(),
                entry.sequence.as_str().to_string(),
                format!("{:?}", entry.true_score),
                format!("{:?}", entry.model_score),
                context.batch_size.to_string(),
                context.measurement_cost.to_string(),
                context.virtual_evals.to_string(),
                context.landscape_id.to_string(),
                context.start_id.to_string(),
                context.model_type.to_string(),
                context.virtual_screen.to_string(),
                context.horizon.to_string(),
                context.explorer_type.to_string(),
            ])?;
        }
        writer.flush().map_err(io_err(&path))?;
        Ok(())
    }
}

/// Run-level metadata, written as the first line of every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub exp_name: String,
    pub model_name: String,
    pub landscape_name: String,
    pub rounds: usize,
    pub ground_truth_measurements_per_round: usize,
    pub model_queries_per_round: usize,
}

/// One row of the cumulative measurement table kept by the round runner.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRow {
    pub sequence: Sequence,
    /// `None` for the initial sequences, which were never predicted.
    pub model_score: Option<f64>,
    pub true_score: f64,
    pub round: usize,
    pub model_cost: u64,
    pub measurement_cost: usize,
}

pub const SNAPSHOT_TABLE_HEADER: &str =
    "sequence,model_score,true_score,round,model_cost,measurement_cost";

/// Rewrites the whole log on every call: a JSON metadata line, then the full table.
#[derive(Debug, Clone)]
pub struct SnapshotRecorder {
    path: PathBuf,
}

impl SnapshotRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, metadata: &RunMetadata, rows: &[MeasurementRow]) -> Result<(), RecorderError> {
        ensure_parent_dir(&self.path)?;
        let mut file = File::create(&self.path).map_err(io_err(&self.path))?;
        serde_json::to_writer(&mut file, metadata)?;
        writeln!(file).map_err(io_err(&self.path))?;

        let mut writer = table_writer(file);
        writer.write_record(SNAPSHOT_TABLE_HEADER.split(','))?;
        for row in rows {
            writer.write_record([
                row.sequence.as_str().to_string(),
                row.model_score.map(|s| format!("{:?}", s)).unwrap_or_default(),
                format!("{:?}", row.true_score),
                row.round.to_string(),
                row.model_cost.to_string(),
                row.measurement_cost.to_string(),
            ])?;
        }
        writer.flush().map_err(io_err(&self.path))?;
        Ok(())
    }
}
