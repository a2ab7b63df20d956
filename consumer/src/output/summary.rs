use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::OutputError;
use crate::aggregator::AggregateSummary;
use crate::batch::SkippedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Stream,
    Batch,
}

/// Outcome of one mode's run, as written to the summary file.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_scored: u64,
    pub clear_count: u64,
    pub clear_ratio: Option<f64>,
    /// Batch: images that could not be read or scored.
    pub skipped: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_images: Vec<SkippedImage>,
    /// Stream: the decode failure that ended the stream early, if any.
    pub decode_warning: Option<String>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(
        mode: RunMode,
        source: impl Into<String>,
        started_at: DateTime<Utc>,
        summary: &AggregateSummary,
    ) -> Self {
        Self {
            mode,
            source: source.into(),
            started_at,
            finished_at: Utc::now(),
            total_scored: summary.total_scored,
            clear_count: summary.clear_count,
            clear_ratio: summary.clear_ratio(),
            skipped: 0,
            skipped_images: Vec::new(),
            decode_warning: None,
            cancelled: false,
        }
    }
}

/// Write all run summaries as a pretty-printed JSON array.
pub fn write_summaries(path: &Path, runs: &[RunSummary]) -> Result<(), OutputError> {
    let target = path.display().to_string();
    let file = File::create(path).map_err(|e| OutputError::Create(target.clone(), e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, runs)?;
    writeln!(writer).map_err(|e| OutputError::Write(target.clone(), e))?;
    writer.flush().map_err(|e| OutputError::Write(target, e))
}
