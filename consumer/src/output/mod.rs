//! Record sinks for scored frames, plus the JSON run summary.

mod csv;
mod db;
pub mod summary;

pub use csv::CsvSink;
pub use db::SqliteSink;

use frame_clarity_common::config::OutputFormat;
use std::path::Path;
use tracing::debug;

use crate::aggregator::ResultRecord;

/// Destination for emitted records, written in emission order.
pub trait RecordSink: Send {
    fn write_record(&mut self, record: &ResultRecord) -> Result<(), OutputError>;

    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn name(&self) -> &str;
}

impl RecordSink for Box<dyn RecordSink> {
    fn write_record(&mut self, record: &ResultRecord) -> Result<(), OutputError> {
        (**self).write_record(record)
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        (**self).flush()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Sink that only logs each record at debug level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn write_record(&mut self, record: &ResultRecord) -> Result<(), OutputError> {
        debug!(
            frame = %record.identity,
            clarity = record.score,
            label = record.label.as_u8(),
            "frame scored"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Create the sink for `format` at `path`, truncating any existing CSV file.
pub fn open_sink(format: OutputFormat, path: &Path) -> Result<Box<dyn RecordSink>, OutputError> {
    Ok(match format {
        OutputFormat::Csv => Box::new(CsvSink::create(path)?),
        OutputFormat::Sqlite => Box::new(SqliteSink::open(path)?),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("failed to create {0}: {1}")]
    Create(String, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(String, std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to serialize summary: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    pub records: Vec<ResultRecord>,
    pub flushed: bool,
    capacity: Option<usize>,
}

#[cfg(test)]
impl MemorySink {
    /// Accept `n` records, then fail every write.
    pub fn failing_after(n: usize) -> Self {
        Self {
            capacity: Some(n),
            ..Self::default()
        }
    }
}

#[cfg(test)]
impl RecordSink for MemorySink {
    fn write_record(&mut self, record: &ResultRecord) -> Result<(), OutputError> {
        if self.capacity.is_some_and(|cap| self.records.len() >= cap) {
            return Err(OutputError::Write(
                "memory".into(),
                std::io::Error::new(std::io::ErrorKind::StorageFull, "sink full"),
            ));
        }
        self.records.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        self.flushed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
