use rusqlite::{Connection, params};
use std::path::Path;
use tracing::{debug, info};

use super::{OutputError, RecordSink};
use crate::aggregator::{FrameIdentity, ResultRecord};

/// SQLite table of scored frames.
///
/// Rows from every run accumulate in one `clarity_results` table, tagged with
/// the run id assigned when the sink was opened. WAL mode lets readers query
/// the file while a run is still writing.
pub struct SqliteSink {
    conn: Connection,
    run_id: String,
    written: u64,
}

impl SqliteSink {
    pub fn open(path: &Path) -> Result<Self, OutputError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let sink = Self::init(conn)?;
        info!(path = path.display().to_string(), run_id = %sink.run_id, "SQLite results opened");
        Ok(sink)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, OutputError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, OutputError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS clarity_results (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id        TEXT    NOT NULL,
                frame_index   INTEGER,
                frame_name    TEXT,
                timestamp_sec REAL,
                clarity_score REAL    NOT NULL,
                clarity_label INTEGER NOT NULL CHECK(clarity_label IN (0, 1))
            );
            CREATE INDEX IF NOT EXISTS idx_results_run
                ON clarity_results(run_id, frame_index);",
        )?;
        Ok(Self {
            conn,
            run_id: chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string(),
            written: 0,
        })
    }

    #[cfg(test)]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl RecordSink for SqliteSink {
    fn write_record(&mut self, record: &ResultRecord) -> Result<(), OutputError> {
        let (index, name) = match &record.identity {
            FrameIdentity::Index { index, .. } => (Some(*index as i64), None),
            FrameIdentity::Name(name) => (None, Some(name.as_str())),
        };
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO clarity_results
                (run_id, frame_index, frame_name, timestamp_sec, clarity_score, clarity_label)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        stmt.execute(params![
            self.run_id,
            index,
            name,
            record.timestamp_rounded(),
            record.score,
            record.label.as_u8(),
        ])?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        debug!(run_id = %self.run_id, rows = self.written, "SQLite results complete");
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
