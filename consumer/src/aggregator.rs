use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::filter::{ClarityLabel, ClarityScore};
use crate::output::{OutputError, RecordSink};

/// Which frame a record describes.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameIdentity {
    /// A frame from a stream, with its position and presentation time.
    Index { index: u64, timestamp_secs: f64 },
    /// A static image, identified by file name.
    Name(String),
}

impl fmt::Display for FrameIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameIdentity::Index { index, .. } => write!(f, "{index}"),
            FrameIdentity::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub identity: FrameIdentity,
    pub score: f64,
    pub label: ClarityLabel,
}

impl ResultRecord {
    #[cfg(test)]
    pub fn frame_index(&self) -> Option<u64> {
        match self.identity {
            FrameIdentity::Index { index, .. } => Some(index),
            FrameIdentity::Name(_) => None,
        }
    }

    /// Timestamp rounded to two decimal places; `None` for static images.
    pub fn timestamp_rounded(&self) -> Option<f64> {
        match self.identity {
            FrameIdentity::Index { timestamp_secs, .. } => {
                Some((timestamp_secs * 100.0).round() / 100.0)
            }
            FrameIdentity::Name(_) => None,
        }
    }
}

/// Running totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateSummary {
    pub total_scored: u64,
    pub clear_count: u64,
}

impl AggregateSummary {
    pub fn record(&mut self, label: ClarityLabel) {
        self.total_scored += 1;
        if label.is_clear() {
            self.clear_count += 1;
        }
    }

    /// Fraction of scored frames labelled clear, undefined for an empty run.
    pub fn clear_ratio(&self) -> Option<f64> {
        (self.total_scored > 0).then(|| self.clear_count as f64 / self.total_scored as f64)
    }

    /// Combine counts from another partial summary.
    #[allow(dead_code)]
    pub fn merge(&mut self, other: &AggregateSummary) {
        self.total_scored += other.total_scored;
        self.clear_count += other.clear_count;
    }
}

pub type SampleHook = Box<dyn FnMut(&ResultRecord) + Send>;

/// Turns scored frames into records, in arrival order.
///
/// Each record is written to the sink before the counters are updated, so
/// the summary never counts a record the sink did not accept.
pub struct ResultAggregator<S> {
    sink: S,
    summary: AggregateSummary,
    progress_interval: u64,
    sample: Option<(u64, SampleHook)>,
}

impl<S: RecordSink> ResultAggregator<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            summary: AggregateSummary::default(),
            progress_interval: 0,
            sample: None,
        }
    }

    /// Log a progress line every `interval` records (0 disables).
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Call `hook` for records number 0, `every`, `2 * every`, ...
    /// (0 disables). The hook only observes emitted records.
    pub fn with_sample_hook(
        mut self,
        every: u64,
        hook: impl FnMut(&ResultRecord) + Send + 'static,
    ) -> Self {
        self.sample = (every > 0).then(|| (every, Box::new(hook) as SampleHook));
        self
    }

    pub fn push(
        &mut self,
        identity: FrameIdentity,
        score: ClarityScore,
    ) -> Result<(), OutputError> {
        let record = ResultRecord {
            identity,
            score: score.score,
            label: score.label,
        };
        self.sink.write_record(&record)?;

        let position = self.summary.total_scored;
        self.summary.record(record.label);

        if let Some((every, hook)) = &mut self.sample {
            if position % *every == 0 {
                hook(&record);
            }
        }

        if self.progress_interval > 0 && self.summary.total_scored % self.progress_interval == 0 {
            info!(
                processed = self.summary.total_scored,
                clear = self.summary.clear_count,
                frame = %record.identity,
                clarity = format!("{:.2}", record.score),
                "scoring progress"
            );
        }
        Ok(())
    }

    /// Totals so far. Valid at any point, including after a cancelled run.
    pub fn summary(&self) -> AggregateSummary {
        self.summary
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Flush the sink and hand back the final totals.
    pub fn finish(mut self) -> Result<(AggregateSummary, S), OutputError> {
        self.sink.flush()?;
        Ok((self.summary, self.sink))
    }
}
