use frame_clarity_producer::{ImageEntry, ImageReadError};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::aggregator::{AggregateSummary, FrameIdentity, ResultAggregator};
use crate::filter::{ClarityScore, FrameScorer, InvalidFrame};
use crate::output::{OutputError, RecordSink};
use crate::pipeline::wait_for_shutdown;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedImage {
    pub name: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct BatchReport {
    pub summary: AggregateSummary,
    pub discovered: usize,
    pub skipped: Vec<SkippedImage>,
    pub cancelled: bool,
}

#[derive(Debug, thiserror::Error)]
enum BatchItemError {
    #[error(transparent)]
    Read(#[from] ImageReadError),
    #[error(transparent)]
    Invalid(#[from] InvalidFrame),
}

/// Decode and score every entry, `workers` at a time, recording results in
/// completion order. Unreadable or unscorable images are skipped with a
/// warning; only a sink failure aborts the batch.
pub async fn run_batch<C, S>(
    entries: Vec<ImageEntry>,
    scorer: Arc<C>,
    aggregator: &mut ResultAggregator<S>,
    workers: usize,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<BatchReport, OutputError>
where
    C: FrameScorer + ?Sized + 'static,
    S: RecordSink,
{
    let discovered = entries.len();
    let workers = workers.max(1);
    info!(images = discovered, workers, scorer = scorer.name(), "scoring image batch");

    let mut results = stream::iter(entries)
        .map(|entry| {
            let scorer = Arc::clone(&scorer);
            async move {
                let name = entry.name.clone();
                let joined = tokio::task::spawn_blocking(move || score_entry(&entry, &*scorer)).await;
                let outcome = match joined {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(e) => Err(format!("scoring task failed: {e}")),
                };
                (name, outcome)
            }
        })
        .buffer_unordered(workers);

    let mut skipped = Vec::new();
    let mut cancelled = false;
    loop {
        let next = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => {
                cancelled = true;
                break;
            }
            next = results.next() => next,
        };
        let Some((name, outcome)) = next else {
            break;
        };
        match outcome {
            Ok(score) => aggregator.push(FrameIdentity::Name(name), score)?,
            Err(reason) => {
                warn!(image = %name, error = %reason, "skipping image");
                skipped.push(SkippedImage { name, reason });
            }
        }
    }

    if cancelled {
        info!(scored = aggregator.summary().total_scored, "batch cancelled");
    }

    Ok(BatchReport {
        summary: aggregator.summary(),
        discovered,
        skipped,
        cancelled,
    })
}

fn score_entry<C: FrameScorer + ?Sized>(
    entry: &ImageEntry,
    scorer: &C,
) -> Result<ClarityScore, BatchItemError> {
    let frame = entry.decode()?;
    Ok(scorer.score(&frame)?)
}
