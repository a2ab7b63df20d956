use frame_clarity_producer::{FrameSource, StreamMetadata};
use futures_util::stream::{FuturesOrdered, StreamExt};
use futures_util::FutureExt;
use std::num::NonZeroU64;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::aggregator::{AggregateSummary, FrameIdentity, ResultAggregator};
use crate::filter::{selected_count, should_score, ClarityScore, FrameScorer, InvalidFrame};
use crate::output::{OutputError, RecordSink};

#[derive(Debug)]
pub struct StreamReport {
    pub metadata: StreamMetadata,
    pub summary: AggregateSummary,
    /// Frames pulled from the source, sampled or not.
    pub frames_read: u64,
    /// Set when a decode failure ended the stream early.
    pub decode_warning: Option<String>,
    pub cancelled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("frame {index} cannot be scored: {source}")]
    InvalidFrame {
        index: u64,
        #[source]
        source: InvalidFrame,
    },
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("scoring task failed: {0}")]
    Worker(String),
}

type Scored = (u64, f64, Result<Result<ClarityScore, InvalidFrame>, JoinError>);

/// Score every `stride`-th frame of `source` and push the results to
/// `aggregator` in increasing index order.
///
/// Decoding is sequential; scoring runs on the blocking pool with at most
/// `workers` frames in flight. Results that finish out of order wait in an
/// ordered queue until every earlier frame has been recorded.
///
/// A decode failure ends the stream with a warning in the report. Flipping
/// `shutdown` to `true` stops the run, drops in-flight work and returns the
/// records emitted so far.
pub async fn run_stream<F, C, S>(
    source: &mut F,
    scorer: Arc<C>,
    aggregator: &mut ResultAggregator<S>,
    stride: NonZeroU64,
    workers: usize,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<StreamReport, PipelineError>
where
    F: FrameSource,
    C: FrameScorer + ?Sized + 'static,
    S: RecordSink,
{
    let metadata = source.metadata().clone();
    let frame_rate = metadata.frame_rate;
    let workers = workers.max(1);

    match metadata.total_frames {
        Some(total) => info!(
            frame_rate,
            total_frames = total,
            expected = selected_count(total, stride),
            stride = stride.get(),
            scorer = scorer.name(),
            "streaming frames"
        ),
        None => info!(
            frame_rate,
            stride = stride.get(),
            scorer = scorer.name(),
            "streaming frames, length unknown"
        ),
    }

    let mut pending = FuturesOrdered::new();
    let mut frames_read = 0u64;
    let mut decode_warning = None;
    let mut cancelled = false;

    'frames: loop {
        while pending.len() >= workers {
            let outcome = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => {
                    cancelled = true;
                    break 'frames;
                }
                outcome = pending.next() => outcome,
            };
            if let Some(outcome) = outcome {
                record_outcome(aggregator, outcome)?;
            }
        }
        while let Some(Some(outcome)) = pending.next().now_or_never() {
            record_outcome(aggregator, outcome)?;
        }

        // Only the shutdown branch may drop a partially read frame.
        let next = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => {
                cancelled = true;
                break 'frames;
            }
            next = source.next_frame() => next,
        };

        match next {
            Ok(Some(indexed)) => {
                frames_read += 1;
                if !should_score(indexed.index, stride) {
                    continue;
                }
                let index = indexed.index;
                let timestamp_secs = indexed.timestamp_secs(frame_rate);
                let scorer = Arc::clone(&scorer);
                let task = tokio::task::spawn_blocking(move || scorer.score(&indexed.frame));
                pending.push_back(async move { (index, timestamp_secs, task.await) });
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, frames_read, "stream ended early, keeping frames scored so far");
                decode_warning = Some(e.to_string());
                break;
            }
        }
    }

    while !cancelled && !pending.is_empty() {
        let outcome = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => {
                cancelled = true;
                None
            }
            outcome = pending.next() => outcome,
        };
        if let Some(outcome) = outcome {
            record_outcome(aggregator, outcome)?;
        }
    }

    if cancelled {
        info!(dropped = pending.len(), frames_read, "stream cancelled");
    }
    debug!(frames_read, "stream finished");

    Ok(StreamReport {
        metadata,
        summary: aggregator.summary(),
        frames_read,
        decode_warning,
        cancelled,
    })
}

fn record_outcome<S: RecordSink>(
    aggregator: &mut ResultAggregator<S>,
    (index, timestamp_secs, joined): Scored,
) -> Result<(), PipelineError> {
    match joined {
        Ok(Ok(score)) => {
            aggregator.push(FrameIdentity::Index { index, timestamp_secs }, score)?;
            Ok(())
        }
        Ok(Err(source)) => Err(PipelineError::InvalidFrame { index, source }),
        Err(e) => Err(PipelineError::Worker(e.to_string())),
    }
}

/// Resolves once `shutdown` reads `true`. Never resolves if the sender is
/// gone without having signalled.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::clarity::tests::{checkerboard, flat_gray};
    use crate::filter::{ClarityLabel, ClarityScorer, FilterParams};
    use crate::output::MemorySink;
    use frame_clarity_common::frame::Frame;
    use frame_clarity_producer::{IndexedFrame, MemorySource, SourceError};
    use std::time::Duration;

    fn stride(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    fn scorer() -> Arc<ClarityScorer> {
        Arc::new(ClarityScorer::new(FilterParams::default(), 100.0))
    }

    /// Scores a frame by its first pixel, sleeping longer for darker frames
    /// so that early indices finish last.
    struct SlowScorer;

    impl FrameScorer for SlowScorer {
        fn score(&self, frame: &Frame) -> Result<ClarityScore, InvalidFrame> {
            let value = frame.data()[0];
            std::thread::sleep(Duration::from_millis(2 * (20 - value as u64)));
            Ok(ClarityScore {
                score: value as f64,
                label: ClarityLabel::classify(value as f64, 10.0),
            })
        }
    }

    /// Wraps a source and signals shutdown after yielding `after` frames.
    struct CancellingSource {
        inner: MemorySource,
        tx: watch::Sender<bool>,
        after: u64,
        yielded: u64,
    }

    impl FrameSource for CancellingSource {
        fn metadata(&self) -> &StreamMetadata {
            self.inner.metadata()
        }

        async fn next_frame(&mut self) -> Result<Option<IndexedFrame>, SourceError> {
            let next = self.inner.next_frame().await;
            self.yielded += 1;
            if self.yielded == self.after {
                let _ = self.tx.send(true);
            }
            next
        }
    }

    #[tokio::test]
    async fn samples_every_tenth_of_twenty_five() {
        let frames = (0..25).map(|_| checkerboard(16, 16, 4)).collect();
        let mut source = MemorySource::new(frames, 30.0);
        let mut agg = ResultAggregator::new(MemorySink::default());
        let (_tx, mut rx) = watch::channel(false);

        let report = run_stream(&mut source, scorer(), &mut agg, stride(10), 4, &mut rx)
            .await
            .unwrap();
        assert_eq!(report.frames_read, 25);
        assert_eq!(report.summary.total_scored, 3);
        assert!(!report.cancelled);
        assert!(report.decode_warning.is_none());

        let (_, sink) = agg.finish().unwrap();
        let indices: Vec<u64> = sink.records.iter().filter_map(|r| r.frame_index()).collect();
        assert_eq!(indices, vec![0, 10, 20]);
        assert_eq!(sink.records[2].timestamp_rounded(), Some(0.67));
        assert!(sink.records.iter().all(|r| r.label == ClarityLabel::Clear));
    }

    #[tokio::test]
    async fn out_of_order_completion_is_emitted_in_order() {
        let frames = (0..12u8).map(|v| flat_gray(4, 4, v)).collect();
        let mut source = MemorySource::new(frames, 10.0);
        let mut agg = ResultAggregator::new(MemorySink::default());
        let (_tx, mut rx) = watch::channel(false);

        let report = run_stream(&mut source, Arc::new(SlowScorer), &mut agg, stride(1), 6, &mut rx)
            .await
            .unwrap();
        assert_eq!(report.summary.total_scored, 12);
        assert_eq!(report.summary.clear_count, 2);

        let (_, sink) = agg.finish().unwrap();
        let scores: Vec<f64> = sink.records.iter().map(|r| r.score).collect();
        let expected: Vec<f64> = (0..12).map(|v| v as f64).collect();
        assert_eq!(scores, expected);
    }

    #[tokio::test]
    async fn decode_error_keeps_scored_frames() {
        let frames = (0..5).map(|_| checkerboard(8, 8, 2)).collect();
        let mut source = MemorySource::new(frames, 25.0).failing_after("invalid NAL unit");
        let mut agg = ResultAggregator::new(MemorySink::default());
        let (_tx, mut rx) = watch::channel(false);

        let report = run_stream(&mut source, scorer(), &mut agg, stride(2), 2, &mut rx)
            .await
            .unwrap();
        assert_eq!(report.frames_read, 5);
        assert_eq!(report.summary.total_scored, 3);
        assert!(report.decode_warning.unwrap().contains("invalid NAL unit"));
    }

    #[tokio::test]
    async fn cancellation_returns_consistent_partial_summary() {
        let (tx, mut rx) = watch::channel(false);
        let frames = (0..10).map(|_| checkerboard(8, 8, 2)).collect();
        let mut source = CancellingSource {
            inner: MemorySource::new(frames, 30.0),
            tx,
            after: 3,
            yielded: 0,
        };
        let mut agg = ResultAggregator::new(MemorySink::default());

        let report = run_stream(&mut source, scorer(), &mut agg, stride(1), 1, &mut rx)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.frames_read, 3);
        assert_eq!(report.summary.total_scored, 2);

        let (summary, sink) = agg.finish().unwrap();
        assert_eq!(summary, report.summary);
        assert_eq!(sink.records.len() as u64, summary.total_scored);
    }

    #[tokio::test]
    async fn invalid_frame_is_fatal() {
        let frames = vec![
            checkerboard(8, 8, 2),
            Frame::gray(0, 8, Vec::new()).unwrap(),
            checkerboard(8, 8, 2),
        ];
        let mut source = MemorySource::new(frames, 30.0);
        let mut agg = ResultAggregator::new(MemorySink::default());
        let (_tx, mut rx) = watch::channel(false);

        let err = run_stream(&mut source, scorer(), &mut agg, stride(1), 2, &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidFrame {
                index: 1,
                source: InvalidFrame::ZeroDimension { .. }
            }
        ));
    }

    #[tokio::test]
    async fn sink_failure_is_fatal() {
        let frames = (0..4).map(|_| flat_gray(4, 4, 9)).collect();
        let mut source = MemorySource::new(frames, 30.0);
        let mut agg = ResultAggregator::new(MemorySink::failing_after(1));
        let (_tx, mut rx) = watch::channel(false);

        let err = run_stream(&mut source, scorer(), &mut agg, stride(1), 1, &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Output(OutputError::Write(..))));
        assert_eq!(agg.summary().total_scored, 1);
    }
}
