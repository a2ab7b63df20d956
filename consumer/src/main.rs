mod aggregator;
mod batch;
mod filter;
mod output;
mod pipeline;

use aggregator::ResultAggregator;
use chrono::Utc;
use filter::{ClarityScorer, FilterParams};
use frame_clarity_common::config::Config;
use frame_clarity_producer::{check_ffmpeg_available, FfmpegSource, ImageDirectory, SourceError};
use output::summary::{RunMode, RunSummary};
use output::{OutputError, RecordSink, TracingSink};
use pipeline::PipelineError;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let scorer = Arc::new(ClarityScorer::new(
        FilterParams::from(&config.filter),
        config.sampling.threshold,
    ));

    info!(
        stream = ?config.input.stream,
        frames_dir = ?config.input.frames_dir,
        stride = config.sampling.stride,
        threshold = scorer.threshold(),
        diameter = config.filter.diameter,
        sigma_color = config.filter.sigma_color,
        sigma_space = config.filter.sigma_space,
        workers = config.workers(),
        "starting frame-clarity"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut runs = Vec::new();
    let mut failed = false;

    if let Some(stream) = &config.input.stream {
        match run_stream_input(&config, stream, Arc::clone(&scorer), shutdown_rx.clone()).await {
            Ok(run) => runs.push(run),
            Err(e) => {
                error!(error = %e, stream = %stream, "stream run failed");
                failed = true;
            }
        }
    }

    if let Some(dir) = &config.input.frames_dir {
        if failed || *shutdown_rx.borrow() {
            info!("skipping frames directory");
        } else {
            match run_batch_input(&config, dir, Arc::clone(&scorer), shutdown_rx.clone()).await {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "batch run failed");
                    failed = true;
                }
            }
        }
    }

    if let Some(path) = &config.output.summary {
        match output::summary::write_summaries(path, &runs) {
            Ok(()) => info!(path = %path.display(), runs = runs.len(), "run summary written"),
            Err(e) => {
                error!(error = %e, "failed to write run summary");
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

async fn run_stream_input(
    config: &Config,
    identifier: &str,
    scorer: Arc<ClarityScorer>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<RunSummary, RunError> {
    check_ffmpeg_available().await;

    let started_at = Utc::now();
    let mut source = FfmpegSource::open(identifier).await?;
    let sink = output::open_sink(config.output.format, &config.output.records)?;
    info!(
        path = %config.output.records.display(),
        sink = sink.name(),
        "writing stream records"
    );

    let mut aggregator = new_aggregator(config, sink, RunMode::Stream);
    let stride = NonZeroU64::new(config.sampling.stride).unwrap_or(NonZeroU64::MIN);
    let result = pipeline::run_stream(
        &mut source,
        scorer,
        &mut aggregator,
        stride,
        config.workers(),
        &mut shutdown,
    )
    .await;

    // Flush whatever was emitted, even when the run failed.
    let finished = aggregator.finish();
    let report = result?;
    finished?;
    let summary = report.summary;

    info!(
        frames_read = report.frames_read,
        scored = summary.total_scored,
        clear = summary.clear_count,
        clear_ratio = ?summary.clear_ratio(),
        width = report.metadata.width,
        height = report.metadata.height,
        cancelled = report.cancelled,
        "stream complete"
    );

    Ok(RunSummary {
        decode_warning: report.decode_warning,
        cancelled: report.cancelled,
        ..RunSummary::new(RunMode::Stream, identifier, started_at, &summary)
    })
}

/// Score the frames directory. Returns `None` when there is nothing to score.
async fn run_batch_input(
    config: &Config,
    dir: &Path,
    scorer: Arc<ClarityScorer>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<Option<RunSummary>, RunError> {
    let directory = match ImageDirectory::open(dir, &config.input.extensions) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "frames directory unavailable, skipping batch");
            return Ok(None);
        }
    };
    if directory.is_empty() {
        warn!(path = %dir.display(), "no images found in frames directory");
        return Ok(None);
    }

    let started_at = Utc::now();
    let sink: Box<dyn RecordSink> = match &config.output.batch_records {
        Some(path) => {
            info!(path = %path.display(), "writing batch records");
            output::open_sink(config.output.format, path)?
        }
        None => Box::new(TracingSink),
    };

    let mut aggregator = new_aggregator(config, sink, RunMode::Batch);
    let result = batch::run_batch(
        directory.into_entries(),
        scorer,
        &mut aggregator,
        config.workers(),
        &mut shutdown,
    )
    .await;

    let finished = aggregator.finish();
    let report = result?;
    finished?;
    let summary = report.summary;

    info!(
        images = report.discovered,
        scored = summary.total_scored,
        clear = summary.clear_count,
        clear_ratio = ?summary.clear_ratio(),
        skipped = report.skipped.len(),
        cancelled = report.cancelled,
        "batch complete"
    );

    Ok(Some(RunSummary {
        skipped: report.skipped.len() as u64,
        skipped_images: report.skipped,
        cancelled: report.cancelled,
        ..RunSummary::new(RunMode::Batch, dir.display().to_string(), started_at, &summary)
    }))
}

fn new_aggregator<S: RecordSink>(config: &Config, sink: S, mode: RunMode) -> ResultAggregator<S> {
    ResultAggregator::new(sink)
        .with_progress_interval(config.runtime.progress_interval)
        .with_sample_hook(config.output.sample_every, move |record| {
            info!(
                ?mode,
                frame = %record.identity,
                clarity = record.score,
                label = record.label.as_u8(),
                "sample frame"
            );
        })
}
