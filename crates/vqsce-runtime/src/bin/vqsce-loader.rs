#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{info, info_span, warn, Instrument};

use vqsce_augment::Augmenter;
use vqsce_core::config::PipelineConfig;
use vqsce_index::{FoldPartition, IndexSettings, NpyDecoder, VolumeIndex};
use vqsce_runtime::pipeline::{EpochPlan, Pipeline, RuntimeCaps, RuntimeMetrics, StreamEvent};
use vqsce_runtime::source::{example_patches, write_example_patches, AugmentedSource};

#[derive(Debug, Parser)]
#[command(name = "vqsce-loader")]
struct Args {
    /// Experiment config (JSON). Only the `data`, `expt` and `augmentation` groups are read.
    #[arg(long, env = "VQSCE_CONFIG")]
    config: PathBuf,

    #[arg(long, env = "VQSCE_SEED", default_value_t = 0)]
    seed: u64,

    /// Stream the held-out fold once, unshuffled, instead of training epochs.
    #[arg(long, env = "VQSCE_VALIDATION", default_value_t = false)]
    validation: bool,

    #[arg(long, env = "VQSCE_NUM_WORKERS", default_value_t = 4)]
    num_workers: usize,

    #[arg(long, env = "VQSCE_MAX_QUEUE_BATCHES", default_value_t = 8)]
    max_queue_batches: usize,

    #[arg(long, env = "VQSCE_MAX_QUEUE_PATCHES", default_value_t = 64)]
    max_queue_patches: usize,

    #[arg(long, env = "VQSCE_MAX_INFLIGHT_BYTES", default_value_t = 512 * 1024 * 1024)]
    max_inflight_bytes: u64,

    /// Artificially slow down the consumer to exercise backpressure.
    #[arg(long, env = "VQSCE_CONSUMER_SLEEP_MS", default_value_t = 0)]
    consumer_sleep_ms: u64,

    /// Write centred validation patches here every `save_every` epochs.
    #[arg(long, env = "VQSCE_EXAMPLES_DIR")]
    examples_dir: Option<PathBuf>,

    /// Periodically emit a metrics snapshot (0 disables).
    #[arg(long, env = "VQSCE_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 1000)]
    metrics_snapshot_interval_ms: u64,
}

fn emit_runtime_metrics_snapshot(metrics: &RuntimeMetrics, config: &str) {
    let draw = metrics.draw_duration.snapshot();
    info!(
        target: "vqsce_metrics",
        config = %config,
        delivered_batches_total = metrics.delivered_batches_total.get(),
        delivered_patches_total = metrics.delivered_patches_total.get(),
        produced_patches_total = metrics.produced_patches_total.get(),
        skipped_draws_total = metrics.skipped_draws_total.get(),
        dropped_patches_total = metrics.dropped_patches_total.get(),
        epochs_completed_total = metrics.epochs_completed_total.get(),
        inflight_bytes = metrics.inflight_bytes.get(),
        inflight_bytes_high_water = metrics.inflight_bytes_high_water.get(),
        draw_count = draw.count,
        draw_avg_ns = draw.avg_ns(),
        "metrics"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    vqsce_observe::logging::init_tracing();
    let args = Args::parse();
    let config_label = args.config.display().to_string();

    let span = info_span!(
        "vqsce-loader",
        config = %config_label,
        seed = args.seed,
        validation = args.validation,
        num_workers = args.num_workers,
        max_queue_batches = args.max_queue_batches,
        max_queue_patches = args.max_queue_patches,
        max_inflight_bytes = args.max_inflight_bytes,
        consumer_sleep_ms = args.consumer_sleep_ms,
    );

    async move {
        let cfg = PipelineConfig::from_json_file(&args.config)?;
        cfg.validate()?;

        // Startup: everything fatal happens before any worker exists.
        let settings = IndexSettings::from_config(&cfg);
        let examples = tokio::task::spawn_blocking(move || -> Result<_> {
            let index = VolumeIndex::scan(settings, Arc::new(NpyDecoder))?;
            Ok(index.load()?)
        })
        .await??;
        let partition = FoldPartition::new(examples.len(), cfg.data.cv_folds, cfg.data.fold)?;
        let split = partition.split(&examples)?;
        let augmenter = Augmenter::from_config(&cfg)?;

        let inspection = match &args.examples_dir {
            Some(_) => {
                let patches = example_patches(&split.validation, &augmenter);
                info!(patches = patches.len(), "example patches ready");
                Arc::new(patches)
            }
            None => Arc::new(Vec::new()),
        };

        let (examples, plan) = if args.validation {
            let plan = EpochPlan {
                epochs: 1,
                shuffle: false,
                ..EpochPlan::from_config(&cfg, args.seed)
            };
            (split.validation, plan)
        } else {
            (split.training, EpochPlan::from_config(&cfg, args.seed))
        };

        let caps = RuntimeCaps {
            max_inflight_bytes: args.max_inflight_bytes,
            max_queue_batches: args.max_queue_batches,
            max_queue_patches: args.max_queue_patches,
            num_workers: args.num_workers,
        };
        let pipeline = Pipeline::new(caps);
        let metrics = pipeline.metrics();
        let source = Arc::new(AugmentedSource::new(examples, augmenter));
        let mut stream = pipeline.spawn_stream(source, plan)?;
        let cancel = stream.cancel_handle();

        let metrics_task = if args.metrics_snapshot_interval_ms > 0 {
            let interval_ms = std::cmp::max(1, args.metrics_snapshot_interval_ms);
            let metrics = metrics.clone();
            let config_label = config_label.clone();
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
                loop {
                    ticker.tick().await;
                    emit_runtime_metrics_snapshot(&metrics, &config_label);
                }
            }))
        } else {
            None
        };

        let start = Instant::now();
        info!(epochs = plan.epochs, mb_size = plan.mb_size, "starting pipeline");

        let consume = async {
            while let Some(event) = stream.next().await {
                match event {
                    StreamEvent::Batch(lease) => {
                        if args.consumer_sleep_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(args.consumer_sleep_ms)).await;
                        }
                        tracing::debug!(
                            epoch = lease.batch.epoch,
                            batch_index = lease.batch.index,
                            patches = lease.batch.patch_count(),
                            bytes = lease.bytes,
                            "batch"
                        );
                    }
                    StreamEvent::EpochComplete(summary) => {
                        let save = cfg.expt.save_every > 0
                            && (summary.epoch + 1) % cfg.expt.save_every == 0;
                        info!(
                            epoch = summary.epoch,
                            batches = summary.batches,
                            dropped = summary.patches_dropped,
                            skipped_draws = summary.skipped_draws,
                            save_due = save,
                            "epoch"
                        );
                        if let (true, Some(dir)) = (save, &args.examples_dir) {
                            let dir = dir.join(format!("epoch_{:04}", summary.epoch + 1));
                            let patches = inspection.clone();
                            let written = tokio::task::spawn_blocking(move || {
                                write_example_patches(&dir, &patches)
                            })
                            .await;
                            match written {
                                Ok(Ok(n)) => {
                                    info!(epoch = summary.epoch, patches = n, "example patches written")
                                }
                                Ok(Err(err)) => {
                                    warn!(epoch = summary.epoch, error = %err, "example patches not written")
                                }
                                Err(err) => {
                                    warn!(epoch = summary.epoch, error = %err, "example patch writer failed")
                                }
                            }
                        }
                    }
                }
            }
        };

        tokio::select! {
            _ = consume => {}
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received; cancelling");
                cancel.cancel();
            }
        }
        let summary = stream.finish().await?;

        if let Some(task) = metrics_task {
            task.abort();
        }

        let elapsed = start.elapsed();
        emit_runtime_metrics_snapshot(&metrics, &config_label);

        let delivered = metrics.delivered_patches_total.get();
        let throughput = if elapsed.as_secs_f64() > 0.0 {
            delivered as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            epochs = summary.epochs.len(),
            batches = summary.batches(),
            cancelled = summary.cancelled,
            patches_per_sec = throughput,
            inflight_bytes_high_water = metrics.inflight_bytes_high_water.get(),
            "loader complete"
        );
        Ok(())
    }
    .instrument(span)
    .await
}
