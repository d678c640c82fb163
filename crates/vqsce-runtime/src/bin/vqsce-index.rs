#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, info_span, warn};

use vqsce_core::config::PipelineConfig;
use vqsce_index::{FoldPartition, IndexSettings, NpyDecoder, VolumeIndex};

/// Lists the pairs a config would train on, the files it rejects and the fold
/// of every example.
#[derive(Debug, Parser)]
#[command(name = "vqsce-index")]
struct Args {
    #[arg(long, env = "VQSCE_CONFIG")]
    config: PathBuf,

    /// Also decode every pair and report the ones that fail.
    #[arg(long, env = "VQSCE_INDEX_DECODE", default_value_t = false)]
    decode: bool,
}

fn main() -> Result<()> {
    vqsce_observe::logging::init_tracing();
    let args = Args::parse();
    let _guard = info_span!("vqsce-index", config = %args.config.display()).entered();

    let cfg = PipelineConfig::from_json_file(&args.config)?;
    cfg.validate()?;

    let index = VolumeIndex::scan(IndexSettings::from_config(&cfg), Arc::new(NpyDecoder))?;
    for err in index.rejected() {
        warn!(error = %err, "rejected");
    }

    let partition = FoldPartition::new(index.len(), cfg.data.cv_folds, cfg.data.fold)?;
    for (position, pair) in index.pairs().iter().enumerate() {
        let fold = partition.fold_of(position);
        info!(
            position,
            example_id = %pair.id,
            fold,
            held_out = partition.has_holdout() && fold == partition.fold(),
            source = %pair.source.display(),
            target = %pair.target.display(),
            "pair"
        );
    }

    if args.decode {
        let mut failed = 0usize;
        for (pair, res) in index.pairs().iter().zip(index.iter()) {
            match res {
                Ok(ex) => info!(
                    example_id = %ex.id,
                    source_dims = %ex.source_dims(),
                    target_dims = %ex.target_dims(),
                    "decoded"
                ),
                Err(err) => {
                    failed += 1;
                    warn!(example_id = %pair.id, error = %err, "decode failed");
                }
            }
        }
        info!(decoded = index.len() - failed, failed, "decode pass complete");
    }

    info!(
        pairs = index.len(),
        rejected = index.rejected().len(),
        cv_folds = partition.cv_folds(),
        fold = partition.fold(),
        "index complete"
    );
    Ok(())
}
