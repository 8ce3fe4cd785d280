use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use fw_data::{DatasetSource, FileRegistry, PipelineConfig};
use fw_types::ConfigMap;
use serde_json::json;
use tracing::info;

const USAGE: &str = "usage: fw-kfold <dataset> <folds> [options.json]";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 || args.len() > 3 {
        bail!(USAGE);
    }
    let dataset = PathBuf::from(&args[0]);
    let folds: usize = args[1]
        .parse()
        .with_context(|| format!("folds must be a positive integer, got {:?}", args[1]))?;
    let options: ConfigMap = match args.get(2) {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading options from {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing options in {path}"))?
        }
        None => ConfigMap::new(),
    };

    let config = PipelineConfig::from_env();
    info!(
        "Using trainer {} with caches in {}",
        config.trainer_program.display(),
        config.cache_dir.display()
    );

    let registry = Arc::new(config.local_registry()?);
    let partitioner = config.partitioner(registry.clone())?;
    let table = partitioner.k_fold(DatasetSource::from_path(dataset), folds, &options)?;

    let mut report = Vec::with_capacity(table.len());
    for (fold, caches) in table.iter() {
        report.push(json!({
            "fold": fold,
            "train": { "name": caches.train, "path": registry.get(&caches.train)? },
            "test": { "name": caches.test, "path": registry.get(&caches.test)? },
        }));
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    // the caches outlive this process
    let kept = registry.scope().release();
    info!("Kept {} cache files for run {}", kept.len(), partitioner.run_prefix());
    Ok(())
}
