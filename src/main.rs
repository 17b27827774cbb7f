//! WSI Ingest - import pipeline for Whole Slide Images.
//!
//! This binary wires the CLI configuration into the importer, the format
//! registry and the histogram store.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_ingest::{
    bin_histogram, parse_n_bins,
    config::{Cli, Command, HistogramConfig, ImportConfig, InspectConfig},
    store, FormatRegistry, HistogramBlob, Image, ImportError, ImportOutcome, Importer,
    ImporterSettings, ListenerSet, RepresentationStore, TracingListener,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Import(config) => run_import(config).await,
        Command::Inspect(config) => run_inspect(config).await,
        Command::Histogram(config) => run_histogram(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_ingest=debug"
    } else {
        "wsi_ingest=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Import Command
// =============================================================================

async fn run_import(config: ImportConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Root: {}", config.root.display());
    info!("  Pending: {}", config.pending.display());
    info!("  Workers: {}", config.workers);

    let representations = RepresentationStore::new(&config.root);
    let settings = config.settings();

    let batch = match tokio::fs::metadata(&config.path).await {
        Ok(meta) => meta.is_dir(),
        Err(e) => {
            error!("Cannot read {}: {}", config.path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if !batch {
        let name = config.name.clone().unwrap_or_else(|| display_name(&config.path));
        let importer = Importer::new(
            FormatRegistry::default_registry(),
            representations,
            settings,
            ListenerSet::new().with(Arc::new(TracingListener::new(name))),
        );
        let result = importer.import(config.path.clone(), config.name.clone()).await;
        return if report(&config.path, result) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    if let Err(e) = tokio::fs::create_dir_all(&config.pending).await {
        error!("Cannot create pending area {}: {}", config.pending.display(), e);
        return ExitCode::FAILURE;
    }

    let files = match list_batch(&config.path).await {
        Ok(files) => files,
        Err(e) => {
            error!("Cannot list {}: {}", config.path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    info!("Importing {} file(s) from {}", files.len(), config.path.display());

    let mut failures = 0usize;
    for file in &files {
        let name = display_name(file);
        let pending_file = config.pending.join(&name);
        if let Err(e) = store::copy_file(file, &pending_file).await {
            error!("Cannot stage {}: {}", file.display(), e);
            failures += 1;
            continue;
        }

        let importer = Importer::new(
            FormatRegistry::default_registry(),
            representations.clone(),
            ImporterSettings {
                prefer_copy: false,
                ..settings.clone()
            },
            ListenerSet::new().with(Arc::new(TracingListener::new(name))),
        );
        let result = importer.import(pending_file, None).await;
        if !report(file, result) {
            failures += 1;
        }
    }

    info!("Batch finished: {} imported, {} failed", files.len() - failures, failures);
    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn list_batch(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Log the outcome of one import; true when it succeeded.
fn report(path: &Path, result: Result<ImportOutcome, ImportError>) -> bool {
    match result {
        Ok(ImportOutcome::Image(image)) => {
            info!(
                "Imported {} into {}",
                path.display(),
                image.upload_dir.display()
            );
            true
        }
        Ok(ImportOutcome::Collection(collection)) => {
            info!(
                "Imported collection {} into {}: {} succeeded, {} failed",
                path.display(),
                collection.upload_dir.display(),
                collection.succeeded(),
                collection.failed()
            );
            for child in &collection.children {
                if let Err(e) = &child.result {
                    warn!("  {}: {}", child.path.display(), e);
                }
            }
            true
        }
        Err(e) => {
            error!("Import of {} failed ({:?}): {}", path.display(), e.class(), e);
            false
        }
    }
}

// =============================================================================
// Inspect Command
// =============================================================================

async fn run_inspect(config: InspectConfig) -> ExitCode {
    init_logging(config.verbose);

    let registry = FormatRegistry::default_registry();
    let Some(format) = registry.identify(&config.path).await else {
        error!("No matching format for {}", config.path.display());
        return ExitCode::FAILURE;
    };
    let image = Image::new(format);

    let integrity: Vec<String> = image
        .check_integrity(config.lazy)
        .await
        .iter()
        .map(ToString::to_string)
        .collect();

    let summary = image.summary().await.ok();
    let pyramid = image.pyramid().await.ok();
    let normalized = image.normalized_pyramid().await.ok();
    let is_normalized = image.is_pyramid_normalized().await.ok();
    let full = image.full_metadata().await.ok();
    let raw: Option<Vec<(String, String)>> = image.raw_metadata().await.ok().map(|entries| {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    });

    let document = serde_json::json!({
        "format": image.identifier(),
        "need_conversion": image.need_conversion(),
        "summary": summary,
        "metadata": full,
        "raw_metadata": raw,
        "pyramid": pyramid,
        "normalized_pyramid": normalized,
        "is_pyramid_normalized": is_normalized,
        "integrity_errors": integrity,
    });

    match serde_json::to_string_pretty(&document) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            error!("Cannot serialize report: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if integrity.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// =============================================================================
// Histogram Command
// =============================================================================

async fn run_histogram(config: HistogramConfig) -> ExitCode {
    init_logging(config.verbose);

    let scope = match config.validate().and_then(|_| config.parsed_scope()) {
        Ok(scope) => scope,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let blob = match HistogramBlob::open(&config.path).await {
        Ok(blob) => blob,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let binned = match blob.get(scope).await.and_then(|histogram| {
        let n_bins = parse_n_bins(config.n_bins, histogram.bins.len());
        bin_histogram(&histogram, n_bins, config.full_range)
    }) {
        Ok(binned) => binned,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let resolved = blob.resolve(scope).map(|s| s.to_string()).ok();
    let report = serde_json::json!({
        "scope": scope.to_string(),
        "resolved_scope": resolved,
        "mode": blob.mode(),
        "histogram": binned,
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Cannot serialize histogram: {}", e);
            ExitCode::FAILURE
        }
    }
}
