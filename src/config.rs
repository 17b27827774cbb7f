//! Command-line configuration for WSI Ingest.
//!
//! Three subcommands share one binary:
//!
//! - `import` - move pending files into the store and derive their
//!   representations
//! - `inspect` - identify a file and print its metadata and pyramids
//! - `histogram` - query a histogram blob
//!
//! # Environment Variables
//!
//! - `WSI_INGEST_ROOT` - Store root holding upload directories (required for import)
//! - `WSI_INGEST_PENDING` - Pending area pending files must live in (required for import)
//! - `WSI_INGEST_WORKERS` - Collection children imported at once (default: 4)
//!
//! The library never reads these: the binary turns them into an
//! [`ImporterSettings`](crate::importer::ImporterSettings).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::format::ConversionOptions;
use crate::histogram::{HistogramMode, HistogramScope};
use crate::importer::{ImporterSettings, DEFAULT_WORKERS};
use crate::pyramid::{DEFAULT_MIN_TIER_DIM, DEFAULT_TILE_SIZE};

// =============================================================================
// Default Values
// =============================================================================

/// Default number of histogram bins returned by `histogram`.
pub const DEFAULT_N_BINS: usize = 256;

/// Largest tile edge accepted for conversions.
pub const MAX_TILE_SIZE: u32 = 4096;

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI Ingest - import pipeline for Whole Slide Images.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Import a pending file, or every file of a directory.
    Import(ImportConfig),

    /// Identify a file and print its metadata, pyramids and integrity.
    Inspect(InspectConfig),

    /// Print a histogram from a histogram blob.
    Histogram(HistogramConfig),
}

// =============================================================================
// Import
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ImportConfig {
    /// File to import, or a directory whose files are imported one by one.
    pub path: PathBuf,

    /// Store root in which upload directories are created.
    #[arg(long, env = "WSI_INGEST_ROOT")]
    pub root: PathBuf,

    /// Pending area top-level files are imported from.
    #[arg(long, env = "WSI_INGEST_PENDING")]
    pub pending: PathBuf,

    /// Number of collection children imported concurrently.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "WSI_INGEST_WORKERS")]
    pub workers: usize,

    /// Copy the pending file instead of moving it.
    #[arg(long, default_value_t = false)]
    pub copy: bool,

    /// Name stored for the upload (single file imports only).
    #[arg(long)]
    pub name: Option<String>,

    /// Smallest tier edge of synthesized pyramids.
    #[arg(long, default_value_t = DEFAULT_MIN_TIER_DIM)]
    pub min_tier_dim: u32,

    /// Tile edge of converted pyramidal files.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: u32,

    /// Store converted tiles as JPEG of this quality (1-100) instead of raw.
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Fail instead of replacing an existing histogram.
    #[arg(long, default_value_t = false)]
    pub no_overwrite_histogram: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ImportConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE || self.tile_size % 16 != 0 {
            return Err(format!(
                "tile_size must be a multiple of 16 between 16 and {MAX_TILE_SIZE}"
            ));
        }
        if self.min_tier_dim == 0 {
            return Err("min_tier_dim must be greater than 0".to_string());
        }
        if let Some(quality) = self.jpeg_quality {
            if !(1..=100).contains(&quality) {
                return Err("jpeg_quality must be between 1 and 100".to_string());
            }
        }
        if self.root == self.pending {
            return Err("root and pending must be different directories".to_string());
        }
        if let Some(name) = &self.name {
            if name.is_empty() || name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
                return Err("name must be a plain file name".to_string());
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> ImporterSettings {
        ImporterSettings {
            pending_dir: self.pending.clone(),
            workers: self.workers,
            prefer_copy: self.copy,
            conversion: ConversionOptions {
                tile_size: self.tile_size,
                min_tier_dim: self.min_tier_dim,
                jpeg_quality: self.jpeg_quality,
            },
            histogram_mode: HistogramMode::Fast,
            overwrite_histogram: !self.no_overwrite_histogram,
        }
    }
}

// =============================================================================
// Inspect
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// File to identify.
    pub path: PathBuf,

    /// Stop the integrity check at the first failing attribute.
    #[arg(long, default_value_t = false)]
    pub lazy: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Histogram
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct HistogramConfig {
    /// Histogram blob, usually `<upload>/processed/histogram`.
    pub path: PathBuf,

    /// Scope: `image`, `channel:<c>` or `plane:<c>:<z>:<t>`.
    #[arg(long, default_value = "image")]
    pub scope: String,

    /// Number of bins, a power of two; clamped to the raw length.
    #[arg(long, default_value_t = DEFAULT_N_BINS)]
    pub n_bins: usize,

    /// Return every bin instead of the non-empty window.
    #[arg(long, default_value_t = false)]
    pub full_range: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl HistogramConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.parsed_scope().map(drop)?;
        if self.n_bins == 0 {
            return Err("n_bins must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn parsed_scope(&self) -> Result<HistogramScope, String> {
        self.scope.parse().map_err(|e| format!("{e}"))
    }
}

// =============================================================================
// Tests
// =============================================================================
