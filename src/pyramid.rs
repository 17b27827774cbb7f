//! Multi-resolution pyramid model.
//!
//! A [`Pyramid`] is an ordered list of [`PyramidTier`]s. Tier 0 is the full
//! resolution image; every following tier is strictly smaller in both
//! dimensions.
//!
//! Two constructors exist:
//!
//! - [`Pyramid::synthesize_normalized`] derives a deterministic pyramid from
//!   the base dimensions alone, by repeated halving
//! - [`Pyramid::from_native_tiers`] keeps the tiers a format already stores,
//!   with their own tile sizes and factors
//!
//! ```text
//!  level 0   ██████████████████  4096 x 3072   downsample 1
//!  level 1   █████████           2048 x 1536   downsample 2
//!  level 2   ████▌               1024 x 768    downsample 4
//!  level 3   ██▎                  512 x 384    downsample 8
//!  level 4   █                    256 x 192    downsample 16  (192 < 256, stop)
//! ```
//!
//! Zoom numbering runs the other way: zoom 0 is the smallest tier, as tiling
//! clients expect.

use serde::Serialize;

/// Tile edge used by normalized pyramids and converted files.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Halving stops once a tier side falls below this.
pub const DEFAULT_MIN_TIER_DIM: u32 = 256;

// =============================================================================
// PyramidTier
// =============================================================================

/// A single resolution level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PyramidTier {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,

    /// Base width over tier width
    pub width_factor: f64,

    /// Base height over tier height
    pub height_factor: f64,
}

impl PyramidTier {
    fn new(width: u32, height: u32, tile_width: u32, tile_height: u32, base: (u32, u32)) -> Self {
        Self {
            width,
            height,
            tile_width,
            tile_height,
            width_factor: base.0 as f64 / width as f64,
            height_factor: base.1 as f64 / height as f64,
        }
    }

    /// Downsampling factor relative to the base tier.
    #[inline]
    pub fn downsample(&self) -> f64 {
        self.width_factor
    }

    #[inline]
    pub fn n_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Number of tile columns, counting a partial last column.
    #[inline]
    pub fn tiles_x(&self) -> u32 {
        self.width.div_ceil(self.tile_width.max(1))
    }

    /// Number of tile rows, counting a partial last row.
    #[inline]
    pub fn tiles_y(&self) -> u32 {
        self.height.div_ceil(self.tile_height.max(1))
    }

    #[inline]
    pub fn tile_count(&self) -> u32 {
        self.tiles_x() * self.tiles_y()
    }

    /// Row-major index of a tile, or None when out of bounds.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<u32> {
        if tile_x >= self.tiles_x() || tile_y >= self.tiles_y() {
            return None;
        }
        Some(tile_y * self.tiles_x() + tile_x)
    }

    /// Pixel size of a tile. Tiles on the right and bottom edges are clipped.
    pub fn tile_dimensions(&self, tile_x: u32, tile_y: u32) -> Option<(u32, u32)> {
        if tile_x >= self.tiles_x() || tile_y >= self.tiles_y() {
            return None;
        }

        let w = (self.width - tile_x * self.tile_width).min(self.tile_width);
        let h = (self.height - tile_y * self.tile_height).min(self.tile_height);
        Some((w, h))
    }
}

// =============================================================================
// Native tier descriptors
// =============================================================================

/// A resolution level as reported by a format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierDescriptor {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,

    /// Factor stored by the format, if any. Computed from the base otherwise.
    pub downsample: Option<f64>,
}

// =============================================================================
// Pyramid
// =============================================================================

/// Ordered tiers, largest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Pyramid {
    tiers: Vec<PyramidTier>,
}

impl Pyramid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the normalized pyramid for an image of `width` x `height`.
    ///
    /// The base is always recorded. Dimensions are then halved (floor) and a
    /// tier recorded per step, as long as both sides of the previous tier are
    /// at least `min_tier_dim`. An image with a side already below
    /// `min_tier_dim` therefore has exactly one tier.
    pub fn synthesize_normalized(width: u32, height: u32, min_tier_dim: u32, tile_size: u32) -> Self {
        let mut tiers = Vec::new();
        let base = (width, height);
        let (mut w, mut h) = base;

        loop {
            tiers.push(PyramidTier::new(w, h, tile_size, tile_size, base));

            if w < min_tier_dim || h < min_tier_dim || w < 2 || h < 2 {
                break;
            }
            w /= 2;
            h /= 2;
        }

        Self { tiers }
    }

    /// Build a pyramid from the tiers a format stores natively.
    ///
    /// Descriptors are ordered by decreasing pixel count. Empty tiers and tiers
    /// that are not strictly smaller than the previous kept tier are dropped.
    pub fn from_native_tiers(descriptors: &[TierDescriptor]) -> Self {
        let mut sorted: Vec<TierDescriptor> = descriptors
            .iter()
            .copied()
            .filter(|d| d.width > 0 && d.height > 0)
            .collect();
        sorted.sort_by_key(|d| std::cmp::Reverse(d.width as u64 * d.height as u64));

        let mut tiers: Vec<PyramidTier> = Vec::with_capacity(sorted.len());
        let mut base = (0, 0);

        for d in sorted {
            if let Some(last) = tiers.last() {
                if d.width >= last.width || d.height >= last.height {
                    continue;
                }
            } else {
                base = (d.width, d.height);
            }

            let mut tier = PyramidTier::new(d.width, d.height, d.tile_width, d.tile_height, base);
            if let Some(factor) = d.downsample {
                tier.width_factor = factor;
                tier.height_factor = factor;
            }
            tiers.push(tier);
        }

        Self { tiers }
    }

    /// Insert a tier, keeping decreasing pixel order. Factors are recomputed
    /// since the base may change.
    pub fn insert_tier(&mut self, width: u32, height: u32, tile_width: u32, tile_height: u32) {
        let n_pixels = width as u64 * height as u64;
        let position = self
            .tiers
            .iter()
            .position(|t| t.n_pixels() < n_pixels)
            .unwrap_or(self.tiers.len());
        self.tiers.insert(
            position,
            PyramidTier::new(width, height, tile_width, tile_height, (width, height)),
        );

        let base = (self.tiers[0].width, self.tiers[0].height);
        for tier in &mut self.tiers {
            tier.width_factor = base.0 as f64 / tier.width as f64;
            tier.height_factor = base.1 as f64 / tier.height as f64;
        }
    }

    #[inline]
    pub fn n_levels(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Highest level index (smallest tier). Zero for an empty pyramid.
    pub fn max_level(&self) -> usize {
        self.tiers.len().saturating_sub(1)
    }

    pub fn max_zoom(&self) -> usize {
        self.max_level()
    }

    pub fn zoom_to_level(&self, zoom: usize) -> Option<usize> {
        self.max_zoom().checked_sub(zoom)
    }

    pub fn level_to_zoom(&self, level: usize) -> Option<usize> {
        self.max_level().checked_sub(level)
    }

    pub fn tier_at_level(&self, level: usize) -> Option<&PyramidTier> {
        self.tiers.get(level)
    }

    pub fn tier_at_zoom(&self, zoom: usize) -> Option<&PyramidTier> {
        self.zoom_to_level(zoom).and_then(|l| self.tiers.get(l))
    }

    pub fn base(&self) -> Option<&PyramidTier> {
        self.tiers.first()
    }

    pub fn tiers(&self) -> &[PyramidTier] {
        &self.tiers
    }

    pub fn iter(&self) -> impl Iterator<Item = &PyramidTier> {
        self.tiers.iter()
    }

    /// Level of the smallest tier still at least as detailed as `downsample`.
    pub fn best_level_for_downsample(&self, downsample: f64) -> Option<usize> {
        self.tiers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.downsample() <= downsample * 1.01)
            .last()
            .map(|(level, _)| level)
            .or(if self.tiers.is_empty() { None } else { Some(0) })
    }

    /// Whether this pyramid has the same tier and tile dimensions as the
    /// normalized one. Stored downsample factors are not compared.
    pub fn is_normalized(&self, min_tier_dim: u32, tile_size: u32) -> bool {
        match self.base() {
            Some(base) => {
                let normalized =
                    Self::synthesize_normalized(base.width, base.height, min_tier_dim, tile_size);
                self.tier_shapes() == normalized.tier_shapes()
            }
            None => false,
        }
    }

    fn tier_shapes(&self) -> Vec<(u32, u32, u32, u32)> {
        self.tiers
            .iter()
            .map(|t| (t.width, t.height, t.tile_width, t.tile_height))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
