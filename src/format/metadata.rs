//! Image metadata model returned by format plugins.
//!
//! Metadata is split in three groups so that a plugin can fail on one
//! without hiding the others from the integrity check:
//!
//! - [`MainMetadata`]: dimensions and pixel model, required for any use
//! - [`FullMetadata`]: calibration, acquisition and instrument details
//! - [`MetadataStore`]: every raw key/value the container exposes

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelType {
    Uint8,
    Uint16,
}

impl PixelType {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1..=8 => Some(PixelType::Uint8),
            9..=16 => Some(PixelType::Uint16),
            _ => None,
        }
    }

    /// Storage width in bits.
    pub const fn bits(self) -> u8 {
        match self {
            PixelType::Uint8 => 8,
            PixelType::Uint16 => 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageChannel {
    pub index: usize,
    pub suggested_name: Option<String>,

    /// Hex RGB color, e.g. "#ff0000"
    pub color: Option<String>,
}

impl ImageChannel {
    /// Channels named after their role in an interleaved pixel.
    pub fn for_samples(n: usize) -> Vec<ImageChannel> {
        let named: &[(&str, &str)] = match n {
            1 => &[("L", "#ffffff")],
            2 => &[("L", "#ffffff"), ("A", "#000000")],
            3 => &[("R", "#ff0000"), ("G", "#00ff00"), ("B", "#0000ff")],
            4 => &[
                ("R", "#ff0000"),
                ("G", "#00ff00"),
                ("B", "#0000ff"),
                ("A", "#000000"),
            ],
            _ => &[],
        };

        (0..n)
            .map(|index| ImageChannel {
                index,
                suggested_name: named.get(index).map(|(name, _)| name.to_string()),
                color: named.get(index).map(|(_, color)| color.to_string()),
            })
            .collect()
    }
}

/// Dimensions and pixel model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MainMetadata {
    pub width: u32,
    pub height: u32,

    /// Number of focal planes
    pub depth: u32,

    /// Number of timepoints
    pub duration: u32,

    /// Samples per pixel, across all intrinsic channels
    pub n_channels: usize,

    /// Channels stored as separate planes (an RGB image has one)
    pub n_intrinsic_channels: usize,

    pub pixel_type: PixelType,
    pub significant_bits: u8,
    pub channels: Vec<ImageChannel>,
}

impl MainMetadata {
    /// Metadata of a single-plane image with interleaved samples.
    pub fn interleaved(width: u32, height: u32, samples: usize, bits: u8) -> Option<Self> {
        Some(Self {
            width,
            height,
            depth: 1,
            duration: 1,
            n_channels: samples,
            n_intrinsic_channels: 1,
            pixel_type: PixelType::from_bits(bits)?,
            significant_bits: bits,
            channels: ImageChannel::for_samples(samples),
        })
    }

    pub fn n_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn n_planes(&self) -> usize {
        self.n_channels * self.depth as usize * self.duration as usize
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Objective {
    pub nominal_magnification: Option<f64>,
    pub calibrated_magnification: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Microscope {
    pub model: Option<String>,
}

/// Dimensions of a label, macro or thumbnail stored next to the main image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssociatedImage {
    pub width: u32,
    pub height: u32,
    pub n_channels: usize,
}

/// Optional descriptive metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FullMetadata {
    /// Micrometers per pixel
    pub physical_size_x: Option<f64>,
    pub physical_size_y: Option<f64>,
    pub physical_size_z: Option<f64>,
    pub frame_rate: Option<f64>,
    pub description: Option<String>,
    pub acquisition_datetime: Option<NaiveDateTime>,
    pub objective: Objective,
    pub microscope: Microscope,
    pub associated_thumb: Option<AssociatedImage>,
    pub associated_label: Option<AssociatedImage>,
    pub associated_macro: Option<AssociatedImage>,
}

// =============================================================================
// Raw metadata
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Integer(v) => write!(f, "{v}"),
            MetadataValue::Decimal(v) => write!(f, "{v}"),
            MetadataValue::Text(v) => f.write_str(v),
        }
    }
}

impl MetadataValue {
    /// Parse free text, preferring numbers when the text is numeric.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Ok(v) = text.parse::<i64>() {
            MetadataValue::Integer(v)
        } else if let Ok(v) = text.parse::<f64>() {
            MetadataValue::Decimal(v)
        } else {
            MetadataValue::Text(text.to_string())
        }
    }
}

/// Raw key/value metadata, keys namespaced as `NAMESPACE.key`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataStore {
    entries: BTreeMap<String, MetadataValue>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, namespace: &str, key: &str, value: MetadataValue) {
        self.entries
            .insert(format!("{}.{}", namespace.to_uppercase(), key), value);
    }

    pub fn get(&self, namespaced_key: &str) -> Option<&MetadataValue> {
        self.entries.get(namespaced_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.entries.iter()
    }
}

/// Parse the TIFF/EXIF "YYYY:MM:DD HH:MM:SS" datetime form.
pub fn parse_tiff_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y:%m:%d %H:%M:%S").ok()
}
