//! Test utilities for integration tests.
//!
//! Fixture builders for every supported container, a store/pending area
//! layout in a temporary directory, and a listener recording the event
//! stream of an import.

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat as Codec, Rgb, RgbImage};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use wsi_ingest::format::tiff::{write_pyramidal_tiff, write_pyramidal_tiff_with, TileEncoding};
use wsi_ingest::{
    ConversionOptions, FormatError, FormatPlugin, FormatRegistry, FullMetadata, ImageFormat,
    ImportEvent, ImportEventKind, ImportListener, Importer, ImporterSettings, ListenerSet,
    MainMetadata, MetadataStore, Pyramid, Raster, RepresentationStore,
};

// =============================================================================
// Store layout
// =============================================================================

/// A store root and a pending area inside one temporary directory.
pub struct Workspace {
    _tmp: TempDir,
    pub root: PathBuf,
    pub pending: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let pending = tmp.path().join("pending");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&pending).unwrap();
        Self {
            _tmp: tmp,
            root,
            pending,
        }
    }

    pub fn pending_file(&self, name: &str) -> PathBuf {
        self.pending.join(name)
    }

    /// A directory next to the pending area, outside of it.
    pub fn elsewhere(&self, name: &str) -> PathBuf {
        let dir = self.root.parent().unwrap().join("elsewhere");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    pub fn settings(&self) -> ImporterSettings {
        ImporterSettings::new(&self.pending)
    }

    pub fn importer(&self, recorder: &Arc<RecordingListener>) -> Importer {
        self.importer_with(self.settings(), recorder)
    }

    pub fn importer_with(
        &self,
        settings: ImporterSettings,
        recorder: &Arc<RecordingListener>,
    ) -> Importer {
        self.importer_for(FormatRegistry::default_registry(), settings, recorder)
    }

    pub fn importer_for(
        &self,
        registry: FormatRegistry,
        settings: ImporterSettings,
        recorder: &Arc<RecordingListener>,
    ) -> Importer {
        Importer::new(
            registry,
            RepresentationStore::new(&self.root),
            settings,
            ListenerSet::new().with(recorder.clone()),
        )
    }

    /// Upload directories created so far.
    pub fn upload_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(&self.root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        dirs.sort();
        dirs
    }
}

// =============================================================================
// Recording listener
// =============================================================================

/// Keeps every event it receives, in order.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ImportEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ImportEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<ImportEventKind> {
        self.events().iter().map(ImportEvent::kind).collect()
    }

    pub fn count(&self, kind: ImportEventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

impl ImportListener for RecordingListener {
    fn on_event(&self, event: &ImportEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Assert that `expected` appears in `kinds` in order, gaps allowed.
pub fn assert_in_order(kinds: &[ImportEventKind], expected: &[ImportEventKind]) {
    let mut remaining = kinds.iter();
    for wanted in expected {
        assert!(
            remaining.any(|k| k == wanted),
            "{wanted} missing or out of order in {kinds:?}"
        );
    }
}

// =============================================================================
// Scripted format
// =============================================================================

pub const SCRIPTED_MAGIC: &[u8] = b"SCRIPTED";

/// How a [`ScriptedPlugin`] file misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Needs conversion; the converter reports success but writes nothing
    SilentConversion,
    /// Spatial, but every calibration attribute fails to parse
    BrokenCalibration,
    /// Neither spatial nor convertible
    Inert,
}

/// Format of files starting with [`SCRIPTED_MAGIC`], behaving per [`Script`].
pub struct ScriptedPlugin(pub Script);

impl ScriptedPlugin {
    pub fn registry(script: Script) -> FormatRegistry {
        FormatRegistry::new(vec![Arc::new(ScriptedPlugin(script))])
    }
}

#[async_trait]
impl FormatPlugin for ScriptedPlugin {
    fn identifier(&self) -> &'static str {
        "SCRIPTED"
    }

    fn name(&self) -> &'static str {
        "Scripted test format"
    }

    fn is_spatial(&self) -> bool {
        self.0 != Script::Inert
    }

    fn signature_matches(&self, signature: &[u8]) -> bool {
        signature.starts_with(SCRIPTED_MAGIC)
    }

    async fn probe(&self, path: &Path) -> Result<Box<dyn ImageFormat>, FormatError> {
        Ok(Box::new(ScriptedImage {
            script: self.0,
            path: path.to_path_buf(),
        }))
    }
}

struct ScriptedImage {
    script: Script,
    path: PathBuf,
}

#[async_trait]
impl ImageFormat for ScriptedImage {
    fn identifier(&self) -> &'static str {
        "SCRIPTED"
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn is_spatial(&self) -> bool {
        self.script == Script::BrokenCalibration
    }

    fn need_conversion(&self) -> bool {
        self.script == Script::SilentConversion
    }

    fn conversion_format(&self) -> Option<&'static str> {
        self.need_conversion().then_some("PYRTIFF")
    }

    async fn convert(&self, _: &Path, _: &ConversionOptions) -> Result<bool, FormatError> {
        Ok(true)
    }

    async fn main_metadata(&self) -> Result<MainMetadata, FormatError> {
        Ok(MainMetadata::interleaved(64, 48, 3, 8).unwrap())
    }

    async fn full_metadata(&self) -> Result<FullMetadata, FormatError> {
        match self.script {
            Script::BrokenCalibration => Err(FormatError::MissingMetadata("calibration")),
            _ => Ok(FullMetadata::default()),
        }
    }

    async fn raw_metadata(&self) -> Result<MetadataStore, FormatError> {
        Ok(MetadataStore::new())
    }

    async fn read_thumbnail(&self, _: u32, _: u32, _: u32) -> Result<Raster, FormatError> {
        Ok(Raster::new(64, 48, 3, 8))
    }
}

pub fn write_scripted(path: &Path) -> PathBuf {
    write_file(path, &[SCRIPTED_MAGIC, b" payload"].concat())
}

// =============================================================================
// Raster fixtures
// =============================================================================

/// RGB pixels that compress poorly, so truncation always cuts pixel data.
pub fn noisy_rgb(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let v = x.wrapping_mul(2_654_435_761).wrapping_add(y.wrapping_mul(40_503));
        Rgb([(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8])
    })
}

/// Two-valued RGB pixels with known intensities.
pub fn striped_rgb(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, _| {
        Rgb([10, if x % 2 == 0 { 20 } else { 30 }, 40])
    })
}

pub fn encode(image: &RgbImage, codec: Codec) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, codec).unwrap();
    out.into_inner()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&striped_rgb(width, height), Codec::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&striped_rgb(width, height))
        .unwrap();
    out
}

pub fn bmp_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&striped_rgb(width, height), Codec::Bmp)
}

/// A PNG whose header is intact but whose pixel data is cut in half.
pub fn truncated_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let full = encode(&noisy_rgb(width, height), Codec::Png);
    full[..full.len() / 2].to_vec()
}

pub fn write_file(path: &Path, bytes: &[u8]) -> PathBuf {
    std::fs::write(path, bytes).unwrap();
    path.to_path_buf()
}

// =============================================================================
// TIFF fixtures
// =============================================================================

fn uniform_raster(width: u32, height: u32, value: u16) -> Raster {
    let mut raster = Raster::new(width, height, 3, 8);
    raster.samples.iter_mut().for_each(|s| *s = value);
    raster
}

/// Tiled pyramidal TIFF with a normalized pyramid.
pub fn write_pyramidal(path: &Path, width: u32, height: u32, description: Option<&str>) {
    let raster = uniform_raster(width, height, 100);
    let pyramid = Pyramid::synthesize_normalized(width, height, 256, 256);
    write_pyramidal_tiff(path, &raster, &pyramid, description).unwrap();
}

pub const APERIO_DESCRIPTION: &str = "Aperio Image Library v12.0.15\n\
    800x600 (256x256) RAW|AppMag = 20|MPP = 0.5|Date = 03/14/22|Time = 10:11:12";

/// SVS-like TIFF: a pyramidal TIFF carrying an Aperio description.
pub fn write_svs(path: &Path, width: u32, height: u32) {
    write_pyramidal(path, width, height, Some(APERIO_DESCRIPTION));
}

/// SVS as scanners write it: abbreviated JPEG tiles sharing `JPEGTables`.
pub fn write_jpeg_svs(path: &Path, width: u32, height: u32) {
    let raster = uniform_raster(width, height, 100);
    let pyramid = Pyramid::synthesize_normalized(width, height, 256, 256);
    write_pyramidal_tiff_with(
        path,
        &raster,
        &pyramid,
        Some(APERIO_DESCRIPTION),
        TileEncoding::Jpeg { quality: 90 },
    )
    .unwrap();
}

// =============================================================================
// Archive fixtures
// =============================================================================

pub fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) -> PathBuf {
    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
    path.to_path_buf()
}

pub fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}
