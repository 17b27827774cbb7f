//! Format-level integration tests.
//!
//! Tests verify:
//! - Registry identification picks the most specific plugin
//! - Archives are never identified as images
//! - Metadata of SVS and raster files through the memoizing image view
//! - Conversion of large rasters into normalized pyramidal TIFF

use tempfile::TempDir;

use wsi_ingest::{ArchiveFormat, ConversionOptions, FormatRegistry, Image, PixelType, Pyramid};

use super::test_utils::{
    bmp_bytes, jpeg_bytes, png_bytes, write_file, write_pyramidal, write_svs, write_zip,
};

#[tokio::test]
async fn test_identification_across_formats() {
    let dir = TempDir::new().unwrap();
    let registry = FormatRegistry::default_registry();

    let svs = dir.path().join("slide.svs");
    write_svs(&svs, 600, 400);
    let tif = dir.path().join("plain.tif");
    write_pyramidal(&tif, 600, 400, Some("generic pyramid"));
    let png = write_file(&dir.path().join("a.png"), &png_bytes(8, 8));
    let jpg = write_file(&dir.path().join("a.jpg"), &jpeg_bytes(8, 8));
    let bmp = write_file(&dir.path().join("a.bmp"), &bmp_bytes(8, 8));

    for (path, expected) in [
        (&svs, "SVS"),
        (&tif, "PYRTIFF"),
        (&png, "PNG"),
        (&jpg, "JPEG"),
        (&bmp, "BMP"),
    ] {
        let format = registry.identify(path).await.unwrap();
        assert_eq!(format.identifier(), expected, "{}", path.display());
    }

    // Extensions play no part in identification
    let disguised = write_file(&dir.path().join("image.svs"), &png_bytes(8, 8));
    assert_eq!(
        registry.identify(&disguised).await.unwrap().identifier(),
        "PNG"
    );

    let zip = write_zip(&dir.path().join("a.zip"), &[("a.png", png_bytes(8, 8))]);
    assert!(registry.identify(&zip).await.is_none());
    assert!(ArchiveFormat.detect(&zip).await);
    assert!(!ArchiveFormat.detect(&png).await);
}

#[tokio::test]
async fn test_svs_metadata_through_image() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("slide.svs");
    write_svs(&path, 800, 600);

    let format = FormatRegistry::default_registry().identify(&path).await.unwrap();
    let image = Image::new(format);

    assert!(!image.need_conversion());
    assert_eq!(image.width().await.unwrap(), 800);
    assert_eq!(image.height().await.unwrap(), 600);
    assert_eq!(image.pixel_type().await.unwrap(), PixelType::Uint8);
    assert_eq!(image.physical_size_x().await.unwrap(), Some(0.5));
    assert_eq!(
        image.objective().await.unwrap().nominal_magnification,
        Some(20.0)
    );
    assert!(image.acquisition_datetime().await.unwrap().is_some());
    assert!(image.check_integrity(false).await.is_empty());

    let pyramid = image.pyramid().await.unwrap();
    assert_eq!(pyramid.n_levels(), 3);
    assert!(image.is_pyramid_normalized().await.unwrap());

    let thumb = image.read_thumbnail(128, 0, 0).await.unwrap();
    assert!(thumb.width <= 128 && thumb.height <= 128);
    assert_eq!(thumb.channels, 3);
}

#[tokio::test]
async fn test_small_raster_has_single_tier() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir.path().join("a.png"), &png_bytes(600, 400));
    let format = FormatRegistry::default_registry().identify(&path).await.unwrap();
    let image = Image::new(format);

    assert!(!image.need_conversion());
    assert_eq!(image.pyramid().await.unwrap().n_levels(), 1);
    assert_eq!(
        image.normalized_pyramid().await.unwrap(),
        &Pyramid::synthesize_normalized(600, 400, 256, 256)
    );
    assert!(!image.is_pyramid_normalized().await.unwrap());

    let summary = image.summary().await.unwrap();
    assert_eq!(summary.format, "PNG");
    assert_eq!(summary.n_tiers, 1);
}

#[tokio::test]
async fn test_jpeg_conversion_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir.path().join("big.jpg"), &jpeg_bytes(1030, 1100));
    let registry = FormatRegistry::default_registry();
    let source = Image::new(registry.identify(&path).await.unwrap());

    assert!(source.need_conversion());
    assert_eq!(source.conversion_format(), Some("PYRTIFF"));

    let target = dir.path().join("spatial.PYRTIFF");
    let options = ConversionOptions::default();
    assert!(source.convert(&target, &options).await.unwrap());

    // Only spatial plugins are consulted for converted files
    let converted = Image::new(registry.spatial().identify(&target).await.unwrap());
    assert_eq!(converted.identifier(), "PYRTIFF");
    assert_eq!(converted.width().await.unwrap(), 1030);
    assert_eq!(converted.height().await.unwrap(), 1100);
    assert_eq!(converted.n_channels().await.unwrap(), 3);
    assert!(converted.is_pyramid_normalized().await.unwrap());
    let dims: Vec<(u32, u32)> = converted
        .pyramid()
        .await
        .unwrap()
        .iter()
        .map(|t| (t.width, t.height))
        .collect();
    assert_eq!(dims, vec![(1030, 1100), (515, 550), (257, 275), (128, 137)]);
    assert!(converted.check_integrity(false).await.is_empty());
}
