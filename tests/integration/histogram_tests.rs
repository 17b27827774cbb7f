//! Histogram blob tests against imported images.
//!
//! Tests verify:
//! - Stored scopes follow the plane layout of the image
//! - Lookups fall back to broader scopes
//! - Binning, bounds and full-range output
//! - Existing blobs are only replaced when asked

use wsi_ingest::{
    bin_histogram, histogram, parse_n_bins, FormatRegistry, HistogramBlob, HistogramError,
    HistogramMode, HistogramScope, Image, ImportOutcome, ImportedImage,
};

use super::test_utils::{png_bytes, write_file, RecordingListener, Workspace};

/// Import a 64x32 striped PNG: R=10, G alternating 20/30, B=40.
async fn imported_striped(ws: &Workspace) -> ImportedImage {
    let recorder = RecordingListener::new();
    let pending = write_file(&ws.pending_file("striped.png"), &png_bytes(64, 32));
    match ws.importer(&recorder).import(&pending, None).await.unwrap() {
        ImportOutcome::Image(image) => *image,
        ImportOutcome::Collection(_) => panic!("expected an image"),
    }
}

#[tokio::test]
async fn test_blob_layout_of_rgb_image() {
    let ws = Workspace::new();
    let image = imported_striped(&ws).await;
    let blob = HistogramBlob::open(&image.histogram).await.unwrap();

    assert_eq!(blob.mode(), HistogramMode::Complete);
    assert_eq!(blob.significant_bits(), 8);
    assert_eq!(blob.n_values(), 256);
    assert_eq!(blob.shape().n_channels, 3);

    let mut stored = blob.stored_scopes();
    stored.sort();
    assert_eq!(
        stored,
        vec![
            HistogramScope::Image,
            HistogramScope::Channel(0),
            HistogramScope::Channel(1),
            HistogramScope::Channel(2),
        ]
    );

    let whole = blob.get(HistogramScope::Image).await.unwrap();
    assert_eq!(whole.total(), 3 * 64 * 32);
    assert_eq!(whole.bounds(), (10, 40));
    assert_eq!(whole.bins[10], 2048);
    assert_eq!(whole.bins[20], 1024);
    assert_eq!(whole.bins[30], 1024);
    assert_eq!(whole.bins[40], 2048);
    assert_eq!(whole.range, (0, 255));
}

#[tokio::test]
async fn test_plane_scope_falls_back_to_channel() {
    let ws = Workspace::new();
    let image = imported_striped(&ws).await;
    let blob = HistogramBlob::open(&image.histogram).await.unwrap();

    let plane = HistogramScope::Plane { c: 1, z: 0, t: 0 };
    assert_eq!(blob.resolve(plane).unwrap(), HistogramScope::Channel(1));

    let green = blob.get(plane).await.unwrap();
    assert_eq!(green, blob.get(HistogramScope::Channel(1)).await.unwrap());
    assert_eq!(green.bounds(), (20, 30));

    assert!(matches!(
        blob.get(HistogramScope::Channel(3)).await,
        Err(HistogramError::UnknownScope(_))
    ));
    assert!(blob
        .resolve(HistogramScope::Plane { c: 0, z: 1, t: 0 })
        .is_err());
}

#[tokio::test]
async fn test_binning_queries() {
    let ws = Workspace::new();
    let image = imported_striped(&ws).await;
    let blob = HistogramBlob::open(&image.histogram).await.unwrap();
    let green = blob.get(HistogramScope::Channel(1)).await.unwrap();

    // Requests above the raw length are clamped
    let n_bins = parse_n_bins(4096, green.bins.len());
    assert_eq!(n_bins, 256);

    let raw = bin_histogram(&green, n_bins, false).unwrap();
    assert_eq!((raw.first_bin, raw.last_bin), (20, 30));
    assert_eq!(raw.histogram.len(), 11);
    assert_eq!(raw.histogram[0], 1024);
    assert_eq!(raw.histogram[10], 1024);
    assert_eq!((raw.minimum, raw.maximum), (20, 30));

    let coarse = bin_histogram(&green, 16, false).unwrap();
    assert_eq!((coarse.first_bin, coarse.last_bin), (1, 1));
    assert_eq!(coarse.histogram, vec![2048]);
    assert_eq!((coarse.minimum, coarse.maximum), (20, 30));

    let full = bin_histogram(&green, 16, true).unwrap();
    assert_eq!(full.histogram.len(), 16);
    assert_eq!(full.histogram.iter().sum::<u64>(), 2048);

    assert!(matches!(
        bin_histogram(&green, 3, false),
        Err(HistogramError::InvalidBinCount { n_bins: 3, length: 256 })
    ));
}

#[tokio::test]
async fn test_rebuild_respects_overwrite() {
    let ws = Workspace::new();
    let imported = imported_striped(&ws).await;
    let format = FormatRegistry::default_registry()
        .identify(&imported.spatial)
        .await
        .unwrap();
    let spatial = Image::new(format);

    let refused = histogram::build(&spatial, &imported.histogram, HistogramMode::Fast, false).await;
    assert!(matches!(refused, Err(HistogramError::AlreadyExists { .. })));

    let rebuilt = histogram::build(&spatial, &imported.histogram, HistogramMode::Fast, true)
        .await
        .unwrap();
    // Small images are always counted completely
    assert_eq!(rebuilt.mode(), HistogramMode::Complete);
    assert!(!imported
        .upload_dir
        .join("processed/tmp_histogram")
        .exists());
}
