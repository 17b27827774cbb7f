//! Single-file import tests.
//!
//! Tests verify:
//! - Event order for aliased and converted imports
//! - Role files and their aliases inside `processed/`
//! - Failure classes and FILE_ERROR reporting
//! - Archives holding a single image

use wsi_ingest::{
    ArchiveError, ErrorClass, FormatRegistry, HistogramBlob, HistogramMode, ImportError,
    ImportEvent, ImportEventKind as K, ImportOutcome, ImportedImage, ImporterSettings,
    ProcessedLayout, RepresentationRole,
};

use super::test_utils::{
    assert_in_order, png_bytes, truncated_png_bytes, write_file, write_jpeg_svs, write_pyramidal,
    write_scripted, write_svs, write_zip, RecordingListener, Script, ScriptedPlugin, Workspace,
};

fn expect_image(outcome: ImportOutcome) -> ImportedImage {
    match outcome {
        ImportOutcome::Image(image) => *image,
        ImportOutcome::Collection(c) => panic!("expected an image, got a collection {c:?}"),
    }
}

// =============================================================================
// Successful imports
// =============================================================================

#[tokio::test]
async fn test_small_png_is_aliased() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_file(&ws.pending_file("small.png"), &png_bytes(64, 48));

    let outcome = ws.importer(&recorder).import(&pending, None).await.unwrap();
    let image = expect_image(outcome);

    assert!(!pending.exists(), "pending file must be moved");
    assert_eq!(image.upload_path, image.upload_dir.join("small.png"));
    assert!(image.upload_path.is_file());
    assert_eq!(
        image.original,
        image.upload_dir.join("processed/original.PNG")
    );
    assert_eq!(image.spatial, image.upload_dir.join("processed/spatial.PNG"));

    // Both roles resolve to the uploaded bytes
    let uploaded = std::fs::read(&image.upload_path).unwrap();
    assert!(std::fs::symlink_metadata(&image.original)
        .unwrap()
        .file_type()
        .is_symlink());
    assert!(std::fs::symlink_metadata(&image.spatial)
        .unwrap()
        .file_type()
        .is_symlink());
    assert_eq!(std::fs::read(&image.original).unwrap(), uploaded);
    assert_eq!(std::fs::read(&image.spatial).unwrap(), uploaded);

    // The spatial role opens with spatial formats only
    let spatial = FormatRegistry::default_registry()
        .spatial()
        .identify(&image.spatial)
        .await
        .expect("spatial role must be readable by a spatial format");
    assert_eq!(spatial.identifier(), "PNG");
    assert!(spatial.is_spatial());

    assert_eq!(image.summary.format, "PNG");
    assert_eq!((image.summary.width, image.summary.height), (64, 48));
    assert_eq!(image.summary.n_channels, 3);

    let kinds = recorder.kinds();
    assert_in_order(
        &kinds,
        &[
            K::StartDataExtraction,
            K::MovedPendingFile,
            K::EndDataExtraction,
            K::StartFormatDetection,
            K::EndFormatDetection,
            K::StartIntegrityCheck,
            K::EndIntegrityCheck,
            K::StartSpatialDeploy,
            K::EndSpatialDeploy,
            K::StartHistogramDeploy,
            K::EndHistogramDeploy,
            K::EndSuccessfulImport,
        ],
    );
    assert!(!kinds.contains(&K::StartConversion));
    assert!(!kinds.iter().any(|k| k.is_error()));
    assert_eq!(kinds.last(), Some(&K::EndSuccessfulImport));

    let blob = HistogramBlob::open(&image.histogram).await.unwrap();
    assert_eq!(blob.mode(), HistogramMode::Complete);
}

#[tokio::test]
async fn test_large_png_is_converted() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_file(&ws.pending_file("large.png"), &png_bytes(1100, 1030));

    let outcome = ws.importer(&recorder).import(&pending, None).await.unwrap();
    let image = expect_image(outcome);

    assert_eq!(
        image.spatial,
        image.upload_dir.join("processed/spatial.PYRTIFF")
    );
    let spatial_meta = std::fs::symlink_metadata(&image.spatial).unwrap();
    assert!(spatial_meta.file_type().is_file());
    assert_ne!(
        std::fs::read(&image.spatial).unwrap(),
        std::fs::read(&image.original).unwrap()
    );
    assert!(!image
        .upload_dir
        .join("processed/tmp_spatial.PYRTIFF")
        .exists());

    // The summary describes the original, not the converted file
    assert_eq!(image.summary.format, "PNG");
    assert_eq!((image.summary.width, image.summary.height), (1100, 1030));

    let kinds = recorder.kinds();
    assert_in_order(
        &kinds,
        &[
            K::StartDataExtraction,
            K::MovedPendingFile,
            K::EndDataExtraction,
            K::StartFormatDetection,
            K::EndFormatDetection,
            K::StartIntegrityCheck,
            K::EndIntegrityCheck,
            K::StartSpatialDeploy,
            K::StartConversion,
            K::EndConversion,
            K::StartFormatDetection,
            K::EndFormatDetection,
            K::StartIntegrityCheck,
            K::EndIntegrityCheck,
            K::EndSpatialDeploy,
            K::StartHistogramDeploy,
            K::EndHistogramDeploy,
            K::EndSuccessfulImport,
        ],
    );

    let formats: Vec<&str> = recorder
        .events()
        .iter()
        .filter_map(|e| match e {
            ImportEvent::EndFormatDetection { format, .. } => Some(*format),
            _ => None,
        })
        .collect();
    assert_eq!(formats, vec!["PNG", "PYRTIFF"]);

    let blob = HistogramBlob::open(&image.histogram).await.unwrap();
    assert_eq!(blob.mode(), HistogramMode::Fast);
}

#[tokio::test]
async fn test_svs_import() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = ws.pending_file("slide.svs");
    write_svs(&pending, 800, 600);

    let outcome = ws.importer(&recorder).import(&pending, None).await.unwrap();
    let image = expect_image(outcome);

    assert_eq!(image.original, image.upload_dir.join("processed/original.SVS"));
    assert_eq!(image.spatial, image.upload_dir.join("processed/spatial.SVS"));
    assert_eq!(image.summary.format, "SVS");
    assert_eq!(image.summary.physical_size_x, Some(0.5));
    assert!(image.summary.acquisition_datetime.is_some());
    assert!(image.summary.n_tiers > 1);
    assert!(!recorder.kinds().contains(&K::StartConversion));
}

#[tokio::test]
async fn test_jpeg_tiled_svs_import() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = ws.pending_file("scanned.svs");
    write_jpeg_svs(&pending, 1200, 1100);

    let outcome = ws.importer(&recorder).import(&pending, None).await.unwrap();
    let image = expect_image(outcome);

    assert_eq!(image.summary.format, "SVS");
    assert_eq!((image.summary.width, image.summary.height), (1200, 1100));
    assert_eq!(image.summary.n_tiers, 4);
    assert!(!recorder.kinds().contains(&K::StartConversion));

    // Pixels come from decoded JPEG tiles: flat 100, give or take the codec
    let blob = HistogramBlob::open(&image.histogram).await.unwrap();
    assert_eq!(blob.mode(), HistogramMode::Fast);
    let whole = blob.get(wsi_ingest::HistogramScope::Image).await.unwrap();
    let (first, last) = whole.bounds();
    assert!((95..=105).contains(&first) && (95..=105).contains(&last), "{first}..{last}");
    let expected = 3 * 1200 * 1100;
    assert!(whole.total().abs_diff(expected) < expected / 100);
}

#[tokio::test]
async fn test_pyramidal_tiff_import_with_custom_name() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = ws.pending_file("upload.bin");
    write_pyramidal(&pending, 600, 400, None);

    let outcome = ws
        .importer(&recorder)
        .import(&pending, Some("renamed.tif".to_string()))
        .await
        .unwrap();
    let image = expect_image(outcome);

    assert_eq!(image.upload_path, image.upload_dir.join("renamed.tif"));
    assert_eq!(image.summary.format, "PYRTIFF");

    let layout = ProcessedLayout::new(&image.upload_dir);
    assert_eq!(
        layout.find_role(RepresentationRole::Spatial).await,
        Some(image.spatial.clone())
    );
    assert_eq!(
        layout.find_role(RepresentationRole::Upload).await,
        Some(image.upload_path.clone())
    );
    assert!(!layout.is_collection().await);
}

#[tokio::test]
async fn test_prefer_copy_keeps_pending_file() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_file(&ws.pending_file("keep.png"), &png_bytes(32, 32));
    let settings = ImporterSettings {
        prefer_copy: true,
        ..ws.settings()
    };

    let outcome = ws
        .importer_with(settings, &recorder)
        .import(&pending, None)
        .await
        .unwrap();
    let image = expect_image(outcome);

    assert!(pending.is_file());
    assert_eq!(
        std::fs::read(&pending).unwrap(),
        std::fs::read(&image.upload_path).unwrap()
    );
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_file_outside_pending_area() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let outside = write_file(&ws.elsewhere("a.png"), &png_bytes(16, 16));

    let err = ws
        .importer(&recorder)
        .import(&outside, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::FilepathNotFound { .. }));
    assert_eq!(err.class(), ErrorClass::Environment);
    assert!(outside.is_file(), "rejected file must be left alone");
    assert!(ws.upload_dirs().is_empty());
    assert_eq!(
        recorder.kinds(),
        vec![K::StartDataExtraction, K::FileNotFound, K::FileError]
    );
}

#[tokio::test]
async fn test_missing_pending_file() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();

    let err = ws
        .importer(&recorder)
        .import(ws.pending_file("ghost.svs"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::FilepathNotFound { .. }));
    assert_eq!(recorder.count(K::FileError), 1);
}

#[tokio::test]
async fn test_unknown_format() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_file(&ws.pending_file("notes.txt"), b"plain text, no image here");

    let err = ws
        .importer(&recorder)
        .import(&pending, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::NoMatchingFormat { .. }));
    assert_eq!(err.class(), ErrorClass::Unidentifiable);

    let kinds = recorder.kinds();
    assert_in_order(
        &kinds,
        &[
            K::MovedPendingFile,
            K::StartFormatDetection,
            K::ErrorNoFormat,
            K::FileError,
        ],
    );
    assert!(!kinds.contains(&K::EndFormatDetection));

    // No cleanup on failure: the upload directory keeps the file
    let dirs = ws.upload_dirs();
    assert_eq!(dirs.len(), 1);
    assert!(dirs[0].join("notes.txt").is_file());
}

#[tokio::test]
async fn test_corrupt_pixels_fail_histogram() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_file(&ws.pending_file("broken.png"), &truncated_png_bytes(64, 64));

    let err = ws
        .importer(&recorder)
        .import(&pending, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Histogram { .. }), "{err:?}");
    assert_eq!(err.class(), ErrorClass::Invalid);

    let kinds = recorder.kinds();
    assert_in_order(
        &kinds,
        &[
            K::EndIntegrityCheck,
            K::StartHistogramDeploy,
            K::ErrorHistogram,
            K::FileError,
        ],
    );
    assert!(!kinds.contains(&K::EndSuccessfulImport));
    assert_eq!(recorder.count(K::FileError), 1);
}

#[tokio::test]
async fn test_conversion_without_output_fails() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_scripted(&ws.pending_file("silent.raw"));
    let importer = ws.importer_for(
        ScriptedPlugin::registry(Script::SilentConversion),
        ws.settings(),
        &recorder,
    );

    let err = importer.import(&pending, None).await.unwrap_err();

    assert!(matches!(err, ImportError::Conversion { .. }), "{err:?}");
    assert_eq!(err.class(), ErrorClass::Invalid);
    assert_in_order(
        &recorder.kinds(),
        &[
            K::EndIntegrityCheck,
            K::StartSpatialDeploy,
            K::StartConversion,
            K::ErrorConversion,
            K::FileError,
        ],
    );
    assert!(!recorder.kinds().contains(&K::EndConversion));

    let processed = ws.upload_dirs()[0].join("processed");
    assert!(!processed.join("spatial.PYRTIFF").exists());
    assert!(!processed.join("tmp_spatial.PYRTIFF").exists());
}

#[tokio::test]
async fn test_unparseable_metadata_fails_integrity() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_scripted(&ws.pending_file("uncalibrated.raw"));
    let importer = ws.importer_for(
        ScriptedPlugin::registry(Script::BrokenCalibration),
        ws.settings(),
        &recorder,
    );

    let err = importer.import(&pending, None).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Invalid);
    let ImportError::ImageParsing { path, errors } = &err else {
        panic!("expected an image parsing error, got {err:?}");
    };
    assert!(path.ends_with("processed/original.SCRIPTED"));

    // Every failing attribute is reported, not only the first one
    let attributes: Vec<&str> = errors.iter().map(|e| e.attribute).collect();
    assert_eq!(attributes.first(), Some(&"physical_size_x"));
    assert!(attributes.contains(&"acquisition_datetime"));
    assert!(attributes.contains(&"associated_macro"));
    assert!(!attributes.contains(&"width"));
    assert!(!attributes.contains(&"pyramid"));

    let reported = recorder.events().into_iter().find_map(|e| match e {
        ImportEvent::ErrorIntegrityCheck { errors, .. } => {
            Some(errors.iter().map(|e| e.attribute).collect::<Vec<_>>())
        }
        _ => None,
    });
    assert_eq!(reported, Some(attributes));

    let kinds = recorder.kinds();
    assert_in_order(
        &kinds,
        &[
            K::EndFormatDetection,
            K::StartIntegrityCheck,
            K::ErrorIntegrityCheck,
            K::FileError,
        ],
    );
    assert!(!kinds.contains(&K::StartSpatialDeploy));
}

#[tokio::test]
async fn test_format_without_tiles_or_conversion_is_rejected() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_scripted(&ws.pending_file("flat.raw"));
    let importer = ws.importer_for(
        ScriptedPlugin::registry(Script::Inert),
        ws.settings(),
        &recorder,
    );

    let err = importer.import(&pending, None).await.unwrap_err();

    assert!(
        matches!(err, ImportError::NotSpatial { format: "SCRIPTED", .. }),
        "{err:?}"
    );
    assert_eq!(err.class(), ErrorClass::Invalid);
    let kinds = recorder.kinds();
    assert_in_order(&kinds, &[K::StartSpatialDeploy, K::FileError]);
    assert!(!kinds.contains(&K::EndSpatialDeploy));
    assert!(!ws.upload_dirs()[0].join("processed/spatial.SCRIPTED").exists());
}

// =============================================================================
// Archives
// =============================================================================

#[tokio::test]
async fn test_escaping_archive_fails_extraction() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_zip(
        &ws.pending_file("evil.zip"),
        &[("../escaped.png", png_bytes(16, 16))],
    );

    let err = ws
        .importer(&recorder)
        .import(&pending, None)
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            ImportError::ArchiveExtraction {
                source: ArchiveError::UnsafeEntry(_),
                ..
            }
        ),
        "{err:?}"
    );
    assert_eq!(err.class(), ErrorClass::Invalid);
    assert_in_order(
        &recorder.kinds(),
        &[
            K::EndFormatDetection,
            K::StartUnpacking,
            K::ErrorUnpacking,
            K::FileError,
        ],
    );
    assert!(!recorder.kinds().contains(&K::EndUnpacking));

    let upload_dir = &ws.upload_dirs()[0];
    assert!(!upload_dir.join("processed/escaped.png").exists());
    assert!(!ws.root.join("escaped.png").exists());
}

#[tokio::test]
async fn test_single_image_archive() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_zip(
        &ws.pending_file("one.zip"),
        &[("folder/only.png", png_bytes(40, 30))],
    );

    let outcome = ws.importer(&recorder).import(&pending, None).await.unwrap();
    let image = expect_image(outcome);

    let processed = image.upload_dir.join("processed");
    assert_eq!(image.original, processed.join("original.PNG"));
    assert!(image.original.is_file());
    assert!(!processed.join("original.ZIP").exists());
    assert!(!processed.join("extracted").exists());
    assert_eq!(image.upload_path, image.upload_dir.join("one.zip"));
    assert_eq!(image.summary.format, "PNG");

    let events = recorder.events();
    let unpacked = events.iter().find_map(|e| match e {
        ImportEvent::EndUnpacking {
            format,
            is_collection,
            ..
        } => Some((*format, *is_collection)),
        _ => None,
    });
    assert_eq!(unpacked, Some((Some("PNG"), false)));

    assert_in_order(
        &recorder.kinds(),
        &[
            K::EndFormatDetection,
            K::StartUnpacking,
            K::EndUnpacking,
            K::StartIntegrityCheck,
            K::EndSuccessfulImport,
        ],
    );
}
