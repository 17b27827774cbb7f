//! Collection import tests.
//!
//! Tests verify:
//! - Archives with several entries expand into a collection
//! - A failing child never affects its siblings
//! - Child locations in the extracted tree point at their uploads
//! - Nested collections complete on a single worker
//! - Child imports report to listeners named after the child

use std::sync::{Arc, Mutex};
use std::time::Duration;

use wsi_ingest::{
    FormatRegistry, ImportEvent, ImportEventKind as K, ImportListener, ImportOutcome, Importer,
    ImporterSettings, ListenerSet, RepresentationStore,
};

use super::test_utils::{
    assert_in_order, bmp_bytes, jpeg_bytes, png_bytes, truncated_png_bytes, write_zip,
    zip_bytes, RecordingListener, Workspace,
};

#[tokio::test]
async fn test_collection_isolates_failing_child() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_zip(
        &ws.pending_file("batch.zip"),
        &[
            ("a.png", png_bytes(48, 48)),
            ("b.jpg", jpeg_bytes(40, 32)),
            ("sub/c.bmp", bmp_bytes(20, 10)),
            ("d.png", truncated_png_bytes(64, 64)),
            ("readme.txt", b"not an image".to_vec()),
        ],
    );

    let outcome = ws.importer(&recorder).import(&pending, None).await.unwrap();
    let ImportOutcome::Collection(collection) = outcome else {
        panic!("expected a collection");
    };

    assert_eq!(collection.children.len(), 4);
    assert_eq!(collection.succeeded(), 3);
    assert_eq!(collection.failed(), 1);

    let failed: Vec<_> = collection
        .children
        .iter()
        .filter(|c| c.result.is_err())
        .map(|c| c.path.file_name().unwrap().to_owned())
        .collect();
    assert_eq!(failed, vec![std::ffi::OsString::from("d.png")]);

    // extracted -> original.ZIP
    let processed = collection.upload_dir.join("processed");
    let extracted = processed.join("extracted");
    assert!(std::fs::symlink_metadata(&extracted)
        .unwrap()
        .file_type()
        .is_symlink());
    assert_eq!(
        std::fs::read_link(&extracted).unwrap(),
        processed.join("original.ZIP").canonicalize().unwrap()
    );
    assert!(extracted.join("readme.txt").is_file());

    // Every imported child location now points at its own upload
    let root = ws.root.canonicalize().unwrap();
    for child in &collection.children {
        let meta = std::fs::symlink_metadata(&child.path).unwrap();
        assert!(meta.file_type().is_symlink(), "{}", child.path.display());
        let target = std::fs::read_link(&child.path).unwrap();
        assert_eq!(target.file_name(), child.path.file_name());
        assert!(target.starts_with(&root));
    }

    // Root upload directory plus one per child
    assert_eq!(ws.upload_dirs().len(), 5);
    assert_eq!(outcome_images(&collection.children), 3);

    let kinds = recorder.kinds();
    assert_eq!(recorder.count(K::RegisterFile), 4);
    assert_eq!(recorder.count(K::FileError), 1);
    assert_eq!(recorder.count(K::EndSuccessfulImport), 3);
    assert_eq!(kinds.last(), Some(&K::EndCollectionImport));
    assert_in_order(
        &kinds,
        &[
            K::EndFormatDetection,
            K::StartUnpacking,
            K::RegisterFile,
            K::EndUnpacking,
            K::EndCollectionImport,
        ],
    );

    let summary = recorder.events().into_iter().find_map(|e| match e {
        ImportEvent::EndCollectionImport {
            succeeded, failed, ..
        } => Some((succeeded, failed)),
        _ => None,
    });
    assert_eq!(summary, Some((3, 1)));

    let parents: Vec<_> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ImportEvent::RegisterFile { parent, .. } => Some(parent),
            _ => None,
        })
        .collect();
    assert!(parents.iter().all(|p| *p == collection.upload_path));
}

/// Logs each event kind under the upload name it was created for.
struct UploadNames {
    name: String,
    log: Arc<Mutex<Vec<(String, K)>>>,
}

impl ImportListener for UploadNames {
    fn for_child(&self, name: &str) -> Option<Arc<dyn ImportListener>> {
        Some(Arc::new(UploadNames {
            name: name.to_string(),
            log: Arc::clone(&self.log),
        }))
    }

    fn on_event(&self, event: &ImportEvent) {
        self.log
            .lock()
            .unwrap()
            .push((self.name.clone(), event.kind()));
    }
}

#[tokio::test]
async fn test_children_report_under_their_own_name() {
    let ws = Workspace::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let pending = write_zip(
        &ws.pending_file("batch.zip"),
        &[
            ("a.png", png_bytes(32, 32)),
            ("sub/b.jpg", jpeg_bytes(24, 24)),
        ],
    );

    let importer = Importer::new(
        FormatRegistry::default_registry(),
        RepresentationStore::new(&ws.root),
        ws.settings(),
        ListenerSet::new().with(Arc::new(UploadNames {
            name: "batch.zip".to_string(),
            log: Arc::clone(&log),
        })),
    );
    let outcome = importer.import(&pending, None).await.unwrap();
    assert!(matches!(outcome, ImportOutcome::Collection(_)));

    let log = log.lock().unwrap().clone();
    let names_for = |kind: K| {
        let mut names: Vec<_> = log
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort();
        names
    };
    assert_eq!(names_for(K::EndSuccessfulImport), vec!["a.png", "b.jpg"]);
    assert_eq!(names_for(K::RegisterFile), vec!["batch.zip", "batch.zip"]);
    assert_eq!(names_for(K::EndCollectionImport), vec!["batch.zip"]);
    assert_eq!(names_for(K::StartUnpacking), vec!["batch.zip"]);
}

fn outcome_images(children: &[wsi_ingest::ChildImport]) -> usize {
    children
        .iter()
        .filter_map(|c| c.result.as_ref().ok())
        .map(|o| o.images().len())
        .sum()
}

#[tokio::test]
async fn test_hidden_entries_are_skipped() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_zip(
        &ws.pending_file("mac.zip"),
        &[
            ("a.png", png_bytes(16, 16)),
            ("b.png", png_bytes(16, 16)),
            (".hidden.png", png_bytes(16, 16)),
        ],
    );

    let outcome = ws.importer(&recorder).import(&pending, None).await.unwrap();
    let ImportOutcome::Collection(collection) = outcome else {
        panic!("expected a collection");
    };
    assert_eq!(collection.children.len(), 2);
    assert_eq!(collection.succeeded(), 2);
}

#[tokio::test]
async fn test_nested_collections_on_one_worker() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let inner = zip_bytes(&[("x.png", png_bytes(16, 16)), ("y.png", png_bytes(24, 16))]);
    let pending = write_zip(
        &ws.pending_file("outer.zip"),
        &[
            ("inner.zip", inner),
            ("a.png", png_bytes(16, 16)),
            ("b.png", png_bytes(16, 24)),
        ],
    );
    let settings = ImporterSettings {
        workers: 1,
        ..ws.settings()
    };
    let importer = ws.importer_with(settings, &recorder);

    let outcome = tokio::time::timeout(Duration::from_secs(60), importer.import(&pending, None))
        .await
        .expect("nested collection import must not deadlock")
        .unwrap();

    assert_eq!(outcome.images().len(), 4);
    assert_eq!(recorder.count(K::EndCollectionImport), 2);
    assert_eq!(recorder.count(K::FileError), 0);

    let ImportOutcome::Collection(outer) = outcome else {
        panic!("expected a collection");
    };
    let nested = outer
        .children
        .iter()
        .find(|c| c.path.file_name().is_some_and(|n| n == "inner.zip"))
        .unwrap();
    assert!(matches!(
        nested.result,
        Ok(ImportOutcome::Collection(ref c)) if c.succeeded() == 2
    ));
}

#[tokio::test]
async fn test_archive_without_images_is_empty_collection() {
    let ws = Workspace::new();
    let recorder = RecordingListener::new();
    let pending = write_zip(
        &ws.pending_file("docs.zip"),
        &[
            ("a.txt", b"one".to_vec()),
            ("b.txt", b"two".to_vec()),
        ],
    );

    let outcome = ws.importer(&recorder).import(&pending, None).await.unwrap();
    let ImportOutcome::Collection(collection) = outcome else {
        panic!("expected a collection");
    };
    assert!(collection.children.is_empty());
    assert_eq!(recorder.count(K::RegisterFile), 0);
    assert_eq!(recorder.kinds().last(), Some(&K::EndCollectionImport));
}
