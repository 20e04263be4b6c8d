mod common;

use std::path::Path;
use std::sync::Arc;

use common::*;
use facesearch::catalog::Catalog;
use facesearch::config::ConfDir;
use facesearch::error::FaceSearchError;
use facesearch::FaceExtractor;
use facesearch::index::FlatIndex;
use facesearch::ingest::Ingestor;
use facesearch::metadata::MetadataStore;
use facesearch::preprocess::Preprocessor;
use facesearch::query::{QueryOutcome, QueryService, QuerySettings, Upload};
use rstest::*;
use tempfile::TempDir;

/// 用数据集构建索引并写入临时目录，返回 (索引目录, 数据集目录)
#[fixture]
fn catalog_dir(dataset: TempDir) -> (TempDir, TempDir) {
    let conf = TempDir::new().unwrap();
    let extractor = ColorBlobExtractor::default();
    let output = Ingestor::new(&extractor, Preprocessor::default()).run(dataset.path()).unwrap();
    Catalog::write(
        &ConfDir::new(conf.path()),
        &output.index,
        &output.metadata,
        extractor.model_name(),
        dataset.path(),
    )
    .unwrap();
    (conf, dataset)
}

fn service(conf: &Path, settings: QuerySettings) -> QueryService {
    let catalog = Catalog::open(&ConfDir::new(conf)).unwrap();
    QueryService::new(catalog, Arc::new(ColorBlobExtractor::default()), settings)
}

fn upload(data: &[u8]) -> Option<Upload<'_>> {
    Some(Upload { file_name: Some("query.jpg"), data })
}

#[rstest]
fn identical_image_ranks_first(catalog_dir: (TempDir, TempDir)) {
    let (conf, dataset) = catalog_dir;
    let service = service(conf.path(), QuerySettings::default());

    let data = std::fs::read(dataset.path().join("A.jpg")).unwrap();
    let results = service.search_upload(upload(&data)).unwrap().into_results();

    assert_eq!(results.len(), 3);
    let top = &results[0];
    assert_eq!(top.rank, 1);
    assert_eq!(top.filename, "A.jpg_face1");
    assert_eq!(top.original_filename, "A.jpg");
    assert!((top.similarity - 1.0).abs() < 1e-4);
    assert_eq!(top.path, dataset.path().join("A.jpg"));

    for pair in results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
        assert_eq!(pair[0].rank + 1, pair[1].rank);
    }
}

#[rstest]
fn only_first_face_is_used(catalog_dir: (TempDir, TempDir)) {
    let (conf, _dataset) = catalog_dir;
    let service = service(conf.path(), QuerySettings::default());

    let data = png_bytes(&blob_image(&[GREEN, BLUE]));
    let results = service.search_upload(upload(&data)).unwrap().into_results();
    assert_eq!(results[0].filename, "A.jpg_face2");
}

#[rstest]
fn top_k_limits_results(catalog_dir: (TempDir, TempDir)) {
    let (conf, _dataset) = catalog_dir;
    let settings = QuerySettings { top_k: 2, ..Default::default() };
    let service = service(conf.path(), settings);

    let data = png_bytes(&blob_image(&[BLUE]));
    let results = service.search_upload(upload(&data)).unwrap().into_results();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].filename, "B.jpg_face1");
}

#[rstest]
fn dataset_dir_override(catalog_dir: (TempDir, TempDir)) {
    let (conf, _dataset) = catalog_dir;
    let settings = QuerySettings { dataset_dir: Some("/srv/faces".into()), ..Default::default() };
    let service = service(conf.path(), settings);

    let data = png_bytes(&blob_image(&[RED]));
    let results = service.search_upload(upload(&data)).unwrap().into_results();
    assert_eq!(results[0].path, Path::new("/srv/faces/A.jpg"));
}

#[rstest]
fn no_face_is_empty_outcome(catalog_dir: (TempDir, TempDir)) {
    let (conf, _dataset) = catalog_dir;
    let service = service(conf.path(), QuerySettings::default());

    let data = png_bytes(&blob_image(&[]));
    let outcome = service.search_upload(upload(&data)).unwrap();
    assert_eq!(outcome, QueryOutcome::NoFace);
}

#[rstest]
fn missing_upload(catalog_dir: (TempDir, TempDir)) {
    let (conf, _dataset) = catalog_dir;
    let err = service(conf.path(), QuerySettings::default()).search_upload(None).unwrap_err();
    assert!(matches!(err, FaceSearchError::InvalidRequest(_)));
    assert_eq!(err.to_string(), "No file uploaded");
}

#[rstest]
fn undecodable_upload_is_extraction_failure(catalog_dir: (TempDir, TempDir)) {
    let (conf, _dataset) = catalog_dir;
    let service = service(conf.path(), QuerySettings::default());
    let err = service.search_upload(upload(b"garbage")).unwrap_err();
    assert!(matches!(err, FaceSearchError::Extraction(_)));
}

#[rstest]
fn temporary_upload_is_removed(catalog_dir: (TempDir, TempDir)) {
    let (conf, _dataset) = catalog_dir;
    let uploads = TempDir::new().unwrap();
    let settings = QuerySettings { upload_dir: Some(uploads.path().to_path_buf()), ..Default::default() };
    let service = service(conf.path(), settings);

    let good = png_bytes(&blob_image(&[RED]));
    service.search_upload(upload(&good)).unwrap();
    service.search_upload(upload(b"garbage")).unwrap_err();

    assert_eq!(std::fs::read_dir(uploads.path()).unwrap().count(), 0);
}

#[test]
fn empty_catalog_is_search_failure() {
    let conf = TempDir::new().unwrap();
    let conf_dir = ConfDir::new(conf.path());
    Catalog::write(&conf_dir, &FlatIndex::default(), &MetadataStore::new(), "color-blob", conf.path())
        .unwrap();

    let service = service(conf.path(), QuerySettings::default());
    let data = png_bytes(&blob_image(&[RED]));
    let err = service.search_upload(upload(&data)).unwrap_err();
    assert!(matches!(err, FaceSearchError::Search(_)));
}

#[test]
fn not_loaded_is_search_failure() {
    let conf = TempDir::new().unwrap();
    let service = service(conf.path(), QuerySettings::default());
    assert!(!service.is_loaded());

    let data = png_bytes(&blob_image(&[RED]));
    let err = service.search_upload(upload(&data)).unwrap_err();
    assert!(matches!(err, FaceSearchError::Search(_)));
}

#[rstest]
fn incompatible_model_is_search_failure(catalog_dir: (TempDir, TempDir)) {
    let (conf, _dataset) = catalog_dir;
    let catalog = Catalog::open(&ConfDir::new(conf.path())).unwrap();
    let extractor = ColorBlobExtractor { extra_dims: 2, ..Default::default() };
    let service = QueryService::new(catalog, Arc::new(extractor), QuerySettings::default());

    let data = png_bytes(&blob_image(&[RED]));
    let err = service.search_upload(upload(&data)).unwrap_err();
    assert!(matches!(err, FaceSearchError::Search(_)));
}
