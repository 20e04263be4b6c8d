mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use common::*;
use facesearch::catalog::Catalog;
use facesearch::config::ConfDir;
use facesearch::ingest::Ingestor;
use facesearch::preprocess::Preprocessor;
use facesearch::query::{QueryService, QuerySettings};
use facesearch::server::{AppState, HealthResponse, ReloadResponse, SearchMatch, create_app};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::*;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "facesearch-test-boundary";

fn write_catalog(conf: &Path, dataset: &Path) {
    let extractor = ColorBlobExtractor::default();
    let output = Ingestor::new(&extractor, Preprocessor::default()).run(dataset).unwrap();
    Catalog::write(&ConfDir::new(conf), &output.index, &output.metadata, "color-blob", dataset)
        .unwrap();
}

fn app(conf: &Path) -> Router {
    let conf_dir = ConfDir::new(conf);
    let catalog = Catalog::open(&conf_dir).unwrap();
    let service = QueryService::new(catalog, Arc::new(ColorBlobExtractor::default()), QuerySettings::default());
    create_app(AppState::new(service, conf_dir), Duration::from_secs(60))
}

/// 构建并返回 (应用, 索引目录, 数据集目录)
#[fixture]
fn loaded(dataset: TempDir) -> (Router, TempDir, TempDir) {
    let conf = TempDir::new().unwrap();
    write_catalog(conf.path(), dataset.path());
    (app(conf.path()), conf, dataset)
}

fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: image/jpeg\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart(field: &str, file_name: &str, data: &[u8]) -> Request<Body> {
    Request::post("/search")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(multipart_body(field, file_name, data)))
        .unwrap()
}

/// 800x800 的噪声背景中间放一个红色方块，PNG 编码后超过 1 MiB
///
/// 背景的 RGB 分量都不低于 240，透明通道完全随机，转为 RGB 后只剩红色方块一张人脸。
fn large_red_face_png() -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut image = RgbaImage::from_fn(800, 800, |_, _| {
        Rgba([rng.random_range(240..=255), rng.random_range(240..=255), rng.random_range(240..=255), rng.random()])
    });
    for x in 390..410 {
        for y in 390..410 {
            image.put_pixel(x, y, Rgba([RED[0], RED[1], RED[2], 255]));
        }
    }
    let mut buf = std::io::Cursor::new(vec![]);
    DynamicImage::ImageRgba8(image).write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[rstest]
#[tokio::test]
async fn search_returns_ranked_matches(loaded: (Router, TempDir, TempDir)) {
    let (app, _conf, dataset) = loaded;
    let data = std::fs::read(dataset.path().join("A.jpg")).unwrap();

    let response = app.oneshot(multipart("file", "A.jpg", &data)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let matches: Vec<SearchMatch> = body_json(response).await;
    assert_eq!(matches.len(), 3);
    assert_eq!(matches[0].filename, "A.jpg_face1");
    assert_eq!(matches[0].original_filename, "A.jpg");
    assert!((matches[0].similarity - 1.0).abs() < 1e-4);
    assert!(matches[0].path.ends_with("A.jpg"));
}

#[rstest]
#[tokio::test]
async fn search_without_file(loaded: (Router, TempDir, TempDir)) {
    let (app, _conf, _dataset) = loaded;

    let response = app.clone().oneshot(multipart("other", "A.jpg", b"data")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = body_json(response).await;
    assert_eq!(body["error"], "No file uploaded");

    let response = app.oneshot(Request::post("/search").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[rstest]
#[tokio::test]
async fn search_with_large_upload(loaded: (Router, TempDir, TempDir)) {
    let (app, _conf, _dataset) = loaded;
    let data = large_red_face_png();
    assert!(data.len() > 1024 * 1024);

    let response = app.oneshot(multipart("file", "large.png", &data)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let matches: Vec<SearchMatch> = body_json(response).await;
    assert_eq!(matches[0].filename, "A.jpg_face1");
    assert!((matches[0].similarity - 1.0).abs() < 1e-4);
}

#[rstest]
#[tokio::test]
async fn search_with_oversized_body(loaded: (Router, TempDir, TempDir)) {
    let (app, _conf, _dataset) = loaded;
    let body = multipart_body("file", "huge.jpg", &vec![0u8; 11 * 1024 * 1024]);
    let request = Request::post("/search")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[rstest]
#[tokio::test]
async fn search_with_malformed_multipart(loaded: (Router, TempDir, TempDir)) {
    let (app, _conf, _dataset) = loaded;
    // 缺少结束边界
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.jpg\"\r\n\r\npartial"
    );
    let request = Request::post("/search")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = body_json(response).await;
    let message = body["error"].as_str().unwrap();
    assert_ne!(message, "No file uploaded");
    assert!(message.starts_with("Invalid upload: "), "{message}");
}

#[rstest]
#[tokio::test]
async fn search_with_broken_image(loaded: (Router, TempDir, TempDir)) {
    let (app, _conf, _dataset) = loaded;

    let response = app.oneshot(multipart("file", "broken.jpg", b"garbage")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = body_json(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("Face recognition failed: "));
}

#[rstest]
#[tokio::test]
async fn search_without_face(loaded: (Router, TempDir, TempDir)) {
    let (app, _conf, _dataset) = loaded;
    let data = png_bytes(&blob_image(&[]));

    let response = app.oneshot(multipart("file", "empty.jpg", &data)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let matches: Vec<SearchMatch> = body_json(response).await;
    assert!(matches.is_empty());
}

#[rstest]
#[tokio::test]
async fn download(loaded: (Router, TempDir, TempDir)) {
    let (app, _conf, dataset) = loaded;

    let response = app.clone().oneshot(get("/download/B.jpg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let expected = std::fs::read(dataset.path().join("B.jpg")).unwrap();
    assert_eq!(body_bytes(response).await, expected);

    for uri in ["/download/missing.jpg", "/download/..%2FB.jpg"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        let body: Value = body_json(response).await;
        assert_eq!(body["error"], "File not found");
    }
}

#[rstest]
#[tokio::test]
async fn health(loaded: (Router, TempDir, TempDir)) {
    let (app, _conf, _dataset) = loaded;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = body_json(response).await;
    assert_eq!(health.status, "healthy");
    assert!(health.index_loaded);
    assert!(health.filenames_loaded);
    assert_eq!(health.total_faces, 3);
}

#[rstest]
#[tokio::test]
async fn reload_picks_up_new_catalog(dataset: TempDir) {
    let conf = TempDir::new().unwrap();
    let app = app(conf.path());

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    let health: HealthResponse = body_json(response).await;
    assert!(!health.index_loaded);
    assert_eq!(health.total_faces, 0);

    let data = png_bytes(&blob_image(&[RED]));
    let response = app.clone().oneshot(multipart("file", "q.jpg", &data)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    write_catalog(conf.path(), dataset.path());
    let response = app.clone().oneshot(Request::post("/reload").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let reload: ReloadResponse = body_json(response).await;
    assert_eq!(reload.total_faces, 3);

    let response = app.oneshot(multipart("file", "q.jpg", &data)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[rstest]
#[tokio::test]
async fn static_endpoints(loaded: (Router, TempDir, TempDir)) {
    let (app, _conf, _dataset) = loaded;

    let response = app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(String::from_utf8(body_bytes(response).await).unwrap().contains("<form"));

    let response = app.clone().oneshot(get("/api-docs/openapi.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = body_json(response).await;
    assert!(doc["paths"]["/search"].is_object());

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
