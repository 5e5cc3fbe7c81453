//! HTTP-level tests for the preprocessing service.
//!
//! PDFs go through a fake rasteriser that writes synthetic pages, so these
//! tests need no pdfium library. Requests are driven through the router with
//! `tower::ServiceExt::oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use image::{DynamicImage, GrayImage, Luma};
use scanprep::error::TransformError;
use scanprep::pipeline::render::page_file_name;
use scanprep::{
    build_router, AppState, ImageTransforms, ProcessContext, Rasterizer, ScanPrepError,
    ServiceConfig, StandardTransforms,
};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

// ── Fakes ────────────────────────────────────────────────────────────────

/// Writes `pages` white pages with a dark bar, ignoring the PDF content.
struct FakeRasterizer {
    pages: usize,
}

impl Rasterizer for FakeRasterizer {
    fn rasterize(
        &self,
        _pdf_path: &Path,
        out_dir: &Path,
        _dpi: u32,
    ) -> Result<Vec<PathBuf>, ScanPrepError> {
        (1..=self.pages)
            .map(|n| {
                let path = out_dir.join(page_file_name(n));
                page_image(n as u32).save(&path).map_err(|e| {
                    ScanPrepError::RasterisationFailed {
                        detail: e.to_string(),
                    }
                })?;
                Ok(path)
            })
            .collect()
    }
}

/// Records the name of every primitive called, then delegates.
#[derive(Default)]
struct RecordingTransforms {
    inner: StandardTransforms,
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingTransforms {
    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

type TResult = Result<DynamicImage, TransformError>;

impl ImageTransforms for RecordingTransforms {
    fn grayscale(&self, image: &DynamicImage) -> TResult {
        self.record("grayscale");
        self.inner.grayscale(image)
    }

    fn estimate_skew(
        &self,
        image: &DynamicImage,
        ink_threshold: u8,
    ) -> Result<Option<f32>, TransformError> {
        self.record("estimate_skew");
        self.inner.estimate_skew(image, ink_threshold)
    }

    fn rotate(&self, image: &DynamicImage, degrees: f32) -> TResult {
        self.record("rotate");
        self.inner.rotate(image, degrees)
    }

    fn despeckle(&self, image: &DynamicImage) -> TResult {
        self.record("despeckle");
        self.inner.despeckle(image)
    }

    fn add_noise(&self, image: &DynamicImage, attenuate: f32) -> TResult {
        self.record("add_noise");
        self.inner.add_noise(image, attenuate)
    }

    fn enhance(&self, image: &DynamicImage) -> TResult {
        self.record("enhance");
        self.inner.enhance(image)
    }

    fn threshold(&self, image: &DynamicImage, level: u8) -> TResult {
        self.record("threshold");
        self.inner.threshold(image, level)
    }

    fn normalize(&self, image: &DynamicImage) -> TResult {
        self.record("normalize");
        self.inner.normalize(image)
    }

    fn contrast(&self, image: &DynamicImage, sharpen: bool) -> TResult {
        self.record("contrast");
        self.inner.contrast(image, sharpen)
    }

    fn sigmoidal_contrast(&self, image: &DynamicImage, strength: f32, midpoint: f32) -> TResult {
        self.record("sigmoidal_contrast");
        self.inner.sigmoidal_contrast(image, strength, midpoint)
    }

    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> TResult {
        self.record("resize");
        self.inner.resize(image, width, height)
    }

    fn sharpen(&self, image: &DynamicImage, radius: f32, sigma: f32) -> TResult {
        self.record("sharpen");
        self.inner.sharpen(image, radius, sigma)
    }

    fn trim(&self, image: &DynamicImage, fuzz: f32) -> TResult {
        self.record("trim");
        self.inner.trim(image, fuzz)
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    router: Router,
    transforms: Arc<RecordingTransforms>,
    scratch: TempDir,
}

impl Harness {
    fn new(pdf_pages: usize) -> Self {
        Self::with_config(pdf_pages, |b| b)
    }

    fn with_config(
        pdf_pages: usize,
        tweak: impl FnOnce(scanprep::ServiceConfigBuilder) -> scanprep::ServiceConfigBuilder,
    ) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let config = tweak(ServiceConfig::builder().scratch_root(scratch.path()))
            .build()
            .unwrap();
        let transforms = Arc::new(RecordingTransforms::default());
        let ctx = ProcessContext::from_config(&config)
            .with_transforms(transforms.clone())
            .with_rasterizer(Arc::new(FakeRasterizer { pages: pdf_pages }));
        let state = AppState::with_context(config, ctx).unwrap();
        Self {
            router: build_router(state),
            transforms,
            scratch,
        }
    }

    async fn post(&self, uri: &str, parts: &[Part<'_>]) -> (StatusCode, Vec<(String, String)>, Vec<u8>) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        send(self.router.clone(), request).await
    }

    fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch.path()).unwrap().count()
    }
}

async fn send(
    router: Router,
    request: Request<Body>,
) -> (StatusCode, Vec<(String, String)>, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn error_message(body: &[u8]) -> String {
    let json: serde_json::Value = serde_json::from_slice(body).unwrap();
    json["error"].as_str().unwrap().to_string()
}

// ── Multipart bodies ─────────────────────────────────────────────────────

const BOUNDARY: &str = "scanprep-test-boundary";

enum Part<'a> {
    File {
        field: &'a str,
        filename: &'a str,
        bytes: Vec<u8>,
    },
    Text {
        field: &'a str,
        value: &'a str,
    },
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File {
                field,
                filename,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
            Part::Text { field, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

// ── Images ───────────────────────────────────────────────────────────────

/// White page with one dark horizontal bar whose row depends on `seed`.
fn page_image(seed: u32) -> DynamicImage {
    let bar = 10 + (seed % 5) * 8;
    DynamicImage::ImageLuma8(GrayImage::from_fn(64, 64, |_, y| {
        if (bar..bar + 4).contains(&y) {
            Luma([20])
        } else {
            Luma([235])
        }
    }))
}

fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn image_part<'a>(filename: &'a str) -> Part<'a> {
    Part::File {
        field: "image",
        filename,
        bytes: png_bytes(&page_image(1)),
    }
}

fn pdf_part<'a>(field: &'a str) -> Part<'a> {
    Part::File {
        field,
        filename: "scan.pdf",
        bytes: b"%PDF-1.4\n%fake\n".to_vec(),
    }
}

fn zip_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_ok() {
    let h = Harness::new(1);
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(h.router.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn missing_upload_is_bad_request() {
    let h = Harness::new(1);
    let (status, headers, body) = h
        .post("/api/preprocess", &[Part::Text { field: "threshold", value: "100" }])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(header_value(&headers, "content-type")
        .unwrap()
        .starts_with("application/json"));
    assert_eq!(error_message(&body), "No image or PDF provided");
    assert!(h.transforms.calls().is_empty());
}

#[tokio::test]
async fn empty_filename_is_bad_request() {
    let h = Harness::new(1);
    let (status, _, body) = h
        .post(
            "/api/preprocess/binarize",
            &[Part::File {
                field: "image",
                filename: "",
                bytes: Vec::new(),
            }],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "No file selected");
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn non_multipart_request_is_bad_request() {
    let h = Harness::new(1);
    let request = Request::builder()
        .method("POST")
        .uri("/api/preprocess/deskew")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _, body) = send(h.router.clone(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "No image or PDF provided");
}

#[tokio::test]
async fn single_image_returns_png() {
    let h = Harness::new(1);
    let (status, headers, body) = h.post("/api/preprocess/binarize", &[image_part("scan.png")]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_value(&headers, "content-type"), Some("image/png"));
    assert!(header_value(&headers, "content-disposition").is_none());

    let img = image::load_from_memory(&body).unwrap().to_luma8();
    assert_eq!(img.dimensions(), (64, 64));
    assert!(img.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    assert_eq!(h.transforms.calls(), vec!["grayscale", "threshold"]);
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn upload_under_file_field_is_accepted() {
    let h = Harness::new(1);
    let (status, _, _) = h
        .post(
            "/api/preprocess/deskew",
            &[Part::File {
                field: "file",
                filename: "scan.png",
                bytes: png_bytes(&page_image(2)),
            }],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.transforms.calls()[..2], ["grayscale", "estimate_skew"]);
}

#[tokio::test]
async fn undecodable_image_is_server_error() {
    let h = Harness::new(1);
    let (status, _, body) = h
        .post(
            "/api/preprocess",
            &[Part::File {
                field: "image",
                filename: "scan.png",
                bytes: b"definitely not a png".to_vec(),
            }],
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(error_message(&body).starts_with("Failed to load image"));
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn multi_page_pdf_returns_ordered_zip() {
    let h = Harness::new(3);
    let (status, headers, body) = h
        .post(
            "/api/preprocess/google_vision",
            &[pdf_part("file"), Part::Text { field: "denoise_level", value: "1" }],
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_value(&headers, "content-type"), Some("application/zip"));
    assert_eq!(
        header_value(&headers, "content-disposition"),
        Some("attachment; filename=\"processed_images.zip\"")
    );

    let entries = zip_entries(&body);
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["page_1.png", "page_2.png", "page_3.png"]);
    for (_, data) in &entries {
        assert!(image::load_from_memory(data).is_ok());
    }

    // Pages are blank enough that no rotation is attempted.
    let per_page = [
        "grayscale",
        "estimate_skew",
        "normalize",
        "contrast",
        "sigmoidal_contrast",
        "despeckle",
    ];
    assert_eq!(h.transforms.calls(), per_page.repeat(3));
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn single_page_pdf_returns_png() {
    let h = Harness::new(1);
    let (status, headers, body) = h.post("/api/preprocess/deskew", &[pdf_part("image")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_value(&headers, "content-type"), Some("image/png"));
    assert!(image::load_from_memory(&body).is_ok());
}

#[tokio::test]
async fn zero_page_pdf_is_server_error() {
    let h = Harness::new(0);
    let (status, _, _) = h.post("/api/preprocess", &[pdf_part("image")]).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn pipeline_without_steps_matches_preprocess() {
    let a = Harness::new(1);
    let (status_a, _, body_a) = a.post("/api/preprocess/pipeline", &[image_part("scan.png")]).await;
    let b = Harness::new(1);
    let (status_b, _, body_b) = b.post("/api/preprocess", &[image_part("scan.png")]).await;

    assert_eq!(status_a, StatusCode::OK);
    assert_eq!(status_b, StatusCode::OK);
    assert_eq!(a.transforms.calls(), b.transforms.calls());
    assert_eq!(body_a, body_b);
}

#[tokio::test]
async fn pipeline_runs_requested_steps_in_order() {
    let h = Harness::new(1);
    let (status, _, body) = h
        .post(
            "/api/preprocess/pipeline",
            &[
                image_part("scan.png"),
                Part::Text { field: "steps", value: "resize" },
                Part::Text { field: "steps", value: "binarize" },
                Part::Text { field: "steps", value: "no_such_step" },
                Part::Text {
                    field: "params",
                    value: r#"{"resize_scale": "0.5", "binarize_threshold": 200}"#,
                },
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.transforms.calls(), vec!["resize", "grayscale", "threshold"]);
    let img = image::load_from_memory(&body).unwrap();
    assert_eq!((img.width(), img.height()), (32, 32));
}

#[tokio::test]
async fn malformed_params_fall_back_to_defaults() {
    let h = Harness::new(1);
    let (status, _, body) = h
        .post(
            "/api/preprocess/pipeline",
            &[
                image_part("scan.png"),
                Part::Text { field: "steps", value: "resize" },
                Part::Text { field: "params", value: "{not json" },
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let img = image::load_from_memory(&body).unwrap();
    assert_eq!((img.width(), img.height()), (128, 128));
}

#[tokio::test]
async fn unparsable_numeric_field_uses_route_default() {
    let h = Harness::new(1);
    let (status, _, _) = h
        .post(
            "/api/preprocess/denoise",
            &[image_part("scan.png"), Part::Text { field: "level", value: "loud" }],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.transforms.calls(), vec!["despeckle"]);
}

#[tokio::test]
async fn denoise_level_three_uses_noise_and_smoothing() {
    let h = Harness::new(1);
    let (status, _, _) = h
        .post(
            "/api/preprocess/denoise",
            &[image_part("scan.png"), Part::Text { field: "level", value: "7" }],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.transforms.calls(), vec!["add_noise", "enhance"]);
}

#[tokio::test]
async fn enhance_factor_of_one_skips_sigmoidal_contrast() {
    let h = Harness::new(1);
    let (status, _, _) = h
        .post(
            "/api/preprocess/enhance",
            &[image_part("scan.png"), Part::Text { field: "factor", value: "1.0" }],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.transforms.calls(), vec!["normalize", "contrast"]);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let h = Harness::with_config(1, |b| b.max_upload_bytes(1024));
    let (status, _, _) = h
        .post(
            "/api/preprocess",
            &[Part::File {
                field: "image",
                filename: "big.png",
                bytes: vec![0u8; 8 * 1024],
            }],
        )
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(h.transforms.calls().is_empty());
}

#[tokio::test]
async fn kept_workspaces_stay_on_disk() {
    let h = Harness::with_config(1, |b| b.keep_workspaces(true));
    let (status, _, _) = h.post("/api/preprocess/deskew", &[image_part("scan.png")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.scratch_entries(), 1);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let h = Harness::new(1);
    let (status, _, _) = h.post("/api/ocr", &[image_part("scan.png")]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
