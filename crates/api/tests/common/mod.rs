#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use image::{ImageBuffer, ImageFormat, Rgb};
use restorer_api::config::{EngineSettings, LogFormat, ServerConfig, DEFAULT_ENGINE_ARGS};
use restorer_api::router::build_app_router;
use restorer_api::state::AppState;
use restorer_core::job::DeliveryMode;
use restorer_core::types::JobId;
use restorer_engine::{EngineError, PassthroughEngine, RestorationEngine};
use restorer_pipeline::{
    Dispatcher, HeartbeatMonitor, JobStore, PipelineConfig, StagingArea, StatusService,
};
use tower::ServiceExt;

pub const BOUNDARY: &str = "restorer-test-boundary";

/// Build a test `ServerConfig` with safe defaults.
///
/// Opportunistic and periodic sweeps are off so tests control file
/// lifetimes.
pub fn test_config(staging: &Path, mode: DeliveryMode) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        max_upload_bytes: 1024 * 1024,
        log_format: LogFormat::Text,
        engine: EngineSettings {
            program: None,
            args: DEFAULT_ENGINE_ARGS.to_string(),
        },
        pipeline: PipelineConfig {
            staging_dir: staging.to_path_buf(),
            delivery_mode: mode,
            heartbeat_interval_secs: 1,
            sweep_on_submit: false,
            sweep_interval_secs: 0,
            ..PipelineConfig::default()
        },
    }
}

/// Application under test plus the handles tests inspect.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<JobStore>,
    pub staging: Arc<StagingArea>,
    pub dispatcher: Dispatcher,
    _dir: tempfile::TempDir,
}

impl TestApp {
    /// Passthrough engine, single-read delivery.
    pub async fn new() -> Self {
        Self::with(Arc::new(PassthroughEngine), DeliveryMode::SingleRead).await
    }

    pub async fn with(engine: Arc<dyn RestorationEngine>, mode: DeliveryMode) -> Self {
        Self::build(engine, mode, None).await
    }

    /// Like [`TestApp::with`] but with a sub-second heartbeat.
    pub async fn with_heartbeat(engine: Arc<dyn RestorationEngine>, every: Duration) -> Self {
        Self::build(engine, DeliveryMode::SingleRead, Some(every)).await
    }

    async fn build(
        engine: Arc<dyn RestorationEngine>,
        mode: DeliveryMode,
        heartbeat: Option<Duration>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), mode);

        let staging = Arc::new(StagingArea::open(dir.path()).await.unwrap());
        let store = Arc::new(JobStore::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&staging),
            engine,
            &config.pipeline,
        );
        let status = StatusService::new(Arc::clone(&store), Arc::clone(&staging), mode);
        let heartbeat =
            HeartbeatMonitor::new(heartbeat.unwrap_or_else(|| config.pipeline.heartbeat_interval()));

        let state = AppState {
            store: Arc::clone(&store),
            dispatcher: dispatcher.clone(),
            status,
            heartbeat,
        };

        Self {
            router: build_app_router(state, &config),
            store,
            staging,
            dispatcher,
            _dir: dir,
        }
    }

    pub fn files(&self) -> usize {
        std::fs::read_dir(self.staging.root()).unwrap().count()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn upload(&self, uri: &str, filename: &str, bytes: &[u8]) -> Response<Body> {
        self.send(multipart_request(uri, "file", filename, bytes)).await
    }

    /// Submit an image and wait for the job to finish processing.
    pub async fn submit_and_settle(&self, filename: &str, bytes: &[u8]) -> String {
        let response = self.upload("/api/v1/jobs", filename, bytes).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        let id = json["data"]["job_id"].as_str().unwrap().to_string();

        self.wait_until_terminal(&id).await;
        id
    }

    async fn wait_until_terminal(&self, id: &str) {
        let id: JobId = id.parse().unwrap();
        for _ in 0..200 {
            match self.store.get(id).await {
                Ok(job) if job.status.is_terminal() => return,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        panic!("job {id} never finished");
    }
}

/// Build a `multipart/form-data` POST with a single file field.
pub fn multipart_request(uri: &str, field: &str, filename: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Encode a small PNG for upload.
pub fn png_bytes() -> Vec<u8> {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_fn(6, 6, |x, y| Rgb([(x * 40) as u8, (y * 40) as u8, 200]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Engine that always fails with a fixed message.
pub struct FailingEngine;

impl RestorationEngine for FailingEngine {
    fn process(&self, _input: &Path, _output: &Path) -> Result<bool, EngineError> {
        Err(EngineError::Other("no face detected".into()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Passthrough that takes its time.
pub struct SlowEngine(pub Duration);

impl RestorationEngine for SlowEngine {
    fn process(&self, input: &Path, output: &Path) -> Result<bool, EngineError> {
        std::thread::sleep(self.0);
        std::fs::copy(input, output)?;
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
