#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{ImageBuffer, ImageFormat, Rgb};
use restorer_core::job::DeliveryMode;
use restorer_engine::{EngineError, RestorationEngine};
use restorer_pipeline::{Dispatcher, JobStore, PipelineConfig, StagingArea, StatusService};

/// Encode a small PNG for upload.
pub fn png_bytes() -> Vec<u8> {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 90]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// What a [`ScriptedEngine`] does on every call.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Write `restored` to the output and report success.
    Restore,
    /// Report no result.
    Decline,
    /// Return an engine error.
    Error,
    Panic,
    /// Report success without writing anything.
    ClaimWithoutOutput,
}

/// Test engine with a fixed behaviour, an optional delay, and a record of
/// how many calls overlapped.
pub struct ScriptedEngine {
    script: Script,
    delay: Duration,
    running: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Self {
        Self::slow(script, Duration::ZERO)
    }

    pub fn slow(script: Script, delay: Duration) -> Self {
        Self {
            script,
            delay,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

impl RestorationEngine for ScriptedEngine {
    fn process(&self, _input: &Path, output: &Path) -> Result<bool, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match self.script {
            Script::Restore => {
                std::fs::write(output, b"restored")?;
                Ok(true)
            }
            Script::Decline => Ok(false),
            Script::Error => Err(EngineError::Other("model weights missing".into())),
            Script::Panic => panic!("cuda out of memory"),
            Script::ClaimWithoutOutput => Ok(true),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Dispatcher, status service and the pieces behind them.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<JobStore>,
    pub staging: Arc<StagingArea>,
    pub dispatcher: Dispatcher,
    pub status: StatusService,
}

impl Harness {
    pub async fn new(engine: Arc<dyn RestorationEngine>, config: PipelineConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let staging = Arc::new(StagingArea::open(dir.path()).await.unwrap());
        let store = Arc::new(JobStore::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&staging),
            engine,
            &config,
        );
        let status = StatusService::new(
            Arc::clone(&store),
            Arc::clone(&staging),
            config.delivery_mode,
        );
        Self {
            dir,
            store,
            staging,
            dispatcher,
            status,
        }
    }

    pub async fn with_script(script: Script) -> Self {
        Self::new(Arc::new(ScriptedEngine::new(script)), config(DeliveryMode::SingleRead)).await
    }

    /// Number of files currently in the staging directory.
    pub fn files(&self) -> usize {
        std::fs::read_dir(self.staging.root()).unwrap().count()
    }
}

/// Test config with opportunistic sweeps off so file counts are stable.
pub fn config(mode: DeliveryMode) -> PipelineConfig {
    PipelineConfig {
        delivery_mode: mode,
        sweep_on_submit: false,
        sweep_interval_secs: 0,
        ..PipelineConfig::default()
    }
}
