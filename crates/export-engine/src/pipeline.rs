//! Export controller: owns the run state machine and drives one export at a
//! time.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use mdim_common::clock::ClockStepper;
use mdim_common::config::{AppConfig, DeliveryConfig};
use mdim_common::error::{ExportError, ExportResult};
use mdim_export_model::{
    classify, resolve_backend, BackendKind, CompletionDetails, ExportRun, ExportSettings,
    ExportStatus,
};
use serde::Serialize;

use crate::animation::AnimationStore;
use crate::codec::CodecSupport;
use crate::encoder::{
    create_backend, BackendContext, ChunkEncoderFactory, EncoderBackend, EncoderConfig, FileGrant,
};
use crate::frame_source::{FrameSource, FrameTiming};
use crate::renderer::{RendererGuard, SceneRenderer};

/// Progress callback for export runs.
pub type ProgressCallback = Arc<dyn Fn(ExportProgress) + Send + Sync>;

/// Export progress report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportProgress {
    pub status: ExportStatus,

    /// Current progress [0.0, 1.0]. Reaches 1.0 only on completion.
    pub progress: f64,

    /// Frames captured so far.
    pub frame_index: u64,

    pub total_frames: u64,

    /// Estimated time remaining in seconds, once known.
    pub eta_secs: Option<f64>,
}

impl ExportProgress {
    fn of(run: &ExportRun) -> Self {
        Self {
            status: run.status,
            progress: run.progress,
            frame_index: run.frame_index,
            total_frames: run.total_frames,
            eta_secs: run.eta_secs,
        }
    }
}

/// How a started run ended.
#[derive(Debug, Clone)]
pub enum ExportOutcome {
    Completed(CompletionDetails),
    /// The user aborted; nothing was delivered.
    Aborted,
    /// The run failed; the controller is in `Error` with this message.
    Failed(String),
}

/// Machine-wide inputs shared by every run.
#[derive(Clone)]
pub struct ExportEnvironment {
    pub codec_support: CodecSupport,
    pub encoder_factory: Arc<dyn ChunkEncoderFactory>,
    pub delivery: DeliveryConfig,
    /// Where segmented output lands.
    pub output_dir: PathBuf,
    pub app_name: String,
}

impl ExportEnvironment {
    pub fn from_config(
        config: &AppConfig,
        codec_support: CodecSupport,
        encoder_factory: Arc<dyn ChunkEncoderFactory>,
    ) -> Self {
        Self {
            codec_support,
            encoder_factory,
            delivery: config.delivery.clone(),
            output_dir: config.output_dir.clone(),
            app_name: config.app_name.clone(),
        }
    }
}

impl fmt::Debug for ExportEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportEnvironment")
            .field("codec_support", &self.codec_support)
            .field("delivery", &self.delivery)
            .field("output_dir", &self.output_dir)
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}

/// Per-run choices besides the settings themselves.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Force a delivery backend instead of the size-tier recommendation.
    pub backend: Option<BackendKind>,
    /// File the user granted for stream delivery.
    pub stream_grant: Option<FileGrant>,
}

struct ControllerInner {
    env: ExportEnvironment,
    run: Mutex<ExportRun>,
    progress_callback: Mutex<Option<ProgressCallback>>,
}

/// Cloneable handle to the export state. Clones share one run, so a UI can
/// poll or abort while another task awaits [`ExportController::start_export`].
#[derive(Clone)]
pub struct ExportController {
    inner: Arc<ControllerInner>,
}

/// Puts the run back into a resting state if the export future is dropped
/// mid-run.
struct RunLease<'c> {
    controller: &'c ExportController,
    finished: bool,
}

impl Drop for RunLease<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut run = self.controller.lock_run();
        let result = match run.status {
            ExportStatus::Rendering => run.abort_to_idle(),
            ExportStatus::Encoding => run.fail("export was cancelled during encoding"),
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to settle cancelled export");
        }
        tracing::warn!(status = %run.status, "Export future dropped before completion");
    }
}

impl ExportController {
    pub fn new(env: ExportEnvironment) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                env,
                run: Mutex::new(ExportRun::idle()),
                progress_callback: Mutex::new(None),
            }),
        }
    }

    pub fn environment(&self) -> &ExportEnvironment {
        &self.inner.env
    }

    pub fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        *lock(&self.inner.progress_callback) = callback;
    }

    fn lock_run(&self) -> MutexGuard<'_, ExportRun> {
        lock(&self.inner.run)
    }

    /// Copy of the current run state.
    pub fn snapshot(&self) -> ExportRun {
        self.lock_run().clone()
    }

    pub fn progress(&self) -> ExportProgress {
        ExportProgress::of(&self.lock_run())
    }

    pub fn status(&self) -> ExportStatus {
        self.lock_run().status
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    /// Ask the running export to stop. Takes effect at the next frame
    /// boundary. Returns `false` when nothing is rendering; once encoding has
    /// begun the run always finishes.
    pub fn abort_export(&self) -> bool {
        let mut run = self.lock_run();
        let status = run.status;
        if !run.request_abort() {
            if status == ExportStatus::Encoding {
                tracing::info!("Abort ignored, export is already encoding");
            }
            return false;
        }
        tracing::info!(frame = run.frame_index, total = run.total_frames, "Export abort requested");
        true
    }

    /// Dismiss a completed or failed run (Completed/Error → Idle).
    pub fn acknowledge(&self) -> ExportResult<()> {
        let result = self.lock_run().reset();
        self.emit();
        result
    }

    fn emit(&self) {
        let report = self.progress();
        let callback = lock(&self.inner.progress_callback).clone();
        if let Some(cb) = callback {
            cb(report);
        }
    }

    fn check_abort(&self) -> ExportResult<()> {
        if self.lock_run().abort_requested {
            Err(ExportError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Run one export to its end.
    ///
    /// Errors returned directly (`Validation`, `UnsupportedCodec`, `Busy`)
    /// mean the run never started and the renderer was not touched. Once the
    /// run has started, failures are reported as [`ExportOutcome::Failed`]
    /// and leave the controller in `Error`.
    pub async fn start_export(
        &self,
        settings: &ExportSettings,
        options: StartOptions,
        renderer: &mut dyn SceneRenderer,
        animation: &mut dyn AnimationStore,
    ) -> ExportResult<ExportOutcome> {
        let env = &self.inner.env;
        let settings = settings.prepare()?;
        let settings = env.codec_support.negotiate(&settings)?;
        let classification = classify(&settings);
        let kind = resolve_backend(
            &classification,
            options.backend,
            options.stream_grant.is_some(),
        )?;

        let ctx = BackendContext::new(
            EncoderConfig::from_settings(&settings),
            env.codec_support.clone(),
            env.encoder_factory.clone(),
            &env.app_name,
        );
        let mut backend = create_backend(
            kind,
            ctx,
            &env.delivery,
            &env.output_dir,
            options.stream_grant,
        )?;
        let source = FrameSource::new(&settings);
        let clock = ClockStepper::new(settings.fps.as_u32(), settings.warmup_frames, 0.0);
        let total_frames = settings.total_frames();

        let mut guard = RendererGuard::acquire(renderer);
        {
            let mut run = self.lock_run();
            if run.status.is_active() {
                return Err(ExportError::Busy);
            }
            if run.status.is_terminal() {
                run.reset()?;
            }
            run.begin(total_frames, kind, guard.saved())?;
        }
        let mut lease = RunLease {
            controller: self,
            finished: false,
        };

        tracing::info!(
            size = %settings.dimensions(),
            render_target = %source.render_target(),
            fps = settings.fps.as_u32(),
            total_frames,
            warmup_frames = settings.warmup_frames,
            codec = %settings.codec,
            format = %settings.format,
            backend = %kind,
            estimated_mb = classification.estimated_size_mb,
            tier = %classification.tier,
            "Starting export"
        );
        self.emit();
        guard.apply(source.renderer_state(), settings.overlay.as_ref());

        let started = Instant::now();
        let result = self
            .drive(
                &mut guard,
                animation,
                backend.as_mut(),
                &source,
                &clock,
                total_frames,
                started,
            )
            .await;
        backend.dispose().await;
        guard.release();

        let outcome = {
            let mut run = self.lock_run();
            match result {
                Ok(details) => {
                    run.complete(details.clone())?;
                    tracing::info!(
                        backend = %details.backend(),
                        elapsed_secs = started.elapsed().as_secs_f64(),
                        "Export complete"
                    );
                    ExportOutcome::Completed(details)
                }
                Err(ExportError::Aborted) => {
                    let frame = run.frame_index;
                    run.abort_to_idle()?;
                    tracing::info!(frame, "Export aborted");
                    ExportOutcome::Aborted
                }
                Err(err) => {
                    let message = err.to_string();
                    run.fail(message.clone())?;
                    tracing::error!(error = %message, frame = run.frame_index, "Export failed");
                    ExportOutcome::Failed(message)
                }
            }
        };
        lease.finished = true;
        self.emit();
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        guard: &mut RendererGuard<'_>,
        animation: &mut dyn AnimationStore,
        backend: &mut dyn EncoderBackend,
        source: &FrameSource,
        clock: &ClockStepper,
        total_frames: u64,
        started: Instant,
    ) -> ExportResult<CompletionDetails> {
        backend.initialize().await?;

        // Let temporal effects converge before the first captured frame.
        for step in 0..clock.warmup_frames() {
            self.check_abort()?;
            source.warm_up(guard.renderer(), &*animation, clock.preroll_timestamp(step))?;
            tokio::task::yield_now().await;
        }

        for frame_index in 0..total_frames {
            source.advance_and_render(
                guard.renderer(),
                animation,
                clock.timestamp(frame_index),
                clock.frame_duration(),
            )?;
            let frame = source.capture_frame(
                guard.renderer(),
                FrameTiming {
                    index: frame_index,
                    pts_us: clock.pts_us(frame_index),
                    duration_us: clock.duration_us(frame_index),
                },
            )?;
            backend.ingest(frame).await?;

            let abort_requested = {
                let mut run = self.lock_run();
                run.advance_frame();
                run.update_eta(started.elapsed().as_secs_f64());
                run.abort_requested
            };
            self.emit();
            if abort_requested {
                return Err(ExportError::Aborted);
            }
            tokio::task::yield_now().await;
        }

        self.lock_run().begin_encoding()?;
        self.emit();
        tracing::debug!(frames = total_frames, "Finalizing encoder");
        backend.finalize().await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
