//! Mutable state of a single export run.
//!
//! ```text
//!            start            loop done          finalize ok
//!   Idle ───────────▶ Rendering ───────▶ Encoding ───────────▶ Completed
//!    ▲  ▲                │  │               │                      │
//!    │  └──── abort ─────┘  └─▶ Error ◀─────┘                      │
//!    │                           │                                 │
//!    └────── reset ──────────────┴──────────── reset ──────────────┘
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use mdim_common::error::{ExportError, ExportResult};
use serde::Serialize;

use crate::tier::BackendKind;

/// Share of the progress bar covered by the frame loop; the rest is
/// finalization.
pub const RENDER_PROGRESS_SHARE: f64 = 0.95;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Idle,
    Rendering,
    Encoding,
    Completed,
    Error,
}

impl ExportStatus {
    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: ExportStatus) -> bool {
        use ExportStatus::*;
        matches!(
            (self, next),
            (Idle, Rendering)
                | (Rendering, Encoding)
                | (Rendering, Error)
                | (Rendering, Idle)
                | (Encoding, Completed)
                | (Encoding, Error)
                | (Completed, Idle)
                | (Error, Idle)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, ExportStatus::Rendering | ExportStatus::Encoding)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExportStatus::Completed | ExportStatus::Error)
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExportStatus::Idle => "Idle",
            ExportStatus::Rendering => "Rendering",
            ExportStatus::Encoding => "Encoding",
            ExportStatus::Completed => "Completed",
            ExportStatus::Error => "Error",
        };
        f.write_str(label)
    }
}

/// Size and pixel ratio of the live renderer, saved before export.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RendererState {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f64,
}

impl RendererState {
    pub fn new(width: u32, height: u32, pixel_ratio: f64) -> Self {
        Self {
            width,
            height,
            pixel_ratio,
        }
    }

    /// Bit-exact comparison, including the pixel ratio's float bits.
    pub fn bit_eq(&self, other: &RendererState) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.pixel_ratio.to_bits() == other.pixel_ratio.to_bits()
    }
}

/// A finished in-memory video, ready to be saved by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub filename: String,
    pub mime_type: String,
    #[serde(skip)]
    pub data: Arc<Vec<u8>>,
}

impl Artifact {
    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

/// What a completed run produced, by delivery backend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "backend")]
pub enum CompletionDetails {
    InMemory {
        artifact: Artifact,
    },
    Stream {
        path: PathBuf,
        bytes_written: u64,
    },
    Segmented {
        segment_count: u32,
        files: Vec<PathBuf>,
        merge_instructions: String,
    },
}

impl CompletionDetails {
    pub fn backend(&self) -> BackendKind {
        match self {
            CompletionDetails::InMemory { .. } => BackendKind::InMemory,
            CompletionDetails::Stream { .. } => BackendKind::Stream,
            CompletionDetails::Segmented { .. } => BackendKind::Segmented,
        }
    }
}

/// One export invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRun {
    pub status: ExportStatus,
    pub frame_index: u64,
    pub total_frames: u64,
    pub progress: f64,
    pub eta_secs: Option<f64>,
    pub abort_requested: bool,
    pub backend: Option<BackendKind>,
    pub saved_renderer_state: Option<RendererState>,
    pub completion: Option<CompletionDetails>,
    pub error: Option<String>,
}

impl Default for ExportRun {
    fn default() -> Self {
        Self::idle()
    }
}

impl ExportRun {
    pub fn idle() -> Self {
        Self {
            status: ExportStatus::Idle,
            frame_index: 0,
            total_frames: 0,
            progress: 0.0,
            eta_secs: None,
            abort_requested: false,
            backend: None,
            saved_renderer_state: None,
            completion: None,
            error: None,
        }
    }

    fn transition(&mut self, next: ExportStatus) -> ExportResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ExportError::invalid_transition(self.status, next));
        }
        self.status = next;
        Ok(())
    }

    /// Idle → Rendering. Starts a fresh run; the only place the abort flag is
    /// cleared.
    pub fn begin(
        &mut self,
        total_frames: u64,
        backend: BackendKind,
        saved_renderer_state: RendererState,
    ) -> ExportResult<()> {
        self.transition(ExportStatus::Rendering)?;
        self.frame_index = 0;
        self.total_frames = total_frames;
        self.progress = 0.0;
        self.eta_secs = None;
        self.abort_requested = false;
        self.backend = Some(backend);
        self.saved_renderer_state = Some(saved_renderer_state);
        self.completion = None;
        self.error = None;
        Ok(())
    }

    /// Record one captured frame. Progress never decreases and stays below
    /// 1.0 until completion.
    pub fn advance_frame(&mut self) {
        if self.frame_index < self.total_frames {
            self.frame_index += 1;
        }
        let fraction = if self.total_frames == 0 {
            1.0
        } else {
            self.frame_index as f64 / self.total_frames as f64
        };
        self.progress = self.progress.max(fraction * RENDER_PROGRESS_SHARE);
    }

    /// Update the remaining-time estimate from wall time spent so far.
    pub fn update_eta(&mut self, elapsed_secs: f64) {
        self.eta_secs = if self.progress > 0.0 {
            Some(((elapsed_secs / self.progress) - elapsed_secs).max(0.0))
        } else {
            None
        };
    }

    /// Rendering → Encoding.
    pub fn begin_encoding(&mut self) -> ExportResult<()> {
        self.transition(ExportStatus::Encoding)?;
        self.progress = self.progress.max(RENDER_PROGRESS_SHARE);
        Ok(())
    }

    /// Encoding → Completed.
    pub fn complete(&mut self, details: CompletionDetails) -> ExportResult<()> {
        self.transition(ExportStatus::Completed)?;
        self.progress = 1.0;
        self.eta_secs = Some(0.0);
        self.completion = Some(details);
        Ok(())
    }

    /// Rendering/Encoding → Error.
    pub fn fail(&mut self, message: impl Into<String>) -> ExportResult<()> {
        self.transition(ExportStatus::Error)?;
        self.eta_secs = None;
        self.error = Some(message.into());
        Ok(())
    }

    /// Mark the run for cancellation. Polled by the frame loop, so only a
    /// rendering run can be aborted; returns whether the request was taken.
    pub fn request_abort(&mut self) -> bool {
        if self.status != ExportStatus::Rendering {
            return false;
        }
        self.abort_requested = true;
        true
    }

    /// Rendering → Idle after a user abort. Everything but the abort flag is
    /// cleared.
    pub fn abort_to_idle(&mut self) -> ExportResult<()> {
        self.transition(ExportStatus::Idle)?;
        self.clear();
        Ok(())
    }

    /// Completed/Error → Idle once the user dismissed the result.
    pub fn reset(&mut self) -> ExportResult<()> {
        if self.status == ExportStatus::Idle {
            return Ok(());
        }
        self.transition(ExportStatus::Idle)?;
        self.clear();
        Ok(())
    }

    fn clear(&mut self) {
        self.frame_index = 0;
        self.total_frames = 0;
        self.progress = 0.0;
        self.eta_secs = None;
        self.backend = None;
        self.saved_renderer_state = None;
        self.completion = None;
        self.error = None;
    }
}
