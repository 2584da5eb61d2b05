//! Encoder backends.
//!
//! A backend owns one [`ChunkEncoder`] (or one per segment) and decides where
//! the encoded bytes go:
//!
//! - [`memory::InMemoryBackend`] buffers everything and hands back one artifact
//! - [`stream::StreamBackend`] writes chunks to a granted file as they arrive
//! - [`segmented::SegmentedBackend`] cuts the output into separate files

pub mod ffmpeg;
pub mod memory;
pub mod segmented;
pub mod stream;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use mdim_common::config::DeliveryConfig;
use mdim_common::error::{ExportError, ExportResult};
use mdim_export_model::{
    BackendKind, BitrateMode, CompletionDetails, ContainerFormat, Dimensions, ExportSettings,
    HardwareAcceleration, VideoCodec,
};

use crate::codec::CodecSupport;
use crate::frame_source::Frame;

pub use ffmpeg::{FfmpegChunkEncoder, FfmpegEncoderFactory};
pub use memory::InMemoryBackend;
pub use segmented::SegmentedBackend;
pub use stream::StreamBackend;

/// Encoded bytes emitted by a [`ChunkEncoder`], in output order.
pub type EncodedChunk = Vec<u8>;

/// Parameters handed to the video encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub dimensions: Dimensions,
    pub fps: u32,
    pub format: ContainerFormat,
    pub codec: VideoCodec,
    pub bitrate_bps: u64,
    pub bitrate_mode: BitrateMode,
    pub hardware_acceleration: HardwareAcceleration,
}

impl EncoderConfig {
    pub fn from_settings(settings: &ExportSettings) -> Self {
        Self {
            dimensions: settings.dimensions(),
            fps: settings.fps.as_u32(),
            format: settings.format,
            codec: settings.codec,
            bitrate_bps: settings.bitrate_bps(),
            bitrate_mode: settings.bitrate_mode,
            hardware_acceleration: settings.hardware_acceleration,
        }
    }

    pub fn validate(&self) -> ExportResult<()> {
        let Dimensions { width, height } = self.dimensions;
        if width == 0 || height == 0 {
            return Err(ExportError::validation("encode width/height must be non-zero"));
        }
        if width % 2 != 0 || height % 2 != 0 {
            return Err(ExportError::validation(
                "encode width/height must be even (required for yuv420p output)",
            ));
        }
        if self.fps == 0 {
            return Err(ExportError::validation("encode fps must be non-zero"));
        }
        if !self.format.supports(self.codec) {
            return Err(ExportError::unsupported_codec(format!(
                "{} cannot be muxed into {}",
                self.codec, self.format
            )));
        }
        Ok(())
    }
}

/// Low-level video encoder: RGBA frames in, container bytes out.
///
/// Implementations may buffer internally; `encode` returns whatever output is
/// ready and `flush` drains the rest and finishes the container.
pub trait ChunkEncoder: Send {
    fn encode(&mut self, frame: &Frame) -> ExportResult<Vec<EncodedChunk>>;

    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>>;

    /// Stop immediately and discard pending output.
    fn abort(&mut self);
}

/// Creates chunk encoders. Segmented delivery asks for a fresh one per
/// segment.
pub trait ChunkEncoderFactory: Send + Sync {
    fn create(&self, config: &EncoderConfig) -> ExportResult<Box<dyn ChunkEncoder>>;
}

/// Destination strategy for encoded output.
///
/// Lifecycle: `initialize` → `ingest`* → `finalize`, with `dispose` allowed at
/// any point and more than once.
#[async_trait]
pub trait EncoderBackend: Send {
    fn kind(&self) -> BackendKind;

    async fn initialize(&mut self) -> ExportResult<()>;

    /// Encode one frame. Presentation timestamps must strictly increase.
    async fn ingest(&mut self, frame: Frame) -> ExportResult<()>;

    /// Flush the encoder and deliver the output.
    async fn finalize(&mut self) -> ExportResult<CompletionDetails>;

    /// Release the encoder and any open output without delivering it.
    async fn dispose(&mut self);
}

/// A user-granted output file for stream delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGrant {
    path: PathBuf,
}

impl FileGrant {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Everything a backend needs besides its delivery target.
#[derive(Clone)]
pub struct BackendContext {
    pub config: EncoderConfig,
    pub support: CodecSupport,
    pub factory: Arc<dyn ChunkEncoderFactory>,
    /// File name without extension, e.g. `mdimension-20260101-120000`.
    pub stem: String,
}

impl fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendContext")
            .field("config", &self.config)
            .field("support", &self.support)
            .field("stem", &self.stem)
            .finish_non_exhaustive()
    }
}

impl BackendContext {
    pub fn new(
        config: EncoderConfig,
        support: CodecSupport,
        factory: Arc<dyn ChunkEncoderFactory>,
        app_name: &str,
    ) -> Self {
        Self {
            config,
            support,
            factory,
            stem: artifact_stem(app_name, chrono::Local::now()),
        }
    }

    /// Fail with `UnsupportedCodec` unless the negotiated codec/container pair
    /// passed the capability probe.
    pub fn ensure_supported(&self) -> ExportResult<()> {
        self.config.validate()?;
        if !self.support.is_supported(self.config.codec) {
            return Err(ExportError::unsupported_codec(format!(
                "{} encoding is not available on this system",
                self.config.codec
            )));
        }
        Ok(())
    }

    pub fn create_encoder(&self) -> ExportResult<Box<dyn ChunkEncoder>> {
        self.factory.create(&self.config)
    }

    pub fn filename(&self) -> String {
        format!("{}.{}", self.stem, self.config.format.extension())
    }
}

/// `{app}-{YYYYMMDD-HHMMSS}` with unsafe file name characters replaced.
pub fn artifact_stem<Tz>(app_name: &str, at: chrono::DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: fmt::Display,
{
    let app: String = app_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let app = if app.is_empty() { "export".to_string() } else { app };
    format!("{app}-{}", at.format("%Y%m%d-%H%M%S"))
}

/// Build the backend for `kind`.
pub fn create_backend(
    kind: BackendKind,
    ctx: BackendContext,
    delivery: &DeliveryConfig,
    output_dir: &Path,
    stream_grant: Option<FileGrant>,
) -> ExportResult<Box<dyn EncoderBackend>> {
    let backend: Box<dyn EncoderBackend> = match kind {
        BackendKind::InMemory => Box::new(InMemoryBackend::new(ctx, delivery.memory_limit_bytes)),
        BackendKind::Stream => {
            let grant = stream_grant.ok_or_else(|| {
                ExportError::validation("stream delivery requires a granted output file")
            })?;
            Box::new(StreamBackend::new(ctx, grant, delivery.stream_buffer_chunks))
        }
        BackendKind::Segmented => Box::new(SegmentedBackend::new(
            ctx,
            delivery.segment_policy,
            output_dir.to_path_buf(),
        )),
    };
    Ok(backend)
}

/// Backend lifecycle position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Created,
    Ready,
    Finalized,
    Disposed,
}

impl Lifecycle {
    pub(crate) fn ensure_created(self) -> ExportResult<()> {
        match self {
            Lifecycle::Created => Ok(()),
            other => Err(ExportError::encode(format!(
                "backend cannot be initialized twice (state: {other:?})"
            ))),
        }
    }

    pub(crate) fn ensure_ready(self, operation: &str) -> ExportResult<()> {
        match self {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Created => Err(ExportError::encode(format!(
                "{operation} before initialize"
            ))),
            Lifecycle::Finalized => Err(ExportError::encode(format!(
                "{operation} after finalize"
            ))),
            Lifecycle::Disposed => Err(ExportError::encode(format!(
                "{operation} after dispose"
            ))),
        }
    }
}

/// Rejects frames that arrive out of order or at the wrong size.
#[derive(Debug, Clone)]
pub(crate) struct FrameOrder {
    dimensions: Dimensions,
    last_pts_us: Option<u64>,
    frames: u64,
}

impl FrameOrder {
    pub(crate) fn new(dimensions: Dimensions) -> Self {
        Self {
            dimensions,
            last_pts_us: None,
            frames: 0,
        }
    }

    pub(crate) fn check(&mut self, frame: &Frame) -> ExportResult<()> {
        if frame.dimensions() != self.dimensions {
            return Err(ExportError::encode(format!(
                "frame {} is {}, encoder expects {}",
                frame.index,
                frame.dimensions(),
                self.dimensions
            )));
        }
        if frame.data.len() != self.dimensions.rgba_len() {
            return Err(ExportError::encode(format!(
                "frame {} holds {} bytes, expected {}",
                frame.index,
                frame.data.len(),
                self.dimensions.rgba_len()
            )));
        }
        if let Some(last) = self.last_pts_us {
            if frame.pts_us <= last {
                return Err(ExportError::encode(format!(
                    "frame {} timestamp {}us does not follow {}us",
                    frame.index, frame.pts_us, last
                )));
            }
        }
        self.last_pts_us = Some(frame.pts_us);
        self.frames += 1;
        Ok(())
    }

    pub(crate) fn frames(&self) -> u64 {
        self.frames
    }
}
