//! mdim Export Engine
//!
//! Offline pipeline that drives the live scene renderer through a fixed
//! number of discrete animation steps and encodes every frame into a video,
//! independent of wall-clock jitter or display refresh rate.
//!
//! # Pipeline Architecture
//!
//! ```text
//! ExportSettings ──▶ classify ──▶ EncoderBackend (memory | stream | segmented)
//!                                          ▲
//! ClockStepper ──▶ FrameSource ──┐         │ ingest (strict pts order)
//!      │              │          ▼         │
//!      │        AnimationStore  SceneRenderer ──▶ capture_frame ──┘
//!      ▼
//!  pre-roll (warm-up) ─▶ capture loop ─▶ finalize ─▶ restore renderer
//! ```
//!
//! The renderer's size and pixel ratio are leased for the duration of a run
//! and restored exactly once on every exit path.

pub mod animation;
pub mod codec;
pub mod encoder;
pub mod frame_source;
pub mod pipeline;
pub mod renderer;

pub use animation::{AnimationStore, RotationSnapshot, RotationStore};
pub use codec::{CodecProbe, CodecSupport, FfmpegCodecProbe, ProbeConfig};
pub use encoder::{ChunkEncoder, ChunkEncoderFactory, EncoderBackend, EncoderConfig, FileGrant};
pub use frame_source::{Frame, FrameSource, FrameTiming};
pub use pipeline::*;
pub use renderer::{RendererGuard, RgbaImage, SceneRenderer};
