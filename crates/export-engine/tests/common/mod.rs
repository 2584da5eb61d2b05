//! Test doubles for export pipeline tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use mdim_common::config::DeliveryConfig;
use mdim_common::error::{ExportError, ExportResult};
use mdim_export_engine::encoder::{ChunkEncoder, ChunkEncoderFactory, EncodedChunk, EncoderConfig};
use mdim_export_engine::{
    CodecSupport, ExportController, ExportEnvironment, Frame, RgbaImage, RotationSnapshot,
    RotationStore, SceneRenderer,
};
use mdim_export_model::{ExportSettings, Fps, RendererState, Resolution, TextOverlay, VideoCodec};

pub const TRAILER: &[u8] = b"MOOV";

/// Software stand-in for the live renderer. Pixels encode the last render
/// timestamp so captured frames are comparable across runs.
pub struct FakeRenderer {
    pub state: RendererState,
    pub set_states: Vec<RendererState>,
    pub restores: u32,
    pub overlay: Option<String>,
    pub renders: Vec<(f64, RotationSnapshot)>,
    pub fail_on_render: Option<usize>,
    pub abort_on_render: Option<(ExportController, usize)>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self {
            state: RendererState::new(1280, 800, 2.0),
            set_states: Vec::new(),
            restores: 0,
            overlay: None,
            renders: Vec::new(),
            fail_on_render: None,
            abort_on_render: None,
        }
    }

    pub fn live_state() -> RendererState {
        RendererState::new(1280, 800, 2.0)
    }
}

impl SceneRenderer for FakeRenderer {
    fn state(&self) -> RendererState {
        self.state
    }

    fn set_state(&mut self, state: &RendererState) {
        self.set_states.push(*state);
        self.state = *state;
    }

    fn restore_state(&mut self, state: &RendererState) {
        self.restores += 1;
        self.state = *state;
    }

    fn set_overlay(&mut self, overlay: Option<&TextOverlay>) {
        self.overlay = overlay.map(|o| o.text.clone());
    }

    fn advance_and_render(
        &mut self,
        timestamp_secs: f64,
        rotation: &RotationSnapshot,
    ) -> ExportResult<()> {
        let call = self.renders.len() + 1;
        if self.fail_on_render == Some(call) {
            return Err(ExportError::render("context lost"));
        }
        self.renders.push((timestamp_secs, rotation.clone()));
        if let Some((controller, at)) = &self.abort_on_render {
            if *at == call {
                controller.abort_export();
            }
        }
        Ok(())
    }

    fn read_pixels(&mut self) -> ExportResult<RgbaImage> {
        let width = (self.state.width as f64 * self.state.pixel_ratio).round() as u32;
        let height = (self.state.height as f64 * self.state.pixel_ratio).round() as u32;
        let stamp = self
            .renders
            .last()
            .map(|(t, _)| (t * 1000.0).round() as u32)
            .unwrap_or(0)
            .to_le_bytes();
        let data = stamp
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Ok(RgbaImage::new(width, height, data))
    }
}

/// What the fake encoder saw.
#[derive(Debug, Default)]
pub struct EncoderLog {
    pub configs: Vec<EncoderConfig>,
    pub pts_us: Vec<u64>,
    pub flushed: u32,
    pub aborted: u32,
    /// Answer of `abort_export` when it was called from inside `flush`.
    pub abort_accepted_in_flush: Option<bool>,
}

/// Chunk encoder that "encodes" each frame as its pts plus a pixel sample.
pub struct RecordingFactory {
    pub log: Arc<Mutex<EncoderLog>>,
    pub fail_on_frame: Option<u64>,
    pub fail_on_flush: bool,
    /// Controller asked to abort while the encoder flushes.
    pub abort_in_flush: Arc<Mutex<Option<ExportController>>>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(EncoderLog::default())),
            fail_on_frame: None,
            fail_on_flush: false,
            abort_in_flush: Arc::new(Mutex::new(None)),
        }
    }

    pub fn pts(&self) -> Vec<u64> {
        self.log.lock().unwrap().pts_us.clone()
    }
}

struct RecordingEncoder {
    log: Arc<Mutex<EncoderLog>>,
    fail_on_frame: Option<u64>,
    fail_on_flush: bool,
    abort_in_flush: Arc<Mutex<Option<ExportController>>>,
}

impl ChunkEncoder for RecordingEncoder {
    fn encode(&mut self, frame: &Frame) -> ExportResult<Vec<EncodedChunk>> {
        if self.fail_on_frame == Some(frame.index) {
            return Err(ExportError::encode(format!("encoder rejected frame {}", frame.index)));
        }
        self.log.lock().unwrap().pts_us.push(frame.pts_us);
        let mut chunk = frame.pts_us.to_le_bytes().to_vec();
        chunk.extend_from_slice(&frame.data[..4]);
        Ok(vec![chunk])
    }

    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        if self.fail_on_flush {
            return Err(ExportError::encode("muxer failed"));
        }
        let controller = self.abort_in_flush.lock().unwrap().clone();
        if let Some(controller) = controller {
            self.log.lock().unwrap().abort_accepted_in_flush = Some(controller.abort_export());
        }
        self.log.lock().unwrap().flushed += 1;
        Ok(vec![TRAILER.to_vec()])
    }

    fn abort(&mut self) {
        self.log.lock().unwrap().aborted += 1;
    }
}

impl ChunkEncoderFactory for RecordingFactory {
    fn create(&self, config: &EncoderConfig) -> ExportResult<Box<dyn ChunkEncoder>> {
        self.log.lock().unwrap().configs.push(config.clone());
        Ok(Box::new(RecordingEncoder {
            log: self.log.clone(),
            fail_on_frame: self.fail_on_frame,
            fail_on_flush: self.fail_on_flush,
            abort_in_flush: self.abort_in_flush.clone(),
        }))
    }
}

pub fn environment(
    factory: Arc<RecordingFactory>,
    support: CodecSupport,
    output_dir: PathBuf,
) -> ExportEnvironment {
    ExportEnvironment {
        codec_support: support,
        encoder_factory: factory,
        delivery: DeliveryConfig::default(),
        output_dir,
        app_name: "mdimension".to_string(),
    }
}

pub fn all_codecs() -> CodecSupport {
    CodecSupport::from_supported(VideoCodec::ALL)
}

pub fn controller(factory: Arc<RecordingFactory>) -> ExportController {
    ExportController::new(environment(factory, all_codecs(), std::env::temp_dir()))
}

/// Small, fast settings: 256x144 at the given rate and length.
pub fn settings(fps: Fps, duration_secs: f64) -> ExportSettings {
    ExportSettings {
        resolution: Resolution::Custom {
            width: 256,
            height: 144,
        },
        fps,
        duration_secs,
        bitrate_mbps: 4.0,
        warmup_frames: 4,
        ..Default::default()
    }
}

pub fn rotation() -> RotationStore {
    let mut store = RotationStore::new(4).with_speed(0.7).with_bias(0.5);
    store.animate("XW");
    store.animate("YZ");
    store.animate("ZW");
    store
}
