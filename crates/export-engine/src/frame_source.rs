//! Frame source: steps the scene and captures pixels.

use mdim_common::error::{ExportError, ExportResult};
use mdim_export_model::{CropRect, Dimensions, ExportSettings, RendererState};

use crate::animation::{step_rotation, AnimationStore, RotationSnapshot};
use crate::renderer::SceneRenderer;

/// Timing of one captured frame on the encoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub index: u64,
    pub pts_us: u64,
    pub duration_us: u64,
}

/// One captured RGBA8 frame at output resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub pts_us: u64,
    pub duration_us: u64,
}

impl Frame {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// Pixel rectangle cut out of the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CropWindow {
    x: u32,
    y: u32,
}

/// Produces output frames from the scene renderer.
///
/// Without a crop the renderer draws straight at output size. With a crop the
/// renderer draws a larger target so the cropped region still has output
/// resolution.
#[derive(Debug, Clone)]
pub struct FrameSource {
    output: Dimensions,
    render_target: Dimensions,
    window: Option<CropWindow>,
}

fn window_offset(origin: f64, target: u32, output: u32) -> u32 {
    let max = target - output;
    ((origin * target as f64).round() as u32).min(max)
}

impl FrameSource {
    /// Plan capture for validated settings. Validation guarantees a cropped
    /// render target fits within the dimension limit.
    pub fn new(settings: &ExportSettings) -> Self {
        let output = settings.dimensions();
        match settings.crop.filter(|crop| !crop.is_full()) {
            Some(crop) => Self::with_crop(output, crop),
            None => Self {
                output,
                render_target: output,
                window: None,
            },
        }
    }

    fn with_crop(output: Dimensions, crop: CropRect) -> Self {
        let render_target = crop.render_target(output);
        let window = CropWindow {
            x: window_offset(crop.x, render_target.width, output.width),
            y: window_offset(crop.y, render_target.height, output.height),
        };
        Self {
            output,
            render_target,
            window: Some(window),
        }
    }

    pub fn output(&self) -> Dimensions {
        self.output
    }

    pub fn render_target(&self) -> Dimensions {
        self.render_target
    }

    /// Renderer state used while exporting. Pixel ratio is pinned to 1 so the
    /// drawing buffer matches the target exactly.
    pub fn renderer_state(&self) -> RendererState {
        RendererState::new(self.render_target.width, self.render_target.height, 1.0)
    }

    /// Render one warm-up step. Temporal effects advance; rotation does not.
    pub fn warm_up(
        &self,
        renderer: &mut dyn SceneRenderer,
        animation: &dyn AnimationStore,
        timestamp_secs: f64,
    ) -> ExportResult<()> {
        renderer.advance_and_render(timestamp_secs, &animation.snapshot())
    }

    /// Advance rotation by one frame and render the scene at `timestamp_secs`.
    pub fn advance_and_render(
        &self,
        renderer: &mut dyn SceneRenderer,
        animation: &mut dyn AnimationStore,
        timestamp_secs: f64,
        frame_duration_secs: f64,
    ) -> ExportResult<RotationSnapshot> {
        let snapshot = step_rotation(animation, frame_duration_secs);
        renderer.advance_and_render(timestamp_secs, &snapshot)?;
        Ok(snapshot)
    }

    /// Read back the rendered frame at output resolution.
    pub fn capture_frame(
        &self,
        renderer: &mut dyn SceneRenderer,
        timing: FrameTiming,
    ) -> ExportResult<Frame> {
        let image = renderer.read_pixels()?;
        let target = self.render_target;
        if image.width != target.width || image.height != target.height {
            return Err(ExportError::render(format!(
                "renderer produced {}x{} pixels, expected {target}",
                image.width, image.height
            )));
        }
        if !image.is_consistent() {
            return Err(ExportError::render(format!(
                "pixel buffer holds {} bytes, expected {}",
                image.data.len(),
                target.rgba_len()
            )));
        }

        let data = match self.window {
            None => image.data,
            Some(window) => self.cut(&image.data, window),
        };

        Ok(Frame {
            index: timing.index,
            width: self.output.width,
            height: self.output.height,
            data,
            pts_us: timing.pts_us,
            duration_us: timing.duration_us,
        })
    }

    fn cut(&self, source: &[u8], window: CropWindow) -> Vec<u8> {
        let src_stride = self.render_target.width as usize * 4;
        let row_len = self.output.width as usize * 4;
        let mut out = Vec::with_capacity(self.output.rgba_len());
        for row in 0..self.output.height as usize {
            let start = (window.y as usize + row) * src_stride + window.x as usize * 4;
            out.extend_from_slice(&source[start..start + row_len]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::RotationStore;
    use crate::renderer::RgbaImage;
    use mdim_export_model::{Resolution, TextOverlay};

    /// Paints each pixel with its own coordinates so crops can be checked.
    struct CoordinateRenderer {
        state: RendererState,
        renders: Vec<(f64, RotationSnapshot)>,
        wrong_size: bool,
    }

    impl CoordinateRenderer {
        fn new() -> Self {
            Self {
                state: RendererState::new(100, 100, 1.0),
                renders: Vec::new(),
                wrong_size: false,
            }
        }
    }

    impl SceneRenderer for CoordinateRenderer {
        fn state(&self) -> RendererState {
            self.state
        }

        fn set_state(&mut self, state: &RendererState) {
            self.state = *state;
        }

        fn set_overlay(&mut self, _: Option<&TextOverlay>) {}

        fn advance_and_render(
            &mut self,
            timestamp_secs: f64,
            rotation: &RotationSnapshot,
        ) -> ExportResult<()> {
            self.renders.push((timestamp_secs, rotation.clone()));
            Ok(())
        }

        fn read_pixels(&mut self) -> ExportResult<RgbaImage> {
            let (w, h) = (self.state.width, self.state.height);
            if self.wrong_size {
                return Ok(RgbaImage::blank(w / 2, h));
            }
            let mut data = Vec::with_capacity(w as usize * h as usize * 4);
            for y in 0..h {
                for x in 0..w {
                    data.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, (x / 256) as u8, 255]);
                }
            }
            Ok(RgbaImage::new(w, h, data))
        }
    }

    fn settings(width: u32, height: u32, crop: Option<CropRect>) -> ExportSettings {
        ExportSettings {
            resolution: Resolution::Custom { width, height },
            crop,
            ..Default::default()
        }
    }

    fn timing(index: u64) -> FrameTiming {
        FrameTiming {
            index,
            pts_us: index * 1000,
            duration_us: 1000,
        }
    }

    #[test]
    fn test_uncropped_target_matches_output() {
        let source = FrameSource::new(&settings(640, 360, None));
        assert_eq!(source.render_target(), Dimensions::new(640, 360));
        assert_eq!(source.renderer_state().pixel_ratio, 1.0);
    }

    #[test]
    fn test_crop_upscales_render_target() {
        let crop = CropRect {
            x: 0.25,
            y: 0.5,
            width: 0.5,
            height: 0.5,
        };
        let source = FrameSource::new(&settings(640, 360, Some(crop)));
        assert_eq!(source.render_target(), Dimensions::new(1280, 720));

        let mut renderer = CoordinateRenderer::new();
        renderer.set_state(&source.renderer_state());
        let frame = source.capture_frame(&mut renderer, timing(3)).unwrap();
        assert_eq!(frame.data.len(), Dimensions::new(640, 360).rgba_len());
        // top-left output pixel comes from (320, 360) in the render target
        assert_eq!(&frame.data[0..4], &[(320 % 256) as u8, (360 % 256) as u8, 1, 255]);
        assert_eq!(frame.index, 3);
        assert_eq!(frame.pts_us, 3000);
    }

    #[test]
    fn test_crop_window_scales_both_axes_together() {
        let crop = CropRect {
            x: 0.5,
            y: 0.5,
            width: 0.5,
            height: 0.5,
        };
        let settings = settings(1920, 1080, Some(crop)).prepare().unwrap();
        let source = FrameSource::new(&settings);
        assert_eq!(source.render_target(), Dimensions::new(3840, 2160));

        let mut renderer = CoordinateRenderer::new();
        renderer.set_state(&source.renderer_state());
        let frame = source.capture_frame(&mut renderer, timing(0)).unwrap();
        // top-left output pixel comes from (1920, 1080) in the render target
        assert_eq!(
            &frame.data[0..4],
            &[(1920 % 256) as u8, (1080 % 256) as u8, (1920 / 256) as u8, 255]
        );
    }

    #[test]
    fn test_size_mismatch_is_render_error() {
        let source = FrameSource::new(&settings(256, 256, None));
        let mut renderer = CoordinateRenderer::new();
        renderer.set_state(&source.renderer_state());
        renderer.wrong_size = true;
        let err = source.capture_frame(&mut renderer, timing(0)).unwrap_err();
        assert!(matches!(err, ExportError::Render { .. }));
    }

    #[test]
    fn test_warm_up_does_not_rotate() {
        let source = FrameSource::new(&settings(256, 256, None));
        let mut renderer = CoordinateRenderer::new();
        let mut store = RotationStore::new(4).with_speed(1.0);
        store.animate("XW");
        source.warm_up(&mut renderer, &store, 0.0).unwrap();
        assert_eq!(store.angle("XW"), 0.0);

        let snapshot = source
            .advance_and_render(&mut renderer, &mut store, 0.5, 0.25)
            .unwrap();
        assert_eq!(snapshot.angle("XW"), Some(0.25));
        assert_eq!(renderer.renders.len(), 2);
        assert_eq!(renderer.renders[1].0, 0.5);
    }
}
