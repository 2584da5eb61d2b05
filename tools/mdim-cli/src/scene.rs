//! Software preview scene: a rotating n-cube wireframe.
//!
//! Vertices are rotated in n dimensions, collapsed to 3D with a perspective
//! divide over the higher axes, then projected onto the image plane. Edges
//! are splatted with sub-pixel jitter and blended into an exponentially
//! decaying history buffer, so the image depends on how far the clock has
//! advanced and warm-up frames settle the trails before capture.

use mdim_common::error::{ExportError, ExportResult};
use mdim_export_engine::animation::rotate_point;
use mdim_export_engine::{RgbaImage, RotationSnapshot, SceneRenderer};
use mdim_export_model::{RendererState, TextOverlay};

use crate::overlay;

pub const MIN_SCENE_DIMENSION: usize = 3;
pub const MAX_SCENE_DIMENSION: usize = 8;

/// Distance of the n-to-3 projection plane.
const PROJECTION_DISTANCE: f64 = 4.0;
const MIN_SAFE_DISTANCE: f64 = 0.01;
/// Camera distance for the 3-to-2 projection.
const CAMERA_DISTANCE: f64 = 3.0;
/// Time constant of the trail decay in seconds.
const TRAIL_SECS: f64 = 1.0 / 30.0;

const BACKGROUND: [f32; 3] = [0.02, 0.02, 0.05];
const NEAR_COLOR: [f32; 3] = [1.0, 0.55, 0.2];
const FAR_COLOR: [f32; 3] = [0.25, 0.6, 1.0];

pub struct PreviewScene {
    dimension: usize,
    vertices: Vec<Vec<f64>>,
    edges: Vec<(usize, usize)>,
    state: RendererState,
    overlay: Option<TextOverlay>,
    width: usize,
    height: usize,
    layer: Vec<f32>,
    history: Vec<f32>,
    pixels: Vec<u8>,
    last_timestamp: Option<f64>,
    renders: u32,
}

/// Vertices of the unit n-cube, `±1` on every axis.
pub fn hypercube_vertices(dimension: usize) -> Vec<Vec<f64>> {
    (0..1usize << dimension)
        .map(|bits| {
            (0..dimension)
                .map(|axis| if bits >> axis & 1 == 1 { 1.0 } else { -1.0 })
                .collect()
        })
        .collect()
}

/// Edges join vertices whose index differs in exactly one bit.
pub fn hypercube_edges(dimension: usize) -> Vec<(usize, usize)> {
    let mut edges = Vec::new();
    for a in 0..1usize << dimension {
        for axis in 0..dimension {
            let b = a ^ (1 << axis);
            if a < b {
                edges.push((a, b));
            }
        }
    }
    edges
}

/// Collapse an n-dimensional point to 3D. Coordinates past Z act as depth.
pub fn project_to_3d(point: &[f64]) -> [f64; 3] {
    let higher = point.len().saturating_sub(3);
    let depth = if higher > 0 {
        point[3..].iter().sum::<f64>() / (higher as f64).sqrt()
    } else {
        0.0
    };
    let mut denominator = PROJECTION_DISTANCE - depth;
    if denominator.abs() < MIN_SAFE_DISTANCE {
        denominator = MIN_SAFE_DISTANCE.copysign(denominator);
    }
    let scale = 1.0 / denominator;
    [point[0] * scale, point[1] * scale, point[2] * scale]
}

/// Halton low-discrepancy value in `[0, 1)`.
fn halton(mut index: u32, base: u32) -> f64 {
    let mut fraction = 1.0;
    let mut result = 0.0;
    while index > 0 {
        fraction /= base as f64;
        result += fraction * (index % base) as f64;
        index /= base;
    }
    result
}

fn physical_size(state: &RendererState) -> (usize, usize) {
    let scale = |edge: u32| ((edge as f64 * state.pixel_ratio).round() as usize).max(1);
    (scale(state.width), scale(state.height))
}

impl PreviewScene {
    pub fn new(dimension: usize, state: RendererState) -> ExportResult<Self> {
        if !(MIN_SCENE_DIMENSION..=MAX_SCENE_DIMENSION).contains(&dimension) {
            return Err(ExportError::validation(format!(
                "scene dimension must be between {MIN_SCENE_DIMENSION} and {MAX_SCENE_DIMENSION}, got {dimension}"
            )));
        }
        let mut scene = Self {
            dimension,
            vertices: hypercube_vertices(dimension),
            edges: hypercube_edges(dimension),
            state,
            overlay: None,
            width: 0,
            height: 0,
            layer: Vec::new(),
            history: Vec::new(),
            pixels: Vec::new(),
            last_timestamp: None,
            renders: 0,
        };
        scene.resize();
        Ok(scene)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn resize(&mut self) {
        let (width, height) = physical_size(&self.state);
        self.width = width;
        self.height = height;
        self.layer = vec![0.0; width * height * 3];
        self.history = vec![0.0; width * height * 3];
        self.pixels = Vec::new();
        self.last_timestamp = None;
        self.renders = 0;
    }

    fn screen_points(&self, rotation: &RotationSnapshot, jitter: (f64, f64)) -> Vec<(f64, f64, f64)> {
        let matrix = rotation.matrix(self.dimension);
        let extent = self.width.min(self.height) as f64 * 0.9;
        let (cx, cy) = (self.width as f64 / 2.0, self.height as f64 / 2.0);

        self.vertices
            .iter()
            .map(|vertex| {
                let [x, y, z] = project_to_3d(&rotate_point(&matrix, vertex));
                let s = CAMERA_DISTANCE / (CAMERA_DISTANCE - z).max(MIN_SAFE_DISTANCE);
                (
                    cx + x * s * extent + jitter.0,
                    cy - y * s * extent + jitter.1,
                    z,
                )
            })
            .collect()
    }

    /// Spread `color × weight` over the four pixels around `(x, y)`.
    fn splat(&mut self, x: f64, y: f64, color: [f32; 3], weight: f32) {
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = ((x - x0) as f32, (y - y0) as f32);
        let taps = [
            (0, 0, (1.0 - fx) * (1.0 - fy)),
            (1, 0, fx * (1.0 - fy)),
            (0, 1, (1.0 - fx) * fy),
            (1, 1, fx * fy),
        ];
        for (dx, dy, w) in taps {
            let (px, py) = (x0 as i64 + dx, y0 as i64 + dy);
            if px < 0 || py < 0 || px >= self.width as i64 || py >= self.height as i64 {
                continue;
            }
            let base = (py as usize * self.width + px as usize) * 3;
            for c in 0..3 {
                self.layer[base + c] += color[c] * w * weight;
            }
        }
    }

    fn draw_edge(&mut self, a: (f64, f64, f64), b: (f64, f64, f64), brightness: f32) {
        let steps = (b.0 - a.0).abs().max((b.1 - a.1).abs()).ceil().max(1.0) as usize;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let depth = a.2 + (b.2 - a.2) * t;
            let mix = ((depth + 1.0) / 2.0).clamp(0.0, 1.0) as f32;
            let color = [0usize, 1, 2].map(|c| FAR_COLOR[c] + (NEAR_COLOR[c] - FAR_COLOR[c]) * mix);
            self.splat(
                a.0 + (b.0 - a.0) * t,
                a.1 + (b.1 - a.1) * t,
                color,
                brightness,
            );
        }
    }

    fn compose(&mut self) {
        let mut pixels = Vec::with_capacity(self.width * self.height * 4);
        for rgb in self.history.chunks_exact(3) {
            for value in rgb {
                pixels.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
            pixels.push(255);
        }
        if let Some(text) = &self.overlay {
            let scale = self.state.pixel_ratio;
            overlay::draw_overlay(&mut pixels, self.width, self.height, text, scale);
        }
        self.pixels = pixels;
    }
}

impl SceneRenderer for PreviewScene {
    fn state(&self) -> RendererState {
        self.state
    }

    fn set_state(&mut self, state: &RendererState) {
        tracing::debug!(
            width = state.width,
            height = state.height,
            pixel_ratio = state.pixel_ratio,
            "Resizing preview scene"
        );
        self.state = *state;
        self.resize();
    }

    fn set_overlay(&mut self, overlay: Option<&TextOverlay>) {
        self.overlay = overlay.cloned();
    }

    fn advance_and_render(
        &mut self,
        timestamp_secs: f64,
        rotation: &RotationSnapshot,
    ) -> ExportResult<()> {
        if !timestamp_secs.is_finite() {
            return Err(ExportError::render(format!(
                "invalid render timestamp {timestamp_secs}"
            )));
        }

        self.renders += 1;
        let jitter = (
            halton(self.renders, 2) - 0.5,
            halton(self.renders, 3) - 0.5,
        );
        let points = self.screen_points(rotation, jitter);

        for (i, value) in self.layer.iter_mut().enumerate() {
            *value = BACKGROUND[i % 3];
        }
        let brightness = 0.85 + 0.15 * (timestamp_secs * std::f64::consts::PI).sin() as f32;
        for (a, b) in self.edges.clone() {
            self.draw_edge(points[a], points[b], brightness);
        }

        let blend = match self.last_timestamp {
            None => 1.0,
            Some(last) => 1.0 - (-(timestamp_secs - last).max(0.0) / TRAIL_SECS).exp() as f32,
        };
        for (old, new) in self.history.iter_mut().zip(&self.layer) {
            *old += (new - *old) * blend;
        }
        self.last_timestamp = Some(timestamp_secs);
        self.compose();
        Ok(())
    }

    fn read_pixels(&mut self) -> ExportResult<RgbaImage> {
        let (width, height) = (self.width as u32, self.height as u32);
        if self.pixels.is_empty() {
            return Ok(RgbaImage::blank(width, height));
        }
        Ok(RgbaImage::new(width, height, self.pixels.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation() -> RotationSnapshot {
        RotationSnapshot {
            planes: vec![("XW".to_string(), 0.4), ("YZ".to_string(), 0.9)],
        }
    }

    fn lit_pixels(image: &RgbaImage) -> usize {
        image
            .data
            .chunks_exact(4)
            .filter(|px| px[0] > 40 || px[1] > 40 || px[2] > 40)
            .count()
    }

    #[test]
    fn test_hypercube_topology() {
        assert_eq!(hypercube_vertices(4).len(), 16);
        assert_eq!(hypercube_edges(4).len(), 32);
        assert_eq!(hypercube_edges(3).len(), 12);
    }

    #[test]
    fn test_projection_uses_higher_axes_as_depth() {
        let near = project_to_3d(&[1.0, 1.0, 1.0, 1.0]);
        let far = project_to_3d(&[1.0, 1.0, 1.0, -1.0]);
        assert!(near[0] > far[0]);
        let flat = project_to_3d(&[1.0, 0.0, 0.0]);
        assert!((flat[0] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_projection_clamps_denominator() {
        let p = project_to_3d(&[1.0, 0.0, 0.0, 4.0]);
        assert!(p[0].is_finite());
        assert!((p[0] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_unsupported_dimension() {
        assert!(PreviewScene::new(2, RendererState::new(64, 64, 1.0)).is_err());
        assert!(PreviewScene::new(9, RendererState::new(64, 64, 1.0)).is_err());
    }

    #[test]
    fn test_render_draws_wireframe() {
        let mut scene = PreviewScene::new(4, RendererState::new(160, 90, 1.0)).unwrap();
        scene.advance_and_render(0.0, &rotation()).unwrap();
        let image = scene.read_pixels().unwrap();
        assert_eq!((image.width, image.height), (160, 90));
        assert!(image.is_consistent());
        assert!(lit_pixels(&image) > 100);
    }

    #[test]
    fn test_pixel_ratio_scales_buffer() {
        let mut scene = PreviewScene::new(4, RendererState::new(100, 50, 2.0)).unwrap();
        let image = scene.read_pixels().unwrap();
        assert_eq!((image.width, image.height), (200, 100));
        scene.set_state(&RendererState::new(64, 32, 1.0));
        assert_eq!(scene.read_pixels().unwrap().width, 64);
    }

    #[test]
    fn test_identical_sequences_render_identically() {
        let render = || {
            let mut scene = PreviewScene::new(5, RendererState::new(96, 64, 1.0)).unwrap();
            for i in 0..6 {
                scene.advance_and_render(i as f64 / 30.0, &rotation()).unwrap();
            }
            scene.read_pixels().unwrap().data
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn test_history_depends_on_warm_up() {
        let mut cold = PreviewScene::new(4, RendererState::new(96, 64, 1.0)).unwrap();
        cold.advance_and_render(0.1, &rotation()).unwrap();

        let mut warm = PreviewScene::new(4, RendererState::new(96, 64, 1.0)).unwrap();
        warm.advance_and_render(0.0, &rotation()).unwrap();
        warm.advance_and_render(0.05, &rotation()).unwrap();
        warm.advance_and_render(0.1, &rotation()).unwrap();

        assert_ne!(cold.read_pixels().unwrap().data, warm.read_pixels().unwrap().data);
    }

    #[test]
    fn test_overlay_is_drawn_and_cleared() {
        let overlay = TextOverlay {
            text: "MDIM 4D".to_string(),
            anchor: Default::default(),
            font_size_px: 14,
            color: "#FFFFFF".to_string(),
            opacity: 1.0,
        };
        let mut scene = PreviewScene::new(3, RendererState::new(160, 90, 1.0)).unwrap();
        scene.advance_and_render(0.0, &rotation()).unwrap();
        let plain = scene.read_pixels().unwrap().data;

        scene.set_overlay(Some(&overlay));
        scene.advance_and_render(0.0, &rotation()).unwrap();
        let with_text = scene.read_pixels().unwrap().data;
        assert_ne!(plain, with_text);

        scene.set_overlay(None);
        scene.set_state(&RendererState::new(160, 90, 1.0));
        scene.advance_and_render(0.0, &rotation()).unwrap();
        assert_eq!(scene.read_pixels().unwrap().data, plain);
    }

    #[test]
    fn test_non_finite_timestamp_is_render_error() {
        let mut scene = PreviewScene::new(4, RendererState::new(64, 64, 1.0)).unwrap();
        let err = scene.advance_and_render(f64::NAN, &rotation()).unwrap_err();
        assert!(matches!(err, ExportError::Render { .. }));
    }
}
