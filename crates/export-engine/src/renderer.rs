//! Scene renderer capability and the export lease on it.

use mdim_common::error::ExportResult;
use mdim_export_model::{RendererState, TextOverlay};

use crate::animation::RotationSnapshot;

/// Raw RGBA8 pixels read back from the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbaImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Fully transparent image of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(width, height, vec![0; width as usize * height as usize * 4])
    }

    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * 4
    }
}

/// The live scene renderer, as seen by the export pipeline.
///
/// Implementations own their GPU or software surface. The pipeline drives
/// them with explicit simulated timestamps; they must not consult a clock.
pub trait SceneRenderer: Send {
    /// Current size and pixel ratio.
    fn state(&self) -> RendererState;

    /// Resize the drawing surface.
    fn set_state(&mut self, state: &RendererState);

    /// Put a previously saved state back.
    fn restore_state(&mut self, state: &RendererState) {
        self.set_state(state);
    }

    /// Overlay drawn on top of every frame, or `None` to clear it.
    fn set_overlay(&mut self, overlay: Option<&TextOverlay>);

    /// Advance temporal effects to `timestamp_secs` and draw the scene with
    /// the given rotation angles.
    fn advance_and_render(
        &mut self,
        timestamp_secs: f64,
        rotation: &RotationSnapshot,
    ) -> ExportResult<()>;

    /// Read back the last rendered frame.
    fn read_pixels(&mut self) -> ExportResult<RgbaImage>;
}

/// Exclusive lease on a renderer for one export run.
///
/// The state captured at [`RendererGuard::acquire`] is restored exactly once:
/// either through [`RendererGuard::release`] or when the guard is dropped
/// (early return, error, cancellation). Nothing is restored if export state
/// was never applied.
pub struct RendererGuard<'a> {
    renderer: &'a mut dyn SceneRenderer,
    saved: RendererState,
    applied: bool,
    restored: bool,
}

impl<'a> RendererGuard<'a> {
    /// Capture the renderer's live state without touching it.
    pub fn acquire(renderer: &'a mut dyn SceneRenderer) -> Self {
        let saved = renderer.state();
        Self {
            renderer,
            saved,
            applied: false,
            restored: false,
        }
    }

    pub fn saved(&self) -> RendererState {
        self.saved
    }

    /// Switch the renderer to export size and install the overlay.
    pub fn apply(&mut self, target: RendererState, overlay: Option<&TextOverlay>) {
        tracing::debug!(
            width = target.width,
            height = target.height,
            "Resizing renderer for export"
        );
        self.applied = true;
        self.renderer.set_state(&target);
        self.renderer.set_overlay(overlay);
    }

    pub fn renderer(&mut self) -> &mut (dyn SceneRenderer + 'a) {
        &mut *self.renderer
    }

    /// Restore the live state now and return it.
    pub fn release(mut self) -> RendererState {
        self.restore();
        self.saved
    }

    fn restore(&mut self) {
        if !self.applied || self.restored {
            return;
        }
        self.restored = true;
        self.renderer.set_overlay(None);
        self.renderer.restore_state(&self.saved);
        tracing::debug!(
            width = self.saved.width,
            height = self.saved.height,
            pixel_ratio = self.saved.pixel_ratio,
            "Renderer state restored"
        );
    }
}

impl Drop for RendererGuard<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdim_common::error::ExportError;

    struct CountingRenderer {
        state: RendererState,
        restores: u32,
        overlay: Option<String>,
    }

    impl CountingRenderer {
        fn new() -> Self {
            Self {
                state: RendererState::new(1280, 800, 2.0),
                restores: 0,
                overlay: None,
            }
        }
    }

    impl SceneRenderer for CountingRenderer {
        fn state(&self) -> RendererState {
            self.state
        }

        fn set_state(&mut self, state: &RendererState) {
            self.state = *state;
        }

        fn restore_state(&mut self, state: &RendererState) {
            self.restores += 1;
            self.state = *state;
        }

        fn set_overlay(&mut self, overlay: Option<&TextOverlay>) {
            self.overlay = overlay.map(|o| o.text.clone());
        }

        fn advance_and_render(&mut self, _: f64, _: &RotationSnapshot) -> ExportResult<()> {
            Err(ExportError::render("not used"))
        }

        fn read_pixels(&mut self) -> ExportResult<RgbaImage> {
            Ok(RgbaImage::blank(self.state.width, self.state.height))
        }
    }

    fn overlay() -> TextOverlay {
        TextOverlay {
            text: "mdim".into(),
            anchor: Default::default(),
            font_size_px: 24,
            color: "#ffffff".into(),
            opacity: 1.0,
        }
    }

    #[test]
    fn test_release_restores_once() {
        let mut renderer = CountingRenderer::new();
        let original = renderer.state();
        {
            let mut guard = RendererGuard::acquire(&mut renderer);
            guard.apply(RendererState::new(1920, 1080, 1.0), Some(&overlay()));
            assert_eq!(guard.renderer().state().width, 1920);
            let restored = guard.release();
            assert!(restored.bit_eq(&original));
        }
        assert_eq!(renderer.restores, 1);
        assert!(renderer.state.bit_eq(&original));
        assert!(renderer.overlay.is_none());
    }

    #[test]
    fn test_drop_restores() {
        let mut renderer = CountingRenderer::new();
        {
            let mut guard = RendererGuard::acquire(&mut renderer);
            guard.apply(RendererState::new(640, 360, 1.0), None);
        }
        assert_eq!(renderer.restores, 1);
        assert_eq!(renderer.state.width, 1280);
    }

    #[test]
    fn test_unapplied_guard_leaves_renderer_alone() {
        let mut renderer = CountingRenderer::new();
        let guard = RendererGuard::acquire(&mut renderer);
        drop(guard);
        assert_eq!(renderer.restores, 0);
    }

    #[test]
    fn test_blank_image_is_consistent() {
        let image = RgbaImage::blank(3, 2);
        assert!(image.is_consistent());
        assert!(!RgbaImage::new(3, 2, vec![0; 5]).is_consistent());
    }
}
