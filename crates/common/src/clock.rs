//! Deterministic export clock.
//!
//! Export never reads the wall clock for animation. Every timestamp is a pure
//! function of the frame index so two runs with identical settings produce
//! bit-identical timelines:
//!
//! ```text
//! origin            capture_start
//!   |--pre-roll @60Hz--|--capture @fps--------------------|
//!   p0  p1  ...  pN-1   c0      c1      ...      cM-1
//! ```
//!
//! Pre-roll (warm-up) steps are always spaced at 1/60 s regardless of the
//! export frame rate, and end strictly before the first captured frame.

/// Spacing of warm-up steps, matching the live renderer's display cadence.
pub const PREROLL_HZ: u32 = 60;

const MICROS_PER_SEC: f64 = 1_000_000.0;

/// Computes per-frame timestamps for an export run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockStepper {
    fps: u32,
    warmup_frames: u32,
    origin_secs: f64,
}

impl ClockStepper {
    /// Create a stepper for the given frame rate and warm-up length.
    ///
    /// A zero `fps` is treated as 1 so the stepper never divides by zero.
    pub fn new(fps: u32, warmup_frames: u32, origin_secs: f64) -> Self {
        Self {
            fps: fps.max(1),
            warmup_frames,
            origin_secs,
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn warmup_frames(&self) -> u32 {
        self.warmup_frames
    }

    /// Simulated time of the first captured frame.
    pub fn capture_start(&self) -> f64 {
        self.origin_secs + self.warmup_frames as f64 / PREROLL_HZ as f64
    }

    /// Simulated time of warm-up step `index`.
    pub fn preroll_timestamp(&self, index: u32) -> f64 {
        self.origin_secs + index as f64 / PREROLL_HZ as f64
    }

    /// Simulated time of captured frame `frame_index`.
    pub fn timestamp(&self, frame_index: u64) -> f64 {
        self.capture_start() + frame_index as f64 / self.fps as f64
    }

    /// Logical duration of one captured frame in seconds.
    pub fn frame_duration(&self) -> f64 {
        1.0 / self.fps as f64
    }

    /// Presentation timestamp of a captured frame in microseconds, relative to
    /// the start of the encoded stream.
    pub fn pts_us(&self, frame_index: u64) -> u64 {
        (frame_index as f64 * MICROS_PER_SEC / self.fps as f64).round() as u64
    }

    /// Duration of a captured frame in microseconds.
    ///
    /// Derived from consecutive timestamps so durations sum exactly to the
    /// stream length instead of accumulating rounding error.
    pub fn duration_us(&self, frame_index: u64) -> u64 {
        self.pts_us(frame_index + 1) - self.pts_us(frame_index)
    }

    /// Iterator over all warm-up timestamps.
    pub fn preroll(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.warmup_frames).map(|i| self.preroll_timestamp(i))
    }
}

/// Number of frames needed to cover `duration_secs` at `fps`.
///
/// `ceil(duration × fps)`, except that a product within float noise of an
/// integer is not bumped to the next frame (1.1 s × 30 fps is 33 frames).
pub fn total_frames(duration_secs: f64, fps: u32) -> u64 {
    if !duration_secs.is_finite() || duration_secs <= 0.0 || fps == 0 {
        return 0;
    }
    let exact = duration_secs * fps as f64;
    let nearest = exact.round();
    if (exact - nearest).abs() < 1e-9 {
        nearest as u64
    } else {
        exact.ceil() as u64
    }
}

/// Convert seconds to whole microseconds.
pub fn secs_to_us(secs: f64) -> u64 {
    (secs * MICROS_PER_SEC).round().max(0.0) as u64
}
