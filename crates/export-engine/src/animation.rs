//! Rotation animation driven by simulated time.
//!
//! Each animating rotation plane advances by
//! `speed × direction × frame_duration × plane_multiplier(index, count, bias)`
//! per captured frame. Angles are kept in `[0, 2π)`.

use std::collections::BTreeMap;
use std::f64::consts::TAU;

/// π·(3 − √5): spreads per-plane phases evenly without repeating.
pub const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

/// Largest relative speed deviation a fully biased plane can get.
pub const BIAS_SPREAD: f64 = 0.8;

/// Floor for per-plane speed multipliers; planes never stall or reverse.
pub const MIN_MULTIPLIER: f64 = 0.1;

const AXIS_NAMES: [char; 6] = ['X', 'Y', 'Z', 'W', 'V', 'U'];

/// Name of axis `index`: `X Y Z W V U`, then `A6`, `A7`, ...
pub fn axis_name(index: usize) -> String {
    match AXIS_NAMES.get(index) {
        Some(c) => c.to_string(),
        None => format!("A{index}"),
    }
}

fn parse_axis(name: &str) -> Option<usize> {
    if let Some(i) = AXIS_NAMES
        .iter()
        .position(|axis| name.len() == 1 && name.starts_with(*axis))
    {
        return Some(i);
    }
    let number = name.strip_prefix('A')?.parse::<usize>().ok()?;
    (number >= AXIS_NAMES.len()).then_some(number)
}

/// Parse a rotation plane name such as `XY`, `ZW` or `XA6` into its two axis
/// indices, smaller first.
pub fn parse_plane(name: &str) -> Option<(usize, usize)> {
    let mut parts: Vec<String> = Vec::new();
    for c in name.trim().chars() {
        match parts.last_mut() {
            Some(part) if !c.is_ascii_uppercase() => part.push(c),
            _ => parts.push(c.to_string()),
        }
    }
    let [a, b] = parts.as_slice() else {
        return None;
    };
    let (a, b) = (parse_axis(a)?, parse_axis(b)?);
    match a.cmp(&b) {
        std::cmp::Ordering::Less => Some((a, b)),
        std::cmp::Ordering::Greater => Some((b, a)),
        std::cmp::Ordering::Equal => None,
    }
}

/// Canonical name for the plane spanned by axes `a` and `b`.
pub fn plane_name(a: usize, b: usize) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}{}", axis_name(lo), axis_name(hi))
}

/// All rotation planes of an n-dimensional space, in axis order.
pub fn all_planes(dimension: usize) -> Vec<String> {
    let mut planes = Vec::new();
    for a in 0..dimension {
        for b in (a + 1)..dimension {
            planes.push(plane_name(a, b));
        }
    }
    planes
}

/// Speed multiplier for plane `index` of `count` animating planes.
///
/// With `bias` 0 (or a single plane) every plane turns at the base speed.
/// Otherwise multipliers follow a golden-angle sine sequence centred on 1,
/// scaled by `bias` (clamped to `[0, 1]`) and floored at [`MIN_MULTIPLIER`].
pub fn plane_multiplier(index: usize, count: usize, bias: f64) -> f64 {
    if count <= 1 || !bias.is_finite() || bias <= 0.0 {
        return 1.0;
    }
    let bias = bias.min(1.0);
    let wave = |i: usize| (i as f64 * GOLDEN_ANGLE).sin();
    let mean = (0..count).map(wave).sum::<f64>() / count as f64;
    (1.0 + bias * BIAS_SPREAD * (wave(index) - mean)).max(MIN_MULTIPLIER)
}

/// Bring an angle into `[0, 2π)`. Non-finite input becomes 0.
pub fn wrap_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let wrapped = angle.rem_euclid(TAU);
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Source of animation parameters and sink for updated angles.
pub trait AnimationStore: Send {
    /// Planes currently animating, in a stable order.
    fn animating_planes(&self) -> Vec<String>;

    fn angle(&self, plane: &str) -> f64;

    fn set_angle(&mut self, plane: &str, angle: f64);

    /// Base angular speed in radians per simulated second.
    fn speed(&self) -> f64;

    /// `1.0` or `-1.0`.
    fn direction(&self) -> f64;

    /// Per-plane speed spread in `[0, 1]`.
    fn bias(&self) -> f64;

    /// Current angle of every animating plane.
    fn snapshot(&self) -> RotationSnapshot {
        RotationSnapshot {
            planes: self
                .animating_planes()
                .into_iter()
                .map(|plane| {
                    let angle = self.angle(&plane);
                    (plane, angle)
                })
                .collect(),
        }
    }
}

/// Angles of the animating planes at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RotationSnapshot {
    pub planes: Vec<(String, f64)>,
}

impl RotationSnapshot {
    pub fn angle(&self, plane: &str) -> Option<f64> {
        self.planes
            .iter()
            .find(|(name, _)| name == plane)
            .map(|(_, angle)| *angle)
    }

    /// Row-major `dimension × dimension` matrix composed in animating-plane
    /// order.
    pub fn matrix(&self, dimension: usize) -> Vec<f64> {
        compose_rotation_matrix(dimension, &self.planes)
    }
}

/// Advance every animating plane by one frame of simulated time and write
/// the new angles back to the store.
pub fn step_rotation(store: &mut dyn AnimationStore, frame_duration: f64) -> RotationSnapshot {
    let planes = store.animating_planes();
    let count = planes.len();
    let speed = store.speed();
    let direction = if store.direction() < 0.0 { -1.0 } else { 1.0 };
    let bias = store.bias();
    let base_delta = speed * direction * frame_duration;

    let mut snapshot = RotationSnapshot::default();
    for (index, plane) in planes.into_iter().enumerate() {
        let delta = base_delta * plane_multiplier(index, count, bias);
        let angle = wrap_angle(store.angle(&plane) + delta);
        store.set_angle(&plane, angle);
        snapshot.planes.push((plane, angle));
    }
    snapshot
}

fn identity(dimension: usize) -> Vec<f64> {
    let mut m = vec![0.0; dimension * dimension];
    for i in 0..dimension {
        m[i * dimension + i] = 1.0;
    }
    m
}

fn multiply_into(out: &mut [f64], a: &[f64], b: &[f64], dimension: usize) {
    for row in 0..dimension {
        for col in 0..dimension {
            out[row * dimension + col] = (0..dimension)
                .map(|k| a[row * dimension + k] * b[k * dimension + col])
                .sum();
        }
    }
}

/// Compose plane rotations left to right into one row-major matrix.
///
/// Unknown plane names and planes outside `dimension` are skipped.
pub fn compose_rotation_matrix(dimension: usize, planes: &[(String, f64)]) -> Vec<f64> {
    let mut current = identity(dimension);
    let mut next = vec![0.0; dimension * dimension];
    for (name, angle) in planes {
        let Some((a, b)) = parse_plane(name) else {
            continue;
        };
        if b >= dimension {
            continue;
        }
        let mut rotation = identity(dimension);
        let (sin, cos) = angle.sin_cos();
        rotation[a * dimension + a] = cos;
        rotation[b * dimension + b] = cos;
        rotation[a * dimension + b] = -sin;
        rotation[b * dimension + a] = sin;
        multiply_into(&mut next, &current, &rotation, dimension);
        std::mem::swap(&mut current, &mut next);
    }
    current
}

/// Apply a row-major matrix to a point.
pub fn rotate_point(matrix: &[f64], point: &[f64]) -> Vec<f64> {
    let dimension = point.len();
    (0..dimension)
        .map(|row| {
            (0..dimension)
                .map(|k| matrix[row * dimension + k] * point[k])
                .sum()
        })
        .collect()
}

/// In-memory animation state for an n-dimensional scene.
#[derive(Debug, Clone)]
pub struct RotationStore {
    dimension: usize,
    angles: BTreeMap<String, f64>,
    animating: Vec<String>,
    speed: f64,
    direction: f64,
    bias: f64,
}

impl RotationStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            angles: BTreeMap::new(),
            animating: Vec::new(),
            speed: 0.5,
            direction: 1.0,
            bias: 0.0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Start animating a plane. Returns `false` for names that do not denote
    /// a plane of this space.
    pub fn animate(&mut self, plane: &str) -> bool {
        let Some((a, b)) = parse_plane(plane) else {
            return false;
        };
        if b >= self.dimension {
            return false;
        }
        let name = plane_name(a, b);
        if !self.animating.contains(&name) {
            self.animating.push(name);
        }
        true
    }

    pub fn stop(&mut self, plane: &str) {
        if let Some((a, b)) = parse_plane(plane) {
            let name = plane_name(a, b);
            self.animating.retain(|p| *p != name);
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = if speed.is_finite() { speed } else { 0.0 };
        self
    }

    pub fn with_direction(mut self, direction: f64) -> Self {
        self.direction = if direction < 0.0 { -1.0 } else { 1.0 };
        self
    }

    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = if bias.is_finite() { bias.clamp(0.0, 1.0) } else { 0.0 };
        self
    }
}

impl AnimationStore for RotationStore {
    fn animating_planes(&self) -> Vec<String> {
        self.animating.clone()
    }

    fn angle(&self, plane: &str) -> f64 {
        self.angles.get(plane).copied().unwrap_or(0.0)
    }

    fn set_angle(&mut self, plane: &str, angle: f64) {
        self.angles.insert(plane.to_string(), wrap_angle(angle));
    }

    fn speed(&self) -> f64 {
        self.speed
    }

    fn direction(&self) -> f64 {
        self.direction
    }

    fn bias(&self) -> f64 {
        self.bias
    }
}
