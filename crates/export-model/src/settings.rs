//! Export settings and their validation.
//!
//! Settings are clamped and validated once, before a run starts, and never
//! change while the run is active.

use std::fmt;
use std::str::FromStr;

use mdim_common::clock::total_frames;
use mdim_common::error::{ExportError, ExportResult};
use serde::{Deserialize, Serialize};

/// Smallest allowed output edge in pixels.
pub const MIN_DIMENSION: u32 = 128;
/// Largest allowed output edge in pixels.
pub const MAX_DIMENSION: u32 = 7680;
/// Shortest export in seconds.
pub const MIN_DURATION_SECS: f64 = 1.0;
/// Longest export in seconds.
pub const MAX_DURATION_SECS: f64 = 120.0;
pub const MIN_BITRATE_MBPS: f64 = 0.5;
pub const MAX_BITRATE_MBPS: f64 = 200.0;
pub const MAX_WARMUP_FRAMES: u32 = 600;

/// A settings string that did not name a known option.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseSettingError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseSettingError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Output dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes in one RGBA8 frame of this size.
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "preset")]
pub enum Resolution {
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "4k")]
    Uhd4k,
    Custom { width: u32, height: u32 },
}

impl Resolution {
    /// Pixel dimensions. Custom sizes are clamped to the allowed range.
    pub fn dimensions(&self) -> Dimensions {
        match *self {
            Resolution::Hd720 => Dimensions::new(1280, 720),
            Resolution::Hd1080 => Dimensions::new(1920, 1080),
            Resolution::Uhd4k => Dimensions::new(3840, 2160),
            Resolution::Custom { width, height } => {
                Dimensions::new(clamp_dimension(width), clamp_dimension(height))
            }
        }
    }
}

impl FromStr for Resolution {
    type Err = ParseSettingError;

    /// Accepts `720p`, `1080p`, `4k` or `WIDTHxHEIGHT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "720p" => Ok(Resolution::Hd720),
            "1080p" => Ok(Resolution::Hd1080),
            "4k" | "2160p" => Ok(Resolution::Uhd4k),
            other => {
                let (w, h) = other
                    .split_once('x')
                    .ok_or_else(|| ParseSettingError::new("resolution", s))?;
                let width = w
                    .parse::<u32>()
                    .map_err(|_| ParseSettingError::new("resolution", s))?;
                let height = h
                    .parse::<u32>()
                    .map_err(|_| ParseSettingError::new("resolution", s))?;
                Ok(Resolution::Custom { width, height })
            }
        }
    }
}

/// Clamp a custom edge length: floor to even, then into
/// `[MIN_DIMENSION, MAX_DIMENSION]`.
pub fn clamp_dimension(value: u32) -> u32 {
    (value & !1).clamp(MIN_DIMENSION, MAX_DIMENSION)
}

/// Supported export frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Fps {
    Fps24,
    Fps30,
    Fps60,
}

impl Fps {
    pub fn as_u32(self) -> u32 {
        match self {
            Fps::Fps24 => 24,
            Fps::Fps30 => 30,
            Fps::Fps60 => 60,
        }
    }
}

impl TryFrom<u32> for Fps {
    type Error = ParseSettingError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            24 => Ok(Fps::Fps24),
            30 => Ok(Fps::Fps30),
            60 => Ok(Fps::Fps60),
            other => Err(ParseSettingError::new("frame rate", &other.to_string())),
        }
    }
}

impl From<Fps> for u32 {
    fn from(fps: Fps) -> Self {
        fps.as_u32()
    }
}

/// Rate control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitrateMode {
    Constant,
    #[default]
    Variable,
}

impl FromStr for BitrateMode {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "constant" | "cbr" => Ok(BitrateMode::Constant),
            "variable" | "vbr" => Ok(BitrateMode::Variable),
            _ => Err(ParseSettingError::new("bitrate mode", s)),
        }
    }
}

/// Container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Mp4,
    Webm,
}

impl ContainerFormat {
    pub const ALL: [ContainerFormat; 2] = [ContainerFormat::Mp4, ContainerFormat::Webm];

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Webm => "webm",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::Webm => "video/webm",
        }
    }

    /// Codec used when the selected one is unavailable for this container.
    pub fn default_codec(&self) -> VideoCodec {
        match self {
            ContainerFormat::Mp4 => VideoCodec::Avc,
            ContainerFormat::Webm => VideoCodec::Vp9,
        }
    }

    /// Codecs this container can carry.
    pub fn codecs(&self) -> &'static [VideoCodec] {
        match self {
            ContainerFormat::Mp4 => &[VideoCodec::Avc, VideoCodec::Hevc, VideoCodec::Av1],
            ContainerFormat::Webm => &[VideoCodec::Vp9, VideoCodec::Av1],
        }
    }

    pub fn supports(&self, codec: VideoCodec) -> bool {
        self.codecs().contains(&codec)
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ContainerFormat {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(ContainerFormat::Mp4),
            "webm" => Ok(ContainerFormat::Webm),
            _ => Err(ParseSettingError::new("format", s)),
        }
    }
}

/// Video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Avc,
    Hevc,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 4] = [
        VideoCodec::Avc,
        VideoCodec::Hevc,
        VideoCodec::Vp9,
        VideoCodec::Av1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::Avc => "avc",
            VideoCodec::Hevc => "hevc",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Av1 => "av1",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoCodec {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avc" | "h264" => Ok(VideoCodec::Avc),
            "hevc" | "h265" => Ok(VideoCodec::Hevc),
            "vp9" => Ok(VideoCodec::Vp9),
            "av1" => Ok(VideoCodec::Av1),
            _ => Err(ParseSettingError::new("codec", s)),
        }
    }
}

/// Encoder implementation preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareAcceleration {
    #[default]
    NoPreference,
    PreferHardware,
    PreferSoftware,
}

impl FromStr for HardwareAcceleration {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no-preference" | "auto" => Ok(HardwareAcceleration::NoPreference),
            "prefer-hardware" | "hardware" => Ok(HardwareAcceleration::PreferHardware),
            "prefer-software" | "software" => Ok(HardwareAcceleration::PreferSoftware),
            _ => Err(ParseSettingError::new("hardware acceleration", s)),
        }
    }
}

/// Normalized crop rectangle applied to the rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRect {
    pub const FULL: CropRect = CropRect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn validate(&self) -> ExportResult<()> {
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ExportError::validation("crop rectangle must be finite"));
        }
        if self.x < 0.0 || self.y < 0.0 {
            return Err(ExportError::validation("crop origin must be within [0, 1]"));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(ExportError::validation("crop extent must be positive"));
        }
        if self.x + self.width > 1.0 + 1e-9 || self.y + self.height > 1.0 + 1e-9 {
            return Err(ExportError::validation(
                "crop rectangle must lie inside the frame",
            ));
        }
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Render target that gives the cropped region `output` resolution.
    ///
    /// Each axis is scaled by `1 / extent` and rounded up to even. The result
    /// is not capped; `ExportSettings::validate` rejects targets above
    /// [`MAX_DIMENSION`].
    pub fn render_target(&self, output: Dimensions) -> Dimensions {
        Dimensions::new(
            upscaled_extent(output.width, self.width),
            upscaled_extent(output.height, self.height),
        )
    }
}

fn upscaled_extent(output: u32, fraction: f64) -> u32 {
    let wanted = (output as f64 / fraction).ceil().min(u32::MAX as f64) as u32;
    wanted.saturating_add(1).max(output) & !1
}

/// Where an overlay is anchored in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayAnchor {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

/// Text drawn over every exported frame by the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextOverlay {
    pub text: String,
    #[serde(default)]
    pub anchor: OverlayAnchor,
    /// Font size in output pixels.
    pub font_size_px: u32,
    /// `#RRGGBB` color.
    pub color: String,
    /// Opacity in `[0, 1]`.
    pub opacity: f64,
}

impl TextOverlay {
    pub fn validate(&self) -> ExportResult<()> {
        if self.text.trim().is_empty() {
            return Err(ExportError::validation("overlay text must not be empty"));
        }
        if self.font_size_px == 0 {
            return Err(ExportError::validation("overlay font size must be positive"));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(ExportError::validation("overlay opacity must be within [0, 1]"));
        }
        if parse_hex_color(&self.color).is_none() {
            return Err(ExportError::validation(format!(
                "overlay color '{}' is not #RRGGBB",
                self.color
            )));
        }
        Ok(())
    }

    /// Color as RGBA8, alpha taken from opacity.
    pub fn rgba(&self) -> [u8; 4] {
        let [r, g, b] = parse_hex_color(&self.color).unwrap_or([255, 255, 255]);
        [r, g, b, (self.opacity.clamp(0.0, 1.0) * 255.0).round() as u8]
    }
}

fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// Export parameters for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub resolution: Resolution,
    pub fps: Fps,
    pub duration_secs: f64,
    pub bitrate_mbps: f64,
    #[serde(default)]
    pub bitrate_mode: BitrateMode,
    #[serde(default)]
    pub format: ContainerFormat,
    pub codec: VideoCodec,
    #[serde(default)]
    pub hardware_acceleration: HardwareAcceleration,
    #[serde(default)]
    pub warmup_frames: u32,
    #[serde(default)]
    pub crop: Option<CropRect>,
    #[serde(default)]
    pub overlay: Option<TextOverlay>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::Hd1080,
            fps: Fps::Fps60,
            duration_secs: 10.0,
            bitrate_mbps: 12.0,
            bitrate_mode: BitrateMode::Variable,
            format: ContainerFormat::Mp4,
            codec: VideoCodec::Avc,
            hardware_acceleration: HardwareAcceleration::NoPreference,
            warmup_frames: 8,
            crop: None,
            overlay: None,
        }
    }
}

impl ExportSettings {
    /// Clamp numeric fields into their allowed ranges.
    ///
    /// Non-finite values are left alone so `validate` can reject them.
    pub fn sanitized(&self) -> ExportSettings {
        let mut out = self.clone();
        if let Resolution::Custom { width, height } = out.resolution {
            out.resolution = Resolution::Custom {
                width: clamp_dimension(width),
                height: clamp_dimension(height),
            };
        }
        if out.duration_secs.is_finite() {
            out.duration_secs = out.duration_secs.clamp(MIN_DURATION_SECS, MAX_DURATION_SECS);
        }
        if out.bitrate_mbps.is_finite() {
            out.bitrate_mbps = out.bitrate_mbps.clamp(MIN_BITRATE_MBPS, MAX_BITRATE_MBPS);
        }
        out.warmup_frames = out.warmup_frames.min(MAX_WARMUP_FRAMES);
        if out.crop.is_some_and(|crop| crop.is_full()) {
            out.crop = None;
        }
        out
    }

    /// Reject settings that clamping cannot repair.
    pub fn validate(&self) -> ExportResult<()> {
        if !self.duration_secs.is_finite() {
            return Err(ExportError::validation("duration must be a finite number"));
        }
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&self.duration_secs) {
            return Err(ExportError::validation(format!(
                "duration must be within [{MIN_DURATION_SECS}, {MAX_DURATION_SECS}] seconds"
            )));
        }
        if !self.bitrate_mbps.is_finite() || self.bitrate_mbps <= 0.0 {
            return Err(ExportError::validation("bitrate must be a positive number"));
        }
        if let Resolution::Custom { width, height } = self.resolution {
            for (label, value) in [("width", width), ("height", height)] {
                if value % 2 != 0 || !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
                    return Err(ExportError::validation(format!(
                        "custom {label} {value} must be even and within [{MIN_DIMENSION}, {MAX_DIMENSION}]"
                    )));
                }
            }
        }
        if !self.format.supports(self.codec) {
            return Err(ExportError::validation(format!(
                "codec {} cannot be stored in a {} container",
                self.codec, self.format
            )));
        }
        if let Some(crop) = &self.crop {
            crop.validate()?;
            let target = crop.render_target(self.dimensions());
            if target.width > MAX_DIMENSION || target.height > MAX_DIMENSION {
                return Err(ExportError::validation(format!(
                    "crop needs a {target} render target, larger than {MAX_DIMENSION} per side"
                )));
            }
        }
        if let Some(overlay) = &self.overlay {
            overlay.validate()?;
        }
        Ok(())
    }

    /// Clamp then validate; the form every run starts from.
    pub fn prepare(&self) -> ExportResult<ExportSettings> {
        let settings = self.sanitized();
        settings.validate()?;
        Ok(settings)
    }

    /// Final output dimensions.
    pub fn dimensions(&self) -> Dimensions {
        self.resolution.dimensions()
    }

    pub fn total_frames(&self) -> u64 {
        total_frames(self.duration_secs, self.fps.as_u32())
    }

    pub fn bitrate_bps(&self) -> u64 {
        (self.bitrate_mbps * 1_000_000.0).round() as u64
    }
}
