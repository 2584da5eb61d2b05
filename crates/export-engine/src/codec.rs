//! Codec capability probing and negotiation.
//!
//! Which codecs can be offered depends on the machine, so the selectable
//! formats and codecs are derived from an async probe run once before any
//! export starts.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use mdim_common::error::{ExportError, ExportResult};
use mdim_export_model::{ContainerFormat, ExportSettings, HardwareAcceleration, VideoCodec};
use tokio::sync::OnceCell;

use crate::encoder::ffmpeg::{parse_encoder_list, select_encoder};

/// Representative configuration used when probing: 1080p30 at 8 Mbps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_bps: u64,
    pub hardware_acceleration: HardwareAcceleration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate_bps: 8_000_000,
            hardware_acceleration: HardwareAcceleration::NoPreference,
        }
    }
}

/// Answers whether a codec can be encoded on this machine.
#[async_trait]
pub trait CodecProbe: Send + Sync {
    async fn supports(&self, codec: VideoCodec, config: &ProbeConfig) -> bool;
}

/// Probes the encoders compiled into an ffmpeg binary.
///
/// `ffmpeg -encoders` runs at most once per probe instance.
#[derive(Debug)]
pub struct FfmpegCodecProbe {
    binary: String,
    encoders: OnceCell<Arc<Vec<String>>>,
}

impl FfmpegCodecProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            encoders: OnceCell::new(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Video encoder names this ffmpeg build provides. Empty when ffmpeg
    /// cannot be run.
    pub async fn available_encoders(&self) -> Arc<Vec<String>> {
        self.encoders
            .get_or_init(|| async {
                let output = tokio::process::Command::new(&self.binary)
                    .args(["-hide_banner", "-encoders"])
                    .output()
                    .await;
                let encoders = match output {
                    Ok(output) if output.status.success() => {
                        parse_encoder_list(&String::from_utf8_lossy(&output.stdout))
                    }
                    Ok(output) => {
                        tracing::warn!(
                            binary = %self.binary,
                            status = %output.status,
                            "ffmpeg encoder listing failed"
                        );
                        Vec::new()
                    }
                    Err(e) => {
                        tracing::warn!(binary = %self.binary, error = %e, "ffmpeg not available");
                        Vec::new()
                    }
                };
                tracing::debug!(count = encoders.len(), "Probed ffmpeg encoders");
                Arc::new(encoders)
            })
            .await
            .clone()
    }
}

#[async_trait]
impl CodecProbe for FfmpegCodecProbe {
    async fn supports(&self, codec: VideoCodec, config: &ProbeConfig) -> bool {
        if config.width == 0 || config.height == 0 || config.width % 2 != 0 || config.height % 2 != 0
        {
            return false;
        }
        let encoders = self.available_encoders().await;
        select_encoder(codec, config.hardware_acceleration, &encoders).is_some()
    }
}

/// Result of a capability probe: the set of codecs that can be encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecSupport {
    supported: BTreeSet<VideoCodec>,
}

impl CodecSupport {
    /// Probe every codec concurrently.
    pub async fn probe(probe: &dyn CodecProbe, config: &ProbeConfig) -> Self {
        let (avc, hevc, vp9, av1) = tokio::join!(
            probe.supports(VideoCodec::Avc, config),
            probe.supports(VideoCodec::Hevc, config),
            probe.supports(VideoCodec::Vp9, config),
            probe.supports(VideoCodec::Av1, config),
        );
        let supported = [
            (VideoCodec::Avc, avc),
            (VideoCodec::Hevc, hevc),
            (VideoCodec::Vp9, vp9),
            (VideoCodec::Av1, av1),
        ]
        .into_iter()
        .filter_map(|(codec, ok)| ok.then_some(codec))
        .collect::<BTreeSet<_>>();
        tracing::info!(codecs = ?supported, "Codec capability probe finished");
        Self { supported }
    }

    pub fn from_supported(codecs: impl IntoIterator<Item = VideoCodec>) -> Self {
        Self {
            supported: codecs.into_iter().collect(),
        }
    }

    pub fn is_supported(&self, codec: VideoCodec) -> bool {
        self.supported.contains(&codec)
    }

    /// Codecs that may be offered for `format`.
    pub fn selectable_codecs(&self, format: ContainerFormat) -> Vec<VideoCodec> {
        format
            .codecs()
            .iter()
            .copied()
            .filter(|codec| self.is_supported(*codec))
            .collect()
    }

    /// Formats that may be offered. A format is hidden when its default codec
    /// cannot be encoded, since that is the codec a fallback lands on.
    pub fn selectable_formats(&self) -> Vec<ContainerFormat> {
        ContainerFormat::ALL
            .into_iter()
            .filter(|format| self.is_supported(format.default_codec()))
            .collect()
    }

    /// Codec to use for `format` when `requested` was asked for.
    ///
    /// An unsupported request falls back to the format's default codec; if
    /// that is unsupported too the export cannot start.
    pub fn resolve(&self, format: ContainerFormat, requested: VideoCodec) -> ExportResult<VideoCodec> {
        if format.supports(requested) && self.is_supported(requested) {
            return Ok(requested);
        }
        let fallback = format.default_codec();
        if self.is_supported(fallback) {
            tracing::warn!(
                requested = %requested,
                fallback = %fallback,
                format = %format,
                "Requested codec unavailable, falling back"
            );
            return Ok(fallback);
        }
        Err(ExportError::unsupported_codec(format!(
            "no supported codec for {format} (requested {requested}, default {fallback})"
        )))
    }

    /// Settings with the codec replaced by one that can actually be encoded.
    pub fn negotiate(&self, settings: &ExportSettings) -> ExportResult<ExportSettings> {
        if !self.selectable_formats().contains(&settings.format) {
            return Err(ExportError::unsupported_codec(format!(
                "{} export is unavailable: {} encoding is not supported",
                settings.format,
                settings.format.default_codec()
            )));
        }
        let codec = self.resolve(settings.format, settings.codec)?;
        Ok(ExportSettings {
            codec,
            ..settings.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedProbe {
        codecs: Vec<VideoCodec>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CodecProbe for FixedProbe {
        async fn supports(&self, codec: VideoCodec, _config: &ProbeConfig) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.codecs.contains(&codec)
        }
    }

    #[tokio::test]
    async fn test_probe_collects_supported_codecs() {
        let probe = FixedProbe {
            codecs: vec![VideoCodec::Avc, VideoCodec::Av1],
            calls: AtomicU32::new(0),
        };
        let support = CodecSupport::probe(&probe, &ProbeConfig::default()).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
        assert!(support.is_supported(VideoCodec::Avc));
        assert!(!support.is_supported(VideoCodec::Vp9));
        assert_eq!(support.selectable_codecs(ContainerFormat::Webm), vec![VideoCodec::Av1]);
    }

    #[test]
    fn test_webm_hidden_without_vp9() {
        let support = CodecSupport::from_supported([VideoCodec::Avc, VideoCodec::Av1]);
        assert_eq!(support.selectable_formats(), vec![ContainerFormat::Mp4]);

        let settings = ExportSettings {
            format: ContainerFormat::Webm,
            codec: VideoCodec::Av1,
            ..Default::default()
        };
        assert!(matches!(
            support.negotiate(&settings),
            Err(ExportError::UnsupportedCodec { .. })
        ));
    }

    #[test]
    fn test_unsupported_codec_falls_back_to_default() {
        let support = CodecSupport::from_supported([VideoCodec::Avc]);
        let settings = ExportSettings {
            codec: VideoCodec::Hevc,
            ..Default::default()
        };
        let negotiated = support.negotiate(&settings).unwrap();
        assert_eq!(negotiated.codec, VideoCodec::Avc);
    }

    #[test]
    fn test_resolve_without_any_support_fails() {
        let support = CodecSupport::default();
        assert!(support.selectable_formats().is_empty());
        assert!(support.resolve(ContainerFormat::Mp4, VideoCodec::Avc).is_err());
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_supports_nothing() {
        let probe = FfmpegCodecProbe::new("/nonexistent/ffmpeg-binary");
        assert!(probe.available_encoders().await.is_empty());
        let support = CodecSupport::probe(&probe, &ProbeConfig::default()).await;
        assert_eq!(support, CodecSupport::default());
    }
}
