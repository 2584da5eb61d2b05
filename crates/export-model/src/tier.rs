//! Size estimation and delivery-backend recommendation.

use std::fmt;
use std::str::FromStr;

use mdim_common::error::{ExportError, ExportResult};
use serde::{Deserialize, Serialize};

use crate::settings::{ExportSettings, ParseSettingError};

/// Estimated size (MB) at which an export stops being `Small`.
pub const MEDIUM_TIER_MB: f64 = 100.0;

/// Estimated size (MB) at which an export becomes `Large`.
pub const LARGE_TIER_MB: f64 = 500.0;

/// Coarse size/risk class of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeTier {
    Small,
    Medium,
    Large,
}

impl SizeTier {
    /// Short user-facing note for this tier.
    pub fn describe(&self) -> &'static str {
        match self {
            SizeTier::Small => "fits comfortably in memory",
            SizeTier::Medium => "large in-memory buffer; streaming is safer on low-memory machines",
            SizeTier::Large => "too large to buffer safely; stream to disk or split into segments",
        }
    }
}

impl fmt::Display for SizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SizeTier::Small => "small",
            SizeTier::Medium => "medium",
            SizeTier::Large => "large",
        };
        f.write_str(label)
    }
}

/// Delivery strategy for encoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Buffer the whole file in memory, deliver one artifact.
    InMemory,
    /// Write chunks to a user-granted file as they are produced.
    Stream,
    /// Split output into separately delivered files.
    Segmented,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BackendKind::InMemory => "in-memory",
            BackendKind::Stream => "stream",
            BackendKind::Segmented => "segmented",
        };
        f.write_str(label)
    }
}

impl FromStr for BackendKind {
    type Err = ParseSettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Ok(BackendKind::InMemory),
            "stream" => Ok(BackendKind::Stream),
            "segmented" | "segments" => Ok(BackendKind::Segmented),
            _ => Err(ParseSettingError {
                kind: "backend",
                value: s.to_string(),
            }),
        }
    }
}

/// Result of classifying an export job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub estimated_size_mb: f64,
    pub tier: SizeTier,
    pub recommended_backend: BackendKind,
}

/// Estimated output size in megabytes: `bitrate(Mbps) × duration(s) / 8`.
pub fn estimate_size_mb(bitrate_mbps: f64, duration_secs: f64) -> f64 {
    bitrate_mbps * duration_secs / 8.0
}

/// Tier for an estimated size.
pub fn tier_for_size(size_mb: f64) -> SizeTier {
    if size_mb >= LARGE_TIER_MB {
        SizeTier::Large
    } else if size_mb >= MEDIUM_TIER_MB {
        SizeTier::Medium
    } else {
        SizeTier::Small
    }
}

/// Classify an export job. Pure and stable for identical input.
///
/// Large jobs are steered away from in-memory buffering towards streaming.
pub fn classify(settings: &ExportSettings) -> Classification {
    let estimated_size_mb = estimate_size_mb(settings.bitrate_mbps, settings.duration_secs);
    let tier = tier_for_size(estimated_size_mb);
    let recommended_backend = match tier {
        SizeTier::Small | SizeTier::Medium => BackendKind::InMemory,
        SizeTier::Large => BackendKind::Stream,
    };
    Classification {
        estimated_size_mb,
        tier,
        recommended_backend,
    }
}

/// Pick the backend a run will actually use.
///
/// An explicit override wins. A recommended stream without a file grant
/// degrades to segmented delivery; an explicitly requested stream without a
/// grant is a validation error.
pub fn resolve_backend(
    classification: &Classification,
    override_kind: Option<BackendKind>,
    stream_granted: bool,
) -> ExportResult<BackendKind> {
    match override_kind {
        Some(BackendKind::Stream) if !stream_granted => Err(ExportError::validation(
            "stream delivery requires a granted output file",
        )),
        Some(kind) => Ok(kind),
        None => match classification.recommended_backend {
            BackendKind::Stream if !stream_granted => Ok(BackendKind::Segmented),
            kind => Ok(kind),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(bitrate_mbps: f64, duration_secs: f64) -> ExportSettings {
        ExportSettings {
            bitrate_mbps,
            duration_secs,
            ..Default::default()
        }
    }

    #[test]
    fn test_size_estimate() {
        let result = classify(&settings(8.0, 10.0));
        assert_eq!(result.estimated_size_mb, 10.0);
        assert_eq!(result.tier, SizeTier::Small);
        assert_eq!(result.recommended_backend, BackendKind::InMemory);
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(tier_for_size(99.9), SizeTier::Small);
        assert_eq!(tier_for_size(100.0), SizeTier::Medium);
        assert_eq!(tier_for_size(499.9), SizeTier::Medium);
        assert_eq!(tier_for_size(500.0), SizeTier::Large);
    }

    #[test]
    fn test_large_jobs_recommend_stream() {
        // 40 Mbps for 120 s = 600 MB
        let result = classify(&settings(40.0, 120.0));
        assert_eq!(result.tier, SizeTier::Large);
        assert_eq!(result.recommended_backend, BackendKind::Stream);
    }

    #[test]
    fn test_classification_is_stable() {
        let s = settings(25.0, 60.0);
        assert_eq!(classify(&s), classify(&s));
    }

    #[test]
    fn test_resolve_backend_fallbacks() {
        let large = classify(&settings(40.0, 120.0));
        assert_eq!(
            resolve_backend(&large, None, true).unwrap(),
            BackendKind::Stream
        );
        assert_eq!(
            resolve_backend(&large, None, false).unwrap(),
            BackendKind::Segmented
        );
        assert_eq!(
            resolve_backend(&large, Some(BackendKind::InMemory), false).unwrap(),
            BackendKind::InMemory
        );
        assert!(resolve_backend(&large, Some(BackendKind::Stream), false).is_err());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!(
            "memory".parse::<BackendKind>().unwrap(),
            BackendKind::InMemory
        );
        assert!("tape".parse::<BackendKind>().is_err());
    }
}
