//! Estimate the size of an export and the delivery backend it gets.

use mdim_common::config::AppConfig;
use mdim_export_model::{classify, BackendKind};

use super::export::default_settings;

pub fn run(
    config: &AppConfig,
    bitrate: Option<f64>,
    duration: Option<f64>,
    json: bool,
) -> anyhow::Result<()> {
    let mut settings = default_settings(&config.export)?;
    if let Some(bitrate) = bitrate {
        settings.bitrate_mbps = bitrate;
    }
    if let Some(duration) = duration {
        settings.duration_secs = duration;
    }
    let settings = settings.prepare()?;
    let classification = classify(&settings);

    if json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
        return Ok(());
    }

    println!(
        "Estimated size: {:.1} MB ({:.1} Mbps for {:.1}s)",
        classification.estimated_size_mb, settings.bitrate_mbps, settings.duration_secs
    );
    println!(
        "Tier: {} ({})",
        classification.tier,
        classification.tier.describe()
    );
    println!("Backend: {}", classification.recommended_backend);
    if classification.recommended_backend == BackendKind::Stream {
        println!("  Without --stream-to the export is split into segments.");
    }
    Ok(())
}
