//! Check ffmpeg and codec availability.

use mdim_common::config::AppConfig;
use mdim_export_engine::encoder::ffmpeg::{encoder_candidates, is_ffmpeg_available, select_encoder};
use mdim_export_engine::{CodecSupport, FfmpegCodecProbe, ProbeConfig};
use mdim_export_model::{ContainerFormat, VideoCodec};

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("mdim Export Check");
    println!("{}", "=".repeat(50));

    let binary = &config.delivery.ffmpeg_binary;
    if !is_ffmpeg_available(binary) {
        println!("[WARN] ffmpeg not found: {binary}");
        println!();
        println!("Install ffmpeg or set delivery.ffmpeg_binary in the config file.");
        return Ok(());
    }
    println!("[OK] ffmpeg: {binary}");

    let probe = FfmpegCodecProbe::new(binary.clone());
    let available = probe.available_encoders().await;
    println!("[OK] Video encoders reported: {}", available.len());

    let probe_config = ProbeConfig::default();
    let support = CodecSupport::probe(&probe, &probe_config).await;

    println!();
    for codec in VideoCodec::ALL {
        let hw = probe_config.hardware_acceleration;
        match select_encoder(codec, hw, &available) {
            Some(encoder) => println!("[OK] {codec}: {encoder}"),
            None => println!(
                "[WARN] {codec}: none of {} available",
                encoder_candidates(codec, hw).join(", ")
            ),
        }
    }

    println!();
    let formats = support.selectable_formats();
    for format in ContainerFormat::ALL {
        if formats.contains(&format) {
            let codecs: Vec<String> = support
                .selectable_codecs(format)
                .iter()
                .map(|c| c.to_string())
                .collect();
            println!("[OK] {format}: {}", codecs.join(", "));
        } else {
            println!(
                "[WARN] {format}: unavailable (needs {})",
                format.default_codec()
            );
        }
    }

    println!();
    if formats.is_empty() {
        println!("No export format is usable. See above for missing encoders.");
    } else {
        println!("Export is ready.");
    }

    Ok(())
}
