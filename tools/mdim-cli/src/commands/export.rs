//! Render the preview scene and export it to video.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use mdim_common::config::{AppConfig, ExportDefaults};
use mdim_export_engine::encoder::FfmpegEncoderFactory;
use mdim_export_engine::{
    CodecSupport, ExportController, ExportEnvironment, ExportOutcome, ExportProgress,
    FfmpegCodecProbe, FileGrant, ProbeConfig, RotationStore, StartOptions,
};
use mdim_export_model::{
    Artifact, BackendKind, CompletionDetails, CropRect, ExportSettings, Fps, OverlayAnchor,
    RendererState, TextOverlay,
};

use crate::scene::PreviewScene;

/// Size of the interactive view the scene starts from.
const PREVIEW_STATE: RendererState = RendererState {
    width: 1280,
    height: 720,
    pixel_ratio: 1.0,
};

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output resolution: 720p, 1080p, 4k or WIDTHxHEIGHT
    #[arg(short, long)]
    pub resolution: Option<String>,

    /// Frame rate: 24, 30 or 60
    #[arg(long)]
    pub fps: Option<u32>,

    /// Duration in seconds
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Target bitrate in Mbps
    #[arg(long)]
    pub bitrate: Option<f64>,

    /// Rate control: constant|variable
    #[arg(long, default_value = "variable")]
    pub bitrate_mode: String,

    /// Container: mp4|webm
    #[arg(long)]
    pub format: Option<String>,

    /// Codec: avc|hevc|vp9|av1
    #[arg(long)]
    pub codec: Option<String>,

    /// Encoder preference: auto|hardware|software
    #[arg(long, default_value = "auto")]
    pub hardware: String,

    /// Frames rendered before capture starts
    #[arg(long)]
    pub warmup: Option<u32>,

    /// Normalized crop rectangle "x,y,width,height"
    #[arg(long)]
    pub crop: Option<String>,

    /// Text drawn over every frame
    #[arg(long)]
    pub overlay: Option<String>,

    /// Overlay position: top-left|top-right|bottom-left|bottom-right|center
    #[arg(long, default_value = "bottom-right")]
    pub overlay_anchor: String,

    /// Overlay font size in output pixels
    #[arg(long, default_value = "24")]
    pub overlay_size: u32,

    /// Overlay color as #RRGGBB
    #[arg(long, default_value = "#FFFFFF")]
    pub overlay_color: String,

    /// Overlay opacity [0.0, 1.0]
    #[arg(long, default_value = "0.8")]
    pub overlay_opacity: f64,

    /// Delivery backend: memory|stream|segmented (default: by estimated size)
    #[arg(long)]
    pub backend: Option<String>,

    /// Stream the encoded video into this file while rendering
    #[arg(long)]
    pub stream_to: Option<PathBuf>,

    /// Output directory (default: from config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Dimension of the hypercube
    #[arg(long, default_value = "4")]
    pub dimension: usize,

    /// Rotation planes to animate
    #[arg(long, value_delimiter = ',', default_value = "XW,YZ")]
    pub planes: Vec<String>,

    /// Rotation speed in radians per second
    #[arg(long, default_value = "0.5")]
    pub speed: f64,

    /// Per-plane speed variation [0.0, 1.0]
    #[arg(long, default_value = "0.0")]
    pub bias: f64,

    /// Rotate in the opposite direction
    #[arg(long)]
    pub reverse: bool,
}

/// Settings from the configured defaults, before command-line overrides.
pub fn default_settings(defaults: &ExportDefaults) -> anyhow::Result<ExportSettings> {
    Ok(ExportSettings {
        resolution: defaults.resolution.parse()?,
        fps: Fps::try_from(defaults.fps)?,
        duration_secs: defaults.duration_secs,
        bitrate_mbps: defaults.bitrate_mbps,
        format: defaults.format.parse()?,
        codec: defaults.codec.parse()?,
        warmup_frames: defaults.warmup_frames,
        ..Default::default()
    })
}

pub fn parse_crop(value: &str) -> anyhow::Result<CropRect> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid crop '{value}'"))?;
    let [x, y, width, height] = parts[..] else {
        anyhow::bail!("Crop needs four values x,y,width,height, got '{value}'");
    };
    Ok(CropRect {
        x,
        y,
        width,
        height,
    })
}

pub fn parse_anchor(value: &str) -> anyhow::Result<OverlayAnchor> {
    match value.trim().to_ascii_lowercase().as_str() {
        "top-left" => Ok(OverlayAnchor::TopLeft),
        "top-right" => Ok(OverlayAnchor::TopRight),
        "bottom-left" => Ok(OverlayAnchor::BottomLeft),
        "bottom-right" => Ok(OverlayAnchor::BottomRight),
        "center" => Ok(OverlayAnchor::Center),
        _ => Err(anyhow::anyhow!(
            "Unknown overlay anchor: {value}. Use: top-left, top-right, bottom-left, bottom-right, center"
        )),
    }
}

/// Merge command-line overrides into the configured defaults.
pub fn build_settings(defaults: &ExportDefaults, args: &ExportArgs) -> anyhow::Result<ExportSettings> {
    let mut settings = default_settings(defaults)?;
    if let Some(resolution) = &args.resolution {
        settings.resolution = resolution.parse()?;
    }
    if let Some(fps) = args.fps {
        settings.fps = Fps::try_from(fps)?;
    }
    if let Some(duration) = args.duration {
        settings.duration_secs = duration;
    }
    if let Some(bitrate) = args.bitrate {
        settings.bitrate_mbps = bitrate;
    }
    settings.bitrate_mode = args.bitrate_mode.parse()?;
    if let Some(format) = &args.format {
        settings.format = format.parse()?;
        if args.codec.is_none() {
            settings.codec = settings.format.default_codec();
        }
    }
    if let Some(codec) = &args.codec {
        settings.codec = codec.parse()?;
    }
    settings.hardware_acceleration = args.hardware.parse()?;
    if let Some(warmup) = args.warmup {
        settings.warmup_frames = warmup;
    }
    settings.crop = args.crop.as_deref().map(parse_crop).transpose()?;
    settings.overlay = match &args.overlay {
        Some(text) => Some(TextOverlay {
            text: text.clone(),
            anchor: parse_anchor(&args.overlay_anchor)?,
            font_size_px: args.overlay_size,
            color: args.overlay_color.clone(),
            opacity: args.overlay_opacity,
        }),
        None => None,
    };
    Ok(settings)
}

fn build_animation(args: &ExportArgs) -> anyhow::Result<RotationStore> {
    let mut store = RotationStore::new(args.dimension)
        .with_speed(args.speed)
        .with_bias(args.bias)
        .with_direction(if args.reverse { -1.0 } else { 1.0 });
    for plane in &args.planes {
        if !store.animate(plane) {
            anyhow::bail!(
                "'{plane}' is not a rotation plane of {}-dimensional space",
                args.dimension
            );
        }
    }
    Ok(store)
}

fn print_progress(p: ExportProgress) {
    let eta = p
        .eta_secs
        .map(|secs| format!("{secs:.0}s"))
        .unwrap_or_else(|| "--".to_string());
    print!(
        "\r  Progress: {:.1}% ({}/{} frames, ETA: {eta})  ",
        p.progress * 100.0,
        p.frame_index,
        p.total_frames,
    );
    let _ = std::io::stdout().flush();
}

async fn save_artifact(output_dir: &Path, artifact: &Artifact) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let path = output_dir.join(&artifact.filename);
    tokio::fs::write(&path, artifact.data.as_slice())
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

pub async fn run(config: AppConfig, args: ExportArgs) -> anyhow::Result<()> {
    let settings = build_settings(&config.export, &args)?;
    let mut animation = build_animation(&args)?;
    let mut scene = PreviewScene::new(args.dimension, PREVIEW_STATE)?;
    let backend = args
        .backend
        .as_deref()
        .map(str::parse::<BackendKind>)
        .transpose()?;

    let probe = FfmpegCodecProbe::new(config.delivery.ffmpeg_binary.clone());
    let probe_config = ProbeConfig {
        hardware_acceleration: settings.hardware_acceleration,
        ..Default::default()
    };
    let support = CodecSupport::probe(&probe, &probe_config).await;
    let factory = Arc::new(FfmpegEncoderFactory::new(
        config.delivery.ffmpeg_binary.clone(),
        probe.available_encoders().await,
    ));

    let mut env = ExportEnvironment::from_config(&config, support, factory);
    if let Some(output) = &args.output {
        env.output_dir = output.clone();
    }
    let output_dir = env.output_dir.clone();

    println!("Exporting {}-cube animation", args.dimension);
    println!("  Resolution: {}", settings.dimensions());
    println!("  Frame rate: {} fps", settings.fps.as_u32());
    println!("  Duration: {:.1}s ({} frames)", settings.duration_secs, settings.total_frames());
    println!("  Format: {} ({})", settings.format, settings.codec);
    println!("  Bitrate: {:.1} Mbps", settings.bitrate_mbps);

    let controller = ExportController::new(env);
    controller.set_progress_callback(Some(Arc::new(print_progress)));

    let options = StartOptions {
        backend,
        stream_grant: args.stream_to.as_ref().map(FileGrant::new),
    };

    let outcome = {
        let export = controller.start_export(&settings, options, &mut scene, &mut animation);
        tokio::pin!(export);
        loop {
            tokio::select! {
                result = &mut export => break result,
                _ = tokio::signal::ctrl_c() => {
                    if controller.abort_export() {
                        println!("\n  Aborting after the current frame...");
                    }
                }
            }
        }
    };

    match outcome {
        Ok(ExportOutcome::Completed(details)) => match details {
            CompletionDetails::InMemory { artifact } => {
                let path = save_artifact(&output_dir, &artifact).await?;
                println!(
                    "\nExport complete: {} ({:.1} MB)",
                    path.display(),
                    artifact.size_bytes() as f64 / 1_000_000.0
                );
            }
            CompletionDetails::Stream {
                path,
                bytes_written,
            } => {
                println!(
                    "\nExport complete: {} ({:.1} MB)",
                    path.display(),
                    bytes_written as f64 / 1_000_000.0
                );
            }
            CompletionDetails::Segmented {
                merge_instructions, ..
            } => {
                println!("\nExport complete.");
                println!("{merge_instructions}");
            }
        },
        Ok(ExportOutcome::Aborted) => {
            println!("\nExport aborted.");
        }
        Ok(ExportOutcome::Failed(message)) => {
            println!("\nExport failed: {message}");
            anyhow::bail!("export failed");
        }
        Err(e) => {
            println!("\nExport failed: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use mdim_export_model::{ContainerFormat, HardwareAcceleration, Resolution, VideoCodec};

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ExportArgs,
    }

    fn parse(argv: &[&str]) -> ExportArgs {
        let mut full = vec!["mdim"];
        full.extend_from_slice(argv);
        Harness::parse_from(full).args
    }

    #[test]
    fn test_defaults_come_from_config() {
        let defaults = ExportDefaults::default();
        let settings = build_settings(&defaults, &parse(&[])).unwrap();
        assert_eq!(settings, default_settings(&defaults).unwrap());
        assert!(settings.overlay.is_none());
        assert!(settings.crop.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = parse(&[
            "--resolution",
            "1280x720",
            "--fps",
            "24",
            "--duration",
            "3",
            "--format",
            "webm",
            "--hardware",
            "software",
            "--crop",
            "0.25, 0.25, 0.5, 0.5",
            "--overlay",
            "tesseract",
            "--overlay-anchor",
            "top-left",
        ]);
        let settings = build_settings(&ExportDefaults::default(), &args).unwrap();
        assert_eq!(
            settings.resolution,
            Resolution::Custom {
                width: 1280,
                height: 720
            }
        );
        assert_eq!(settings.fps, Fps::Fps24);
        assert_eq!(settings.format, ContainerFormat::Webm);
        assert_eq!(settings.codec, VideoCodec::Vp9);
        assert_eq!(
            settings.hardware_acceleration,
            HardwareAcceleration::PreferSoftware
        );
        assert_eq!(settings.crop.unwrap().width, 0.5);
        let overlay = settings.overlay.unwrap();
        assert_eq!(overlay.anchor, OverlayAnchor::TopLeft);
        assert_eq!(overlay.text, "tesseract");
    }

    #[test]
    fn test_explicit_codec_wins_over_format_default() {
        let args = parse(&["--format", "webm", "--codec", "av1"]);
        let settings = build_settings(&ExportDefaults::default(), &args).unwrap();
        assert_eq!(settings.codec, VideoCodec::Av1);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse_crop("0,0,1").is_err());
        assert!(parse_crop("a,b,c,d").is_err());
        assert!(parse_anchor("middle").is_err());
        let args = parse(&["--fps", "25"]);
        assert!(build_settings(&ExportDefaults::default(), &args).is_err());
    }

    #[test]
    fn test_animation_planes() {
        let store = build_animation(&parse(&["--planes", "XW,YZ,ZW"])).unwrap();
        assert_eq!(store.dimension(), 4);
        assert!(build_animation(&parse(&["--planes", "XV"])).is_err());
    }
}
