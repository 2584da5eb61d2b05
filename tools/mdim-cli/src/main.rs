//! mdim CLI: export rotating polytope animations to video.
//!
//! Usage:
//!   mdim export [OPTIONS]      Render and encode an animation
//!   mdim classify [OPTIONS]    Estimate output size and delivery backend
//!   mdim check                 Check ffmpeg and codec availability
//!   mdim config                Show or initialize configuration

use clap::{Parser, Subcommand};

mod commands;
mod overlay;
mod scene;

#[derive(Parser)]
#[command(
    name = "mdim",
    about = "Deterministic video export for n-dimensional polytope animations",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the rotating scene frame by frame and encode it
    Export(commands::export::ExportArgs),

    /// Estimate the output size of an export and the backend it would use
    Classify {
        /// Target bitrate in Mbps
        #[arg(long)]
        bitrate: Option<f64>,

        /// Duration in seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Print the classification as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check ffmpeg and codec availability
    Check,

    /// Show or initialize the configuration file
    Config {
        /// Only print the config file path
        #[arg(long)]
        path: bool,

        /// Write the default configuration if none exists
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = mdim_common::config::AppConfig::load();
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    mdim_common::logging::init_logging(&mdim_common::config::LoggingConfig {
        level: log_level,
        ..config.logging.clone()
    });

    match cli.command {
        Commands::Export(args) => commands::export::run(config, args).await,
        Commands::Classify {
            bitrate,
            duration,
            json,
        } => commands::classify::run(&config, bitrate, duration, json),
        Commands::Check => commands::check::run(&config).await,
        Commands::Config { path, init } => commands::config::run(config, path, init),
    }
}
