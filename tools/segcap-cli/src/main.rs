//! SegCap CLI: drive a recording session from the terminal.
//!
//! Usage:
//!   segcap record [OPTIONS]    Open an interactive recording session
//!   segcap formats             Show which encoding formats are supported
//!   segcap check               Check system capabilities
//!   segcap config              Show or initialize the configuration file

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use segcap_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "segcap",
    about = "Segmented camera and screen recording",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this configuration file instead of the standard location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive recording session
    Record {
        /// Use in-memory devices and encoders instead of the platform
        #[arg(long)]
        synthetic: bool,

        /// Initial resolution label (e.g. 720p, 1080p)
        #[arg(short, long)]
        resolution: Option<String>,

        /// Directory downloaded segments are written to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print session events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show which encoding candidates the platform supports
    Formats {
        /// Query the synthetic backend instead of the platform
        #[arg(long)]
        synthetic: bool,
    },

    /// Check system capabilities
    Check,

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    segcap_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Record {
            synthetic,
            resolution,
            output,
            json,
        } => commands::record::run(config, synthetic, resolution, output, json).await,
        Commands::Formats { synthetic } => commands::formats::run(&config, synthetic),
        Commands::Check => commands::check::run(),
        Commands::Config { init } => commands::config::run(&config, cli.config, init),
    }
}
