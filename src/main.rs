use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use balloon_fuse::{Config, Mode};

#[derive(Parser, Debug)]
#[command(
    name = "balloon-fuse",
    version,
    about = "Locate comic speech balloons and fit translated text inside them"
)]
struct Cli {
    /// Page image (png/jpeg/webp)
    #[arg(short = 'i', long = "image")]
    image: PathBuf,

    /// Recorded detector output (JSON). Without it the edge detector runs.
    #[arg(short = 'd', long = "detections")]
    detections: Option<PathBuf>,

    /// Recorded semantic response (JSON). Without it Gemini is called.
    #[arg(short = 's', long = "semantic")]
    semantic: Option<PathBuf>,

    /// Geometry mode: fusion or flood
    #[arg(long = "mode", default_value = "fusion")]
    mode: Mode,

    /// Gemini model name (overrides settings)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides GEMINI_API_KEY / GOOGLE_API_KEY)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Font file used to measure text
    #[arg(long = "font-path")]
    font_path: Option<String>,

    /// Font family looked up among system fonts
    #[arg(long = "font-family")]
    font_family: Option<String>,

    /// Write a PNG with detections, balloons and text drawn on the page
    #[arg(long = "debug-overlay")]
    debug_overlay: Option<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    balloon_fuse::logging::init(cli.verbose)?;

    let config = Config {
        image: cli.image,
        detections: cli.detections,
        semantic: cli.semantic,
        mode: cli.mode,
        model: cli.model,
        key: cli.key,
        font_path: cli.font_path,
        font_family: cli.font_family,
        debug_overlay: cli.debug_overlay,
        settings_path: cli.read_settings,
    };
    let output = balloon_fuse::run(config).await?;
    println!("{}", output);
    Ok(())
}
