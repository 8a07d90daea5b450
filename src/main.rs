mod core;
mod recorder;
mod sensor;
mod shared;
mod sync;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::sensor::SyncMode;
use crate::shared::config::CaptureConfig;

#[derive(Parser)]
#[command(author, version, about = "Record skeleton and color streams from a depth sensor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record until q, Esc or Ctrl+C
    Record {
        /// Output name; files are <prefix><name>.body.csv and <prefix><name>.color.yuy2
        name: String,
        #[arg(short, long)]
        prefix: Option<String>,
        #[arg(long, default_value_t = false, help = "Do not record the body stream")]
        no_skeleton: bool,
        #[arg(long, default_value_t = false, help = "Do not record the color stream")]
        no_video: bool,
        #[arg(short, long, default_value_t = false, help = "Read all streams through one synchronized reader")]
        sync: bool,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        body_fps: Option<f64>,
        #[arg(long)]
        color_fps: Option<f64>,
    },
    /// Summarize a body record
    Inspect {
        body_file: PathBuf,
    },
    /// Print the effective configuration
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // A previous crash may have left the terminal in raw mode.
    let _ = crossterm::terminal::disable_raw_mode();

    match cli.command {
        Commands::Record {
            name,
            prefix,
            no_skeleton,
            no_video,
            sync,
            config,
            body_fps,
            color_fps,
        } => {
            let mut cfg = CaptureConfig::load(config.as_deref())?;
            if let Some(prefix) = prefix {
                cfg.output_prefix = prefix;
            }
            cfg.record_skeleton &= !no_skeleton;
            cfg.record_video &= !no_video;
            if sync {
                cfg.sync_mode = SyncMode::Synchronized;
            }
            if let Some(fps) = body_fps {
                cfg.body_fps = fps;
            }
            if let Some(fps) = color_fps {
                cfg.color_fps = fps;
            }

            crate::utils::logger::init(Path::new("."), cfg.log_level());
            log::info!("skelcap {} starting: {:?}", env!("CARGO_PKG_VERSION"), cfg);
            crate::core::session::run(&name, cfg)?;
        }
        Commands::Inspect { body_file } => {
            let summary = crate::recorder::body_record::inspect(&body_file)?;
            println!("{}", body_file.display());
            println!("{}", summary);
        }
        Commands::Config { config } => {
            let cfg = CaptureConfig::load(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}
