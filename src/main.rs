// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use multicam::camera::VirtualCameraDriver;
use multicam::camera::driver::CameraDriver;
use multicam::config::CameraConfig;
use multicam::system::RunMode;
use multicam::system::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "multicam")]
#[command(about = "Multi-camera recording and session orchestration")]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the key=value configuration file
    #[arg(long, default_value = "config.txt")]
    config: PathBuf,

    /// Run mode
    #[arg(long, value_enum, default_value_t = ModeArg::Interactive)]
    mode: ModeArg,

    /// Number of synthetic cameras for the built-in virtual backend
    #[arg(long, default_value = "1")]
    cameras: usize,

    /// Override the output directory root
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Override the target FPS
    #[arg(long)]
    fps: Option<f64>,

    /// Start recording immediately after initialization
    #[arg(long)]
    auto_record: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Record a fixed-length session from all cameras, then exit
    Record {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Console commands (r/s/q)
    Interactive,
    /// JSON command protocol on stdin/stdout
    Slave,
    /// Record immediately until shutdown
    Headless,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Interactive => RunMode::Interactive,
            ModeArg::Slave => RunMode::Slave,
            ModeArg::Headless => RunMode::Headless,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; RUST_LOG controls the level
    // (e.g. RUST_LOG=debug, RUST_LOG=multicam=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = CameraConfig::load(&cli.config);
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    if let Some(fps) = cli.fps {
        config.target_fps = fps;
    }
    if cli.auto_record {
        config.auto_start_recording = true;
    }

    let driver = Arc::new(VirtualCameraDriver::new(cli.cameras));

    match cli.command {
        Some(Commands::List) => {
            let cameras = driver.discover()?;
            if cameras.is_empty() {
                println!("No cameras found");
            }
            for camera in cameras {
                println!("{}: {} ({})", camera.index, camera.model, camera.id);
            }
            Ok(())
        }
        Some(Commands::Record { duration }) => {
            config.auto_start_recording = true;
            let supervisor = Arc::new(Supervisor::new(config, driver, RunMode::Headless));
            install_signal_handler(&supervisor)?;

            let runner = {
                let supervisor = Arc::clone(&supervisor);
                tokio::spawn(async move { supervisor.run().await })
            };
            println!("Recording for {duration} seconds...");
            tokio::time::sleep(Duration::from_secs(duration)).await;
            supervisor.shutdown();
            runner.await?;
            println!("Recording finished");
            Ok(())
        }
        None => {
            let supervisor = Arc::new(Supervisor::new(config, driver, cli.mode.into()));
            install_signal_handler(&supervisor)?;
            supervisor.run().await;
            Ok(())
        }
    }
}

/// SIGINT/SIGTERM trigger the same orderly shutdown path as `quit`.
fn install_signal_handler(supervisor: &Arc<Supervisor>) -> Result<(), ctrlc::Error> {
    let shutdown = supervisor.shutdown_handle();
    ctrlc::set_handler(move || {
        let _ = shutdown.send(true);
    })
}
