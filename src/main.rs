//! citra-rpc - Command line remote control for the Citra emulator

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use citra_rpc::config::{self, Config};
use citra_rpc::protocol::{Keys, MotionState, OverrideControls};
use citra_rpc::Client;

/// citra-rpc - Remote control for the Citra emulator
#[derive(Parser)]
#[command(name = "citra-rpc")]
#[command(author = "citra-rpc Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Send RPC requests to a running Citra instance", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emulator host (overrides the configuration file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Emulator RPC port (overrides the configuration file)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    #[command(flatten)]
    Request(RequestCommand),
}

/// Subcommands that send one request to the emulator
#[derive(Subcommand)]
enum RequestCommand {
    /// Read guest memory and print it as hex
    ReadMemory {
        /// Address, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// Number of bytes to read
        #[arg(value_parser = parse_u32)]
        size: u32,
    },

    /// Write hex-encoded bytes into guest memory
    WriteMemory {
        /// Address, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// Data as a hex string, e.g. "deadbeef"
        data: String,
    },

    /// Set the pressed buttons (e.g. "a", "start", "circle-up")
    Pad {
        keys: Vec<String>,
    },

    /// Touch the bottom screen
    Touch {
        #[arg(allow_negative_numbers = true)]
        x: i16,
        #[arg(allow_negative_numbers = true)]
        y: i16,
        /// Release the touch instead of pressing
        #[arg(long)]
        release: bool,
    },

    /// Set accelerometer and gyroscope readings
    Motion {
        #[arg(allow_negative_numbers = true)]
        x: i16,
        #[arg(allow_negative_numbers = true)]
        y: i16,
        #[arg(allow_negative_numbers = true)]
        z: i16,
        #[arg(allow_negative_numbers = true)]
        roll: i16,
        #[arg(allow_negative_numbers = true)]
        pitch: i16,
        #[arg(allow_negative_numbers = true)]
        yaw: i16,
    },

    /// Set the circle pad position
    Circle {
        #[arg(allow_negative_numbers = true)]
        x: i16,
        #[arg(allow_negative_numbers = true)]
        y: i16,
    },

    /// Set the internal resolution factor
    Resolution {
        factor: i16,
    },

    /// Load a game (path on the emulator's host)
    Game {
        path: PathBuf,
    },

    /// Choose which inputs are driven remotely
    Override {
        #[arg(long)]
        pad: bool,
        #[arg(long)]
        touch: bool,
        #[arg(long)]
        motion: bool,
        #[arg(long)]
        circle: bool,
    },

    /// Pause emulation
    Pause,

    /// Resume emulation
    Resume,

    /// Restart the running game
    Restart,

    /// Set the speed limit in percent
    SpeedLimit {
        percent: i16,
    },

    /// Set the background color (components in 0.0..=1.0)
    BackgroundColor {
        r: f32,
        g: f32,
        b: f32,
    },
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let result = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    result.map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn parse_keys(names: &[String]) -> anyhow::Result<Keys> {
    names.iter().try_fold(Keys::empty(), |keys, name| {
        Keys::from_name(name)
            .map(|key| keys | key)
            .with_context(|| format!("Unknown key: {}", name))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Some(host) = cli.host {
        config.connection.host = host;
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }

    match cli.command {
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Request(command) => {
            let mut client = Client::from_config(&config).await.with_context(|| {
                format!(
                    "Failed to connect to {}:{}",
                    config.connection.host, config.connection.port
                )
            })?;
            run_command(&mut client, command).await?;
        }
    }

    Ok(())
}

/// Issue the request named by `command`
async fn run_command(client: &mut Client, command: RequestCommand) -> anyhow::Result<()> {
    match command {
        RequestCommand::ReadMemory { address, size } => {
            let data = client.read_memory(address, size).await?;
            println!("{}", hex::encode(&data));
        }
        RequestCommand::WriteMemory { address, data } => {
            let bytes = hex::decode(data.trim_start_matches("0x")).context("Invalid hex data")?;
            client.write_memory(address, &bytes).await?;
        }
        RequestCommand::Pad { keys } => {
            client.set_pad_state(parse_keys(&keys)?).await?;
        }
        RequestCommand::Touch { x, y, release } => {
            client.set_touch_state(x, y, !release).await?;
        }
        RequestCommand::Motion {
            x,
            y,
            z,
            roll,
            pitch,
            yaw,
        } => {
            client
                .set_motion_state(MotionState {
                    x,
                    y,
                    z,
                    roll,
                    pitch,
                    yaw,
                })
                .await?;
        }
        RequestCommand::Circle { x, y } => client.set_circle_state(x, y).await?,
        RequestCommand::Resolution { factor } => client.set_resolution(factor).await?,
        RequestCommand::Game { path } => client.set_game(&path).await?,
        RequestCommand::Override {
            pad,
            touch,
            motion,
            circle,
        } => {
            client
                .set_override_controls(OverrideControls {
                    pad,
                    touch,
                    motion,
                    circle,
                })
                .await?;
        }
        RequestCommand::Pause => client.pause().await?,
        RequestCommand::Resume => client.resume().await?,
        RequestCommand::Restart => client.restart().await?,
        RequestCommand::SpeedLimit { percent } => client.set_speed_limit(percent).await?,
        RequestCommand::BackgroundColor { r, g, b } => client.set_background_color(r, g, b).await?,
    }

    tracing::debug!("Request complete");
    Ok(())
}
