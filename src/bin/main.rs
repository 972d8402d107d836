//! leapbrush-probe binary.
//!
//! Drives the bridge's Rust API against a live LeapBrush server for manual
//! checks: one unary call, listening on `RegisterAndListen`, or pushing frames
//! through `UpdateDeviceStream`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use leapbrush_bridge::{logging, Bridge, BridgeConfig, Payload, ReadOutcome, UnaryMethod};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Server address; prefix with ssl:// for TLS
    #[arg(short, long, env = "LEAPBRUSH_ADDRESS", default_value = "localhost:8402")]
    pub address: String,

    /// Configuration file layered over the defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Per-call deadline in milliseconds, overriding the configuration
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Send malformed request files as the empty message instead of failing
    #[arg(long)]
    pub lenient: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Make one unary call with a serialized request
    Call {
        #[arg(value_enum)]
        method: Method,
        /// File holding the serialized request; empty message when omitted
        request: Option<PathBuf>,
        /// Write the serialized response here instead of printing it as hex
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Register and print every server state frame
    Listen {
        /// File holding the serialized registration request
        request: Option<PathBuf>,
        /// Stop after this many frames
        #[arg(short = 'n', long)]
        max_frames: Option<usize>,
    },
    /// Push serialized device updates through one stream
    Push {
        /// Files holding one serialized update each, sent in order
        #[arg(required = true)]
        frames: Vec<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Method {
    UpdateDevice,
    Rpc,
}

impl From<Method> for UnaryMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::UpdateDevice => UnaryMethod::UpdateDevice,
            Method::Rpc => UnaryMethod::Rpc,
        }
    }
}

fn read_request(bridge: &Bridge, path: Option<&PathBuf>) -> Result<Payload> {
    match path {
        Some(path) => {
            let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            bridge
                .request(&bytes)
                .with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(Payload::empty()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = BridgeConfig::load(cli.config.as_deref())?;
    if let Some(timeout_ms) = cli.timeout_ms {
        config.channel.request_timeout_ms = timeout_ms;
    }
    if cli.lenient {
        config.payload.strict = false;
    }
    logging::init(&config.logging);

    let bridge = Bridge::new(config)?;
    let connection = bridge.connect(&cli.address)?;
    info!(address = %cli.address, "connected");

    let outcome = run(&bridge, connection, cli.command);
    bridge.close(connection);
    outcome
}

fn run(bridge: &Bridge, connection: u64, command: Commands) -> Result<()> {
    match command {
        Commands::Call {
            method,
            request,
            output,
        } => {
            let request = read_request(bridge, request.as_ref())?;
            let response = bridge.unary(connection, method.into(), request)?;
            match output {
                Some(path) => std::fs::write(&path, response.as_bytes())
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{}", hex::encode(response.as_bytes())),
            }
        }
        Commands::Listen {
            request,
            max_frames,
        } => {
            let request = read_request(bridge, request.as_ref())?;
            let stream = bridge.begin_read_stream(connection, request)?;

            let mut frames = 0usize;
            let result = loop {
                if max_frames.map_or(false, |max| frames >= max) {
                    break Ok(());
                }
                match bridge.read_next(stream) {
                    Ok(ReadOutcome::Message(frame)) => {
                        frames += 1;
                        println!("frame {} ({} bytes): {}", frames, frame.len(), hex::encode(frame.as_bytes()));
                    }
                    Ok(ReadOutcome::EndOfStream) => {
                        info!(frames, "server ended the stream");
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                }
            };

            bridge.destroy_read_stream(stream);
            result?;
        }
        Commands::Push { frames } => {
            let stream = bridge.begin_write_stream(connection)?;

            let result = (|| -> Result<Payload> {
                for path in &frames {
                    let frame = read_request(bridge, Some(path))?;
                    bridge.write(stream, frame)?;
                    info!(frame = %path.display(), "sent");
                }
                Ok(bridge.finish(stream)?)
            })();

            bridge.destroy_write_stream(stream);
            let response = result?;
            println!("{}", hex::encode(response.as_bytes()));
        }
    }

    Ok(())
}
