//! sndlink
//!
//! Streams a microphone to a remote speaker over UDP. `server` receives
//! and plays, `client` captures and sends.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sndlink::{
    audio::{list_devices, AudioStream, ReorderBuffer},
    codec::{build_decoder, build_encoder},
    config::{AppConfig, CodecKind},
    constants::DEFAULT_PORT,
    network::{bind_server, connect_client, UdpSink},
    pipeline::{run_receiver, CaptureSession, EncodeWorker, PlayoutSession},
};

/// Exit status for missing or invalid arguments
const USAGE_EXIT_CODE: i32 = 3;

/// Transmit audio streams over the network
#[derive(Parser, Debug)]
#[command(name = "sndlink", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Wire codec; both ends must agree
    #[arg(long, global = true, value_enum)]
    codec: Option<CodecKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receive audio and play it
    Server {
        /// UDP port to listen on
        port: Option<u16>,
    },
    /// Capture audio and send it to a server
    Client {
        /// Server host name or address
        address: String,
        /// Server UDP port
        port: Option<u16>,
    },
    /// List available audio devices
    ListDevs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            std::process::exit(USAGE_EXIT_CODE);
        }
        Err(err) => err.exit(),
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(codec) = cli.codec {
        config.codec.kind = codec;
    }

    match cli.command {
        Command::Server { port } => {
            config.network.port = port.unwrap_or(DEFAULT_PORT);
            run_server(config).await
        }
        Command::Client { address, port } => {
            config.network.port = port.unwrap_or(DEFAULT_PORT);
            run_client(config, &address).await
        }
        Command::ListDevs => {
            print_devices();
            Ok(())
        }
    }
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!("Starting sndlink server ({:?})", config.codec.kind);

    let socket = bind_server(config.network.port, config.network.recv_buffer_bytes)
        .context("Failed to bind server socket")?;
    let decoder = build_decoder(&config.codec).context("Failed to create decoder")?;

    let jitter = ReorderBuffer::new(config.jitter.capacity, config.jitter.min_delay);
    let session = Arc::new(PlayoutSession::new(jitter, config.audio.stale_window()));

    let render_session = session.clone();
    let mut output = AudioStream::output(config.audio.output_device.as_deref(), move |out| {
        render_session.render(out, Instant::now());
    })
    .context("Failed to open output device")?;
    tracing::info!("Playing on {}", output.device_name());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let receiver = tokio::spawn(run_receiver(socket, session.clone(), decoder, shutdown_rx));

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
            _ = ticker.tick() => {
                while let Some(e) = output.check_errors() {
                    tracing::warn!("Output stream error: {}", e);
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = receiver.await {
        tracing::error!("Receive loop failed: {}", e);
    }
    output.stop();

    let stats = session.stats();
    tracing::info!(
        "Received {} frames, {} malformed, {} lost",
        stats.received,
        stats.malformed,
        stats.jitter.lost
    );
    Ok(())
}

async fn run_client(config: AppConfig, address: &str) -> Result<()> {
    tracing::info!("Starting sndlink client ({:?})", config.codec.kind);

    let (socket, target) = connect_client(address, config.network.port)
        .await
        .context("Failed to open client socket")?;
    let encoder = build_encoder(&config.codec).context("Failed to create encoder")?;

    let session = Arc::new(CaptureSession::new(config.audio.pool_capacity));
    let sink = Arc::new(UdpSink::new(socket, target, tokio::runtime::Handle::current()));
    let mut worker = EncodeWorker::spawn(session.clone(), encoder, sink)
        .context("Failed to start encode worker")?;

    let capture_session = session.clone();
    let mut input = AudioStream::input(config.audio.input_device.as_deref(), move |samples| {
        capture_session.on_capture(samples);
    })
    .context("Failed to open input device")?;

    tracing::info!("Streaming {} to {}", input.device_name(), target);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
            _ = ticker.tick() => {
                while let Some(e) = input.check_errors() {
                    tracing::warn!("Input stream error: {}", e);
                }
            }
        }
    }

    input.stop();
    // Joining waits on in-flight sends, which need the runtime
    tokio::task::spawn_blocking(move || worker.stop())
        .await
        .context("Encode worker shutdown failed")?;

    let stats = session.stats();
    tracing::info!(
        "Captured {} frames, {} dropped, {} sent, {} send errors",
        stats.captured,
        stats.dropped,
        stats.sent,
        stats.send_errors
    );
    Ok(())
}

fn print_devices() {
    let devices = list_devices();
    if devices.is_empty() {
        println!("No audio devices found");
        return;
    }

    for device in &devices {
        let mut roles = Vec::new();
        if device.is_input {
            roles.push(if device.is_default_input { "input [DEFAULT]" } else { "input" });
        }
        if device.is_output {
            roles.push(if device.is_default_output { "output [DEFAULT]" } else { "output" });
        }

        println!("{}", device.name);
        println!("    Role: {}", roles.join(", "));
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
}
