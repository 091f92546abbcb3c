//! `maestro-emulator` – serve an emulated device over TCP.
//!
//! Stands in for real firmware during development:
//!
//! ```text
//! maestro-emulator --device base --port 7777
//! maestro-emulator --device arm  --port 7778 --telemetry-ms 1000
//! ```

use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tracing::info;

use maestro_node::{NodeServer, emulated};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DeviceKind {
    /// Differential drive base (FWD, BWD, TURN).
    Base,
    /// Gripper arm (GRIP, HOME).
    Arm,
}

#[derive(Debug, Parser)]
#[command(name = "maestro-emulator", about = "Emulated MAESTRO node (serial-line-v1 over TCP)")]
struct Args {
    /// Host interface to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TCP port to bind.
    #[arg(long, default_value_t = 7777)]
    port: u16,

    /// Device profile to emulate.
    #[arg(long, value_enum, default_value_t = DeviceKind::Base)]
    device: DeviceKind,

    /// Node name/alias advertised in the manifest.
    #[arg(long, default_value = "node-emulator")]
    name: String,

    /// Telemetry publish period in milliseconds; 0 disables the stream.
    #[arg(long, default_value_t = 1000)]
    telemetry_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let args = Args::parse();
    let node_id = format!("{}-1", args.name);
    let telemetry = (args.telemetry_ms > 0).then(|| Duration::from_millis(args.telemetry_ms));

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!(host = %args.host, port = args.port, device = ?args.device, "emulator ready");

    match args.device {
        DeviceKind::Base => {
            let mut server = NodeServer::new(emulated::drive_base_runtime(&args.name, &node_id)?);
            if let Some(period) = telemetry {
                server = server.with_telemetry(period);
            }
            server.serve(listener).await?;
        }
        DeviceKind::Arm => {
            let mut server = NodeServer::new(emulated::gripper_arm_runtime(&args.name, &node_id)?);
            if let Some(period) = telemetry {
                server = server.with_telemetry(period);
            }
            server.serve(listener).await?;
        }
    }
    Ok(())
}
