//! `maestro` – multi-node orchestrator front-end.
//!
//! Three modes, picked from the flags:
//!
//! 1. `--http-port` serves the HTTP control plane (bridge mode).
//! 2. `--instruction` plans and executes one instruction, then exits.
//! 3. Otherwise an interactive REPL: type instructions, `stop` for an
//!    emergency stop, `exit` to quit; Ctrl-C stops every node before
//!    exiting.
//!
//! Nodes are addressed as `--node alias=host:port`, repeatable; the first
//! occurrence of an alias wins.

mod repl;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tokio::net::TcpListener;
use uuid::Uuid;

use maestro_orchestrator::{NodeEndpoint, Orchestrator, Timeouts};

#[derive(Debug, Parser)]
#[command(name = "maestro", about = "MAESTRO multi-node orchestrator")]
struct Args {
    /// Node endpoint as alias=host:port (repeatable).
    #[arg(long = "node", required = true, value_name = "ALIAS=HOST:PORT")]
    nodes: Vec<NodeEndpoint>,

    /// Remote planner URL (e.g. http://pi.local:8090/plan).
    #[arg(long)]
    planner_url: Option<String>,

    /// One-shot instruction (non-interactive).
    #[arg(long, conflicts_with = "http_port")]
    instruction: Option<String>,

    /// Print node telemetry as it streams in.
    #[arg(long)]
    telemetry: bool,

    /// Per-step RUN/STOP response timeout in seconds.
    #[arg(long, default_value_t = 4.0)]
    step_timeout: f64,

    /// Node connect/handshake timeout in seconds.
    #[arg(long, default_value_t = 7.0)]
    connect_timeout: f64,

    /// HTTP bridge bind host.
    #[arg(long, default_value = "127.0.0.1")]
    http_host: String,

    /// HTTP bridge bind port; enables bridge mode.
    #[arg(long)]
    http_port: Option<u16>,
}

fn init_logging() {
    // RUST_LOG controls verbosity (default "info"); MAESTRO_LOG_FORMAT=json
    // switches to newline-delimited JSON for log aggregators. User-facing
    // output still goes through println! for UX consistency.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("MAESTRO_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }
}

/// First occurrence of an alias wins; later duplicates are dropped.
fn dedupe_endpoints(raw: Vec<NodeEndpoint>) -> Vec<NodeEndpoint> {
    let mut endpoints: Vec<NodeEndpoint> = Vec::with_capacity(raw.len());
    for endpoint in raw {
        if endpoints.iter().any(|kept| kept.alias == endpoint.alias) {
            eprintln!(
                "{} duplicate --node alias '{}' ignored",
                "warning:".yellow(),
                endpoint.alias
            );
            continue;
        }
        endpoints.push(endpoint);
    }
    endpoints
}

fn correlation_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &hex[..12])
}

/// Stream telemetry samples to the console.
fn spawn_telemetry_printer(orchestrator: &Orchestrator) {
    for client in orchestrator.clients() {
        let mut rx = client.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(sample) => {
                        println!(
                            "[{}] {}={}",
                            sample.node_alias.cyan(),
                            sample.key,
                            sample.value
                        );
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

async fn run_one_shot(
    orchestrator: &Orchestrator,
    instruction: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let correlation_id = correlation_id("cli");
    let plan = orchestrator.make_plan(instruction, &correlation_id).await?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    orchestrator.execute_plan(&plan, &correlation_id).await?;
    println!("{}", "plan executed".green());
    Ok(())
}

async fn run_bridge(
    orchestrator: Arc<Orchestrator>,
    host: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind((host, port)).await?;
    println!(
        "http bridge listening on {}",
        format!("http://{host}:{port}").bold()
    );
    tokio::select! {
        result = maestro_bridge::serve(Arc::clone(&orchestrator), listener) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", "Ctrl-C received, issuing STOP to all nodes...".yellow().bold());
            orchestrator.emergency_stop().await;
            println!("{}", "global stop sent".green());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();

    let endpoints = dedupe_endpoints(args.nodes);
    let timeouts = Timeouts {
        connect: Duration::from_secs_f64(args.connect_timeout),
        step: Duration::from_secs_f64(args.step_timeout),
    };

    let mut orchestrator = Orchestrator::new(endpoints, timeouts);
    if let Some(url) = &args.planner_url {
        orchestrator = orchestrator.with_planner(url);
    }
    let orchestrator = Arc::new(orchestrator);

    let failures = orchestrator.connect_all().await;
    for (alias, err) in &failures {
        eprintln!("{} {}: {}", "connect failed".red(), alias.bold(), err);
    }
    for client in orchestrator.clients() {
        if client.is_connected() {
            let commands = client
                .manifest()
                .map(|m| {
                    m.commands
                        .iter()
                        .map(|c| c.token.clone())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            println!(
                "connected {} -> commands={}",
                client.alias().bold(),
                commands
            );
        }
    }

    if args.telemetry {
        spawn_telemetry_printer(&orchestrator);
    }

    let result = if let Some(port) = args.http_port {
        run_bridge(Arc::clone(&orchestrator), &args.http_host, port).await
    } else if let Some(instruction) = &args.instruction {
        run_one_shot(&orchestrator, instruction).await
    } else {
        repl::run(Arc::clone(&orchestrator)).await
    };

    orchestrator.shutdown().await;
    result
}
