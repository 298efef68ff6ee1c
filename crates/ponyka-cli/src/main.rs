//! `ponyka` – robot telemetry bridge.
//!
//! Starts, in one process:
//!
//! 1. two self-healing `PublishState` subscriptions (robot pose and
//!    operation state) fanned out to WebSocket subscribers;
//! 2. the WebSocket push endpoint (default `:3005`);
//! 3. the HTTP command surface (default `:3001`) driving the 20 Hz
//!    `SubscribeRobotCommand` stream and one-shot task commands.
//!
//! Ctrl-C stops the command stream (zeroing the velocity setpoint) and both
//! feeds before exiting.

mod config;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use ponyka_cockpit::CockpitServer;
use ponyka_middleware::{
    CommandMultiplexer, FeedConnector, GrpcCommandConnector, GrpcFeedConnector, GrpcTaskCommander,
    PushServer, StreamSupervisor, SubscriberRegistry,
};
use ponyka_types::BridgeError;
use tracing::{error, info};

use crate::config::Config;

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    config: Option<PathBuf>,
    help: bool,
}

impl CliArgs {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut parsed = CliArgs::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    let path = args.next().ok_or_else(|| format!("{arg} needs a path"))?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "-h" | "--help" => parsed.help = true,
                other => {
                    if let Some(path) = other.strip_prefix("--config=") {
                        parsed.config = Some(PathBuf::from(path));
                    } else {
                        return Err(format!("unknown argument '{other}'"));
                    }
                }
            }
        }
        Ok(parsed)
    }
}

fn main() -> ExitCode {
    let args = match CliArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_usage();
            return ExitCode::FAILURE;
        }
    };
    if args.help {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let _guard = telemetry::init_tracing("ponyka");
    print_banner();

    let cfg = match config::load(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    print_config(&cfg, &config::resolve_path(args.config.as_deref()));

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "bridge stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config) -> Result<(), BridgeError> {
    let registry = Arc::new(SubscriberRegistry::default());
    let feeds: Arc<dyn FeedConnector> = Arc::new(GrpcFeedConnector);

    let supervisors = [
        StreamSupervisor::new(cfg.robot_state_feed(), Arc::clone(&feeds), Arc::clone(&registry)),
        StreamSupervisor::new(cfg.operation_state_feed(), Arc::clone(&feeds), Arc::clone(&registry)),
    ];
    let commands = CommandMultiplexer::with_period(
        Arc::new(GrpcCommandConnector::default()),
        cfg.grpc.nav_command_endpoint(),
        cfg.timing.command_period(),
    );
    let tasks = Arc::new(GrpcTaskCommander::new(cfg.grpc.task_command_endpoint()));

    for supervisor in &supervisors {
        supervisor.start();
    }

    let push = PushServer::new(Arc::clone(&registry)).run(SocketAddr::from(([0, 0, 0, 0], cfg.ws_port)));
    let http = CockpitServer::new(commands.clone(), tasks)
        .with_port(cfg.http_port)
        .run();

    let result = tokio::select! {
        r = push => r,
        r = http => r,
        signal = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", "⚠  Ctrl-C received, shutting down …".yellow().bold());
            signal.map_err(|e| BridgeError::Config(format!("signal handler: {e}")))
        }
    };

    commands.stop();
    for supervisor in &supervisors {
        supervisor.stop();
    }
    info!(subscribers = registry.len(), "bridge stopped");
    println!("{}", "  ✓ Command stream stopped, setpoint zeroed.".green());
    result
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___             __ __ ___ "#.bold().cyan());
    println!("{}", r#"  / _ \___  ___ __/ //_//   |"#.bold().cyan());
    println!("{}", r#" / ___/ _ \/ _ \ // ,<  / /| |"#.bold().cyan());
    println!("{}", r#"/_/   \___/_//_/\_/_/|_|/_/ |_|"#.bold().cyan());
    println!();
    println!("  {} {}", "PonyKA bridge".bold(), env!("CARGO_PKG_VERSION").dimmed());
    println!("  gRPC telemetry → WebSocket, HTTP → command stream");
    println!();
}

fn print_config(cfg: &Config, path: &std::path::Path) {
    let source = if path.exists() {
        path.display().to_string()
    } else {
        "defaults".to_string()
    };
    println!("  Config         {}", source.bold());
    println!("  Robot          {}", cfg.grpc.host.bold());
    println!(
        "  Feeds          pose :{}  opstate :{}",
        cfg.grpc.robot_state_port, cfg.grpc.opstate_port
    );
    println!(
        "  Commands       nav :{}  task :{}",
        cfg.grpc.nav_command_port, cfg.grpc.task_command_port
    );
    println!(
        "  Listening      http :{}  ws :{}",
        cfg.http_port.to_string().green(),
        cfg.ws_port.to_string().green()
    );
    println!();
}

fn print_usage() {
    println!("Usage: ponyka [--config <path>]");
    println!();
    println!("  -c, --config <path>   config file (default $PONYKA_CONFIG or ~/.ponyka/config.toml)");
    println!("  -h, --help            show this help");
}
