//! Fiscus server entry point.

use fiscus::server::config::LogLevel;
use fiscus::{Config, Server, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args);

    if cli.help {
        print_help();
        return Ok(());
    }
    if cli.version {
        println!("fiscus version {VERSION}");
        return Ok(());
    }

    // Load configuration
    let mut config = if let Some(ref config_path) = cli.config {
        match Config::load_from_file(config_path) {
            Ok(cfg) => {
                eprintln!("Loaded configuration from: {}", config_path.display());
                cfg
            }
            Err(e) => {
                eprintln!("Error loading config file: {e}");
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // CLI overrides
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(loglevel) = cli.loglevel {
        config.loglevel = loglevel;
    }
    if let Some(maxmemory) = cli.maxmemory {
        config.maxmemory = maxmemory;
    }
    if let Some(snapshot) = cli.snapshot {
        config.snapshot_path = Some(snapshot);
    }
    if cli.cluster {
        config.cluster_enabled = true;
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.loglevel.as_filter()));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!(
        version = VERSION,
        bind = %config.bind,
        port = config.port,
        "fiscus starting"
    );

    let server = Arc::new(Server::new(config));

    // SIGINT / SIGTERM trigger a graceful shutdown
    let server_for_signals = server.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for SIGINT");
            }
        };

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to create SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        ctrl_c.await;

        info!("received shutdown signal");
        server_for_signals.shutdown();
    });

    server.run().await?;
    Ok(())
}

/// CLI arguments.
struct CliArgs {
    config: Option<PathBuf>,
    port: Option<u16>,
    bind: Option<String>,
    loglevel: Option<LogLevel>,
    maxmemory: Option<usize>,
    snapshot: Option<PathBuf>,
    cluster: bool,
    help: bool,
    version: bool,
}

fn parse_args(args: &[String]) -> CliArgs {
    let mut cli = CliArgs {
        config: None,
        port: None,
        bind: None,
        loglevel: None,
        maxmemory: None,
        snapshot: None,
        cluster: false,
        help: false,
        version: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                cli.config = args.get(i).map(PathBuf::from);
            }
            "--port" | "-p" => {
                i += 1;
                cli.port = args.get(i).and_then(|s| s.parse().ok());
            }
            "--bind" | "-b" => {
                i += 1;
                cli.bind = args.get(i).cloned();
            }
            "--loglevel" => {
                i += 1;
                cli.loglevel = args.get(i).and_then(|s| LogLevel::parse(s));
            }
            "--maxmemory" => {
                i += 1;
                cli.maxmemory = args
                    .get(i)
                    .and_then(|s| fiscus::server::config::parse_memory(s));
            }
            "--snapshot" => {
                i += 1;
                cli.snapshot = args.get(i).map(PathBuf::from);
            }
            "--cluster" => {
                cli.cluster = true;
            }
            "--help" | "-h" => {
                cli.help = true;
            }
            "--version" | "-v" => {
                cli.version = true;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {arg}");
                cli.help = true;
            }
            _ => {}
        }
        i += 1;
    }

    cli
}

fn print_help() {
    println!(
        r"fiscus {VERSION} - an in-memory key-value store for financial workloads

USAGE:
    fiscus [OPTIONS]

OPTIONS:
    -c, --config <FILE>      Load configuration from file
    -p, --port <PORT>        Server port (default: 6379)
    -b, --bind <ADDR>        Bind address (default: 127.0.0.1)
        --loglevel <LEVEL>   Log level (debug, notice, warning)
        --maxmemory <BYTES>  Memory budget (e.g. 1gb, 512mb; 0 = unlimited)
        --snapshot <FILE>    Snapshot file for SAVE and startup load
        --cluster            Enable cluster mode
    -h, --help               Print this help message
    -v, --version            Print version information

SIGNALS:
    SIGINT/SIGTERM  Graceful shutdown (drains connections, saves snapshot)
"
    );
}
