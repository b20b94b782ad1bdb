//! OffGrid console binary
//!
//! Loads configuration, brings the node up over the TCP transport, and
//! runs a line-oriented console: stdin lines become commands or chat, UI
//! events print to stdout.

use clap::Parser;
use offgrid::{ui_channel, Config, Node, NodeEvent, TcpRadio, UiEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Serverless peer-to-peer mesh chat
#[derive(Parser, Debug)]
#[command(name = "offgrid", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Nickname override
    #[arg(short, long)]
    nickname: Option<String>,

    /// Peer addresses to dial at startup (repeatable)
    #[arg(long = "connect", value_name = "ADDRESS")]
    connect: Vec<String>,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    info!("OffGrid starting");

    // Load configuration
    let (mut config, loaded_paths) = if let Some(config_path) = &args.config {
        // Explicit config file specified - load only that file
        match Config::load_file(config_path) {
            Ok(config) => (config, vec![config_path.clone()]),
            Err(e) => {
                error!(
                    "Failed to load configuration from {}: {}",
                    config_path.display(),
                    e
                );
                std::process::exit(1);
            }
        }
    } else {
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }

    if let Some(nickname) = args.nickname {
        config.node.nickname = Some(nickname);
    }

    if !config.tcp.enabled() {
        error!("TCP transport disabled in config; nothing to run");
        std::process::exit(1);
    }

    // Create the node over the TCP radio
    let device = config.local_device();
    let radio = Arc::new(TcpRadio::new(config.tcp.clone(), device));
    let (ui_tx, mut ui_rx) = ui_channel();
    let mut node = Node::new(config, radio, ui_tx);

    info!("Node created:");
    info!("   address: {}", node.local_addr());
    info!("  nickname: {}", node.local_nickname());
    info!("     state: {}", node.state());

    if let Err(e) = node.start().await {
        error!("Failed to start node: {}", e);
        std::process::exit(1);
    }

    let events = node.event_sender();

    // Console renderer: one task drains the UI channel onto stdout.
    tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            match event {
                UiEvent::Transcript(line) => println!("{}", line),
                UiEvent::Clear => print!("\x1b[2J\x1b[H"),
                UiEvent::Status(status) => println!("[STATUS] {}", status),
                UiEvent::LinkCount(count) => debug!(links = count, "Link count changed"),
                UiEvent::Typing { name, active, .. } => {
                    if active {
                        println!("* {} is typing...", name);
                    }
                }
                UiEvent::TransferProgress {
                    peer,
                    file_name,
                    percent,
                    outgoing,
                } => {
                    let direction = if outgoing { "to" } else { "from" };
                    println!("[FILE] {} {} {}: {}%", file_name, direction, peer, percent);
                }
            }
        }
    });

    // Stdin console: every line becomes a command event.
    let console_events = events.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if console_events
                .send(NodeEvent::Command(line))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Dial any peers requested on the command line.
    for address in &args.connect {
        let _ = events
            .send(NodeEvent::Command(format!("/connect {}", address)))
            .await;
    }

    info!("OffGrid running, press Ctrl+C to exit");

    tokio::select! {
        result = node.run() => {
            match result {
                Ok(()) => info!("Event loop exited"),
                Err(e) => error!("Event loop error: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("OffGrid shutting down");

    if let Err(e) = node.stop().await {
        warn!("Error during shutdown: {}", e);
    }

    info!("OffGrid shutdown complete");
}
