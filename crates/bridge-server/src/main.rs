//! Editor bridge server - Main entry point
//!
//! Runs the gateway over an in-memory editor host, speaking
//! newline-delimited JSON on a localhost TCP port or Content-Length
//! framing over stdio.

use anyhow::Context;
use bridge_core::{token, BridgeConfig, EditorHost, Gateway, MemoryHost};
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Local JSON-RPC bridge exposing an editor session to agents
#[derive(Parser, Debug)]
#[command(name = "bridge-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the TCP listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Speak Content-Length framing over stdio instead of TCP
    #[arg(long)]
    stdio: bool,

    /// Export the session token to this file (mode 0600)
    #[arg(long)]
    export_token: Option<PathBuf>,

    /// Workspace root for snapshots (defaults to the current directory)
    #[arg(long)]
    workspace: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config =
        BridgeConfig::load_or_default(args.config.as_deref()).context("loading config")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(path) = args.export_token {
        config.pairing.export_token_path = Some(path);
    }
    if let Some(root) = args.workspace {
        config.workspace_root = Some(root);
    }

    let token_path = token::default_store_path();
    let session_token = token::load_or_create(&token_path).context("provisioning token")?;
    info!(path = %token_path.display(), token = token::MASKED, "Session token ready");
    if let Some(export_path) = &config.pairing.export_token_path {
        token::export(export_path, &session_token).context("exporting token")?;
        info!(path = %export_path.display(), "Token exported for pairing");
    }

    let host = Arc::new(MemoryHost::new());
    let gateway = Arc::new(Gateway::new(
        &config,
        session_token,
        Arc::clone(&host) as Arc<dyn EditorHost>,
    ));
    let pump = gateway.start_event_pump();

    let result = if args.stdio {
        run_stdio(gateway).await
    } else {
        run_tcp(gateway, config.port).await
    };

    pump.abort();
    result
}

// ============================================================================
// TCP transport (newline-delimited JSON, localhost only)
// ============================================================================

async fn run_tcp(gateway: Arc<Gateway>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("binding 127.0.0.1:{port}"))?;
    info!(port, "Bridge listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("accepting connection")?;
                info!(%peer, "Client connected");
                let gateway = Arc::clone(&gateway);
                tokio::spawn(async move {
                    if let Err(err) = serve_socket(gateway, stream).await {
                        warn!(%peer, %err, "Connection ended with error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

async fn serve_socket(gateway: Arc<Gateway>, stream: TcpStream) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
    let connection = gateway.register_connection(outbound.clone());

    // Responses and notifications share one writer so frames never
    // interleave mid-line.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let mut line = message.to_string();
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        let read = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(err) => {
                warn!(%err, "Read failed; closing connection");
                break;
            }
        };
        if read == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(err) => {
                // Unparseable frame still gets a structured error back.
                let response = bridge_protocol::Response::err(
                    bridge_protocol::RequestId::Null,
                    bridge_protocol::ErrorCode::InvalidParams,
                    format!("Malformed JSON: {err}"),
                    None,
                );
                if let Ok(value) = serde_json::to_value(response) {
                    let _ = outbound.send(value);
                }
                continue;
            }
        };

        // Handlers run concurrently; responses may complete out of
        // submission order, paired to requests by id.
        let gateway = Arc::clone(&gateway);
        let outbound = outbound.clone();
        tokio::spawn(async move {
            if let Some(response) = gateway.handle_message(connection, message).await {
                let _ = outbound.send(response);
            }
        });
    }

    gateway.disconnect(connection);
    drop(outbound);
    if let Err(err) = writer.await {
        error!(%err, "Writer task panicked");
    }
    Ok(())
}

// ============================================================================
// Stdio transport (Content-Length framing)
// ============================================================================

async fn run_stdio(gateway: Arc<Gateway>) -> anyhow::Result<()> {
    use bridge_protocol::framing::{read_frame, write_frame};

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
    let connection = gateway.register_connection(outbound.clone());
    info!("Bridge serving on stdio");

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = outbound_rx.recv().await {
            if write_frame(&mut stdout, &message).await.is_err() {
                break;
            }
        }
    });

    let mut reader = BufReader::new(tokio::io::stdin());
    loop {
        let message = match read_frame(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "Stdio frame error; shutting down");
                break;
            }
        };
        let gateway = Arc::clone(&gateway);
        let outbound = outbound.clone();
        tokio::spawn(async move {
            if let Some(response) = gateway.handle_message(connection, message).await {
                let _ = outbound.send(response);
            }
        });
    }

    gateway.disconnect(connection);
    drop(outbound);
    let _ = writer.await;
    Ok(())
}
