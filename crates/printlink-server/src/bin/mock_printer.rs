//! Mock printer for local development.
//!
//! A WebSocket server that sends every text frame straight back, so a
//! session pointed at it sees its own writes as telemetry and its keepalives
//! as heartbeats.
//!
//! ```bash
//! mock-printer            # ws://127.0.0.1:9999
//! mock-printer 0.0.0.0:9000
//! ```

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_ADDR: &str = "127.0.0.1:9999";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mock_printer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string())
        .parse()
        .context("Invalid listen address")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("mock printer ws started on ws://{}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = echo(stream).await {
                warn!(peer = %peer, error = %e, "Client failed");
            }
        });
    }
}

async fn echo(stream: TcpStream) -> Result<()> {
    let peer = stream.peer_addr()?;
    let mut ws = accept_async(stream).await?;
    debug!(peer = %peer, "Client connected");

    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => ws.send(Message::Text(text)).await?,
            Message::Binary(data) => ws.send(Message::Binary(data)).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!(peer = %peer, "Client disconnected");
    Ok(())
}
