//! Wavecall signaling relay
//!
//! Serves the relay over WebSocket: one connection per device, one JSON
//! message per text frame. Each connection gets a reader task feeding the
//! relay and a writer task draining the relay's outbound channel.

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use wavecall_core::{ClientMessage, ContactDirectory, NoContacts, Relay, UserId};

mod contacts;

use contacts::FileContacts;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:9443")]
    bind: SocketAddr,

    /// JSON contact-directory file (identity -> contact list). Without it,
    /// presence fan-out is disabled.
    #[arg(long)]
    contacts: Option<PathBuf>,

    /// Log filter
    #[arg(long, env = "WAVECALL_LOG", default_value = "wavecall=info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log))
        .init();

    let directory: Arc<dyn ContactDirectory<UserId>> = match &cli.contacts {
        Some(path) => {
            let loaded = FileContacts::load(path)?;
            info!(path = %path.display(), "Loaded contact directory");
            Arc::new(loaded)
        }
        None => {
            warn!("No contacts file given; presence fan-out is disabled");
            Arc::new(NoContacts)
        }
    };

    let relay = Arc::new(Relay::<UserId>::new(directory));

    let listener = TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    info!(addr = %cli.bind, "Relay listening");

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let relay = relay.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_connection(relay, stream, peer_addr).await {
                debug!(%peer_addr, "Connection closed: {err:#}");
            }
        });
    }
}

/// Drive one WebSocket connection until it closes, then let the relay clean
/// up whatever the connection was doing.
async fn serve_connection(
    relay: Arc<Relay<UserId>>,
    stream: TcpStream,
    peer_addr: SocketAddr,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("websocket handshake")?;
    let (mut sink, mut source) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = relay.connect(tx);
    info!(%connection, %peer_addr, "Connection open");

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let frame = match serde_json::to_string(&message) {
                Ok(text) => Message::Text(text),
                Err(err) => {
                    warn!(%err, "Failed to encode outbound message");
                    continue;
                }
            };
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage<UserId>>(&text) {
                Ok(message) => relay.handle_message(connection, message),
                Err(err) => {
                    warn!(%connection, %err, "Ignoring malformed frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
            Err(err) => {
                debug!(%connection, %err, "Read error");
                break;
            }
        }
    }

    relay.disconnect(connection);
    writer.abort();
    info!(%connection, "Connection closed");
    Ok(())
}
