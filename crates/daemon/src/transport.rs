//! Line-delimited JSON transport.
//!
//! Trivial glue between TCP sockets and the session core. Each line is a
//! JSON [`Envelope`]: requests become session commands and their replies
//! echo the request's sequence number, while notifications pushed by the
//! core are written with a daemon-assigned sequence. One connection maps
//! to one client id for its whole lifetime; the core learns about the
//! connection through `Connect` and `Disconnect` commands.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use protocol::messages::{Envelope, Message, Pong};
use protocol::{ClientId, PROTOCOL_VERSION};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SessionHandle;

/// Accept client connections until the token is cancelled.
pub async fn serve(
    listener: TcpListener,
    session: SessionHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Transport listening");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Transport shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("Failed to accept connection")?;
                let session = session.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let client = ClientId::generate();
                    info!(client_id = %client, peer = %peer, "Client connected");
                    if let Err(err) = serve_client(stream, client, session, shutdown).await {
                        debug!(client_id = %client, "Connection ended: {err:#}");
                    }
                    info!(client_id = %client, "Client connection closed");
                });
            }
        }
    }
}

/// Drive one client connection to completion.
async fn serve_client(
    stream: TcpStream,
    client: ClientId,
    session: SessionHandle,
    shutdown: CancellationToken,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();

    // Everything outbound funnels through one writer task.
    let (wire_tx, wire_rx) = mpsc::unbounded_channel::<Envelope>();
    let writer = tokio::spawn(write_lines(write_half, wire_rx));

    // Notifications pushed by the core get daemon-assigned sequences.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    session.connect(client, out_tx);
    {
        let wire_tx = wire_tx.clone();
        tokio::spawn(async move {
            let sequence = AtomicU64::new(0);
            while let Some(message) = out_rx.recv().await {
                let envelope = Envelope::new(sequence.fetch_add(1, Ordering::Relaxed), message);
                if wire_tx.send(envelope).is_err() {
                    break;
                }
            }
        });
    }

    let result = read_loop(read_half, client, &session, &wire_tx, &shutdown).await;

    // Disconnecting drops the core's outbound sender, which lets the
    // notification pump and then the writer drain and stop.
    session.disconnect(client);
    drop(wire_tx);
    let _ = writer.await;
    result
}

/// Read request lines until EOF, error, or shutdown.
async fn read_loop(
    read_half: OwnedReadHalf,
    client: ClientId,
    session: &SessionHandle,
    wire_tx: &mpsc::UnboundedSender<Envelope>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => line.context("Failed to read from client")?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(client_id = %client, "Dropping malformed message: {err}");
                continue;
            }
        };
        if envelope.version != PROTOCOL_VERSION {
            warn!(
                client_id = %client,
                version = envelope.version,
                "Dropping message with unsupported protocol version"
            );
            continue;
        }
        handle_request(client, session, wire_tx, envelope).await;
    }
}

/// Turn one request envelope into session commands and answer it.
async fn handle_request(
    client: ClientId,
    session: &SessionHandle,
    wire_tx: &mpsc::UnboundedSender<Envelope>,
    envelope: Envelope,
) {
    let sequence = envelope.sequence;
    let reply = match envelope.payload {
        // Heartbeat is answered without touching the core.
        Message::Ping(ping) => Some(Message::Pong(Pong {
            timestamp: ping.timestamp,
        })),
        Message::OpenFile(request) => session.open_file(client, request.path).await.ok(),
        Message::CloseFile(request) => session.close_file(client, request.path).await.ok(),
        Message::ReadFile(request) => session.read_file(request.path).await.ok(),
        Message::WriteFile(request) => session
            .write_file(request.path, request.content)
            .await
            .ok(),
        Message::CreateFile(request) => session.create_file(request.descriptor).await.ok(),
        Message::AcquireCapability(request) => {
            session.acquire_capability(client, request.capability);
            None
        }
        Message::ReleaseCapability(request) => {
            session.release_capability(client, request.id);
            None
        }
        _ => {
            warn!(client_id = %client, "Ignoring unexpected message from client");
            None
        }
    };
    if let Some(message) = reply {
        let _ = wire_tx.send(Envelope::new(sequence, message));
    }
}

/// Serialize outbound envelopes onto the socket, one per line.
async fn write_lines(mut write_half: OwnedWriteHalf, mut wire_rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = wire_rx.recv().await {
        let mut line = match serde_json::to_vec(&envelope) {
            Ok(line) => line,
            Err(err) => {
                warn!("Failed to serialize outbound message: {err}");
                continue;
            }
        };
        line.push(b'\n');
        if write_half.write_all(&line).await.is_err() {
            break;
        }
    }
}
