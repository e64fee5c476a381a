//! WebSocket Transport
//!
//! tokio-tungstenite implementation of [`Transport`]. The host side accepts
//! connections and turns their frames into [`TransportEvent`]s; the peer side
//! ([`connect_to_host`]) is a pair of channels over one client socket.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::network::protocol::NetworkMessage;
use crate::network::transport::{
    ConnectionId, Registry, Transport, TransportError, TransportEvent, OUTBOUND_BUFFER,
};

/// Host end: accepts peers on a TCP listener.
pub struct WebSocketTransport {
    registry: Registry,
    events: mpsc::Sender<TransportEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketTransport {
    /// New transport feeding `events`.
    pub fn new(events: mpsc::Sender<TransportEvent>) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self { registry: Registry::default(), events, shutdown_tx })
    }

    /// Accept connections until [`shutdown`](Self::shutdown).
    #[instrument(skip(self, listener))]
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), TransportError> {
        let local = listener.local_addr()?;
        info!("WebSocket transport listening on {}", local);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Transport shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    fn handle_connection(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let transport = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<NetworkMessage>(OUTBOUND_BUFFER);
            let connection = transport.registry.open(msg_tx);

            if transport.events.send(TransportEvent::Opened(connection)).await.is_err() {
                transport.registry.close(connection);
                return;
            }

            // Outbound: serialize and write
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            // Inbound: parse and forward
            loop {
                tokio::select! {
                    frame = ws_receiver.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                match NetworkMessage::from_json(&text) {
                                    Ok(msg) => {
                                        if transport.events.send(TransportEvent::Message(connection, msg)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Pings are answered by tungstenite
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Cleanup
            transport.registry.close(connection);
            sender_task.abort();
            let _ = transport.events.send(TransportEvent::Closed(connection)).await;
            info!("Client {} ({}) cleaned up", addr, connection);
        });
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, connection: ConnectionId, message: &NetworkMessage) -> Result<(), TransportError> {
        self.registry.send(connection, message)
    }

    fn broadcast(&self, message: &NetworkMessage) -> usize {
        self.registry.broadcast(message)
    }

    fn connections(&self) -> Vec<ConnectionId> {
        self.registry.connections()
    }
}

// =============================================================================
// PEER SIDE
// =============================================================================

/// A peer's link to the host.
pub struct HostLink {
    outbound: mpsc::Sender<NetworkMessage>,
    inbound: mpsc::Receiver<NetworkMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl HostLink {
    /// Send a frame to the host.
    pub async fn send(&self, message: NetworkMessage) -> Result<(), TransportError> {
        self.outbound.send(message).await.map_err(|_| TransportError::Disconnected)
    }

    /// Next frame from the host; `None` once the socket is gone.
    pub async fn recv(&mut self) -> Option<NetworkMessage> {
        self.inbound.recv().await
    }
}

impl Drop for HostLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Dial the host at `url` (e.g. `ws://127.0.0.1:8080`).
#[instrument]
pub async fn connect_to_host(url: &str) -> Result<HostLink, TransportError> {
    let (ws_stream, _) = connect_async(url).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<NetworkMessage>(OUTBOUND_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<NetworkMessage>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            match msg.to_json() {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to serialize message: {}", e),
            }
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match NetworkMessage::from_json(&text) {
                    Ok(msg) => {
                        if in_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Invalid message from host: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Host link error: {}", e);
                    break;
                }
            }
        }
    });

    debug!("Connected to {}", url);
    Ok(HostLink { outbound: out_tx, inbound: in_rx, reader, writer })
}

// =============================================================================
// TESTS
// =============================================================================
