//! Mock WebSocket server for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections and count them
//! - Record received text frames
//! - Answer PING envelopes with PONG
//! - Push frames to, or abruptly drop, every live connection

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

enum Command {
    Send(String),
    Drop,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<Command>>>>,
}

impl MockWsServer {
    /// Start a new mock WebSocket server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let clients = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        let clients_clone = clients.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        clients_clone.lock().await.push(tx);
                        tokio::spawn(handle_connection(
                            stream,
                            messages_clone.clone(),
                            connections_clone.clone(),
                            rx,
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            messages,
            connections,
            clients,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of completed handshakes.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// All received text frames, oldest first.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }

    /// Received frames parsed as JSON, filtered by `kind`.
    pub async fn received_of_kind(&self, kind: &str) -> Vec<Value> {
        self.received_messages()
            .await
            .iter()
            .filter_map(|m| serde_json::from_str::<Value>(m).ok())
            .filter(|v| v["kind"] == kind)
            .collect()
    }

    /// Push a raw text frame to every live connection.
    pub async fn send_to_all(&self, text: impl Into<String>) {
        let text = text.into();
        let mut clients = self.clients.lock().await;
        clients.retain(|tx| tx.send(Command::Send(text.clone())).is_ok());
    }

    /// Drop every live connection without a close handshake.
    pub async fn drop_all(&self) {
        for tx in self.clients.lock().await.drain(..) {
            let _ = tx.send(Command::Drop);
        }
    }

    /// Stop accepting connections and drop live ones.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        self.drop_all().await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    *connections.lock().await += 1;

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    messages.lock().await.push(text.clone());

                    let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                    if parsed["kind"] == "PING" {
                        let pong = json!({
                            "kind": "PONG",
                            "data": null,
                            "timestamp": "2026-01-01T00:00:00Z",
                            "id": "pong",
                        });
                        let _ = write.send(Message::Text(pong.to_string())).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            cmd = commands.recv() => match cmd {
                Some(Command::Send(text)) => {
                    let _ = write.send(Message::Text(text)).await;
                }
                Some(Command::Drop) | None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}
