//! Transport edge: WebSocket accept loop plus the plain-HTTP address
//! endpoint displays poll to learn where to connect.
//!
//! Each connection gets a reader task and a writer task. The reader
//! parses frames into [`ClientCommand`]s and forwards them to the session
//! loop; the writer drains the connection's outbox. Neither task touches
//! game state.

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::command::ClientCommand;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::session::SessionMessage;

/// Binds the WebSocket listener and accepts connections until the socket
/// fails.
pub async fn run_ws_listener(
    addr: &str,
    session_tx: mpsc::UnboundedSender<SessionMessage>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on {}", addr);
    serve_ws(listener, session_tx).await
}

pub async fn serve_ws(
    listener: TcpListener,
    session_tx: mpsc::UnboundedSender<SessionMessage>,
) -> std::io::Result<()> {
    let mut next_conn_id: u64 = 0;
    loop {
        let (stream, peer) = listener.accept().await?;
        let conn_id = next_conn_id;
        next_conn_id += 1;
        debug!("Accepted connection {} from {}", conn_id, peer);
        let session_tx = session_tx.clone();
        tokio::spawn(async move {
            handle_connection(stream, conn_id, session_tx).await;
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    conn_id: u64,
    session_tx: mpsc::UnboundedSender<SessionMessage>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed on connection {}: {}", conn_id, e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<String>();
    if session_tx
        .send(SessionMessage::Connected {
            conn_id,
            outbox: outbox_tx,
        })
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            if write.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => {
                    if session_tx
                        .send(SessionMessage::Command { conn_id, command })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    let _ = session_tx.send(SessionMessage::Malformed {
                        conn_id,
                        detail: e.to_string(),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read error on connection {}: {}", conn_id, e);
                break;
            }
        }
    }

    let _ = session_tx.send(SessionMessage::Disconnected { conn_id });
    writer.abort();
    debug!("Connection {} closed", conn_id);
}

/// Minimal HTTP response body displays fetch to discover the WebSocket
/// URL without a WebSocket client.
pub fn address_http_response(url: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        url.len(),
        url
    )
}

/// Answers every TCP connection with the advertised WebSocket URL.
pub async fn run_address_endpoint(addr: &str, advertised: String) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Address endpoint listening on {}", addr);
    serve_address(listener, advertised).await
}

pub async fn serve_address(listener: TcpListener, advertised: String) -> std::io::Result<()> {
    let response = address_http_response(&advertised);
    loop {
        let (mut stream, _) = listener.accept().await?;
        let response = response.clone();
        tokio::spawn(async move {
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }
}
