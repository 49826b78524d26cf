//! WebSocket accept loop: binds a `TcpListener`, performs the WebSocket
//! handshake on the configured path, and wires each connection's frames
//! into the dispatcher (SPEC_FULL.md §6).
//!
//! Mirrors the teacher's Unix-socket accept loop (spawn-per-connection,
//! `log::info!`/`log::error!` on lifecycle events, `anyhow::Context` on
//! setup failures) adapted to a WebSocket, TCP-bound server.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::Message;

use crate::app::SocketApi;
use crate::config::ServerConfig;
use crate::socket::{new_socket, Frame};

/// A running server: the accept loop's join handle plus the address it
/// actually bound to (useful when `config.bind_addr` asks for an
/// OS-assigned port).
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    accept_handle: JoinHandle<()>,
}

impl Server {
    /// Bind and spawn the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(config: ServerConfig, app: SocketApi) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        let local_addr = listener.local_addr().context("failed to read local address")?;
        log::info!("listening on {local_addr}, endpoint path {}", config.path);

        let accept_handle = tokio::spawn(accept_loop(listener, app, config.path));

        Ok(Self {
            local_addr,
            accept_handle,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(self) {
        self.accept_handle.abort();
    }
}

async fn accept_loop(listener: TcpListener, app: SocketApi, path: String) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let app = app.clone();
                let path = path.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, app, &path).await {
                        log::warn!("connection from {peer} ended: {e}");
                    }
                });
            }
            Err(e) => {
                log::error!("accept error: {e}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, app: SocketApi, expected_path: &str) -> Result<()> {
    let expected_path = expected_path.to_string();
    let check_path = move |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() == expected_path.as_str() {
            Ok(response)
        } else {
            let body = format!("no endpoint at {}", req.uri().path());
            let rejection = http::Response::builder()
                .status(http::StatusCode::NOT_FOUND)
                .body(Some(body))
                .expect("building a static error response never fails");
            Err(rejection)
        }
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, check_path)
        .await
        .context("WebSocket handshake failed")?;
    let (mut sink, mut stream) = ws_stream.split();

    let (socket, mut outbound) = new_socket();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let result = match frame {
                Frame::Json(value) => sink.send(Message::Text(value.to_string())).await,
                Frame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let dispatch_task = tokio::spawn(async move {
        app.serve_connection(socket, inbound_rx).await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                Ok(value) => {
                    if inbound_tx.send(value).is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("dropping malformed frame: {e}"),
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
            Err(e) => {
                log::warn!("WebSocket read error: {e}");
                break;
            }
        }
    }
    drop(inbound_tx);

    let _ = dispatch_task.await;
    writer_task.abort();
    Ok(())
}
