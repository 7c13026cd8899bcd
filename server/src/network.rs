//! WebSocket transport layer feeding the main server loop
//!
//! Each accepted socket gets a numeric connection id and a pair of tasks: a
//! reader that decodes JSON frames into [`Inbound`] messages for the server
//! loop, and a writer that drains the connection's [`Outbound`] channel back
//! onto the socket. All game state lives in the server loop; these tasks only
//! move bytes.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use shared::{ClientEvent, ServerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use crate::server::RealtimeStatus;

/// Transport id assigned to each accepted socket, unique for the process
/// lifetime.
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Messages sent from connection tasks and timers to the main server loop
#[derive(Debug)]
pub enum Inbound {
    /// A socket finished its handshake and is ready for events.
    Connected {
        conn: ConnId,
        /// Bearer token from the `token` query parameter, if present.
        token: Option<String>,
        /// Client device id from the `deviceId` query parameter, if present.
        device_id: Option<String>,
        tx: OutboundSender,
    },
    /// A decoded client event.
    Event { conn: ConnId, event: ClientEvent },
    /// The socket closed or failed.
    Disconnected { conn: ConnId },
    /// A lone casual-queue entry has waited long enough for a human.
    CasualDeadline { conn: ConnId },
    /// A scheduled bot move came due. Stale if `seq` no longer matches.
    BotDeadline { match_id: String, seq: u64 },
    /// Snapshot request from outside the loop.
    Status {
        reply: oneshot::Sender<RealtimeStatus>,
    },
}

/// Messages sent from the server loop to a connection's writer task
#[derive(Debug)]
pub enum Outbound {
    Event(ServerEvent),
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Spawns the accept loop. Each connection runs independently and reports
/// into `inbound`.
pub fn spawn_acceptor(listener: TcpListener, inbound: mpsc::UnboundedSender<Inbound>) {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let conn = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
                    debug!("connection {} accepted from {}", conn, addr);
                    tokio::spawn(handle_connection(conn, stream, inbound.clone()));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    });
}

/// Pulls `token` and `deviceId` out of the request query string. Empty
/// values count as absent.
fn parse_connect_params(query: Option<&str>) -> (Option<String>, Option<String>) {
    let mut token = None;
    let mut device_id = None;
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                if value.is_empty() {
                    continue;
                }
                match key {
                    "token" => token = Some(value.to_string()),
                    "deviceId" => device_id = Some(value.to_string()),
                    _ => {}
                }
            }
        }
    }
    (token, device_id)
}

async fn handle_connection(
    conn: ConnId,
    stream: TcpStream,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let mut token = None;
    let mut device_id = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let (t, d) = parse_connect_params(request.uri().query());
        token = t;
        device_id = d;
        Ok(response)
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("connection {} failed websocket handshake: {}", conn, e);
            return;
        }
    };

    let (sink, source) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();

    if inbound
        .send(Inbound::Connected {
            conn,
            token,
            device_id,
            tx,
        })
        .is_err()
    {
        return;
    }

    tokio::spawn(write_loop(conn, rx, sink));
    read_loop(conn, source, &inbound).await;

    let _ = inbound.send(Inbound::Disconnected { conn });
}

/// Drains the outbound channel onto the socket. Exits on `Close` or when the
/// socket rejects a write.
async fn write_loop(
    conn: ConnId,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Event(event) => match serde_json::to_string(&event) {
                Ok(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!("connection {} write failed: {}", conn, e);
                        break;
                    }
                }
                Err(e) => {
                    error!("connection {}: failed to encode event: {}", conn, e);
                }
            },
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Decodes text frames into client events until the socket goes away.
async fn read_loop(
    conn: ConnId,
    mut source: SplitStream<WebSocketStream<TcpStream>>,
    inbound: &mpsc::UnboundedSender<Inbound>,
) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if inbound.send(Inbound::Event { conn, event }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("connection {} sent an undecodable event: {}", conn, e);
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {
                debug!("connection {} sent a non-text frame, ignoring", conn);
            }
            Err(e) => {
                debug!("connection {} read failed: {}", conn, e);
                break;
            }
        }
    }
}
