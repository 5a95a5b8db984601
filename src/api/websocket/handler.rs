//! WebSocket connection handler

use std::fmt::Display;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::broadcaster::SessionId;
use super::session::TransportSession;
use super::state::AppState;

/// Prefix the server puts in front of echoed client text
pub const ECHO_PREFIX: &str = "Echo: ";

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one connection until either side goes away
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut session, mut outbound) = TransportSession::new(Arc::clone(&state.bus));
    if let Err(e) = session.open(&state.bootstrap_notice()) {
        warn!(error = %e, "could not open session");
        return;
    }
    let session_id = session.id();

    let (mut sink, mut stream) = socket.split();
    pump(session_id, &mut outbound, &mut sink, &mut stream).await;

    session.close();
    let _ = sink.close().await;
}

/// Move frames between the session queue and the socket until one side
/// ends. A queue that closes means the bus dropped the session; returning
/// lets the caller shut the socket so the client reconnects and resyncs.
async fn pump<Tx, Rx, E>(
    session_id: Option<SessionId>,
    outbound: &mut mpsc::Receiver<String>,
    sink: &mut Tx,
    stream: &mut Rx,
) where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        tokio::select! {
            // Notices queued by the bus
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            debug!(session = ?session_id, error = %e, "send failed");
                            break;
                        }
                    }
                    None => {
                        debug!(session = ?session_id, "dropped by the bus, closing socket");
                        break;
                    }
                }
            }

            // Client traffic
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(msg)) => {
                        if !handle_client_message(msg, sink).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session = ?session_id, error = %e, "socket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Handle a message from the client.
/// Returns false if the connection should be closed
async fn handle_client_message<S>(msg: Message, sink: &mut S) -> bool
where
    S: Sink<Message> + Unpin,
{
    match msg {
        Message::Text(text) => {
            debug!(%text, "client message");
            sink.send(Message::Text(echo(&text))).await.is_ok()
        }
        Message::Binary(_) => true, // Ignore binary messages
        Message::Ping(data) => sink.send(Message::Pong(data)).await.is_ok(),
        Message::Pong(_) => true,
        Message::Close(_) => false,
    }
}

/// Diagnostic echo frame for client text
pub fn echo(text: &str) -> String {
    format!("{ECHO_PREFIX}{text}")
}
