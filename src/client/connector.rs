//! Opening the persistent connection

use std::pin::Pin;

use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use crate::types::{SyncError, SyncResult};

/// Inbound text frames
pub type FrameStream = BoxStream<'static, SyncResult<String>>;

/// Outbound text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SyncError> + Send>>;

/// One established connection, split into its two directions
pub struct Connection {
    pub incoming: FrameStream,
    pub outgoing: FrameSink,
}

/// Opens connections for a subscription; called again on every reconnect
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, SyncResult<Connection>>;
}

/// WebSocket connector
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'_, SyncResult<Connection>> {
        Box::pin(async move {
            let (socket, _response) = connect_async(self.url.as_str())
                .await
                .map_err(SyncError::transport)?;
            debug!(url = %self.url, "websocket handshake complete");

            let (sink, stream) = socket.split();

            // Only text frames carry notices; control frames are handled by
            // tungstenite and binary frames are not part of the protocol.
            let incoming = stream
                .filter_map(|message| {
                    future::ready(match message {
                        Ok(Message::Text(text)) => Some(Ok(text)),
                        Ok(_) => None,
                        Err(e) => Some(Err(SyncError::transport(e))),
                    })
                })
                .boxed();

            let outgoing = sink
                .with(|text: String| future::ok::<_, WsError>(Message::Text(text)))
                .sink_map_err(SyncError::transport);

            Ok(Connection {
                incoming,
                outgoing: Box::pin(outgoing),
            })
        })
    }
}
