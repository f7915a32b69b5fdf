//! Message-oriented transport over a WebSocket. No extra framing.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{Transport, TransportFuture, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

/// Transport over an established WebSocket connection.
pub struct WebSocketTransport<S> {
	sender: WebSocketTransportSender<S>,
	receiver: WebSocketTransportReceiver<S>,
}

/// Write half of a [`WebSocketTransport`].
pub struct WebSocketTransportSender<S> {
	sink: SplitSink<WebSocketStream<S>, WsMessage>,
	closed: bool,
}

/// Read half of a [`WebSocketTransport`].
pub struct WebSocketTransportReceiver<S> {
	stream: SplitStream<WebSocketStream<S>>,
	message_tx: mpsc::UnboundedSender<String>,
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> Error {
	Error::Transport(format!("WebSocket: {e}"))
}

impl<S> WebSocketTransport<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	/// Wraps an already-handshaken WebSocket stream.
	pub fn new(ws: WebSocketStream<S>) -> (Self, mpsc::UnboundedReceiver<String>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let (sink, stream) = ws.split();
		let transport = Self {
			sender: WebSocketTransportSender {
				sink,
				closed: false,
			},
			receiver: WebSocketTransportReceiver { stream, message_tx },
		};
		(transport, message_rx)
	}

	/// Splits into independently owned halves.
	pub fn into_parts(self) -> (WebSocketTransportSender<S>, WebSocketTransportReceiver<S>) {
		(self.sender, self.receiver)
	}

	/// Splits into boxed halves ready for [`DispatcherConnection::run`](crate::DispatcherConnection::run).
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<String>) -> TransportParts {
		TransportParts {
			sender: Box::new(self.sender),
			receiver: Box::new(self.receiver),
			message_rx,
		}
	}
}

impl<S> WebSocketTransportSender<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send,
{
	/// Sends one text message.
	pub async fn send_text(&mut self, payload: String) -> Result<()> {
		if self.closed {
			return Err(Error::TransportClosed);
		}
		self.sink.send(WsMessage::Text(payload)).await.map_err(ws_error)
	}

	/// Flushes and sends a close frame.
	pub async fn shutdown(&mut self) -> Result<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		self.sink.close().await.map_err(ws_error)
	}
}

impl<S> WebSocketTransportReceiver<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send,
{
	async fn read_loop(&mut self) -> Result<()> {
		while let Some(message) = self.stream.next().await {
			let payload = match message.map_err(ws_error)? {
				WsMessage::Text(text) => text,
				WsMessage::Binary(bytes) => String::from_utf8(bytes)
					.map_err(|e| Error::Transport(format!("Binary message is not UTF-8: {e}")))?,
				WsMessage::Close(frame) => {
					tracing::debug!(?frame, "WebSocket closed by peer");
					break;
				}
				WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
			};

			if self.message_tx.send(payload).is_err() {
				tracing::debug!("Message receiver dropped, stopping WebSocket reader");
				break;
			}
		}
		Ok(())
	}
}

impl<S> Transport for WebSocketTransportSender<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send,
{
	fn send(&mut self, payload: String) -> TransportFuture<'_> {
		Box::pin(self.send_text(payload))
	}

	fn close(&mut self) -> TransportFuture<'_> {
		Box::pin(self.shutdown())
	}
}

impl<S> TransportReceiver for WebSocketTransportReceiver<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	fn run(mut self: Box<Self>) -> TransportFuture<'static> {
		Box::pin(async move { self.read_loop().await })
	}
}
