//! Message transports for a dispatcher connection.
//!
//! A transport is split into two halves so reading and writing can run on
//! separate tasks:
//!
//! - [`Transport`]: the write half. `send` carries one logical message;
//!   `close` flushes and half-closes.
//! - [`TransportReceiver`]: the read half. `run` forwards every inbound
//!   message to an unbounded channel, in order, and returns when the peer
//!   ends the stream. The channel closing is the "on close" signal.
//!
//! Byte pipes need [length-prefixed framing](frame); WebSockets already
//! preserve message boundaries and pass payloads through unchanged.
//!
//! # Close semantics
//!
//! `close` is flush-then-half-close: queued bytes are written, then the write
//! side is shut down (pipe `shutdown`, WebSocket close frame). The read side
//! keeps delivering until the peer ends it. Closing twice is a no-op and any
//! `send` after `close` fails with [`Error::TransportClosed`](crate::Error::TransportClosed).

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::Result;

pub mod frame;
mod pipe;
mod websocket;


pub use frame::{FrameDecoder, LENGTH_PREFIX_LEN, MAX_FRAME_LEN, encode_frame};
pub use pipe::{PipeTransport, PipeTransportReceiver, PipeTransportSender};
pub use websocket::{WebSocketTransport, WebSocketTransportReceiver, WebSocketTransportSender};

/// Boxed future returned by transport trait methods.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Write half of a transport.
pub trait Transport: Send {
	/// Sends one logical message.
	fn send(&mut self, payload: String) -> TransportFuture<'_>;

	/// Flushes pending writes and half-closes the channel.
	fn close(&mut self) -> TransportFuture<'_>;
}

/// Read half of a transport.
pub trait TransportReceiver: Send {
	/// Delivers inbound messages until the peer closes the stream.
	fn run(self: Box<Self>) -> TransportFuture<'static>;
}

/// Both halves of a transport plus the channel the receiver feeds.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<String>,
}
