//! Length-prefixed transport over a pair of byte streams (stdio, pipes).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::frame::{FrameDecoder, encode_frame};
use super::{Transport, TransportFuture, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

const READ_CHUNK: usize = 32 * 1024;

/// Framed transport over a writer/reader pair.
pub struct PipeTransport<W, R> {
	sender: PipeTransportSender<W>,
	receiver: PipeTransportReceiver<R>,
}

/// Write half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	writer: W,
	closed: bool,
}

/// Read half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	reader: R,
	decoder: FrameDecoder,
	message_tx: mpsc::UnboundedSender<String>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport writing to `writer` and reading from `reader`.
	///
	/// Returns the transport and the channel that receives decoded messages.
	pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<String>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let transport = Self {
			sender: PipeTransportSender {
				writer,
				closed: false,
			},
			receiver: PipeTransportReceiver {
				reader,
				decoder: FrameDecoder::new(),
				message_tx,
			},
		};
		(transport, message_rx)
	}

	/// Sends one framed message.
	pub async fn send(&mut self, payload: String) -> Result<()> {
		self.sender.send_frame(&payload).await
	}

	/// Reads until EOF, forwarding each decoded message.
	pub async fn run(&mut self) -> Result<()> {
		self.receiver.read_loop().await
	}

	/// Splits into independently owned halves.
	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
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

impl<W: AsyncWrite + Unpin + Send> PipeTransportSender<W> {
	/// Sends one framed message.
	pub async fn send(&mut self, payload: String) -> Result<()> {
		self.send_frame(&payload).await
	}

	async fn send_frame(&mut self, payload: &str) -> Result<()> {
		if self.closed {
			return Err(Error::TransportClosed);
		}
		self.writer.write_all(&encode_frame(payload)?).await?;
		self.writer.flush().await?;
		Ok(())
	}

	/// Flushes and shuts down the write side.
	pub async fn shutdown(&mut self) -> Result<()> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		self.writer.flush().await?;
		self.writer.shutdown().await?;
		Ok(())
	}
}

impl<R: AsyncRead + Unpin + Send> PipeTransportReceiver<R> {
	async fn read_loop(&mut self) -> Result<()> {
		let mut chunk = vec![0u8; READ_CHUNK];
		loop {
			let n = self.reader.read(&mut chunk).await?;
			if n == 0 {
				if self.decoder.buffered() > 0 {
					return Err(Error::Transport(format!(
						"Stream ended inside a frame ({} bytes buffered)",
						self.decoder.buffered()
					)));
				}
				tracing::debug!("Pipe transport reached EOF");
				return Ok(());
			}

			for message in self.decoder.push(&chunk[..n])? {
				if self.message_tx.send(message).is_err() {
					tracing::debug!("Message receiver dropped, stopping pipe reader");
					return Ok(());
				}
			}
		}
	}
}

impl<W: AsyncWrite + Unpin + Send> Transport for PipeTransportSender<W> {
	fn send(&mut self, payload: String) -> TransportFuture<'_> {
		Box::pin(async move { self.send_frame(&payload).await })
	}

	fn close(&mut self) -> TransportFuture<'_> {
		Box::pin(self.shutdown())
	}
}

impl<R: AsyncRead + Unpin + Send + 'static> TransportReceiver for PipeTransportReceiver<R> {
	fn run(mut self: Box<Self>) -> TransportFuture<'static> {
		Box::pin(async move { self.read_loop().await })
	}
}
