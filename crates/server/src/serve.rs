use std::sync::Arc;

use anyhow::{Context, Result};
use pw_dispatcher::{ConnectionConfig, DispatcherConnection, PipeTransport, WebSocketTransport};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::objects;

/// A fresh connection serving the object graph from [`objects`].
pub fn new_connection(config: ConnectionConfig) -> Arc<DispatcherConnection> {
	DispatcherConnection::new(config, objects::scheme(), objects::root_methods())
}

/// Serves one connection on stdin/stdout until the client closes stdin.
pub async fn serve_stdio(config: ConnectionConfig) -> Result<()> {
	let connection = new_connection(config);
	let (transport, rx) = PipeTransport::new(tokio::io::stdout(), tokio::io::stdin());

	info!(target = "pw.server", "serving on stdio");
	connection
		.run(transport.into_transport_parts(rx))
		.await
		.context("Pipe connection failed")?;
	info!(target = "pw.server", "stdin closed, exiting");
	Ok(())
}

/// Accepts WebSocket clients until Ctrl+C, one connection per client.
pub async fn serve_websocket(listener: TcpListener, config: ConnectionConfig) -> Result<()> {
	let addr = listener.local_addr().context("Listener has no local address")?;
	info!(target = "pw.server", %addr, "listening for websocket clients");

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!(target = "pw.server", "received Ctrl+C, shutting down");
				break;
			}
			accept = listener.accept() => {
				let (stream, peer) = accept.context("WebSocket accept failed")?;
				let config = config.clone();
				tokio::spawn(async move {
					if let Err(err) = handle_client(stream, config).await {
						warn!(target = "pw.server", %peer, error = %err, "websocket connection error");
					}
				});
			}
		}
	}

	Ok(())
}

async fn handle_client(stream: TcpStream, config: ConnectionConfig) -> Result<()> {
	let peer = stream.peer_addr().ok();
	let ws = tokio_tungstenite::accept_async(stream)
		.await
		.context("WebSocket handshake failed")?;
	info!(target = "pw.server", ?peer, "client connected");

	let connection = new_connection(config);
	let (transport, rx) = WebSocketTransport::new(ws);
	connection.run(transport.into_transport_parts(rx)).await?;

	info!(target = "pw.server", ?peer, "client disconnected");
	Ok(())
}
