use anyhow::{Context, Result};
use clap::Parser;
use pw_server::cli::{Cli, TransportKind};
use pw_server::{logging, serve};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let config = cli.connection_config().context("Invalid dispatcher configuration")?;

	match cli.transport {
		TransportKind::Pipe => serve::serve_stdio(config).await,
		TransportKind::Websocket => {
			let listener = TcpListener::bind(cli.listen)
				.await
				.with_context(|| format!("Failed to bind {}", cli.listen))?;
			serve::serve_websocket(listener, config).await
		}
	}
}
