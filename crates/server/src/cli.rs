use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use pw_dispatcher::ConnectionConfig;

/// How the server talks to its client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
	/// Length-prefixed frames on stdin/stdout
	#[default]
	Pipe,
	/// One connection per WebSocket client
	Websocket,
}

#[derive(Parser, Debug)]
#[command(name = "pw-server")]
#[command(about = "Dispatcher RPC server over stdio pipes or WebSocket")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Transport to serve on
	#[arg(short, long, value_enum, default_value = "pipe")]
	pub transport: TransportKind,

	/// Address to listen on with the websocket transport
	#[arg(long, value_name = "ADDR", default_value = "127.0.0.1:9323")]
	pub listen: SocketAddr,

	/// Reject events pushed by disposed objects instead of dropping them
	#[arg(long)]
	pub strict: bool,

	/// Override the live-object limit of every GC bucket
	#[arg(long, value_name = "COUNT")]
	pub max_dispatchers: Option<usize>,
}

impl Cli {
	/// Environment settings, overridden by flags.
	pub fn connection_config(&self) -> pw_dispatcher::Result<ConnectionConfig> {
		let mut config = ConnectionConfig::from_env()?;
		if self.strict {
			config = config.strict(true);
		}
		if let Some(limit) = self.max_dispatchers {
			config = config.max_dispatchers_per_bucket(limit);
		}
		Ok(config)
	}
}
