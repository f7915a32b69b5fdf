//! Log setup for the server binary.

use tracing_subscriber::EnvFilter;

/// Filter directives used when `RUST_LOG` is unset.
///
/// Quiet by default: only errors, which include dispatcher contract
/// violations. `-v` adds connection lifecycle, `-vv` every routed request.
pub fn default_directives(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "error",
		1 => "info,tungstenite=warn,tokio_tungstenite=warn",
		_ => "debug,tungstenite=info,tokio_tungstenite=info",
	}
}

/// Installs the global subscriber on stderr, since stdout may carry the protocol.
pub fn init_logging(verbosity: u8) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.compact()
		.init();
}
