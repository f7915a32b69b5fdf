//! Error types for the dispatcher core.

use pw_protocol::ErrorPayload;
use thiserror::Error;

/// Result type alias for dispatcher operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Message carried by every [`Error::TargetClosed`]. Clients match on it.
pub const TARGET_CLOSED_MESSAGE: &str = "Target page, context or browser has been closed";

/// Errors produced by the dispatcher core and its method handlers.
#[derive(Debug, Error)]
pub enum Error {
	/// The addressed object is gone (never existed, disposed, or the
	/// connection was closed).
	#[error("{}", TARGET_CLOSED_MESSAGE)]
	TargetClosed,

	/// Params, metadata or an object reference failed validation.
	#[error("{message}")]
	Validation {
		/// Field path of the offending value (empty for the params root).
		path: String,
		/// Full message, already prefixed with the path.
		message: String,
	},

	/// The scheme accepted the call but the dispatcher has no handler for it.
	#[error("Mismatching dispatcher: \"{type_name}\" does not implement \"{method}\"")]
	MethodNotFound { type_name: String, method: String },

	/// A method handler failed.
	#[error("{message}")]
	Handler {
		/// Error type name (e.g. "Error", "TimeoutError")
		name: String,
		/// Human-readable error message
		message: String,
		/// Stack or backtrace text, when the handler has one
		stack: Option<String>,
	},

	/// An invariant of the dispatcher tree was broken by the caller.
	#[error("Contract violation: {0}")]
	Contract(String),

	/// The transport was closed and can no longer carry messages.
	#[error("Transport closed")]
	TransportClosed,

	/// Transport-level error (framing, WebSocket protocol).
	#[error("Transport error: {0}")]
	Transport(String),

	/// Invalid configuration value.
	#[error("Invalid configuration: {0}")]
	Config(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Builds a validation error whose message is prefixed with `path`.
	pub fn validation(path: &str, detail: impl AsRef<str>) -> Self {
		let detail = detail.as_ref();
		let message = if path.is_empty() {
			detail.to_string()
		} else {
			format!("{path}: {detail}")
		};
		Error::Validation {
			path: path.to_string(),
			message,
		}
	}

	/// Builds a plain handler error named `Error`.
	pub fn handler(message: impl Into<String>) -> Self {
		Error::Handler {
			name: "Error".to_string(),
			message: message.into(),
			stack: None,
		}
	}

	/// Builds a handler error with an explicit error name.
	pub fn handler_named(name: impl Into<String>, message: impl Into<String>) -> Self {
		Error::Handler {
			name: name.into(),
			message: message.into(),
			stack: None,
		}
	}

	/// Builds a contract violation and logs it; these are never expected at runtime.
	pub fn contract(message: impl Into<String>) -> Self {
		let message = message.into();
		tracing::error!(%message, "dispatcher contract violation");
		Error::Contract(message)
	}

	/// Returns the wire name of this error.
	pub fn name(&self) -> &str {
		match self {
			Error::TargetClosed => "TargetClosedError",
			Error::Validation { .. } => "ValidationError",
			Error::Handler { name, .. } => name,
			_ => "Error",
		}
	}

	/// Returns true if this is a target closed error.
	pub fn is_target_closed(&self) -> bool {
		match self {
			Error::TargetClosed => true,
			Error::Handler { name, .. } => name == "TargetClosedError",
			_ => false,
		}
	}

	/// Returns true if this is a validation error.
	pub fn is_validation(&self) -> bool {
		matches!(self, Error::Validation { .. })
	}

	/// Returns true if this error reports a broken dispatcher invariant.
	pub fn is_contract_violation(&self) -> bool {
		matches!(self, Error::Contract(_))
	}

	/// Serializes this error for a failure reply.
	pub fn to_payload(&self) -> ErrorPayload {
		let stack = match self {
			Error::Handler { stack, .. } => stack.clone(),
			_ => None,
		};
		ErrorPayload {
			message: self.to_string(),
			name: Some(self.name().to_string()),
			stack,
		}
	}
}
