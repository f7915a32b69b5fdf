//! Request, reply and push message shapes.
//!
//! ```text
//! Request:       { id, guid, method, params?, metadata? }
//! Success reply: { id, result? }
//! Failure reply: { id, error: { error: { name, message, stack? } } }
//! Server push:   { guid, method, params }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Push method announcing a new object under the receiving guid.
pub const CREATE_METHOD: &str = "__create__";
/// Push method announcing that the receiving guid and its subtree are gone.
pub const DISPOSE_METHOD: &str = "__dispose__";
/// Push method moving an existing object under the receiving guid.
pub const ADOPT_METHOD: &str = "__adopt__";
/// Control method returning the dispatcher tree for diagnostics.
pub const DEBUG_SCOPE_STATE_METHOD: &str = "debugScopeState";

/// Protocol request sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Request ID used by the client to correlate the reply.
	pub id: u64,
	/// GUID of the target object (format: "Type@id"). A request without one
	/// addresses nothing and fails as closed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub guid: Option<String>,
	/// Method name to invoke.
	#[serde(default)]
	pub method: String,
	/// Method parameters; absent params arrive as `null`.
	#[serde(default)]
	pub params: Value,
	/// Raw call metadata, validated by the connection.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
}

/// Serde helpers for `Arc<str>` serialization
pub fn serialize_arc_str<S>(arc: &Arc<str>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
	S: serde::Serializer,
{
	serializer.serialize_str(arc)
}

pub fn deserialize_arc_str<'de, D>(deserializer: D) -> std::result::Result<Arc<str>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let s: String = serde::Deserialize::deserialize(deserializer)?;
	Ok(Arc::from(s.as_str()))
}

/// Reply to a [`Request`], success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Request ID this reply correlates to
	pub id: u64,
	/// Success result (mutually exclusive with error)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result (mutually exclusive with result)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorWrapper>,
}

impl Response {
	pub fn success(id: u64, result: Value) -> Self {
		let result = match result {
			Value::Null => None,
			other => Some(other),
		};
		Self {
			id,
			result,
			error: None,
		}
	}

	pub fn failure(id: u64, error: ErrorPayload) -> Self {
		Self {
			id,
			result: None,
			error: Some(ErrorWrapper { error }),
		}
	}

	pub fn is_error(&self) -> bool {
		self.error.is_some()
	}
}

/// Wrapper for protocol error payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorWrapper {
	pub error: ErrorPayload,
}

/// Serialized error details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// Error message
	pub message: String,
	/// Error type name (e.g., "TargetClosedError", "ValidationError")
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Stack trace
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

/// Unsolicited server-to-client message attributed to one guid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Push {
	/// GUID of the object the message is attributed to
	#[serde(
		serialize_with = "serialize_arc_str",
		deserialize_with = "deserialize_arc_str"
	)]
	pub guid: Arc<str>,
	/// Event method name
	pub method: String,
	/// Event parameters as JSON object
	#[serde(default)]
	pub params: Value,
}

/// Params of a [`CREATE_METHOD`] push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateParams {
	/// Wire type tag of the new object.
	#[serde(rename = "type")]
	pub type_name: String,
	/// Snapshot of the object's public state at creation time.
	pub initializer: Value,
	/// GUID assigned to the new object.
	pub guid: String,
}

/// Why an object was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisposeReason {
	/// Collected because its GC bucket overflowed.
	Gc,
}

/// Params of a [`DISPOSE_METHOD`] push. Explicit disposal serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisposeParams {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<DisposeReason>,
}

/// Params of an [`ADOPT_METHOD`] push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdoptParams {
	pub guid: String,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn request_without_params_or_metadata() {
		let request: Request =
			serde_json::from_str(r#"{"id": 7, "guid": "Page@1", "method": "close"}"#).unwrap();
		assert_eq!(request.id, 7);
		assert_eq!(request.guid.as_deref(), Some("Page@1"));
		assert_eq!(request.params, Value::Null);
		assert!(request.metadata.is_none());
	}

	#[test]
	fn request_without_guid_still_parses() {
		let request: Request =
			serde_json::from_str(r#"{"id": 4294967296, "method": "greet"}"#).unwrap();
		assert_eq!(request.id, 4_294_967_296);
		assert!(request.guid.is_none());
	}

	#[test]
	fn success_reply_omits_empty_result() {
		let reply = serde_json::to_value(Response::success(3, Value::Null)).unwrap();
		assert_eq!(reply, json!({"id": 3}));

		let reply = serde_json::to_value(Response::success(4, json!({"ok": true}))).unwrap();
		assert_eq!(reply, json!({"id": 4, "result": {"ok": true}}));
	}

	#[test]
	fn failure_reply_shape() {
		let reply = Response::failure(
			9,
			ErrorPayload {
				message: "boom".to_string(),
				name: Some("Error".to_string()),
				stack: None,
			},
		);
		assert!(reply.is_error());
		assert_eq!(
			serde_json::to_value(reply).unwrap(),
			json!({"id": 9, "error": {"error": {"message": "boom", "name": "Error"}}})
		);
	}

	#[test]
	fn dispose_params_shapes() {
		assert_eq!(serde_json::to_value(DisposeParams::default()).unwrap(), json!({}));
		assert_eq!(
			serde_json::to_value(DisposeParams {
				reason: Some(DisposeReason::Gc)
			})
			.unwrap(),
			json!({"reason": "gc"})
		);
	}

	#[test]
	fn adopt_params_shape() {
		let params = AdoptParams {
			guid: "Handle@3".to_string(),
		};
		assert_eq!(serde_json::to_value(params).unwrap(), json!({"guid": "Handle@3"}));
	}

	#[test]
	fn create_params_use_type_key() {
		let params = CreateParams {
			type_name: "Frame".to_string(),
			initializer: json!({"url": "about:blank"}),
			guid: "Frame@2".to_string(),
		};
		assert_eq!(
			serde_json::to_value(params).unwrap(),
			json!({"type": "Frame", "initializer": {"url": "about:blank"}, "guid": "Frame@2"})
		);
	}
}
