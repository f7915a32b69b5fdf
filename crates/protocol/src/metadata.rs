//! Call metadata attached to inbound requests.

use serde::{Deserialize, Serialize};

/// Metadata a client attaches to a protocol request.
///
/// Every field is optional on the wire. A request without a `metadata` object
/// is treated as [`Metadata::default`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
	/// Unix timestamp in milliseconds when the client issued the call.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub wall_time: Option<i64>,
	/// Whether this is an internal call (not user-facing API).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub internal: Option<bool>,
	/// Source location where the API was called.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub location: Option<Location>,
	/// Optional title for the operation.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	/// Test-runner step this call belongs to.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub step_id: Option<String>,
	/// User-facing API name, e.g. `page.click`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub api_name: Option<String>,
}

/// Source code location for a protocol call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
	/// Source file path
	pub file: String,
	/// Line number (1-indexed)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub line: Option<i32>,
	/// Column number (1-indexed)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub column: Option<i32>,
}

impl Metadata {
	/// Returns true when the call was flagged as internal.
	pub fn is_internal(&self) -> bool {
		self.internal.unwrap_or(false)
	}
}
