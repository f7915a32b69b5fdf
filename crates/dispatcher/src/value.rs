//! Payload values that may hold live dispatcher references.
//!
//! Inbound params are resolved into [`ChannelValue`]s, with `{guid}` objects
//! replaced by the [`Dispatcher`] they name. Outbound results and pushes go
//! the other way through [`ChannelValue::to_wire`].

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};

/// JSON-like value that can embed live [`Dispatcher`] references.
#[derive(Debug, Clone, Default)]
pub enum ChannelValue {
	#[default]
	Null,
	Bool(bool),
	Number(Number),
	String(String),
	Array(Vec<ChannelValue>),
	Object(IndexMap<String, ChannelValue>),
	Dispatcher(Arc<Dispatcher>),
}

impl ChannelValue {
	/// Builds an object from key/value pairs.
	pub fn object<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
	where
		K: Into<String>,
		V: Into<ChannelValue>,
	{
		ChannelValue::Object(
			entries
				.into_iter()
				.map(|(k, v)| (k.into(), v.into()))
				.collect(),
		)
	}

	/// Returns the field `key` of an object value.
	pub fn get(&self, key: &str) -> Option<&ChannelValue> {
		match self {
			ChannelValue::Object(map) => map.get(key),
			_ => None,
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, ChannelValue::Null)
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			ChannelValue::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			ChannelValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			ChannelValue::Number(n) => n.as_f64(),
			_ => None,
		}
	}

	pub fn as_u64(&self) -> Option<u64> {
		match self {
			ChannelValue::Number(n) => n.as_u64(),
			_ => None,
		}
	}

	pub fn as_array(&self) -> Option<&[ChannelValue]> {
		match self {
			ChannelValue::Array(items) => Some(items),
			_ => None,
		}
	}

	pub fn as_dispatcher(&self) -> Option<&Arc<Dispatcher>> {
		match self {
			ChannelValue::Dispatcher(d) => Some(d),
			_ => None,
		}
	}

	/// Returns the string field `key`, or a validation error naming it.
	pub fn require_str(&self, key: &str) -> Result<&str> {
		self.get(key)
			.and_then(ChannelValue::as_str)
			.ok_or_else(|| Error::validation(key, "expected string"))
	}

	/// Returns the dispatcher field `key`, or a validation error naming it.
	pub fn require_dispatcher(&self, key: &str) -> Result<&Arc<Dispatcher>> {
		self.get(key)
			.and_then(ChannelValue::as_dispatcher)
			.ok_or_else(|| Error::validation(key, "expected object reference"))
	}

	/// Converts to wire JSON, replacing every dispatcher with `{"guid": ...}`.
	///
	/// With `disallow_dispatchers` set, meeting a dispatcher is a contract
	/// violation instead.
	pub fn to_wire(&self, disallow_dispatchers: bool) -> Result<Value> {
		self.to_wire_at("", disallow_dispatchers)
	}

	fn to_wire_at(&self, path: &str, disallow_dispatchers: bool) -> Result<Value> {
		Ok(match self {
			ChannelValue::Null => Value::Null,
			ChannelValue::Bool(b) => Value::Bool(*b),
			ChannelValue::Number(n) => Value::Number(n.clone()),
			ChannelValue::String(s) => Value::String(s.clone()),
			ChannelValue::Array(items) => Value::Array(
				items
					.iter()
					.enumerate()
					.map(|(i, item)| item.to_wire_at(&format!("{path}[{i}]"), disallow_dispatchers))
					.collect::<Result<Vec<_>>>()?,
			),
			ChannelValue::Object(map) => {
				let mut out = Map::with_capacity(map.len());
				for (key, item) in map {
					let item_path = if path.is_empty() {
						key.clone()
					} else {
						format!("{path}.{key}")
					};
					out.insert(key.clone(), item.to_wire_at(&item_path, disallow_dispatchers)?);
				}
				Value::Object(out)
			}
			ChannelValue::Dispatcher(dispatcher) => {
				if disallow_dispatchers {
					return Err(Error::contract(format!(
						"{}: dispatcher {} cannot be sent where only plain data is allowed",
						if path.is_empty() { "<root>" } else { path },
						dispatcher.guid()
					)));
				}
				serde_json::json!({ "guid": dispatcher.guid() })
			}
		})
	}
}

impl PartialEq for ChannelValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(ChannelValue::Null, ChannelValue::Null) => true,
			(ChannelValue::Bool(a), ChannelValue::Bool(b)) => a == b,
			(ChannelValue::Number(a), ChannelValue::Number(b)) => a == b,
			(ChannelValue::String(a), ChannelValue::String(b)) => a == b,
			(ChannelValue::Array(a), ChannelValue::Array(b)) => a == b,
			(ChannelValue::Object(a), ChannelValue::Object(b)) => a == b,
			(ChannelValue::Dispatcher(a), ChannelValue::Dispatcher(b)) => Arc::ptr_eq(a, b),
			_ => false,
		}
	}
}

/// Plain conversion; `{guid}` objects stay objects. Resolution happens in the
/// validator.
impl From<Value> for ChannelValue {
	fn from(value: Value) -> Self {
		match value {
			Value::Null => ChannelValue::Null,
			Value::Bool(b) => ChannelValue::Bool(b),
			Value::Number(n) => ChannelValue::Number(n),
			Value::String(s) => ChannelValue::String(s),
			Value::Array(items) => ChannelValue::Array(items.into_iter().map(Into::into).collect()),
			Value::Object(map) => {
				ChannelValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
			}
		}
	}
}

impl From<Arc<Dispatcher>> for ChannelValue {
	fn from(dispatcher: Arc<Dispatcher>) -> Self {
		ChannelValue::Dispatcher(dispatcher)
	}
}

impl From<&Arc<Dispatcher>> for ChannelValue {
	fn from(dispatcher: &Arc<Dispatcher>) -> Self {
		ChannelValue::Dispatcher(Arc::clone(dispatcher))
	}
}

impl From<&str> for ChannelValue {
	fn from(s: &str) -> Self {
		ChannelValue::String(s.to_string())
	}
}

impl From<String> for ChannelValue {
	fn from(s: String) -> Self {
		ChannelValue::String(s)
	}
}

impl From<bool> for ChannelValue {
	fn from(b: bool) -> Self {
		ChannelValue::Bool(b)
	}
}

impl From<i64> for ChannelValue {
	fn from(n: i64) -> Self {
		ChannelValue::Number(n.into())
	}
}

impl From<i32> for ChannelValue {
	fn from(n: i32) -> Self {
		ChannelValue::Number(n.into())
	}
}

impl From<u64> for ChannelValue {
	fn from(n: u64) -> Self {
		ChannelValue::Number(n.into())
	}
}

impl From<f64> for ChannelValue {
	fn from(n: f64) -> Self {
		Number::from_f64(n).map_or(ChannelValue::Null, ChannelValue::Number)
	}
}

impl<T: Into<ChannelValue>> From<Vec<T>> for ChannelValue {
	fn from(items: Vec<T>) -> Self {
		ChannelValue::Array(items.into_iter().map(Into::into).collect())
	}
}

impl<T: Into<ChannelValue>> From<Option<T>> for ChannelValue {
	fn from(value: Option<T>) -> Self {
		value.map(Into::into).unwrap_or_default()
	}
}
