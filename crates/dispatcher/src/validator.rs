//! Parameter validation boundary.
//!
//! The rule language proper belongs to the generated scheme. This module only
//! carries what the core needs from it:
//!
//! - the [`Scheme`] registry, keyed `Type + Capitalized(method) + Kind`;
//! - a handful of primitive validators to assemble entries from;
//! - the `{guid}` → [`Dispatcher`] resolution contract ([`resolve_guid`]),
//!   which the core owns.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::value::ChannelValue;

/// Validates a wire value at `path`, producing a resolved [`ChannelValue`].
pub type Validator =
	Arc<dyn Fn(&Value, &str, &ValidatorContext<'_>) -> Result<ChannelValue> + Send + Sync>;

/// Resolves `{guid}` wire references into live dispatchers.
pub trait ChannelResolver: Send + Sync {
	fn resolve_channel(&self, names: &ChannelNames, arg: &Value, path: &str) -> Result<Arc<Dispatcher>>;
}

/// Context handed to every validator call.
pub struct ValidatorContext<'a> {
	resolver: &'a dyn ChannelResolver,
}

impl<'a> ValidatorContext<'a> {
	pub fn new(resolver: &'a dyn ChannelResolver) -> Self {
		Self { resolver }
	}

	pub fn resolve_channel(&self, names: &ChannelNames, arg: &Value, path: &str) -> Result<Arc<Dispatcher>> {
		self.resolver.resolve_channel(names, arg, path)
	}
}

/// Dispatcher types accepted by a channel-typed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelNames {
	/// Wildcard `*`: any dispatcher type.
	Any,
	Only(Vec<String>),
}

impl ChannelNames {
	/// Builds from scheme names; a lone `"*"` means any type.
	pub fn from_names(names: &[&str]) -> Self {
		if names.contains(&"*") {
			ChannelNames::Any
		} else {
			ChannelNames::Only(names.iter().map(|n| n.to_string()).collect())
		}
	}

	pub fn accepts(&self, type_name: &str) -> bool {
		match self {
			ChannelNames::Any => true,
			ChannelNames::Only(names) => names.iter().any(|n| n == type_name),
		}
	}
}

impl std::fmt::Display for ChannelNames {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ChannelNames::Any => f.write_str("*"),
			ChannelNames::Only(names) => f.write_str(&names.join(",")),
		}
	}
}

/// Resolves a `{guid}` wire value through `lookup`.
///
/// Fails with a path-annotated validation error when the value is not a
/// `{guid}` object, no live dispatcher has that guid (never existed or
/// disposed), or the dispatcher's type is not in `names`.
pub fn resolve_guid(
	lookup: impl Fn(&str) -> Option<Arc<Dispatcher>>,
	names: &ChannelNames,
	arg: &Value,
	path: &str,
) -> Result<Arc<Dispatcher>> {
	let Some(guid) = arg.get("guid").and_then(Value::as_str) else {
		return Err(Error::validation(path, format!("expected guid for {names}")));
	};
	let Some(dispatcher) = lookup(guid) else {
		return Err(Error::validation(path, format!("no object with guid {guid}")));
	};
	if !names.accepts(dispatcher.type_name()) {
		return Err(Error::validation(
			path,
			format!(
				"object with guid {guid} has type {}, expected {names}",
				dispatcher.type_name()
			),
		));
	}
	Ok(dispatcher)
}

/// Registry of validators for one protocol.
#[derive(Clone, Default)]
pub struct Scheme {
	validators: HashMap<String, Validator>,
}

impl Scheme {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `validator` under its full scheme name.
	pub fn insert(&mut self, name: impl Into<String>, validator: Validator) {
		self.validators.insert(name.into(), validator);
	}

	/// Registers the params validator of `type_name.method`.
	pub fn params(mut self, type_name: &str, method: &str, validator: Validator) -> Self {
		self.insert(scheme_key(type_name, method, "Params"), validator);
		self
	}

	/// Finds the validator of `type_name.method` for `kind` ("Params", ...).
	pub fn find(&self, type_name: &str, method: &str, kind: &str) -> Result<&Validator> {
		self.validators
			.get(&scheme_key(type_name, method, kind))
			.ok_or_else(|| Error::validation("", format!("Unknown scheme for {type_name}.{method}")))
	}

	pub fn contains(&self, name: &str) -> bool {
		self.validators.contains_key(name)
	}
}

impl std::fmt::Debug for Scheme {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut names: Vec<_> = self.validators.keys().collect();
		names.sort();
		f.debug_set().entries(names).finish()
	}
}

/// `Page` + `goto` + `Params` → `PageGotoParams`.
pub fn scheme_key(type_name: &str, method: &str, kind: &str) -> String {
	let mut chars = method.chars();
	let capitalized: String = match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	};
	format!("{type_name}{capitalized}{kind}")
}

fn type_of(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "boolean",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

fn child_path(path: &str, key: &str) -> String {
	if path.is_empty() {
		key.to_string()
	} else {
		format!("{path}.{key}")
	}
}

/// Boxes a closure as a [`Validator`].
pub fn validator<F>(f: F) -> Validator
where
	F: Fn(&Value, &str, &ValidatorContext<'_>) -> Result<ChannelValue> + Send + Sync + 'static,
{
	Arc::new(f)
}

/// Accepts anything, unchanged.
pub fn t_any() -> Validator {
	validator(|arg, _, _| Ok(arg.clone().into()))
}

pub fn t_string() -> Validator {
	validator(|arg, path, _| match arg {
		Value::String(s) => Ok(ChannelValue::String(s.clone())),
		other => Err(Error::validation(path, format!("expected string, got {}", type_of(other)))),
	})
}

pub fn t_number() -> Validator {
	validator(|arg, path, _| match arg {
		Value::Number(n) => Ok(ChannelValue::Number(n.clone())),
		other => Err(Error::validation(path, format!("expected number, got {}", type_of(other)))),
	})
}

pub fn t_boolean() -> Validator {
	validator(|arg, path, _| match arg {
		Value::Bool(b) => Ok(ChannelValue::Bool(*b)),
		other => Err(Error::validation(path, format!("expected boolean, got {}", type_of(other)))),
	})
}

/// One of a fixed set of strings.
pub fn t_enum(values: &[&str]) -> Validator {
	let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
	validator(move |arg, path, _| match arg {
		Value::String(s) if values.contains(s) => Ok(ChannelValue::String(s.clone())),
		other => Err(Error::validation(
			path,
			format!("expected one of ({}), got {other}", values.join("|")),
		)),
	})
}

/// `null` or missing passes as [`ChannelValue::Null`]; anything else goes to `inner`.
pub fn t_optional(inner: Validator) -> Validator {
	validator(move |arg, path, context| match arg {
		Value::Null => Ok(ChannelValue::Null),
		other => inner(other, path, context),
	})
}

pub fn t_array(item: Validator) -> Validator {
	validator(move |arg, path, context| match arg {
		Value::Array(items) => items
			.iter()
			.enumerate()
			.map(|(i, v)| item(v, &format!("{path}[{i}]"), context))
			.collect::<Result<Vec<_>>>()
			.map(ChannelValue::Array),
		other => Err(Error::validation(path, format!("expected array, got {}", type_of(other)))),
	})
}

/// Object with the listed fields. Unlisted fields are dropped; a missing
/// params object counts as `{}`.
pub fn t_object(fields: Vec<(&'static str, Validator)>) -> Validator {
	validator(move |arg, path, context| {
		let empty = serde_json::Map::new();
		let map = match arg {
			Value::Object(map) => map,
			Value::Null => &empty,
			other => {
				return Err(Error::validation(
					path,
					format!("expected object, got {}", type_of(other)),
				));
			}
		};

		let mut out = IndexMap::with_capacity(fields.len());
		for (key, validator) in &fields {
			let value = map.get(*key).unwrap_or(&Value::Null);
			let validated = validator(value, &child_path(path, key), context)?;
			if !validated.is_null() {
				out.insert(key.to_string(), validated);
			}
		}
		Ok(ChannelValue::Object(out))
	})
}

/// Reference to a live dispatcher of one of `names` (`"*"` for any).
pub fn t_channel(names: &[&str]) -> Validator {
	let names = ChannelNames::from_names(names);
	validator(move |arg, path, context| {
		context
			.resolve_channel(&names, arg, path)
			.map(ChannelValue::Dispatcher)
	})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	struct NoObjects;

	impl ChannelResolver for NoObjects {
		fn resolve_channel(&self, names: &ChannelNames, arg: &Value, path: &str) -> Result<Arc<Dispatcher>> {
			resolve_guid(|_| None, names, arg, path)
		}
	}

	fn validate(validator: &Validator, arg: Value) -> Result<ChannelValue> {
		let context = ValidatorContext::new(&NoObjects);
		validator(&arg, "", &context)
	}

	#[test]
	fn scheme_key_capitalizes_method() {
		assert_eq!(scheme_key("Page", "goto", "Params"), "PageGotoParams");
		assert_eq!(scheme_key("Root", "initialize", "Params"), "RootInitializeParams");
		assert_eq!(scheme_key("Page", "", "Params"), "PageParams");
	}

	#[test]
	fn unknown_scheme_is_validation_error() {
		let scheme = Scheme::new().params("Page", "goto", t_any());
		assert!(scheme.find("Page", "goto", "Params").is_ok());
		let Err(err) = scheme.find("Page", "reload", "Params") else {
			panic!("Expected no scheme for Page.reload");
		};
		assert!(err.is_validation());
		assert_eq!(err.to_string(), "Unknown scheme for Page.reload");
	}

	#[test]
	fn object_fields_and_paths() {
		let validator = t_object(vec![
			("url", t_string()),
			("timeout", t_optional(t_number())),
			("options", t_optional(t_object(vec![("force", t_boolean())]))),
		]);

		let value = validate(&validator, json!({"url": "https://a.test", "extra": 1})).unwrap();
		assert_eq!(value.get("url").and_then(ChannelValue::as_str), Some("https://a.test"));
		assert!(value.get("timeout").is_none());
		assert!(value.get("extra").is_none());

		let err = validate(&validator, json!({"url": "x", "options": {"force": "yes"}})).unwrap_err();
		assert_eq!(err.to_string(), "options.force: expected boolean, got string");
		match err {
			Error::Validation { path, .. } => assert_eq!(path, "options.force"),
			other => panic!("Expected validation error, got {other:?}"),
		}
	}

	#[test]
	fn missing_params_are_an_empty_object() {
		let validator = t_object(vec![("timeout", t_optional(t_number()))]);
		assert_eq!(
			validate(&validator, Value::Null).unwrap(),
			ChannelValue::Object(IndexMap::new())
		);
	}

	#[test]
	fn array_paths_are_indexed() {
		let validator = t_object(vec![("values", t_array(t_number()))]);
		let err = validate(&validator, json!({"values": [1, 2, "three"]})).unwrap_err();
		assert_eq!(err.to_string(), "values[2]: expected number, got string");
	}

	#[test]
	fn enum_rejects_unknown_values() {
		let validator = t_enum(&["load", "domcontentloaded"]);
		assert!(validate(&validator, json!("load")).is_ok());
		assert!(validate(&validator, json!("networkidle")).is_err());
	}

	#[test]
	fn channel_requires_guid_object() {
		let validator = t_object(vec![("frame", t_channel(&["Frame"]))]);

		let err = validate(&validator, json!({"frame": "Frame@1"})).unwrap_err();
		assert_eq!(err.to_string(), "frame: expected guid for Frame");

		let err = validate(&validator, json!({"frame": {"guid": "Frame@1"}})).unwrap_err();
		assert_eq!(err.to_string(), "frame: no object with guid Frame@1");
	}

	#[test]
	fn channel_names_wildcard() {
		assert_eq!(ChannelNames::from_names(&["*"]), ChannelNames::Any);
		assert!(ChannelNames::Any.accepts("Anything"));

		let names = ChannelNames::from_names(&["Frame", "Page"]);
		assert!(names.accepts("Page"));
		assert!(!names.accepts("Worker"));
		assert_eq!(names.to_string(), "Frame,Page");
	}
}
