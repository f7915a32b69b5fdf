//! Object graph served by the binary.
//!
//! ```text
//! Root ("")
//! └── Session            scope, one per initialize
//!     └── Context        scope
//!         └── Handle     leaf, "Handle" GC bucket
//! ```
//!
//! Small enough to drive from a test client, but it exercises every
//! lifecycle path: create, adopt between contexts, explicit dispose,
//! bucket collection and events.

use std::sync::Arc;

use pw_dispatcher::validator::{t_any, t_channel, t_object, t_optional, t_string};
use pw_dispatcher::{
	Call, ChannelValue, Dispatcher, DispatcherInit, MethodTable, Result, Scheme,
};

/// Protocol version announced in the session initializer.
pub const PROTOCOL_VERSION: &str = "1.0";

pub struct Session {
	sdk_language: String,
}

pub struct Context {
	name: String,
}

pub struct Handle {
	label: String,
}

/// Params validators for every method below.
pub fn scheme() -> Scheme {
	Scheme::new()
		.params(
			"Root",
			"initialize",
			t_object(vec![("sdkLanguage", t_optional(t_string()))]),
		)
		.params("Session", "echo", t_object(vec![("value", t_any())]))
		.params("Session", "newContext", t_object(vec![("name", t_optional(t_string()))]))
		.params("Session", "close", t_object(vec![]))
		.params("Context", "createHandle", t_object(vec![("label", t_string())]))
		.params(
			"Context",
			"adoptHandle",
			t_object(vec![("handle", t_channel(&["Handle"]))]),
		)
		.params("Context", "close", t_object(vec![]))
		.params("Handle", "label", t_object(vec![]))
		.params("Handle", "dispose", t_object(vec![]))
}

pub fn root_methods() -> MethodTable {
	MethodTable::new().handler("initialize", initialize)
}

async fn initialize(call: Call) -> Result<ChannelValue> {
	let sdk_language = call
		.params
		.get("sdkLanguage")
		.and_then(ChannelValue::as_str)
		.unwrap_or("rust")
		.to_string();

	let session = Dispatcher::new(
		&call.dispatcher,
		Arc::new(Session {
			sdk_language: sdk_language.clone(),
		}),
		DispatcherInit::new("Session", session_methods())
			.initializer(ChannelValue::object([
				("version", PROTOCOL_VERSION),
				("sdkLanguage", sdk_language.as_str()),
			]))
			.scope(),
	)?;
	tracing::info!(guid = session.guid(), sdk_language = %sdk_language, "Session initialized");
	Ok(ChannelValue::object([("session", session)]))
}

fn session_methods() -> MethodTable {
	MethodTable::new()
		.handler("echo", |call| async move {
			Ok(call.params.get("value").cloned().unwrap_or_default())
		})
		.method::<Session, _, _>("newContext", |session, call| async move {
			let name = call
				.params
				.get("name")
				.and_then(ChannelValue::as_str)
				.map(str::to_string)
				.unwrap_or_else(|| format!("{}-context", session.sdk_language));

			let context = Dispatcher::new(
				&call.dispatcher,
				Arc::new(Context { name: name.clone() }),
				DispatcherInit::new("Context", context_methods())
					.initializer(ChannelValue::object([("name", name)]))
					.scope(),
			)?;
			call.dispatcher
				.push_event("context", ChannelValue::object([("context", &context)]))?;
			Ok(ChannelValue::object([("context", context)]))
		})
		.handler("close", dispose)
}

fn context_methods() -> MethodTable {
	MethodTable::new()
		.method::<Context, _, _>("createHandle", |context, call| async move {
			let label = call.params.require_str("label")?.to_string();
			tracing::debug!(context = %context.name, label = %label, "Creating handle");

			let handle = Dispatcher::new(
				&call.dispatcher,
				Arc::new(Handle {
					label: label.clone(),
				}),
				DispatcherInit::new("Handle", handle_methods()).initializer(ChannelValue::object([
					("label", ChannelValue::from(label)),
					("context", ChannelValue::from(&call.dispatcher)),
				])),
			)?;
			Ok(ChannelValue::object([("handle", handle)]))
		})
		.handler("adoptHandle", |call| async move {
			let handle = call.params.require_dispatcher("handle")?;
			call.dispatcher.adopt(handle)?;
			Ok(ChannelValue::Null)
		})
		.handler("close", dispose)
}

fn handle_methods() -> MethodTable {
	MethodTable::new()
		.method::<Handle, _, _>("label", |handle, _call| async move {
			Ok(ChannelValue::object([("label", handle.label.as_str())]))
		})
		.handler("dispose", dispose)
}

async fn dispose(call: Call) -> Result<ChannelValue> {
	call.dispatcher.dispose()?;
	Ok(ChannelValue::Null)
}
