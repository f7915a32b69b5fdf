//! Per-type method tables: wire method name to async handler.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use pw_protocol::Metadata;

use super::{Dispatcher, DomainObject};
use crate::error::{Error, Result};
use crate::value::ChannelValue;

/// Boxed handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<ChannelValue>> + Send>>;

/// Handler function: [`Call`] → async `Result<ChannelValue>`.
pub type HandlerFn = Arc<dyn Fn(Call) -> HandlerFuture + Send + Sync>;

/// One validated inbound call, as seen by a handler.
pub struct Call {
	/// Target dispatcher.
	pub dispatcher: Arc<Dispatcher>,
	/// Validated params with object references resolved.
	pub params: ChannelValue,
	/// Validated call metadata.
	pub metadata: Metadata,
}

/// Name → handler table for one dispatcher type.
///
/// Built once per type and shared (cheaply cloned) by every dispatcher of
/// that type.
#[derive(Clone, Default)]
pub struct MethodTable {
	handlers: Arc<HashMap<&'static str, HandlerFn>>,
}

impl MethodTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers an untyped handler receiving the whole [`Call`].
	pub fn handler<F, Fut>(mut self, name: &'static str, handler: F) -> Self
	where
		F: Fn(Call) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<ChannelValue>> + Send + 'static,
	{
		let handler: HandlerFn = Arc::new(move |call| -> HandlerFuture { Box::pin(handler(call)) });
		Arc::make_mut(&mut self.handlers).insert(name, handler);
		self
	}

	/// Registers a handler that receives the wrapped object as `Arc<T>`.
	///
	/// Calling it on a dispatcher wrapping something other than `T` fails with
	/// a contract violation.
	pub fn method<T, F, Fut>(self, name: &'static str, handler: F) -> Self
	where
		T: DomainObject,
		F: Fn(Arc<T>, Call) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<ChannelValue>> + Send + 'static,
	{
		let handler = Arc::new(handler);
		self.handler(name, move |call: Call| {
			let handler = Arc::clone(&handler);
			async move {
				let object = call.dispatcher.object::<T>().ok_or_else(|| {
					Error::contract(format!(
						"{} does not wrap a {}",
						call.dispatcher.guid(),
						std::any::type_name::<T>()
					))
				})?;
				handler(object, call).await
			}
		})
	}

	pub fn get(&self, name: &str) -> Option<&HandlerFn> {
		self.handlers.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.handlers.contains_key(name)
	}

	/// Registered method names, sorted.
	pub fn names(&self) -> Vec<&'static str> {
		let mut names: Vec<_> = self.handlers.keys().copied().collect();
		names.sort_unstable();
		names
	}
}

impl std::fmt::Debug for MethodTable {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_set().entries(self.names()).finish()
	}
}
