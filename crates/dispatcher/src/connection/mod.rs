//! DispatcherConnection - routing point between the wire and the dispatcher tree.
//!
//! # Message Flow
//!
//! 1. The transport delivers a request `{id, guid, method, params, metadata}`
//! 2. The connection looks the target up in its flat guid index
//! 3. Params are validated against the scheme entry `Type + Method + "Params"`;
//!    `{guid}` references resolve to live dispatchers
//! 4. The method handler runs as its own task, so requests overlap
//! 5. Live dispatchers in the result are substituted with `{guid}` and the
//!    reply `{id, result}` or `{id, error}` is queued for the writer task
//!
//! Every request that carries an id gets exactly one reply, including
//! requests that fail to parse and requests still running when the peer
//! goes away. Replies may complete out of order; clients correlate by id.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use pw_protocol::{DEBUG_SCOPE_STATE_METHOD, Metadata, Push, Request, Response};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::ConnectionConfig;
use crate::dispatcher::{Call, Dispatcher, DomainObject, HandlerFn, MethodTable};
use crate::error::{Error, Result};
use crate::transport::TransportParts;
use crate::validator::{ChannelNames, ChannelResolver, Scheme, ValidatorContext, resolve_guid};
use crate::value::ChannelValue;

mod registry;

#[cfg(test)]
mod tests;

use registry::{ObjectKey, Registry};

/// A request that passed routing and validation and is ready to run.
struct PendingCall {
	id: u64,
	method: String,
	handler: HandlerFn,
	call: Call,
}

/// Outcome of the synchronous part of [`DispatcherConnection::dispatch`].
enum Routed {
	Reply(Response),
	Call(PendingCall),
}

/// One logical client connection: the dispatcher tree plus its router.
pub struct DispatcherConnection {
	config: ConnectionConfig,
	scheme: Scheme,
	root: Arc<Dispatcher>,
	registry: Mutex<Registry>,
	last_guid: AtomicU64,
	closed: AtomicBool,
	/// Request ids of running handlers, keyed by call ticket.
	in_flight: Mutex<IndexMap<u64, u64>>,
	last_ticket: AtomicU64,
	/// Outbound messages for the writer task; taken on close.
	outbound_tx: Mutex<Option<mpsc::UnboundedSender<Value>>>,
	/// Receiver for outbound messages (taken by run() or take_outbound())
	outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
}

impl DispatcherConnection {
	/// Creates a connection whose root dispatcher answers `root_methods`.
	pub fn new(config: ConnectionConfig, scheme: Scheme, root_methods: MethodTable) -> Arc<Self> {
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		Arc::new_cyclic(|weak| {
			let root = Arc::new(Dispatcher::root(weak.clone(), root_methods));
			let mut registry = Registry::default();
			if let Err(e) = registry.insert(&root) {
				tracing::error!(error = %e, "Root dispatcher failed to register");
			}
			Self {
				config,
				scheme,
				root,
				registry: Mutex::new(registry),
				last_guid: AtomicU64::new(0),
				closed: AtomicBool::new(false),
				in_flight: Mutex::new(IndexMap::new()),
				last_ticket: AtomicU64::new(0),
				outbound_tx: Mutex::new(Some(outbound_tx)),
				outbound_rx: Mutex::new(Some(outbound_rx)),
			}
		})
	}

	pub fn config(&self) -> &ConnectionConfig {
		&self.config
	}

	pub fn scheme(&self) -> &Scheme {
		&self.scheme
	}

	/// Returns the root dispatcher (guid `""`).
	pub fn root(&self) -> &Arc<Dispatcher> {
		&self.root
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Looks up a live dispatcher by guid.
	pub fn dispatcher(&self, guid: &str) -> Option<Arc<Dispatcher>> {
		self.registry.lock().get(guid)
	}

	/// Number of live dispatchers, root included.
	pub fn dispatcher_count(&self) -> usize {
		self.registry.lock().len()
	}

	/// Number of live dispatchers in a GC bucket.
	pub fn bucket_len(&self, bucket: &str) -> usize {
		self.registry.lock().bucket_len(bucket)
	}

	/// Returns the live dispatcher wrapping `object`, if any.
	pub fn existing_dispatcher<T: DomainObject>(&self, object: &Arc<T>) -> Option<Arc<Dispatcher>> {
		self.registry.lock().by_object(ObjectKey::of(object))
	}

	/// Takes the outbound message stream, for callers driving the
	/// connection without [`run`](Self::run).
	pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Value>> {
		self.outbound_rx.lock().take()
	}

	pub(crate) fn next_guid(&self, type_name: &str) -> Arc<str> {
		let id = self.last_guid.fetch_add(1, Ordering::SeqCst) + 1;
		Arc::from(format!("{type_name}@{id}"))
	}

	pub(crate) fn register(&self, dispatcher: &Arc<Dispatcher>) -> Result<()> {
		if self.is_closed() {
			return Err(Error::TransportClosed);
		}
		self.registry.lock().insert(dispatcher)
	}

	pub(crate) fn unregister(&self, dispatcher: &Dispatcher) {
		self.registry.lock().remove(dispatcher);
	}

	/// Collects the oldest tenth of `bucket` once it exceeds its limit.
	pub(crate) fn maybe_dispose_stale_dispatchers(&self, bucket: &str) {
		let limit = self.config.bucket_limit(bucket);
		let stale = {
			let registry = self.registry.lock();
			if registry.bucket_len(bucket) <= limit {
				return;
			}
			registry.oldest_in_bucket(bucket, limit / 10)
		};

		tracing::debug!(bucket, count = stale.len(), "Collecting stale dispatchers");
		for dispatcher in stale {
			if dispatcher.is_disposed() {
				continue;
			}
			if let Err(e) = dispatcher.collect() {
				tracing::warn!(guid = dispatcher.guid(), error = %e, "Failed to collect dispatcher");
			}
		}
	}

	/// Sends a push to the client, substituting dispatcher references.
	///
	/// With `disallow_dispatchers`, a reference anywhere in `params` is a
	/// contract violation and nothing is sent.
	pub fn send_message_to_client(
		&self,
		guid: &str,
		method: &str,
		params: ChannelValue,
		disallow_dispatchers: bool,
	) -> Result<()> {
		let params = params.to_wire(disallow_dispatchers)?;
		self.send_push(guid, method, params)
	}

	pub(crate) fn send_push(&self, guid: &str, method: &str, params: Value) -> Result<()> {
		let params = match params {
			Value::Null => Value::Object(Default::default()),
			other => other,
		};
		let push = Push {
			guid: Arc::from(guid),
			method: method.to_string(),
			params,
		};
		self.send_outbound(serde_json::to_value(&push)?)
	}

	fn send_response(&self, response: Response) {
		let id = response.id;
		let sent = serde_json::to_value(&response)
			.map_err(Error::from)
			.and_then(|value| self.send_outbound(value));
		if let Err(e) = sent {
			tracing::debug!(id, error = %e, "Reply not delivered");
		}
	}

	fn send_outbound(&self, message: Value) -> Result<()> {
		let guard = self.outbound_tx.lock();
		let tx = guard.as_ref().ok_or(Error::TransportClosed)?;
		tx.send(message).map_err(|_| Error::TransportClosed)
	}

	/// Number of requests whose handler has not finished yet.
	pub fn in_flight_len(&self) -> usize {
		self.in_flight.lock().len()
	}

	/// Handles one request and queues exactly one reply for it.
	pub async fn dispatch(self: &Arc<Self>, request: Request) {
		match self.route(request) {
			Routed::Reply(response) => self.send_response(response),
			Routed::Call(call) => {
				let ticket = self.track(call.id);
				let response = self.complete(call).await;
				self.finish(ticket, response);
			}
		}
	}

	fn track(&self, id: u64) -> u64 {
		let ticket = self.last_ticket.fetch_add(1, Ordering::SeqCst);
		self.in_flight.lock().insert(ticket, id);
		ticket
	}

	/// Sends the reply of a tracked call, unless close already answered it.
	fn finish(&self, ticket: u64, response: Response) {
		let mut in_flight = self.in_flight.lock();
		if in_flight.shift_remove(&ticket).is_some() {
			self.send_response(response);
		} else {
			tracing::debug!(id = response.id, "Dropping late reply of a call failed on close");
		}
	}

	/// Synchronous part of dispatch: lookup, validation, method resolution.
	fn route(&self, request: Request) -> Routed {
		let Request {
			id,
			guid,
			method,
			params,
			metadata,
		} = request;

		if method == DEBUG_SCOPE_STATE_METHOD {
			return Routed::Reply(Response::success(id, self.root.debug_scope_state()));
		}

		let target = guid.as_deref().and_then(|guid| self.dispatcher(guid));
		let Some(dispatcher) = target else {
			tracing::debug!(id, guid = ?guid, method = %method, "Request for unknown or disposed object");
			return Routed::Reply(Response::failure(id, Error::TargetClosed.to_payload()));
		};

		match self.validate(&dispatcher, &method, params, metadata) {
			Ok((handler, params, metadata)) => Routed::Call(PendingCall {
				id,
				method,
				handler,
				call: Call {
					dispatcher,
					params,
					metadata,
				},
			}),
			Err(e) => {
				tracing::debug!(id, guid = dispatcher.guid(), method = %method, error = %e, "Request rejected");
				Routed::Reply(Response::failure(id, e.to_payload()))
			}
		}
	}

	fn validate(
		&self,
		dispatcher: &Arc<Dispatcher>,
		method: &str,
		params: Value,
		metadata: Option<Value>,
	) -> Result<(HandlerFn, ChannelValue, Metadata)> {
		let validator = self.scheme.find(dispatcher.type_name(), method, "Params")?;
		let context = ValidatorContext::new(self);
		let params = validator(&params, "", &context)?;

		let metadata = match metadata {
			None | Some(Value::Null) => Metadata::default(),
			Some(raw) => serde_json::from_value(raw)
				.map_err(|e| Error::validation("metadata", e.to_string()))?,
		};

		let handler = dispatcher
			.methods()
			.get(method)
			.cloned()
			.ok_or_else(|| Error::MethodNotFound {
				type_name: dispatcher.type_name().to_string(),
				method: method.to_string(),
			})?;

		Ok((handler, params, metadata))
	}

	/// Runs a routed call to completion and builds its reply.
	async fn complete(&self, pending: PendingCall) -> Response {
		let PendingCall {
			id,
			method,
			handler,
			call,
		} = pending;

		if call.dispatcher.is_disposed() {
			return Response::failure(id, Error::TargetClosed.to_payload());
		}

		let guid = call.dispatcher.guid().to_string();
		let type_name = call.dispatcher.type_name().to_string();
		let outcome = AssertUnwindSafe(async move { handler(call).await })
			.catch_unwind()
			.await;

		let result = match outcome {
			Ok(result) => result.and_then(|value| value.to_wire(false)),
			Err(panic) => {
				let detail = panic
					.downcast_ref::<&str>()
					.map(|s| s.to_string())
					.or_else(|| panic.downcast_ref::<String>().cloned())
					.unwrap_or_else(|| "unknown panic".to_string());
				tracing::error!(id, guid = %guid, method = %method, detail = %detail, "Method handler panicked");
				Err(Error::handler(format!(
					"{type_name}.{method} handler panicked: {detail}"
				)))
			}
		};

		match result {
			Ok(value) => Response::success(id, value),
			Err(e) => {
				tracing::debug!(id, guid = %guid, method = %method, error = %e, "Method failed");
				Response::failure(id, e.to_payload())
			}
		}
	}

	/// Serves the connection over `parts` until the peer closes it.
	///
	/// Requests are routed in arrival order; handlers run as separate tasks.
	/// On return the connection is closed and every dispatcher is disposed.
	pub async fn run(self: &Arc<Self>, parts: TransportParts) -> Result<()> {
		let TransportParts {
			mut sender,
			receiver,
			mut message_rx,
		} = parts;

		let mut outbound_rx = self
			.take_outbound()
			.ok_or_else(|| Error::contract("run() can only be called once"))?;

		let reader_handle = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::error!("Transport read error: {}", e);
			}
		});

		let writer_handle = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				let payload = match serde_json::to_string(&message) {
					Ok(payload) => payload,
					Err(e) => {
						tracing::error!("Failed to serialize outbound message: {}", e);
						continue;
					}
				};
				if let Err(e) = sender.send(payload).await {
					tracing::error!("Transport write error: {}", e);
					break;
				}
			}
			if let Err(e) = sender.close().await {
				tracing::debug!("Transport close error: {}", e);
			}
		});

		while let Some(payload) = message_rx.recv().await {
			let request = match decode_request(&payload) {
				Ok(request) => request,
				Err(reply) => {
					if let Some(reply) = reply {
						self.send_response(reply);
					}
					continue;
				}
			};
			tracing::debug!(
				id = request.id,
				guid = ?request.guid,
				method = %request.method,
				"Dispatching request"
			);

			match self.route(request) {
				Routed::Reply(response) => self.send_response(response),
				Routed::Call(call) => {
					let ticket = self.track(call.id);
					let connection = Arc::clone(self);
					tokio::spawn(async move {
						let response = connection.complete(call).await;
						connection.finish(ticket, response);
					});
				}
			}
		}

		self.on_close();
		let _ = reader_handle.await;
		let _ = writer_handle.await;
		Ok(())
	}

	/// Tears the connection down after the transport closed.
	///
	/// Calls still running are answered with `TargetClosedError` while the
	/// write side may still be open; their own results are dropped when they
	/// land. Every dispatcher is disposed without pushes and later requests
	/// fail with `TargetClosedError`.
	pub fn on_close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		let in_flight = std::mem::take(&mut *self.in_flight.lock());
		tracing::debug!(
			dispatchers = self.dispatcher_count(),
			in_flight = in_flight.len(),
			"Connection closed"
		);
		for id in in_flight.into_values() {
			self.send_response(Response::failure(id, Error::TargetClosed.to_payload()));
		}
		if let Err(e) = self.root.dispose_silently() {
			tracing::warn!(error = %e, "Failed to dispose dispatcher tree on close");
		}
		self.outbound_tx.lock().take();
	}
}

/// Parses one inbound payload.
///
/// A payload that is not a valid request but carries a numeric `id` is
/// answered with a `ValidationError`. Without an id there is nobody to
/// answer, so it is only logged.
fn decode_request(payload: &str) -> std::result::Result<Request, Option<Response>> {
	let value: Value = match serde_json::from_str(payload) {
		Ok(value) => value,
		Err(e) => {
			tracing::warn!("Failed to parse request: {}", e);
			return Err(None);
		}
	};
	let id = value.get("id").and_then(Value::as_u64);
	serde_json::from_value::<Request>(value).map_err(|e| {
		tracing::warn!(?id, "Malformed request: {}", e);
		id.map(|id| Response::failure(id, Error::validation("", e.to_string()).to_payload()))
	})
}

/// The `{guid}` → dispatcher half of the validator contract.
impl ChannelResolver for DispatcherConnection {
	fn resolve_channel(&self, names: &ChannelNames, arg: &Value, path: &str) -> Result<Arc<Dispatcher>> {
		resolve_guid(|guid| self.dispatcher(guid), names, arg, path)
	}
}
