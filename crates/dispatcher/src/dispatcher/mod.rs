//! Dispatcher - server-side node for one client-addressable object.
//!
//! Dispatchers form a tree rooted at the connection's root dispatcher. Every
//! non-root node has exactly one parent, and that parent is always a *scope*:
//! a node that owns a disposable subtree and announces its own disposal.
//!
//! Lifecycle: constructing → live → disposed. Construction registers the node
//! in the connection's flat guid index, the object identity table and the
//! parent's children, then sends `__create__` to the parent's guid. Disposal
//! happens once; it removes the node from every index, disposes the children
//! first, and sends `__dispose__` only for scopes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use downcast_rs::{DowncastSync, impl_downcast};
use indexmap::IndexMap;
use parking_lot::Mutex;
use pw_protocol::{
	ADOPT_METHOD, AdoptParams, CREATE_METHOD, CreateParams, DISPOSE_METHOD, DisposeParams,
	DisposeReason,
};
use serde_json::{Value, json};

use crate::connection::DispatcherConnection;
use crate::error::{Error, Result};
use crate::value::ChannelValue;

mod methods;


pub use methods::{Call, HandlerFn, HandlerFuture, MethodTable};

/// Wire type tag of the root dispatcher.
pub const ROOT_TYPE: &str = "Root";

/// Any value that can be wrapped by a dispatcher.
pub trait DomainObject: DowncastSync {}

impl_downcast!(sync DomainObject);

impl<T: Send + Sync + 'static> DomainObject for T {}

/// Domain object of the root dispatcher.
#[derive(Debug, Default)]
pub struct RootObject;

type Children = IndexMap<Arc<str>, Arc<Dispatcher>>;

/// Construction parameters supplied by a concrete dispatcher type.
#[derive(Debug, Clone)]
pub struct DispatcherInit {
	type_name: String,
	methods: MethodTable,
	initializer: ChannelValue,
	scope: bool,
	guid: Option<String>,
	gc_bucket: Option<String>,
}

impl DispatcherInit {
	/// Starts an init for a non-scope dispatcher of `type_name` with an empty initializer.
	pub fn new(type_name: impl Into<String>, methods: MethodTable) -> Self {
		Self {
			type_name: type_name.into(),
			methods,
			initializer: ChannelValue::Object(IndexMap::new()),
			scope: false,
			guid: None,
			gc_bucket: None,
		}
	}

	/// Snapshot of the object's public state, sent verbatim in `__create__`.
	pub fn initializer(mut self, initializer: impl Into<ChannelValue>) -> Self {
		self.initializer = initializer.into();
		self
	}

	/// Marks the dispatcher as a scope that can own children.
	pub fn scope(mut self) -> Self {
		self.scope = true;
		self
	}

	/// Uses an explicit guid instead of `Type@<fresh id>`.
	pub fn guid(mut self, guid: impl Into<String>) -> Self {
		self.guid = Some(guid.into());
		self
	}

	/// Puts the dispatcher in a GC bucket other than its type.
	pub fn gc_bucket(mut self, bucket: impl Into<String>) -> Self {
		self.gc_bucket = Some(bucket.into());
		self
	}
}

/// One node of the dispatcher tree.
pub struct Dispatcher {
	guid: Arc<str>,
	type_name: Arc<str>,
	gc_bucket: Arc<str>,
	scope: bool,
	object: Arc<dyn DomainObject>,
	methods: MethodTable,
	connection: Weak<DispatcherConnection>,
	parent: Mutex<Option<Weak<Dispatcher>>>,
	children: Mutex<Children>,
	disposed: AtomicBool,
}

impl Dispatcher {
	/// Creates a dispatcher for `object` under the scope `parent`.
	///
	/// Fails with a contract violation if `parent` is not a live scope, the
	/// guid is already in use, the object already has a dispatcher, or a
	/// scope's initializer contains an object reference.
	pub fn new<T: DomainObject>(
		parent: &Arc<Dispatcher>,
		object: Arc<T>,
		init: DispatcherInit,
	) -> Result<Arc<Dispatcher>> {
		let connection = parent.connection()?;
		if !parent.scope {
			return Err(Error::contract(format!(
				"{} is not a scope and cannot own {}",
				parent.guid, init.type_name
			)));
		}
		if parent.is_disposed() {
			return Err(Error::contract(format!(
				"cannot create {} under disposed {}",
				init.type_name, parent.guid
			)));
		}

		let initializer = init.initializer.to_wire(init.scope)?;
		let guid: Arc<str> = match init.guid {
			Some(guid) => Arc::from(guid),
			None => connection.next_guid(&init.type_name),
		};
		let type_name: Arc<str> = Arc::from(init.type_name);
		let gc_bucket = init
			.gc_bucket
			.map(Arc::from)
			.unwrap_or_else(|| Arc::clone(&type_name));

		let create = serde_json::to_value(CreateParams {
			type_name: type_name.to_string(),
			initializer,
			guid: guid.to_string(),
		})?;

		let dispatcher = Arc::new(Dispatcher {
			guid: Arc::clone(&guid),
			type_name: Arc::clone(&type_name),
			gc_bucket: Arc::clone(&gc_bucket),
			scope: init.scope,
			object,
			methods: init.methods,
			connection: Arc::downgrade(&connection),
			parent: Mutex::new(Some(Arc::downgrade(parent))),
			children: Mutex::new(IndexMap::new()),
			disposed: AtomicBool::new(false),
		});

		connection.register(&dispatcher)?;
		{
			// Re-checked under the lock: dispose flips the flag before taking children.
			let mut siblings = parent.children.lock();
			let conflict = if parent.is_disposed() {
				Some(format!("cannot create {type_name} under disposed {}", parent.guid))
			} else if siblings.contains_key(&guid) {
				Some(format!("{} already has a child {guid}", parent.guid))
			} else {
				None
			};
			if let Some(message) = conflict {
				drop(siblings);
				connection.unregister(&dispatcher);
				return Err(Error::contract(message));
			}
			siblings.insert(Arc::clone(&guid), Arc::clone(&dispatcher));
		}

		tracing::debug!(guid = %guid, parent = %parent.guid, "Created dispatcher");

		if let Err(e) = connection.send_push(&parent.guid, CREATE_METHOD, create) {
			tracing::debug!(guid = %guid, error = %e, "__create__ not delivered");
		}

		connection.maybe_dispose_stale_dispatchers(&gc_bucket);
		Ok(dispatcher)
	}

	/// Returns the dispatcher already wrapping `object`, or creates one.
	///
	/// `init` only runs when a new dispatcher is needed.
	pub fn get_or_create<T: DomainObject>(
		parent: &Arc<Dispatcher>,
		object: Arc<T>,
		init: impl FnOnce(&Arc<T>) -> DispatcherInit,
	) -> Result<Arc<Dispatcher>> {
		let connection = parent.connection()?;
		if let Some(existing) = connection.existing_dispatcher(&object) {
			return Ok(existing);
		}
		let init = init(&object);
		Dispatcher::new(parent, object, init)
	}

	/// Builds the root node. Registration is done by the connection.
	pub(crate) fn root(connection: Weak<DispatcherConnection>, methods: MethodTable) -> Self {
		let type_name: Arc<str> = Arc::from(ROOT_TYPE);
		Dispatcher {
			guid: Arc::from(""),
			gc_bucket: Arc::clone(&type_name),
			type_name,
			scope: true,
			object: Arc::new(RootObject),
			methods,
			connection,
			parent: Mutex::new(None),
			children: Mutex::new(IndexMap::new()),
			disposed: AtomicBool::new(false),
		}
	}

	/// Returns the unique GUID for this object.
	pub fn guid(&self) -> &str {
		&self.guid
	}

	pub(crate) fn guid_arc(&self) -> &Arc<str> {
		&self.guid
	}

	/// Returns the wire type tag (e.g., "Page", "Frame").
	pub fn type_name(&self) -> &str {
		&self.type_name
	}

	pub fn gc_bucket(&self) -> &str {
		&self.gc_bucket
	}

	pub fn is_scope(&self) -> bool {
		self.scope
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::SeqCst)
	}

	/// Returns the wrapped object if it is a `T`.
	pub fn object<T: DomainObject>(&self) -> Option<Arc<T>> {
		Arc::clone(&self.object).downcast_arc::<T>().ok()
	}

	pub(crate) fn object_any(&self) -> &Arc<dyn DomainObject> {
		&self.object
	}

	pub fn methods(&self) -> &MethodTable {
		&self.methods
	}

	/// Returns the parent scope, if any (the root has none).
	pub fn parent(&self) -> Option<Arc<Dispatcher>> {
		self.parent.lock().as_ref().and_then(Weak::upgrade)
	}

	/// Returns the live children of this scope, in creation order.
	pub fn children(&self) -> Vec<Arc<Dispatcher>> {
		self.children.lock().values().cloned().collect()
	}

	/// Returns the owning connection.
	pub fn connection(&self) -> Result<Arc<DispatcherConnection>> {
		self.connection.upgrade().ok_or(Error::TransportClosed)
	}

	/// Emits an unsolicited event attributed to this dispatcher.
	///
	/// After disposal the event is dropped, or rejected with a contract
	/// violation when the connection is strict.
	pub fn push_event(&self, method: &str, params: impl Into<ChannelValue>) -> Result<()> {
		let connection = self.connection()?;
		if self.is_disposed() {
			if connection.config().strict {
				return Err(Error::contract(format!(
					"{} is sending \"{method}\" event after being disposed",
					self.guid
				)));
			}
			tracing::debug!(guid = %self.guid, method, "Dropping event of disposed dispatcher");
			return Ok(());
		}
		connection.send_message_to_client(&self.guid, method, params.into(), false)
	}

	/// Disposes this dispatcher and its whole subtree.
	///
	/// Disposing twice is a contract violation.
	pub fn dispose(&self) -> Result<()> {
		self.dispose_inner(None, true)
	}

	/// Disposes because the GC bucket overflowed; always announced with `reason: "gc"`.
	pub(crate) fn collect(&self) -> Result<()> {
		self.dispose_inner(Some(DisposeReason::Gc), true)
	}

	/// Disposes the subtree without telling the client (transport is gone).
	pub(crate) fn dispose_silently(&self) -> Result<()> {
		self.dispose_inner(None, false)
	}

	fn dispose_inner(&self, reason: Option<DisposeReason>, notify: bool) -> Result<()> {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return Err(Error::contract(format!(
				"{} is disposed more than once",
				self.guid
			)));
		}

		if let Some(parent) = self.parent() {
			parent.children.lock().shift_remove(&self.guid);
		}
		let connection = self.connection.upgrade();
		if let Some(connection) = &connection {
			connection.unregister(self);
		}

		let children = std::mem::take(&mut *self.children.lock());
		for child in children.values() {
			if let Err(e) = child.dispose_inner(None, notify) {
				tracing::warn!(guid = %child.guid, parent = %self.guid, error = %e, "Failed to dispose child");
			}
		}

		tracing::debug!(guid = %self.guid, ?reason, "Disposed dispatcher");

		if notify && (self.scope || reason.is_some()) {
			if let Some(connection) = connection {
				let params = serde_json::to_value(DisposeParams { reason })
					.unwrap_or_else(|_| json!({}));
				if let Err(e) = connection.send_push(&self.guid, DISPOSE_METHOD, params) {
					tracing::debug!(guid = %self.guid, error = %e, "__dispose__ not delivered");
				}
			}
		}
		Ok(())
	}

	/// Moves `child` from its current parent under this scope.
	pub fn adopt(self: &Arc<Self>, child: &Arc<Dispatcher>) -> Result<()> {
		if !self.scope {
			return Err(Error::contract(format!(
				"{} is not a scope and cannot adopt {}",
				self.guid, child.guid
			)));
		}
		if self.is_disposed() || child.is_disposed() {
			return Err(Error::contract(format!(
				"cannot adopt {} into {}: one of them is disposed",
				child.guid, self.guid
			)));
		}

		let old_parent = child.parent().ok_or_else(|| {
			Error::contract(format!("{} has no parent and cannot be adopted", child.guid))
		})?;
		if Arc::ptr_eq(&old_parent, self) {
			return Ok(());
		}

		let mut ancestor = Some(Arc::clone(self));
		while let Some(node) = ancestor {
			if Arc::ptr_eq(&node, child) {
				return Err(Error::contract(format!(
					"cannot adopt {} into its own descendant {}",
					child.guid, self.guid
				)));
			}
			ancestor = node.parent();
		}

		old_parent.children.lock().shift_remove(&child.guid);
		self.children
			.lock()
			.insert(Arc::clone(&child.guid), Arc::clone(child));
		*child.parent.lock() = Some(Arc::downgrade(self));

		let connection = self.connection()?;
		let params = serde_json::to_value(AdoptParams {
			guid: child.guid.to_string(),
		})?;
		connection.send_push(&self.guid, ADOPT_METHOD, params)
	}

	/// Recursive `{_guid, objects}` dump of this subtree.
	pub fn debug_scope_state(&self) -> Value {
		let objects: Vec<Value> = self
			.children()
			.iter()
			.map(|child| child.debug_scope_state())
			.collect();
		json!({ "_guid": self.guid(), "objects": objects })
	}
}

impl std::fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dispatcher")
			.field("guid", &self.guid)
			.field("type", &self.type_name)
			.field("scope", &self.scope)
			.field("disposed", &self.is_disposed())
			.finish()
	}
}
