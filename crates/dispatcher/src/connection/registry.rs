//! Connection-wide dispatcher indices.
//!
//! Three views over the live dispatchers of one connection, kept in step
//! under a single lock:
//!
//! - flat guid index, for O(1) routing regardless of tree depth;
//! - object identity table, so a domain object never gets two dispatchers;
//! - GC buckets in creation order, for collecting the oldest dispatchers.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::dispatcher::{Dispatcher, DomainObject};
use crate::error::{Error, Result};

/// Identity of a wrapped domain object (its allocation address).
///
/// Stable while the dispatcher holds the object alive, which is exactly as
/// long as the entry lives in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObjectKey(usize);

impl ObjectKey {
	pub(crate) fn of<T: ?Sized>(object: &Arc<T>) -> Self {
		ObjectKey(Arc::as_ptr(object) as *const () as usize)
	}

	pub(crate) fn of_dispatcher(dispatcher: &Dispatcher) -> Self {
		Self::of::<dyn DomainObject>(dispatcher.object_any())
	}
}

#[derive(Default)]
pub(crate) struct Registry {
	by_guid: HashMap<Arc<str>, Arc<Dispatcher>>,
	by_object: HashMap<ObjectKey, Arc<Dispatcher>>,
	buckets: HashMap<Arc<str>, IndexSet<Arc<str>>>,
}

impl Registry {
	/// Indexes a new dispatcher, rejecting duplicate guids and objects.
	pub(crate) fn insert(&mut self, dispatcher: &Arc<Dispatcher>) -> Result<()> {
		let guid = dispatcher.guid_arc();
		if self.by_guid.contains_key(guid) {
			return Err(Error::contract(format!("duplicate dispatcher guid {guid}")));
		}
		let key = ObjectKey::of_dispatcher(dispatcher);
		if let Some(existing) = self.by_object.get(&key) {
			return Err(Error::contract(format!(
				"object wrapped by {} already has dispatcher {}",
				guid,
				existing.guid()
			)));
		}

		self.by_guid.insert(Arc::clone(guid), Arc::clone(dispatcher));
		self.by_object.insert(key, Arc::clone(dispatcher));
		self.buckets
			.entry(Arc::from(dispatcher.gc_bucket()))
			.or_default()
			.insert(Arc::clone(guid));
		Ok(())
	}

	/// Removes a dispatcher from every index. Unknown dispatchers are ignored.
	pub(crate) fn remove(&mut self, dispatcher: &Dispatcher) {
		let guid = dispatcher.guid_arc();
		match self.by_guid.get(guid) {
			Some(current) if std::ptr::eq(Arc::as_ptr(current), dispatcher) => {}
			_ => return,
		}
		self.by_guid.remove(guid);
		self.by_object.remove(&ObjectKey::of_dispatcher(dispatcher));
		if let Some(bucket) = self.buckets.get_mut(dispatcher.gc_bucket()) {
			bucket.shift_remove(guid);
		}
	}

	pub(crate) fn get(&self, guid: &str) -> Option<Arc<Dispatcher>> {
		self.by_guid.get(guid).cloned()
	}

	pub(crate) fn by_object(&self, key: ObjectKey) -> Option<Arc<Dispatcher>> {
		self.by_object.get(&key).cloned()
	}

	pub(crate) fn len(&self) -> usize {
		self.by_guid.len()
	}

	pub(crate) fn bucket_len(&self, bucket: &str) -> usize {
		self.buckets.get(bucket).map_or(0, IndexSet::len)
	}

	/// Returns the `count` oldest live dispatchers of `bucket`.
	pub(crate) fn oldest_in_bucket(&self, bucket: &str, count: usize) -> Vec<Arc<Dispatcher>> {
		let Some(guids) = self.buckets.get(bucket) else {
			return Vec::new();
		};
		guids
			.iter()
			.take(count)
			.filter_map(|guid| self.by_guid.get(guid).cloned())
			.collect()
	}
}
