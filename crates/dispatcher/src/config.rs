//! Per-connection configuration.

use crate::error::{Error, Result};

/// Environment variable enabling strict mode (`1`/`true`).
pub const STRICT_ENV: &str = "PW_DISPATCHER_STRICT";
/// Environment variable overriding every GC bucket limit.
pub const MAX_PER_BUCKET_ENV: &str = "PW_DISPATCHER_MAX_PER_BUCKET";

const HANDLE_BUCKET_LIMIT: usize = 100_000;
const DEFAULT_BUCKET_LIMIT: usize = 10_000;

/// Settings of one [`DispatcherConnection`](crate::DispatcherConnection).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
	/// Raise contract violations for events pushed after disposal instead of
	/// dropping them. Meant for tests and development builds.
	pub strict: bool,
	/// Overrides the per-bucket dispatcher limit for every bucket.
	pub max_dispatchers_per_bucket: Option<usize>,
}

impl ConnectionConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn strict(mut self, strict: bool) -> Self {
		self.strict = strict;
		self
	}

	pub fn max_dispatchers_per_bucket(mut self, limit: usize) -> Self {
		self.max_dispatchers_per_bucket = Some(limit);
		self
	}

	/// Reads [`STRICT_ENV`] and [`MAX_PER_BUCKET_ENV`] from the process environment.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Builds a config from an arbitrary key lookup.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let strict = match lookup(STRICT_ENV).as_deref().map(str::trim) {
			None | Some("") | Some("0") | Some("false") => false,
			Some("1") | Some("true") => true,
			Some(other) => {
				return Err(Error::Config(format!(
					"{STRICT_ENV} must be 0, 1, true or false, got '{other}'"
				)));
			}
		};

		let max_dispatchers_per_bucket = match lookup(MAX_PER_BUCKET_ENV) {
			Some(raw) => Some(raw.trim().parse::<usize>().map_err(|e| {
				Error::Config(format!("{MAX_PER_BUCKET_ENV} must be a count: {e}"))
			})?),
			None => None,
		};

		Ok(Self {
			strict,
			max_dispatchers_per_bucket,
		})
	}

	/// Maximum number of live dispatchers in `bucket` before the oldest are collected.
	pub fn bucket_limit(&self, bucket: &str) -> usize {
		if let Some(limit) = self.max_dispatchers_per_bucket {
			return limit;
		}
		match bucket {
			"JSHandle" | "ElementHandle" => HANDLE_BUCKET_LIMIT,
			_ => DEFAULT_BUCKET_LIMIT,
		}
	}
}
