//! Wire types for the dispatcher RPC protocol.
//!
//! This crate contains the serde-serializable shapes exchanged between a
//! client and a `DispatcherConnection`. They represent the "protocol layer":
//! the data exactly as it appears on the wire, with no live object references.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **Transport-agnostic**: Framing lives in `pw-dispatcher`
//! - **Stable**: Changes only when the wire protocol changes

pub mod message;
pub mod metadata;

pub use message::*;
pub use metadata::*;
