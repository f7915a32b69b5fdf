//! Server side of the Playwright RPC protocol.
//!
//! Every client-visible object is represented by a [`Dispatcher`]: a node in a
//! tree rooted at the connection's root dispatcher, addressed by a guid. A
//! [`DispatcherConnection`] routes inbound requests to the right dispatcher,
//! validates params through its [`Scheme`], runs the method handler and sends
//! exactly one reply per request. Dispatchers push events and lifecycle
//! notifications (`__create__`, `__adopt__`, `__dispose__`) to the client.
//!
//! Messages travel over a [`transport`]: length-prefixed frames on byte
//! pipes, or plain WebSocket messages.
//!
//! # Example
//!
//! ```ignore
//! use pw_dispatcher::{ConnectionConfig, DispatcherConnection, MethodTable, PipeTransport, Scheme};
//!
//! let connection = DispatcherConnection::new(ConnectionConfig::from_env()?, scheme, root_methods);
//! let (transport, rx) = PipeTransport::new(tokio::io::stdout(), tokio::io::stdin());
//! connection.run(transport.into_transport_parts(rx)).await?;
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod transport;
pub mod validator;
pub mod value;

pub use config::ConnectionConfig;
pub use connection::DispatcherConnection;
pub use dispatcher::{
	Call, Dispatcher, DispatcherInit, DomainObject, HandlerFn, HandlerFuture, MethodTable, ROOT_TYPE,
	RootObject,
};
pub use error::{Error, Result, TARGET_CLOSED_MESSAGE};
pub use transport::{
	PipeTransport, Transport, TransportParts, TransportReceiver, WebSocketTransport,
};
pub use validator::{ChannelNames, ChannelResolver, Scheme, Validator, ValidatorContext};
pub use value::ChannelValue;
