//! Packetsocket
//!
//! Typed packets over any ordered byte stream. Packet types are declared at
//! runtime with a [`PacketDescriptor`]: an alias, a group and an ordered list of
//! typed fields. Descriptors live in a [`PacketRegistry`], which both peers of a
//! [`Connection`] must agree on. The registry can export its schemas as JSON so
//! that a peer can reproduce them.
//!
//! A connection frames each packet with its group, its alias and an optional
//! correlation token. Requests carry a token; the peer answers by responding
//! with the same token, and the reply goes to the handler registered for that
//! request instead of the reply type's default receive behavior.
//!
//! Connections filter inbound packets by group. An empty filter accepts every
//! group, and the wildcard group `"*"` is always accepted.
//!
//! ```no_run
//! # async fn ping() -> packetsocket::Result<()> {
//! use std::sync::Arc;
//! use packetsocket::{Configuration, Connection, FieldType, Packet, PacketDescriptor, PacketRegistry};
//!
//! let registry = Arc::new(PacketRegistry::new());
//! let ping = registry.register(
//!     PacketDescriptor::builder("p")
//!         .group("g")
//!         .field("seq", FieldType::Integer)
//!         .build()?,
//! )?;
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:9000").await?;
//! let connection = Connection::spawn(stream, registry, Configuration::default());
//! let reply = connection
//!     .request(&Packet::builder(&ping).set("seq", 7).build()?)
//!     .await?
//!     .await?;
//! log::info!("got {reply:?}");
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod codec;
mod completion;
mod configuration;
mod connection;
mod connection_driver;
mod descriptor;
mod error;
mod export;
mod field;
pub mod frame;
mod observer;
mod packet;
mod pending;
mod receiver;
mod registry;
mod value;

pub use completion::ResponseCompletion;
pub use configuration::Configuration;
pub use connection::{Connection, ConnectionState};
pub use connection_driver::ConnectionDriver;
pub use descriptor::{
    DecodeOverride, EncodeOverride, PacketDescriptor, PacketDescriptorBuilder, MAX_NAME_LENGTH,
    WILDCARD_GROUP,
};
pub use error::{DecodeError, Error, Result};
pub use export::{PacketSchema, SchemaDocument, SchemaSelector};
pub use field::{FieldSpec, FieldType};
pub use frame::{Correlation, Frame};
pub use observer::{ConnectionObserver, DoNothingObserver};
pub use packet::{Packet, PacketBuilder};
pub use pending::ResponseHandler;
pub use receiver::{DispatchContext, PacketReceiver};
pub use registry::PacketRegistry;
pub use value::Value;
