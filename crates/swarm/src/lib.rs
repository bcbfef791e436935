//! Stream-multiplexing connection swarm.
//!
//! A [`Swarm`] owns a growing set of transport connections, multiplexes many
//! logical bidirectional streams over each of them through a pluggable
//! session muxer, and exposes a uniform API for opening outbound streams and
//! dispatching inbound ones. Callers never talk to raw connections directly:
//! they ask the swarm for a stream, and the swarm picks the connection,
//! opens the muxed stream, and tracks its lifetime.
//!
//! # Structure
//!
//! - [`Swarm`] - coordinator: registries of [`Conn`]s, streams and
//!   [`Listener`]s, group memberships, and the active policies
//! - [`Conn`] - one transport connection plus its multiplexing session
//! - [`Stream`] - one logical stream, exclusively owned by whoever holds it
//! - [`Listener`] - accept loop turning raw connections into registered conns
//! - [`ConnSelector`] / [`StreamHandler`] - hot-swappable policy objects for
//!   outbound placement and inbound dispatch
//!
//! The byte-level capabilities (transport connections, listeners, muxed
//! sessions) are consumed through the traits in [`skein_transport`].

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod conn;
mod error;
mod group;
mod handler;
mod listener;
mod select;
mod stream;
mod swarm;

pub use conn::Conn;
pub use error::{SwarmError, SwarmResult};
pub use handler::{DropHandler, StreamHandler};
pub use listener::Listener;
pub use select::{ConnSelector, RandomSelector};
pub use stream::{Stream, StreamInfo};
pub use swarm::Swarm;

pub use skein_primitives::{ConnId, ConnToken, GroupId, ListenerId, StreamId};
