//! Capability traits consumed by the skein swarm.
//!
//! The swarm core never touches bytes on the wire. Everything byte-shaped is
//! behind the three capabilities defined here:
//!
//! - [`TransportListener`] - yields raw connections
//! - [`TransportConn`] - one raw bidirectional byte stream with a stable
//!   identity token
//! - [`StreamMuxer`] / [`MuxedSession`] / [`MuxedStream`] - turns one raw
//!   connection into many logical streams
//!
//! The [`memory`] module provides a complete in-process implementation of all
//! three, used by the swarm's tests and for loopback wiring.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod error;
mod meta;
mod traits;

pub mod memory;

pub use error::{ConnError, ListenerError, SessionError};
pub use meta::{ListenAddr, StreamMeta};
pub use traits::{MuxedSession, MuxedStream, StreamMuxer, TransportConn, TransportListener};
