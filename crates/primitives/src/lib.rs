//! Identity types for the skein stack.
//!
//! This crate provides the opaque handles shared by the transport boundary
//! and the swarm core, kept separate to avoid circular dependencies.
//!
//! - [`ConnId`], [`StreamId`], [`ListenerId`] - handles minted by a swarm for
//!   the entities it registers
//! - [`ConnToken`] - transport-supplied identity of an underlying connection,
//!   used to make adoption idempotent
//! - [`GroupId`] - caller-defined key naming a set of connections

use std::fmt;
use std::sync::Arc;

/// Handle of a registered connection. Unique within its owning swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(u64);

/// Handle of a registered logical stream. Unique within its owning swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u64);

/// Handle of a registered listener. Unique within its owning swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Stable identity of an underlying transport connection.
///
/// Supplied by the transport, not minted by the swarm: two handles to the
/// same underlying connection carry the same token, which is what lets
/// repeated adoption of one connection collapse to a single registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnToken(u64);

macro_rules! impl_id {
    ($ty:ident, $prefix:literal) => {
        impl $ty {
            /// Wraps a raw id value.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw id value.
            pub const fn raw(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

impl_id!(ConnId, "conn");
impl_id!(StreamId, "stream");
impl_id!(ListenerId, "listener");
impl_id!(ConnToken, "token");

/// Caller-defined key naming a group of connections.
///
/// Cheap to clone; group keys are compared and hashed by their string value.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(Arc<str>);

impl GroupId {
    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GroupId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for GroupId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({:?})", &*self.0)
    }
}
