//! Error types for swarm operations.

use skein_primitives::GroupId;
use skein_transport::{ConnError, ListenerError, SessionError};

/// Errors returned by swarm operations.
///
/// All of these are recoverable values returned to the immediate caller;
/// none aborts anything beyond the operation that produced it. A single
/// connection's session failure triggers that connection's cleanup and
/// nothing else.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    /// No connection selector is installed on the swarm.
    #[error("no connection selector installed")]
    NoSelector,

    /// The candidate set was empty at selection time.
    #[error("no connections available")]
    NoConnections,

    /// The selector returned nothing, or a connection outside the candidate
    /// set it was offered. A policy contract violation, not a swarm failure.
    #[error("selector returned a connection outside the candidate set")]
    InvalidConnSelected,

    /// No group is registered under the given id.
    #[error("no group registered under {0}")]
    GroupNotFound(GroupId),

    /// The connection belongs to a different swarm.
    #[error("connection belongs to a different swarm")]
    WrongSwarm,

    /// The connection is not (or no longer) registered with this swarm.
    #[error("connection is not registered with this swarm")]
    NotRegistered,

    /// The connection has been closed.
    #[error("connection is closed")]
    ConnClosed,

    /// A transport listener failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Adopting a raw connection failed.
    #[error(transparent)]
    Conn(#[from] ConnError),

    /// The multiplexing session failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result alias for swarm operations.
pub type SwarmResult<T> = Result<T, SwarmError>;
