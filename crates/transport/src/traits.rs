//! The capability traits themselves.

use async_trait::async_trait;
use skein_primitives::ConnToken;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{ConnError, ListenAddr, ListenerError, SessionError, StreamMeta};

/// One raw bidirectional byte stream with a stable identity.
///
/// Exclusively consumed by a [`StreamMuxer`] at adoption time; the swarm
/// itself never reads or writes it.
pub trait TransportConn: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Stable identity of the underlying connection.
    ///
    /// Two handles to the same underlying connection return the same token.
    fn token(&self) -> ConnToken;
}

/// Source of inbound raw connections.
#[async_trait]
pub trait TransportListener: Send + Sync + 'static {
    /// The raw connection type this listener yields.
    type Conn: TransportConn;

    /// Waits for the next inbound raw connection.
    ///
    /// An `Err` is listener-fatal: callers must stop accepting. Failures of
    /// an individual accepted connection are surfaced later, at adoption.
    async fn accept(&self) -> Result<Self::Conn, ListenerError>;

    /// The bound address, or an error if the listener is unusable.
    fn local_addr(&self) -> Result<ListenAddr, ListenerError>;

    /// Closes the listener, unblocking a pending [`accept`](Self::accept).
    fn close(&self);
}

/// One logical bidirectional stream produced by a [`MuxedSession`].
pub trait MuxedStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> MuxedStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A multiplexing session bound to one raw connection.
///
/// The session owns the raw connection exclusively: closing the session
/// closes the connection, and a failed connection surfaces here as a closed
/// session.
#[async_trait]
pub trait MuxedSession: Send + Sync + 'static {
    /// The logical stream type this session produces.
    type Stream: MuxedStream;

    /// Opens a new outbound logical stream.
    async fn open_stream(&self, meta: StreamMeta) -> Result<Self::Stream, SessionError>;

    /// Waits for the next logical stream opened by the remote side.
    ///
    /// Returns `None` once the session is closed, locally or remotely.
    async fn accept_stream(&self) -> Option<Self::Stream>;

    /// Closes the session and the raw connection under it.
    ///
    /// Idempotent. Pending and future stream io observes the failure on its
    /// next poll.
    fn close(&self);

    /// Whether the session has been closed.
    fn is_closed(&self) -> bool;
}

/// Binds fresh multiplexing sessions over adopted raw connections.
#[async_trait]
pub trait StreamMuxer: Send + Sync + 'static {
    /// The raw connection type this muxer consumes.
    type Conn: TransportConn;
    /// The session type this muxer produces.
    type Session: MuxedSession;

    /// Consumes a raw connection and binds a session over it.
    async fn upgrade(&self, conn: Self::Conn) -> Result<Self::Session, ConnError>;
}
