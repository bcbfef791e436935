//! Error types for the collaborator boundary.

/// Errors from a transport listener.
///
/// Any error returned from [`accept`](crate::TransportListener::accept) is
/// listener-fatal: the swarm stops the accept loop and deregisters the
/// listener. Failures of an individual just-accepted connection belong to
/// [`ConnError`] instead.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("listener is closed")]
    Closed,
    #[error("listener unusable: {0}")]
    Unusable(String),
    #[error("accept failed: {0}")]
    Accept(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a multiplexing session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("session stream capacity exhausted")]
    Exhausted,
    #[error("muxer protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from adopting a raw connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    #[error("connection unusable: {0}")]
    Unusable(String),
    #[error("session setup failed: {0}")]
    Setup(#[from] SessionError),
}
