//! Connection wrapper: one raw transport connection plus its multiplexing
//! session.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use skein_primitives::{ConnId, ConnToken, GroupId};
use skein_transport::{MuxedSession, StreamMeta, StreamMuxer};
use tracing::{debug, trace, warn};

use crate::error::{SwarmError, SwarmResult};
use crate::{Stream, Swarm};

/// A registered connection.
///
/// Owns its session (and through it the raw transport connection)
/// exclusively. The back-reference to the owning swarm is non-owning and
/// used only to validate calls and to run registry cleanup; it never keeps
/// a swarm alive.
pub struct Conn<M: StreamMuxer> {
    id: ConnId,
    token: ConnToken,
    swarm: Weak<Swarm<M>>,
    session: Arc<M::Session>,
    closed: AtomicBool,
}

impl<M: StreamMuxer> Conn<M> {
    pub(crate) fn new(
        id: ConnId,
        token: ConnToken,
        swarm: Weak<Swarm<M>>,
        session: Arc<M::Session>,
    ) -> Self {
        Self {
            id,
            token,
            swarm,
            session,
            closed: AtomicBool::new(false),
        }
    }

    /// The connection's handle within its swarm.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Identity of the underlying transport connection.
    pub fn token(&self) -> ConnToken {
        self.token
    }

    /// The owning swarm, if it is still alive.
    pub fn swarm(&self) -> Option<Arc<Swarm<M>>> {
        self.swarm.upgrade()
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn session(&self) -> &Arc<M::Session> {
        &self.session
    }

    /// Opens a new outbound logical stream on this connection and registers
    /// it with the owning swarm.
    pub async fn open_stream(&self, meta: StreamMeta) -> SwarmResult<Stream<M>> {
        if self.is_closed() {
            return Err(SwarmError::ConnClosed);
        }
        let swarm = self.swarm.upgrade().ok_or(SwarmError::NotRegistered)?;
        let io = self.session.open_stream(meta).await?;
        Ok(swarm.register_stream(self.id, io))
    }

    /// Closes the connection.
    ///
    /// Idempotent. Closes the session and the transport connection under it,
    /// removes this connection from the swarm's registries and from every
    /// group it belonged to, and marks all its registered streams closed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(conn = %self.id, "closing connection");
        self.session.close();
        if let Some(swarm) = self.swarm.upgrade() {
            swarm.deregister_conn(self);
        }
    }

    /// Adds this connection to a group, creating the group if needed.
    pub fn join_group(&self, group: impl Into<GroupId>) -> SwarmResult<()> {
        if self.is_closed() {
            return Err(SwarmError::ConnClosed);
        }
        let swarm = self.swarm.upgrade().ok_or(SwarmError::NotRegistered)?;
        let group = group.into();
        trace!(conn = %self.id, %group, "joining group");
        swarm.group_registry().join(group, self.id);
        Ok(())
    }

    /// Removes this connection from a group.
    pub fn leave_group(&self, group: &GroupId) -> SwarmResult<()> {
        let swarm = self.swarm.upgrade().ok_or(SwarmError::NotRegistered)?;
        trace!(conn = %self.id, %group, "leaving group");
        swarm.group_registry().leave(group, self.id);
        Ok(())
    }

    /// Snapshot of the groups this connection belongs to.
    pub fn groups(&self) -> Vec<GroupId> {
        match self.swarm.upgrade() {
            Some(swarm) => swarm.group_registry().groups_of(self.id),
            None => Vec::new(),
        }
    }

    /// Whether this connection is a member of the given group.
    pub fn in_group(&self, group: &GroupId) -> bool {
        self.swarm
            .upgrade()
            .is_some_and(|swarm| swarm.group_registry().contains(group, self.id))
    }
}

impl<M: StreamMuxer> fmt::Debug for Conn<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Inbound-stream loop for one connection.
///
/// Runs until the session stops yielding streams (closed locally or
/// remotely), then runs the connection's close path. Every inbound stream is
/// registered and then dispatched on its own task, with the handler
/// reference loaded at dispatch time: a slow handler for one stream never
/// delays acceptance of the next, and a handler swap never splits a single
/// stream between two handlers.
pub(crate) async fn run_inbound<M: StreamMuxer>(conn: Arc<Conn<M>>) {
    while let Some(io) = conn.session().accept_stream().await {
        let Some(swarm) = conn.swarm.upgrade() else {
            break;
        };
        let stream = swarm.register_stream(conn.id(), io);
        match swarm.stream_handler() {
            Some(handler) => {
                trace!(conn = %conn.id(), stream = %stream.id(), "dispatching inbound stream");
                tokio::spawn(async move {
                    handler.handle_stream(stream).await;
                });
            }
            None => {
                warn!(conn = %conn.id(), stream = %stream.id(), "no stream handler installed, dropping inbound stream");
                drop(stream);
            }
        }
    }
    trace!(conn = %conn.id(), "session ended, running close path");
    conn.close();
}
