//! Listener wrapper and accept loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use skein_primitives::ListenerId;
use skein_transport::{ListenAddr, StreamMuxer, TransportListener};
use tracing::{debug, trace, warn};

use crate::Swarm;

/// A registered listener.
///
/// Wraps one transport listener whose accepted raw connections are adopted
/// into the owning swarm.
pub struct Listener<M: StreamMuxer> {
    id: ListenerId,
    addr: ListenAddr,
    swarm: Weak<Swarm<M>>,
    inner: Arc<dyn TransportListener<Conn = M::Conn>>,
    closed: AtomicBool,
}

impl<M: StreamMuxer> Listener<M> {
    pub(crate) fn new(
        id: ListenerId,
        addr: ListenAddr,
        swarm: Weak<Swarm<M>>,
        inner: Arc<dyn TransportListener<Conn = M::Conn>>,
    ) -> Self {
        Self {
            id,
            addr,
            swarm,
            inner,
            closed: AtomicBool::new(false),
        }
    }

    /// The listener's handle within its swarm.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// The address the transport listener was bound to at registration.
    pub fn local_addr(&self) -> &ListenAddr {
        &self.addr
    }

    /// Whether the listener has been stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops the listener.
    ///
    /// Idempotent. Closes the transport listener (unblocking a pending
    /// accept) and removes this listener from the swarm's registry.
    /// Connections already accepted are unaffected.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(listener = %self.id, addr = %self.addr, "closing listener");
        self.inner.close();
        if let Some(swarm) = self.swarm.upgrade() {
            swarm.deregister_listener(self.id);
        }
    }
}

impl<M: StreamMuxer> fmt::Debug for Listener<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Accept loop for one listener.
///
/// A failure to adopt an individual accepted connection (for example the
/// connection dropped before session setup finished) is logged and skipped;
/// only a listener-level accept error stops the loop.
pub(crate) async fn run_accept_loop<M: StreamMuxer>(listener: Arc<Listener<M>>) {
    loop {
        match listener.inner.accept().await {
            Ok(raw) => {
                let Some(swarm) = listener.swarm.upgrade() else {
                    break;
                };
                match swarm.add_conn(raw).await {
                    Ok(conn) => {
                        trace!(listener = %listener.id(), conn = %conn.id(), "accepted connection");
                    }
                    Err(err) => {
                        warn!(listener = %listener.id(), %err, "failed to adopt accepted connection");
                    }
                }
            }
            Err(err) => {
                if !listener.is_closed() {
                    warn!(listener = %listener.id(), %err, "listener failed, stopping accept loop");
                }
                listener.close();
                break;
            }
        }
    }
}
