//! The swarm coordinator.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use skein_primitives::{ConnId, ConnToken, GroupId, ListenerId, StreamId};
use skein_transport::{
    MuxedSession, StreamMeta, StreamMuxer, TransportConn, TransportListener,
};
use tracing::{debug, trace};

use crate::conn::run_inbound;
use crate::error::{SwarmError, SwarmResult};
use crate::group::GroupRegistry;
use crate::listener::run_accept_loop;
use crate::select::{ConnSelector, RandomSelector};
use crate::stream::{SessionStreamOf, StreamState};
use crate::{Conn, DropHandler, Listener, Stream, StreamHandler, StreamInfo};

/// Coordinator owning all connections, streams, listeners and groups, and
/// the active selection/dispatch policies.
///
/// Callers never talk to raw connections directly: they ask the swarm for a
/// stream, and the swarm decides which connection to use, creates the muxed
/// stream, and tracks its lifetime.
///
/// # Lock Strategy
///
/// - `conns`, `streams`, `listeners`: one `RwLock` each - read-heavy
///   (snapshots, membership checks), written only on adoption and close.
///   No operation holds two of these locks at the same time.
/// - `groups`: own lock inside [`GroupRegistry`], same discipline.
/// - `adopted`: `Mutex` - low contention (adoption and close only).
/// - `select_conn`, `stream_handler`: `RwLock`-guarded `Arc` swapped in one
///   critical section; readers clone the `Arc` and run unguarded, so an
///   in-flight dispatch keeps the policy it loaded.
pub struct Swarm<M: StreamMuxer> {
    muxer: M,

    /// Active connections.
    conns: RwLock<HashMap<ConnId, Arc<Conn<M>>>>,
    /// Active streams.
    streams: RwLock<HashMap<StreamId, Arc<StreamState>>>,
    /// Active listeners.
    listeners: RwLock<HashMap<ListenerId, Arc<Listener<M>>>>,
    /// Group memberships.
    groups: GroupRegistry,

    /// Transport-token index backing `add_conn` idempotency.
    adopted: Mutex<HashMap<ConnToken, Weak<Conn<M>>>>,

    /// Current connection selector. May be uninstalled.
    select_conn: RwLock<Option<Arc<dyn ConnSelector<M>>>>,
    /// Current inbound-stream handler. May be uninstalled.
    stream_handler: RwLock<Option<Arc<dyn StreamHandler<M>>>>,

    next_conn_id: AtomicU64,
    next_stream_id: AtomicU64,
    next_listener_id: AtomicU64,
}

impl<M: StreamMuxer> Swarm<M> {
    /// Creates a swarm around the given muxer, with the default policies
    /// installed: uniform-random selection and close-on-arrival inbound
    /// handling.
    pub fn new(muxer: M) -> Arc<Self> {
        Arc::new(Self {
            muxer,
            conns: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            groups: GroupRegistry::new(),
            adopted: Mutex::new(HashMap::new()),
            select_conn: RwLock::new(Some(Arc::new(RandomSelector))),
            stream_handler: RwLock::new(Some(Arc::new(DropHandler))),
            next_conn_id: AtomicU64::new(1),
            next_stream_id: AtomicU64::new(1),
            next_listener_id: AtomicU64::new(1),
        })
    }

    // =========================================================================
    // Policies
    // =========================================================================

    /// Installs (or with `None` uninstalls) the inbound-stream handler.
    ///
    /// Visible to all subsequent dispatches; dispatches already holding the
    /// previous handler run to completion with it.
    pub fn set_stream_handler(&self, handler: Option<Arc<dyn StreamHandler<M>>>) {
        *self.stream_handler.write() = handler;
    }

    /// The current inbound-stream handler.
    pub fn stream_handler(&self) -> Option<Arc<dyn StreamHandler<M>>> {
        self.stream_handler.read().clone()
    }

    /// Installs (or with `None` uninstalls) the connection selector.
    pub fn set_select_conn(&self, selector: Option<Arc<dyn ConnSelector<M>>>) {
        *self.select_conn.write() = selector;
    }

    /// The current connection selector.
    pub fn select_conn(&self) -> Option<Arc<dyn ConnSelector<M>>> {
        self.select_conn.read().clone()
    }

    // =========================================================================
    // Registry snapshots
    // =========================================================================

    /// Snapshot of all registered connections.
    pub fn conns(&self) -> Vec<Arc<Conn<M>>> {
        self.conns.read().values().cloned().collect()
    }

    /// Snapshot of all registered streams.
    pub fn streams(&self) -> Vec<StreamInfo> {
        self.streams
            .read()
            .values()
            .map(|state| StreamInfo {
                id: state.id(),
                conn: state.conn(),
            })
            .collect()
    }

    /// Snapshot of all registered listeners.
    pub fn listeners(&self) -> Vec<Arc<Listener<M>>> {
        self.listeners.read().values().cloned().collect()
    }

    /// Snapshot of all registered group ids.
    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.ids()
    }

    /// Snapshot of the connections in a group; empty for an unknown group.
    pub fn conns_with_group(&self, group: &GroupId) -> Vec<Arc<Conn<M>>> {
        let Some(members) = self.groups.members(group) else {
            return Vec::new();
        };
        let conns = self.conns.read();
        members
            .iter()
            .filter_map(|id| conns.get(id).cloned())
            .collect()
    }

    // =========================================================================
    // Adoption
    // =========================================================================

    /// Registers a transport listener and starts accepting from it.
    ///
    /// Fails if the listener is unusable at registration time. Accepted raw
    /// connections are adopted exactly as by [`add_conn`](Self::add_conn).
    pub fn add_listener<L>(self: &Arc<Self>, listener: L) -> SwarmResult<Arc<Listener<M>>>
    where
        L: TransportListener<Conn = M::Conn>,
    {
        let addr = listener.local_addr()?;
        let id = ListenerId::new(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let listener = Arc::new(Listener::new(
            id,
            addr,
            Arc::downgrade(self),
            Arc::new(listener),
        ));
        self.listeners.write().insert(id, Arc::clone(&listener));
        debug!(listener = %id, addr = %listener.local_addr(), "listener registered");
        tokio::spawn(run_accept_loop(Arc::clone(&listener)));
        Ok(listener)
    }

    /// Adopts a raw transport connection: binds a fresh multiplexing session
    /// over it, registers the connection and starts receiving its inbound
    /// streams.
    ///
    /// Idempotent: adopting a connection whose token is already registered
    /// returns the existing connection and discards the duplicate handle.
    pub async fn add_conn(self: &Arc<Self>, raw: M::Conn) -> SwarmResult<Arc<Conn<M>>> {
        let token = raw.token();
        if let Some(existing) = self.adopted_conn(token) {
            trace!(conn = %existing.id(), %token, "connection already adopted");
            return Ok(existing);
        }

        let session = self.muxer.upgrade(raw).await?;
        let id = ConnId::new(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Conn::new(
            id,
            token,
            Arc::downgrade(self),
            Arc::new(session),
        ));

        // Claim the token; on a lost race discard our session and return the
        // winner's connection.
        let raced = {
            let mut adopted = self.adopted.lock();
            match adopted.get(&token).and_then(Weak::upgrade) {
                Some(existing) if !existing.is_closed() => Some(existing),
                _ => {
                    adopted.insert(token, Arc::downgrade(&conn));
                    None
                }
            }
        };
        if let Some(existing) = raced {
            trace!(conn = %existing.id(), %token, "lost adoption race, discarding duplicate session");
            conn.session().close();
            return Ok(existing);
        }

        self.conns.write().insert(id, Arc::clone(&conn));
        debug!(conn = %id, %token, "connection adopted");
        tokio::spawn(run_inbound(Arc::clone(&conn)));
        Ok(conn)
    }

    fn adopted_conn(&self, token: ConnToken) -> Option<Arc<Conn<M>>> {
        self.adopted
            .lock()
            .get(&token)
            .and_then(Weak::upgrade)
            .filter(|conn| !conn.is_closed())
    }

    // =========================================================================
    // Stream creation
    // =========================================================================

    /// Opens a stream on the connection chosen by the current selector over
    /// all registered connections.
    pub async fn new_stream(self: &Arc<Self>) -> SwarmResult<Stream<M>> {
        let candidates = self.conns();
        if candidates.is_empty() {
            return Err(SwarmError::NoConnections);
        }
        let selector = self.select_conn().ok_or(SwarmError::NoSelector)?;
        let best = Self::pick(selector.as_ref(), &candidates)?;
        best.open_stream(StreamMeta::default()).await
    }

    /// Opens a stream on the connection chosen by the given selector over
    /// all registered connections, ignoring the swarm's current selector.
    pub async fn new_stream_select_conn(
        self: &Arc<Self>,
        selector: &dyn ConnSelector<M>,
    ) -> SwarmResult<Stream<M>> {
        let candidates = self.conns();
        if candidates.is_empty() {
            return Err(SwarmError::NoConnections);
        }
        let best = Self::pick(selector, &candidates)?;
        best.open_stream(StreamMeta::default()).await
    }

    /// Opens a stream on a connection in the given group, chosen by the
    /// current selector over the group's members only.
    pub async fn new_stream_with_group(
        self: &Arc<Self>,
        group: &GroupId,
    ) -> SwarmResult<Stream<M>> {
        let members = self
            .groups
            .members(group)
            .ok_or_else(|| SwarmError::GroupNotFound(group.clone()))?;
        let candidates: Vec<Arc<Conn<M>>> = {
            let conns = self.conns.read();
            members.iter().filter_map(|id| conns.get(id).cloned()).collect()
        };
        if candidates.is_empty() {
            return Err(SwarmError::NoConnections);
        }
        let selector = self.select_conn().ok_or(SwarmError::NoSelector)?;
        let best = Self::pick(selector.as_ref(), &candidates)?;
        best.open_stream(StreamMeta::default()).await
    }

    /// Opens a stream on a specific connection, bypassing selection.
    pub async fn new_stream_with_conn(
        self: &Arc<Self>,
        conn: &Arc<Conn<M>>,
    ) -> SwarmResult<Stream<M>> {
        let owner = conn.swarm().ok_or(SwarmError::WrongSwarm)?;
        if !Arc::ptr_eq(&owner, self) {
            return Err(SwarmError::WrongSwarm);
        }
        if !self.conns.read().contains_key(&conn.id()) {
            return Err(SwarmError::NotRegistered);
        }
        conn.open_stream(StreamMeta::default()).await
    }

    /// Adopts a raw transport connection and opens a stream on it.
    pub async fn new_stream_with_transport_conn(
        self: &Arc<Self>,
        raw: M::Conn,
    ) -> SwarmResult<Stream<M>> {
        let conn = self.add_conn(raw).await?;
        self.new_stream_with_conn(&conn).await
    }

    /// Validates the selector's pick against the candidate set.
    fn pick(
        selector: &dyn ConnSelector<M>,
        candidates: &[Arc<Conn<M>>],
    ) -> SwarmResult<Arc<Conn<M>>> {
        let best = selector
            .select(candidates)
            .ok_or(SwarmError::InvalidConnSelected)?;
        if candidates.iter().any(|c| c.id() == best.id()) {
            Ok(best)
        } else {
            Err(SwarmError::InvalidConnSelected)
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Closes the swarm: stops all listeners and closes all connections,
    /// which cascades to every registered stream and group membership.
    pub fn close(&self) {
        debug!("closing swarm");
        for listener in self.listeners() {
            listener.close();
        }
        for conn in self.conns() {
            conn.close();
        }
    }

    // =========================================================================
    // Internal registry maintenance
    // =========================================================================

    pub(crate) fn group_registry(&self) -> &GroupRegistry {
        &self.groups
    }

    pub(crate) fn conn_by_id(&self, id: ConnId) -> Option<Arc<Conn<M>>> {
        self.conns.read().get(&id).cloned()
    }

    pub(crate) fn register_stream(
        self: &Arc<Self>,
        conn: ConnId,
        io: SessionStreamOf<M>,
    ) -> Stream<M> {
        let id = StreamId::new(self.next_stream_id.fetch_add(1, Ordering::Relaxed));
        let state = Arc::new(StreamState::new(id, conn));
        self.streams.write().insert(id, Arc::clone(&state));
        trace!(stream = %id, conn = %conn, "stream registered");
        Stream::new(state, Arc::downgrade(self), io)
    }

    pub(crate) fn deregister_stream(&self, id: StreamId) {
        if self.streams.write().remove(&id).is_some() {
            trace!(stream = %id, "stream deregistered");
        }
    }

    pub(crate) fn deregister_conn(&self, conn: &Conn<M>) {
        {
            let mut adopted = self.adopted.lock();
            let stale = adopted
                .get(&conn.token())
                .is_some_and(|weak| match weak.upgrade() {
                    Some(current) => current.id() == conn.id(),
                    None => true,
                });
            if stale {
                adopted.remove(&conn.token());
            }
        }

        let removed = self.conns.write().remove(&conn.id()).is_some();
        self.groups.drop_conn(conn.id());

        let orphaned: Vec<Arc<StreamState>> = {
            let mut streams = self.streams.write();
            let ids: Vec<StreamId> = streams
                .iter()
                .filter(|(_, state)| state.conn() == conn.id())
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| streams.remove(id)).collect()
        };
        for state in &orphaned {
            state.mark_closed();
        }

        if removed {
            debug!(conn = %conn.id(), streams = orphaned.len(), "connection deregistered");
        }
    }

    pub(crate) fn deregister_listener(&self, id: ListenerId) {
        if self.listeners.write().remove(&id).is_some() {
            debug!(listener = %id, "listener deregistered");
        }
    }
}

impl<M: StreamMuxer> fmt::Debug for Swarm<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swarm")
            .field("conns", &self.conns.read().len())
            .field("streams", &self.streams.read().len())
            .field("listeners", &self.listeners.read().len())
            .field("groups", &self.groups.ids().len())
            .finish()
    }
}
