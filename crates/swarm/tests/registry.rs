//! Registry semantics: adoption, accounting, selection validation, groups
//! and cascade close, exercised against a minimal fake muxer.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use assert_matches::assert_matches;
use async_trait::async_trait;
use skein_swarm::{Conn, GroupId, Swarm, SwarmError};
use skein_transport::{
    ConnError, MuxedSession, SessionError, StreamMeta, StreamMuxer, TransportConn,
};
use skein_primitives::ConnToken;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::Notify;

/// Raw connection with a settable token and inert io.
struct FakeConn {
    token: ConnToken,
}

impl FakeConn {
    fn new(token: u64) -> Self {
        Self {
            token: ConnToken::new(token),
        }
    }
}

impl AsyncRead for FakeConn {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for FakeConn {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl TransportConn for FakeConn {
    fn token(&self) -> ConnToken {
        self.token
    }
}

/// Session that opens working stream pipes and never yields inbound streams.
struct FakeSession {
    closed: AtomicBool,
    close_notify: Notify,
    peers: parking_lot::Mutex<Vec<DuplexStream>>,
}

impl FakeSession {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            peers: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MuxedSession for FakeSession {
    type Stream = DuplexStream;

    async fn open_stream(&self, _meta: StreamMeta) -> Result<DuplexStream, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let (local, remote) = tokio::io::duplex(64);
        self.peers.lock().push(remote);
        Ok(local)
    }

    async fn accept_stream(&self) -> Option<DuplexStream> {
        let closed = self.close_notify.notified();
        if self.is_closed() {
            return None;
        }
        closed.await;
        None
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_notify.notify_waiters();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FakeMuxer;

#[async_trait]
impl StreamMuxer for FakeMuxer {
    type Conn = FakeConn;
    type Session = FakeSession;

    async fn upgrade(&self, _conn: FakeConn) -> Result<FakeSession, ConnError> {
        Ok(FakeSession::new())
    }
}

/// Selector pinned to one connection id, by way of the closure blanket impl.
fn pinned_selector(
    target: skein_swarm::ConnId,
) -> impl Fn(&[Arc<Conn<FakeMuxer>>]) -> Option<Arc<Conn<FakeMuxer>>> + Send + Sync {
    move |candidates: &[Arc<Conn<FakeMuxer>>]| {
        candidates.iter().find(|c| c.id() == target).cloned()
    }
}

#[tokio::test]
async fn test_conn_accounting_across_add_and_close() {
    let swarm = Swarm::new(FakeMuxer);

    let c1 = swarm.add_conn(FakeConn::new(1)).await.unwrap();
    let c2 = swarm.add_conn(FakeConn::new(2)).await.unwrap();
    let c3 = swarm.add_conn(FakeConn::new(3)).await.unwrap();
    assert_eq!(swarm.conns().len(), 3);

    c2.close();
    assert_eq!(swarm.conns().len(), 2);
    assert!(c2.is_closed());
    assert!(!c1.is_closed());
    assert!(!c3.is_closed());

    c1.close();
    c3.close();
    assert!(swarm.conns().is_empty());
}

#[tokio::test]
async fn test_add_conn_is_idempotent() {
    let swarm = Swarm::new(FakeMuxer);

    let first = swarm.add_conn(FakeConn::new(7)).await.unwrap();
    let second = swarm.add_conn(FakeConn::new(7)).await.unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(swarm.conns().len(), 1);
}

#[tokio::test]
async fn test_token_is_reusable_after_close() {
    let swarm = Swarm::new(FakeMuxer);

    let first = swarm.add_conn(FakeConn::new(7)).await.unwrap();
    first.close();

    let second = swarm.add_conn(FakeConn::new(7)).await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(swarm.conns().len(), 1);
}

#[tokio::test]
async fn test_pinned_selector_places_stream() {
    let swarm = Swarm::new(FakeMuxer);
    let a = swarm.add_conn(FakeConn::new(1)).await.unwrap();
    let _b = swarm.add_conn(FakeConn::new(2)).await.unwrap();

    swarm.set_select_conn(Some(Arc::new(pinned_selector(a.id()))));

    let stream = swarm.new_stream().await.unwrap();
    assert_eq!(stream.conn_id(), a.id());
    assert_eq!(stream.conn().map(|c| c.id()), Some(a.id()));

    let streams = swarm.streams();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams.first().map(|s| s.id), Some(stream.id()));
    assert_eq!(streams.first().map(|s| s.conn), Some(a.id()));
}

#[tokio::test]
async fn test_selector_outside_candidate_set_is_rejected() {
    let swarm = Swarm::new(FakeMuxer);
    let _a = swarm.add_conn(FakeConn::new(1)).await.unwrap();

    // A conn registered with a different swarm is outside any candidate set
    // this swarm offers.
    let other_swarm = Swarm::new(FakeMuxer);
    let foreign = other_swarm.add_conn(FakeConn::new(9)).await.unwrap();

    let rogue = move |_: &[Arc<Conn<FakeMuxer>>]| Some(Arc::clone(&foreign));
    let err = swarm.new_stream_select_conn(&rogue).await.unwrap_err();
    assert_matches!(err, SwarmError::InvalidConnSelected);
    assert!(swarm.streams().is_empty());

    // Refusing outright is the same contract violation.
    let refusing =
        |_: &[Arc<Conn<FakeMuxer>>]| -> Option<Arc<Conn<FakeMuxer>>> { None };
    let err = swarm.new_stream_select_conn(&refusing).await.unwrap_err();
    assert_matches!(err, SwarmError::InvalidConnSelected);
    assert!(swarm.streams().is_empty());
}

#[tokio::test]
async fn test_new_stream_with_group_unknown_group() {
    let swarm = Swarm::new(FakeMuxer);
    let conn = swarm.add_conn(FakeConn::new(1)).await.unwrap();
    conn.join_group("known").unwrap();

    let err = swarm
        .new_stream_with_group(&GroupId::from("unknown"))
        .await
        .unwrap_err();
    assert_matches!(err, SwarmError::GroupNotFound(ref id) if id.as_str() == "unknown");

    // No side effects on any registry.
    assert_eq!(swarm.conns().len(), 1);
    assert!(swarm.streams().is_empty());
    assert_eq!(swarm.group_ids(), vec![GroupId::from("known")]);
}

#[tokio::test]
async fn test_group_scopes_selection() {
    let swarm = Swarm::new(FakeMuxer);
    let a = swarm.add_conn(FakeConn::new(1)).await.unwrap();
    let b = swarm.add_conn(FakeConn::new(2)).await.unwrap();

    let group = GroupId::from("peer-x");
    a.join_group(group.clone()).unwrap();

    assert!(a.in_group(&group));
    assert!(!b.in_group(&group));
    assert_eq!(swarm.conns_with_group(&group).len(), 1);

    // The default random selector only ever sees the group's members.
    for _ in 0..10 {
        let stream = swarm.new_stream_with_group(&group).await.unwrap();
        assert_eq!(stream.conn_id(), a.id());
    }
}

#[tokio::test]
async fn test_group_membership_updates() {
    let swarm = Swarm::new(FakeMuxer);
    let conn = swarm.add_conn(FakeConn::new(1)).await.unwrap();

    let group = GroupId::from("peer-x");
    conn.join_group(group.clone()).unwrap();
    assert_eq!(conn.groups(), vec![group.clone()]);

    conn.leave_group(&group).unwrap();
    assert!(conn.groups().is_empty());
    // The emptied group is gone entirely.
    assert_matches!(
        swarm.new_stream_with_group(&group).await,
        Err(SwarmError::GroupNotFound(_))
    );
}

#[tokio::test]
async fn test_new_stream_with_conn_validation() {
    let swarm = Swarm::new(FakeMuxer);
    let other_swarm = Swarm::new(FakeMuxer);

    let ours = swarm.add_conn(FakeConn::new(1)).await.unwrap();
    let theirs = other_swarm.add_conn(FakeConn::new(2)).await.unwrap();

    assert_matches!(
        swarm.new_stream_with_conn(&theirs).await,
        Err(SwarmError::WrongSwarm)
    );

    ours.close();
    assert_matches!(
        swarm.new_stream_with_conn(&ours).await,
        Err(SwarmError::NotRegistered)
    );

    let live = swarm.add_conn(FakeConn::new(3)).await.unwrap();
    let stream = swarm.new_stream_with_conn(&live).await.unwrap();
    assert_eq!(stream.conn_id(), live.id());
}

#[tokio::test]
async fn test_conn_close_cascades_to_streams_and_groups() {
    let swarm = Swarm::new(FakeMuxer);
    let conn = swarm.add_conn(FakeConn::new(1)).await.unwrap();
    let bystander = swarm.add_conn(FakeConn::new(2)).await.unwrap();

    let group = GroupId::from("peer-x");
    conn.join_group(group.clone()).unwrap();
    bystander.join_group(group.clone()).unwrap();

    let s1 = swarm.new_stream_with_conn(&conn).await.unwrap();
    let s2 = swarm.new_stream_with_conn(&conn).await.unwrap();
    let s3 = swarm.new_stream_with_conn(&conn).await.unwrap();
    let other = swarm.new_stream_with_conn(&bystander).await.unwrap();
    assert_eq!(swarm.streams().len(), 4);

    conn.close();

    // All three of the closed conn's streams are gone and marked closed;
    // the bystander's stream survives.
    assert!(s1.is_closed());
    assert!(s2.is_closed());
    assert!(s3.is_closed());
    assert!(s1.conn().is_none());
    assert!(!other.is_closed());
    let remaining = swarm.streams();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining.first().map(|s| s.id), Some(other.id()));

    // The conn is out of its groups and out of the registry.
    assert!(!conn.in_group(&group));
    assert_eq!(swarm.conns_with_group(&group).len(), 1);
    assert_eq!(swarm.conns().len(), 1);
}

#[tokio::test]
async fn test_stream_close_detaches_from_registry() {
    let swarm = Swarm::new(FakeMuxer);
    let conn = swarm.add_conn(FakeConn::new(1)).await.unwrap();

    let mut stream = swarm.new_stream_with_conn(&conn).await.unwrap();
    assert_eq!(swarm.streams().len(), 1);

    stream.close().await.unwrap();
    assert!(stream.is_closed());
    assert!(swarm.streams().is_empty());

    // Dropping an unclosed stream detaches as well.
    let stream = swarm.new_stream_with_conn(&conn).await.unwrap();
    assert_eq!(swarm.streams().len(), 1);
    drop(stream);
    assert!(swarm.streams().is_empty());
}

#[tokio::test]
async fn test_closed_conn_rejects_group_join() {
    let swarm = Swarm::new(FakeMuxer);
    let conn = swarm.add_conn(FakeConn::new(1)).await.unwrap();
    conn.close();

    assert_matches!(conn.join_group("late"), Err(SwarmError::ConnClosed));
    assert!(swarm.group_ids().is_empty());
}

#[tokio::test]
async fn test_swarm_close_drains_everything() {
    let swarm = Swarm::new(FakeMuxer);
    let a = swarm.add_conn(FakeConn::new(1)).await.unwrap();
    let _b = swarm.add_conn(FakeConn::new(2)).await.unwrap();
    a.join_group("peer-x").unwrap();
    let stream = swarm.new_stream_with_conn(&a).await.unwrap();

    swarm.close();

    assert!(swarm.conns().is_empty());
    assert!(swarm.streams().is_empty());
    assert!(swarm.listeners().is_empty());
    assert!(swarm.group_ids().is_empty());
    assert!(stream.is_closed());
    assert_matches!(swarm.new_stream().await, Err(SwarmError::NoConnections));
}

#[tokio::test]
async fn test_selector_error_ordering_matches_contract() {
    let swarm: Arc<Swarm<FakeMuxer>> = Swarm::new(FakeMuxer);

    // Empty registry wins over an uninstalled selector.
    swarm.set_select_conn(None);
    assert_matches!(swarm.new_stream().await, Err(SwarmError::NoConnections));

    // With candidates present, the missing selector surfaces.
    let _conn = swarm.add_conn(FakeConn::new(1)).await.unwrap();
    assert_matches!(swarm.new_stream().await, Err(SwarmError::NoSelector));

    // Reinstalling the default restores service.
    swarm.set_select_conn(Some(Arc::new(skein_swarm::RandomSelector)));
    assert!(swarm.new_stream().await.is_ok());
}
