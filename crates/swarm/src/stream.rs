//! Logical stream handles.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use skein_primitives::{ConnId, StreamId};
use skein_transport::{MuxedSession, StreamMuxer};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::Swarm;

/// The muxed stream type produced by `M`'s sessions.
pub(crate) type SessionStreamOf<M> = <<M as StreamMuxer>::Session as MuxedSession>::Stream;

/// Registry-shared stream bookkeeping.
///
/// The swarm's stream registry and the caller-held [`Stream`] handle share
/// one of these, so a connection-close cascade can mark a stream closed
/// without reaching into io the caller exclusively owns.
pub(crate) struct StreamState {
    id: StreamId,
    conn: ConnId,
    closed: AtomicBool,
}

impl StreamState {
    pub(crate) fn new(id: StreamId, conn: ConnId) -> Self {
        Self {
            id,
            conn,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    pub(crate) fn conn(&self) -> ConnId {
        self.conn
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Point-in-time description of a registered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamInfo {
    /// The stream's handle.
    pub id: StreamId,
    /// The connection it is multiplexed over.
    pub conn: ConnId,
}

/// One logical bidirectional stream multiplexed over a connection.
///
/// Exclusively owned by its holder; reads and writes pass straight through
/// to the muxer. Placement was decided at creation time, so the handle
/// carries no routing logic. Closing (or dropping) the handle detaches it
/// from the swarm's stream registry.
pub struct Stream<M: StreamMuxer> {
    state: Arc<StreamState>,
    swarm: Weak<Swarm<M>>,
    io: SessionStreamOf<M>,
}

impl<M: StreamMuxer> Stream<M> {
    pub(crate) fn new(state: Arc<StreamState>, swarm: Weak<Swarm<M>>, io: SessionStreamOf<M>) -> Self {
        Self { state, swarm, io }
    }

    /// The stream's handle.
    pub fn id(&self) -> StreamId {
        self.state.id()
    }

    /// The connection this stream is multiplexed over.
    pub fn conn_id(&self) -> ConnId {
        self.state.conn()
    }

    /// The owning connection, if it is still registered.
    pub fn conn(&self) -> Option<Arc<crate::Conn<M>>> {
        self.swarm.upgrade()?.conn_by_id(self.state.conn())
    }

    /// Whether the stream was closed, explicitly or by its connection going
    /// away.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Closes the stream: signals end-of-stream to the peer and detaches
    /// from the swarm's stream registry.
    pub async fn close(&mut self) -> io::Result<()> {
        let res = self.io.shutdown().await;
        self.detach();
        res
    }

    /// Marks the stream closed and removes it from the registry. Idempotent;
    /// a no-op if the owning connection's close cascade got there first.
    fn detach(&self) {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(swarm) = self.swarm.upgrade() {
            swarm.deregister_stream(self.state.id());
        }
    }
}

impl<M: StreamMuxer> AsyncRead for Stream<M> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl<M: StreamMuxer> AsyncWrite for Stream<M> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let res = Pin::new(&mut self.io).poll_shutdown(cx);
        if matches!(res, Poll::Ready(Ok(()))) {
            self.detach();
        }
        res
    }
}

impl<M: StreamMuxer> Drop for Stream<M> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<M: StreamMuxer> fmt::Debug for Stream<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.state.id())
            .field("conn", &self.state.conn())
            .field("closed", &self.state.is_closed())
            .finish()
    }
}
