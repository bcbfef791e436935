//! In-process loopback transport and muxer.
//!
//! A complete implementation of all three capability traits with no real io:
//! [`conn_pair`] yields two linked raw connections, [`MemoryMuxer`] binds
//! sessions over them, and [`listener`] wires a [`MemoryListener`] to a
//! [`MemoryDialer`] handle. Logical stream payload runs over per-stream
//! [`tokio::io::duplex`] pipes; stream setup travels over internal channels
//! rather than framed bytes, since wire framing is a muxer implementation
//! concern this loopback does not need.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use skein_primitives::ConnToken;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::debug;

use crate::{
    ConnError, ListenAddr, ListenerError, MuxedSession, SessionError, StreamMeta, StreamMuxer,
    TransportConn, TransportListener,
};

/// Buffer size of each logical stream's byte pipe.
const STREAM_BUF: usize = 64 * 1024;

/// Buffer size of the raw connection byte pipe.
const CONN_BUF: usize = 64 * 1024;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// State shared by both ends of a connection pair.
///
/// Closing the link models closing the underlying transport connection:
/// both sessions stop accepting and every live stream's io fails.
#[derive(Debug)]
struct Link {
    closed: AtomicBool,
    close_notify: Notify,
    stream_flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl Link {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            stream_flags: Mutex::new(Vec::new()),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn register_stream(&self, flag: Arc<AtomicBool>) {
        self.stream_flags.lock().push(flag);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for flag in self.stream_flags.lock().drain(..) {
            flag.store(true, Ordering::SeqCst);
        }
        self.close_notify.notify_waiters();
        debug!("memory link closed");
    }
}

/// One logical stream of a [`MemorySession`].
///
/// Payload io is a dedicated duplex pipe; once the owning session (either
/// side) closes, every io call fails on its next poll.
pub struct MemoryStream {
    io: DuplexStream,
    killed: Arc<AtomicBool>,
    meta: StreamMeta,
}

impl MemoryStream {
    fn new(io: DuplexStream, killed: Arc<AtomicBool>, meta: StreamMeta) -> Self {
        Self { io, killed, meta }
    }

    /// Metadata the opener attached to this stream.
    pub fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    fn check_killed(&self) -> io::Result<()> {
        if self.killed.load(Ordering::SeqCst) {
            Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "session closed",
            ))
        } else {
            Ok(())
        }
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Err(err) = self.check_killed() {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Err(err) = self.check_killed() {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Err(err) = self.check_killed() {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

/// One end of an in-process connection pair.
///
/// The raw byte pipe is linked end to end like any transport connection;
/// [`MemoryMuxer`] multiplexes over the internal control link instead of
/// framing bytes over it.
#[derive(Debug)]
pub struct MemoryConn {
    token: ConnToken,
    io: DuplexStream,
    link: Arc<Link>,
    stream_tx: UnboundedSender<MemoryStream>,
    stream_rx: UnboundedReceiver<MemoryStream>,
}

impl AsyncRead for MemoryConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryConn {
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
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl TransportConn for MemoryConn {
    fn token(&self) -> ConnToken {
        self.token
    }
}

/// Two linked raw connections. Each end carries its own [`ConnToken`]: the
/// ends are distinct connections belonging to (potentially) distinct swarms.
pub fn conn_pair() -> (MemoryConn, MemoryConn) {
    let link = Link::new();
    let (a_io, b_io) = tokio::io::duplex(CONN_BUF);
    let (a_tx, b_rx) = unbounded_channel();
    let (b_tx, a_rx) = unbounded_channel();

    let a = MemoryConn {
        token: ConnToken::new(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)),
        io: a_io,
        link: Arc::clone(&link),
        stream_tx: a_tx,
        stream_rx: a_rx,
    };
    let b = MemoryConn {
        token: ConnToken::new(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)),
        io: b_io,
        link,
        stream_tx: b_tx,
        stream_rx: b_rx,
    };
    (a, b)
}

/// Session over one end of a connection pair.
pub struct MemorySession {
    link: Arc<Link>,
    stream_tx: UnboundedSender<MemoryStream>,
    stream_rx: AsyncMutex<UnboundedReceiver<MemoryStream>>,
}

#[async_trait]
impl MuxedSession for MemorySession {
    type Stream = MemoryStream;

    async fn open_stream(&self, meta: StreamMeta) -> Result<MemoryStream, SessionError> {
        if self.link.is_closed() {
            return Err(SessionError::Closed);
        }
        let (local_io, remote_io) = tokio::io::duplex(STREAM_BUF);
        let killed = Arc::new(AtomicBool::new(false));
        self.link.register_stream(Arc::clone(&killed));

        let local = MemoryStream::new(local_io, Arc::clone(&killed), meta.clone());
        let remote = MemoryStream::new(remote_io, killed, meta);
        self.stream_tx
            .send(remote)
            .map_err(|_| SessionError::Closed)?;
        Ok(local)
    }

    async fn accept_stream(&self) -> Option<MemoryStream> {
        let mut rx = self.stream_rx.lock().await;
        let closed = self.link.close_notify.notified();
        if self.link.is_closed() {
            return None;
        }
        tokio::select! {
            stream = rx.recv() => stream,
            _ = closed => None,
        }
    }

    fn close(&self) {
        self.link.close();
    }

    fn is_closed(&self) -> bool {
        self.link.is_closed()
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.link.close();
    }
}

/// Muxer for [`MemoryConn`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryMuxer;

#[async_trait]
impl StreamMuxer for MemoryMuxer {
    type Conn = MemoryConn;
    type Session = MemorySession;

    async fn upgrade(&self, conn: MemoryConn) -> Result<MemorySession, ConnError> {
        if conn.link.is_closed() {
            return Err(ConnError::Unusable("connection closed".into()));
        }
        let MemoryConn {
            link,
            stream_tx,
            stream_rx,
            ..
        } = conn;
        Ok(MemorySession {
            link,
            stream_tx,
            stream_rx: AsyncMutex::new(stream_rx),
        })
    }
}

/// Listener fed by [`MemoryDialer`] handles.
pub struct MemoryListener {
    addr: ListenAddr,
    conn_rx: AsyncMutex<UnboundedReceiver<MemoryConn>>,
    closed: Arc<AtomicBool>,
    close_notify: Notify,
}

/// Dialing handle paired with a [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryDialer {
    conn_tx: UnboundedSender<MemoryConn>,
    closed: Arc<AtomicBool>,
}

impl MemoryDialer {
    /// Dials the paired listener, returning the caller's end of a fresh
    /// connection pair. Fails once the listener is closed or gone.
    pub fn dial(&self) -> Result<MemoryConn, ListenerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ListenerError::Closed);
        }
        let (local, remote) = conn_pair();
        self.conn_tx
            .send(remote)
            .map_err(|_| ListenerError::Closed)?;
        Ok(local)
    }
}

/// A linked listener/dialer pair with a fresh `memory://N` address.
pub fn listener() -> (MemoryListener, MemoryDialer) {
    let (conn_tx, conn_rx) = unbounded_channel();
    let n = NEXT_LISTENER.fetch_add(1, Ordering::Relaxed);
    let closed = Arc::new(AtomicBool::new(false));
    let listener = MemoryListener {
        addr: ListenAddr::new(format!("memory://{n}")),
        conn_rx: AsyncMutex::new(conn_rx),
        closed: Arc::clone(&closed),
        close_notify: Notify::new(),
    };
    (listener, MemoryDialer { conn_tx, closed })
}

#[async_trait]
impl TransportListener for MemoryListener {
    type Conn = MemoryConn;

    async fn accept(&self) -> Result<MemoryConn, ListenerError> {
        let mut rx = self.conn_rx.lock().await;
        let closed = self.close_notify.notified();
        if self.closed.load(Ordering::SeqCst) {
            return Err(ListenerError::Closed);
        }
        tokio::select! {
            conn = rx.recv() => conn.ok_or(ListenerError::Closed),
            _ = closed => Err(ListenerError::Closed),
        }
    }

    fn local_addr(&self) -> Result<ListenAddr, ListenerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ListenerError::Closed);
        }
        Ok(self.addr.clone())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close_notify.notify_waiters();
        debug!(addr = %self.addr, "memory listener closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MuxedSession;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_raw_conn_pipe_is_linked() {
        let (mut a, mut b) = conn_pair();
        assert_ne!(a.token(), b.token());

        a.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_open_stream_reaches_peer() {
        let (a, b) = conn_pair();
        let muxer = MemoryMuxer;
        let sa = muxer.upgrade(a).await.unwrap();
        let sb = muxer.upgrade(b).await.unwrap();

        let mut out = sa
            .open_stream(StreamMeta::for_protocol("/echo/1.0.0"))
            .await
            .unwrap();
        let mut inc = sb.accept_stream().await.unwrap();
        assert_eq!(inc.meta().protocol(), Some("/echo/1.0.0"));

        out.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        inc.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        // And the other direction over the same stream.
        inc.write_all(b"world").await.unwrap();
        out.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn test_session_close_fails_stream_io() {
        let (a, b) = conn_pair();
        let muxer = MemoryMuxer;
        let sa = muxer.upgrade(a).await.unwrap();
        let sb = muxer.upgrade(b).await.unwrap();

        let mut out = sa.open_stream(StreamMeta::new()).await.unwrap();
        let _inc = sb.accept_stream().await.unwrap();

        sa.close();
        assert!(sa.is_closed());
        // The link is shared: the peer session observes the closure too.
        assert!(sb.is_closed());
        assert!(sb.accept_stream().await.is_none());

        let err = out.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);

        assert!(matches!(
            sa.open_stream(StreamMeta::new()).await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_listener_accept_and_close() {
        let (listener, dialer) = listener();
        assert!(listener.local_addr().unwrap().as_str().starts_with("memory://"));

        let local = dialer.dial().unwrap();
        let accepted = listener.accept().await.unwrap();
        assert_ne!(local.token(), accepted.token());

        listener.close();
        assert!(matches!(listener.accept().await, Err(ListenerError::Closed)));
        assert!(matches!(listener.local_addr(), Err(ListenerError::Closed)));
        assert!(matches!(dialer.dial(), Err(ListenerError::Closed)));
    }

    #[tokio::test]
    async fn test_accept_unblocks_on_close() {
        let (listener, _dialer) = listener();
        let listener = std::sync::Arc::new(listener);
        let waiter = {
            let listener = std::sync::Arc::clone(&listener);
            tokio::spawn(async move { listener.accept().await })
        };
        tokio::task::yield_now().await;
        listener.close();
        let res = waiter.await.unwrap();
        assert!(matches!(res, Err(ListenerError::Closed)));
    }
}
