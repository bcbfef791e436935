//! Inbound stream dispatch policies.

use async_trait::async_trait;
use skein_transport::StreamMuxer;
use tracing::trace;

use crate::Stream;

/// Callback taking ownership of an inbound stream.
///
/// The handler assumes responsibility for closing the stream. That need not
/// happen before returning: keeping the stream to use and close later is
/// fine. Each inbound stream is dispatched on its own task, so a slow
/// handler never delays acceptance of further streams on the same
/// connection.
#[async_trait]
pub trait StreamHandler<M: StreamMuxer>: Send + Sync {
    /// Processes one inbound stream.
    async fn handle_stream(&self, stream: Stream<M>);
}

/// Default handler: closes inbound streams immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropHandler;

#[async_trait]
impl<M: StreamMuxer> StreamHandler<M> for DropHandler {
    async fn handle_stream(&self, mut stream: Stream<M>) {
        trace!(stream = %stream.id(), "dropping unhandled inbound stream");
        let _ = stream.close().await;
    }
}
