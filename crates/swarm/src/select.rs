//! Connection selection policies.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use skein_transport::StreamMuxer;

use crate::Conn;

/// Policy choosing one connection from a candidate set.
///
/// Selectors are pure: they must pick from (a clone of) the offered
/// candidates or return `None` to refuse. Returning a connection outside the
/// candidate set is a contract violation the swarm rejects with
/// [`InvalidConnSelected`](crate::SwarmError::InvalidConnSelected).
pub trait ConnSelector<M: StreamMuxer>: Send + Sync {
    /// Picks one of `candidates`, or `None` to refuse.
    fn select(&self, candidates: &[Arc<Conn<M>>]) -> Option<Arc<Conn<M>>>;
}

impl<M, F> ConnSelector<M> for F
where
    M: StreamMuxer,
    F: Fn(&[Arc<Conn<M>>]) -> Option<Arc<Conn<M>>> + Send + Sync,
{
    fn select(&self, candidates: &[Arc<Conn<M>>]) -> Option<Arc<Conn<M>>> {
        self(candidates)
    }
}

/// Default selector: uniform random over the candidate set.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl<M: StreamMuxer> ConnSelector<M> for RandomSelector {
    fn select(&self, candidates: &[Arc<Conn<M>>]) -> Option<Arc<Conn<M>>> {
        candidates.choose(&mut rand::rng()).cloned()
    }
}
