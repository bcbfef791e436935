//! Stream-open metadata and listener addressing.

use std::fmt;

/// Metadata attached to an outbound logical stream open.
///
/// Carried to the accepting side by muxer implementations that support it.
/// The swarm treats it as opaque.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMeta {
    protocol: Option<String>,
    headers: Vec<(String, String)>,
}

impl StreamMeta {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata labeled with a protocol name.
    pub fn for_protocol(protocol: impl Into<String>) -> Self {
        Self {
            protocol: Some(protocol.into()),
            headers: Vec::new(),
        }
    }

    /// Appends a key/value header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// The protocol label, if any.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// All headers, in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// Address a transport listener is bound to.
///
/// Purely informational at the swarm layer; the format is transport-specific
/// (e.g. `memory://3` for the in-memory transport).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenAddr(String);

impl ListenAddr {
    /// Wraps a transport-specific address string.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
