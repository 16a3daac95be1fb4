use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Failure of one query against one server. Absorbed by the resolution loop,
/// which moves on to the next candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("query to {server} timed out after {timeout:?}")]
    Timeout { server: SocketAddr, timeout: Duration },

    #[error("connection to {server} failed: {reason}")]
    Io { server: SocketAddr, reason: String },

    #[error("malformed response from {server}: {reason}")]
    Protocol { server: SocketAddr, reason: String },
}

impl QueryError {
    pub fn server(&self) -> SocketAddr {
        match self {
            QueryError::Timeout { server, .. } | QueryError::Io { server, .. } | QueryError::Protocol { server, .. } => *server,
        }
    }
}

/// An NS hostname from a referral could not be turned into an address.
#[derive(Debug, Error)]
#[error("could not resolve nameserver {ns}: {source}")]
pub struct NsResolutionError {
    pub ns: String,
    #[source]
    pub source: ResolveError,
}

/// Terminal outcome of a resolution call that produced no answer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no server could answer or refer '{domain}'")]
    NotFound { domain: String },

    #[error("resolution loop for '{domain}' after {steps} steps")]
    Loop { domain: String, steps: u32 },

    #[error("{server} does not offer recursion")]
    RecursionUnsupported { server: SocketAddr },

    #[error("deadline elapsed while resolving '{domain}'")]
    Deadline { domain: String },
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool { matches!(self, ResolveError::NotFound { .. }) }
    pub fn is_loop(&self) -> bool { matches!(self, ResolveError::Loop { .. }) }
    pub fn is_deadline(&self) -> bool { matches!(self, ResolveError::Deadline { .. }) }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::NotFound { .. } => "not_found",
            ResolveError::Loop { .. } => "loop",
            ResolveError::RecursionUnsupported { .. } => "recursion_unsupported",
            ResolveError::Deadline { .. } => "deadline",
        }
    }
}
