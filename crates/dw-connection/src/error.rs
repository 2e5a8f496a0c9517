//! Connection-layer error types.
//!
//! ## Security Note
//!
//! Error messages must not leak bind credentials. Certificate chains are
//! public material and are carried intact so trust failures stay
//! actionable.

use dw_trust::{CertificateChain, TrustError};
use thiserror::Error;

/// Errors raised while establishing or using pooled connections.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Invalid profile or client configuration.
    #[error("connection configuration error: {0}")]
    Configuration(String),

    /// Host unreachable, connection reset, handshake transport failure.
    /// Retryable by the caller; never retried silently beyond the pool's
    /// one-shot stale-connection replacement.
    #[error("network error: {0}")]
    Network(String),

    /// Credentials rejected by the server. Never retried automatically.
    #[error("bind failed: {0}")]
    Bind(String),

    /// The server's certificate chain was rejected during the handshake.
    ///
    /// The only error with a defined recovery path: present the chain,
    /// let the operator import it, retry the connection.
    #[error("server certificate not trusted: {cause}")]
    TrustFailure {
        /// The rejected chain, leaf first.
        chain: CertificateChain,
        /// Human-readable rejection cause.
        cause: String,
    },

    /// Pool at capacity and the bounded wait elapsed. Retryable after
    /// backoff.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The pool is draining or closed and accepts no new checkouts.
    #[error("connection pool closed: {0}")]
    PoolClosed(String),

    /// Search operation failed.
    #[error("search failed: {0}")]
    Search(String),

    /// Trust-store error surfaced through the connection layer.
    #[error("trust error: {0}")]
    Trust(String),

    /// Underlying protocol error.
    #[error("LDAP protocol error: {0}")]
    Protocol(#[from] ldap3::LdapError),
}

impl ConnectionError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a bind error.
    #[must_use]
    pub fn bind(msg: impl Into<String>) -> Self {
        Self::Bind(msg.into())
    }

    /// Checks whether the caller may reasonably retry as-is.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::PoolExhausted)
    }

    /// Checks whether this error carries a rejected certificate chain,
    /// i.e. whether the import-retry workflow applies.
    #[must_use]
    pub const fn is_trust_failure(&self) -> bool {
        matches!(self, Self::TrustFailure { .. })
    }
}

impl From<TrustError> for ConnectionError {
    fn from(err: TrustError) -> Self {
        match err {
            TrustError::NotTrusted { chain, cause } => Self::TrustFailure { chain, cause },
            other => Self::Trust(other.to_string()),
        }
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_categories() {
        assert!(ConnectionError::network("refused").is_retryable());
        assert!(ConnectionError::PoolExhausted.is_retryable());
        assert!(!ConnectionError::bind("invalid credentials").is_retryable());
        assert!(!ConnectionError::PoolClosed("dir1".into()).is_retryable());
    }

    #[test]
    fn trust_rejection_converts_with_chain_intact() {
        let chain = CertificateChain::from_der_chain(vec![vec![1, 2, 3]]);
        let err: ConnectionError = TrustError::NotTrusted {
            chain: chain.clone(),
            cause: "trust store is empty".into(),
        }
        .into();

        assert!(err.is_trust_failure());
        match err {
            ConnectionError::TrustFailure { chain: carried, .. } => assert_eq!(carried, chain),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn other_trust_errors_convert_to_trust_variant() {
        let err: ConnectionError = TrustError::DuplicateAlias("dir1".into()).into();
        assert!(matches!(err, ConnectionError::Trust(_)));
    }
}
