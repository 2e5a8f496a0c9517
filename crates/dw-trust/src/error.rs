//! Trust-layer error types.
//!
//! ## Security Note
//!
//! Error messages must not leak secrets; they may carry certificate
//! metadata, which is public by construction.

use thiserror::Error;

use crate::certificate::CertificateChain;

/// Errors raised by the trust store and evaluator.
#[derive(Debug, Error)]
pub enum TrustError {
    /// An entry with this alias already exists in the store.
    #[error("certificate alias already exists: {0}")]
    DuplicateAlias(String),

    /// No entry with this alias exists in the store.
    #[error("certificate alias not found: {0}")]
    NotFound(String),

    /// A certificate chain was rejected during trust evaluation.
    ///
    /// Carries the full rejected chain (leaf first) so a human operator
    /// can inspect it and decide whether to import the certificate.
    #[error("server certificate not trusted: {cause}")]
    NotTrusted {
        /// The rejected chain, leaf first.
        chain: CertificateChain,
        /// Human-readable rejection cause.
        cause: String,
    },

    /// Certificate bytes could not be parsed.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The persisted store could not be read or written.
    #[error("trust store persistence error: {0}")]
    Persistence(String),
}

impl TrustError {
    /// Creates an invalid-certificate error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidCertificate(msg.into())
    }

    /// Creates a persistence error.
    #[must_use]
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Checks whether this error is caller misuse (bad alias) rather than
    /// a trust or storage condition.
    #[must_use]
    pub const fn is_alias_error(&self) -> bool {
        matches!(self, Self::DuplicateAlias(_) | Self::NotFound(_))
    }

    /// Checks whether this error carries a rejected certificate chain.
    #[must_use]
    pub const fn is_trust_rejection(&self) -> bool {
        matches!(self, Self::NotTrusted { .. })
    }
}

/// Result type for trust operations.
pub type TrustResult<T> = Result<T, TrustError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_categories() {
        assert!(TrustError::DuplicateAlias("a".into()).is_alias_error());
        assert!(TrustError::NotFound("a".into()).is_alias_error());
        assert!(!TrustError::invalid("garbage").is_alias_error());

        let rejection = TrustError::NotTrusted {
            chain: CertificateChain::default(),
            cause: "trust store is empty".into(),
        };
        assert!(rejection.is_trust_rejection());
        assert!(!rejection.is_alias_error());
    }

    #[test]
    fn rejection_message_carries_cause() {
        let rejection = TrustError::NotTrusted {
            chain: CertificateChain::default(),
            cause: "no matching trusted entry".into(),
        };
        assert!(rejection.to_string().contains("no matching trusted entry"));
    }
}
