//! Certificate parsing and metadata.
//!
//! A [`TrustedCertificate`] is an opaque DER blob plus metadata derived on
//! demand with `x509-parser`. Equality is exact binary equality of the DER
//! encoding, which is also the membership test the evaluator uses.

use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::error::{TrustError, TrustResult};

/// A single X.509 certificate held as its DER encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedCertificate {
    der: Vec<u8>,
}

impl TrustedCertificate {
    /// Creates a certificate from DER bytes.
    ///
    /// The bytes are parsed once to reject garbage early; only the raw
    /// encoding is retained.
    pub fn from_der(der: Vec<u8>) -> TrustResult<Self> {
        parse_x509_certificate(&der)
            .map_err(|e| TrustError::invalid(format!("DER parse failed: {e}")))?;
        Ok(Self { der })
    }

    /// Creates a certificate from PEM text (pasted or uploaded).
    ///
    /// Only the first PEM block is used.
    pub fn from_pem(pem: &str) -> TrustResult<Self> {
        let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
            .map_err(|e| TrustError::invalid(format!("PEM parse failed: {e}")))?;
        Self::from_der(parsed.contents)
    }

    /// Returns the DER encoding.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the SHA-256 fingerprint as lowercase hex.
    #[must_use]
    pub fn fingerprint_sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    /// Derives the operator-facing metadata for this certificate.
    pub fn details(&self) -> TrustResult<CertificateDetails> {
        let (_, cert) = parse_x509_certificate(&self.der)
            .map_err(|e| TrustError::invalid(format!("DER parse failed: {e}")))?;

        Ok(CertificateDetails {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: cert.raw_serial_as_string(),
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            is_self_signed: cert.subject() == cert.issuer(),
            fingerprint_sha256: self.fingerprint_sha256(),
        })
    }
}

/// Metadata shown on the certificate management screen and in the
/// import dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDetails {
    /// Subject distinguished name.
    pub subject: String,
    /// Issuer distinguished name.
    pub issuer: String,
    /// Serial number, hex-encoded.
    pub serial: String,
    /// Validity start, unix seconds.
    pub not_before: i64,
    /// Validity end, unix seconds.
    pub not_after: i64,
    /// Whether subject equals issuer.
    pub is_self_signed: bool,
    /// SHA-256 fingerprint, lowercase hex.
    pub fingerprint_sha256: String,
}

/// An ordered certificate chain as presented by a server, leaf first.
///
/// Chain elements are raw DER; elements that fail to parse are still
/// carried so the operator sees exactly what the server sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateChain {
    ders: Vec<Vec<u8>>,
}

impl CertificateChain {
    /// Builds a chain from DER-encoded certificates, leaf first.
    #[must_use]
    pub fn from_der_chain(ders: Vec<Vec<u8>>) -> Self {
        Self { ders }
    }

    /// Returns the leaf (end-entity) certificate, if any.
    #[must_use]
    pub fn leaf(&self) -> Option<&[u8]> {
        self.ders.first().map(Vec::as_slice)
    }

    /// Returns the number of certificates in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ders.len()
    }

    /// Checks whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ders.is_empty()
    }

    /// Iterates over the DER encodings, leaf first.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.ders.iter().map(Vec::as_slice)
    }

    /// Parses every chain element that is well-formed into its metadata,
    /// for display alongside the rejection cause.
    #[must_use]
    pub fn details(&self) -> Vec<CertificateDetails> {
        self.ders
            .iter()
            .filter_map(|der| {
                TrustedCertificate::from_der(der.clone())
                    .and_then(|c| c.details())
                    .ok()
            })
            .collect()
    }
}
