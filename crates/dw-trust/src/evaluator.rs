//! Handshake-time trust evaluation and failure capture.
//!
//! [`TrustEvaluator`] answers "is this certificate chain trusted?" against
//! the [`CertificateStore`](crate::store::CertificateStore) and, on
//! rejection, records the offending chain so the UI layer can present it
//! to an operator out-of-band. The evaluation runs inside the real TLS
//! handshake through [`StoreBackedVerifier`], a rustls
//! `ServerCertVerifier`; there is no second membership-check path.
//!
//! The failure record lives behind a mutex so the thread that displays it
//! (typically a UI thread) need not be the thread that attempted the
//! connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use crate::certificate::CertificateChain;
use crate::error::{TrustError, TrustResult};
use crate::store::CertificateStore;

/// A captured trust rejection: the chain the server presented and why it
/// was rejected.
///
/// At most one record is held per evaluator; a newer handshake failure
/// overwrites it, and a successful evaluation or an explicit clear erases
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustFailureRecord {
    /// The rejected chain, leaf first.
    pub chain: CertificateChain,
    /// Human-readable rejection cause.
    pub cause: String,
}

struct FailureSlot {
    seq: u64,
    record: TrustFailureRecord,
}

/// Evaluates server certificate chains against the trust store.
///
/// ## Security
///
/// Fail-closed: while the store is empty, every chain is rejected. An
/// operator must explicitly import a certificate before any server is
/// accepted.
pub struct TrustEvaluator {
    store: Arc<CertificateStore>,
    failure: Mutex<Option<FailureSlot>>,
    seq: AtomicU64,
}

impl TrustEvaluator {
    /// Creates an evaluator over the given store.
    ///
    /// The store is consulted afresh on every evaluation, so imports and
    /// deletions between handshakes take effect without rebuilding the
    /// evaluator.
    #[must_use]
    pub fn new(store: Arc<CertificateStore>) -> Self {
        Self {
            store,
            failure: Mutex::new(None),
            seq: AtomicU64::new(0),
        }
    }

    /// Evaluates a presented chain, leaf first.
    ///
    /// On rejection the failure record is stored *before* the error is
    /// returned, so a caller on another thread can retrieve it even if
    /// the connect path only surfaces the error. A successful evaluation
    /// clears any previous record.
    pub fn evaluate(&self, chain: &CertificateChain) -> TrustResult<()> {
        if chain.is_empty() {
            return Err(self.record_failure(chain.clone(), "server presented no certificate"));
        }
        if self.store.is_empty() {
            return Err(self.record_failure(
                chain.clone(),
                "trust store is empty; no server certificate has been imported yet",
            ));
        }
        if chain.iter().any(|der| self.store.contains_der(der)) {
            self.clear_failure();
            return Ok(());
        }
        Err(self.record_failure(
            chain.clone(),
            "no certificate in the presented chain matches a trusted entry",
        ))
    }

    /// Returns the most recent failure record, if one is held.
    #[must_use]
    pub fn last_failure(&self) -> Option<TrustFailureRecord> {
        self.failure_lock().as_ref().map(|s| s.record.clone())
    }

    /// Discards the stored failure record.
    pub fn clear_failure(&self) {
        *self.failure_lock() = None;
    }

    /// Returns an opaque mark of the current failure generation.
    ///
    /// The connect path takes a mark before attempting a handshake and
    /// uses [`failure_since`](Self::failure_since) afterwards to decide
    /// whether a connect error was caused by a trust rejection, without
    /// misattributing a record left over from an earlier attempt.
    #[must_use]
    pub fn failure_mark(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    /// Returns the failure record only if it was captured after `mark`.
    #[must_use]
    pub fn failure_since(&self, mark: u64) -> Option<TrustFailureRecord> {
        self.failure_lock()
            .as_ref()
            .filter(|s| s.seq > mark)
            .map(|s| s.record.clone())
    }

    fn record_failure(&self, chain: CertificateChain, cause: &str) -> TrustError {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        let record = TrustFailureRecord {
            chain: chain.clone(),
            cause: cause.to_string(),
        };
        *self.failure_lock() = Some(FailureSlot {
            seq,
            record: record.clone(),
        });
        tracing::warn!(cause, chain_len = chain.len(), "certificate chain rejected");
        TrustError::NotTrusted {
            chain,
            cause: cause.to_string(),
        }
    }

    fn failure_lock(&self) -> std::sync::MutexGuard<'_, Option<FailureSlot>> {
        self.failure.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for TrustEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustEvaluator")
            .field("store_entries", &self.store.len())
            .finish_non_exhaustive()
    }
}

/// The ring provider's signature verification algorithms, shared by all
/// verifiers below. Signature checking stays with rustls; only chain
/// validation is customized.
fn ring_signature_algorithms() -> &'static rustls::crypto::WebPkiSupportedAlgorithms {
    static ALGORITHMS: LazyLock<rustls::crypto::WebPkiSupportedAlgorithms> =
        LazyLock::new(|| rustls::crypto::ring::default_provider().signature_verification_algorithms);
    &ALGORITHMS
}

fn chain_from_presented(
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
) -> CertificateChain {
    let mut ders = Vec::with_capacity(1 + intermediates.len());
    ders.push(end_entity.as_ref().to_vec());
    ders.extend(intermediates.iter().map(|c| c.as_ref().to_vec()));
    CertificateChain::from_der_chain(ders)
}

macro_rules! delegate_signature_checks {
    () => {
        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls12_signature(message, cert, dss, ring_signature_algorithms())
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls13_signature(message, cert, dss, ring_signature_algorithms())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            ring_signature_algorithms().supported_schemes()
        }
    };
}

/// rustls verifier that delegates chain acceptance to a [`TrustEvaluator`].
///
/// This is the canonical trust decision: it runs during the actual
/// handshake of every validated connection.
#[derive(Debug)]
pub struct StoreBackedVerifier {
    evaluator: Arc<TrustEvaluator>,
}

impl StoreBackedVerifier {
    /// Creates a verifier bound to the given evaluator.
    #[must_use]
    pub fn new(evaluator: Arc<TrustEvaluator>) -> Self {
        Self { evaluator }
    }
}

impl ServerCertVerifier for StoreBackedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain = chain_from_presented(end_entity, intermediates);
        self.evaluator
            .evaluate(&chain)
            .map_err(|e| rustls::Error::General(e.to_string()))?;
        Ok(ServerCertVerified::assertion())
    }

    delegate_signature_checks!();
}

/// Verifier that accepts any server certificate.
///
/// Used only when a profile disables certificate validation for
/// short-lived diagnostic connections. Confidentiality is kept; the
/// trust evaluator and its failure record are untouched.
#[derive(Debug)]
pub struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    delegate_signature_checks!();
}

/// Verifier that accepts any certificate and keeps a copy of the
/// presented chain, for the "preview this server's certificate"
/// diagnostic flow.
#[derive(Debug, Default)]
pub struct ChainCapturingVerifier {
    captured: Mutex<Option<CertificateChain>>,
}

impl ChainCapturingVerifier {
    /// Creates an empty capturing verifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the captured chain, if a handshake has run.
    #[must_use]
    pub fn take_captured(&self) -> Option<CertificateChain> {
        self.captured.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl ServerCertVerifier for ChainCapturingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain = chain_from_presented(end_entity, intermediates);
        *self.captured.lock().unwrap_or_else(|e| e.into_inner()) = Some(chain);
        Ok(ServerCertVerified::assertion())
    }

    delegate_signature_checks!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::TrustedCertificate;

    fn test_cert(cn: &str) -> TrustedCertificate {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec![cn.to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();
        TrustedCertificate::from_der(cert.der().to_vec()).unwrap()
    }

    fn chain_of(certs: &[&TrustedCertificate]) -> CertificateChain {
        CertificateChain::from_der_chain(certs.iter().map(|c| c.der().to_vec()).collect())
    }

    #[test]
    fn empty_store_rejects_every_chain() {
        let evaluator = TrustEvaluator::new(Arc::new(CertificateStore::in_memory()));
        let cert = test_cert("dir1.example.com");

        let err = evaluator.evaluate(&chain_of(&[&cert])).unwrap_err();
        assert!(matches!(err, TrustError::NotTrusted { .. }));
        assert!(err.to_string().contains("trust store is empty"));
    }

    #[test]
    fn capture_then_clear() {
        let evaluator = TrustEvaluator::new(Arc::new(CertificateStore::in_memory()));
        let cert = test_cert("dir1.example.com");
        let chain = chain_of(&[&cert]);

        assert!(evaluator.last_failure().is_none());
        evaluator.evaluate(&chain).unwrap_err();

        let record = evaluator.last_failure().expect("failure captured");
        assert_eq!(record.chain, chain);
        assert!(!record.cause.is_empty());

        evaluator.clear_failure();
        assert!(evaluator.last_failure().is_none());
    }

    #[test]
    fn success_implicitly_clears_failure() {
        let store = Arc::new(CertificateStore::in_memory());
        let evaluator = TrustEvaluator::new(store.clone());
        let cert = test_cert("dir1.example.com");
        let chain = chain_of(&[&cert]);

        evaluator.evaluate(&chain).unwrap_err();
        assert!(evaluator.last_failure().is_some());

        store.add("dir1", cert).unwrap();
        evaluator.evaluate(&chain).unwrap();
        assert!(evaluator.last_failure().is_none());
    }

    #[test]
    fn trusted_intermediate_is_sufficient() {
        let store = Arc::new(CertificateStore::in_memory());
        let evaluator = TrustEvaluator::new(store.clone());
        let leaf = test_cert("leaf.example.com");
        let issuer = test_cert("ca.example.com");

        store.add("ca", issuer.clone()).unwrap();
        evaluator.evaluate(&chain_of(&[&leaf, &issuer])).unwrap();
    }

    #[test]
    fn mismatched_chain_is_rejected_with_populated_store() {
        let store = Arc::new(CertificateStore::in_memory());
        let evaluator = TrustEvaluator::new(store.clone());
        store.add("other", test_cert("other.example.com")).unwrap();

        let stranger = test_cert("stranger.example.com");
        let err = evaluator.evaluate(&chain_of(&[&stranger])).unwrap_err();
        assert!(err.to_string().contains("no certificate"));
    }

    #[test]
    fn newer_failure_overwrites_older() {
        let evaluator = TrustEvaluator::new(Arc::new(CertificateStore::in_memory()));
        let first = test_cert("first.example.com");
        let second = test_cert("second.example.com");

        evaluator.evaluate(&chain_of(&[&first])).unwrap_err();
        evaluator.evaluate(&chain_of(&[&second])).unwrap_err();

        let record = evaluator.last_failure().unwrap();
        assert_eq!(record.chain.leaf(), Some(second.der()));
    }

    #[test]
    fn failure_mark_distinguishes_attempts() {
        let evaluator = TrustEvaluator::new(Arc::new(CertificateStore::in_memory()));
        let cert = test_cert("dir1.example.com");

        evaluator.evaluate(&chain_of(&[&cert])).unwrap_err();

        // A mark taken after the failure does not see it.
        let mark = evaluator.failure_mark();
        assert!(evaluator.failure_since(mark).is_none());

        // A new failure after the mark is visible.
        evaluator.evaluate(&chain_of(&[&cert])).unwrap_err();
        assert!(evaluator.failure_since(mark).is_some());
    }

    #[test]
    fn store_backed_verifier_runs_the_evaluator() {
        let store = Arc::new(CertificateStore::in_memory());
        let evaluator = Arc::new(TrustEvaluator::new(store.clone()));
        let verifier = StoreBackedVerifier::new(evaluator.clone());

        let cert = test_cert("dir1.example.com");
        let der = CertificateDer::from(cert.der().to_vec());
        let name = ServerName::try_from("dir1.example.com").unwrap();

        let rejected = verifier.verify_server_cert(&der, &[], &name, &[], UnixTime::now());
        assert!(rejected.is_err());
        assert!(evaluator.last_failure().is_some());

        store.add("dir1", cert).unwrap();
        verifier
            .verify_server_cert(&der, &[], &name, &[], UnixTime::now())
            .unwrap();
        assert!(evaluator.last_failure().is_none());
    }

    #[test]
    fn capturing_verifier_records_the_chain() {
        let verifier = ChainCapturingVerifier::new();
        let leaf = test_cert("leaf.example.com");
        let issuer = test_cert("ca.example.com");

        let leaf_der = CertificateDer::from(leaf.der().to_vec());
        let issuer_der = CertificateDer::from(issuer.der().to_vec());
        let name = ServerName::try_from("leaf.example.com").unwrap();

        verifier
            .verify_server_cert(
                &leaf_der,
                std::slice::from_ref(&issuer_der),
                &name,
                &[],
                UnixTime::now(),
            )
            .unwrap();

        let chain = verifier.take_captured().expect("chain captured");
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.leaf(), Some(leaf.der()));
        assert!(verifier.take_captured().is_none());
    }

    #[test]
    fn accept_any_accepts_without_recording() {
        let verifier = AcceptAnyServerCert;
        let cert = test_cert("dir1.example.com");
        let der = CertificateDer::from(cert.der().to_vec());
        let name = ServerName::try_from("dir1.example.com").unwrap();

        verifier
            .verify_server_cert(&der, &[], &name, &[], UnixTime::now())
            .unwrap();
    }
}
