//! Import-and-retry workflow over a captured trust failure.
//!
//! Pure orchestration with no state of its own: the UI presents the
//! captured chain, the operator accepts (importing the leaf under an
//! alias) or rejects it, and the caller then retries its original
//! connect request itself. The workflow never retries automatically,
//! because retry means re-entering the caller's own request context.

use std::sync::Arc;

use crate::certificate::TrustedCertificate;
use crate::error::{TrustError, TrustResult};
use crate::evaluator::{TrustEvaluator, TrustFailureRecord};
use crate::store::CertificateStore;

/// Orchestrates certificate import from a captured trust failure.
#[derive(Debug)]
pub struct ImportRetryWorkflow {
    store: Arc<CertificateStore>,
    evaluator: Arc<TrustEvaluator>,
}

impl ImportRetryWorkflow {
    /// Creates a workflow over the given store and evaluator.
    #[must_use]
    pub fn new(store: Arc<CertificateStore>, evaluator: Arc<TrustEvaluator>) -> Self {
        Self { store, evaluator }
    }

    /// Returns the captured failure for display, if any.
    #[must_use]
    pub fn inspect(&self) -> Option<TrustFailureRecord> {
        self.evaluator.last_failure()
    }

    /// Imports the captured failure's leaf certificate under `alias` and
    /// clears the failure record. The caller may then retry its
    /// connection.
    ///
    /// ## Errors
    ///
    /// `InvalidCertificate` if no failure is captured or the captured
    /// chain is empty; `DuplicateAlias` if the alias is taken, in which
    /// case the failure record is left in place so the operator can pick
    /// another alias.
    pub fn accept(&self, alias: &str) -> TrustResult<()> {
        let record = self
            .inspect()
            .ok_or_else(|| TrustError::invalid("no captured trust failure to accept"))?;
        let leaf = record
            .chain
            .leaf()
            .ok_or_else(|| TrustError::invalid("captured trust failure has an empty chain"))?;
        let certificate = TrustedCertificate::from_der(leaf.to_vec())?;

        self.store.add(alias, certificate)?;
        self.evaluator.clear_failure();
        tracing::debug!(alias, "rejected certificate imported; connection may be retried");
        Ok(())
    }

    /// Discards the captured failure without importing anything.
    pub fn reject(&self) {
        self.evaluator.clear_failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::CertificateChain;

    fn test_cert(cn: &str) -> TrustedCertificate {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec![cn.to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();
        TrustedCertificate::from_der(cert.der().to_vec()).unwrap()
    }

    fn workflow_with_failure(cn: &str) -> (ImportRetryWorkflow, Arc<CertificateStore>, TrustedCertificate) {
        let store = Arc::new(CertificateStore::in_memory());
        let evaluator = Arc::new(TrustEvaluator::new(store.clone()));
        let cert = test_cert(cn);
        let chain = CertificateChain::from_der_chain(vec![cert.der().to_vec()]);
        evaluator.evaluate(&chain).unwrap_err();
        (
            ImportRetryWorkflow::new(store.clone(), evaluator),
            store,
            cert,
        )
    }

    #[test]
    fn accept_imports_leaf_and_clears() {
        let (workflow, store, cert) = workflow_with_failure("dir1.example.com");
        assert!(workflow.inspect().is_some());

        workflow.accept("dir1-cert").unwrap();

        assert_eq!(store.get("dir1-cert").unwrap(), cert);
        assert!(workflow.inspect().is_none());
    }

    #[test]
    fn duplicate_alias_keeps_failure_record() {
        let (workflow, store, _) = workflow_with_failure("dir1.example.com");
        store.add("taken", test_cert("other.example.com")).unwrap();

        let err = workflow.accept("taken").unwrap_err();
        assert!(matches!(err, TrustError::DuplicateAlias(_)));
        // Operator can still pick another alias.
        assert!(workflow.inspect().is_some());
        workflow.accept("dir1-cert").unwrap();
        assert!(workflow.inspect().is_none());
    }

    #[test]
    fn reject_clears_without_importing() {
        let (workflow, store, _) = workflow_with_failure("dir1.example.com");

        workflow.reject();

        assert!(workflow.inspect().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn accept_without_failure_is_an_error() {
        let store = Arc::new(CertificateStore::in_memory());
        let evaluator = Arc::new(TrustEvaluator::new(store.clone()));
        let workflow = ImportRetryWorkflow::new(store, evaluator);

        assert!(workflow.inspect().is_none());
        assert!(workflow.accept("dir1-cert").is_err());
    }

    #[test]
    fn accepted_certificate_passes_subsequent_evaluation() {
        let store = Arc::new(CertificateStore::in_memory());
        let evaluator = Arc::new(TrustEvaluator::new(store.clone()));
        let cert = test_cert("dir1.example.com");
        let chain = CertificateChain::from_der_chain(vec![cert.der().to_vec()]);

        evaluator.evaluate(&chain).unwrap_err();
        let workflow = ImportRetryWorkflow::new(store, evaluator.clone());
        workflow.accept("dir1-cert").unwrap();

        // The retried handshake now succeeds.
        evaluator.evaluate(&chain).unwrap();
    }
}
