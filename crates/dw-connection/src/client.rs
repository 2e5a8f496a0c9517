//! The directory client facade.
//!
//! One [`DirectoryClient`] per process wires together the certificate
//! store, the trust evaluator, the connection establisher, and the pool
//! registry, and exposes the operations the rest of the application
//! calls. Operational calls take a [`ServerProfile`] and route through
//! that profile's pool; trust management calls go straight to the store.

use std::sync::Arc;
use std::time::Duration;

use dw_trust::{
    CertificateChain, CertificateDetails, CertificateStore, ImportRetryWorkflow, TrustEvaluator,
    TrustResult, TrustedCertificate,
};
use ldap3::Mod;

use crate::error::{ConnectionError, ConnectionResult};
use crate::establish::{ConnectionEstablisher, DEFAULT_CONNECT_TIMEOUT};
use crate::pool::{PoolConfig, PoolRegistry, PooledConnection};
use crate::profile::ServerProfile;
use crate::search::{DirectoryEntry, SearchScope};

/// LDAP invalidCredentials result code.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Multi-server directory client with pooled, trust-aware connections.
pub struct DirectoryClient {
    store: Arc<CertificateStore>,
    evaluator: Arc<TrustEvaluator>,
    establisher: Arc<ConnectionEstablisher>,
    pools: PoolRegistry<ConnectionEstablisher>,
    workflow: ImportRetryWorkflow,
}

impl DirectoryClient {
    /// Creates a client over the given certificate store with default
    /// pool and timeout settings.
    #[must_use]
    pub fn new(store: Arc<CertificateStore>) -> Self {
        Self::with_config(store, PoolConfig::default(), DEFAULT_CONNECT_TIMEOUT)
    }

    /// Creates a client with explicit pool configuration and connect
    /// timeout.
    #[must_use]
    pub fn with_config(
        store: Arc<CertificateStore>,
        pool_config: PoolConfig,
        conn_timeout: Duration,
    ) -> Self {
        let evaluator = Arc::new(TrustEvaluator::new(store.clone()));
        let establisher = Arc::new(ConnectionEstablisher::with_timeout(
            evaluator.clone(),
            conn_timeout,
        ));
        let workflow = ImportRetryWorkflow::new(store.clone(), evaluator.clone());
        Self {
            store,
            evaluator,
            pools: PoolRegistry::new(establisher.clone(), pool_config),
            establisher,
            workflow,
        }
    }

    /// Returns the import-retry workflow for handling trust failures.
    #[must_use]
    pub fn trust_workflow(&self) -> &ImportRetryWorkflow {
        &self.workflow
    }

    /// Returns the trust evaluator shared by all handshakes.
    #[must_use]
    pub fn evaluator(&self) -> &Arc<TrustEvaluator> {
        &self.evaluator
    }

    /// Verifies that the profile can connect, negotiate its security
    /// mode, and bind.
    ///
    /// Uses a dedicated one-shot connection, never the pool, so a probe
    /// of a misconfigured profile cannot poison pooled state. On a trust
    /// rejection the returned error carries the offending chain.
    pub async fn test_connection(&self, profile: &ServerProfile) -> ConnectionResult<()> {
        let conn = self.establisher.connect(profile).await?;
        conn.close().await;
        tracing::info!(server = %profile.name, "connection test succeeded");
        Ok(())
    }

    /// Runs a search through the profile's pool.
    pub async fn search(
        &self,
        profile: &ServerProfile,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: Vec<String>,
    ) -> ConnectionResult<Vec<DirectoryEntry>> {
        let mut pooled = self.pools.checkout(profile).await?;
        let outcome = pooled
            .conn_mut()
            .ldap_mut()
            .search(base, scope.to_ldap3(), filter, attrs)
            .await
            .and_then(ldap3::SearchResult::success);

        match outcome {
            Ok((entries, _)) => {
                pooled.release();
                Ok(entries
                    .into_iter()
                    .map(DirectoryEntry::from_result_entry)
                    .collect())
            }
            Err(e) => {
                Self::discard_failed(pooled, &e).await;
                Err(ConnectionError::Search(e.to_string()))
            }
        }
    }

    /// Applies modifications to an entry through the profile's pool.
    pub async fn modify(
        &self,
        profile: &ServerProfile,
        dn: &str,
        mods: Vec<Mod<String>>,
    ) -> ConnectionResult<()> {
        let mut pooled = self.pools.checkout(profile).await?;
        let outcome = pooled
            .conn_mut()
            .ldap_mut()
            .modify(dn, mods)
            .await
            .and_then(ldap3::LdapResult::success);

        match outcome {
            Ok(_) => {
                pooled.release();
                Ok(())
            }
            Err(e) => {
                Self::discard_failed(pooled, &e).await;
                Err(ConnectionError::Protocol(e))
            }
        }
    }

    /// Checks a DN/password pair against the server without touching the
    /// profile's own credentials.
    ///
    /// Returns `Ok(false)` for invalidCredentials; any other rejection is
    /// an error. The connection is discarded afterwards because its bound
    /// identity no longer matches the pool's.
    pub async fn bind_as(
        &self,
        profile: &ServerProfile,
        dn: &str,
        password: &str,
    ) -> ConnectionResult<bool> {
        let mut pooled = self.pools.checkout(profile).await?;
        let outcome = pooled.conn_mut().ldap_mut().simple_bind(dn, password).await;
        pooled.discard().await;

        match outcome {
            Ok(result) if result.rc == 0 => Ok(true),
            Ok(result) if result.rc == RC_INVALID_CREDENTIALS => Ok(false),
            Ok(result) => Err(ConnectionError::bind(format!(
                "bind check failed with result code {}",
                result.rc
            ))),
            Err(e) => Err(ConnectionError::bind(e.to_string())),
        }
    }

    /// Retrieves the certificate chain a server presents, without
    /// requiring it to be trusted. See
    /// [`ConnectionEstablisher::retrieve_certificate_chain`].
    pub async fn retrieve_certificate_chain(
        &self,
        profile: &ServerProfile,
    ) -> ConnectionResult<CertificateChain> {
        self.establisher.retrieve_certificate_chain(profile).await
    }

    /// Closes and removes the pool for one server name.
    ///
    /// Call when a profile is deleted or its connection settings change;
    /// the next operation against the name starts a fresh pool.
    pub async fn close_connection_pool(&self, server_name: &str) {
        self.pools.close_pool(server_name).await;
    }

    /// Closes every pool. Call at shutdown.
    pub async fn close_all_connection_pools(&self) {
        self.pools.close_all().await;
    }

    /// Lists the aliases in the trust store.
    #[must_use]
    pub fn list_certificates(&self) -> Vec<String> {
        self.store.list()
    }

    /// Adds a certificate to the trust store under an alias.
    pub fn add_certificate(&self, alias: &str, certificate: TrustedCertificate) -> TrustResult<()> {
        self.store.add(alias, certificate)
    }

    /// Removes a certificate from the trust store.
    ///
    /// Takes effect on the next handshake; connections already
    /// established are unaffected until they cycle out of their pool.
    pub fn remove_certificate(&self, alias: &str) -> TrustResult<()> {
        self.store.remove(alias)
    }

    /// Returns parsed details for a stored certificate.
    pub fn get_certificate_details(&self, alias: &str) -> TrustResult<CertificateDetails> {
        self.store.get(alias)?.details()
    }

    async fn discard_failed(pooled: PooledConnection<ConnectionEstablisher>, e: &ldap3::LdapError) {
        tracing::debug!(server = pooled.server_name(), error = %e, "discarding connection after failed operation");
        pooled.discard().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cert(cn: &str) -> TrustedCertificate {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec![cn.to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, cn.to_string());
        let cert = params.self_signed(&key).unwrap();
        TrustedCertificate::from_der(cert.der().to_vec()).unwrap()
    }

    fn client() -> DirectoryClient {
        DirectoryClient::new(Arc::new(CertificateStore::in_memory()))
    }

    #[test]
    fn certificate_passthroughs() {
        let client = client();
        assert!(client.list_certificates().is_empty());

        client
            .add_certificate("dir1-cert", test_cert("dir1.example.com"))
            .unwrap();
        assert_eq!(client.list_certificates(), vec!["dir1-cert".to_string()]);

        let details = client.get_certificate_details("dir1-cert").unwrap();
        assert!(details.subject.contains("dir1.example.com"));

        client.remove_certificate("dir1-cert").unwrap();
        assert!(client.list_certificates().is_empty());
        assert!(client.get_certificate_details("dir1-cert").is_err());
    }

    #[test]
    fn workflow_accept_flows_into_store() {
        let client = client();
        let cert = test_cert("dir1.example.com");
        let chain = CertificateChain::from_der_chain(vec![cert.der().to_vec()]);

        // Simulate a handshake rejection.
        client.evaluator().evaluate(&chain).unwrap_err();
        assert!(client.trust_workflow().inspect().is_some());

        client.trust_workflow().accept("dir1-cert").unwrap();
        assert_eq!(client.list_certificates(), vec!["dir1-cert".to_string()]);
        assert!(client.trust_workflow().inspect().is_none());

        // The imported certificate now passes evaluation.
        client.evaluator().evaluate(&chain).unwrap();
    }

    #[tokio::test]
    async fn closing_unknown_pool_is_a_no_op() {
        let client = client();
        client.close_connection_pool("never-used").await;
        client.close_all_connection_pools().await;
    }
}
