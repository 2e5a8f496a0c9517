//! Connection establishment: transport, security handshake, bind.
//!
//! All three security modes funnel through one [`ConnectionEstablisher::connect`]
//! entry point with a single switch on the profile's mode; no call site
//! replicates the branching. Trust evaluation happens inside the rustls
//! handshake via [`StoreBackedVerifier`], before any application data
//! (including bind) is sent; for StartTLS, after the upgrade and still
//! before bind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dw_trust::{
    AcceptAnyServerCert, CertificateChain, ChainCapturingVerifier, StoreBackedVerifier,
    TrustEvaluator,
};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings};
use rustls::client::danger::ServerCertVerifier;

use crate::error::{ConnectionError, ConnectionResult};
use crate::pool::ConnectionFactory;
use crate::profile::{BindIdentity, SecurityMode, ServerProfile};

/// Default timeout for the raw connect plus handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A live, authenticated directory connection.
///
/// Owned by a pool for its whole life; callers only borrow it for one
/// request-use-release cycle.
pub struct DirectoryConn {
    ldap: Ldap,
    server_name: String,
}

impl DirectoryConn {
    /// Returns the owning server name.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Returns a mutable handle for running directory operations.
    #[must_use]
    pub fn ldap_mut(&mut self) -> &mut Ldap {
        &mut self.ldap
    }

    /// Round-trip health probe: a base-scope search against the root DSE.
    pub async fn probe(&mut self) -> bool {
        match self
            .ldap
            .search("", ldap3::Scope::Base, "(objectClass=*)", vec!["1.1"])
            .await
        {
            Ok(result) => result.success().is_ok(),
            Err(e) => {
                tracing::debug!(server = %self.server_name, error = %e, "health probe failed");
                false
            }
        }
    }

    /// Unbinds and closes the connection.
    pub async fn close(mut self) {
        let _ = self.ldap.unbind().await;
    }
}

/// Performs raw connect, security-mode handshake, and bind for a profile.
pub struct ConnectionEstablisher {
    evaluator: Arc<TrustEvaluator>,
    conn_timeout: Duration,
}

impl ConnectionEstablisher {
    /// Creates an establisher with the default connect timeout.
    #[must_use]
    pub fn new(evaluator: Arc<TrustEvaluator>) -> Self {
        Self::with_timeout(evaluator, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Creates an establisher with an explicit connect timeout.
    #[must_use]
    pub fn with_timeout(evaluator: Arc<TrustEvaluator>, conn_timeout: Duration) -> Self {
        Self {
            evaluator,
            conn_timeout,
        }
    }

    /// Returns the trust evaluator this establisher hands to handshakes.
    #[must_use]
    pub fn evaluator(&self) -> &Arc<TrustEvaluator> {
        &self.evaluator
    }

    /// Connects, negotiates transport security per the profile's mode,
    /// and binds credentials if the profile carries any.
    ///
    /// ## Errors
    ///
    /// `TrustFailure` (with the rejected chain) when the handshake's
    /// trust evaluation rejects the server; `Network` for transport
    /// failures; `Bind` when the server rejects the credentials.
    pub async fn connect(&self, profile: &ServerProfile) -> ConnectionResult<DirectoryConn> {
        profile.validate()?;
        let settings = self.settings_for(profile)?;

        let mark = self.evaluator.failure_mark();
        let mut ldap = match LdapConnAsync::with_settings(settings, &profile.url()).await {
            Ok((conn, ldap)) => {
                spawn_driver(conn, &profile.name);
                ldap
            }
            Err(e) => return Err(self.classify_connect_error(profile, mark, &e)),
        };

        if let Some(identity) = &profile.bind_identity {
            if let Err(e) = bind_simple(&mut ldap, identity).await {
                let _ = ldap.unbind().await;
                return Err(e);
            }
        }

        Ok(DirectoryConn {
            ldap,
            server_name: profile.name.clone(),
        })
    }

    /// Performs only the transport and handshake steps and returns the
    /// certificate chain the server presented. No bind is attempted and
    /// trust enforcement is bypassed; this exists so an operator can
    /// preview a certificate before deciding to trust it.
    pub async fn retrieve_certificate_chain(
        &self,
        profile: &ServerProfile,
    ) -> ConnectionResult<CertificateChain> {
        if !profile.security_mode.uses_tls() {
            return Err(ConnectionError::config(
                "plaintext profiles have no certificate chain to retrieve",
            ));
        }

        let capturing = Arc::new(ChainCapturingVerifier::new());
        let mut settings = LdapConnSettings::new().set_conn_timeout(self.conn_timeout);
        if profile.security_mode == SecurityMode::UpgradeTls {
            settings = settings.set_starttls(true);
        }
        settings = settings.set_config(client_config_with_verifier(
            capturing.clone() as Arc<dyn ServerCertVerifier>,
        )?);

        let connect_error = match LdapConnAsync::with_settings(settings, &profile.url()).await {
            Ok((conn, mut ldap)) => {
                spawn_driver(conn, &profile.name);
                let _ = ldap.unbind().await;
                None
            }
            Err(e) => Some(e),
        };

        // The chain may have been captured even if the connection failed
        // after the handshake completed.
        capturing.take_captured().ok_or_else(|| match connect_error {
            Some(e) => ConnectionError::network(e.to_string()),
            None => ConnectionError::network("handshake did not present a certificate chain"),
        })
    }

    fn settings_for(&self, profile: &ServerProfile) -> ConnectionResult<LdapConnSettings> {
        let mut settings = LdapConnSettings::new().set_conn_timeout(self.conn_timeout);
        match profile.security_mode {
            SecurityMode::None => {}
            SecurityMode::ImplicitTls | SecurityMode::UpgradeTls => {
                if profile.security_mode == SecurityMode::UpgradeTls {
                    settings = settings.set_starttls(true);
                }
                let verifier: Arc<dyn ServerCertVerifier> =
                    if profile.enforce_certificate_validation {
                        Arc::new(StoreBackedVerifier::new(self.evaluator.clone()))
                    } else {
                        Arc::new(AcceptAnyServerCert)
                    };
                settings = settings.set_config(client_config_with_verifier(verifier)?);
            }
        }
        Ok(settings)
    }

    /// Attributes a connect error either to a handshake trust rejection
    /// (when the evaluator captured a failure during *this* attempt) or
    /// to the network.
    fn classify_connect_error(
        &self,
        profile: &ServerProfile,
        mark: u64,
        error: &ldap3::LdapError,
    ) -> ConnectionError {
        if profile.enforce_certificate_validation && profile.security_mode.uses_tls() {
            if let Some(failure) = self.evaluator.failure_since(mark) {
                return ConnectionError::TrustFailure {
                    chain: failure.chain,
                    cause: failure.cause,
                };
            }
        }
        ConnectionError::network(error.to_string())
    }
}

#[async_trait]
impl ConnectionFactory for ConnectionEstablisher {
    type Conn = DirectoryConn;

    async fn establish(&self, profile: &ServerProfile) -> ConnectionResult<DirectoryConn> {
        self.connect(profile).await
    }

    async fn probe(&self, conn: &mut DirectoryConn) -> bool {
        conn.probe().await
    }

    async fn close(&self, conn: DirectoryConn) {
        conn.close().await;
    }
}

fn spawn_driver(conn: LdapConnAsync, server_name: &str) {
    let server_name = server_name.to_string();
    tokio::spawn(async move {
        if let Err(e) = conn.drive().await {
            tracing::warn!(server = %server_name, error = %e, "connection driver error");
        }
    });
}

async fn bind_simple(ldap: &mut Ldap, identity: &BindIdentity) -> ConnectionResult<()> {
    ldap.simple_bind(&identity.dn, &identity.secret)
        .await
        .map_err(|e| ConnectionError::bind(e.to_string()))?
        .success()
        .map_err(|e| ConnectionError::bind(format!("server rejected credentials: {e}")))?;
    Ok(())
}

fn client_config_with_verifier(
    verifier: Arc<dyn ServerCertVerifier>,
) -> ConnectionResult<Arc<rustls::ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectionError::config(format!("TLS configuration: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(Arc::new(config))
}
