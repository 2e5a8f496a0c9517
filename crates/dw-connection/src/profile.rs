//! Server profiles: the per-server identity that ties pools, credentials,
//! and trust decisions together.
//!
//! A profile is immutable once an operation begins. Its `name` is a
//! *stable identifier* chosen at creation time and serves as the pool
//! key; it is not an editable display label. Renaming means creating a
//! new profile and explicitly closing the old name's pool.

use serde::{Deserialize, Serialize};

use crate::error::{ConnectionError, ConnectionResult};

/// Transport security negotiated for a server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityMode {
    /// Plaintext transport, no handshake.
    None,

    /// TLS from the first byte (ldaps). The certificate chain is
    /// evaluated before any application data, including bind, is sent.
    #[default]
    ImplicitTls,

    /// Plaintext connect followed by a StartTLS upgrade, then the same
    /// handshake evaluation as implicit TLS. Bind happens only after the
    /// upgrade succeeds.
    UpgradeTls,
}

impl SecurityMode {
    /// Checks whether this mode performs a TLS handshake.
    #[must_use]
    pub const fn uses_tls(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns the conventional port for this mode.
    #[must_use]
    pub const fn default_port(&self) -> u16 {
        match self {
            Self::ImplicitTls => 636,
            Self::None | Self::UpgradeTls => 389,
        }
    }
}

/// Credentials for a simple bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindIdentity {
    /// Distinguished name to bind as.
    pub dn: String,

    /// Bind secret (password).
    #[serde(skip_serializing, default)]
    pub secret: String,
}

/// Identity of one directory server: address, security mode, credentials,
/// and whether certificate validation is enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Stable unique key; also the pool key.
    pub name: String,

    /// Server hostname or IP address.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Transport security mode.
    pub security_mode: SecurityMode,

    /// Optional bind credentials; absent means anonymous.
    pub bind_identity: Option<BindIdentity>,

    /// Whether the certificate chain is evaluated against the trust
    /// store. Disabling this keeps confidentiality but bypasses trust
    /// evaluation entirely; it exists only for short-lived diagnostic
    /// connections and must never be the default.
    pub enforce_certificate_validation: bool,
}

impl ServerProfile {
    /// Creates a new profile builder.
    #[must_use]
    pub fn builder() -> ServerProfileBuilder {
        ServerProfileBuilder::new()
    }

    /// Returns the connection URL for the ldap3 client.
    ///
    /// Implicit TLS uses the `ldaps` scheme; plaintext and StartTLS both
    /// open a plain `ldap` transport (the upgrade is requested via
    /// connection settings, not the URL).
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = match self.security_mode {
            SecurityMode::ImplicitTls => "ldaps",
            SecurityMode::None | SecurityMode::UpgradeTls => "ldap",
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Validates the profile.
    pub fn validate(&self) -> ConnectionResult<()> {
        if self.name.is_empty() {
            return Err(ConnectionError::config("profile name cannot be empty"));
        }
        if self.host.is_empty() {
            return Err(ConnectionError::config("host cannot be empty"));
        }
        if self.port == 0 {
            return Err(ConnectionError::config("port cannot be 0"));
        }
        if let Some(identity) = &self.bind_identity {
            if identity.dn.is_empty() {
                return Err(ConnectionError::config("bind dn cannot be empty"));
            }
        }
        if !self.enforce_certificate_validation && !self.security_mode.uses_tls() {
            return Err(ConnectionError::config(
                "certificate validation can only be disabled on a TLS profile",
            ));
        }
        Ok(())
    }
}

/// Builder for [`ServerProfile`].
#[derive(Debug, Default)]
pub struct ServerProfileBuilder {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    security_mode: SecurityMode,
    bind_identity: Option<BindIdentity>,
    enforce_certificate_validation: bool,
}

impl ServerProfileBuilder {
    /// Creates a builder with secure defaults: implicit TLS with
    /// certificate validation enforced.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enforce_certificate_validation: true,
            ..Self::default()
        }
    }

    /// Sets the stable profile name (pool key).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the server port. Defaults to the mode's conventional port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security_mode(mut self, mode: SecurityMode) -> Self {
        self.security_mode = mode;
        self
    }

    /// Sets bind credentials.
    #[must_use]
    pub fn bind_identity(mut self, dn: impl Into<String>, secret: impl Into<String>) -> Self {
        self.bind_identity = Some(BindIdentity {
            dn: dn.into(),
            secret: secret.into(),
        });
        self
    }

    /// Sets whether certificate validation is enforced.
    ///
    /// ## Security
    ///
    /// Disable only for short-lived diagnostic connections such as
    /// previewing a server's certificate before trusting it.
    #[must_use]
    pub const fn enforce_certificate_validation(mut self, enforce: bool) -> Self {
        self.enforce_certificate_validation = enforce;
        self
    }

    /// Builds and validates the profile.
    pub fn build(self) -> ConnectionResult<ServerProfile> {
        let security_mode = self.security_mode;
        let profile = ServerProfile {
            name: self
                .name
                .ok_or_else(|| ConnectionError::config("profile name is required"))?,
            host: self
                .host
                .ok_or_else(|| ConnectionError::config("host is required"))?,
            port: self.port.unwrap_or_else(|| security_mode.default_port()),
            security_mode,
            bind_identity: self.bind_identity,
            enforce_certificate_validation: self.enforce_certificate_validation,
        };
        profile.validate()?;
        Ok(profile)
    }
}
