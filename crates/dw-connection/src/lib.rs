//! Pooled, trust-aware LDAP connections for Directory Workbench.
//!
//! This crate owns everything between a server profile and a live,
//! authenticated directory connection: security-mode negotiation
//! (plaintext, implicit TLS, StartTLS upgrade), per-server bounded
//! connection pools, and the operations the application layer runs over
//! them. Trust decisions themselves live in `dw-trust`; this crate wires
//! the evaluator into every TLS handshake.
//!
//! ## Security
//!
//! - The certificate chain is evaluated during the handshake, before any
//!   application data (including bind) is sent.
//! - Profiles default to implicit TLS with validation enforced; disabling
//!   validation is an explicit, per-profile diagnostic escape hatch.
//! - Bind secrets are never logged and never serialized.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod establish;
pub mod pool;
pub mod profile;
pub mod search;

pub use client::DirectoryClient;
pub use error::{ConnectionError, ConnectionResult};
pub use establish::{ConnectionEstablisher, DirectoryConn, DEFAULT_CONNECT_TIMEOUT};
pub use pool::{
    ConnectionFactory, ConnectionPool, PoolConfig, PoolRegistry, PoolState, PooledConnection,
    POOL_MAX_SIZE, POOL_MIN_SIZE,
};
pub use profile::{BindIdentity, SecurityMode, ServerProfile, ServerProfileBuilder};
pub use search::{escape_filter_value, DirectoryEntry, SearchScope};

// Re-exported so callers can build modify operations without a direct
// ldap3 dependency.
pub use ldap3::Mod;
