//! # dw-trust
//!
//! Certificate trust management for Directory Workbench.
//!
//! This crate owns the operator-managed trust store, the handshake-time
//! trust evaluator with its failure-capture protocol, and the
//! accept-or-reject import workflow used to establish trust in a server
//! certificate that was rejected during a handshake.
//!
//! ## Security
//!
//! The evaluator is fail-closed: with an empty trust store, every
//! certificate chain is rejected until an operator explicitly imports a
//! certificate. This is a deliberate policy, not an accident.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod certificate;
pub mod error;
pub mod evaluator;
pub mod store;
pub mod workflow;

pub use certificate::{CertificateChain, CertificateDetails, TrustedCertificate};
pub use error::{TrustError, TrustResult};
pub use evaluator::{
    AcceptAnyServerCert, ChainCapturingVerifier, StoreBackedVerifier, TrustEvaluator,
    TrustFailureRecord,
};
pub use store::CertificateStore;
pub use workflow::ImportRetryWorkflow;
