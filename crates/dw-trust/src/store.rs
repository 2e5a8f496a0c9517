//! Persisted, alias-keyed certificate trust store.
//!
//! The store is the only durable artifact this core owns. Mutations are
//! written to disk before the call returns; the file is replaced with a
//! rename so a concurrent load never observes a partial write. Reads
//! (trust evaluation during a handshake) and operator-driven writes
//! (import/delete) are serialized through one `RwLock`, and mutations hold
//! the write lock across persistence so an evaluation sees either the old
//! or the new store, never a half-applied one.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::certificate::TrustedCertificate;
use crate::error::{TrustError, TrustResult};

/// One stored entry: the certificate plus when it was imported.
#[derive(Debug, Clone)]
struct StoredEntry {
    certificate: TrustedCertificate,
    added_at: u64,
}

/// Alias-keyed set of trusted certificates.
///
/// Created empty on first use; persists across process restarts when
/// opened with a path.
pub struct CertificateStore {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl CertificateStore {
    /// Opens a store backed by the given file, loading existing entries
    /// or starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> TrustResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            load_entries(&path)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    /// Creates a store with no backing file.
    ///
    /// Nothing survives the process; intended for tests and short-lived
    /// diagnostic sessions.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a certificate under an operator-chosen alias.
    ///
    /// ## Errors
    ///
    /// `DuplicateAlias` if the alias is taken; `Persistence` if the store
    /// could not be written, in which case the in-memory state is rolled
    /// back.
    pub fn add(&self, alias: &str, certificate: TrustedCertificate) -> TrustResult<()> {
        if alias.is_empty() {
            return Err(TrustError::invalid("alias cannot be empty"));
        }
        let mut entries = self.write_lock();
        if entries.contains_key(alias) {
            return Err(TrustError::DuplicateAlias(alias.to_string()));
        }
        entries.insert(
            alias.to_string(),
            StoredEntry {
                certificate,
                added_at: unix_now(),
            },
        );
        if let Err(e) = self.persist(&entries) {
            entries.remove(alias);
            return Err(e);
        }
        tracing::debug!(alias, "trusted certificate added");
        Ok(())
    }

    /// Removes the entry with the given alias.
    ///
    /// ## Errors
    ///
    /// `NotFound` if the alias is absent; `Persistence` if the store could
    /// not be written, in which case the entry is restored.
    pub fn remove(&self, alias: &str) -> TrustResult<()> {
        let mut entries = self.write_lock();
        let Some(removed) = entries.remove(alias) else {
            return Err(TrustError::NotFound(alias.to_string()));
        };
        if let Err(e) = self.persist(&entries) {
            entries.insert(alias.to_string(), removed);
            return Err(e);
        }
        tracing::debug!(alias, "trusted certificate removed");
        Ok(())
    }

    /// Fetches the certificate stored under an alias.
    pub fn get(&self, alias: &str) -> TrustResult<TrustedCertificate> {
        self.read_lock()
            .get(alias)
            .map(|e| e.certificate.clone())
            .ok_or_else(|| TrustError::NotFound(alias.to_string()))
    }

    /// Lists all aliases. Order is unspecified.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.read_lock().keys().cloned().collect()
    }

    /// Checks whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    /// Checks whether any stored certificate has exactly these DER bytes.
    ///
    /// This is the membership test used by the trust evaluator; it sees a
    /// point-in-time view of the store.
    #[must_use]
    pub fn contains_der(&self, der: &[u8]) -> bool {
        self.read_lock()
            .values()
            .any(|e| e.certificate.der() == der)
    }

    fn persist(&self, entries: &HashMap<String, StoredEntry>) -> TrustResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        save_entries(path, entries)
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, StoredEntry>> {
        // Mutations roll themselves back on failure, so a poisoned lock
        // still guards a consistent map.
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, StoredEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateStore")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}

/// On-disk shape: alias -> { base64 DER, import timestamp }.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    entries: BTreeMap<String, PersistedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    der: String,
    added_at: u64,
}

fn load_entries(path: &Path) -> TrustResult<HashMap<String, StoredEntry>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| TrustError::persistence(format!("read {}: {e}", path.display())))?;
    let persisted: PersistedStore = serde_json::from_str(&raw)
        .map_err(|e| TrustError::persistence(format!("parse {}: {e}", path.display())))?;

    let mut entries = HashMap::with_capacity(persisted.entries.len());
    for (alias, entry) in persisted.entries {
        let der = BASE64
            .decode(&entry.der)
            .map_err(|e| TrustError::persistence(format!("entry {alias}: {e}")))?;
        let certificate = TrustedCertificate::from_der(der)
            .map_err(|e| TrustError::persistence(format!("entry {alias}: {e}")))?;
        entries.insert(
            alias,
            StoredEntry {
                certificate,
                added_at: entry.added_at,
            },
        );
    }
    Ok(entries)
}

fn save_entries(path: &Path, entries: &HashMap<String, StoredEntry>) -> TrustResult<()> {
    let persisted = PersistedStore {
        entries: entries
            .iter()
            .map(|(alias, entry)| {
                (
                    alias.clone(),
                    PersistedEntry {
                        der: BASE64.encode(entry.certificate.der()),
                        added_at: entry.added_at,
                    },
                )
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&persisted)
        .map_err(|e| TrustError::persistence(e.to_string()))?;

    ensure_parent_exists(path)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json.as_bytes())
        .map_err(|e| TrustError::persistence(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| TrustError::persistence(format!("rename {}: {e}", path.display())))?;
    Ok(())
}

fn ensure_parent_exists(path: &Path) -> TrustResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| TrustError::persistence(format!("mkdir {}: {e}", parent.display())))?;
        }
    }
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cert(cn: &str) -> TrustedCertificate {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec![cn.to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();
        TrustedCertificate::from_der(cert.der().to_vec()).unwrap()
    }

    #[test]
    fn starts_empty() {
        let store = CertificateStore::in_memory();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert!(store.list().is_empty());
    }

    #[test]
    fn alias_uniqueness() {
        let store = CertificateStore::in_memory();
        let first = test_cert("a.example.com");
        let second = test_cert("b.example.com");

        store.add("dir1", first).unwrap();
        let err = store.add("dir1", second.clone()).unwrap_err();
        assert!(matches!(err, TrustError::DuplicateAlias(_)));

        // remove-then-add under the same alias succeeds
        store.remove("dir1").unwrap();
        store.add("dir1", second).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn debug_reports_entry_count_not_contents() {
        let store = CertificateStore::in_memory();
        store.add("dir1", test_cert("a.example.com")).unwrap();

        let rendered = format!("{store:?}");
        assert!(rendered.contains("entries: 1"));
        assert!(!rendered.contains("der"));
    }

    #[test]
    fn remove_missing_is_not_found() {
        let store = CertificateStore::in_memory();
        assert!(matches!(
            store.remove("absent").unwrap_err(),
            TrustError::NotFound(_)
        ));
        assert!(matches!(
            store.get("absent").unwrap_err(),
            TrustError::NotFound(_)
        ));
    }

    #[test]
    fn membership_is_exact_der_equality() {
        let store = CertificateStore::in_memory();
        let cert = test_cert("dir1.example.com");
        let other = test_cert("dir2.example.com");

        store.add("dir1", cert.clone()).unwrap();
        assert!(store.contains_der(cert.der()));
        assert!(!store.contains_der(other.der()));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust/store.json");
        let cert = test_cert("dir1.example.com");

        {
            let store = CertificateStore::open(&path).unwrap();
            store.add("dir1", cert.clone()).unwrap();
        }

        let reopened = CertificateStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("dir1").unwrap(), cert);
        assert!(reopened.contains_der(cert.der()));
    }

    #[test]
    fn remove_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = CertificateStore::open(&path).unwrap();
            store.add("dir1", test_cert("a.example.com")).unwrap();
            store.remove("dir1").unwrap();
        }

        let reopened = CertificateStore::open(&path).unwrap();
        assert!(reopened.is_empty());
    }
}
