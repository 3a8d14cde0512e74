//! Credential persistence.
//! Durable entries (tokens) outlive the process; volatile entries (derived ids)
//! live only as long as the store value does. Both tiers sit behind one lock so
//! `clear` is never observed half-done.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::logging::TARGET_STORE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialKey {
    AccessToken,
    RefreshToken,
    TenantId,
    UserId,
    CurrentUserUuid,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 5] = [
        CredentialKey::AccessToken,
        CredentialKey::RefreshToken,
        CredentialKey::TenantId,
        CredentialKey::UserId,
        CredentialKey::CurrentUserUuid,
    ];

    /// Storage name, matching what the web console writes to local/session storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::AccessToken => "access_token",
            CredentialKey::RefreshToken => "refresh_token",
            CredentialKey::TenantId => "tenantId",
            CredentialKey::UserId => "userId",
            CredentialKey::CurrentUserUuid => "currentUserUuid",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, CredentialKey::AccessToken | CredentialKey::RefreshToken)
    }
}

/// Key/value credential storage shared between the session, the refresh coordinator and the guard.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: CredentialKey) -> Option<String>;
    fn set(&self, key: CredentialKey, value: &str);
    fn remove(&self, key: CredentialKey);
    /// Remove every durable and volatile entry in one step.
    fn clear(&self);

    /// Apply several writes together; `None` removes the key.
    /// Implementations override this to make the batch atomic.
    fn set_many(&self, entries: &[(CredentialKey, Option<&str>)]) {
        for (key, value) in entries {
            match value {
                Some(v) => self.set(*key, v),
                None => self.remove(*key),
            }
        }
    }

    fn contains(&self, key: CredentialKey) -> bool { self.get(key).is_some() }
}

#[derive(Debug, Default, Clone)]
struct Tiers {
    durable: BTreeMap<CredentialKey, String>,
    volatile: BTreeMap<CredentialKey, String>,
}

impl Tiers {
    fn map(&self, key: CredentialKey) -> &BTreeMap<CredentialKey, String> {
        if key.is_durable() { &self.durable } else { &self.volatile }
    }

    fn map_mut(&mut self, key: CredentialKey) -> &mut BTreeMap<CredentialKey, String> {
        if key.is_durable() { &mut self.durable } else { &mut self.volatile }
    }

    /// Returns true when a durable entry changed.
    fn apply(&mut self, key: CredentialKey, value: Option<&str>) -> bool {
        let changed = match value {
            Some(v) => self.map_mut(key).insert(key, v.to_string()).as_deref() != Some(v),
            None => self.map_mut(key).remove(&key).is_some(),
        };
        changed && key.is_durable()
    }

    fn clear(&mut self) -> bool {
        let had_durable = !self.durable.is_empty();
        self.durable.clear();
        self.volatile.clear();
        had_durable
    }
}

/// Everything in memory. Used by tests and short-lived embeddings.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Tiers>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self { Self::default() }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> { self.inner.read().map(key).get(&key).cloned() }

    fn set(&self, key: CredentialKey, value: &str) { self.inner.write().apply(key, Some(value)); }

    fn remove(&self, key: CredentialKey) { self.inner.write().apply(key, None); }

    fn clear(&self) { self.inner.write().clear(); }

    fn set_many(&self, entries: &[(CredentialKey, Option<&str>)]) {
        let mut tiers = self.inner.write();
        for (key, value) in entries { tiers.apply(*key, *value); }
    }
}

/// Durable tier backed by a JSON file, volatile tier in memory.
///
/// The file is rewritten through a sibling temp file and a rename while the
/// write lock is held, so concurrent writers persist in the order they locked
/// and a crash never leaves a truncated file behind.
///
/// Writes are blocking `std::fs` calls made on the caller's thread, and
/// `SessionState` makes them while holding its own cell lock. The file holds two
/// short tokens, so each write is one small rename; a store with slow or remote
/// backing should implement `CredentialStore` with its own buffering instead.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    inner: RwLock<Tiers>,
}

impl FileCredentialStore {
    /// Open (or lazily create) the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let durable = load_durable(&path);
        debug!(target: TARGET_STORE, "credential store opened path={} durable_entries={}", path.display(), durable.len());
        Self { path, inner: RwLock::new(Tiers { durable, volatile: BTreeMap::new() }) }
    }

    pub fn path(&self) -> &Path { &self.path }

    fn persist(&self, tiers: &Tiers) {
        let doc: BTreeMap<&str, &str> = tiers.durable.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        if let Err(e) = write_atomic(&self.path, &doc) {
            warn!(target: TARGET_STORE, "failed to persist credentials path={} err={}", self.path.display(), e);
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> { self.inner.read().map(key).get(&key).cloned() }

    fn set(&self, key: CredentialKey, value: &str) {
        let mut tiers = self.inner.write();
        if tiers.apply(key, Some(value)) { self.persist(&tiers); }
    }

    fn remove(&self, key: CredentialKey) {
        let mut tiers = self.inner.write();
        if tiers.apply(key, None) { self.persist(&tiers); }
    }

    fn clear(&self) {
        let mut tiers = self.inner.write();
        if tiers.clear() { self.persist(&tiers); }
    }

    fn set_many(&self, entries: &[(CredentialKey, Option<&str>)]) {
        let mut tiers = self.inner.write();
        let mut dirty = false;
        for (key, value) in entries { dirty |= tiers.apply(*key, *value); }
        if dirty { self.persist(&tiers); }
    }
}

fn load_durable(path: &Path) -> BTreeMap<CredentialKey, String> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(target: TARGET_STORE, "unreadable credential file path={} err={}", path.display(), e);
            return BTreeMap::new();
        }
    };
    let raw: BTreeMap<String, String> = match serde_json::from_str(&text) {
        Ok(m) => m,
        Err(e) => {
            warn!(target: TARGET_STORE, "corrupt credential file path={} err={}", path.display(), e);
            return BTreeMap::new();
        }
    };
    // Only durable keys are honoured from disk.
    raw.into_iter()
        .filter_map(|(k, v)| CredentialKey::parse(&k).filter(|k| k.is_durable()).map(|k| (k, v)))
        .collect()
}

fn write_atomic(path: &Path, doc: &BTreeMap<&str, &str>) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() { std::fs::create_dir_all(dir)?; }
    }
    let body = serde_json::to_vec_pretty(doc).map_err(std::io::Error::other)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
