//! Session state: the single source of truth for credentials and permissions.
//!
//! `SessionState` is an owned, cloneable handle. There is no process-wide
//! instance; every embedding (and every test) constructs its own. Writes go
//! through a handful of methods (`establish`, `hydrate`, `teardown` and the
//! refresh coordinator's `apply_refreshed`); reads are synchronous snapshots.
//! Observers get the current value on subscribe and then every change in
//! publication order.
//!
//! Every `establish` and `teardown` starts a new session generation. Work that
//! spans an await (profile fetch, token refresh) is tagged with the generation
//! it started in and is discarded if the generation moved on meanwhile.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::authorizer::PermissionSet;
use super::profile::UserProfile;
use super::provider::TokenPair;
use super::store::{CredentialKey, CredentialStore};
use crate::error::{AuthError, AuthResult};
use crate::flight::SingleFlight;
use crate::logging::TARGET_SESSION;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub profile: Option<UserProfile>,
    permissions: PermissionSet,
}

impl Session {
    pub fn anonymous() -> Self { Self::default() }

    /// Initial value after a cold start: whatever tokens the durable tier holds, no profile.
    pub fn restore(store: &dyn CredentialStore) -> Self {
        Self {
            access_token: store.get(CredentialKey::AccessToken),
            refresh_token: store.get(CredentialKey::RefreshToken),
            profile: None,
            permissions: PermissionSet::default(),
        }
    }

    fn with_tokens(mut self, access: Option<String>, refresh: Option<String>) -> Self {
        self.access_token = access;
        self.refresh_token = refresh;
        self
    }

    // permissions follow the profile, always
    fn with_profile(mut self, profile: Option<UserProfile>) -> Self {
        self.permissions = profile.as_ref().map(PermissionSet::from_profile).unwrap_or_default();
        self.profile = profile;
        self
    }

    pub fn permissions(&self) -> &PermissionSet { &self.permissions }

    pub fn is_authenticated(&self) -> bool { self.access_token.is_some() }

    pub fn is_hydrated(&self) -> bool { self.is_authenticated() && self.profile.is_some() }

    /// False for an anonymous session regardless of any cached profile.
    pub fn has_capability(&self, key: &str) -> bool {
        self.is_authenticated() && self.permissions.contains(key)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.is_authenticated() && self.profile.as_ref().map(|p| p.has_role(role)).unwrap_or(false)
    }

    pub fn user_id(&self) -> Option<&str> { self.profile.as_ref().map(|p| p.user_id.as_str()) }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // tokens are redacted; only presence is shown
        f.debug_struct("Session")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("user_id", &self.user_id())
            .field("permissions", &self.permissions.len())
            .finish()
    }
}

/// Anything that can answer "who am I" for the current access token.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self) -> AuthResult<UserProfile>;
}

struct Cell {
    current: Session,
    generation: u64,
    subscribers: Vec<mpsc::UnboundedSender<Session>>,
}

// One profile fetch per generation; callers from different generations never share one.
struct HydrationSlot {
    generation: u64,
    flight: Arc<SingleFlight<Session, AuthError>>,
}

impl HydrationSlot {
    fn new(generation: u64) -> Self {
        Self { generation, flight: Arc::new(SingleFlight::new(hydration_abandoned)) }
    }
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    cell: Mutex<Cell>,
    hydration: Mutex<HydrationSlot>,
    fetches: AtomicU64,
}

#[derive(Clone)]
pub struct SessionState {
    inner: Arc<Inner>,
}

fn hydration_abandoned() -> AuthError { AuthError::hydration("profile fetch was abandoned") }

impl SessionState {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let current = Session::restore(store.as_ref());
        Self {
            inner: Arc::new(Inner {
                store,
                cell: Mutex::new(Cell { current, generation: 0, subscribers: Vec::new() }),
                hydration: Mutex::new(HydrationSlot::new(0)),
                fetches: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> { &self.inner.store }

    /// Last published value. Never blocks on I/O.
    pub fn current(&self) -> Session { self.inner.cell.lock().current.clone() }

    /// Current access token as persisted in the credential store.
    pub fn access_token(&self) -> Option<String> { self.inner.store.get(CredentialKey::AccessToken) }

    pub fn refresh_token(&self) -> Option<String> { self.inner.store.get(CredentialKey::RefreshToken) }

    pub fn has_capability(&self, key: &str) -> bool { self.inner.cell.lock().current.has_capability(key) }

    pub fn has_role(&self, role: &str) -> bool { self.inner.cell.lock().current.has_role(role) }

    /// True while a profile fetch for the current generation is pending.
    pub fn is_hydrating(&self) -> bool {
        let generation = self.generation();
        let slot = self.inner.hydration.lock();
        slot.generation == generation && slot.flight.is_in_flight()
    }

    /// Number of profile fetches actually issued so far.
    pub fn hydration_count(&self) -> u64 { self.inner.fetches.load(Ordering::SeqCst) }

    /// Current session generation. Changes on every `establish` and `teardown`, not on refresh.
    pub fn generation(&self) -> u64 { self.inner.cell.lock().generation }

    pub fn subscriber_count(&self) -> usize {
        let mut cell = self.inner.cell.lock();
        cell.subscribers.retain(|tx| !tx.is_closed());
        cell.subscribers.len()
    }

    /// Replay-latest subscription: yields the current value first, then every later change.
    pub fn observe(&self) -> SessionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut cell = self.inner.cell.lock();
        let _ = tx.send(cell.current.clone());
        cell.subscribers.push(tx);
        SessionStream { rx }
    }

    // Caller holds the cell lock, which keeps publication order identical for every observer.
    fn publish_locked(cell: &mut Cell, next: Session) {
        cell.current = next;
        let snapshot = cell.current.clone();
        cell.subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }

    /// Login success: persist the new tokens and publish an authenticated, not yet hydrated session.
    /// Derived ids of a previous identity are dropped.
    pub fn establish(&self, tokens: &TokenPair) {
        let mut cell = self.inner.cell.lock();
        self.inner.store.set_many(&[
            (CredentialKey::AccessToken, Some(tokens.access_token.as_str())),
            (CredentialKey::RefreshToken, tokens.refresh_token.as_deref()),
            (CredentialKey::TenantId, None),
            (CredentialKey::UserId, None),
            (CredentialKey::CurrentUserUuid, None),
        ]);
        let next = Session::anonymous()
            .with_tokens(Some(tokens.access_token.clone()), tokens.refresh_token.clone());
        cell.generation += 1;
        Self::publish_locked(&mut cell, next);
        info!(target: TARGET_SESSION, "session established generation={}", cell.generation);
    }

    /// Refresh coordinator write path: new access token, and a new refresh token when the backend rotated it.
    ///
    /// Applied only while `generation` is still current; returns false (and writes nothing) otherwise.
    pub(crate) fn apply_refreshed(&self, generation: u64, access_token: &str, refresh_token: Option<&str>) -> bool {
        let mut cell = self.inner.cell.lock();
        if cell.generation != generation {
            warn!(target: TARGET_SESSION, "dropping refreshed tokens for ended session generation={}", generation);
            return false;
        }
        let mut entries = vec![(CredentialKey::AccessToken, Some(access_token))];
        if let Some(rt) = refresh_token {
            entries.push((CredentialKey::RefreshToken, Some(rt)));
        }
        self.inner.store.set_many(&entries);
        let refresh = self.inner.store.get(CredentialKey::RefreshToken);
        let next = cell.current.clone().with_tokens(Some(access_token.to_string()), refresh);
        Self::publish_locked(&mut cell, next);
        debug!(target: TARGET_SESSION, "session tokens refreshed rotated_refresh={}", refresh_token.is_some());
        true
    }

    /// Clear every credential and publish the anonymous session.
    pub fn teardown(&self) {
        let mut cell = self.inner.cell.lock();
        self.teardown_locked(&mut cell);
    }

    /// Tear down only if no login or logout happened since `generation` was read.
    pub fn teardown_if_current(&self, generation: u64) -> bool {
        let mut cell = self.inner.cell.lock();
        if cell.generation != generation {
            debug!(target: TARGET_SESSION, "skipping teardown for ended session generation={}", generation);
            return false;
        }
        self.teardown_locked(&mut cell);
        true
    }

    // Store writes happen under the cell lock so persisted and published values never diverge.
    // With a `FileCredentialStore` that includes a small blocking file write.
    fn teardown_locked(&self, cell: &mut Cell) {
        self.inner.store.clear();
        let was_authenticated = cell.current.is_authenticated();
        cell.generation += 1;
        Self::publish_locked(cell, Session::anonymous());
        info!(
            target: TARGET_SESSION,
            "session torn down was_authenticated={} generation={}",
            was_authenticated, cell.generation
        );
    }

    /// Fetch the profile and publish the hydrated session. Concurrent callers of the
    /// same generation share one fetch.
    ///
    /// Does not tear the session down on failure; callers decide (the guard always does).
    pub async fn hydrate(&self, source: &dyn ProfileSource) -> AuthResult<Session> {
        let generation = self.generation();
        let flight = {
            let mut slot = self.inner.hydration.lock();
            if slot.generation > generation {
                return Err(AuthError::hydration("session changed before hydration started"));
            }
            if slot.generation < generation {
                *slot = HydrationSlot::new(generation);
            }
            slot.flight.clone()
        };
        flight.run(|| self.hydrate_once(source, generation)).await
    }

    async fn hydrate_once(&self, source: &dyn ProfileSource, generation: u64) -> AuthResult<Session> {
        if self.access_token().is_none() {
            return Err(AuthError::hydration("no access token to hydrate from"));
        }
        debug!(target: TARGET_SESSION, "hydrating session profile generation={}", generation);
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        let profile = source.fetch_profile().await.map_err(|e| match e {
            AuthError::HydrationFailure { .. } => e,
            other => AuthError::hydration(format!("{}: {}", other.code_str(), other.message())),
        })?;

        let mut cell = self.inner.cell.lock();
        // a logout or another login may have landed while the fetch was pending
        if cell.generation != generation {
            warn!(target: TARGET_SESSION, "discarding profile fetched for ended session generation={}", generation);
            return Err(AuthError::hydration("session changed during hydration"));
        }
        let access = self.inner.store.get(CredentialKey::AccessToken);
        if access.is_none() {
            warn!(target: TARGET_SESSION, "session ended while profile fetch was pending");
            return Err(AuthError::hydration("session ended during hydration"));
        }
        self.inner.store.set_many(&[
            (CredentialKey::TenantId, profile.tenant_id.as_deref()),
            (CredentialKey::UserId, Some(profile.user_id.as_str())),
            (CredentialKey::CurrentUserUuid, profile.user_uuid.as_deref()),
        ]);
        let refresh = self.inner.store.get(CredentialKey::RefreshToken);
        let next = Session::anonymous().with_tokens(access, refresh).with_profile(Some(profile));
        info!(
            target: TARGET_SESSION,
            "session hydrated user_id={} permissions={}",
            next.user_id().unwrap_or(""),
            next.permissions().len()
        );
        Self::publish_locked(&mut cell, next.clone());
        Ok(next)
    }
}

/// Stream of session snapshots returned by [`SessionState::observe`].
pub struct SessionStream {
    rx: mpsc::UnboundedReceiver<Session>,
}

impl SessionStream {
    pub async fn recv(&mut self) -> Option<Session> { self.rx.recv().await }

    /// Next already-published value without waiting.
    pub fn try_recv(&mut self) -> Option<Session> { self.rx.try_recv().ok() }
}

impl Stream for SessionStream {
    type Item = Session;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Session>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
