//! Refresh coordinator: at most one refresh call in flight.
//!
//! The first caller that reports a rejected token starts a cycle and issues the
//! refresh request; everyone arriving while it runs waits on the same cycle and
//! is released with the same outcome. On success the new tokens are written
//! through the session before any waiter wakes; on failure the session is torn
//! down before any waiter wakes. A cycle whose session ended while it ran
//! (logout, or a login as someone else) touches nothing and reports
//! `Unauthenticated`.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use super::provider::TokenPair;
use super::session::SessionState;
use crate::config::SessionConfig;
use crate::error::{AuthError, AuthResult};
use crate::flight::SingleFlight;
use crate::logging::{token_label, TARGET_REFRESH};
use crate::transport::{ApiRequest, Transport, APP_KEY_HEADER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    InFlight,
}

// Not terminal: nobody settled the cycle, so the session was never judged invalid.
fn refresh_abandoned() -> AuthError { AuthError::transient("refresh cycle was abandoned before it settled") }

fn session_changed() -> AuthError { AuthError::unauthenticated("session changed during refresh") }

pub struct RefreshCoordinator {
    session: SessionState,
    transport: Arc<dyn Transport>,
    config: Arc<SessionConfig>,
    flight: SingleFlight<String, AuthError>,
}

impl RefreshCoordinator {
    pub fn new(session: SessionState, transport: Arc<dyn Transport>, config: Arc<SessionConfig>) -> Self {
        Self { session, transport, config, flight: SingleFlight::new(refresh_abandoned) }
    }

    pub fn state(&self) -> CycleState {
        if self.flight.is_in_flight() { CycleState::InFlight } else { CycleState::Idle }
    }

    pub fn waiter_count(&self) -> usize { self.flight.waiter_count() }

    /// How many refresh cycles have been started, i.e. how many cycles hit the network.
    pub fn cycles_started(&self) -> u64 { self.flight.cycles_started() }

    pub fn is_refresh_endpoint(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        path.trim_end_matches('/') == self.config.endpoints.refresh.trim_end_matches('/')
    }

    /// Start a cycle, or join the one in flight, and return the new access token.
    pub async fn refresh(&self) -> AuthResult<String> {
        self.flight.run(|| self.run_cycle()).await
    }

    /// Like [`refresh`](Self::refresh), for a caller whose request carried `stale`.
    ///
    /// When no cycle is running and the stored token already differs from
    /// `stale`, a cycle settled after that request went out; the stored token is
    /// returned without another network call.
    pub async fn refresh_after(&self, stale: Option<&str>) -> AuthResult<String> {
        if self.state() == CycleState::Idle {
            if let (Some(stale), Some(current)) = (stale, self.session.access_token()) {
                if stale != current {
                    debug!(target: TARGET_REFRESH, "token already rotated, reusing {}", token_label(&current));
                    return Ok(current);
                }
            }
        }
        self.refresh().await
    }

    /// A 401 from the refresh endpoint itself: terminal, never a nested refresh.
    pub fn reject_from_refresh_endpoint(&self) -> AuthError {
        warn!(target: TARGET_REFRESH, "refresh endpoint answered 401; ending session");
        self.session.teardown();
        AuthError::refresh("refresh endpoint rejected the request")
    }

    async fn run_cycle(&self) -> AuthResult<String> {
        let generation = self.session.generation();
        info!(target: TARGET_REFRESH, "refresh cycle started generation={}", generation);
        match self.request_tokens().await {
            Ok(tokens) => {
                if !self.session.apply_refreshed(generation, &tokens.access_token, tokens.refresh_token.as_deref()) {
                    return Err(session_changed());
                }
                info!(
                    target: TARGET_REFRESH,
                    "refresh cycle succeeded token={} waiters={}",
                    token_label(&tokens.access_token),
                    self.flight.waiter_count()
                );
                Ok(tokens.access_token)
            }
            Err(e) => {
                warn!(
                    target: TARGET_REFRESH,
                    "refresh cycle failed err={} waiters={}",
                    e, self.flight.waiter_count()
                );
                if !self.session.teardown_if_current(generation) {
                    return Err(session_changed());
                }
                Err(e)
            }
        }
    }

    // Retries transient failures (network, 5xx) within the policy budget; any 4xx ends the cycle at once.
    async fn request_tokens(&self) -> AuthResult<TokenPair> {
        let Some(refresh_token) = self.session.refresh_token() else {
            return Err(AuthError::refresh("no refresh token stored"));
        };
        let req = ApiRequest::post(self.config.endpoints.refresh.as_str(), json!({ "refreshToken": refresh_token }))
            .with_header(APP_KEY_HEADER, self.config.app_key.as_str());
        let policy = self.config.refresh;
        let mut attempt: u32 = 1;
        loop {
            let transient = match self.transport.send(&req).await {
                Ok(resp) if resp.is_success() => {
                    let tokens: TokenPair = resp
                        .json()
                        .map_err(|e| AuthError::refresh(format!("malformed refresh response: {}", e.message())))?;
                    if tokens.access_token.trim().is_empty() {
                        return Err(AuthError::refresh("refresh response carried an empty access token"));
                    }
                    return Ok(tokens);
                }
                Ok(resp) if resp.status >= 500 => format!("HTTP {}", resp.status),
                Ok(resp) => return Err(AuthError::refresh(format!("refresh rejected: HTTP {}", resp.status))),
                Err(AuthError::TransientNetwork { message }) => message,
                Err(other) => return Err(AuthError::refresh(other.to_string())),
            };
            if attempt >= policy.max_attempts {
                return Err(AuthError::refresh(format!(
                    "refresh failed after {} attempt(s): {}",
                    attempt, transient
                )));
            }
            let delay = policy.backoff_for(attempt);
            debug!(target: TARGET_REFRESH, "refresh attempt {} failed ({}), retrying in {:?}", attempt, transient, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod refresh_tests;
