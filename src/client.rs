//! Authorized HTTP client.
//!
//! Every call gets the current bearer token and the static `appKey` header.
//! A 401 from a business endpoint parks the call on the refresh coordinator and
//! replays it once with the token the cycle produced. The replay's outcome is
//! final: a second 401 surfaces as `Unauthenticated` and is never retried.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{AuthError, AuthResult};
use crate::identity::{ProfileSource, RefreshCoordinator, SessionState, UserProfile};
use crate::logging::TARGET_CLIENT;
use crate::transport::{ApiRequest, ApiResponse, Transport, APP_KEY_HEADER, AUTHORIZATION_HEADER};

pub struct AuthorizedClient {
    session: SessionState,
    transport: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
    config: Arc<SessionConfig>,
}

impl AuthorizedClient {
    pub fn new(session: SessionState, transport: Arc<dyn Transport>, config: Arc<SessionConfig>) -> Self {
        let coordinator = RefreshCoordinator::new(session.clone(), transport.clone(), config.clone());
        Self { session, transport, coordinator, config }
    }

    pub fn session(&self) -> &SessionState { &self.session }

    pub fn coordinator(&self) -> &RefreshCoordinator { &self.coordinator }

    /// Copy of `req` carrying `token` (when present) and the app key.
    pub fn authorize(&self, req: &ApiRequest, token: Option<&str>) -> ApiRequest {
        let mut out = req.clone().with_header(APP_KEY_HEADER, self.config.app_key.as_str());
        out.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(AUTHORIZATION_HEADER));
        if let Some(token) = token {
            out = out.with_header(AUTHORIZATION_HEADER, format!("Bearer {}", token));
        }
        out
    }

    /// Send `req` through the pipeline. Non-401 responses come back unchanged, whatever their status.
    pub async fn execute(&self, req: ApiRequest) -> AuthResult<ApiResponse> {
        let token = self.session.access_token();
        let first = self.transport.send(&self.authorize(&req, token.as_deref())).await?;
        if !first.is_unauthorized() {
            return Ok(first);
        }
        if self.coordinator.is_refresh_endpoint(&req.path) {
            return Err(self.coordinator.reject_from_refresh_endpoint());
        }

        debug!(target: TARGET_CLIENT, "401 on {} {}; waiting for refresh", req.method.as_str(), req.path);
        let fresh = self.coordinator.refresh_after(token.as_deref()).await?;
        let retry = self.transport.send(&self.authorize(&req, Some(&fresh))).await?;
        if retry.is_unauthorized() {
            warn!(target: TARGET_CLIENT, "401 again after refresh on {} {}; giving up", req.method.as_str(), req.path);
            return Err(AuthError::unauthenticated(format!("{} rejected the refreshed token", req.path)));
        }
        Ok(retry)
    }

    pub async fn get(&self, path: &str) -> AuthResult<ApiResponse> { self.execute(ApiRequest::get(path)).await }

    pub async fn post(&self, path: &str, body: Value) -> AuthResult<ApiResponse> { self.execute(ApiRequest::post(path, body)).await }

    pub async fn put(&self, path: &str, body: Value) -> AuthResult<ApiResponse> { self.execute(ApiRequest::put(path, body)).await }

    pub async fn delete(&self, path: &str) -> AuthResult<ApiResponse> { self.execute(ApiRequest::delete(path)).await }

    /// `GET` and decode, turning non-2xx answers into errors.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AuthResult<T> {
        self.get(path).await?.error_for_status()?.json()
    }

    /// `GET /auth/validate`: `Ok(false)` when the backend says the session is no longer valid.
    pub async fn validate(&self) -> AuthResult<bool> {
        match self.get(&self.config.endpoints.validate).await {
            Ok(resp) => Ok(resp.is_success()),
            Err(AuthError::Unauthenticated { .. }) | Err(AuthError::RefreshFailure { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ProfileSource for AuthorizedClient {
    async fn fetch_profile(&self) -> AuthResult<UserProfile> {
        self.get_json(&self.config.endpoints.user_init).await
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;
