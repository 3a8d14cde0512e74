//! In-process fake backend shared by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::config::{RefreshPolicy, SessionConfig};
use crate::error::{AuthError, AuthResult};
use crate::identity::{MemoryCredentialStore, SessionState};
use crate::transport::{ApiRequest, ApiResponse, Transport};

pub(crate) const EMAIL: &str = "ada@example.com";
pub(crate) const PASSWORD: &str = "correct horse";

pub(crate) struct BackendState {
    pub valid_access: Option<String>,
    pub valid_refresh: Option<String>,
    pub minted: u32,
    /// Scripted answers for the refresh endpoint, consumed before the normal logic.
    pub refresh_script: VecDeque<AuthResult<u16>>,
    /// Paths that answer 401 no matter which token is presented.
    pub always_401: Vec<String>,
    pub privileges: Vec<String>,
}

pub(crate) struct FakeBackend {
    pub state: Mutex<BackendState>,
    pub calls: Mutex<Vec<ApiRequest>>,
    pub delay: Duration,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> { Self::with_delay(Duration::from_millis(10)) }

    /// Backend whose every answer takes `delay`.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BackendState {
                valid_access: None,
                valid_refresh: None,
                minted: 0,
                refresh_script: VecDeque::new(),
                always_401: Vec::new(),
                privileges: vec!["ITEMS_VIEW".into()],
            }),
            calls: Mutex::new(Vec::new()),
            delay,
        })
    }

    /// Issue a token pair the backend will accept, as a login would.
    pub fn issue(&self) -> (String, String) {
        let mut st = self.state.lock();
        st.minted += 1;
        let at = format!("at-{}", st.minted);
        let rt = format!("rt-{}", st.minted);
        st.valid_access = Some(at.clone());
        st.valid_refresh = Some(rt.clone());
        (at, rt)
    }

    /// Expire the current access token; the refresh token stays valid.
    pub fn expire_access(&self) { self.state.lock().valid_access = Some("at-expired-elsewhere".into()); }

    pub fn revoke_refresh(&self) { self.state.lock().valid_refresh = None; }

    pub fn count(&self, path: &str) -> usize { self.calls.lock().iter().filter(|r| r.path == path).count() }

    pub fn calls_to(&self, path: &str) -> Vec<ApiRequest> {
        self.calls.lock().iter().filter(|r| r.path == path).cloned().collect()
    }

    fn answer(&self, req: &ApiRequest) -> AuthResult<ApiResponse> {
        let mut st = self.state.lock();
        match req.path.as_str() {
            "/auth/refresh" => {
                if let Some(scripted) = st.refresh_script.pop_front() {
                    let status = scripted?;
                    if status != 200 { return Ok(ApiResponse::new(status, json!({"message": "scripted"}))); }
                }
                let presented = req.body.as_ref().and_then(|b| b.get("refreshToken")).and_then(Value::as_str);
                if presented.is_none() || presented != st.valid_refresh.as_deref() {
                    return Ok(ApiResponse::new(401, json!({"message": "refresh token revoked"})));
                }
                st.minted += 1;
                let at = format!("at-{}", st.minted);
                st.valid_access = Some(at.clone());
                Ok(ApiResponse::new(200, json!({"accessToken": at})))
            }
            "/auth/signin" => {
                let body = req.body.clone().unwrap_or(Value::Null);
                if body["email"] != EMAIL || body["password"] != PASSWORD {
                    return Ok(ApiResponse::new(401, json!({"message": "bad credentials"})));
                }
                st.minted += 1;
                let at = format!("at-{}", st.minted);
                let rt = format!("rt-{}", st.minted);
                st.valid_access = Some(at.clone());
                st.valid_refresh = Some(rt.clone());
                Ok(ApiResponse::new(200, json!({"accessToken": at, "refreshToken": rt})))
            }
            path => {
                if st.always_401.iter().any(|p| p == path) || req.bearer().is_none() || req.bearer() != st.valid_access.as_deref() {
                    return Ok(ApiResponse::new(401, json!({"message": "token expired"})));
                }
                match path {
                    "/auth/user/init" => Ok(ApiResponse::new(200, json!({
                        "tenantId": 7, "userId": 42, "userUuid": "uuid-42", "displayName": "Ada",
                        "roles": ["CLERK"],
                        "applications": {"inventory": {"items": st.privileges}}
                    }))),
                    "/auth/validate" => Ok(ApiResponse::new(200, Value::Null)),
                    "/boom" => Ok(ApiResponse::new(500, json!({"message": "boom"}))),
                    other => Ok(ApiResponse::new(200, json!({"path": other}))),
                }
            }
        }
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, req: &ApiRequest) -> AuthResult<ApiResponse> {
        self.calls.lock().push(req.clone());
        tokio::time::sleep(self.delay).await;
        self.answer(req)
    }
}

pub(crate) fn test_config() -> Arc<SessionConfig> {
    Arc::new(SessionConfig::new("http://backend.test", "stockdesk-test").with_refresh_policy(RefreshPolicy {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
    }))
}

pub(crate) fn fresh_session() -> SessionState { SessionState::new(Arc::new(MemoryCredentialStore::new())) }

pub(crate) fn network_down() -> AuthResult<u16> { Err(AuthError::transient("connection reset")) }
