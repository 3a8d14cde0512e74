use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::{AuthError, AuthResult};
use crate::logging::TARGET_SESSION;
use crate::transport::{ApiRequest, Transport, APP_KEY_HEADER};

/// Token pair as issued by the signin/google/refresh endpoints.
/// `refresh_token` is optional because refresh responses may omit it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum LoginRequest {
    Password { email: String, password: String },
    Google { id_token: String },
}

impl LoginRequest {
    pub fn password(email: impl Into<String>, password: impl Into<String>) -> Self {
        LoginRequest::Password { email: email.into(), password: password.into() }
    }

    pub fn google(id_token: impl Into<String>) -> Self { LoginRequest::Google { id_token: id_token.into() } }

    fn kind(&self) -> &'static str {
        match self {
            LoginRequest::Password { .. } => "password",
            LoginRequest::Google { .. } => "google",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub tokens: TokenPair,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn login(&self, req: &LoginRequest) -> AuthResult<LoginResponse>;
}

/// Exchanges credentials for tokens against the REST backend.
pub struct RemoteAuthProvider {
    transport: Arc<dyn Transport>,
    config: Arc<SessionConfig>,
}

impl RemoteAuthProvider {
    pub fn new(transport: Arc<dyn Transport>, config: Arc<SessionConfig>) -> Self { Self { transport, config } }

    fn build(&self, req: &LoginRequest) -> ApiRequest {
        let endpoints = &self.config.endpoints;
        let api = match req {
            LoginRequest::Password { email, password } => {
                ApiRequest::post(endpoints.signin.as_str(), json!({"email": email, "password": password}))
            }
            LoginRequest::Google { id_token } => {
                ApiRequest::post(endpoints.google.as_str(), json!({"idToken": id_token, "appKey": self.config.app_key}))
            }
        };
        api.with_header(APP_KEY_HEADER, self.config.app_key.as_str())
    }
}

#[async_trait]
impl AuthProvider for RemoteAuthProvider {
    async fn login(&self, req: &LoginRequest) -> AuthResult<LoginResponse> {
        let resp = self.transport.send(&self.build(req)).await?;
        if matches!(resp.status, 400 | 401 | 403) {
            warn!(target: TARGET_SESSION, "login rejected kind={} status={}", req.kind(), resp.status);
            return Err(AuthError::unauthenticated("invalid credentials"));
        }
        let tokens: TokenPair = resp.error_for_status()?.json()?;
        if tokens.access_token.trim().is_empty() {
            return Err(AuthError::decode("login response carried an empty access token"));
        }
        info!(target: TARGET_SESSION, "login succeeded kind={}", req.kind());
        Ok(LoginResponse { tokens })
    }
}
