//! Runtime configuration for the session core.
//! Values come from a JSON file and/or `STOCKDESK_*` environment variables; the
//! environment always wins over the file.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

pub const ENV_API_BASE: &str = "STOCKDESK_API_BASE";
pub const ENV_APP_KEY: &str = "STOCKDESK_APP_KEY";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "STOCKDESK_REQUEST_TIMEOUT_SECS";
pub const ENV_REFRESH_MAX_ATTEMPTS: &str = "STOCKDESK_REFRESH_MAX_ATTEMPTS";
pub const ENV_CREDENTIALS_PATH: &str = "STOCKDESK_CREDENTIALS_PATH";

/// Backend paths consumed by the core, relative to `api_base`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthEndpoints {
    pub signin: String,
    pub google: String,
    pub refresh: String,
    pub validate: String,
    pub user_init: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            signin: "/auth/signin".into(),
            google: "/auth/google".into(),
            refresh: "/auth/refresh".into(),
            validate: "/auth/validate".into(),
            user_init: "/auth/user/init".into(),
        }
    }
}

/// Retry budget for transient failures of the refresh call itself.
/// Explicit rejections (4xx) are never retried.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RefreshPolicy {
    fn default() -> Self { Self { max_attempts: 3, initial_backoff_ms: 200, max_backoff_ms: 2_000 } }
}

impl RefreshPolicy {
    /// No retries, no sleeping. Handy for tests and for callers that prefer to fail fast.
    pub fn no_retry() -> Self { Self { max_attempts: 1, initial_backoff_ms: 0, max_backoff_ms: 0 } }

    /// Delay before retry number `attempt` (1-based): initial, doubled each time, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self.initial_backoff_ms.saturating_mul(1u64 << shift).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Where the guard sends users it turns away.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardConfig {
    pub login_path: String,
    pub forbidden_path: String,
}

impl Default for GuardConfig {
    fn default() -> Self { Self { login_path: "/login".into(), forbidden_path: "/forbidden".into() } }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Base URL of the REST backend, e.g. `https://api.example.com/v1`.
    pub api_base: String,
    /// Static application identifier sent as the `appKey` header.
    pub app_key: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub refresh: RefreshPolicy,
    /// File backing the durable credential tier; `None` keeps everything in memory.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub endpoints: AuthEndpoints,
}

fn default_request_timeout_secs() -> u64 { 30 }

impl SessionConfig {
    pub fn new(api_base: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            app_key: app_key.into(),
            request_timeout_secs: default_request_timeout_secs(),
            refresh: RefreshPolicy::default(),
            credentials_path: None,
            guard: GuardConfig::default(),
            endpoints: AuthEndpoints::default(),
        }
    }

    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self { self.refresh = policy; self }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self { self.credentials_path = Some(path.into()); self }

    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }

    /// Build a config purely from the environment. `STOCKDESK_API_BASE` and `STOCKDESK_APP_KEY` are required.
    pub fn from_env() -> Result<Self> {
        let api_base = env::var(ENV_API_BASE).with_context(|| format!("{} is not set", ENV_API_BASE))?;
        let app_key = env::var(ENV_APP_KEY).with_context(|| format!("{} is not set", ENV_APP_KEY))?;
        let mut cfg = Self::new(api_base, app_key);
        cfg.apply_env_overrides();
        cfg.validate().map_err(|e| anyhow!(e))?;
        Ok(cfg)
    }

    /// Load a JSON config file, then apply environment overrides on top.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read session config {}", path.display()))?;
        let mut cfg: SessionConfig = serde_json::from_str(&text)
            .with_context(|| format!("invalid session config {}", path.display()))?;
        cfg.apply_env_overrides();
        cfg.validate().map_err(|e| anyhow!(e))?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var(ENV_API_BASE) { self.api_base = v; }
        if let Ok(v) = env::var(ENV_APP_KEY) { self.app_key = v; }
        if let Some(v) = parse_env(ENV_REQUEST_TIMEOUT_SECS) { self.request_timeout_secs = v; }
        if let Some(v) = parse_env(ENV_REFRESH_MAX_ATTEMPTS) { self.refresh.max_attempts = v; }
        if let Ok(v) = env::var(ENV_CREDENTIALS_PATH) {
            if !v.trim().is_empty() { self.credentials_path = Some(PathBuf::from(v)); }
        }
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.app_key.trim().is_empty() {
            return Err(AuthError::config("app_key must not be empty"));
        }
        let base = reqwest::Url::parse(&self.api_base)
            .map_err(|e| AuthError::config(format!("invalid api_base '{}': {}", self.api_base, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(AuthError::config(format!("api_base must be http(s), got '{}'", base.scheme())));
        }
        if self.refresh.max_attempts == 0 {
            return Err(AuthError::config("refresh.max_attempts must be at least 1"));
        }
        if !self.guard.login_path.starts_with('/') || !self.guard.forbidden_path.starts_with('/') {
            return Err(AuthError::config("guard paths must be absolute"));
        }
        Ok(())
    }
}

// Unset, unparsable and out-of-range values are all ignored.
fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| parse_value(&raw))
}

fn parse_value<T: FromStr>(raw: &str) -> Option<T> { raw.trim().parse::<T>().ok() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_sections() {
        let cfg: SessionConfig = serde_json::from_str(r#"{"api_base":"https://api.example.com","app_key":"stockdesk-web"}"#).unwrap();
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.refresh, RefreshPolicy::default());
        assert_eq!(cfg.endpoints.refresh, "/auth/refresh");
        assert_eq!(cfg.guard.login_path, "/login");
        assert!(cfg.credentials_path.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(SessionConfig::new("https://api.example.com", " ").validate().is_err());
        assert!(SessionConfig::new("not a url", "k").validate().is_err());
        assert!(SessionConfig::new("ftp://api.example.com", "k").validate().is_err());
        let cfg = SessionConfig::new("https://api.example.com", "k")
            .with_refresh_policy(RefreshPolicy { max_attempts: 0, ..Default::default() });
        assert!(matches!(cfg.validate(), Err(AuthError::Config { .. })));
    }

    #[test]
    fn numeric_overrides_reject_out_of_range_values() {
        assert_eq!(parse_value::<u32>(" 4 "), Some(4));
        assert_eq!(parse_value::<u32>("4294967296"), None);
        assert_eq!(parse_value::<u32>("-1"), None);
        assert_eq!(parse_value::<u64>("4294967296"), Some(4_294_967_296));
        assert_eq!(parse_value::<u64>("thirty"), None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RefreshPolicy::default();
        assert_eq!(p.backoff_for(1), Duration::from_millis(200));
        assert_eq!(p.backoff_for(2), Duration::from_millis(400));
        assert_eq!(p.backoff_for(3), Duration::from_millis(800));
        assert_eq!(p.backoff_for(10), Duration::from_millis(2_000));
        assert_eq!(RefreshPolicy::no_retry().backoff_for(5), Duration::ZERO);
    }

    #[test]
    fn json_file_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.json");
        std::fs::write(&path, r#"{"api_base":"http://127.0.0.1:9000","app_key":"web","refresh":{"max_attempts":5}}"#).unwrap();
        let cfg = SessionConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.refresh.max_attempts, 5);
        assert_eq!(cfg.refresh.initial_backoff_ms, 200);
    }
}
