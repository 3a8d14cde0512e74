//! Owned wiring of the session core.
//!
//! An `AuthContext` bundles one credential store, one session, one refresh
//! coordinator (inside the client) and one guard. Hosts create it once and pass
//! clones of the `Arc` around; nothing here is global.

use std::sync::Arc;

use tracing::info;

use crate::client::AuthorizedClient;
use crate::config::SessionConfig;
use crate::error::AuthResult;
use crate::identity::{
    AuthProvider, CredentialStore, FileCredentialStore, LoginRequest, MemoryCredentialStore, NavOutcome,
    RemoteAuthProvider, RouteGuard, RouteTable, Session, SessionState, SessionStream,
};
use crate::logging::TARGET_SESSION;
use crate::transport::{HttpTransport, Transport};

pub struct AuthContext {
    config: Arc<SessionConfig>,
    session: SessionState,
    client: Arc<AuthorizedClient>,
    provider: Arc<dyn AuthProvider>,
    guard: RouteGuard,
    routes: RouteTable,
}

impl AuthContext {
    /// Build the production stack: `reqwest` transport, file-backed store when a path is configured.
    pub fn from_config(config: SessionConfig) -> AuthResult<Self> {
        config.validate()?;
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);
        let store: Arc<dyn CredentialStore> = match &config.credentials_path {
            Some(path) => Arc::new(FileCredentialStore::open(path)),
            None => Arc::new(MemoryCredentialStore::new()),
        };
        Ok(Self::with_parts(config, store, transport))
    }

    pub fn with_parts(config: SessionConfig, store: Arc<dyn CredentialStore>, transport: Arc<dyn Transport>) -> Self {
        let config = Arc::new(config);
        let session = SessionState::new(store);
        let client = Arc::new(AuthorizedClient::new(session.clone(), transport.clone(), config.clone()));
        let provider: Arc<dyn AuthProvider> = Arc::new(RemoteAuthProvider::new(transport, config.clone()));
        let guard = RouteGuard::new(session.clone(), client.clone());
        Self { config, session, client, provider, guard, routes: RouteTable::new() }
    }

    pub fn with_routes(mut self, routes: RouteTable) -> Self { self.routes = routes; self }

    pub fn with_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self { self.provider = provider; self }

    pub fn config(&self) -> &SessionConfig { &self.config }
    pub fn session(&self) -> &SessionState { &self.session }
    pub fn client(&self) -> &AuthorizedClient { &self.client }
    pub fn guard(&self) -> &RouteGuard { &self.guard }
    pub fn routes(&self) -> &RouteTable { &self.routes }

    pub fn current(&self) -> Session { self.session.current() }

    pub fn observe(&self) -> SessionStream { self.session.observe() }

    /// Exchange credentials for tokens and establish the session. The profile is loaded lazily.
    pub async fn login(&self, req: &LoginRequest) -> AuthResult<Session> {
        let resp = self.provider.login(req).await?;
        self.session.establish(&resp.tokens);
        Ok(self.session.current())
    }

    pub async fn signin(&self, email: &str, password: &str) -> AuthResult<Session> {
        self.login(&LoginRequest::password(email, password)).await
    }

    pub async fn google_signin(&self, id_token: &str) -> AuthResult<Session> {
        self.login(&LoginRequest::google(id_token)).await
    }

    /// Ask the backend whether the stored token is still good. A dead session is torn down.
    pub async fn validate(&self) -> AuthResult<bool> {
        if self.session.access_token().is_none() {
            return Ok(false);
        }
        let alive = self.client.validate().await?;
        if !alive {
            self.session.teardown();
        }
        Ok(alive)
    }

    /// Load the profile; on failure the session is ended so the host lands on login.
    pub async fn hydrate(&self) -> AuthResult<Session> {
        let generation = self.session.generation();
        match self.session.hydrate(self.client.as_ref()).await {
            Ok(s) => Ok(s),
            Err(e) => {
                self.session.teardown_if_current(generation);
                Err(e)
            }
        }
    }

    pub fn logout(&self) {
        info!(target: TARGET_SESSION, "logout requested");
        self.session.teardown();
    }

    /// Guard decision for navigating to `path`, resolved against the configured route table.
    pub async fn authorize_navigation(&self, path: &str) -> NavOutcome {
        self.guard.check_path(&self.routes, path).await
    }

    /// Like [`authorize_navigation`](Self::authorize_navigation) but answers with the redirect target, if any.
    pub async fn redirect_for(&self, path: &str) -> Option<String> {
        self.authorize_navigation(path).await.redirect_path(&self.config.guard).map(str::to_string)
    }
}
