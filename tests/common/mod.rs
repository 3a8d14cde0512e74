//! In-process mock of the console backend for integration tests.
//! Binds an ephemeral localhost port and counts calls per endpoint.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use stockdesk::{RefreshPolicy, SessionConfig};

pub const APP_KEY: &str = "stockdesk-it";
pub const EMAIL: &str = "grace@example.com";
pub const PASSWORD: &str = "hopper-1906";
pub const GOOGLE_ID_TOKEN: &str = "google-id-token-ok";

#[derive(Default)]
pub struct Hits {
    pub signin: AtomicUsize,
    pub google: AtomicUsize,
    pub refresh: AtomicUsize,
    pub validate: AtomicUsize,
    pub user_init: AtomicUsize,
    pub items: AtomicUsize,
}

#[derive(Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
    minted: usize,
}

pub struct MockState {
    pub hits: Hits,
    tokens: Mutex<Tokens>,
    pub refresh_delay: Duration,
    /// When false, `/auth/user/init` answers 500.
    pub profile_ok: Mutex<bool>,
}

impl MockState {
    fn mint(&self) -> (String, String) {
        let mut t = self.tokens.lock();
        t.minted += 1;
        let at = format!("it-access-{}", t.minted);
        let rt = format!("it-refresh-{}", t.minted);
        t.access = Some(at.clone());
        t.refresh = Some(rt.clone());
        (at, rt)
    }

    fn bearer_ok(&self, headers: &HeaderMap) -> bool {
        let presented = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        presented.is_some() && presented == self.tokens.lock().access.as_deref()
    }

    fn app_key_ok(headers: &HeaderMap) -> bool {
        headers.get("appkey").and_then(|v| v.to_str().ok()) == Some(APP_KEY)
    }

    /// Invalidate the access token as if it expired server-side.
    pub fn expire_access(&self) { self.tokens.lock().access = Some("expired".into()); }

    pub fn revoke_refresh(&self) { self.tokens.lock().refresh = None; }

    pub fn current_refresh(&self) -> Option<String> { self.tokens.lock().refresh.clone() }
}

pub struct MockBackend {
    pub base: String,
    pub state: Arc<MockState>,
}

impl MockBackend {
    pub fn config(&self) -> SessionConfig {
        SessionConfig::new(self.base.as_str(), APP_KEY).with_refresh_policy(RefreshPolicy {
            max_attempts: 2,
            initial_backoff_ms: 5,
            max_backoff_ms: 10,
        })
    }

    pub fn hits(&self) -> &Hits { &self.state.hits }
}

pub fn count(c: &AtomicUsize) -> usize { c.load(Ordering::SeqCst) }

type Reply = (StatusCode, Json<Value>);

fn unauthorized(msg: &str) -> Reply { (StatusCode::UNAUTHORIZED, Json(json!({"message": msg}))) }

async fn signin(State(st): State<Arc<MockState>>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    st.hits.signin.fetch_add(1, Ordering::SeqCst);
    if !MockState::app_key_ok(&headers) {
        return (StatusCode::BAD_REQUEST, Json(json!({"message": "missing appKey"})));
    }
    if body["email"] != EMAIL || body["password"] != PASSWORD {
        return unauthorized("invalid credentials");
    }
    let (at, rt) = st.mint();
    (StatusCode::OK, Json(json!({"accessToken": at, "refreshToken": rt})))
}

async fn google(State(st): State<Arc<MockState>>, Json(body): Json<Value>) -> Reply {
    st.hits.google.fetch_add(1, Ordering::SeqCst);
    if body["idToken"] != GOOGLE_ID_TOKEN || body["appKey"] != APP_KEY {
        return unauthorized("google token rejected");
    }
    let (at, rt) = st.mint();
    (StatusCode::OK, Json(json!({"accessToken": at, "refreshToken": rt})))
}

async fn refresh(State(st): State<Arc<MockState>>, headers: HeaderMap, Json(body): Json<Value>) -> Reply {
    st.hits.refresh.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(st.refresh_delay).await;
    let presented = body["refreshToken"].as_str().map(str::to_string);
    if !MockState::app_key_ok(&headers) || presented.is_none() || presented != st.current_refresh() {
        return unauthorized("refresh token revoked");
    }
    // rotates both tokens
    let (at, rt) = st.mint();
    (StatusCode::OK, Json(json!({"accessToken": at, "refreshToken": rt})))
}

async fn validate(State(st): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    st.hits.validate.fetch_add(1, Ordering::SeqCst);
    if !st.bearer_ok(&headers) { return unauthorized("token expired"); }
    (StatusCode::OK, Json(json!({"valid": true})))
}

async fn user_init(State(st): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    st.hits.user_init.fetch_add(1, Ordering::SeqCst);
    if !st.bearer_ok(&headers) { return unauthorized("token expired"); }
    if !*st.profile_ok.lock() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": "profile service down"})));
    }
    (StatusCode::OK, Json(json!({
        "userId": 1001,
        "tenantId": "t-9",
        "userUuid": "u-1001",
        "displayName": "Grace",
        "email": EMAIL,
        "roles": ["MANAGER"],
        "applications": {
            "inventory": {"items": ["ITEMS_VIEW", "ITEMS_EDIT"], "reports": ["REPORTS_VIEW"]}
        }
    })))
}

async fn items(State(st): State<Arc<MockState>>, headers: HeaderMap) -> Reply {
    st.hits.items.fetch_add(1, Ordering::SeqCst);
    if !st.bearer_ok(&headers) { return unauthorized("token expired"); }
    (StatusCode::OK, Json(json!([{"sku": "A-1", "qty": 4}, {"sku": "B-2", "qty": 0}])))
}

pub async fn spawn() -> Result<MockBackend> {
    let state = Arc::new(MockState {
        hits: Hits::default(),
        tokens: Mutex::new(Tokens::default()),
        refresh_delay: Duration::from_millis(50),
        profile_ok: Mutex::new(true),
    });
    let app = Router::new()
        .route("/auth/signin", post(signin))
        .route("/auth/google", post(google))
        .route("/auth/refresh", post(refresh))
        .route("/auth/validate", get(validate))
        .route("/auth/user/init", get(user_init))
        .route("/api/items", get(items))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            stockdesk::tprintln!("mock backend stopped: {}", e);
        }
    });
    stockdesk::logging::init_for_tests();
    Ok(MockBackend { base: format!("http://{}", addr), state })
}
