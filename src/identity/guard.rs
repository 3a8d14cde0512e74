//! Pre-navigation authorization.
//!
//! Holds no state of its own between navigations: every decision reads the
//! credential store and the published session at the time of the check.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::route::{RouteMeta, RouteTable};
use super::session::{ProfileSource, SessionState};
use crate::config::GuardConfig;
use crate::logging::TARGET_GUARD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavOutcome {
    Allow,
    RedirectToLogin,
    RedirectToForbidden,
}

impl NavOutcome {
    pub fn is_allowed(&self) -> bool { matches!(self, NavOutcome::Allow) }

    /// Where the host should navigate instead, `None` when the navigation proceeds.
    pub fn redirect_path<'a>(&self, config: &'a GuardConfig) -> Option<&'a str> {
        match self {
            NavOutcome::Allow => None,
            NavOutcome::RedirectToLogin => Some(config.login_path.as_str()),
            NavOutcome::RedirectToForbidden => Some(config.forbidden_path.as_str()),
        }
    }
}

#[derive(Clone)]
pub struct RouteGuard {
    session: SessionState,
    source: Arc<dyn ProfileSource>,
}

impl RouteGuard {
    pub fn new(session: SessionState, source: Arc<dyn ProfileSource>) -> Self { Self { session, source } }

    pub async fn check(&self, route: &RouteMeta) -> NavOutcome {
        loop {
            if self.session.access_token().is_none() {
                debug!(target: TARGET_GUARD, "no token for {}; redirecting to login", route.path);
                return NavOutcome::RedirectToLogin;
            }
            if self.session.current().is_hydrated() {
                break;
            }
            let generation = self.session.generation();
            match self.session.hydrate(self.source.as_ref()).await {
                Ok(_) => break,
                Err(e) => {
                    warn!(target: TARGET_GUARD, "hydration failed for {}: {}", route.path, e);
                    if self.session.teardown_if_current(generation) {
                        return NavOutcome::RedirectToLogin;
                    }
                    // a different session is active now; decide for that one
                    debug!(target: TARGET_GUARD, "session changed during hydration; checking {} again", route.path);
                }
            }
        }

        let Some(capability) = route.required_capability() else {
            return NavOutcome::Allow;
        };
        if self.session.has_capability(capability) {
            NavOutcome::Allow
        } else {
            info!(target: TARGET_GUARD, "denied {} (missing {})", route.path, capability);
            NavOutcome::RedirectToForbidden
        }
    }

    /// Resolve `path` in `routes` and check it.
    pub async fn check_path(&self, routes: &RouteTable, path: &str) -> NavOutcome {
        self.check(&routes.resolve(path)).await
    }
}
