//! Session and request-authorization core of the inventory admin console.
//!
//! Build an [`AuthContext`] from a [`SessionConfig`], sign in through it, and
//! send backend calls through its [`AuthorizedClient`]; expired tokens are
//! refreshed once for however many calls noticed the expiry.

pub mod error;
pub mod config;
pub mod logging;
pub mod transport;
pub mod identity;
pub mod client;
pub mod context;
mod flight;

#[cfg(test)]
mod testing;

pub use client::AuthorizedClient;
pub use config::{AuthEndpoints, GuardConfig, RefreshPolicy, SessionConfig};
pub use context::AuthContext;
pub use error::{AuthError, AuthResult};
pub use identity::{NavOutcome, Session, SessionState};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};

// Test-only printing helper: expands to eprintln! during tests and debug builds.
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
