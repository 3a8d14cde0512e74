//! Credentials, session state and authorization decisions for the admin console.
//! Keep the public surface thin and split implementation across sub-modules.

mod store;
mod profile;
mod authorizer;
mod session;
mod provider;
mod refresh;
mod route;
mod guard;

pub use store::{CredentialKey, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use profile::{ApplicationMap, ModuleMap, UserProfile};
pub use authorizer::PermissionSet;
pub use session::{ProfileSource, Session, SessionState, SessionStream};
pub use provider::{AuthProvider, LoginRequest, LoginResponse, RemoteAuthProvider, TokenPair};
pub use refresh::{CycleState, RefreshCoordinator};
pub use route::{RouteMeta, RouteTable};
pub use guard::{NavOutcome, RouteGuard};
