//! AdvisorDesk session core.
//!
//! Bootstraps an authenticated session for the advisor dashboard: detects a
//! trusted serving environment, acquires a credential through the tiered
//! acquisition chain, persists it, and resolves the signed-in user to an
//! advisor record. Consumers read the published `AuthSession`.

pub mod advisor;
pub mod api;
pub mod auth;
pub mod backend;
pub mod config;
pub mod environment;
pub mod error;
pub mod session;
pub mod session_store;

pub use advisor::{AdvisorRecord, AdvisorResolver};
pub use api::DashboardClient;
pub use auth::federated::{IdentityWidget, SignInCallback};
pub use auth::{CredentialSource, SignInOutcome};
pub use config::{load_config, AuthConfig};
pub use error::{AuthError, ConfigError, StoreError};
pub use session::{AuthSession, Identity, Session};
pub use session_store::{FileStorage, KeyValueStorage, MemoryStorage, SessionStore};
