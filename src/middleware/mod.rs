//! Request admission stages run before forwarding

pub mod auth;
pub mod rate_limit;
pub mod target;

pub use auth::{AuthError, Claims, CredentialVerifier};
pub use rate_limit::{AdmissionGate, RateDecision, RateWindow};
pub use target::{ResolveError, Target, TargetResolver};
