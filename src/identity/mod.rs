//! Identity collaborator boundary: resolving an inbound credential to a `Principal`.
//! Token issuance and account management live outside this crate.

mod principal;
mod provider;
mod request_context;

pub use principal::{Principal, Role};
pub use provider::{IdentityError, IdentityProvider, StaticTokenProvider, TokenEntry, bearer_token};
pub use request_context::RequestContext;
