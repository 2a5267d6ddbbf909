use std::collections::HashMap;
use std::path::Path;

use axum::http::HeaderMap;
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use super::principal::{Principal, Role};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read token file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid token file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("duplicate token for user '{0}'")]
    DuplicateToken(String),
}

/// Resolves a credential presented by the caller to the principal it belongs to.
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, credential: &str) -> Option<Principal>;
}

/// One row of the token file.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub id: i64,
    pub username: String,
    pub role: Role,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool { true }

/// Fixed credential table, typically provisioned by the external identity service.
#[derive(Default)]
pub struct StaticTokenProvider {
    tokens: RwLock<HashMap<String, Principal>>,
}

impl StaticTokenProvider {
    pub fn new() -> Self { Self::default() }

    pub fn from_entries<I: IntoIterator<Item = TokenEntry>>(entries: I) -> Result<Self, IdentityError> {
        let provider = Self::new();
        for e in entries {
            let principal = Principal { id: e.id, username: e.username, role: e.role, is_active: e.is_active };
            provider.insert(e.token, principal)?;
        }
        Ok(provider)
    }

    pub fn from_file(path: &Path) -> Result<Self, IdentityError> {
        let shown = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| IdentityError::Read { path: shown.clone(), source })?;
        let entries: Vec<TokenEntry> = serde_json::from_str(&text).map_err(|source| IdentityError::Parse { path: shown.clone(), source })?;
        let provider = Self::from_entries(entries)?;
        info!(target: "sqlgate::identity", path = %shown, tokens = provider.len(), "loaded token table");
        Ok(provider)
    }

    pub fn insert(&self, token: String, principal: Principal) -> Result<(), IdentityError> {
        let mut map = self.tokens.write();
        if map.contains_key(&token) {
            return Err(IdentityError::DuplicateToken(principal.username));
        }
        map.insert(token, principal);
        Ok(())
    }

    pub fn revoke(&self, token: &str) -> bool { self.tokens.write().remove(token).is_some() }

    pub fn len(&self) -> usize { self.tokens.read().len() }

    pub fn is_empty(&self) -> bool { self.tokens.read().is_empty() }
}

impl IdentityProvider for StaticTokenProvider {
    fn resolve(&self, credential: &str) -> Option<Principal> {
        self.tokens.read().get(credential).cloned()
    }
}

/// Extract the credential from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") { return None; }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token.to_string()) }
}
