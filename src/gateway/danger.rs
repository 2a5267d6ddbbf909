//! Danger-function filter for restricted roles.
//!
//! Matching is a coarse textual check over the lowered raw text, comments and string
//! literals included. In `Substring` mode a column such as `copy_count` trips the `copy`
//! rule; that over-matching is the canonical behavior. `Identifier` mode requires the
//! token to stand alone as an identifier.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Administrative, file, network and process-control operations, in reporting order.
pub const DEFAULT_BLACKLIST: &[&str] = &[
    "pg_sleep",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_read_file",
    "pg_write_file",
    "pg_ls_dir",
    "lo_import",
    "lo_export",
    "lo_create",
    "lo_unlink",
    "current_setting",
    "dblink",
    "dblink_connect",
    "dblink_exec",
    "pg_reload_conf",
    "pg_rotate_logfile",
    "copy",
    "pg_read_binary_file",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Substring,
    Identifier,
}

impl std::str::FromStr for MatchMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substring" => Ok(MatchMode::Substring),
            "identifier" => Ok(MatchMode::Identifier),
            other => Err(format!("unknown blacklist match mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DangerFilter {
    tokens: Vec<String>,
    mode: MatchMode,
}

impl Default for DangerFilter {
    fn default() -> Self { Self::new(DEFAULT_BLACKLIST.iter().copied(), MatchMode::Substring) }
}

fn is_ident_byte(b: u8) -> bool { b.is_ascii_alphanumeric() || b == b'_' || b == b'$' }

impl DangerFilter {
    pub fn new<I, S>(tokens: I, mode: MatchMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = tokens
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { tokens, mode }
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn tokens(&self) -> &[String] { &self.tokens }

    pub fn mode(&self) -> MatchMode { self.mode }

    /// First blacklisted token present in `raw`, in blacklist order.
    pub fn find_match(&self, raw: &str) -> Option<&str> {
        let low = raw.to_lowercase();
        self.tokens.iter().map(String::as_str).find(|t| match self.mode {
            MatchMode::Substring => low.contains(t),
            MatchMode::Identifier => contains_identifier(&low, t),
        })
    }

    pub fn check(&self, raw: &str) -> AppResult<()> {
        match self.find_match(raw) {
            Some(token) => Err(AppError::denied(
                "function_blacklisted".to_string(),
                format!("Function '{}' is not allowed for developer role", token),
            )),
            None => Ok(()),
        }
    }
}

fn contains_identifier(haystack: &str, token: &str) -> bool {
    let bytes = haystack.as_bytes();
    haystack.match_indices(token).any(|(start, m)| {
        let end = start + m.len();
        let before_ok = start == 0 || !is_ident_byte(bytes[start - 1]);
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        before_ok && after_ok
    })
}
