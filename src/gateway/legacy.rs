//! Deprecated keyword-ban check used by the optional `/query` endpoint.
//!
//! Kept apart from the role pipeline. The ban is a plain substring test over the whole
//! lowered text, so `'drop me'` inside a literal is rejected too.

/// Row ceiling the legacy endpoint has always applied.
pub const LEGACY_MAX_ROWS: usize = 500;

pub const FORBIDDEN_KEYWORDS: [&str; 7] = ["drop ", "delete ", "update ", "insert ", "alter ", "create ", "truncate "];

pub fn is_sql_safe(raw: &str) -> bool {
    let q = raw.trim().to_lowercase();
    q.starts_with("select") && !FORBIDDEN_KEYWORDS.iter().any(|k| q.contains(k))
}
