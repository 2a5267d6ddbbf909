//! Statement classification for authorization.
//!
//! Only a derived label comes out of here. The text handed to the engine is always the
//! caller's original string; nothing in this module produces a replacement query.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static LEADING_BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*/\*.*?\*/\s*").unwrap_or_else(|_| Regex::new("^$").unwrap())
});

/// Number of leading characters inspected when classifying.
const PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementKind {
    Select,
    With,
    Other,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "SELECT",
            StatementKind::With => "WITH",
            StatementKind::Other => "OTHER",
        }
    }
}

/// Skip leading whitespace, one leading block comment, then blank and `--` lines.
/// Returns the slice of `raw` that starts at the first substantive character.
pub fn substantive_start(raw: &str) -> &str {
    let mut s = raw.trim_start();
    if let Some(m) = LEADING_BLOCK_COMMENT.find(s) {
        s = &s[m.end()..];
    }
    loop {
        let (line, rest) = match s.find('\n') {
            Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
            None => (s, None),
        };
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            match rest {
                Some(r) => { s = r; continue; }
                None => return "",
            }
        }
        return s.trim_start();
    }
}

/// Classify using the first characters of the first substantive line.
pub fn classify(raw: &str) -> StatementKind {
    let start = substantive_start(raw);
    let prefix: String = start.chars().take(PREFIX_LEN).collect::<String>().to_uppercase();
    if prefix.starts_with("SELECT") {
        StatementKind::Select
    } else if prefix.starts_with("WITH") {
        StatementKind::With
    } else {
        StatementKind::Other
    }
}

/// True when the text has no statement once leading noise is removed.
pub fn is_effectively_empty(raw: &str) -> bool {
    substantive_start(raw).is_empty()
}
