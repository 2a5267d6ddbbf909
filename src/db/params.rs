//! Named bind placeholders (`:name`) resolved to engine positional parameters.
//!
//! The engine sees `$n` placeholders and receives every value out-of-band through the
//! extended query protocol; values never enter the statement text.

use std::error::Error;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tokio_postgres::types::{to_sql_checked, IsNull, Kind, ToSql, Type};
use uuid::Uuid;

use super::EngineFailure;
use crate::gateway::binder::BindParams;

type BoxError = Box<dyn Error + Sync + Send>;

/// Fragment the error classifier looks for.
pub const MISSING_BIND_MESSAGE: &str = "value is required for bind parameter";

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledStatement {
    /// Text with `:name` replaced by `$n`; identical to the input when it has none.
    pub sql: String,
    /// Parameter names in `$n` order; a repeated name reuses its slot.
    pub names: Vec<String>,
}

fn is_word(c: char) -> bool { c.is_alphanumeric() || c == '_' }

/// Length in bytes of a dollar-quote tag (`$tag$` or `$$`) starting at `s`, if any.
fn dollar_tag_len(s: &str) -> Option<usize> {
    let mut chars = s.char_indices();
    chars.next().filter(|(_, c)| *c == '$')?;
    for (i, c) in chars {
        if c == '$' {
            return Some(i + 1);
        }
        if !(c.is_alphanumeric() || c == '_') || (i == 1 && c.is_ascii_digit()) {
            return None;
        }
    }
    None
}

/// Rewrite `:name` placeholders outside literals, quoted identifiers, comments and
/// dollar-quoted bodies. `::` casts and `a:b` forms are left alone; `:name::type` binds.
pub fn compile_named(sql: &str) -> CompiledStatement {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;
    let mut prev: Option<char> = None;

    while i < sql.len() {
        let rest = &sql[i..];
        let Some(c) = rest.chars().next() else { break };

        if c == '\'' {
            let escape_backslash = matches!(prev, Some('e') | Some('E'));
            let end = scan_quoted(rest, '\'', escape_backslash);
            out.push_str(&rest[..end]);
            i += end;
            prev = Some('\'');
            continue;
        }
        if c == '"' {
            let end = scan_quoted(rest, '"', false);
            out.push_str(&rest[..end]);
            i += end;
            prev = Some('"');
            continue;
        }
        if rest.starts_with("--") {
            let end = rest.find('\n').map(|n| n + 1).unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            i += end;
            prev = Some('\n');
            continue;
        }
        if rest.starts_with("/*") {
            let end = scan_block_comment(rest);
            out.push_str(&rest[..end]);
            i += end;
            prev = Some(' ');
            continue;
        }
        if c == '$' && !prev.map(is_word).unwrap_or(false) {
            if let Some(tag_len) = dollar_tag_len(rest) {
                let tag = &rest[..tag_len];
                let end = rest[tag_len..].find(tag).map(|n| tag_len + n + tag_len).unwrap_or(rest.len());
                out.push_str(&rest[..end]);
                i += end;
                prev = Some('$');
                continue;
            }
        }
        if rest.starts_with("::") {
            out.push_str("::");
            i += 2;
            prev = Some(':');
            continue;
        }
        if c == ':' && !prev.map(|p| is_word(p) || p == ':' || p == '\\').unwrap_or(false) {
            let name_len: usize = rest[1..]
                .char_indices()
                .take_while(|(idx, ch)| if *idx == 0 { ch.is_alphabetic() || *ch == '_' } else { is_word(*ch) })
                .map(|(_, ch)| ch.len_utf8())
                .sum();
            let after = &rest[1 + name_len..];
            let followed_by_colon = after.starts_with(':') && !after.starts_with("::");
            if name_len > 0 && !followed_by_colon {
                let name = &rest[1..1 + name_len];
                let slot = match names.iter().position(|n| n == name) {
                    Some(pos) => pos + 1,
                    None => {
                        names.push(name.to_string());
                        names.len()
                    }
                };
                out.push('$');
                out.push_str(&slot.to_string());
                i += 1 + name_len;
                prev = name.chars().last();
                continue;
            }
        }
        out.push(c);
        i += c.len_utf8();
        prev = Some(c);
    }

    CompiledStatement { sql: out, names }
}

/// End offset (exclusive) of a quoted run starting at `s[0] == quote`. Doubled quotes
/// escape; unterminated runs extend to the end of input.
fn scan_quoted(s: &str, quote: char, escape_backslash: bool) -> usize {
    let mut iter = s.char_indices().skip(1).peekable();
    while let Some((idx, ch)) = iter.next() {
        if escape_backslash && ch == '\\' {
            iter.next();
            continue;
        }
        if ch == quote {
            if let Some((_, next)) = iter.peek() {
                if *next == quote {
                    iter.next();
                    continue;
                }
            }
            return idx + ch.len_utf8();
        }
    }
    s.len()
}

/// Block comments nest in PostgreSQL.
fn scan_block_comment(s: &str) -> usize {
    let mut depth = 0usize;
    let mut i = 0;
    while i < s.len() {
        let rest = &s[i..];
        if rest.starts_with("/*") {
            depth += 1;
            i += 2;
        } else if rest.starts_with("*/") {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += rest.chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        }
    }
    s.len()
}

/// Values for each compiled slot, in order. An absent name is a binding failure.
pub(crate) fn resolve_binds(names: &[String], params: &BindParams) -> Result<Vec<BindValue>, EngineFailure> {
    names
        .iter()
        .map(|name| match params.get(name) {
            Some(v) => Ok(BindValue(v.clone())),
            None => Err(EngineFailure::engine(format!("A {} '{}'", MISSING_BIND_MESSAGE, name))),
        })
        .collect()
}

/// A JSON value encoded according to the parameter type the engine inferred.
#[derive(Debug, Clone)]
pub(crate) struct BindValue(pub Value);

impl ToSql for BindValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        let v = &self.0;
        if v.is_null() {
            return Ok(IsNull::Yes);
        }
        match *ty {
            Type::BOOL => as_bool(v)?.to_sql(ty, out),
            Type::INT2 => i16::try_from(as_i64(v)?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(as_i64(v)?)?.to_sql(ty, out),
            Type::INT8 => as_i64(v)?.to_sql(ty, out),
            Type::OID => u32::try_from(as_i64(v)?)?.to_sql(ty, out),
            Type::FLOAT4 => (as_f64(v)? as f32).to_sql(ty, out),
            Type::FLOAT8 => as_f64(v)?.to_sql(ty, out),
            Type::NUMERIC => {
                encode_numeric(&numeric_text(v)?, out)?;
                Ok(IsNull::No)
            }
            Type::JSON | Type::JSONB => v.to_sql(ty, out),
            Type::DATE => parse_date(as_str(v)?)?.to_sql(ty, out),
            Type::TIMESTAMP => parse_timestamp(as_str(v)?)?.to_sql(ty, out),
            Type::TIMESTAMPTZ => parse_timestamptz(as_str(v)?)?.to_sql(ty, out),
            Type::UUID => Uuid::parse_str(as_str(v)?.trim())?.to_sql(ty, out),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => text_of(v).as_str().to_sql(ty, out),
            // Each element is coerced to the member type; nulls inside the list stay NULL.
            _ if matches!(ty.kind(), Kind::Array(_)) => match v {
                Value::Array(items) => items.iter().cloned().map(BindValue).collect::<Vec<_>>().to_sql(ty, out),
                other => Err(format!("expected a list for {}, got {}", ty, other).into()),
            },
            _ if matches!(ty.kind(), Kind::Enum(_)) || ty.name() == "citext" => text_of(v).as_str().to_sql(ty, out),
            _ => Err(format!("cannot bind a value to a parameter of type {}", ty).into()),
        }
    }

    fn accepts(_ty: &Type) -> bool { true }

    to_sql_checked!();
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_str(v: &Value) -> Result<&str, BoxError> {
    v.as_str().ok_or_else(|| format!("expected a string, got {}", v).into())
}

fn as_bool(v: &Value) -> Result<bool, BoxError> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "off" | "0" => Ok(false),
            _ => Err(format!("invalid boolean '{}'", s).into()),
        },
        other => Err(format!("invalid boolean {}", other).into()),
    }
}

fn as_i64(v: &Value) -> Result<i64, BoxError> {
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                _ => Err(format!("invalid integer {}", n).into()),
            }
        }
        Value::String(s) => Ok(s.trim().parse::<i64>()?),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(format!("invalid integer {}", other).into()),
    }
}

fn as_f64(v: &Value) -> Result<f64, BoxError> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("invalid number {}", n).into()),
        Value::String(s) => Ok(s.trim().parse::<f64>()?),
        other => Err(format!("invalid number {}", other).into()),
    }
}

fn numeric_text(v: &Value) -> Result<String, BoxError> {
    match v {
        Value::Number(n) => {
            let s = n.to_string();
            if s.contains(['e', 'E']) {
                let f = n.as_f64().ok_or_else(|| format!("invalid numeric {}", n))?;
                Ok(format!("{}", f))
            } else {
                Ok(s)
            }
        }
        Value::String(s) => Ok(s.trim().to_string()),
        other => Err(format!("invalid numeric {}", other).into()),
    }
}

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

fn parse_date(s: &str) -> Result<NaiveDate, BoxError> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }
    Ok(parse_timestamp(s)?.date())
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, BoxError> {
    let s = s.trim();
    for f in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, f) {
            return Ok(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.naive_utc());
    }
    match NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)) {
        Some(ts) => Ok(ts),
        None => Err(format!("invalid timestamp '{}'", s).into()),
    }
}

/// Offset-less input is taken as UTC.
fn parse_timestamptz(s: &str) -> Result<DateTime<Utc>, BoxError> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(ts.with_timezone(&Utc));
    }
    Ok(parse_timestamp(s)?.and_utc())
}

fn group_value(chunk: &[u8]) -> i16 {
    chunk.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
}

/// Binary NUMERIC wire format: ndigits, weight, sign, dscale, then base-10000 digits.
pub(crate) fn encode_numeric(text: &str, out: &mut BytesMut) -> Result<(), BoxError> {
    let s = text.trim();
    if s.eq_ignore_ascii_case("nan") {
        out.put_i16(0);
        out.put_i16(0);
        out.put_u16(NUMERIC_NAN);
        out.put_u16(0);
        return Ok(());
    }
    let (negative, body) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
    let digits_ok = int_part.bytes().all(|b| b.is_ascii_digit()) && frac_part.bytes().all(|b| b.is_ascii_digit());
    if !digits_ok || (int_part.is_empty() && frac_part.is_empty()) {
        return Err(format!("invalid numeric '{}'", text).into());
    }
    let dscale = u16::try_from(frac_part.len())?;

    let int_digits = int_part.trim_start_matches('0');
    let int_pad = (4 - int_digits.len() % 4) % 4;
    let padded_int = format!("{}{}", "0".repeat(int_pad), int_digits);
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let padded_frac = format!("{}{}", frac_part, "0".repeat(frac_pad));

    let mut groups: Vec<i16> = padded_int.as_bytes().chunks(4).map(group_value).collect();
    let mut weight = i16::try_from(groups.len())? - 1;
    groups.extend(padded_frac.as_bytes().chunks(4).map(group_value));

    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= i16::try_from(leading)?;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }
    let sign = if negative && !groups.is_empty() { NUMERIC_NEG } else { NUMERIC_POS };

    out.put_i16(i16::try_from(groups.len())?);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_u16(dscale);
    for g in groups {
        out.put_i16(g);
    }
    Ok(())
}
