//! Bind-parameter defaults for templated report queries.

use serde_json::{Map, Value};

/// Named parameters the report templates reference; unset ones bind as NULL.
pub const CONVENTIONAL_PARAMS: [&str; 3] = ["p_date_from", "p_date_to", "p_object_id"];

pub type BindParams = Map<String, Value>;

/// Complete the caller's mapping with NULL for every conventional name it omitted.
/// Supplied values, including undeclared names, pass through untouched.
pub fn bind_with_defaults(supplied: Option<&BindParams>) -> BindParams {
    let mut params = supplied.cloned().unwrap_or_default();
    for name in CONVENTIONAL_PARAMS {
        params.entry(name.to_string()).or_insert(Value::Null);
    }
    params
}
