//! Placeholder substitution for notification text.
//!
//! Only `{{key}}` lookups against the request data are supported. Anything
//! richer belongs to a dedicated template engine.

use serde_json::{Map, Value};

/// Replace every `{{key}}` in `template` with the matching entry of `data`.
///
/// String values are inserted verbatim, other JSON values by their JSON text.
/// Unknown keys and unterminated braces are left untouched.
pub fn render(template: &str, data: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let key = after_open[..end].trim();
        match data.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}
