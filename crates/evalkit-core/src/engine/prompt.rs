//! Case prompt templating.
//!
//! Placeholders follow the `{name}` / `{name:spec}` / `{name!conv}` shape of
//! Python format strings, but only the name is used: format specs and
//! conversions are accepted and ignored. Booleans and null render as `True`,
//! `False` and `None`; arrays and objects render as JSON.

use serde_json::{Map, Value};

/// Substitute `{key}` placeholders from case metadata. `{{` and `}}` escape
/// literal braces. A missing key or unbalanced brace leaves the template
/// untouched.
pub fn render(template: &str, metadata: &Map<String, Value>) -> String {
    if metadata.is_empty() {
        return template.to_string();
    }
    try_render(template, metadata).unwrap_or_else(|| template.to_string())
}

fn try_render(template: &str, metadata: &Map<String, Value>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next()? {
                        '}' => break,
                        '{' => return None,
                        k => key.push(k),
                    }
                }
                let name = key.split([':', '!']).next().unwrap_or_default();
                match metadata.get(name)? {
                    Value::String(s) => out.push_str(s),
                    Value::Bool(true) => out.push_str("True"),
                    Value::Bool(false) => out.push_str("False"),
                    Value::Null => out.push_str("None"),
                    other => out.push_str(&other.to_string()),
                }
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return None,
            c => out.push(c),
        }
    }
    Some(out)
}
