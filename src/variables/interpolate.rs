//! `${token}` / `{{token}}` substitution against an [`ExecutionState`].
//!
//! Token grammar:
//!
//! ```text
//! token          := alternative ( "|" alternative )*
//! alternative    := literal | namespaced_ref | bare_path
//! literal        := quoted_string | integer | float | "true" | "false"
//! namespaced_ref := "@" identifier ( "/" path )?
//! ```
//!
//! A value that is exactly one token keeps the resolved value's JSON type.
//! Mixed content always yields a string. Unresolved tokens are dropped.

use crate::variables::state::{ExecutionState, VariableMap};
use serde_json::{Number, Value};

/// Upper bound on substitution passes over a single string.
pub const MAX_PASSES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closer {
    Brace,
    DoubleBrace,
}

/// Byte span of one token inside a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TokenSpan {
    pub start: usize,
    pub body_start: usize,
    pub body_end: usize,
    pub end: usize,
}

/// Find the first complete token at or after `from`.
pub(crate) fn find_token(input: &str, from: usize) -> Option<TokenSpan> {
    let bytes = input.as_bytes();
    let mut i = from;
    while i + 1 < bytes.len() {
        let closer = match (bytes[i], bytes[i + 1]) {
            (b'$', b'{') => Some(Closer::Brace),
            (b'{', b'{') => Some(Closer::DoubleBrace),
            _ => None,
        };
        if let Some(closer) = closer {
            if let Some(body_end) = matching_close(bytes, i + 2, closer) {
                let end = match closer {
                    Closer::Brace => body_end + 1,
                    Closer::DoubleBrace => body_end + 2,
                };
                return Some(TokenSpan {
                    start: i,
                    body_start: i + 2,
                    body_end,
                    end,
                });
            }
        }
        i += 1;
    }
    None
}

/// Index of the closer matching an opener whose body starts at `body_start`.
fn matching_close(bytes: &[u8], body_start: usize, closer: Closer) -> Option<usize> {
    let mut stack = vec![closer];
    let mut i = body_start;
    while i < bytes.len() {
        let rest = &bytes[i..];
        if rest.starts_with(b"${") {
            stack.push(Closer::Brace);
            i += 2;
            continue;
        }
        if rest.starts_with(b"{{") {
            stack.push(Closer::DoubleBrace);
            i += 2;
            continue;
        }
        match stack.last() {
            Some(Closer::DoubleBrace) if rest.starts_with(b"}}") => {
                stack.pop();
                if stack.is_empty() {
                    return Some(i);
                }
                i += 2;
                continue;
            }
            Some(Closer::Brace) if rest[0] == b'}' => {
                stack.pop();
                if stack.is_empty() {
                    return Some(i);
                }
                i += 1;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

pub fn contains_token(input: &str) -> bool {
    find_token(input, 0).is_some()
}

/// Interpolate a string, preserving the native type when the whole (trimmed)
/// input is a single token.
pub fn interpolate_str(input: &str, state: &ExecutionState) -> Value {
    let trimmed = input.trim();
    if let Some(span) = find_token(trimmed, 0) {
        if span.start == 0 && span.end == trimmed.len() {
            return match resolve_token(&trimmed[span.body_start..span.body_end], state) {
                Some(Value::String(s)) => Value::String(interpolate_string(&s, state)),
                Some(value) => value,
                None => Value::String(String::new()),
            };
        }
    } else {
        return Value::String(input.to_string());
    }
    Value::String(interpolate_string(input, state))
}

/// Interpolate a string and always return a string.
pub fn interpolate_string(input: &str, state: &ExecutionState) -> String {
    let mut current = input.to_string();
    for _ in 0..MAX_PASSES {
        if !contains_token(&current) {
            break;
        }
        let next = substitute_once(&current, state);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn substitute_once(input: &str, state: &ExecutionState) -> String {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    while let Some(span) = find_token(input, cursor) {
        out.push_str(&input[cursor..span.start]);
        if let Some(value) = resolve_token(&input[span.body_start..span.body_end], state) {
            out.push_str(&stringify(&value));
        }
        cursor = span.end;
    }
    out.push_str(&input[cursor..]);
    out
}

/// Resolve the inside of one token. Nested tokens in the body are expanded
/// first; alternatives are then tried left to right.
pub fn resolve_token(body: &str, state: &ExecutionState) -> Option<Value> {
    let body = if contains_token(body) {
        interpolate_string(body, state)
    } else {
        body.to_string()
    };

    for alternative in split_alternatives(&body) {
        let alternative = alternative.trim();
        if alternative.is_empty() {
            continue;
        }
        if let Some(literal) = parse_literal(alternative) {
            return Some(literal);
        }
        let resolved = match alternative.strip_prefix('@') {
            Some(reference) => {
                let (namespace, path) = reference.split_once('/').unwrap_or((reference, ""));
                state.resolve_namespaced(namespace, path)
            }
            None => state.resolve(alternative),
        };
        match resolved {
            Some(Value::Null) | None => continue,
            Some(value) => return Some(value),
        }
    }
    None
}

/// Split on `|` outside of quoted sections.
fn split_alternatives(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, ch) in body.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == '|' => {
                parts.push(&body[start..idx]);
                start = idx + 1;
            }
            None => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// Quoted strings, integers, floats and booleans.
pub(crate) fn parse_literal(raw: &str) -> Option<Value> {
    if let Some(unquoted) = unquote(raw) {
        return Some(Value::String(unquoted.to_string()));
    }
    match raw {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        _ => {}
    }
    parse_number(raw).map(Value::Number)
}

pub(crate) fn unquote(raw: &str) -> Option<&str> {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'') && first == last {
            return Some(&raw[1..raw.len() - 1]);
        }
    }
    None
}

pub(crate) fn parse_number(raw: &str) -> Option<Number> {
    let first = raw.chars().next()?;
    if !(first.is_ascii_digit() || first == '-' || first == '+' || first == '.') {
        return None;
    }
    if !raw.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Some(Number::from(int));
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }
    raw.parse::<f64>().ok().and_then(Number::from_f64)
}

/// Canonical string form used for mixed-content substitution and equality.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) if map.len() == 1 && map.contains_key("value") => {
            stringify(&map["value"])
        }
        Value::Object(_) | Value::Array(_) => serde_json::to_string(value).unwrap_or_default(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
    }
}

/// Interpolate every string inside a JSON value. Object keys are left alone.
pub fn interpolate_value(value: &Value, state: &ExecutionState) -> Value {
    match value {
        Value::String(s) => interpolate_str(s, state),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, state))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, state)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub fn interpolate_map(map: &VariableMap, state: &ExecutionState) -> VariableMap {
    map.iter()
        .map(|(k, v)| (k.clone(), interpolate_value(v, state)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_with(store: Value, params: Value) -> ExecutionState {
        let to_map = |v: Value| -> VariableMap {
            v.as_object()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()
        };
        ExecutionState::new(to_map(store), to_map(params), VariableMap::new())
    }

    #[test]
    fn test_both_syntaxes_substitute() {
        let state = state_with(json!({ "name": "ada" }), json!({}));
        assert_eq!(interpolate_string("hi ${name}!", &state), "hi ada!");
        assert_eq!(interpolate_string("hi {{name}}!", &state), "hi ada!");
    }

    #[test]
    fn test_single_token_preserves_type() {
        let state = state_with(
            json!({ "count": 3, "flag": true, "obj": { "a": 1 }, "list": [1, 2] }),
            json!({}),
        );
        assert_eq!(interpolate_str("${count}", &state), json!(3));
        assert_eq!(interpolate_str("  {{flag}} ", &state), json!(true));
        assert_eq!(interpolate_str("${obj}", &state), json!({ "a": 1 }));
        assert_eq!(interpolate_str("${list}", &state), json!([1, 2]));
        assert_eq!(interpolate_str("n=${count}", &state), json!("n=3"));
    }

    #[test]
    fn test_namespaced_references() {
        let state = state_with(json!({ "title": "Home" }), json!({ "limit": 10 }));
        assert_eq!(interpolate_str("${@store/title}", &state), json!("Home"));
        assert_eq!(interpolate_str("${@params/limit}", &state), json!(10));
        assert_eq!(interpolate_str("${@unknown/limit}", &state), json!(""));
    }

    #[test]
    fn test_fallback_chain_and_literals() {
        let state = state_with(json!({ "b": "bee" }), json!({}));
        assert_eq!(interpolate_str("${a | b}", &state), json!("bee"));
        assert_eq!(interpolate_str("${a | 'x|y'}", &state), json!("x|y"));
        assert_eq!(interpolate_str("${a | 42}", &state), json!(42));
        assert_eq!(interpolate_str("${a | 2.5}", &state), json!(2.5));
        assert_eq!(interpolate_str("${a | false}", &state), json!(false));
        assert_eq!(interpolate_str("${a | \"quoted\"}", &state), json!("quoted"));
    }

    #[test]
    fn test_nested_tokens() {
        let state = state_with(json!({ "which": "x", "key_x": "found" }), json!({}));
        assert_eq!(interpolate_str("${key_${which}}", &state), json!("found"));
        assert_eq!(interpolate_str("[{{key_${which}}}]", &state), json!("[found]"));
    }

    #[test]
    fn test_unresolved_tokens_are_dropped() {
        let state = ExecutionState::default();
        assert_eq!(interpolate_str("a${missing}b", &state), json!("ab"));
        assert_eq!(interpolate_str("${missing}", &state), json!(""));
        assert_eq!(interpolate_str("no tokens", &state), json!("no tokens"));
        assert_eq!(interpolate_str("${unclosed", &state), json!("${unclosed"));
    }

    #[test]
    fn test_self_reference_terminates() {
        let state = state_with(json!({ "loop": "${loop}" }), json!({}));
        let once = interpolate_string("x ${loop}", &state);
        assert_eq!(once, "x ${loop}");
        assert_eq!(interpolate_string(&once, &state), once);
    }

    #[test]
    fn test_idempotent_on_unchanged_store() {
        let state = state_with(json!({ "a": "1", "b": { "value": "two" } }), json!({}));
        let first = interpolate_string("${a}-${b}-${c}", &state);
        assert_eq!(first, "1-two-");
        assert_eq!(interpolate_string(&first, &state), first);
    }

    #[test]
    fn test_stringify_rules() {
        assert_eq!(stringify(&json!({ "value": { "value": 7 } })), "7");
        assert_eq!(stringify(&json!({ "b": 1, "a": 2 })), "{\"a\":2,\"b\":1}");
        assert_eq!(stringify(&json!([1, "x"])), "[1,\"x\"]");
        assert_eq!(stringify(&json!(1.5)), "1.5");
        assert_eq!(stringify(&json!(false)), "false");
    }

    #[test]
    fn test_interpolate_value_recurses() {
        let state = state_with(json!({ "sel": "#go", "n": 2 }), json!({}));
        let params = json!({ "selector": "${sel}", "nested": { "times": "${n}", "list": ["${sel}", 1] } });
        assert_eq!(
            interpolate_value(&params, &state),
            json!({ "selector": "#go", "nested": { "times": 2, "list": ["#go", 1] } })
        );
    }
}
