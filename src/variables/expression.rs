//! Boolean expressions used by conditionals, while loops and edge labels.
//!
//! Supported forms: `true` / `false` (any case), a single interpolation that
//! resolves to a boolean, and one binary comparison `LHS OP RHS` with
//! `OP` in `== != > >= < <=`. Anything else evaluates to `None`.

use crate::variables::interpolate::{
    find_token, interpolate_str, parse_number, stringify, unquote,
};
use crate::variables::state::ExecutionState;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

/// Evaluate `expr`. `None` means the expression is outside the grammar or
/// could not be compared; callers treat that as "not satisfied".
pub fn evaluate_expression(expr: &str, state: &ExecutionState) -> Option<bool> {
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }
    if expr.eq_ignore_ascii_case("true") {
        return Some(true);
    }
    if expr.eq_ignore_ascii_case("false") {
        return Some(false);
    }

    match split_comparison(expr) {
        Some((lhs, op, rhs)) => {
            let left = operand_value(lhs, state);
            let right = operand_value(rhs, state);
            compare(&left, op, &right)
        }
        None => single_operand(expr, state),
    }
}

/// A lone interpolation is accepted when it resolves to a boolean.
fn single_operand(expr: &str, state: &ExecutionState) -> Option<bool> {
    let span = find_token(expr, 0)?;
    if span.start != 0 || span.end != expr.len() {
        return None;
    }
    match interpolate_str(expr, state) {
        Value::Bool(b) => Some(b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Find the first comparison operator outside quotes and tokens.
fn split_comparison(expr: &str) -> Option<(&str, CompareOp, &str)> {
    let bytes = expr.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if b == b'"' || b == b'\'' {
            quote = Some(b);
            i += 1;
            continue;
        }
        if b == b'$' || b == b'{' {
            if let Some(span) = find_token(expr, i) {
                if span.start == i {
                    i = span.end;
                    continue;
                }
            }
        }
        let next = bytes.get(i + 1).copied();
        let (op, width) = match (b, next) {
            (b'=', Some(b'=')) => (Some(CompareOp::Eq), 2),
            (b'!', Some(b'=')) => (Some(CompareOp::Ne), 2),
            (b'>', Some(b'=')) => (Some(CompareOp::Ge), 2),
            (b'<', Some(b'=')) => (Some(CompareOp::Le), 2),
            (b'>', _) => (Some(CompareOp::Gt), 1),
            (b'<', _) => (Some(CompareOp::Lt), 1),
            _ => (None, 1),
        };
        if let Some(op) = op {
            let lhs = expr[..i].trim();
            let rhs = expr[i + width..].trim();
            if lhs.is_empty() || rhs.is_empty() {
                return None;
            }
            return Some((lhs, op, rhs));
        }
        i += 1;
    }
    None
}

fn operand_value(raw: &str, state: &ExecutionState) -> Value {
    let raw = raw.trim();
    if let Some(unquoted) = unquote(raw) {
        return Value::String(unquoted.to_string());
    }
    if find_token(raw, 0).is_some() {
        return interpolate_str(raw, state);
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Some(number) = parse_number(raw) {
        return Value::Number(number);
    }
    if let Some(reference) = raw.strip_prefix('@') {
        let (namespace, path) = reference.split_once('/').unwrap_or((reference, ""));
        return state
            .resolve_namespaced(namespace, path)
            .unwrap_or(Value::Null);
    }
    state.resolve(raw).unwrap_or(Value::Null)
}

/// Equality uses canonical stringification; ordering needs two numbers.
pub fn compare(left: &Value, op: CompareOp, right: &Value) -> Option<bool> {
    match op {
        CompareOp::Eq => Some(stringify(left) == stringify(right)),
        CompareOp::Ne => Some(stringify(left) != stringify(right)),
        CompareOp::Gt => Some(as_f64(left)? > as_f64(right)?),
        CompareOp::Ge => Some(as_f64(left)? >= as_f64(right)?),
        CompareOp::Lt => Some(as_f64(left)? < as_f64(right)?),
        CompareOp::Le => Some(as_f64(left)? <= as_f64(right)?),
    }
}

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Null | Value::Bool(_) => None,
        other => {
            let text = stringify(other);
            let text = text.trim();
            if text.is_empty() {
                None
            } else {
                text.parse::<f64>().ok().filter(|f| f.is_finite())
            }
        }
    }
}

/// Compare a variable against an expected value with a named operator, as
/// used by `variable` while-loop conditions.
pub fn compare_named(actual: Option<&Value>, operator: &str, expected: &Value) -> Option<bool> {
    let actual_value = actual.cloned().unwrap_or(Value::Null);
    let op = operator.trim().to_ascii_lowercase();
    match op.as_str() {
        "equals" | "eq" | "==" | "" => compare(&actual_value, CompareOp::Eq, expected),
        "notequals" | "not_equals" | "ne" | "!=" => compare(&actual_value, CompareOp::Ne, expected),
        "greaterthan" | "greater_than" | "gt" | ">" => compare(&actual_value, CompareOp::Gt, expected),
        "greaterthanorequal" | "greater_or_equal" | "gte" | ">=" => {
            compare(&actual_value, CompareOp::Ge, expected)
        }
        "lessthan" | "less_than" | "lt" | "<" => compare(&actual_value, CompareOp::Lt, expected),
        "lessthanorequal" | "less_or_equal" | "lte" | "<=" => {
            compare(&actual_value, CompareOp::Le, expected)
        }
        "contains" => Some(stringify(&actual_value).contains(&stringify(expected))),
        "notcontains" | "not_contains" => {
            Some(!stringify(&actual_value).contains(&stringify(expected)))
        }
        "startswith" | "starts_with" => {
            Some(stringify(&actual_value).starts_with(&stringify(expected)))
        }
        "endswith" | "ends_with" => Some(stringify(&actual_value).ends_with(&stringify(expected))),
        "exists" => Some(actual.is_some_and(|v| !v.is_null())),
        "notexists" | "not_exists" => Some(actual.map_or(true, |v| v.is_null())),
        "truthy" | "istrue" | "is_true" => Some(is_truthy(&actual_value)),
        "falsy" | "isfalse" | "is_false" => Some(!is_truthy(&actual_value)),
        _ => None,
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && !s.eq_ignore_ascii_case("false") && s != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
