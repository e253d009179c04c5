//! Assertion evaluation over a fixed response snapshot.
//!
//! Every assertion produces a structured [`AssertionOutcome`]; a failing
//! assertion never short-circuits the ones after it. The only hard error the
//! evaluator raises is a malformed `matches` pattern, which is a
//! configuration mistake rather than a test failure.

use regex::Regex;
use serde_json::Value;

use crate::errors::EngineError;
use crate::jsonpath::{self, Extracted};
use crate::model::{Assertion, AssertionType, AssertionOutcome, Operator};

/// Maximum length of the actual value echoed in failure messages.
const ACTUAL_PREVIEW_CHARS: usize = 256;

/// Fixed snapshot of a response, shared by assertions and captures within a
/// step attempt.
#[derive(Debug)]
pub struct ResponseView<'a> {
    pub status: u16,
    /// Decoded body, present only for JSON-family content types.
    pub json: Option<&'a Value>,
    pub headers: &'a [(String, String)],
    /// Raw body as UTF-8 text, when it decodes.
    pub body_text: Option<&'a str>,
    /// Wall-clock from request send to last body byte.
    pub elapsed_ms: u64,
}

impl ResponseView<'_> {
    /// First value of a named header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Evaluates every assertion in document order.
pub fn evaluate_all(
    assertions: &[Assertion],
    view: &ResponseView<'_>,
) -> Result<Vec<AssertionOutcome>, EngineError> {
    assertions.iter().map(|a| evaluate(a, view)).collect()
}

/// Evaluates one assertion against the snapshot.
pub fn evaluate(
    assertion: &Assertion,
    view: &ResponseView<'_>,
) -> Result<AssertionOutcome, EngineError> {
    let actual = source_actual(assertion, view);
    let (passed, detail) = apply_operator(assertion.operator, &actual, &assertion.expect)?;

    let message = if passed {
        "ok".to_string()
    } else {
        failure_message(assertion, &actual, detail)
    };

    Ok(AssertionOutcome {
        passed,
        kind: assertion.kind,
        operator: assertion.operator,
        path: assertion.path.clone(),
        expect: assertion.expect.clone(),
        actual: actual.into_value(),
        message,
    })
}

/// Sources the actual value according to the assertion type. A value that
/// cannot be sourced (missing path, missing header, non-JSON body for a
/// `json_path` check) is a `Miss`.
fn source_actual(assertion: &Assertion, view: &ResponseView<'_>) -> Extracted {
    match assertion.kind {
        AssertionType::Status => Extracted::Value(Value::from(view.status)),
        AssertionType::ResponseTime => Extracted::Value(Value::from(view.elapsed_ms)),
        AssertionType::JsonPath => match (view.json, assertion.path.as_deref()) {
            (Some(json), Some(path)) => jsonpath::extract(json, path),
            _ => Extracted::Miss,
        },
        AssertionType::Header => match assertion.path.as_deref().and_then(|h| view.header(h)) {
            Some(value) => Extracted::Value(Value::String(value.to_string())),
            None => Extracted::Miss,
        },
        AssertionType::BodyContains => match view.body_text {
            Some(text) => Extracted::Value(Value::String(text.to_string())),
            None => Extracted::Miss,
        },
    }
}

/// Runs the operator. Returns `(passed, optional detail)` where the detail
/// refines the generic failure message.
fn apply_operator(
    operator: Operator,
    actual: &Extracted,
    expect: &Value,
) -> Result<(bool, Option<String>), EngineError> {
    // Existence checks are the only operators defined on a miss.
    match operator {
        Operator::Exists => {
            let present = matches!(actual, Extracted::Value(v) if !v.is_null());
            return Ok((present, None));
        }
        Operator::NotExists => {
            let absent = matches!(actual, Extracted::Miss | Extracted::Value(Value::Null));
            return Ok((absent, None));
        }
        _ => {}
    }

    let actual = match actual {
        Extracted::Value(v) => v,
        Extracted::Miss => {
            return Ok((false, Some("value not present in response".to_string())))
        }
    };

    match operator {
        Operator::Equals => Ok((loosely_equal(actual, expect), None)),
        Operator::NotEquals => Ok((!loosely_equal(actual, expect), None)),
        Operator::Contains => Ok(contains(actual, expect)),
        Operator::Below => numeric_cmp(actual, expect, |a, b| a < b),
        Operator::Above => numeric_cmp(actual, expect, |a, b| a > b),
        Operator::GreaterOrEqual => numeric_cmp(actual, expect, |a, b| a >= b),
        Operator::LessOrEqual => numeric_cmp(actual, expect, |a, b| a <= b),
        Operator::Matches => matches_regex(actual, expect).map(|passed| (passed, None)),
        Operator::Exists | Operator::NotExists => unreachable!("handled above"),
    }
}

/// Deep equality with one coercion: a number and a string with the same
/// canonical decimal form compare equal. Booleans only equal booleans;
/// arrays and objects compare structurally.
fn loosely_equal(actual: &Value, expect: &Value) -> bool {
    if actual == expect {
        return true;
    }
    match (actual, expect) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (as_f64(actual), as_f64(expect)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => false,
    }
}

/// `contains` per actual type: substring for strings, deep-equal membership
/// for arrays, key presence for objects.
fn contains(actual: &Value, expect: &Value) -> (bool, Option<String>) {
    match actual {
        Value::String(s) => {
            let needle = match expect {
                Value::String(e) => e.clone(),
                other => other.to_string(),
            };
            (s.contains(&needle), None)
        }
        Value::Array(items) => (items.iter().any(|item| loosely_equal(item, expect)), None),
        Value::Object(map) => match expect.as_str() {
            Some(key) => (map.contains_key(key), None),
            None => (false, Some("object containment expects a string key".to_string())),
        },
        _ => (
            false,
            Some(format!("contains is not defined for {}", type_name(actual))),
        ),
    }
}

fn numeric_cmp<F>(actual: &Value, expect: &Value, cmp: F) -> Result<(bool, Option<String>), EngineError>
where
    F: Fn(f64, f64) -> bool,
{
    match (as_f64(actual), as_f64(expect)) {
        (Some(a), Some(b)) => Ok((cmp(a, b), None)),
        _ => Ok((
            false,
            Some(format!(
                "numeric comparison needs numbers, got {} vs {}",
                type_name(actual),
                type_name(expect)
            )),
        )),
    }
}

/// The stringified actual must match `expect` as a regular expression.
/// Lookaround and backreferences are rejected up front to keep the accepted
/// dialect an ERE-compatible subset.
fn matches_regex(actual: &Value, expect: &Value) -> Result<bool, EngineError> {
    let pattern = expect
        .as_str()
        .ok_or_else(|| EngineError::Config("matches expects a string pattern".to_string()))?;

    if let Some(feature) = unsupported_regex_feature(pattern) {
        return Err(EngineError::Config(format!(
            "regex '{pattern}' uses unsupported {feature}"
        )));
    }
    let re = Regex::new(pattern)
        .map_err(|e| EngineError::Config(format!("invalid regex '{pattern}': {e}")))?;

    let subject = match actual {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(re.is_match(&subject))
}

fn unsupported_regex_feature(pattern: &str) -> Option<&'static str> {
    for marker in ["(?=", "(?!", "(?<=", "(?<!"] {
        if pattern.contains(marker) {
            return Some("lookaround");
        }
    }
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes[i + 1].is_ascii_digit() && bytes[i + 1] != b'0' {
                return Some("backreferences");
            }
            i += 2;
            continue;
        }
        i += 1;
    }
    None
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn failure_message(assertion: &Assertion, actual: &Extracted, detail: Option<String>) -> String {
    let actual_text = match actual {
        Extracted::Miss => "<path miss>".to_string(),
        Extracted::Value(v) => truncate(&v.to_string(), ACTUAL_PREVIEW_CHARS),
    };
    let mut message = match &assertion.path {
        Some(path) => format!(
            "{} '{}' {} {} (got {})",
            kind_label(assertion.kind),
            path,
            assertion.operator.token(),
            assertion.expect,
            actual_text
        ),
        None => format!(
            "{} {} {} (got {})",
            kind_label(assertion.kind),
            assertion.operator.token(),
            assertion.expect,
            actual_text
        ),
    };
    if let Some(detail) = detail {
        message.push_str(": ");
        message.push_str(&detail);
    }
    if let Some(custom) = &assertion.message {
        message.push_str(" - ");
        message.push_str(custom);
    }
    message
}

fn kind_label(kind: AssertionType) -> &'static str {
    match kind {
        AssertionType::Status => "status",
        AssertionType::JsonPath => "json path",
        AssertionType::ResponseTime => "response time",
        AssertionType::Header => "header",
        AssertionType::BodyContains => "body",
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assertion(kind: AssertionType, path: Option<&str>, op: Operator, expect: Value) -> Assertion {
        Assertion {
            kind,
            path: path.map(str::to_string),
            operator: op,
            expect,
            message: None,
        }
    }

    fn view<'a>(
        status: u16,
        json: Option<&'a Value>,
        headers: &'a [(String, String)],
        body: Option<&'a str>,
    ) -> ResponseView<'a> {
        ResponseView {
            status,
            json,
            headers,
            body_text: body,
            elapsed_ms: 120,
        }
    }

    #[test]
    fn status_equals_passes_and_fails() {
        let headers = Vec::new();
        let v = view(200, None, &headers, None);
        let a = assertion(AssertionType::Status, None, Operator::Equals, json!(200));
        assert!(evaluate(&a, &v).unwrap().passed);

        let v = view(500, None, &headers, None);
        let outcome = evaluate(&a, &v).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.actual, Some(json!(500)));
        assert!(outcome.message.contains("500"));
    }

    #[test]
    fn equals_coerces_number_and_canonical_decimal_string() {
        let body = json!({"id": 42, "price": 1.5});
        let headers = Vec::new();
        let v = view(200, Some(&body), &headers, None);

        let a = assertion(AssertionType::JsonPath, Some("id"), Operator::Equals, json!("42"));
        assert!(evaluate(&a, &v).unwrap().passed);

        let a = assertion(
            AssertionType::JsonPath,
            Some("price"),
            Operator::Equals,
            json!("1.50"),
        );
        assert!(evaluate(&a, &v).unwrap().passed);
    }

    #[test]
    fn booleans_only_equal_booleans() {
        let body = json!({"ok": true});
        let headers = Vec::new();
        let v = view(200, Some(&body), &headers, None);
        let a = assertion(AssertionType::JsonPath, Some("ok"), Operator::Equals, json!("true"));
        assert!(!evaluate(&a, &v).unwrap().passed);
        let a = assertion(AssertionType::JsonPath, Some("ok"), Operator::Equals, json!(true));
        assert!(evaluate(&a, &v).unwrap().passed);
    }

    #[test]
    fn structural_equality_for_composites() {
        let body = json!({"tags": ["a", "b"]});
        let headers = Vec::new();
        let v = view(200, Some(&body), &headers, None);
        let a = assertion(
            AssertionType::JsonPath,
            Some("tags"),
            Operator::Equals,
            json!(["a", "b"]),
        );
        assert!(evaluate(&a, &v).unwrap().passed);
    }

    #[test]
    fn exists_distinguishes_null_from_present() {
        let body = json!({"a": null, "b": 1});
        let headers = Vec::new();
        let v = view(200, Some(&body), &headers, None);

        let a = assertion(AssertionType::JsonPath, Some("b"), Operator::Exists, json!(null));
        assert!(evaluate(&a, &v).unwrap().passed);
        let a = assertion(AssertionType::JsonPath, Some("a"), Operator::Exists, json!(null));
        assert!(!evaluate(&a, &v).unwrap().passed);
        let a = assertion(AssertionType::JsonPath, Some("a"), Operator::NotExists, json!(null));
        assert!(evaluate(&a, &v).unwrap().passed);
        let a = assertion(AssertionType::JsonPath, Some("zz"), Operator::NotExists, json!(null));
        assert!(evaluate(&a, &v).unwrap().passed);
    }

    #[test]
    fn contains_per_actual_type() {
        let body = json!({
            "text": "hello world",
            "list": [1, 2, 3],
            "obj": {"key": 1}
        });
        let headers = Vec::new();
        let v = view(200, Some(&body), &headers, None);

        let a = assertion(
            AssertionType::JsonPath,
            Some("text"),
            Operator::Contains,
            json!("world"),
        );
        assert!(evaluate(&a, &v).unwrap().passed);

        let a = assertion(AssertionType::JsonPath, Some("list"), Operator::Contains, json!(2));
        assert!(evaluate(&a, &v).unwrap().passed);

        let a = assertion(
            AssertionType::JsonPath,
            Some("obj"),
            Operator::Contains,
            json!("key"),
        );
        assert!(evaluate(&a, &v).unwrap().passed);

        let a = assertion(AssertionType::JsonPath, Some("list"), Operator::Contains, json!(9));
        assert!(!evaluate(&a, &v).unwrap().passed);
    }

    #[test]
    fn numeric_operators_fail_with_message_on_non_numeric() {
        let body = json!({"name": "kest"});
        let headers = Vec::new();
        let v = view(200, Some(&body), &headers, None);
        let a = assertion(AssertionType::JsonPath, Some("name"), Operator::Below, json!(10));
        let outcome = evaluate(&a, &v).unwrap();
        assert!(!outcome.passed);
        assert!(outcome.message.contains("numeric comparison"));
    }

    #[test]
    fn response_time_bounds() {
        let headers = Vec::new();
        let v = view(200, None, &headers, None);
        let a = assertion(AssertionType::ResponseTime, None, Operator::Below, json!(500));
        assert!(evaluate(&a, &v).unwrap().passed);
        let a = assertion(AssertionType::ResponseTime, None, Operator::Above, json!(500));
        assert!(!evaluate(&a, &v).unwrap().passed);
    }

    #[test]
    fn header_lookup_is_case_insensitive_first_value() {
        let headers = vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("X-Multi".to_string(), "one".to_string()),
            ("x-multi".to_string(), "two".to_string()),
        ];
        let v = view(200, None, &headers, None);
        let a = assertion(
            AssertionType::Header,
            Some("Content-Type"),
            Operator::Contains,
            json!("json"),
        );
        assert!(evaluate(&a, &v).unwrap().passed);
        let a = assertion(AssertionType::Header, Some("X-MULTI"), Operator::Equals, json!("one"));
        assert!(evaluate(&a, &v).unwrap().passed);
    }

    #[test]
    fn json_path_on_non_json_body_is_a_miss() {
        let headers = Vec::new();
        let v = view(200, None, &headers, Some("hello"));
        let a = assertion(
            AssertionType::JsonPath,
            Some("data.name"),
            Operator::Equals,
            json!("x"),
        );
        let outcome = evaluate(&a, &v).unwrap();
        assert!(!outcome.passed);
        assert!(outcome.actual.is_none());
        assert!(outcome.message.contains("not present"));
    }

    #[test]
    fn body_contains_on_raw_text() {
        let headers = Vec::new();
        let v = view(200, None, &headers, Some("plain greeting"));
        let a = assertion(AssertionType::BodyContains, None, Operator::Contains, json!("greet"));
        assert!(evaluate(&a, &v).unwrap().passed);
    }

    #[test]
    fn matches_runs_on_stringified_actual() {
        let body = json!({"code": "AB1234", "n": 42});
        let headers = Vec::new();
        let v = view(200, Some(&body), &headers, None);
        let a = assertion(
            AssertionType::JsonPath,
            Some("code"),
            Operator::Matches,
            json!("^[A-Z]{2}[0-9]{4}$"),
        );
        assert!(evaluate(&a, &v).unwrap().passed);
        let a = assertion(AssertionType::JsonPath, Some("n"), Operator::Matches, json!("^42$"));
        assert!(evaluate(&a, &v).unwrap().passed);
    }

    #[test]
    fn malformed_regex_is_config_error() {
        let body = json!({"s": "x"});
        let headers = Vec::new();
        let v = view(200, Some(&body), &headers, None);
        let a = assertion(
            AssertionType::JsonPath,
            Some("s"),
            Operator::Matches,
            json!("([invalid"),
        );
        assert!(matches!(evaluate(&a, &v), Err(EngineError::Config(_))));
    }

    #[test]
    fn lookaround_and_backreferences_are_rejected() {
        let body = json!({"s": "x"});
        let headers = Vec::new();
        let v = view(200, Some(&body), &headers, None);
        for pattern in ["(?=x)", r"(a)\1"] {
            let a = assertion(
                AssertionType::JsonPath,
                Some("s"),
                Operator::Matches,
                json!(pattern),
            );
            assert!(matches!(evaluate(&a, &v), Err(EngineError::Config(_))));
        }
    }

    #[test]
    fn failures_never_short_circuit() {
        let body = json!({"a": 1});
        let headers = Vec::new();
        let v = view(500, Some(&body), &headers, None);
        let assertions = vec![
            assertion(AssertionType::Status, None, Operator::Equals, json!(200)),
            assertion(AssertionType::JsonPath, Some("a"), Operator::Equals, json!(1)),
        ];
        let outcomes = evaluate_all(&assertions, &v).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].passed);
        assert!(outcomes[1].passed);
    }

    #[test]
    fn long_actual_is_truncated_in_message() {
        let big = "x".repeat(600);
        let body = json!({ "s": big });
        let headers = Vec::new();
        let v = view(200, Some(&body), &headers, None);
        let a = assertion(AssertionType::JsonPath, Some("s"), Operator::Equals, json!("y"));
        let outcome = evaluate(&a, &v).unwrap();
        assert!(outcome.message.len() < 400);
        assert!(outcome.message.contains('…'));
    }
}
