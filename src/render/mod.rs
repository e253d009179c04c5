//! Placeholder substitution for URLs, headers, query values and bodies.
//!
//! Grammar: `{{ ident }}` or `{{ ident | default: "literal" }}` where ident
//! is `[A-Za-z_$][A-Za-z0-9_]*` and the literal is a double-quoted string
//! with backslash escapes. Resolution is non-recursive: a resolved value is
//! never re-scanned for further placeholders. Unresolved names are left in
//! place and collected so strict mode can reject the render before any
//! network I/O happens.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::model::RequestTemplate;
use crate::vars::VarStore;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{\{\s*([A-Za-z_$][A-Za-z0-9_]*)\s*(?:\|\s*default:\s*"((?:[^"\\]|\\.)*)")?\s*\}\}"#)
        .expect("valid placeholder regex")
});

/// Result of rendering one template string.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub text: String,
    /// Names that resolved to nothing and had no inline default.
    pub unresolved: Vec<String>,
}

/// A fully rendered request, ready for the HTTP executor.
#[derive(Debug, Clone)]
pub struct RenderedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub unresolved: Vec<String>,
}

/// True for `application/json`, `application/problem+json` and any
/// `application/*+json` media type.
pub fn is_json_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || (essence.starts_with("application/") && essence.ends_with("+json"))
}

/// Substitutes placeholders in plain-text context. Scalars are coerced to
/// their bare textual form (no surrounding quotes); arrays and objects to
/// compact JSON.
pub fn render(template: &str, store: &VarStore) -> Rendered {
    render_with(template, store, false)
}

/// Renders a whole request template. Header and query pairs keep their
/// source order and casing; only values are substituted, never key names.
pub fn render_request(template: &RequestTemplate, store: &VarStore) -> RenderedRequest {
    let mut unresolved = Vec::new();

    let url = render(&template.url, store);
    unresolved.extend(url.unresolved);

    let mut headers = Vec::with_capacity(template.headers.len());
    for (name, value) in &template.headers {
        let rendered = render(value, store);
        unresolved.extend(rendered.unresolved);
        headers.push((name.clone(), rendered.text));
    }

    let mut query = Vec::with_capacity(template.query.len());
    for (name, value) in &template.query {
        let rendered = render(value, store);
        unresolved.extend(rendered.unresolved);
        query.push((name.clone(), rendered.text));
    }

    let body = template.body.as_ref().map(|raw| {
        let declared_json = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| is_json_media_type(v))
            .unwrap_or(false);
        let rendered = render_body(raw, declared_json, store);
        unresolved.extend(rendered.unresolved);
        rendered.text
    });

    unresolved.sort();
    unresolved.dedup();

    RenderedRequest {
        method: template.method.clone(),
        url: url.text,
        headers,
        query,
        body,
        unresolved,
    }
}

/// Renders a request body. JSON-family bodies (declared content type, or the
/// textual render parses as JSON) get JSON-literal injection: a placeholder
/// in a bare slot receives the full JSON form of its value, one inside a
/// string slot the escaped text form. Everything else is plain substitution.
pub fn render_body(template: &str, declared_json: bool, store: &VarStore) -> Rendered {
    let textual = render_with(template, store, false);
    let looks_json = serde_json::from_str::<Value>(&textual.text).is_ok();
    if declared_json || looks_json {
        render_with(template, store, true)
    } else {
        textual
    }
}

fn render_with(template: &str, store: &VarStore, json_body: bool) -> Rendered {
    let mut out = String::with_capacity(template.len());
    let mut unresolved = Vec::new();
    let mut last_index = 0;
    // Quote-context of the template text, meaningful only for JSON bodies.
    // Substituted values never change it: string literals inserted outside a
    // string carry balanced quotes, and in-string insertions are escaped.
    let mut in_string = false;
    let mut escaped = false;

    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let whole = caps.get(0).expect("match has a whole group");
        let gap = &template[last_index..whole.start()];
        if json_body {
            track_quote_state(gap, &mut in_string, &mut escaped);
        }
        out.push_str(gap);

        let name = caps.get(1).expect("ident group").as_str();
        let default = caps.get(2).map(|m| unescape(m.as_str()));

        match store.resolve(name).or_else(|| default.map(Value::String)) {
            Some(value) => {
                if json_body {
                    if in_string {
                        out.push_str(&escape_for_json_string(&scalar_text(&value)));
                    } else {
                        out.push_str(&value.to_string());
                    }
                } else {
                    out.push_str(&scalar_text(&value));
                }
            }
            None => {
                unresolved.push(name.to_string());
                out.push_str(whole.as_str());
            }
        }

        last_index = whole.end();
    }
    out.push_str(&template[last_index..]);

    Rendered {
        text: out,
        unresolved,
    }
}

/// Bare textual form of a value: strings as-is, scalars JSON-encoded without
/// surrounding quotes, composites as compact JSON.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_for_json_string(text: &str) -> String {
    let quoted = Value::String(text.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

fn track_quote_state(segment: &str, in_string: &mut bool, escaped: &mut bool) {
    for c in segment.chars() {
        if *escaped {
            *escaped = false;
            continue;
        }
        match c {
            '\\' if *in_string => *escaped = true,
            '"' => *in_string = !*in_string,
            _ => {}
        }
    }
}

fn unescape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn store(pairs: &[(&str, Value)]) -> VarStore {
        VarStore::seed(
            HashMap::new(),
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            HashMap::new(),
        )
    }

    #[test]
    fn substitutes_known_names() {
        let store = store(&[("name", json!("kest"))]);
        let r = render("hello {{name}}", &store);
        assert_eq!(r.text, "hello kest");
        assert!(r.unresolved.is_empty());
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        let store = store(&[("name", json!("kest"))]);
        assert_eq!(render("{{  name  }}", &store).text, "kest");
    }

    #[test]
    fn missing_name_is_left_in_place_and_reported() {
        let store = VarStore::default();
        let r = render("x={{missing}}", &store);
        assert_eq!(r.text, "x={{missing}}");
        assert_eq!(r.unresolved, vec!["missing".to_string()]);
    }

    #[test]
    fn default_fills_undefined_name() {
        let store = VarStore::default();
        let r = render(r#"{{username | default: "admin"}}"#, &store);
        assert_eq!(r.text, "admin");
        assert!(r.unresolved.is_empty());
    }

    #[test]
    fn default_is_ignored_when_a_scope_defines_the_name() {
        let store = store(&[("username", json!("root"))]);
        let r = render(r#"{{username | default: "admin"}}"#, &store);
        assert_eq!(r.text, "root");
    }

    #[test]
    fn default_literal_honors_escapes() {
        let store = VarStore::default();
        let r = render(r#"{{x | default: "a\"b\\c"}}"#, &store);
        assert_eq!(r.text, "a\"b\\c");
    }

    #[test]
    fn resolution_is_not_recursive() {
        let store = store(&[("a", json!("{{b}}")), ("b", json!("deep"))]);
        let r = render("{{a}}", &store);
        assert_eq!(r.text, "{{b}}");
        assert!(r.unresolved.is_empty());
    }

    #[test]
    fn scalars_render_without_quotes_in_text_context() {
        let store = store(&[("n", json!(42)), ("b", json!(true)), ("z", json!(null))]);
        assert_eq!(render("{{n}}/{{b}}/{{z}}", &store).text, "42/true/null");
    }

    #[test]
    fn json_body_bare_slot_gets_json_literal() {
        let store = store(&[("n", json!(42)), ("s", json!("abc"))]);
        let r = render_body(r#"{"n":{{n}},"s":{{s}}}"#, true, &store);
        assert_eq!(r.text, r#"{"n":42,"s":"abc"}"#);
        assert!(serde_json::from_str::<Value>(&r.text).is_ok());
    }

    #[test]
    fn json_body_quoted_slot_keeps_string_typing() {
        let store = store(&[("n", json!(42))]);
        let r = render_body(r#"{"n":"{{n}}"}"#, true, &store);
        assert_eq!(r.text, r#"{"n":"42"}"#);
    }

    #[test]
    fn json_body_string_value_is_escaped_inside_quotes() {
        let store = store(&[("s", json!("he said \"hi\""))]);
        let r = render_body(r#"{"s":"{{s}}"}"#, true, &store);
        let parsed: Value = serde_json::from_str(&r.text).unwrap();
        assert_eq!(parsed["s"], json!("he said \"hi\""));
    }

    #[test]
    fn undeclared_body_that_parses_as_json_gets_literal_injection() {
        let store = store(&[("n", json!(7))]);
        let r = render_body(r#"{"count":{{n}}}"#, false, &store);
        assert_eq!(r.text, r#"{"count":7}"#);
    }

    #[test]
    fn plain_text_body_uses_textual_substitution() {
        let store = store(&[("who", json!("world"))]);
        let r = render_body("hello {{who}}", false, &store);
        assert_eq!(r.text, "hello world");
    }

    #[test]
    fn render_request_touches_url_headers_query_and_body() {
        let store = store(&[("base_url", json!("http://api.test")), ("tok", json!("T"))]);
        let template = RequestTemplate {
            method: "POST".into(),
            url: "{{base_url}}/login".into(),
            headers: vec![
                ("Content-Type".into(), "application/json".into()),
                ("Authorization".into(), "Bearer {{tok}}".into()),
            ],
            query: vec![("q".into(), "{{tok}}".into())],
            body: Some(r#"{"token":"{{tok}}"}"#.into()),
        };
        let r = render_request(&template, &store);
        assert_eq!(r.url, "http://api.test/login");
        assert_eq!(r.headers[1].1, "Bearer T");
        assert_eq!(r.query[0].1, "T");
        assert_eq!(r.body.as_deref(), Some(r#"{"token":"T"}"#));
        assert!(r.unresolved.is_empty());
    }

    #[test]
    fn render_request_collects_unresolved_names_once() {
        let store = VarStore::default();
        let template = RequestTemplate {
            method: "GET".into(),
            url: "{{base_url}}/x".into(),
            headers: vec![("X-A".into(), "{{base_url}}".into())],
            query: Vec::new(),
            body: None,
        };
        let r = render_request(&template, &store);
        assert_eq!(r.unresolved, vec!["base_url".to_string()]);
    }

    #[test]
    fn json_media_type_family() {
        assert!(is_json_media_type("application/json"));
        assert!(is_json_media_type("application/json; charset=utf-8"));
        assert!(is_json_media_type("application/problem+json"));
        assert!(is_json_media_type("application/vnd.api+json"));
        assert!(!is_json_media_type("text/plain"));
        assert!(!is_json_media_type("text/json-ish"));
    }

    #[test]
    fn builtins_render_inside_bodies() {
        let store = VarStore::default();
        let r = render_body(r#"{"ts":{{$timestamp}},"r":"{{$randomInt}}"}"#, true, &store);
        let parsed: Value = serde_json::from_str(&r.text).unwrap();
        assert!(parsed["ts"].is_i64());
        assert!(parsed["r"].is_string());
    }
}
