//! Flow document parsing and canonical serialization.
//!
//! A flow file is Markdown with fenced blocks of kinds `flow`, `step`,
//! `edge` and legacy `kest`. Inside a fence, `@` lines declare directives
//! and the rest encodes a request in a small textual form:
//!
//! ```text
//! POST {{base_url}}/api/v1/login
//! [Headers]
//! Content-Type: application/json
//! [Body]
//! {"username":"{{user}}","password":"{{pass}}"}
//! [Asserts]
//! status == 200
//! [Captures]
//! token = data.access_token
//! ```
//!
//! The parser is tolerant: malformed lines and dangling edges become
//! warnings, never fatal errors. `write_flow` emits a canonical document
//! that re-parses to the same meta, steps and edges.

use std::collections::HashSet;

use serde_json::Value;

use crate::model::{
    Assertion, AssertionType, Capture, CaptureSource, Edge, EdgeCondition, FlowDocument, FlowMeta,
    FlowStep, OnFail, Operator, RequestTemplate,
};

const SECTION_HEADERS: &[&str] = &["[headers]", "[queries]", "[body]", "[asserts]", "[captures]"];

// ============================================================================
// PARSING
// ============================================================================

/// Parses a flow document. Never fails: problems degrade to warnings on the
/// returned document.
pub fn parse_flow(source: &str) -> FlowDocument {
    let mut meta = FlowMeta::default();
    let mut steps: Vec<FlowStep> = Vec::new();
    let mut raw_edges: Vec<Edge> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    for block in scan_blocks(source) {
        match block.kind.as_str() {
            "flow" => parse_flow_block(&block, &mut meta, &mut warnings),
            "step" | "kest" => {
                if let Some(step) = parse_step_block(&block, &mut warnings) {
                    steps.push(step);
                }
            }
            "edge" => parse_edge_block(&block, &mut raw_edges, &mut warnings),
            _ => {} // unrelated fenced code in the surrounding prose
        }
    }

    assign_step_ids(&mut steps, &mut warnings);

    // Edges must reference known ids on both ends; anything else is dropped.
    let known: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    let edges: Vec<Edge> = raw_edges
        .into_iter()
        .filter(|edge| {
            let ok = known.contains(edge.from.as_str()) && known.contains(edge.to.as_str());
            if !ok {
                warnings.push(format!(
                    "edge '{}' -> '{}' references an unknown step id, dropped",
                    edge.from, edge.to
                ));
            }
            ok
        })
        .collect();

    for warning in &warnings {
        tracing::warn!(warning = %warning, "flow parse warning");
    }

    FlowDocument {
        meta,
        steps,
        edges,
        warnings,
    }
}

struct Block {
    kind: String,
    /// Value of `title="…"` in the fence info string, when present.
    title: Option<String>,
    lines: Vec<String>,
}

/// Collects fenced blocks. Unknown fence kinds are consumed so their content
/// is never mistaken for flow syntax.
fn scan_blocks(source: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;

    for line in source.lines() {
        let trimmed = line.trim();
        if current.is_none() {
            if let Some(info) = trimmed.strip_prefix("```") {
                let info = info.trim();
                if !info.is_empty() {
                    let kind = info.split_whitespace().next().unwrap_or("").to_string();
                    current = Some(Block {
                        kind,
                        title: parse_title(info),
                        lines: Vec::new(),
                    });
                }
            }
            continue;
        }
        if trimmed == "```" {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
        } else if let Some(block) = current.as_mut() {
            block.lines.push(line.to_string());
        }
    }

    blocks
}

fn parse_title(info: &str) -> Option<String> {
    let start = info.find("title=\"")? + "title=\"".len();
    let rest = &info[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn parse_flow_block(block: &Block, meta: &mut FlowMeta, warnings: &mut Vec<String>) {
    for line in &block.lines {
        let line = line.trim();
        if let Some((directive, value)) = split_directive(line) {
            match directive {
                "id" => meta.id = value.to_string(),
                "name" => meta.name = value.to_string(),
                "tags" => {
                    meta.tags = value
                        .split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect();
                }
                other => warnings.push(format!("unknown directive '@{other}' in flow block")),
            }
        }
    }
}

fn parse_edge_block(block: &Block, edges: &mut Vec<Edge>, warnings: &mut Vec<String>) {
    let mut from = None;
    let mut to = None;
    let mut on = EdgeCondition::Always;

    for line in &block.lines {
        let line = line.trim();
        if let Some((directive, value)) = split_directive(line) {
            match directive {
                "from" => from = Some(value.to_string()),
                "to" => to = Some(value.to_string()),
                "on" => match value {
                    "success" => on = EdgeCondition::Success,
                    "failure" => on = EdgeCondition::Failure,
                    "" => on = EdgeCondition::Always,
                    other => {
                        warnings.push(format!(
                            "edge condition '{other}' is not success/failure, treated as unconditional"
                        ));
                    }
                },
                other => warnings.push(format!("unknown directive '@{other}' in edge block")),
            }
        }
    }

    match (from, to) {
        (Some(from), Some(to)) => edges.push(Edge { from, to, on }),
        _ => warnings.push("edge block needs both @from and @to, dropped".to_string()),
    }
}

fn parse_step_block(block: &Block, warnings: &mut Vec<String>) -> Option<FlowStep> {
    let mut step = FlowStep {
        id: String::new(),
        name: String::new(),
        retry: 0,
        retry_wait_ms: 0,
        max_duration_ms: None,
        on_fail: None,
        request: RequestTemplate::default(),
        assertions: Vec::new(),
        captures: Vec::new(),
    };
    if let Some(title) = &block.title {
        step.name = title.clone();
    }

    #[derive(PartialEq)]
    enum Section {
        Request,
        Headers,
        Queries,
        Body,
        Asserts,
        Captures,
    }
    let mut section = Section::Request;
    let mut body_lines: Vec<String> = Vec::new();
    let mut saw_request_line = false;

    for raw in &block.lines {
        let line = raw.trim();

        if let Some((directive, value)) = split_directive(line) {
            match directive {
                "id" => step.id = value.to_string(),
                "name" => step.name = value.to_string(),
                "retry" => step.retry = parse_number(value, "retry", 0, warnings),
                "retry-wait" => {
                    step.retry_wait_ms = parse_number(value, "retry-wait", 0, warnings)
                }
                "max-duration" => {
                    let parsed: u64 = parse_number(value, "max-duration", 0, warnings);
                    if parsed > 0 {
                        step.max_duration_ms = Some(parsed);
                    }
                }
                "on-fail" => match value {
                    "stop" => step.on_fail = Some(OnFail::Stop),
                    "continue" => step.on_fail = Some(OnFail::Continue),
                    other => warnings.push(format!(
                        "on-fail '{other}' is not stop/continue, using flow default"
                    )),
                },
                other => warnings.push(format!("ignoring unknown directive '@{other}'")),
            }
            continue;
        }

        let lower = line.to_ascii_lowercase();
        if SECTION_HEADERS.contains(&lower.as_str()) {
            section = match lower.as_str() {
                "[headers]" => Section::Headers,
                "[queries]" => Section::Queries,
                "[body]" => Section::Body,
                "[asserts]" => Section::Asserts,
                _ => Section::Captures,
            };
            continue;
        }

        // Body keeps raw lines verbatim, including blank ones.
        if section == Section::Body {
            body_lines.push(raw.clone());
            continue;
        }
        if line.is_empty() {
            continue;
        }

        match section {
            Section::Request => {
                if saw_request_line {
                    warnings.push(format!("unexpected line before a section header: '{line}'"));
                    continue;
                }
                match line.split_once(char::is_whitespace) {
                    Some((method, url)) => {
                        step.request.method = method.to_uppercase();
                        step.request.url = url.trim().to_string();
                        saw_request_line = true;
                        if !crate::model::VALID_HTTP_METHODS
                            .contains(&step.request.method.as_str())
                        {
                            warnings.push(format!(
                                "unknown HTTP method '{}'",
                                step.request.method
                            ));
                        }
                    }
                    None => warnings.push(format!("malformed request line '{line}'")),
                }
            }
            Section::Headers => match line.split_once(':') {
                Some((name, value)) => step
                    .request
                    .headers
                    .push((name.trim().to_string(), value.trim().to_string())),
                None => warnings.push(format!("malformed header line '{line}'")),
            },
            Section::Queries => match line.split_once('=') {
                Some((name, value)) => step
                    .request
                    .query
                    .push((name.trim().to_string(), value.trim().to_string())),
                None => warnings.push(format!("malformed query line '{line}'")),
            },
            Section::Asserts => match parse_assert_line(line) {
                Ok(assertion) => step.assertions.push(assertion),
                Err(reason) => warnings.push(format!("skipping assertion '{line}': {reason}")),
            },
            Section::Captures => match parse_capture_line(line) {
                Ok(capture) => step.captures.push(capture),
                Err(reason) => warnings.push(format!("skipping capture '{line}': {reason}")),
            },
            Section::Body => unreachable!("body handled above"),
        }
    }

    if !saw_request_line {
        warnings.push("step block without a METHOD URL line, dropped".to_string());
        return None;
    }
    if !body_lines.is_empty() {
        // Outer blank lines are fence formatting, not payload.
        let body = body_lines.join("\n").trim().to_string();
        if !body.is_empty() {
            step.request.body = Some(body);
        }
    }

    Some(step)
}

fn split_directive(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('@')?;
    match rest.split_once(char::is_whitespace) {
        Some((name, value)) => Some((name, value.trim())),
        None => Some((rest, "")),
    }
}

fn parse_number<T: std::str::FromStr + Copy>(
    value: &str,
    directive: &str,
    default: T,
    warnings: &mut Vec<String>,
) -> T {
    match value.parse() {
        Ok(n) => n,
        Err(_) => {
            warnings.push(format!(
                "@{directive} value '{value}' is not a number, using default"
            ));
            default
        }
    }
}

/// Missing and duplicate ids get deterministic `step-N` names based on
/// source order.
fn assign_step_ids(steps: &mut [FlowStep], warnings: &mut Vec<String>) {
    let mut used: HashSet<String> = HashSet::new();
    for step in steps.iter_mut() {
        if !step.id.is_empty() && !used.insert(step.id.clone()) {
            warnings.push(format!("duplicate step id '{}', reassigning", step.id));
            step.id.clear();
        }
    }
    for (index, step) in steps.iter_mut().enumerate() {
        if step.id.is_empty() {
            let mut candidate = format!("step-{}", index + 1);
            let mut bump = index + 1;
            while !used.insert(candidate.clone()) {
                bump += 1;
                candidate = format!("step-{bump}");
            }
            step.id = candidate;
        }
        if step.name.is_empty() {
            step.name = step.id.clone();
        }
    }
}

// ============================================================================
// ASSERT AND CAPTURE LINES
// ============================================================================

// Two-character operators must be probed before their one-character
// prefixes.
const OPERATOR_TOKENS: &[(&str, Operator)] = &[
    (" >= ", Operator::GreaterOrEqual),
    (" <= ", Operator::LessOrEqual),
    (" == ", Operator::Equals),
    (" != ", Operator::NotEquals),
    (" > ", Operator::Above),
    (" < ", Operator::Below),
    (" contains ", Operator::Contains),
    (" matches ", Operator::Matches),
];

fn parse_assert_line(line: &str) -> Result<Assertion, String> {
    if let Some(lhs) = line.strip_suffix(" not_exists") {
        return build_assertion(lhs.trim(), Operator::NotExists, Value::Null);
    }
    if let Some(lhs) = line.strip_suffix(" exists") {
        return build_assertion(lhs.trim(), Operator::Exists, Value::Null);
    }

    for (token, operator) in OPERATOR_TOKENS {
        if let Some(position) = line.find(token) {
            let lhs = line[..position].trim();
            let rhs = line[position + token.len()..].trim();
            if rhs.is_empty() {
                return Err("missing expected value".to_string());
            }
            let expect = serde_json::from_str(rhs).unwrap_or(Value::String(rhs.to_string()));
            return build_assertion(lhs, *operator, expect);
        }
    }

    Err("no comparison operator found".to_string())
}

fn build_assertion(lhs: &str, operator: Operator, expect: Value) -> Result<Assertion, String> {
    if lhs.is_empty() {
        return Err("missing subject".to_string());
    }
    let (kind, path) = match lhs {
        "status" => (AssertionType::Status, None),
        "time" | "response_time" => (AssertionType::ResponseTime, None),
        "body" => (AssertionType::BodyContains, None),
        other => match other.strip_prefix("header.") {
            Some(header) => (AssertionType::Header, Some(header.to_string())),
            None => (AssertionType::JsonPath, Some(other.to_string())),
        },
    };
    Ok(Assertion {
        kind,
        path,
        operator,
        expect,
        message: None,
    })
}

fn parse_capture_line(line: &str) -> Result<Capture, String> {
    let (name, spec) = line
        .split_once('=')
        .ok_or_else(|| "expected 'name = source'".to_string())?;
    let name = name.trim();
    let spec = spec.trim();
    if name.is_empty() || spec.is_empty() {
        return Err("name and source must both be present".to_string());
    }

    let (source, path) = if spec == "status" {
        (CaptureSource::Status, String::new())
    } else if let Some(header) = spec.strip_prefix("header:") {
        (CaptureSource::Header, header.trim().to_string())
    } else if let Some(cookie) = spec.strip_prefix("cookie:") {
        (CaptureSource::Cookie, cookie.trim().to_string())
    } else {
        (CaptureSource::Body, spec.to_string())
    };

    Ok(Capture {
        name: name.to_string(),
        source,
        path,
    })
}

// ============================================================================
// CANONICAL WRITER
// ============================================================================

/// Serializes a document so that `parse_flow(write_flow(doc))` yields the
/// same meta, steps and edges.
pub fn write_flow(doc: &FlowDocument) -> String {
    let mut out = String::new();

    if !doc.meta.id.is_empty() || !doc.meta.name.is_empty() || !doc.meta.tags.is_empty() {
        out.push_str("```flow\n");
        if !doc.meta.id.is_empty() {
            out.push_str(&format!("@id {}\n", doc.meta.id));
        }
        if !doc.meta.name.is_empty() {
            out.push_str(&format!("@name {}\n", doc.meta.name));
        }
        if !doc.meta.tags.is_empty() {
            out.push_str(&format!("@tags {}\n", doc.meta.tags.join(", ")));
        }
        out.push_str("```\n\n");
    }

    for step in &doc.steps {
        if step.name != step.id {
            out.push_str(&format!("```step title=\"{}\"\n", step.name));
        } else {
            out.push_str("```step\n");
        }
        out.push_str(&format!("@id {}\n", step.id));
        if step.retry != 0 {
            out.push_str(&format!("@retry {}\n", step.retry));
        }
        if step.retry_wait_ms != 0 {
            out.push_str(&format!("@retry-wait {}\n", step.retry_wait_ms));
        }
        if let Some(limit) = step.max_duration_ms {
            out.push_str(&format!("@max-duration {limit}\n"));
        }
        if let Some(on_fail) = step.on_fail {
            let value = match on_fail {
                OnFail::Stop => "stop",
                OnFail::Continue => "continue",
            };
            out.push_str(&format!("@on-fail {value}\n"));
        }

        out.push_str(&format!("{} {}\n", step.request.method, step.request.url));
        if !step.request.headers.is_empty() {
            out.push_str("[Headers]\n");
            for (name, value) in &step.request.headers {
                out.push_str(&format!("{name}: {value}\n"));
            }
        }
        if !step.request.query.is_empty() {
            out.push_str("[Queries]\n");
            for (name, value) in &step.request.query {
                out.push_str(&format!("{name} = {value}\n"));
            }
        }
        if let Some(body) = &step.request.body {
            out.push_str("[Body]\n");
            out.push_str(body);
            out.push('\n');
        }
        if !step.assertions.is_empty() {
            out.push_str("[Asserts]\n");
            for assertion in &step.assertions {
                out.push_str(&write_assert_line(assertion));
                out.push('\n');
            }
        }
        if !step.captures.is_empty() {
            out.push_str("[Captures]\n");
            for capture in &step.captures {
                out.push_str(&write_capture_line(capture));
                out.push('\n');
            }
        }
        out.push_str("```\n\n");
    }

    for edge in &doc.edges {
        out.push_str("```edge\n");
        out.push_str(&format!("@from {}\n", edge.from));
        out.push_str(&format!("@to {}\n", edge.to));
        match edge.on {
            EdgeCondition::Success => out.push_str("@on success\n"),
            EdgeCondition::Failure => out.push_str("@on failure\n"),
            EdgeCondition::Always => {}
        }
        out.push_str("```\n\n");
    }

    out
}

fn write_assert_line(assertion: &Assertion) -> String {
    let subject = match assertion.kind {
        AssertionType::Status => "status".to_string(),
        AssertionType::ResponseTime => "time".to_string(),
        AssertionType::BodyContains => "body".to_string(),
        AssertionType::Header => format!("header.{}", assertion.path.as_deref().unwrap_or("")),
        AssertionType::JsonPath => assertion.path.clone().unwrap_or_default(),
    };
    match assertion.operator {
        Operator::Exists | Operator::NotExists => {
            format!("{subject} {}", assertion.operator.token())
        }
        _ => format!(
            "{subject} {} {}",
            assertion.operator.token(),
            assertion.expect
        ),
    }
}

fn write_capture_line(capture: &Capture) -> String {
    match capture.source {
        CaptureSource::Body => format!("{} = {}", capture.name, capture.path),
        CaptureSource::Header => format!("{} = header:{}", capture.name, capture.path),
        CaptureSource::Cookie => format!("{} = cookie:{}", capture.name, capture.path),
        CaptureSource::Status => format!("{} = status", capture.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LOGIN_FLOW: &str = r#"
# Login then profile

```flow
@id login-flow
@name Login and fetch profile
@tags auth, smoke
```

```step title="Login"
@id login
@retry 2
@retry-wait 100
POST {{base_url}}/api/v1/login
[Headers]
Content-Type: application/json
[Body]
{"username":"admin","password":"Admin@123"}
[Asserts]
status == 200
data.token != ""
[Captures]
token = data.access_token
```

```step
@id profile
GET {{base_url}}/api/v1/profile
[Headers]
Authorization: Bearer {{token}}
[Asserts]
status == 200
```

```edge
@from login
@to profile
@on success
```
"#;

    #[test]
    fn parses_meta_steps_and_edges() {
        let doc = parse_flow(LOGIN_FLOW);
        assert_eq!(doc.meta.id, "login-flow");
        assert_eq!(doc.meta.tags, vec!["auth", "smoke"]);
        assert_eq!(doc.steps.len(), 2);
        assert_eq!(doc.edges.len(), 1);
        assert!(doc.warnings.is_empty());

        let login = &doc.steps[0];
        assert_eq!(login.id, "login");
        assert_eq!(login.name, "Login");
        assert_eq!(login.retry, 2);
        assert_eq!(login.retry_wait_ms, 100);
        assert_eq!(login.request.method, "POST");
        assert_eq!(login.request.url, "{{base_url}}/api/v1/login");
        assert_eq!(login.request.headers.len(), 1);
        assert!(login.request.body.as_deref().unwrap().contains("Admin@123"));
        assert_eq!(login.assertions.len(), 2);
        assert_eq!(login.captures.len(), 1);
        assert_eq!(login.captures[0].path, "data.access_token");

        assert_eq!(doc.edges[0].on, EdgeCondition::Success);
    }

    #[test]
    fn assert_lines_map_subjects_to_types() {
        let doc = parse_flow(
            "```step\nGET /x\n[Asserts]\nstatus == 200\ntime < 500\nbody contains \"ok\"\nheader.Content-Type contains \"json\"\ndata.user.id >= 10\ndata.token exists\ndata.gone not_exists\n```\n",
        );
        let asserts = &doc.steps[0].assertions;
        assert_eq!(asserts.len(), 7);
        assert_eq!(asserts[0].kind, AssertionType::Status);
        assert_eq!(asserts[1].kind, AssertionType::ResponseTime);
        assert_eq!(asserts[1].operator, Operator::Below);
        assert_eq!(asserts[2].kind, AssertionType::BodyContains);
        assert_eq!(asserts[3].kind, AssertionType::Header);
        assert_eq!(asserts[3].path.as_deref(), Some("Content-Type"));
        assert_eq!(asserts[4].operator, Operator::GreaterOrEqual);
        assert_eq!(asserts[4].expect, json!(10));
        assert_eq!(asserts[5].operator, Operator::Exists);
        assert_eq!(asserts[6].operator, Operator::NotExists);
    }

    #[test]
    fn capture_lines_cover_all_sources() {
        let doc = parse_flow(
            "```step\nGET /x\n[Captures]\ntok = data.token\nreq = header:X-Request-Id\nsess = cookie:session\ncode = status\n```\n",
        );
        let captures = &doc.steps[0].captures;
        assert_eq!(captures[0].source, CaptureSource::Body);
        assert_eq!(captures[1].source, CaptureSource::Header);
        assert_eq!(captures[1].path, "X-Request-Id");
        assert_eq!(captures[2].source, CaptureSource::Cookie);
        assert_eq!(captures[3].source, CaptureSource::Status);
    }

    #[test]
    fn legacy_kest_blocks_become_sequential_steps() {
        let doc = parse_flow(
            "```kest\nGET /one\n[Asserts]\nstatus == 200\n```\n\n```kest\nGET /two\n```\n",
        );
        assert_eq!(doc.steps.len(), 2);
        assert_eq!(doc.steps[0].id, "step-1");
        assert_eq!(doc.steps[1].id, "step-2");
        assert!(doc.edges.is_empty());
    }

    #[test]
    fn missing_ids_are_assigned_by_source_order() {
        let doc = parse_flow("```step\nGET /a\n```\n\n```step\n@id named\nGET /b\n```\n\n```step\nGET /c\n```\n");
        assert_eq!(doc.steps[0].id, "step-1");
        assert_eq!(doc.steps[1].id, "named");
        assert_eq!(doc.steps[2].id, "step-3");
    }

    #[test]
    fn duplicate_ids_are_reassigned_with_warning() {
        let doc = parse_flow("```step\n@id dup\nGET /a\n```\n\n```step\n@id dup\nGET /b\n```\n");
        assert_eq!(doc.steps[0].id, "dup");
        assert_eq!(doc.steps[1].id, "step-2");
        assert!(doc.warnings.iter().any(|w| w.contains("duplicate step id")));
    }

    #[test]
    fn edge_with_unknown_endpoint_is_dropped_with_warning() {
        let doc = parse_flow(
            "```step\n@id a\nGET /a\n```\n\n```edge\n@from a\n@to ghost\n```\n",
        );
        assert!(doc.edges.is_empty());
        assert!(doc.warnings.iter().any(|w| w.contains("unknown step id")));
    }

    #[test]
    fn unparseable_numeric_directive_falls_back_with_warning() {
        let doc = parse_flow("```step\n@retry lots\nGET /a\n```\n");
        assert_eq!(doc.steps[0].retry, 0);
        assert!(doc.warnings.iter().any(|w| w.contains("@retry")));
    }

    #[test]
    fn unknown_directives_warn_and_are_ignored() {
        let doc = parse_flow("```step\n@sleep 100\nGET /a\n```\n");
        assert_eq!(doc.steps.len(), 1);
        assert!(doc.warnings.iter().any(|w| w.contains("@sleep")));
    }

    #[test]
    fn malformed_assert_line_warns_and_is_omitted() {
        let doc = parse_flow("```step\nGET /a\n[Asserts]\nstatus = = 200\nstatus == 200\n```\n");
        assert_eq!(doc.steps[0].assertions.len(), 1);
        assert!(doc.warnings.iter().any(|w| w.contains("skipping assertion")));
    }

    #[test]
    fn on_fail_directive_parses_and_rejects_junk() {
        let doc = parse_flow("```step\n@on-fail stop\nGET /a\n```\n");
        assert_eq!(doc.steps[0].on_fail, Some(OnFail::Stop));
        let doc = parse_flow("```step\n@on-fail explode\nGET /a\n```\n");
        assert_eq!(doc.steps[0].on_fail, None);
        assert!(!doc.warnings.is_empty());
    }

    #[test]
    fn unrelated_fences_are_ignored() {
        let doc = parse_flow("```json\n{\"GET\": \"/not-a-step\"}\n```\n\n```step\nGET /real\n```\n");
        assert_eq!(doc.steps.len(), 1);
        assert_eq!(doc.steps[0].request.url, "/real");
    }

    #[test]
    fn empty_document_parses_to_empty_flow() {
        let doc = parse_flow("# just prose\n\nnothing here\n");
        assert!(doc.steps.is_empty());
        assert!(doc.edges.is_empty());
    }

    #[test]
    fn round_trip_preserves_the_graph() {
        let doc = parse_flow(LOGIN_FLOW);
        let written = write_flow(&doc);
        let reparsed = parse_flow(&written);

        assert_eq!(reparsed.meta.id, doc.meta.id);
        assert_eq!(reparsed.meta.name, doc.meta.name);
        assert_eq!(reparsed.meta.tags, doc.meta.tags);
        assert_eq!(reparsed.edges, doc.edges);
        assert_eq!(reparsed.steps.len(), doc.steps.len());
        for (a, b) in reparsed.steps.iter().zip(doc.steps.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.name, b.name);
            assert_eq!(a.retry, b.retry);
            assert_eq!(a.retry_wait_ms, b.retry_wait_ms);
            assert_eq!(a.max_duration_ms, b.max_duration_ms);
            assert_eq!(a.on_fail, b.on_fail);
            assert_eq!(a.request.method, b.request.method);
            assert_eq!(a.request.url, b.request.url);
            assert_eq!(a.request.headers, b.request.headers);
            assert_eq!(a.request.query, b.request.query);
            assert_eq!(a.request.body, b.request.body);
            assert_eq!(a.assertions, b.assertions);
            assert_eq!(a.captures, b.captures);
        }
    }

    #[test]
    fn round_trip_covers_every_directive_and_source() {
        let source = "```step title=\"Everything\"\n@id all\n@retry 3\n@retry-wait 250\n@max-duration 9000\n@on-fail continue\nPUT /items/1\n[Headers]\nX-A: 1\n[Queries]\npage = 2\n[Body]\n{\"n\":{{count}}}\n[Asserts]\nstatus == 200\ndata.id exists\n[Captures]\nsess = cookie:session\n```\n";
        let doc = parse_flow(source);
        let reparsed = parse_flow(&write_flow(&doc));
        assert_eq!(reparsed.steps[0].retry, 3);
        assert_eq!(reparsed.steps[0].retry_wait_ms, 250);
        assert_eq!(reparsed.steps[0].max_duration_ms, Some(9000));
        assert_eq!(reparsed.steps[0].on_fail, Some(OnFail::Continue));
        assert_eq!(reparsed.steps[0].name, "Everything");
        assert_eq!(reparsed.steps[0].captures, doc.steps[0].captures);
        assert_eq!(reparsed.steps[0].assertions, doc.steps[0].assertions);
    }
}
