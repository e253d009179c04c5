//! Data model of the Kest execution engine.
//!
//! Three families of types live here:
//! - authoring: [`Spec`], [`Environment`], [`TestCase`], [`FlowDocument`]
//!   with its steps, edges and directives;
//! - checking: [`Assertion`] and [`Capture`] with their closed operator and
//!   source sets;
//! - tracing: [`StepRecord`] / [`FlowRecord`] as persisted through the
//!   Repository. Serde field names of the trace types are part of the
//!   Repository contract and must stay stable to support replay.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// HTTP methods accepted by spec and flow authoring.
pub const VALID_HTTP_METHODS: &[&str] =
    &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

// ============================================================================
// AUTHORING MODEL
// ============================================================================

/// A declared HTTP endpoint under a project. Authored elsewhere; the engine
/// holds an immutable copy for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    pub project_id: String,
    pub method: String,
    /// Path template, possibly containing `:param` segments.
    pub path: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub default_headers: Vec<(String, String)>,
    #[serde(default)]
    pub default_query: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_payload: Option<Value>,
}

/// Named set of base URL, variables and default headers bound to a project.
/// A spec execution joins exactly one environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    pub project_id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

/// A concrete parameterization bound to one [`Spec`], reused across flows as
/// a single-step convenience. Pre/post scripts are opaque to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub spec_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub path_params: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_script: Option<String>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub captures: Vec<Capture>,
}

impl TestCase {
    /// Materializes the single step this case describes, merging the spec's
    /// defaults under the case's own headers and query and filling `:param`
    /// segments from `path_params`.
    pub fn into_step(self, spec: &Spec) -> FlowStep {
        let mut path = spec.path.clone();
        for (param, value) in &self.path_params {
            path = path.replace(&format!(":{param}"), value);
        }

        let mut headers = spec.default_headers.clone();
        for (k, v) in self.headers {
            replace_or_push(&mut headers, k, v);
        }
        let mut query = spec.default_query.clone();
        for (k, v) in self.query {
            replace_or_push(&mut query, k, v);
        }

        let id = self
            .name
            .clone()
            .unwrap_or_else(|| format!("{} {}", spec.method, spec.path));
        FlowStep {
            name: id.clone(),
            id,
            retry: 0,
            retry_wait_ms: 0,
            max_duration_ms: None,
            on_fail: None,
            request: RequestTemplate {
                method: spec.method.clone(),
                url: path,
                headers,
                query,
                body: self.body,
            },
            assertions: self.assertions,
            captures: self.captures,
        }
    }
}

fn replace_or_push(pairs: &mut Vec<(String, String)>, key: String, value: String) {
    match pairs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
        Some(slot) => slot.1 = value,
        None => pairs.push((key, value)),
    }
}

/// A parsed flow document: meta, ordered steps, conditional edges, plus the
/// non-fatal warnings accumulated while parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDocument {
    pub meta: FlowMeta,
    pub steps: Vec<FlowStep>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl FlowDocument {
    pub fn step(&self, id: &str) -> Option<&FlowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowMeta {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One HTTP exchange with its checks, captures and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStep {
    /// Unique within the document. Auto-assigned (`step-N`) when absent.
    pub id: String,
    /// Display name; defaults to the id.
    pub name: String,
    /// Additional attempts after the first. 0 means a single attempt.
    #[serde(default)]
    pub retry: u32,
    /// Sleep between attempts, in milliseconds.
    #[serde(default)]
    pub retry_wait_ms: u64,
    /// Per-attempt deadline in milliseconds, overriding the client default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
    /// Per-step override of the flow's stop/continue behavior.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<OnFail>,
    pub request: RequestTemplate,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub captures: Vec<Capture>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFail {
    /// Abort the flow at the first non-pass outcome.
    Stop,
    /// Ignore non-pass outcomes and keep traversing.
    Continue,
}

/// The un-rendered request of a step. Header and query pairs keep their
/// source order; the renderer never reorders them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Conditional transition between two steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub on: EdgeCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeCondition {
    Success,
    Failure,
    /// Taken regardless of the source step's outcome.
    #[default]
    #[serde(rename = "")]
    Always,
}

// ============================================================================
// ASSERTIONS AND CAPTURES
// ============================================================================

/// A checkable predicate on a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(rename = "type")]
    pub kind: AssertionType,
    /// JSON path for `json_path`, header name for `header`; unused otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub operator: Operator,
    #[serde(default)]
    pub expect: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// How the `actual` side of an assertion is sourced from the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionType {
    Status,
    JsonPath,
    ResponseTime,
    Header,
    BodyContains,
}

/// The closed comparison set. Evaluation is a tagged dispatch over these
/// variants, not an open extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Exists,
    NotExists,
    Contains,
    Below,
    Above,
    GreaterOrEqual,
    LessOrEqual,
    Matches,
}

impl Operator {
    /// The token used in flow documents, e.g. `==` for `Equals`.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::Exists => "exists",
            Self::NotExists => "not_exists",
            Self::Contains => "contains",
            Self::Below => "<",
            Self::Above => ">",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::Matches => "matches",
        }
    }
}

/// A named value pulled from a response to feed later steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub name: String,
    pub source: CaptureSource,
    /// JSON path for `body`, header name for `header`, cookie name for
    /// `cookie`; ignored for `status`.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    Body,
    Header,
    Cookie,
    Status,
}

// ============================================================================
// RUN TRACES
// ============================================================================

/// Final state of a step (or, aggregated, of a flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pass,
    Fail,
    Error,
    Skipped,
}

/// Error kind attached to a non-pass step record, used by the CLI to pick
/// the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Config,
    VariableMissing,
    Transport,
    Timeout,
    BodyTooLarge,
    Assertion,
    Cancelled,
}

/// The request exactly as sent, after rendering and merging. `Authorization`
/// values are redacted and bodies truncated by the recorder before
/// persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub body_truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub body_truncated: bool,
}

/// Structured result of one assertion. `actual` is `None` when the value
/// could not be sourced (a path miss is distinct from a literal `null`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionOutcome {
    pub passed: bool,
    #[serde(rename = "type")]
    pub kind: AssertionType,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub expect: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    pub message: String,
}

/// Concise per-attempt summary kept for diagnosis. The final attempt's full
/// trace is the authoritative step outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt: u32,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Persisted trace of one step invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub step_name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_snapshot: Option<RequestSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_snapshot: Option<ResponseSnapshot>,
    #[serde(default)]
    pub assertion_results: Vec<AssertionOutcome>,
    #[serde(default)]
    pub captured_vars: HashMap<String, Value>,
    #[serde(default)]
    pub attempts: Vec<AttemptSummary>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

impl StepRecord {
    /// A record for a step the traversal never reached.
    pub fn skipped(step: &FlowStep) -> Self {
        Self {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            started_at: chrono::Utc::now(),
            duration_ms: 0,
            request_snapshot: None,
            response_snapshot: None,
            assertion_results: Vec::new(),
            captured_vars: HashMap::new(),
            attempts: Vec::new(),
            status: StepStatus::Skipped,
            message: None,
            failure_kind: None,
        }
    }
}

/// Aggregate trace of one flow invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: String,
    pub overall_status: StepStatus,
    pub step_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub total_duration_ms: u64,
    /// Captured keys only. Static environment and global values are never
    /// persisted here.
    #[serde(default)]
    pub variable_snapshot: HashMap<String, Value>,
}

/// Everything `run_flow` hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResult {
    pub record: FlowRecord,
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl FlowResult {
    /// Computes per-status counts and the overall status from step records.
    /// Skipped steps never influence the overall status; an empty flow
    /// passes.
    pub fn aggregate(
        flow_id: String,
        steps: Vec<StepRecord>,
        total_duration_ms: u64,
        variable_snapshot: HashMap<String, Value>,
        warnings: Vec<String>,
    ) -> Self {
        let passed = steps.iter().filter(|s| s.status == StepStatus::Pass).count();
        let failed = steps.iter().filter(|s| s.status == StepStatus::Fail).count();
        let errored = steps.iter().filter(|s| s.status == StepStatus::Error).count();
        let skipped = steps
            .iter()
            .filter(|s| s.status == StepStatus::Skipped)
            .count();

        let overall_status = if errored > 0 {
            StepStatus::Error
        } else if failed > 0 {
            StepStatus::Fail
        } else {
            StepStatus::Pass
        };

        Self {
            record: FlowRecord {
                flow_id,
                overall_status,
                step_count: steps.len(),
                passed,
                failed,
                errored,
                skipped,
                total_duration_ms,
                variable_snapshot,
            },
            steps,
            warnings,
        }
    }
}

impl FlowResult {
    /// Process exit code for the CLI: configuration problems outrank runtime
    /// errors, which outrank assertion failures.
    pub fn exit_code(&self) -> i32 {
        use crate::errors::exit;
        let kinds: Vec<FailureKind> =
            self.steps.iter().filter_map(|s| s.failure_kind).collect();
        if kinds
            .iter()
            .any(|k| matches!(k, FailureKind::Config | FailureKind::VariableMissing))
        {
            return exit::CONFIG_ERROR;
        }
        if kinds.iter().any(|k| {
            matches!(
                k,
                FailureKind::Transport
                    | FailureKind::Timeout
                    | FailureKind::BodyTooLarge
                    | FailureKind::Cancelled
            )
        }) {
            return exit::RUNTIME_ERROR;
        }
        match self.record.overall_status {
            StepStatus::Fail => exit::ASSERTION_FAILURE,
            _ => exit::OK,
        }
    }
}

/// A run record as accepted by the Repository. Identifiers are assigned by
/// the Repository, never by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunRecord {
    Step(StepRecord),
    Flow(FlowRecord),
}

/// Filter for browsing persisted runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub flow_id: Option<String>,
    pub offset: usize,
    /// 0 means no limit.
    pub limit: usize,
}

/// One page of persisted run records.
#[derive(Debug, Clone)]
pub struct RunPage {
    pub records: Vec<(String, RunRecord)>,
    pub total: usize,
}
