//! HTTP step execution: render, send, decode, assert, capture, retry.
//!
//! One executor owns one connection-pooled reqwest client and is shared by
//! every flow of a runner instance. A single flow's steps run serially; the
//! executor itself is safe for concurrent flows.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::{Client, Method};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::assertions::{self, ResponseView};
use crate::config::HttpLimits;
use crate::errors::EngineError;
use crate::jsonpath::{self, Extracted};
use crate::model::{
    AttemptSummary, Capture, CaptureSource, Environment, FailureKind, FlowStep, RequestSnapshot,
    ResponseSnapshot, StepRecord, StepStatus,
};
use crate::render::{self, is_json_media_type};
use crate::vars::VarStore;

/// Per-invocation toggles coming from the CLI surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    /// Reject a step whose render left placeholders unresolved, before any
    /// network I/O.
    pub strict: bool,
    /// Log the resolved variable snapshot before each request.
    pub debug_vars: bool,
}

/// Executes one rendered HTTP exchange per attempt, with the step's retry
/// policy around it.
pub struct HttpStepExecutor {
    client: Client,
    limits: HttpLimits,
}

/// Everything one attempt produced. The final attempt becomes the step
/// outcome; earlier ones survive as concise summaries.
struct AttemptTrace {
    status: StepStatus,
    failure_kind: Option<FailureKind>,
    message: Option<String>,
    request_snapshot: Option<RequestSnapshot>,
    response_snapshot: Option<ResponseSnapshot>,
    assertion_results: Vec<crate::model::AssertionOutcome>,
    captured: HashMap<String, Value>,
    http_status: Option<u16>,
    duration_ms: u64,
    retryable: bool,
}

impl AttemptTrace {
    fn failed_early(
        status: StepStatus,
        kind: FailureKind,
        message: String,
        retryable: bool,
    ) -> Self {
        Self {
            status,
            failure_kind: Some(kind),
            message: Some(message),
            request_snapshot: None,
            response_snapshot: None,
            assertion_results: Vec::new(),
            captured: HashMap::new(),
            http_status: None,
            duration_ms: 0,
            retryable,
        }
    }

    fn summary(&self, attempt: u32) -> AttemptSummary {
        AttemptSummary {
            attempt,
            status: self.status,
            http_status: self.http_status,
            duration_ms: self.duration_ms,
            message: self.message.clone(),
        }
    }
}

impl HttpStepExecutor {
    pub fn new(limits: HttpLimits) -> Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(limits.dial_timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, limits })
    }

    /// Runs a step to completion, including retries. Captures are committed
    /// to the store only when the final attempt passes.
    #[tracing::instrument(name = "step", skip_all, fields(step_id = %step.id))]
    pub async fn execute_step(
        &self,
        step: &FlowStep,
        env: &Environment,
        store: &mut VarStore,
        opts: &ExecOptions,
        cancel: &CancellationToken,
    ) -> StepRecord {
        let started_at = chrono::Utc::now();
        let step_clock = Instant::now();
        let attempts_allowed = step.retry + 1;

        let mut summaries: Vec<AttemptSummary> = Vec::new();
        let mut last: Option<AttemptTrace> = None;

        for attempt_no in 1..=attempts_allowed {
            if cancel.is_cancelled() {
                let trace = cancelled_trace();
                summaries.push(trace.summary(attempt_no));
                last = Some(trace);
                break;
            }

            let trace = self.attempt(step, env, store, opts, cancel).await;
            summaries.push(trace.summary(attempt_no));
            tracing::info!(
                attempt = attempt_no,
                status = ?trace.status,
                http_status = trace.http_status,
                duration_ms = trace.duration_ms,
                "attempt finished"
            );

            let done = trace.status == StepStatus::Pass
                || !trace.retryable
                || attempt_no == attempts_allowed;
            last = Some(trace);
            if done {
                break;
            }

            if step.retry_wait_ms > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        last = Some(cancelled_trace());
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(step.retry_wait_ms)) => {}
                }
            }
        }

        let final_trace = last.unwrap_or_else(cancelled_trace);

        // Commit rule: capture mutations become visible to later steps only
        // after a passing attempt.
        if final_trace.status == StepStatus::Pass {
            for (name, value) in &final_trace.captured {
                if let Err(e) = store.capture(name, value.clone()) {
                    tracing::warn!(capture = %name, error = %e, "capture commit rejected");
                }
            }
        }

        let message = final_trace.message.clone().map(|m| {
            format!("step '{}' ({}): {}", step.id, step.name, m)
        });

        StepRecord {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            started_at,
            duration_ms: step_clock.elapsed().as_millis() as u64,
            request_snapshot: final_trace.request_snapshot,
            response_snapshot: final_trace.response_snapshot,
            assertion_results: final_trace.assertion_results,
            captured_vars: final_trace.captured,
            attempts: summaries,
            status: final_trace.status,
            message,
            failure_kind: final_trace.failure_kind,
        }
    }

    async fn attempt(
        &self,
        step: &FlowStep,
        env: &Environment,
        store: &VarStore,
        opts: &ExecOptions,
        cancel: &CancellationToken,
    ) -> AttemptTrace {
        // ------------------------------------------------------------------
        // Render and merge the request.
        // ------------------------------------------------------------------
        let mut rendered = render::render_request(&step.request, store);

        let mut headers: Vec<(String, String)> = Vec::new();
        for (name, value) in &env.headers {
            let r = render::render(value, store);
            rendered.unresolved.extend(r.unresolved);
            headers.push((name.clone(), r.text));
        }
        for (name, value) in std::mem::take(&mut rendered.headers) {
            merge_pair(&mut headers, name, value);
        }

        if opts.debug_vars {
            tracing::info!(
                variables = %serde_json::Value::Object(store.snapshot().into_iter().collect()),
                unresolved = ?rendered.unresolved,
                "resolved variable state"
            );
        }

        if opts.strict && !rendered.unresolved.is_empty() {
            let err = EngineError::VariableMissing {
                name: rendered.unresolved[0].clone(),
            };
            let mut message = err.to_string();
            if let Some(hint) = err.hint() {
                message = format!("{message} ({hint})");
            }
            return AttemptTrace::failed_early(
                StepStatus::Error,
                FailureKind::VariableMissing,
                message,
                false,
            );
        }

        // Reserved capture names are an authoring mistake; reject before I/O.
        if let Some(capture) = step.captures.iter().find(|c| c.name.starts_with('$')) {
            return AttemptTrace::failed_early(
                StepStatus::Error,
                FailureKind::Config,
                format!("cannot capture into reserved name '{}'", capture.name),
                false,
            );
        }

        let method = match Method::from_bytes(rendered.method.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return AttemptTrace::failed_early(
                    StepStatus::Error,
                    FailureKind::Config,
                    format!("invalid HTTP method '{}'", rendered.method),
                    false,
                )
            }
        };

        let url = absolute_url(&rendered.url, &env.base_url, &rendered.query);

        let mut builder = self.client.request(method, &url);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        let body_text = rendered.body.clone();
        if let Some(body) = &body_text {
            builder = builder.body(body.clone());
        }

        let request_snapshot = RequestSnapshot {
            method: rendered.method.clone(),
            url: url.clone(),
            headers: headers.clone(),
            body: body_text,
            body_truncated: false,
        };

        // ------------------------------------------------------------------
        // Send, bounded by the per-attempt deadline and the abort signal.
        // ------------------------------------------------------------------
        let deadline = step
            .max_duration_ms
            .map(Duration::from_millis)
            .unwrap_or(self.limits.request_timeout);
        let max_body = self.limits.max_body_bytes;

        let clock = Instant::now();
        let exchange = async {
            let response = builder.send().await.map_err(transport_error)?;
            let status = response.status().as_u16();
            let response_headers: Vec<(String, String)> = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();

            let mut response = response;
            let mut body = Vec::new();
            let mut too_large = false;
            loop {
                match response.chunk().await.map_err(transport_error)? {
                    Some(chunk) => {
                        body.extend_from_slice(&chunk);
                        if body.len() > max_body {
                            too_large = true;
                            break;
                        }
                    }
                    None => break,
                }
            }
            Ok::<_, EngineError>((status, response_headers, body, too_large))
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            timed = tokio::time::timeout(deadline, exchange) => match timed {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::Timeout { limit_ms: deadline.as_millis() as u64 }),
            }
        };
        let elapsed_ms = clock.elapsed().as_millis() as u64;

        let (status, response_headers, body, too_large) = match outcome {
            Ok(parts) => parts,
            Err(err) => {
                let (status, kind) = match &err {
                    EngineError::Cancelled => (StepStatus::Error, FailureKind::Cancelled),
                    EngineError::Timeout { .. } => (StepStatus::Error, FailureKind::Timeout),
                    _ => (StepStatus::Error, FailureKind::Transport),
                };
                let mut trace = AttemptTrace::failed_early(
                    status,
                    kind,
                    err.to_string(),
                    err.is_retryable(),
                );
                trace.request_snapshot = Some(request_snapshot);
                trace.duration_ms = elapsed_ms;
                return trace;
            }
        };

        // ------------------------------------------------------------------
        // Decode and check the response.
        // ------------------------------------------------------------------
        let body_text = String::from_utf8_lossy(&body).into_owned();
        let response_snapshot = ResponseSnapshot {
            status,
            headers: response_headers.clone(),
            body: if body_text.is_empty() {
                None
            } else {
                Some(body_text.clone())
            },
            body_truncated: too_large,
        };

        if too_large {
            let err = EngineError::BodyTooLarge { limit: max_body };
            return AttemptTrace {
                status: StepStatus::Error,
                failure_kind: Some(FailureKind::BodyTooLarge),
                message: Some(err.to_string()),
                request_snapshot: Some(request_snapshot),
                response_snapshot: Some(response_snapshot),
                assertion_results: Vec::new(),
                captured: HashMap::new(),
                http_status: Some(status),
                duration_ms: elapsed_ms,
                retryable: false,
            };
        }

        let content_type = response_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .unwrap_or("");
        let json_body: Option<Value> = if is_json_media_type(content_type) {
            serde_json::from_str(&body_text).ok()
        } else {
            None
        };

        let view = ResponseView {
            status,
            json: json_body.as_ref(),
            headers: &response_headers,
            body_text: if body_text.is_empty() {
                None
            } else {
                Some(&body_text)
            },
            elapsed_ms,
        };

        let assertion_results = match assertions::evaluate_all(&step.assertions, &view) {
            Ok(results) => results,
            Err(err) => {
                return AttemptTrace {
                    status: StepStatus::Error,
                    failure_kind: Some(FailureKind::Config),
                    message: Some(err.to_string()),
                    request_snapshot: Some(request_snapshot),
                    response_snapshot: Some(response_snapshot),
                    assertion_results: Vec::new(),
                    captured: HashMap::new(),
                    http_status: Some(status),
                    duration_ms: elapsed_ms,
                    retryable: false,
                }
            }
        };

        // Classification precedence: an assertion failure makes the attempt
        // `fail` (and retryable) before captures are even considered, so a
        // 503 with an empty body retries instead of erroring on its capture.
        let failed: Vec<&crate::model::AssertionOutcome> =
            assertion_results.iter().filter(|r| !r.passed).collect();
        if !failed.is_empty() {
            let message = failed
                .iter()
                .map(|r| r.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return AttemptTrace {
                status: StepStatus::Fail,
                failure_kind: Some(FailureKind::Assertion),
                message: Some(message),
                request_snapshot: Some(request_snapshot),
                response_snapshot: Some(response_snapshot),
                assertion_results,
                captured: HashMap::new(),
                http_status: Some(status),
                duration_ms: elapsed_ms,
                retryable: true,
            };
        }

        let mut captured = HashMap::new();
        for capture in &step.captures {
            match evaluate_capture(capture, &view) {
                Ok(value) => {
                    captured.insert(capture.name.clone(), value);
                }
                Err((message, kind, retryable)) => {
                    return AttemptTrace {
                        status: StepStatus::Error,
                        failure_kind: Some(kind),
                        message: Some(message),
                        request_snapshot: Some(request_snapshot),
                        response_snapshot: Some(response_snapshot),
                        assertion_results,
                        captured: HashMap::new(),
                        http_status: Some(status),
                        duration_ms: elapsed_ms,
                        retryable,
                    };
                }
            }
        }

        AttemptTrace {
            status: StepStatus::Pass,
            failure_kind: None,
            message: None,
            request_snapshot: Some(request_snapshot),
            response_snapshot: Some(response_snapshot),
            assertion_results,
            captured,
            http_status: Some(status),
            duration_ms: elapsed_ms,
            retryable: false,
        }
    }
}

fn cancelled_trace() -> AttemptTrace {
    AttemptTrace::failed_early(
        StepStatus::Error,
        FailureKind::Cancelled,
        "cancelled".to_string(),
        false,
    )
}

fn transport_error(e: reqwest::Error) -> EngineError {
    EngineError::Transport(e.to_string())
}

/// Resolves the rendered URL against the environment base and appends the
/// merged query string, percent-encoding keys and values.
fn absolute_url(url: &str, base_url: &str, query: &[(String, String)]) -> String {
    let mut absolute = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("{}{}", base_url.trim_end_matches('/'), url)
    };

    if !query.is_empty() {
        let encoded: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        let separator = if absolute.contains('?') { '&' } else { '?' };
        absolute.push(separator);
        absolute.push_str(&encoded.join("&"));
    }

    absolute
}

/// Step headers override environment headers on case-insensitive name
/// conflicts, keeping the environment pair's position.
fn merge_pair(pairs: &mut Vec<(String, String)>, name: String, value: String) {
    match pairs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
        Some(slot) => slot.1 = value,
        None => pairs.push((name, value)),
    }
}

/// Pulls one capture value from the response snapshot.
///
/// Error tuple: (message, failure kind, retryable). Capture failures point
/// at the authoring side (wrong path, non-JSON body, absent header), so they
/// all carry the config kind and are never retried.
fn evaluate_capture(
    capture: &Capture,
    view: &ResponseView<'_>,
) -> Result<Value, (String, FailureKind, bool)> {
    match capture.source {
        CaptureSource::Status => Ok(Value::from(view.status)),
        CaptureSource::Header => match view.header(&capture.path) {
            Some(value) => Ok(Value::String(value.to_string())),
            None => Err((
                format!(
                    "capture '{}': header '{}' not present in response",
                    capture.name, capture.path
                ),
                FailureKind::Config,
                false,
            )),
        },
        CaptureSource::Cookie => match find_cookie(view.headers, &capture.path) {
            Some(value) => Ok(Value::String(value)),
            None => Err((
                format!(
                    "capture '{}': cookie '{}' not present in response",
                    capture.name, capture.path
                ),
                FailureKind::Config,
                false,
            )),
        },
        CaptureSource::Body => {
            let json = view.json.ok_or_else(|| {
                (
                    format!(
                        "capture '{}': response body is not JSON, cannot apply path '{}'",
                        capture.name, capture.path
                    ),
                    FailureKind::Config,
                    false,
                )
            })?;
            match jsonpath::extract(json, &capture.path) {
                Extracted::Value(value) => Ok(value),
                Extracted::Miss => Err((
                    format!(
                        "capture '{}': path '{}' not found in response body",
                        capture.name, capture.path
                    ),
                    FailureKind::Config,
                    false,
                )),
            }
        }
    }
}

/// First `name=value` pair across all `Set-Cookie` headers.
fn find_cookie(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
        .find_map(|(_, raw)| {
            raw.split(';').next().and_then(|pair| {
                let (k, v) = pair.split_once('=')?;
                (k.trim() == name).then(|| v.trim().to_string())
            })
        })
}
