//! The two entry points the rest of the platform consumes: `run_step` for
//! the single-case path and `run_flow` for full traversals.
//!
//! A runner owns one pooled HTTP client and one recorder. Flows execute
//! serially within themselves; several flows may run concurrently on the
//! same runner, each with its own variable store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::HttpLimits;
use crate::errors::EngineError;
use crate::executor::{ExecOptions, HttpStepExecutor};
use crate::model::{
    Environment, FlowDocument, FlowResult, FlowStep, OnFail, StepRecord, StepStatus, TestCase,
};
use crate::recorder::RunRecorder;
use crate::repository::{Repository, RepositoryError};
use crate::scheduler::Traversal;
use crate::vars::VarStore;

/// Invocation-level switches, mirroring the CLI flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Fail a step on unresolved placeholders before any request is sent.
    pub strict: bool,
    /// Stop the flow at the first non-pass step unless the step overrides
    /// with `@on-fail continue`.
    pub fail_fast: bool,
    /// Log resolved variables before each request.
    pub debug_vars: bool,
}

pub struct Runner {
    executor: HttpStepExecutor,
    recorder: RunRecorder,
    repo: Arc<dyn Repository>,
    limits: HttpLimits,
    /// Project-level variables, the lowest-priority seeded scope.
    globals: HashMap<String, Value>,
}

impl Runner {
    /// Builds a runner with limits read from the environment.
    pub fn new(repo: Arc<dyn Repository>) -> Result<Self, EngineError> {
        Self::with_limits(repo, HttpLimits::from_env())
    }

    pub fn with_limits(repo: Arc<dyn Repository>, limits: HttpLimits) -> Result<Self, EngineError> {
        Ok(Self {
            executor: HttpStepExecutor::new(limits.clone())?,
            recorder: RunRecorder::new(Arc::clone(&repo)),
            repo,
            limits,
            globals: HashMap::new(),
        })
    }

    /// Sets the global project variables seeded below the environment scope.
    pub fn with_globals(mut self, globals: HashMap<String, Value>) -> Self {
        self.globals = globals;
        self
    }

    /// Runs a single already-materialized step. Used by the TestCase path
    /// and by `run_flow` internally.
    pub async fn run_step(
        &self,
        step: &FlowStep,
        env: &Environment,
        overrides: HashMap<String, Value>,
    ) -> StepRecord {
        let mut store = VarStore::seed(self.globals.clone(), seed_env_vars(env), overrides);
        let cancel = CancellationToken::new();
        let record = self
            .executor
            .execute_step(step, env, &mut store, &ExecOptions::default(), &cancel)
            .await;
        self.recorder.record_step(&record).await;
        record
    }

    /// Resolves a test case against its spec and runs the resulting step.
    pub async fn run_case(
        &self,
        case: TestCase,
        env: &Environment,
        overrides: HashMap<String, Value>,
    ) -> Result<StepRecord, RepositoryError> {
        let spec = self.repo.get_spec_by_id(&case.spec_id).await?;
        let step = case.into_step(&spec);
        Ok(self.run_step(&step, env, overrides).await)
    }

    /// Executes a whole flow document and returns its aggregate result. The
    /// caller's abort token interrupts the step in flight, its retries, and
    /// every wait in between.
    pub async fn run_flow(
        &self,
        doc: &FlowDocument,
        env: &Environment,
        overrides: HashMap<String, Value>,
        opts: RunOptions,
        cancel: CancellationToken,
    ) -> FlowResult {
        let flow_id = if doc.meta.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            doc.meta.id.clone()
        };
        tracing::info!(flow_id = %flow_id, steps = doc.steps.len(), "flow starting");

        let clock = Instant::now();
        let mut store = VarStore::seed(self.globals.clone(), seed_env_vars(env), overrides);
        let exec_opts = ExecOptions {
            strict: opts.strict,
            debug_vars: opts.debug_vars,
        };

        let (mut traversal, mut warnings) = Traversal::new(doc);
        warnings.extend(doc.warnings.iter().cloned());

        let mut records: Vec<StepRecord> = Vec::new();
        let mut prev: Option<(String, bool)> = None;

        loop {
            if cancel.is_cancelled() {
                warnings.push("flow aborted".to_string());
                break;
            }
            if let Some(cap) = self.limits.flow_max_duration {
                // The cap interrupts between steps, never the step in flight.
                if clock.elapsed() >= cap {
                    warnings.push(format!(
                        "flow exceeded its {} ms duration cap",
                        cap.as_millis()
                    ));
                    cancel.cancel();
                    break;
                }
            }

            let next = traversal.advance(prev.as_ref().map(|(id, p)| (id.as_str(), *p)));
            let Some(step_id) = next else { break };
            let Some(step) = doc.step(&step_id) else {
                warnings.push(format!("scheduler produced unknown step id '{step_id}'"));
                break;
            };

            let record = self
                .executor
                .execute_step(step, env, &mut store, &exec_opts, &cancel)
                .await;
            let passed = record.status == StepStatus::Pass;

            // Flush before the next step begins; recorder retries may lag.
            self.recorder.record_step(&record).await;
            records.push(record);

            let effective = step.on_fail.unwrap_or(if opts.fail_fast {
                OnFail::Stop
            } else {
                OnFail::Continue
            });
            if !passed && effective == OnFail::Stop {
                tracing::info!(step_id = %step_id, "stopping flow on first non-pass");
                break;
            }

            prev = Some((step_id, passed));
        }

        for step in &doc.steps {
            if !records.iter().any(|r| r.step_id == step.id) {
                records.push(StepRecord::skipped(step));
            }
        }

        let result = FlowResult::aggregate(
            flow_id,
            records,
            clock.elapsed().as_millis() as u64,
            store.captured().clone(),
            warnings,
        );
        self.recorder.record_flow(&result.record).await;
        tracing::info!(
            flow_id = %result.record.flow_id,
            status = ?result.record.overall_status,
            passed = result.record.passed,
            failed = result.record.failed,
            errored = result.record.errored,
            skipped = result.record.skipped,
            "flow finished"
        );
        result
    }
}

/// Environment variables plus the environment's base URL under the
/// conventional `base_url` name, unless the author already set one.
fn seed_env_vars(env: &Environment) -> HashMap<String, Value> {
    let mut vars = env.variables.clone();
    if !env.base_url.is_empty() {
        vars.entry("base_url".to_string())
            .or_insert_with(|| Value::String(env.base_url.clone()));
    }
    vars
}
