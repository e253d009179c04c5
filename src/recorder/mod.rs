//! Trace persistence through the Repository.
//!
//! The recorder sanitizes snapshots (credential redaction, body truncation)
//! and flushes them with a bounded number of retries. A repository that keeps
//! failing costs a warning, never the run: later retries continue in the
//! background and the flow moves on.

use std::sync::Arc;
use std::time::Duration;

use crate::model::{FlowRecord, RequestSnapshot, ResponseSnapshot, RunRecord, StepRecord};
use crate::repository::Repository;

/// Bodies stored in run history are cut at this size.
pub const MAX_SNAPSHOT_BODY_BYTES: usize = 64 * 1024;

const TRUNCATION_MARKER: &str = "…[truncated]";
const REDACTED: &str = "<redacted>";
const FLUSH_ATTEMPTS: u32 = 3;
const FLUSH_BACKOFF_MS: u64 = 100;

pub struct RunRecorder {
    repo: Arc<dyn Repository>,
}

impl RunRecorder {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Flushes one step trace. The first write is awaited so records land in
    /// step order; on failure the remaining retries run detached.
    pub async fn record_step(&self, record: &StepRecord) {
        let mut sanitized = record.clone();
        sanitized.request_snapshot = sanitized.request_snapshot.map(sanitize_request);
        sanitized.response_snapshot = sanitized.response_snapshot.map(sanitize_response);
        self.flush(RunRecord::Step(sanitized)).await;
    }

    /// Flushes the aggregate flow record. The caller passes captured
    /// variables only; static scopes never reach persistence.
    pub async fn record_flow(&self, record: &FlowRecord) {
        self.flush(RunRecord::Flow(record.clone())).await;
    }

    async fn flush(&self, record: RunRecord) {
        match self.repo.create_run(record.clone()).await {
            Ok(_) => {}
            Err(first_err) => {
                tracing::warn!(error = %first_err, "run record write failed, retrying in background");
                let repo = Arc::clone(&self.repo);
                tokio::spawn(async move {
                    let mut backoff = FLUSH_BACKOFF_MS;
                    for attempt in 2..=FLUSH_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                        match repo.create_run(record.clone()).await {
                            Ok(_) => return,
                            Err(e) => {
                                tracing::warn!(
                                    attempt,
                                    error = %e,
                                    "run record write failed"
                                );
                            }
                        }
                        backoff *= 2;
                    }
                    tracing::warn!("giving up on run record after {FLUSH_ATTEMPTS} attempts");
                });
            }
        }
    }
}

fn sanitize_request(mut snapshot: RequestSnapshot) -> RequestSnapshot {
    for (name, value) in snapshot.headers.iter_mut() {
        if name.eq_ignore_ascii_case("authorization") {
            *value = REDACTED.to_string();
        }
    }
    if let Some(body) = snapshot.body.take() {
        let (body, truncated) = truncate_body(body);
        snapshot.body = Some(body);
        snapshot.body_truncated = snapshot.body_truncated || truncated;
    }
    snapshot
}

fn sanitize_response(mut snapshot: ResponseSnapshot) -> ResponseSnapshot {
    if let Some(body) = snapshot.body.take() {
        let (body, truncated) = truncate_body(body);
        snapshot.body = Some(body);
        snapshot.body_truncated = snapshot.body_truncated || truncated;
    }
    snapshot
}

fn truncate_body(body: String) -> (String, bool) {
    if body.len() <= MAX_SNAPSHOT_BODY_BYTES {
        return (body, false);
    }
    // Cut on a char boundary at or below the byte limit.
    let mut cut = MAX_SNAPSHOT_BODY_BYTES;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = body[..cut].to_string();
    truncated.push_str(TRUNCATION_MARKER);
    (truncated, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunFilter, StepStatus};
    use crate::repository::{MemoryRepository, RepositoryError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn step_record(with_auth: bool, body: Option<String>) -> StepRecord {
        StepRecord {
            step_id: "s".into(),
            step_name: "s".into(),
            started_at: chrono::Utc::now(),
            duration_ms: 1,
            request_snapshot: Some(RequestSnapshot {
                method: "GET".into(),
                url: "http://x".into(),
                headers: if with_auth {
                    vec![("Authorization".into(), "Bearer secret".into())]
                } else {
                    Vec::new()
                },
                body,
                body_truncated: false,
            }),
            response_snapshot: None,
            assertion_results: Vec::new(),
            captured_vars: HashMap::new(),
            attempts: Vec::new(),
            status: StepStatus::Pass,
            message: None,
            failure_kind: None,
        }
    }

    #[tokio::test]
    async fn authorization_header_is_redacted() {
        let repo = Arc::new(MemoryRepository::new());
        let recorder = RunRecorder::new(repo.clone());
        recorder.record_step(&step_record(true, None)).await;

        let page = repo
            .list_runs(RunFilter::default())
            .await
            .unwrap();
        let RunRecord::Step(stored) = &page.records[0].1 else {
            panic!("expected step record")
        };
        let headers = &stored.request_snapshot.as_ref().unwrap().headers;
        assert_eq!(headers[0].1, REDACTED);
    }

    #[tokio::test]
    async fn oversized_body_is_truncated_with_marker() {
        let repo = Arc::new(MemoryRepository::new());
        let recorder = RunRecorder::new(repo.clone());
        let big = "x".repeat(MAX_SNAPSHOT_BODY_BYTES + 100);
        recorder.record_step(&step_record(false, Some(big))).await;

        let page = repo.list_runs(RunFilter::default()).await.unwrap();
        let RunRecord::Step(stored) = &page.records[0].1 else {
            panic!("expected step record")
        };
        let snapshot = stored.request_snapshot.as_ref().unwrap();
        assert!(snapshot.body_truncated);
        let body = snapshot.body.as_ref().unwrap();
        assert!(body.ends_with(TRUNCATION_MARKER));
        assert!(body.len() <= MAX_SNAPSHOT_BODY_BYTES + TRUNCATION_MARKER.len());
    }

    struct FlakyRepo {
        calls: AtomicU32,
        fail_first: u32,
        inner: MemoryRepository,
    }

    #[async_trait]
    impl Repository for FlakyRepo {
        async fn get_spec_by_id(
            &self,
            id: &str,
        ) -> Result<crate::model::Spec, RepositoryError> {
            self.inner.get_spec_by_id(id).await
        }
        async fn get_environment(
            &self,
            project_id: &str,
            name: &str,
        ) -> Result<crate::model::Environment, RepositoryError> {
            self.inner.get_environment(project_id, name).await
        }
        async fn create_run(&self, record: RunRecord) -> Result<String, RepositoryError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(RepositoryError::Storage("flaky".into()));
            }
            self.inner.create_run(record).await
        }
        async fn list_runs(&self, filter: RunFilter) -> Result<crate::model::RunPage, RepositoryError> {
            self.inner.list_runs(filter).await
        }
    }

    #[tokio::test]
    async fn failed_write_retries_in_background_until_it_lands() {
        let repo = Arc::new(FlakyRepo {
            calls: AtomicU32::new(0),
            fail_first: 1,
            inner: MemoryRepository::new(),
        });
        let recorder = RunRecorder::new(repo.clone());
        recorder.record_step(&step_record(false, None)).await;

        // The retry runs detached with 100 ms backoff.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let page = repo.list_runs(RunFilter::default()).await.unwrap();
        assert_eq!(page.records.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_never_panic() {
        let repo = Arc::new(FlakyRepo {
            calls: AtomicU32::new(0),
            fail_first: 100,
            inner: MemoryRepository::new(),
        });
        let recorder = RunRecorder::new(repo.clone());
        recorder.record_step(&step_record(false, None)).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        let page = repo.list_runs(RunFilter::default()).await.unwrap();
        assert!(page.records.is_empty());
    }
}
