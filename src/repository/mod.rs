//! The persistence boundary of the engine.
//!
//! The engine only ever talks to this trait: specs and environments come in,
//! run records go out. The relational store, auth and everything else live
//! on the other side. [`MemoryRepository`] backs the CLI and the test suite.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Environment, RunFilter, RunPage, RunRecord, Spec};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Capabilities the engine consumes. Implementations must be safe for
/// concurrent flows; the engine itself performs one write at a time per flow.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_spec_by_id(&self, id: &str) -> Result<Spec, RepositoryError>;

    async fn get_environment(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Environment, RepositoryError>;

    /// Persists a run record and returns its assigned identifier.
    async fn create_run(&self, record: RunRecord) -> Result<String, RepositoryError>;

    async fn list_runs(&self, filter: RunFilter) -> Result<RunPage, RepositoryError>;
}

/// In-memory repository used by the CLI shell and tests.
#[derive(Default)]
pub struct MemoryRepository {
    specs: Mutex<HashMap<String, Spec>>,
    environments: Mutex<Vec<Environment>>,
    runs: Mutex<Vec<(String, RunRecord)>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_spec(&self, id: impl Into<String>, spec: Spec) {
        self.specs.lock().expect("specs lock").insert(id.into(), spec);
    }

    pub fn insert_environment(&self, env: Environment) {
        self.environments.lock().expect("environments lock").push(env);
    }

    fn lock_runs(&self) -> std::sync::MutexGuard<'_, Vec<(String, RunRecord)>> {
        self.runs.lock().expect("runs lock")
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_spec_by_id(&self, id: &str) -> Result<Spec, RepositoryError> {
        self.specs
            .lock()
            .expect("specs lock")
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                kind: "spec",
                id: id.to_string(),
            })
    }

    async fn get_environment(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Environment, RepositoryError> {
        self.environments
            .lock()
            .expect("environments lock")
            .iter()
            .find(|e| e.project_id == project_id && e.name == name)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                kind: "environment",
                id: format!("{project_id}/{name}"),
            })
    }

    async fn create_run(&self, record: RunRecord) -> Result<String, RepositoryError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock_runs().push((id.clone(), record));
        Ok(id)
    }

    async fn list_runs(&self, filter: RunFilter) -> Result<RunPage, RepositoryError> {
        let runs = self.lock_runs();
        let matching: Vec<(String, RunRecord)> = runs
            .iter()
            .filter(|(_, record)| match (&filter.flow_id, record) {
                (None, _) => true,
                (Some(wanted), RunRecord::Flow(flow)) => &flow.flow_id == wanted,
                (Some(_), RunRecord::Step(_)) => false,
            })
            .cloned()
            .collect();

        let total = matching.len();
        let records = matching
            .into_iter()
            .skip(filter.offset)
            .take(if filter.limit == 0 {
                usize::MAX
            } else {
                filter.limit
            })
            .collect();

        Ok(RunPage { records, total })
    }
}
