//! Kest test-execution engine.
//!
//! Parses flow documents, resolves variables across layered scopes, executes
//! ordered HTTP steps with captures and assertions, and produces per-step
//! traces for persistence and replay. The surrounding platform plugs in
//! through [`repository::Repository`] and drives execution through
//! [`runner::Runner`].

pub mod assertions;
pub mod config;
pub mod errors;
pub mod executor;
pub mod jsonpath;
pub mod model;
pub mod parser;
pub mod recorder;
pub mod render;
pub mod repository;
pub mod runner;
pub mod scheduler;
pub mod telemetry;
pub mod vars;

pub use errors::EngineError;
pub use model::{FlowDocument, FlowResult, StepRecord, StepStatus};
pub use runner::{RunOptions, Runner};
