//! The `kest` CLI: the small shell the execution engine is embedded in.
//!
//! ```bash
//! kest run flow.md --env staging --var user=admin --strict
//! kest chain flow.md
//! ```
//!
//! Exit codes: 0 success, 1 assertion failure, 2 runtime/network error,
//! 3 configuration or usage error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use kest::errors::exit;
use kest::model::Environment;
use kest::repository::{MemoryRepository, Repository};
use kest::runner::{RunOptions, Runner};
use kest::{parser, scheduler, telemetry};

/// Environments available to `--env`, read from `kest.environments.json` in
/// the working directory.
const ENVIRONMENTS_FILE: &str = "kest.environments.json";

#[derive(Parser)]
#[command(name = "kest")]
#[command(about = "Kest API test runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow document.
    Run {
        /// Path to the flow markdown file.
        file: PathBuf,

        /// Variable override, highest-priority scope. Repeatable: --var k=v
        #[arg(long = "var", short = 'V', value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Named environment from kest.environments.json.
        #[arg(long)]
        env: Option<String>,

        /// Fail a step on unresolved placeholders before sending anything.
        #[arg(long, default_value = "false")]
        strict: bool,

        /// Stop the flow at the first non-pass step.
        #[arg(long, default_value = "false")]
        fail_fast: bool,

        /// Log resolved variables before each request.
        #[arg(long, default_value = "false")]
        debug_vars: bool,

        /// Write the report JSON to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Verbose logging (DEBUG).
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,

        /// Only errors on stderr.
        #[arg(long, short = 's', default_value = "false")]
        silent: bool,
    },

    /// Print the step graph of a flow document without executing it.
    Chain {
        /// Path to the flow markdown file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            file,
            vars,
            env,
            strict,
            fail_fast,
            debug_vars,
            output,
            verbose,
            silent,
        } => {
            let level = if silent {
                Level::ERROR
            } else if verbose {
                Level::DEBUG
            } else {
                Level::INFO
            };
            telemetry::init_tracing(level);

            let options = RunOptions {
                strict,
                fail_fast,
                debug_vars,
            };
            match run(&file, &vars, env.as_deref(), options, output.as_deref()).await {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    exit::CONFIG_ERROR
                }
            }
        }
        Commands::Chain { file } => {
            telemetry::init_tracing(Level::WARN);
            match chain(&file) {
                Ok(()) => exit::OK,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    exit::CONFIG_ERROR
                }
            }
        }
    };

    std::process::exit(code);
}

async fn run(
    file: &Path,
    vars: &[String],
    env_name: Option<&str>,
    options: RunOptions,
    output: Option<&Path>,
) -> anyhow::Result<i32> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read flow file {}", file.display()))?;
    let doc = parser::parse_flow(&source);

    let overrides = parse_overrides(vars)?;

    let repo = Arc::new(MemoryRepository::new());
    let environment = match env_name {
        Some(name) => {
            let envs = load_environments(Path::new(ENVIRONMENTS_FILE))?;
            // The file may hold several projects; the name picks across all.
            let project_id = envs
                .iter()
                .find(|e| e.name == name)
                .map(|e| e.project_id.clone())
                .with_context(|| format!("environment '{name}' not found"))?;
            for env in envs {
                repo.insert_environment(env);
            }
            repo.get_environment(&project_id, name)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?
        }
        None => Environment::default(),
    };

    let runner = Runner::new(repo).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, aborting flow");
            signal_cancel.cancel();
        }
    });

    let result = runner
        .run_flow(&doc, &environment, overrides, options, cancel)
        .await;

    let report = serde_json::to_string_pretty(&result).context("failed to serialize report")?;
    match output {
        Some(path) => std::fs::write(path, report)
            .with_context(|| format!("failed to write report to {}", path.display()))?,
        None => println!("{report}"),
    }

    Ok(result.exit_code())
}

/// `chain` is read-only on the parser: it prints the static order, the
/// edges, and any warnings.
fn chain(file: &Path) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read flow file {}", file.display()))?;
    let doc = parser::parse_flow(&source);

    if !doc.meta.name.is_empty() || !doc.meta.id.is_empty() {
        println!("flow: {} ({})", doc.meta.name, doc.meta.id);
    }
    let (order, warnings) = scheduler::static_order(&doc);
    for (index, id) in order.iter().enumerate() {
        let name = doc.step(id).map(|s| s.name.as_str()).unwrap_or("");
        println!("{}. {} - {}", index + 1, id, name);
    }
    for edge in &doc.edges {
        let condition = match edge.on {
            kest::model::EdgeCondition::Success => "success",
            kest::model::EdgeCondition::Failure => "failure",
            kest::model::EdgeCondition::Always => "always",
        };
        println!("  {} --{}--> {}", edge.from, condition, edge.to);
    }
    for warning in doc.warnings.iter().chain(warnings.iter()) {
        println!("warning: {warning}");
    }
    Ok(())
}

/// Parses repeated `--var key=value` pairs. Values that read as JSON keep
/// their type; everything else is a string.
fn parse_overrides(pairs: &[String]) -> anyhow::Result<HashMap<String, Value>> {
    let mut overrides = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("--var '{pair}' is not KEY=VALUE"))?;
        let parsed = serde_json::from_str(value).unwrap_or(Value::String(value.to_string()));
        overrides.insert(key.trim().to_string(), parsed);
    }
    Ok(overrides)
}

#[derive(Deserialize)]
struct EnvironmentsFile {
    #[serde(default)]
    environments: Vec<Environment>,
}

fn load_environments(path: &Path) -> anyhow::Result<Vec<Environment>> {
    let raw = std::fs::read_to_string(path).with_context(|| {
        format!("--env requires {} in the working directory", path.display())
    })?;
    let file: EnvironmentsFile =
        serde_json::from_str(&raw).with_context(|| format!("invalid {}", path.display()))?;
    Ok(file.environments)
}
