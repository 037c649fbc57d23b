//! OpenCollection CLI

mod output;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use oc_config::{load_config, LogFormat, LoggingConfig, RunnerConfig};
use oc_core::{OpenCollection, VariableValue};
use oc_runner::{HttpTransport, RequestRunner, RunRequest};
use oc_scripting::{
    CollectionContext, HookKind, ScriptInvocationContext, ScriptRuntime, ScriptSource,
    TestResultCollector, VariableScope, VariableStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "oc")]
#[command(about = "Run OpenCollection requests and scripts", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "OC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format
    #[arg(long, global = true, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one request of a collection
    Run {
        /// Collection file (JSON or YAML)
        collection: PathBuf,

        /// Request name
        #[arg(short, long)]
        request: String,

        /// Environment name
        #[arg(short, long)]
        env: Option<String>,

        /// Runtime variable (repeatable)
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Runner configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a standalone script
    Eval {
        /// Script file
        script: PathBuf,

        /// Variables file (JSON or YAML object)
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Runtime variable (repeatable)
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Runner configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate a runner configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            collection,
            request,
            env,
            vars,
            config,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            init_tracing(&config.logging, cli.log_level.as_deref(), cli.log_format)?;

            let passed = run_request(&config, &collection, &request, env.as_deref(), vars, json)
                .await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Eval {
            script,
            env_file,
            vars,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            init_tracing(&config.logging, cli.log_level.as_deref(), cli.log_format)?;

            let passed = eval_script(&config, &script, env_file.as_deref(), vars).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Validate { config } => {
            init_tracing(&LoggingConfig::default(), cli.log_level.as_deref(), cli.log_format)?;

            match load_config(Some(&config)) {
                Ok(cfg) => {
                    println!("✓ Configuration is valid");
                    println!("  Script timeout: {:?}", cfg.scripting.timeout);
                    println!("  Memory limit: {} bytes", cfg.scripting.memory_limit);
                    println!("  Transport timeout: {:?}", cfg.transport.timeout);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("✗ Configuration validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("OpenCollection runner");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

async fn run_request(
    config: &RunnerConfig,
    path: &Path,
    request: &str,
    env: Option<&str>,
    vars: Vec<(String, String)>,
    json: bool,
) -> Result<bool> {
    let collection = load_collection(path)?;
    let item = collection
        .find_request(request)
        .ok_or_else(|| oc_core::Error::NotFound(request.to_string()))?;
    let environment = match env {
        Some(name) => Some(
            collection
                .environment(name)
                .ok_or_else(|| anyhow!("Environment not found: {name}"))?,
        ),
        None => None,
    };

    let runner = RequestRunner::new(config, Arc::new(HttpTransport::new()))
        .with_cwd(parent_dir(path));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let mut run = RunRequest::new(&collection, item).with_cancel(cancel);
    if let Some(environment) = environment {
        run = run.with_environment(environment);
    }
    for (name, value) in vars {
        run = run.with_runtime_variable(name, VariableValue::string(value));
    }

    let result = runner.run(run).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", output::render_run(request, &result));
    }
    Ok(result.passed())
}

async fn eval_script(
    config: &RunnerConfig,
    script: &Path,
    env_file: Option<&Path>,
    vars: Vec<(String, String)>,
) -> Result<bool> {
    let variables = VariableStore::new();
    if let Some(file) = env_file {
        variables.set_scope(VariableScope::Environment, load_variables(file)?);
    }
    for (name, value) in vars {
        variables
            .set_var(&name, VariableValue::string(value))
            .map_err(|e| anyhow!(e))?;
    }

    let results = TestResultCollector::new();
    let mut ctx = ScriptInvocationContext::new(HookKind::Standalone, variables, results.clone())
        .with_collection(CollectionContext {
            cwd: parent_dir(script),
            ..Default::default()
        });

    let outcome = ScriptRuntime::new(config.scripting.clone())
        .run_script(&ScriptSource::file(script), &mut ctx)
        .await;

    let tests = results.results();
    print!(
        "{}",
        output::render_eval(&outcome.console, &tests, outcome.error())
    );
    Ok(outcome.is_ok() && tests.iter().all(|t| t.error.is_none()))
}

fn load_collection(path: &Path) -> Result<OpenCollection> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read collection {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse collection {}", path.display()))
}

fn load_variables(path: &Path) -> Result<Vec<(String, VariableValue)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read variables {}", path.display()))?;
    let values: serde_json::Map<String, serde_json::Value> = serde_yaml::from_str(&content)
        .with_context(|| format!("Variables file {} must be an object", path.display()))?;
    Ok(values
        .into_iter()
        .map(|(name, value)| (name, VariableValue::from(value)))
        .collect())
}

fn parent_dir(path: &Path) -> String {
    path.canonicalize()
        .ok()
        .and_then(|p| p.parent().map(|d| d.display().to_string()))
        .unwrap_or_default()
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("invalid variable '{s}', expected NAME=VALUE"))
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{other}', expected text or json")),
    }
}

fn init_tracing(
    logging: &LoggingConfig,
    level: Option<&str>,
    format: Option<LogFormat>,
) -> Result<()> {
    let level = level.unwrap_or(&logging.level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow!("Invalid log level '{level}': {e}"))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format.unwrap_or(logging.format) {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("token=a=b").unwrap(),
            ("token".to_string(), "a=b".to_string())
        );
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "oc", "run", "pets.yaml", "--request", "list", "--env", "dev", "--var", "a=1",
            "--var", "b=2",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { request, env, vars, .. } => {
                assert_eq!(request, "list");
                assert_eq!(env.as_deref(), Some("dev"));
                assert_eq!(vars.len(), 2);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_load_collection_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
name: Pets
items:
  - type: http
    name: list
    method: GET
    url: "{{{{base}}}}/pets"
"#
        )
        .unwrap();

        let collection = load_collection(file.path()).unwrap();
        assert_eq!(collection.name, "Pets");
        assert!(collection.find_request("list").is_some());
    }

    #[test]
    fn test_load_variables() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"base": "http://localhost", "retries": 3}}"#).unwrap();

        let vars = load_variables(file.path()).unwrap();
        assert_eq!(
            vars,
            vec![
                ("base".to_string(), VariableValue::string("http://localhost")),
                ("retries".to_string(), VariableValue::from(serde_json::json!(3))),
            ]
        );
    }
}
