//! lambdaspawn - run Lambda-style handlers in supervised worker processes
//!
//! `lambdaspawn invoke` spawns a worker (this same binary, `worker`
//! subcommand), initializes it with a handler from the built-in registry,
//! sends one event and prints the outcome as JSON.

mod config;
mod demos;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lambdaspawn_core::ErrorPayload;
use lambdaspawn_runtime::{
    spawn, InvocationContext, SpawnOptions, StdioMode, Worker, WorkerError, WorkerProcess,
};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long a finished one-shot worker gets to exit on its own
const EXIT_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "lambdaspawn")]
#[command(about = "Run Lambda-style handlers in supervised worker processes", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LAMBDASPAWN_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Spawn a worker, invoke its handler once and print the outcome
    Invoke(InvokeArgs),

    /// Serve the invocation protocol (spawned by `invoke`)
    Worker,
}

#[derive(clap::Args, Debug)]
struct InvokeArgs {
    /// Working directory of the worker
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Directory holding the handler module (defaults to --dir)
    #[arg(long)]
    module_dir: Option<PathBuf>,

    /// Handler as <module>.<export>
    #[arg(long)]
    handler: Option<String>,

    #[arg(long)]
    region: Option<String>,

    /// Process identifier, e.g. a function ARN
    #[arg(long)]
    identifier: Option<String>,

    /// Event as JSON
    #[arg(long, default_value = "{}")]
    event: String,

    /// Context as JSON; a default context is generated when omitted
    #[arg(long)]
    context: Option<String>,

    /// Extra environment for the worker, as KEY=VALUE
    #[arg(long = "env", value_parser = parse_key_val)]
    env: Vec<(String, String)>,

    /// Appended to the worker's NODE_PATH
    #[arg(long)]
    additional_node_path: Option<String>,

    /// Worker stdout: inherit, pipe or ignore
    #[arg(long)]
    stdout: Option<String>,

    /// Worker stderr: inherit, pipe or ignore
    #[arg(long)]
    stderr: Option<String>,

    /// Kill the worker if the invocation takes longer
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Configuration file (defaults to ./lambdaspawn.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn parse_stdio(name: &str, value: &str) -> anyhow::Result<StdioMode> {
    StdioMode::from_str(value)
        .with_context(|| format!("invalid --{} mode '{}' (inherit, pipe or ignore)", name, value))
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    match args.command {
        Commands::Invoke(invoke_args) => {
            let config = config::Config::load(invoke_args.config.as_deref())?;
            let log_level = args.log_level.unwrap_or_else(|| config.log_level.clone());
            init_tracing(&log_level);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(invoke(invoke_args, config, log_level))
        }
        Commands::Worker => {
            init_tracing(args.log_level.as_deref().unwrap_or("info"));

            // One worker serves one handler; a single thread is enough
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            Ok(run_worker(&runtime))
        }
    }
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("lambdaspawn={0},lambdaspawn_runtime={0}", log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_worker(runtime: &tokio::runtime::Runtime) -> ExitCode {
    let worker = Worker::new(demos::registry());

    match runtime.block_on(worker.run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(WorkerError::MissingChannel) => {
            error!("IPC channel not exists.");
            ExitCode::from(1)
        }
        Err(e) => {
            error!(error = %e, "Lambda process failed");
            ExitCode::from(1)
        }
    }
}

async fn invoke(
    args: InvokeArgs,
    config: config::Config,
    log_level: String,
) -> anyhow::Result<ExitCode> {
    let exe = std::env::current_exe().context("cannot locate the lambdaspawn executable")?;

    let mut options = SpawnOptions::new(exe);
    options.args = vec!["worker".to_string()];
    if let Some(dir) = args.dir {
        options.dir = dir;
    }
    options.module_dir = args.module_dir;
    options.handler = args.handler.unwrap_or_else(|| config.handler.clone());
    options.region = args.region.or_else(|| config.region.clone()).or(options.region);
    options.identifier = args.identifier;
    options.additional_search_path = args.additional_node_path;
    options.lambda_env = args
        .env
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect();
    options
        .lambda_env
        .entry("LAMBDASPAWN_LOG_LEVEL".into())
        .or_insert_with(|| log_level.into());
    options.stdio.stdout = parse_stdio("stdout", args.stdout.as_deref().unwrap_or(&config.stdout))?;
    options.stdio.stderr = parse_stdio("stderr", args.stderr.as_deref().unwrap_or(&config.stderr))?;

    let event: Value = serde_json::from_str(&args.event).context("--event is not valid JSON")?;
    let timeout = Duration::from_millis(args.timeout_ms.unwrap_or(config.timeout_ms));
    let context = match args.context {
        Some(raw) => serde_json::from_str(&raw).context("--context is not valid JSON")?,
        None => {
            let function_name = options
                .identifier
                .as_deref()
                .and_then(|arn| arn.rsplit(':').next())
                .unwrap_or(&config.function_name);
            InvocationContext::new(function_name, options.identifier.as_deref(), timeout).to_value()
        }
    };

    let mut worker = match spawn(options) {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %e, "Failed to spawn lambda process");
            print_output(Err(e.to_payload()), Map::new())?;
            return Ok(ExitCode::from(1));
        }
    };

    let stdout = worker.stdout.take().map(capture);
    let stderr = worker.stderr.take().map(capture);

    let outcome = call_with_timeout(&worker, event, context, timeout).await;

    if tokio::time::timeout(EXIT_GRACE, worker.exited()).await.is_err() {
        debug!(pid = ?worker.pid(), "Lambda process still running, killing it");
    }
    drop(worker);

    let mut streams = Map::new();
    for (name, capture) in [("stdout", stdout), ("stderr", stderr)] {
        if let Some(capture) = capture {
            let output = capture.await.unwrap_or_default();
            streams.insert(name.to_string(), Value::String(output));
        }
    }

    let failed = outcome.is_err();
    print_output(outcome, streams)?;
    Ok(if failed { ExitCode::from(1) } else { ExitCode::SUCCESS })
}

async fn call_with_timeout(
    worker: &WorkerProcess,
    event: Value,
    context: Value,
    timeout: Duration,
) -> Result<Value, ErrorPayload> {
    let call = worker.call(event, context);
    tokio::pin!(call);

    tokio::select! {
        outcome = &mut call => outcome,
        () = tokio::time::sleep(timeout) => {
            warn!(pid = ?worker.pid(), timeout_ms = timeout.as_millis() as u64, "Invocation timed out, killing lambda process");
            worker.kill();
            call.await
        }
    }
}

/// Collect a piped worker stream until it closes
fn capture(mut stream: impl AsyncRead + Send + Unpin + 'static) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = stream.read_to_end(&mut buf).await {
            debug!(error = %e, "Failed to read lambda process output");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn print_output(outcome: Result<Value, ErrorPayload>, streams: Map<String, Value>) -> anyhow::Result<()> {
    let mut output = match outcome {
        Ok(result) => json!({ "result": result }),
        Err(err) => json!({ "error": err }),
    };
    if let Some(object) = output.as_object_mut() {
        object.extend(streams);
    }
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}
