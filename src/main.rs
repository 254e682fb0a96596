//! commitrace - race several models for a commit message
//!
//! CLI entry point: loads configuration, runs one interactive selection
//! session and prints the accepted message to stdout.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use commitrace::backend::process::ProcessBackend;
use commitrace::backend::scripted::ScriptedBackend;
use commitrace::backend::GenerationBackend;
use commitrace::cli::{render_result, render_view};
use commitrace::config::{AppConfig, ConfigOverrides};
use commitrace::generate::GenerationSettings;
use commitrace::log::{init_tracing, JsonlLogger};
use commitrace::selector::{SelectorResult, SelectorView};
use commitrace::session::{run_session, OperatorInput};

/// Models used by `--demo` when nothing else names any
const DEMO_MODELS: [&str; 3] = ["demo-fast", "demo-careful", "demo-terse"];

/// Race several models for commit message candidates
///
/// Reads the change description (usually a diff) from --input or stdin,
/// asks every configured model for a commit message at once, and lets you
/// pick, edit, or refine one as the candidates arrive.
#[derive(Parser, Debug)]
#[command(name = "commitrace", version, about)]
struct Cli {
    /// Path to a commitrace.toml configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read the input text from this file instead of stdin
    #[arg(long)]
    input: Option<PathBuf>,

    /// Model to race; repeat for more slots (overrides the config file)
    #[arg(long = "model")]
    models: Vec<String>,

    /// Show candidates while they stream in
    #[arg(long)]
    stream: bool,

    /// Directory for log files (.commitrace by default)
    #[arg(long, default_value = ".commitrace")]
    log_dir: PathBuf,

    /// Use the built-in scripted backend instead of spawning a program
    #[arg(long)]
    demo: bool,
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut overrides = ConfigOverrides {
        models: cli.models.clone(),
        streaming: cli.stream,
    };
    if cli.demo && cli.config.is_none() && overrides.models.is_empty() {
        overrides.models = DEMO_MODELS.iter().map(ToString::to_string).collect();
    }

    AppConfig::load(cli.config.as_deref(), &overrides).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load config from '{}'", path.display()),
        None => "Invalid configuration".to_string(),
    })
}

/// Read the input text. Returns it with a reader for operator lines.
fn read_input(cli: &Cli) -> Result<(String, Box<dyn BufRead + Send>)> {
    let (text, operator): (String, Box<dyn BufRead + Send>) = match &cli.input {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input file: {}", path.display()))?;
            (text, Box::new(BufReader::new(std::io::stdin())))
        }
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read input from stdin")?;
            let tty = File::open("/dev/tty")
                .context("Failed to open the terminal for commands (use --input to keep stdin)")?;
            (text, Box::new(BufReader::new(tty)))
        }
    };

    if text.trim().is_empty() {
        bail!("Input text is empty");
    }
    Ok((text, operator))
}

/// Forward operator lines from a blocking reader into the session.
fn spawn_line_reader(reader: Box<dyn BufRead + Send>, tx: mpsc::Sender<OperatorInput>) {
    std::thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(OperatorInput::Line(line)).is_err() {
                break;
            }
        }
    });
}

fn build_backend(cli: &Cli, config: &AppConfig) -> Arc<dyn GenerationBackend> {
    if cli.demo {
        Arc::new(ScriptedBackend::demo())
    } else {
        Arc::new(ProcessBackend::new(&config.backend))
    }
}

/// Render only views that differ from the last one shown
fn deduplicating_renderer() -> impl FnMut(&SelectorView) {
    let mut last: Option<SelectorView> = None;
    move |view: &SelectorView| {
        if last.as_ref() != Some(view) {
            render_view(view);
            last = Some(view.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let (input_text, operator) = read_input(&cli)?;
    let logger = JsonlLogger::new(&cli.log_dir).context("Failed to initialize JSONL logger")?;

    let settings = GenerationSettings::from_config(&config.generation)
        .with_allowed_models(config.backend.allowed_models.clone());
    let backend = build_backend(&cli, &config);

    let (tx, rx) = mpsc::channel(16);
    spawn_line_reader(operator, tx);

    let outcome = run_session(
        backend,
        &settings,
        &input_text,
        rx,
        deduplicating_renderer(),
    )
    .await
    .context("Session failed")?;

    render_result(&outcome.result);
    logger
        .append(&outcome.record)
        .context("Failed to write to JSONL log")?;

    match outcome.result {
        SelectorResult::Confirm(confirmation) => {
            println!("{}", confirmation.selected_text);
            Ok(())
        }
        SelectorResult::Abort(_) => std::process::exit(1),
    }
}
