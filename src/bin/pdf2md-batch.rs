//! CLI binary for edgequake-batch.
//!
//! A thin shim over the library crate: subcommands map onto
//! [`Orchestrator`] calls and results are printed to stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_batch::{
    processor_for, BatchConfig, CancellationToken, Orchestrator, RunOptions, RunProgressCallback,
    RunReport, TaskKind, TaskStatus, TaskSummary, ValueMap,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress bar ─────────────────────────────────────────────────────────────

/// Renders run events as a progress bar with one log line per item.
struct CliProgress {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} items  \
             ⏱ {elapsed_precise}  ETA {eta_precise}\n  {wide_msg:.dim}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Running");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl RunProgressCallback for CliProgress {
    fn on_run_start(&self, task_id: &str, total_items: usize, already_done: usize) {
        self.bar.set_length(total_items as u64);
        self.bar.set_position(0);
        self.bar.println(format!(
            "{} {}{}",
            cyan("◆"),
            bold(&format!("Task {task_id}: {total_items} items")),
            if already_done > 0 {
                dim(&format!("  ({already_done} already completed)"))
            } else {
                String::new()
            }
        ));
        self.bar.reset_eta();
    }

    fn on_item_start(&self, reference: &str, _index: usize, _total: usize) {
        self.bar.set_message(reference.to_string());
    }

    fn on_item_complete(&self, reference: &str, index: usize, total: usize) {
        self.bar.println(format!(
            "  {} {:>4}/{:<4}  {}",
            green("✓"),
            index,
            total,
            dim(reference)
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, reference: &str, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>4}/{:<4}  {}  {}",
            red("✗"),
            index,
            total,
            reference,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_item_skipped(&self, _reference: &str, _index: usize, _total: usize) {
        self.bar.inc(1);
    }

    fn on_run_complete(&self, report: &RunReport) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {}  {}/{} completed, {} failed",
            match report.status {
                TaskStatus::Completed if report.failed_count == 0 => green("✔"),
                TaskStatus::Completed => cyan("⚠"),
                _ => red("✘"),
            },
            bold(report.status.as_str()),
            report.processed_count,
            report.total_items,
            if report.failed_count > 0 {
                red(&report.failed_count.to_string())
            } else {
                report.failed_count.to_string()
            }
        );
        if failed > 0 {
            eprintln!(
                "{}",
                dim(&format!(
                    "  run `pdf2md-batch status --task-id {}` for the failure list",
                    report.task_id
                ))
            );
        }
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render every PDF under ./pdfs into page images under ./images
  pdf2md-batch create document-to-images --input pdfs --output images
  pdf2md-batch run --task-id <ID>

  # Transcribe the page images with a specific model
  pdf2md-batch create images-to-text --input images --output markdowns \
      --set model=gpt-4.1-mini --set provider=openai

  # Both stages in one task
  pdf2md-batch create full-pipeline --input pdfs --output markdowns --set dpi=150

  # Inspect, reprocess from scratch, cancel
  pdf2md-batch list --kind full-pipeline
  pdf2md-batch status --task-id <ID>
  pdf2md-batch run --task-id <ID> --no-resume
  pdf2md-batch cancel --task-id <ID>

INTERRUPTING:
  Ctrl-C once pauses the task after the item in progress; `run` resumes it.
  Ctrl-C twice exits immediately; the interrupted item is redone on resume.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Provider used when none is configured
  EDGEQUAKE_MODEL         Model used when none is configured
  PDFIUM_LIB_PATH         Directory containing libpdfium
"#;

/// Resumable batch conversion of PDFs to page images and Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md-batch",
    version,
    about = "Resumable batch conversion of PDFs to page images and Markdown",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file.
    #[arg(long, global = true, env = "PDF2MD_BATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding task records (overrides the config file).
    #[arg(long, global = true, env = "PDF2MD_BATCH_TASKS_DIR")]
    tasks_dir: Option<PathBuf>,

    /// Directory containing the pdfium shared library.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan an input tree and create a task.
    Create {
        /// document-to-images, images-to-text or full-pipeline.
        #[arg(value_parser = parse_kind)]
        kind: TaskKind,

        /// Input root directory.
        #[arg(long)]
        input: PathBuf,

        /// Output root directory.
        #[arg(long)]
        output: PathBuf,

        /// Per-task override KEY=VALUE (dpi, quality, image_format, model,
        /// provider, temperature, max_tokens, max_retries, staging_dir).
        #[arg(long = "set", value_parser = parse_override)]
        overrides: Vec<(String, Value)>,
    },

    /// Run or resume a task.
    Run {
        #[arg(long)]
        task_id: String,

        /// Reprocess items that already completed.
        #[arg(long)]
        no_resume: bool,

        /// Disable the progress bar.
        #[arg(long)]
        no_progress: bool,
    },

    /// List tasks, newest first.
    List {
        /// Only tasks of this kind.
        #[arg(long, value_parser = parse_kind)]
        kind: Option<TaskKind>,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show a task's status and failed items.
    Status {
        #[arg(long)]
        task_id: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Cancel a task.
    Cancel {
        #[arg(long)]
        task_id: String,
    },
}

fn parse_kind(s: &str) -> Result<TaskKind, String> {
    serde_json::from_value(Value::String(s.to_string())).map_err(|_| {
        format!(
            "unknown task kind '{s}'; expected one of: {}",
            TaskKind::ALL.map(|k| k.as_str()).join(", ")
        )
    })
}

/// `KEY=VALUE`; the value is parsed as JSON when possible, else taken as a
/// string (`dpi=150` is a number, `model=gpt-4.1` a string).
fn parse_override(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // The progress bar already reports every item; keep INFO logs out of its way.
    let bar_active = matches!(cli.command, Command::Run { no_progress: false, .. }) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || bar_active {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = load_config(&cli)?;
    let orchestrator = Orchestrator::new(config);

    match cli.command {
        Command::Create {
            kind,
            input,
            output,
            overrides,
        } => {
            let overrides: ValueMap = overrides.into_iter().collect();
            let task_id = orchestrator
                .create_task(kind, &input, &output, overrides)
                .await
                .context("Failed to create task")?;
            let summary = orchestrator.get_status(&task_id).await?;
            if !cli.quiet {
                eprintln!(
                    "{} Created {} task with {} items",
                    green("✔"),
                    kind,
                    summary.total_items
                );
                eprintln!("{}", dim(&format!("  pdf2md-batch run --task-id {task_id}")));
            }
            println!("{task_id}");
            Ok(ExitCode::SUCCESS)
        }

        Command::Run {
            task_id,
            no_resume,
            no_progress,
        } => {
            let record = orchestrator.load_task(&task_id).await?;
            let task_config = orchestrator.task_config(&task_id).await?;
            let processor = processor_for(record.kind, &task_config)
                .context("Failed to set up the item processor")?;

            let interrupt = CancellationToken::new();
            spawn_ctrl_c_handler(interrupt.clone(), cli.quiet);

            let mut options = RunOptions::default()
                .resume(!no_resume)
                .interrupt(interrupt);
            if !cli.quiet && !no_progress {
                options = options.progress(CliProgress::new());
            }

            let report = orchestrator
                .run_task(&task_id, processor.as_ref(), options)
                .await
                .with_context(|| format!("Task {task_id} failed"))?;

            if cli.quiet || no_progress {
                println!(
                    "{} {}/{} completed, {} failed",
                    report.status, report.processed_count, report.total_items, report.failed_count
                );
            }
            if report.status == TaskStatus::Paused && !cli.quiet {
                eprintln!(
                    "{}",
                    dim(&format!("  resume with: pdf2md-batch run --task-id {task_id}"))
                );
            }
            Ok(if report.status == TaskStatus::Completed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }

        Command::List { kind, json } => {
            let tasks = orchestrator.list_tasks(kind).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                eprintln!("No tasks found in {}", orchestrator.store().dir().display());
            } else {
                for t in &tasks {
                    print_summary_line(t);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Status { task_id, json } => {
            let summary = orchestrator.get_status(&task_id).await?;
            let failed = orchestrator.failed_items(&task_id).await?;
            if json {
                let doc = serde_json::json!({ "task": summary, "failed_items": failed });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                print_status(&summary);
                if !failed.is_empty() {
                    println!("  {}:", bold("Failed items"));
                    for item in &failed {
                        println!(
                            "    {} {}  {}",
                            red("✗"),
                            item.reference,
                            dim(item.error_message.as_deref().unwrap_or(""))
                        );
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Cancel { task_id } => {
            let summary = orchestrator.cancel_task(&task_id).await?;
            if !cli.quiet {
                eprintln!(
                    "{} Task {} cancelled ({}/{} completed)",
                    green("✔"),
                    summary.task_id,
                    summary.processed_count,
                    summary.total_items
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(cli: &Cli) -> Result<BatchConfig> {
    let mut config = match &cli.config {
        Some(path) => BatchConfig::from_toml_file(path)?,
        None => BatchConfig::default(),
    };
    if let Some(dir) = &cli.tasks_dir {
        config.tasks_dir = dir.clone();
    }
    if let Some(lib) = &cli.pdfium_lib_path {
        config.render.pdfium_lib_path = Some(lib.clone());
    }
    config.validate()?;
    Ok(config)
}

/// First Ctrl-C pauses after the current item; the second exits at once.
fn spawn_ctrl_c_handler(interrupt: CancellationToken, quiet: bool) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        if !quiet {
            eprintln!(
                "\n{} pausing after the current item (Ctrl-C again to exit now)",
                cyan("◆")
            );
        }
        interrupt.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} aborted", red("✘"));
            std::process::exit(130);
        }
    });
}

fn print_summary_line(t: &TaskSummary) {
    println!(
        "{}  {:<18}  {:<9}  {:>5}/{:<5} {:>5.1}%  {}",
        t.task_id,
        t.kind.as_str(),
        t.status.as_str(),
        t.processed_count,
        t.total_items,
        t.progress * 100.0,
        dim(&t.created_time.format("%Y-%m-%d %H:%M:%S").to_string())
    );
}

fn print_status(t: &TaskSummary) {
    println!("{}", bold(&format!("Task {}", t.task_id)));
    println!("  Kind:      {}", t.kind);
    println!("  Status:    {}", t.status);
    println!(
        "  Progress:  {}/{} ({:.1}%)",
        t.processed_count,
        t.total_items,
        t.progress * 100.0
    );
    println!("  Failed:    {}", t.failed_count);
    println!("  Created:   {}", t.created_time.to_rfc3339());
    if let Some(start) = t.start_time {
        println!("  Started:   {}", start.to_rfc3339());
    }
    if let Some(end) = t.end_time {
        println!("  Ended:     {}", end.to_rfc3339());
    }
}
