//! Terminal UI — spinners, stage lines, and captured command output.
//!
//! While a stage runs the operator sees a spinner and its label.  Tool output
//! (tar, apt-clone, 7z, …) is captured and only replayed if the stage fails;
//! with `--verbose` it also goes to the debug log on success.

use std::{
    process::{Command, Stdio},
    time::Duration,
};

use anyhow::{Context, Result};
use console::{StyledObject, style};
use indicatif::{ProgressBar, ProgressStyle};

use crate::cleanup::CHILDREN;

/// Braille spinner frames, as indicatif draws them by default.
static SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

// ─── Stage result ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Done,
    Failed,
    /// Switched off by a flag.
    Skipped,
}

impl Status {
    fn icon(self) -> StyledObject<&'static str> {
        match self {
            Self::Done => style("✓").green().bold(),
            Self::Failed => style("✗").red().bold(),
            Self::Skipped => style("–").dim(),
        }
    }
}

/// What one stage did, plus any output worth replaying.
#[derive(Debug)]
pub struct StageOutcome {
    pub label: String,
    pub status: Status,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl StageOutcome {
    fn new(label: &str, status: Status) -> Self {
        Self {
            label: label.to_string(),
            status,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        }
    }

    /// Outcome of an in-process stage.  `Ok(msg)` is kept as stdout.
    pub fn from_result(label: &str, result: Result<String>) -> Self {
        match result {
            Ok(msg) => Self {
                stdout: msg,
                ..Self::new(label, Status::Done)
            },
            Err(e) => Self {
                error: Some(format!("{e:#}")),
                ..Self::new(label, Status::Failed)
            },
        }
    }

    pub fn failed(&self) -> bool {
        self.status == Status::Failed
    }

    /// One line per stage on stdout; on failure the error and any captured
    /// output follow on stderr.
    pub fn print(&self) {
        let label = match self.status {
            Status::Skipped => style(self.label.as_str()).dim(),
            _ => style(self.label.as_str()).bold(),
        };
        println!("  {}  {label}", self.status.icon());

        if !self.failed() {
            if !self.stdout.trim().is_empty() {
                tracing::debug!("{}: {}", self.label, self.stdout.trim());
            }
            return;
        }

        if let Some(msg) = &self.error {
            eprintln!();
            eprintln!("  {} {msg}", style("Error:").red().bold());
        }
        for (name, text) in [("stdout", &self.stdout), ("stderr", &self.stderr)] {
            if text.is_empty() {
                continue;
            }
            eprintln!();
            eprintln!("  {} {name}:", style("►").dim());
            for line in text.lines() {
                eprintln!("    {line}");
            }
        }
    }
}

// ─── Execution ────────────────────────────────────────────────────────────────

fn spinner(label: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(st) = ProgressStyle::with_template("  {spinner:.cyan}  {msg}") {
        pb.set_style(st.tick_chars(SPINNER_CHARS));
    }
    pb.set_message(style(label).dim().to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Run `args[0]` with the remaining arguments, stdin closed.
///
/// Returns `(exited_zero, stdout, stderr)`; `Err` only if it could not be
/// spawned.
pub fn run_captured(args: &[String]) -> Result<(bool, String, String)> {
    let (prog, rest) = args.split_first().context("cannot run an empty command")?;
    tracing::debug!("running: {}", args.join(" "));

    let output = CHILDREN
        .output(Command::new(prog).args(rest).stdin(Stdio::null()))
        .with_context(|| format!("failed to spawn: {}", args.join(" ")))?;

    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Run an external tool behind a spinner.
pub fn run_stage(label: &str, args: &[String]) -> StageOutcome {
    let pb = spinner(label);
    let result = run_captured(args);
    pb.finish_and_clear();

    match result {
        Ok((ok, stdout, stderr)) => StageOutcome {
            stdout,
            stderr,
            error: (!ok).then(|| format!("command exited non-zero: {}", args.join(" "))),
            ..StageOutcome::new(label, if ok { Status::Done } else { Status::Failed })
        },
        Err(e) => StageOutcome::from_result(label, Err(e)),
    }
}

/// Run an in-process step behind a spinner.
pub fn run_task(label: &str, task: impl FnOnce() -> Result<String>) -> StageOutcome {
    let pb = spinner(label);
    let result = task();
    pb.finish_and_clear();
    StageOutcome::from_result(label, result)
}

/// Print `outcome` and append it to `outcomes`.  Returns `true` if it failed.
pub fn record(outcomes: &mut Vec<StageOutcome>, outcome: StageOutcome) -> bool {
    outcome.print();
    let failed = outcome.failed();
    outcomes.push(outcome);
    failed
}

/// A stage switched off by a flag.  Not a failure.
pub fn skipped_stage(label: &str) -> StageOutcome {
    StageOutcome::new(label, Status::Skipped)
}

// ─── Summary ──────────────────────────────────────────────────────────────────

/// Labels of the stages that failed, in run order.
pub fn failed_labels(outcomes: &[StageOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .filter(|o| o.failed())
        .map(|o| o.label.clone())
        .collect()
}

/// Closing banner for a flow (`what` is `"Backup"` or `"Restore"`).
pub fn print_summary(what: &str, outcomes: &[StageOutcome]) {
    let failed = failed_labels(outcomes);
    println!();
    if failed.is_empty() {
        println!(
            "  {} {}",
            style("✓").cyan().bold(),
            style(format!("{what} completed successfully.")).cyan().bold()
        );
    } else {
        eprintln!(
            "  {}  {}",
            Status::Failed.icon(),
            style(format!("{what} failed.")).red().bold()
        );
        for label in &failed {
            eprintln!("    {} {}", Status::Failed.icon(), style(label).red());
        }
    }
    println!();
}

// ─── Tests ────────────────────────────────────────────────────────────────────
