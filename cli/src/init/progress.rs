use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::init::error::InitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    UrlCollection,
    ConnectivityTest,
    CredentialCollection,
    Authentication,
    PatGeneration,
    ConfigWrite,
    ConfigValidation,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::UrlCollection,
        Step::ConnectivityTest,
        Step::CredentialCollection,
        Step::Authentication,
        Step::PatGeneration,
        Step::ConfigWrite,
        Step::ConfigValidation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::UrlCollection => "url_collection",
            Step::ConnectivityTest => "connectivity_test",
            Step::CredentialCollection => "credential_collection",
            Step::Authentication => "authentication",
            Step::PatGeneration => "pat_generation",
            Step::ConfigWrite => "config_write",
            Step::ConfigValidation => "config_validation",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::UrlCollection => "Backend URL",
            Step::ConnectivityTest => "Testing connectivity",
            Step::CredentialCollection => "Credentials",
            Step::Authentication => "Authenticating",
            Step::PatGeneration => "Creating personal access token",
            Step::ConfigWrite => "Writing configuration",
            Step::ConfigValidation => "Validating configuration",
        }
    }

    /// Steps that wait on the backend get a spinner. Steps that read from the
    /// terminal or touch local files do not.
    pub fn waits_on_network(self) -> bool {
        matches!(
            self,
            Step::ConnectivityTest
                | Step::Authentication
                | Step::PatGeneration
                | Step::ConfigValidation
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: Step,
    pub status: StepStatus,
    pub attempts: u32,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub error: Option<String>,
}

impl StepRecord {
    fn new(step: Step) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            (Some(start), None) => Some(start.elapsed()),
            _ => None,
        }
    }
}

/// Shared handle to whichever spinner is currently on screen.
#[derive(Clone, Default)]
pub struct SpinnerSlot(Arc<Mutex<Option<ProgressBar>>>);

impl SpinnerSlot {
    /// Run `f` with the spinner hidden, e.g. around a terminal prompt.
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        match self.current() {
            Some(spinner) => spinner.suspend(f),
            None => f(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<ProgressBar> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn replace(&self, spinner: Option<ProgressBar>) -> Option<ProgressBar> {
        std::mem::replace(
            &mut *self.0.lock().unwrap_or_else(PoisonError::into_inner),
            spinner,
        )
    }
}

/// Per-step status, timings and errors, with a spinner on stderr while a
/// network step is running.
pub struct ProgressTracker {
    records: Vec<StepRecord>,
    spinner: SpinnerSlot,
    interactive: bool,
}

impl ProgressTracker {
    /// `interactive` enables the spinner and retry notices. Even then the
    /// spinner stays hidden when stderr is not a terminal.
    pub fn new(interactive: bool) -> Self {
        Self {
            records: Step::ALL.iter().copied().map(StepRecord::new).collect(),
            spinner: SpinnerSlot::default(),
            interactive,
        }
    }

    pub fn record(&self, step: Step) -> &StepRecord {
        // Every step gets a record at construction.
        &self.records[step as usize]
    }

    pub fn status(&self, step: Step) -> StepStatus {
        self.record(step).status
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn spinner(&self) -> SpinnerSlot {
        self.spinner.clone()
    }

    fn record_mut(&mut self, step: Step) -> &mut StepRecord {
        &mut self.records[step as usize]
    }

    /// Pending → InProgress for attempt `attempt`.
    pub fn begin(&mut self, step: Step, attempt: u32) {
        let record = self.record_mut(step);
        record.status = StepStatus::InProgress;
        record.attempts = attempt;
        record.started_at.get_or_insert_with(Instant::now);
        record.finished_at = None;
        self.start_spinner(step);
    }

    pub fn complete(&mut self, step: Step) {
        self.stop_spinner();
        let record = self.record_mut(step);
        record.status = StepStatus::Completed;
        record.finished_at = Some(Instant::now());
        record.error = None;
        if self.interactive {
            eprintln!("{} {}", style("✓").green(), step.label());
        }
    }

    /// Failed attempt that will be retried: back to Pending.
    pub fn retry(&mut self, step: Step, err: &InitError, max_attempts: u32, delay: Duration) {
        self.stop_spinner();
        let record = self.record_mut(step);
        record.status = StepStatus::Pending;
        record.error = Some(err.message.clone());
        let attempt = record.attempts;
        if self.interactive {
            eprintln!(
                "{} {} failed: {} (attempt {attempt}/{max_attempts}, retrying in {}s)",
                style("!").yellow(),
                step.label(),
                err.message,
                delay.as_secs()
            );
        }
    }

    pub fn fail(&mut self, step: Step, err: &InitError) {
        self.stop_spinner();
        let record = self.record_mut(step);
        record.status = StepStatus::Failed;
        record.finished_at = Some(Instant::now());
        record.error = Some(err.message.clone());
    }

    /// One line per step that was reached.
    pub fn summary(&self) -> String {
        let mut out = String::from("Step summary:");
        for record in self.records.iter().filter(|r| r.attempts > 0) {
            let status = match record.status {
                StepStatus::Completed => "ok",
                StepStatus::Failed => "failed",
                StepStatus::InProgress => "in progress",
                StepStatus::Pending => "pending",
            };
            let elapsed = record
                .elapsed()
                .map(|d| format!("{:.1}s", d.as_secs_f64()))
                .unwrap_or_default();
            let _ = write!(
                out,
                "\n  {:<24} {:<12} attempts={} {elapsed}",
                record.step.name(),
                status,
                record.attempts
            );
            if let Some(error) = &record.error {
                let _ = write!(out, "  ({error})");
            }
        }
        out
    }

    fn start_spinner(&mut self, step: Step) {
        self.stop_spinner();
        if !self.interactive || !step.waits_on_network() {
            return;
        }
        let spinner = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(spinner_style);
        }
        spinner.set_message(format!("{}...", step.label()));
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner.replace(Some(spinner));
    }

    fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.replace(None) {
            spinner.finish_and_clear();
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop_spinner();
    }
}
