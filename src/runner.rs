use std::io::Write;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::archive;
use crate::backend::{AggregationBackend, AggregationQuery, BackendError};
use crate::params::{CommandParams, QueryParams};
use crate::report::{ReportError, ReportFormatter};
use crate::utils::format_number;
use crate::validate::{InputValidator, ValidationError};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("no aggregation backend is configured: {0}")]
    NoBackend(String),
}

/// How a single invocation ended.
#[derive(Debug)]
pub enum RunOutcome {
    Reported { rows: usize },
    Listed { files: usize },
    Rejected(ValidationError),
    Failed(RunError),
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Reported { .. } | RunOutcome::Listed { .. } => 0,
            RunOutcome::Failed(RunError::NoBackend(_)) => 2,
            RunOutcome::Rejected(_) | RunOutcome::Failed(_) => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run the aggregation query and render the ranked rows.
    Query,
    /// Print the archive dump files covering the range instead of querying.
    ArchiveUrls,
}

pub struct CommandRunner<'a> {
    validator: InputValidator<'a>,
    /// The backend, or why none could be built. Only consulted once the
    /// input has been validated.
    backend: Result<&'a dyn AggregationBackend, String>,
    report: ReportFormatter,
    mode: Mode,
}

impl<'a> CommandRunner<'a> {
    pub fn new(validator: InputValidator<'a>, report: ReportFormatter) -> Self {
        Self {
            validator,
            backend: Err("no backend was supplied".to_string()),
            report,
            mode: Mode::Query,
        }
    }

    pub fn with_backend(mut self, backend: &'a dyn AggregationBackend) -> Self {
        self.backend = Ok(backend);
        self
    }

    pub fn with_backend_unavailable(mut self, reason: impl Into<String>) -> Self {
        self.backend = Err(reason.into());
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Validate, then query and report. Never retries; the first failure
    /// ends the run.
    pub fn run(&self, params: &CommandParams, out: &mut dyn Write) -> RunOutcome {
        let start_time = Instant::now();
        debug!(component = "runner", action = "start", after = %params.after, before = %params.before, "Arguments received");
        debug!(
            component = "runner",
            action = "start",
            event_name = %params.event_name,
            output_count = %params.output_count,
            verbosity = %params.verbosity,
            "Arguments received"
        );

        let query = match self.validator.validate(params) {
            Ok(query) => query,
            Err(e) => {
                info!(component = "runner", action = "reject", reason = %e, "Exiting script");
                return RunOutcome::Rejected(e);
            }
        };
        debug!(component = "runner", action = "validate", "Arguments are valid and initialized");

        let outcome = match self.mode {
            Mode::Query => self.execute(&query, out),
            Mode::ArchiveUrls => self.list_archives(&query, out),
        };

        match &outcome {
            RunOutcome::Failed(e) => {
                error!(component = "runner", action = "fail", error = %e, "Exiting script with errors");
            }
            _ => debug!(
                component = "runner",
                action = "complete",
                duration_ms = start_time.elapsed().as_millis(),
                "Run completed"
            ),
        }
        outcome
    }

    fn execute(&self, query: &QueryParams, out: &mut dyn Write) -> RunOutcome {
        let backend = match &self.backend {
            Ok(backend) => *backend,
            Err(reason) => return RunOutcome::Failed(RunError::NoBackend(reason.clone())),
        };

        let aggregation = AggregationQuery::from(query);
        let rows = match backend.top_repositories(&aggregation) {
            Ok(rows) => rows,
            Err(e) => return RunOutcome::Failed(e.into()),
        };

        let total_events: u64 = rows.iter().map(|row| row.count).sum();
        debug!(
            component = "runner",
            action = "report",
            row_count = rows.len(),
            total_events = %format_number(total_events),
            target = ?self.report.target(),
            "Rendering results"
        );

        match self.report.render(&rows, out) {
            Ok(()) => RunOutcome::Reported { rows: rows.len() },
            Err(e) => RunOutcome::Failed(e.into()),
        }
    }

    fn list_archives(&self, query: &QueryParams, out: &mut dyn Write) -> RunOutcome {
        let urls = archive::archive_urls(query.after, query.before);
        debug!(component = "runner", action = "archive", file_count = urls.len(), "Listing archive files");

        for url in &urls {
            if let Err(e) = writeln!(out, "{}", url) {
                return RunOutcome::Failed(RunError::Report(e.into()));
            }
        }
        RunOutcome::Listed { files: urls.len() }
    }
}
