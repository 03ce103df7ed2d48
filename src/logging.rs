use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

pub const DEBUG_MARKER: &str = "DEBUG:   ";

/// How chatty the diagnostic stream is.
///
/// `Log` admits only messages emitted at INFO or above; `Debug` admits
/// everything and prefixes each line with [`DEBUG_MARKER`]; `Silent` writes
/// nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Debug,
    Log,
    Silent,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid verbosity mode '{0}'. Valid options are debug|log|silent. Run with --help for more information")]
pub struct VerbosityError(pub String);

impl FromStr for Verbosity {
    type Err = VerbosityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(Verbosity::Debug),
            "log" => Ok(Verbosity::Log),
            "silent" => Ok(Verbosity::Silent),
            _ => Err(VerbosityError(s.to_string())),
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verbosity::Debug => "debug",
            Verbosity::Log => "log",
            Verbosity::Silent => "silent",
        };
        f.write_str(name)
    }
}

impl Verbosity {
    /// Filter directive for this crate's targets, or `None` when nothing
    /// should be written.
    pub fn directive(self) -> Option<&'static str> {
        match self {
            Verbosity::Debug => Some("gh_repo_stats=debug"),
            Verbosity::Log => Some("gh_repo_stats=info"),
            Verbosity::Silent => None,
        }
    }
}

/// Line format for the diagnostic stream: optional debug marker, the message,
/// then the structured fields as `key=value`.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticFormat {
    marker: bool,
}

impl DiagnosticFormat {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            marker: verbosity == Verbosity::Debug,
        }
    }
}

impl<S, N> FormatEvent<S, N> for DiagnosticFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        if self.marker {
            write!(writer, "{}", DEBUG_MARKER)?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Build the diagnostic sink for `verbosity`, writing through `writer`.
/// `Silent` yields no subscriber at all.
pub fn diagnostic_subscriber<W>(
    verbosity: Verbosity,
    writer: W,
) -> Option<impl Subscriber + Send + Sync + 'static>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let directive = verbosity.directive()?;
    Some(
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_env_filter(EnvFilter::new(directive))
            .with_writer(writer)
            .event_format(DiagnosticFormat::new(verbosity))
            .finish(),
    )
}

pub fn setup_logging(verbosity: Verbosity) {
    if let Some(subscriber) = diagnostic_subscriber(verbosity, std::io::stderr) {
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verbosity() {
        assert_eq!("debug".parse::<Verbosity>(), Ok(Verbosity::Debug));
        assert_eq!(" LOG ".parse::<Verbosity>(), Ok(Verbosity::Log));
        assert_eq!("Silent".parse::<Verbosity>(), Ok(Verbosity::Silent));
        assert_eq!(
            "loud".parse::<Verbosity>(),
            Err(VerbosityError("loud".to_string()))
        );
    }

    #[test]
    fn test_silent_has_no_directive() {
        assert_eq!(Verbosity::Silent.directive(), None);
        assert_eq!(Verbosity::Log.directive(), Some("gh_repo_stats=info"));
        assert_eq!(Verbosity::Debug.directive(), Some("gh_repo_stats=debug"));
    }

    #[test]
    fn test_verbosity_display_round_trips() {
        for verbosity in [Verbosity::Debug, Verbosity::Log, Verbosity::Silent] {
            assert_eq!(verbosity.to_string().parse::<Verbosity>(), Ok(verbosity));
        }
    }
}
