use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use url::Url;

use crate::backend::DEFAULT_BIGQUERY_URL;
use crate::catalog::{DEFAULT_EVENTS_URL, DEFAULT_EVENT_TYPES_URL};
use crate::logging::Verbosity;
use crate::params::CommandParams;
use crate::validate::Limits;

const EXAMPLE: &str = "Example:\n  gh-repo-stats \"2014-01-13 12:00:00\" \"2014-02-13 12:00:00\" PushEvent 20 debug";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CatalogKind {
    /// Types seen in the live recent events feed
    Feed,
    /// Table of contents of the event types documentation page
    Docs,
    /// Event types compiled into this binary
    Builtin,
}

#[derive(Parser, Debug)]
#[command(
    name = "gh-repo-stats",
    about = "Rank GitHub repositories by event count over a date range",
    version,
    long_about = None,
    after_help = EXAMPLE
)]
pub struct Args {
    /// Start of the range, 'YYYY-MM-DD HH:MM:SS' (quotes required)
    pub after: String,

    /// End of the range, 'YYYY-MM-DD HH:MM:SS' (quotes required)
    pub before: String,

    /// GitHub event type to count, e.g. PushEvent
    pub event: String,

    /// Number of repositories to report
    #[arg(allow_hyphen_values = true)]
    pub count: String,

    /// Logging mode: debug|log|silent
    pub verbosity: Verbosity,

    /// Maximum number of days between start and end
    #[arg(long, default_value_t = 60)]
    pub max_days: i64,

    /// Maximum number of rows that may be requested
    #[arg(long, default_value_t = 20)]
    pub max_output_count: u32,

    /// Time the backend may spend on the query, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub max_millis: u64,

    /// Output format: screen|csv-file|xml
    #[arg(short, long, default_value = "screen")]
    pub format: String,

    /// Destination file for the csv-file and xml formats
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Where the list of valid event types comes from
    #[arg(long, value_enum, default_value_t = CatalogKind::Feed)]
    pub catalog: CatalogKind,

    /// Recent events feed used by the feed catalog
    #[arg(long, default_value = DEFAULT_EVENTS_URL)]
    pub events_url: Url,

    /// Documentation page used by the docs catalog
    #[arg(long, default_value = DEFAULT_EVENT_TYPES_URL)]
    pub event_types_url: Url,

    /// BigQuery REST API base URL
    #[arg(long, default_value = DEFAULT_BIGQUERY_URL)]
    pub bigquery_url: Url,

    /// Google Cloud project the query is billed to
    #[arg(long, env = "GH_REPO_STATS_PROJECT")]
    pub project_id: Option<String>,

    /// OAuth access token for BigQuery
    #[arg(long, env = "GH_REPO_STATS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Ask the gcloud CLI for an access token instead
    #[arg(long)]
    pub gcloud_token: bool,

    /// Print the GitHub Archive files covering the range instead of querying
    #[arg(long)]
    pub archive_urls: bool,
}

impl Args {
    pub fn command_params(&self) -> CommandParams {
        CommandParams {
            after: self.after.clone(),
            before: self.before.clone(),
            event_name: self.event.clone(),
            output_count: self.count.clone(),
            verbosity: self.verbosity,
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_days_between: self.max_days,
            max_output_count: self.max_output_count,
            max_millis: self.max_millis,
        }
    }
}
