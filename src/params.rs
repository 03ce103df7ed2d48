use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::logging::Verbosity;

/// The five positional inputs exactly as they arrived on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParams {
    pub after: String,
    pub before: String,
    pub event_name: String,
    pub output_count: String,
    pub verbosity: Verbosity,
}

/// Inputs after validation, with timestamps parsed and the count coerced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pub after: DateTime<Utc>,
    pub before: DateTime<Utc>,
    pub event_name: String,
    pub output_count: u32,
}

impl QueryParams {
    pub fn days_between(&self) -> i64 {
        (self.before - self.after).num_days()
    }
}

/// One ranked repository as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRow {
    pub url: String,
    pub count: u64,
}

impl ResultRow {
    pub fn new(url: impl Into<String>, count: u64) -> Self {
        Self {
            url: url.into(),
            count,
        }
    }
}
