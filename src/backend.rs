use std::fmt;
use std::process::Command;
use std::time::Instant;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::params::{QueryParams, ResultRow};
use crate::utils::truncate;

pub const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const TIMELINE_TABLE: &str = "[githubarchive:github.timeline]";

const REPOSITORY_URL_PREFIX: &str = "https://github.com/";
const QUERY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("could not obtain an access token: {0}")]
    Auth(String),
    #[error("invalid backend endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend answered with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("query did not complete within {timeout_ms}ms")]
    Incomplete { timeout_ms: u64 },
    #[error("row {index} is malformed: {reason}")]
    MalformedRow { index: usize, reason: String },
}

/// A bearer token for the backend. Its value never shows up in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Supplies the credential used for each backend call.
pub trait TokenProvider {
    fn access_token(&self) -> Result<AccessToken, BackendError>;

    fn describe(&self) -> &str;
}

/// A token handed over on the command line or through the environment.
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn access_token(&self) -> Result<AccessToken, BackendError> {
        if self.token.secret().trim().is_empty() {
            return Err(BackendError::Auth("the configured token is empty".to_string()));
        }
        Ok(self.token.clone())
    }

    fn describe(&self) -> &str {
        "static token"
    }
}

/// Asks the gcloud CLI for a fresh token on every call.
pub struct GcloudTokenProvider {
    program: String,
}

impl GcloudTokenProvider {
    pub fn new() -> Self {
        Self::with_program("gcloud")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for GcloudTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenProvider for GcloudTokenProvider {
    fn access_token(&self) -> Result<AccessToken, BackendError> {
        let output = Command::new(&self.program)
            .args(["auth", "print-access-token"])
            .output()
            .map_err(|e| BackendError::Auth(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(BackendError::Auth(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(BackendError::Auth(format!("{} printed no token", self.program)));
        }
        Ok(AccessToken::new(token))
    }

    fn describe(&self) -> &str {
        &self.program
    }
}

/// Top repositories for one event type over a time range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationQuery {
    pub event_type: String,
    pub after: DateTime<Utc>,
    pub before: DateTime<Utc>,
    pub limit: u32,
}

impl From<&QueryParams> for AggregationQuery {
    fn from(params: &QueryParams) -> Self {
        Self {
            event_type: params.event_name.clone(),
            after: params.after,
            before: params.before,
            limit: params.output_count,
        }
    }
}

impl AggregationQuery {
    /// Legacy SQL against the public GitHub timeline table.
    pub fn to_legacy_sql(&self) -> String {
        format!(
            "SELECT repository_url, count(repository_url) AS events \
             FROM {table} \
             WHERE type=\"{event}\" \
             AND PARSE_UTC_USEC(created_at) >= PARSE_UTC_USEC('{after}') \
             AND PARSE_UTC_USEC(created_at) <= PARSE_UTC_USEC('{before}') \
             GROUP BY repository_url \
             ORDER BY events DESC \
             LIMIT {limit}",
            table = TIMELINE_TABLE,
            event = escape_literal(&self.event_type),
            after = self.after.format(QUERY_TIMESTAMP_FORMAT),
            before = self.before.format(QUERY_TIMESTAMP_FORMAT),
            limit = self.limit,
        )
    }
}

/// Groups and counts activity records. Rows come back sorted by count,
/// highest first.
pub trait AggregationBackend {
    fn top_repositories(&self, query: &AggregationQuery) -> Result<Vec<ResultRow>, BackendError>;
}

pub struct BigQueryBackend {
    client: Client,
    endpoint: Url,
    timeout_ms: u64,
    tokens: Box<dyn TokenProvider>,
}

impl BigQueryBackend {
    pub fn new(
        client: Client,
        base_url: &Url,
        project_id: &str,
        timeout_ms: u64,
        tokens: Box<dyn TokenProvider>,
    ) -> Result<Self, BackendError> {
        let endpoint = Url::parse(&format!(
            "{}/projects/{}/queries",
            base_url.as_str().trim_end_matches('/'),
            project_id
        ))?;
        Ok(Self {
            client,
            endpoint,
            timeout_ms,
            tokens,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query: String,
    use_legacy_sql: bool,
    max_results: u32,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    rows: Vec<TableRow>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    v: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl AggregationBackend for BigQueryBackend {
    fn top_repositories(&self, query: &AggregationQuery) -> Result<Vec<ResultRow>, BackendError> {
        debug!(
            component = "backend",
            action = "authorize",
            provider = self.tokens.describe(),
            "Obtaining access token"
        );
        let token = self.tokens.access_token()?;
        debug!(component = "backend", action = "authorize", "Access token obtained");

        let request = QueryRequest {
            query: query.to_legacy_sql(),
            use_legacy_sql: true,
            max_results: query.limit,
            timeout_ms: self.timeout_ms,
        };
        debug!(component = "backend", action = "query", endpoint = %self.endpoint, sql = %request.query, "Running aggregation query");

        let start_time = Instant::now();
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, format!("Bearer {}", token.secret()))
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text()?;
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| truncate(&body, 200));
            return Err(BackendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let response: QueryResponse = response.json()?;
        if !response.job_complete {
            return Err(BackendError::Incomplete {
                timeout_ms: self.timeout_ms,
            });
        }

        let rows = rows_from_response(response)?;
        debug!(
            component = "backend",
            action = "complete",
            row_count = rows.len(),
            duration_ms = start_time.elapsed().as_millis(),
            "Aggregation query completed"
        );
        Ok(rows)
    }
}

fn rows_from_response(response: QueryResponse) -> Result<Vec<ResultRow>, BackendError> {
    response
        .rows
        .into_iter()
        .enumerate()
        .map(|(index, row)| -> Result<ResultRow, BackendError> {
            let malformed = |reason: &str| BackendError::MalformedRow {
                index,
                reason: reason.to_string(),
            };
            let url = row
                .f
                .first()
                .and_then(cell_text)
                .ok_or_else(|| malformed("missing repository url"))?;
            let count = row
                .f
                .get(1)
                .and_then(cell_text)
                .ok_or_else(|| malformed("missing event count"))?
                .parse::<u64>()
                .map_err(|_| malformed("event count is not a number"))?;
            Ok(ResultRow::new(strip_repository_prefix(&url), count))
        })
        .collect()
}

fn cell_text(cell: &TableCell) -> Option<String> {
    match cell.v.as_ref()? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn strip_repository_prefix(url: &str) -> &str {
    url.strip_prefix(REPOSITORY_URL_PREFIX).unwrap_or(url)
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
