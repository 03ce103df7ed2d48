use std::collections::BTreeMap;
use std::time::Instant;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::utils::truncate;

pub const DEFAULT_EVENTS_URL: &str = "https://api.github.com/events";
pub const DEFAULT_EVENT_TYPES_URL: &str = "https://developer.github.com/v3/activity/events/types/";

const TOC_MARKER: &str = r"(?i)markdown-toc";
const TOC_WINDOW: usize = 50;
const TOC_END: &str = "</ul>";

/// Revision of [`BUILTIN_EVENT_TYPES`]; bump it whenever the list changes.
pub const BUILTIN_EVENT_TYPES_VERSION: &str = "2024-06";

pub const BUILTIN_EVENT_TYPES: &[&str] = &[
    "CommitCommentEvent",
    "CreateEvent",
    "DeleteEvent",
    "DeploymentEvent",
    "DeploymentStatusEvent",
    "DownloadEvent",
    "FollowEvent",
    "ForkApplyEvent",
    "ForkEvent",
    "GistEvent",
    "GollumEvent",
    "IssueCommentEvent",
    "IssuesEvent",
    "MemberEvent",
    "PublicEvent",
    "PullRequestEvent",
    "PullRequestReviewCommentEvent",
    "PullRequestReviewEvent",
    "PullRequestReviewThreadEvent",
    "PushEvent",
    "ReleaseEvent",
    "SponsorshipEvent",
    "StatusEvent",
    "TeamAddEvent",
    "WatchEvent",
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{url} answered with status {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },
    #[error("the page is empty")]
    EmptyPage,
    #[error("no event list table of contents found on the page")]
    MarkerNotFound,
    #[error("the feed reported an error: {0}")]
    Api(String),
    #[error("the feed is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected feed payload: {0}")]
    UnexpectedPayload(&'static str),
    #[error("invalid table of contents pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// How a name is matched against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Exact match on a display name, or a lower-cased match on a key.
    ExactOrKey,
    /// Exact match on a display name only.
    ExactOnly,
}

/// The set of event type names currently considered valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCatalog {
    entries: BTreeMap<String, String>,
    lookup: Lookup,
}

impl EventCatalog {
    /// Catalog keyed by lower-case anchor names, as scraped from the docs.
    pub fn keyed(entries: BTreeMap<String, String>) -> Self {
        Self {
            entries,
            lookup: Lookup::ExactOrKey,
        }
    }

    /// Catalog of bare names that only match exactly.
    pub fn exact<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                (name.clone(), name)
            })
            .collect();
        Self {
            entries,
            lookup: Lookup::ExactOnly,
        }
    }

    pub fn builtin() -> Self {
        Self::keyed(
            BUILTIN_EVENT_TYPES
                .iter()
                .map(|name| (name.to_lowercase(), name.to_string()))
                .collect(),
        )
    }

    pub fn lookup(&self) -> Lookup {
        self.lookup
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }

    /// The display name `name` resolves to, if it is in the catalog.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if let Some(display) = self.entries.values().find(|display| *display == name) {
            return Some(display);
        }
        match self.lookup {
            Lookup::ExactOrKey => self.entries.get(&name.to_lowercase()).map(String::as_str),
            Lookup::ExactOnly => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
}

/// Anything able to produce the current event type catalog.
pub trait EventTypeSource {
    fn fetch(&self) -> Result<EventCatalog, CatalogError>;

    /// Where the catalog comes from, for diagnostics.
    fn describe(&self) -> String;
}

/// Live "recent events" feed; the types of the returned events form the
/// catalog.
pub struct EventsFeedSource {
    client: Client,
    url: String,
}

impl EventsFeedSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl EventTypeSource for EventsFeedSource {
    fn fetch(&self) -> Result<EventCatalog, CatalogError> {
        let start_time = Instant::now();
        debug!(component = "catalog", action = "fetch", url = %self.url, "Requesting recent events feed");

        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()?;
        let status = response.status();
        let body = response.text()?;

        if !status.is_success() {
            return Err(CatalogError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
                message: error_message(&body).unwrap_or_else(|| truncate(&body, 200)),
            });
        }

        let catalog = parse_events_feed(&body)?;
        debug!(
            component = "catalog",
            action = "complete",
            event_types = catalog.len(),
            duration_ms = start_time.elapsed().as_millis(),
            "Parsed recent events feed"
        );
        Ok(catalog)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Human-readable event types documentation page, scraped for its table of
/// contents.
pub struct DocsPageSource {
    client: Client,
    url: String,
}

impl DocsPageSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl EventTypeSource for DocsPageSource {
    fn fetch(&self) -> Result<EventCatalog, CatalogError> {
        debug!(component = "catalog", action = "fetch", url = %self.url, "Requesting event types page");

        let response = self.client.get(&self.url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
                message: status.to_string(),
            });
        }

        let page = response.text()?;
        debug!(component = "catalog", action = "parse", url = %self.url, "Parsing page data");
        Ok(EventCatalog::keyed(parse_docs_page(&page)?))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// The list of event types compiled into the binary.
#[derive(Debug, Default)]
pub struct BuiltinSource;

impl EventTypeSource for BuiltinSource {
    fn fetch(&self) -> Result<EventCatalog, CatalogError> {
        Ok(EventCatalog::builtin())
    }

    fn describe(&self) -> String {
        format!("builtin event types ({})", BUILTIN_EVENT_TYPES_VERSION)
    }
}

/// Extract `anchor -> display name` pairs from the table of contents of the
/// event types page.
pub fn parse_docs_page(page: &str) -> Result<BTreeMap<String, String>, CatalogError> {
    if page.trim().is_empty() {
        return Err(CatalogError::EmptyPage);
    }

    let marker = Regex::new(TOC_MARKER)?;
    let lines: Vec<&str> = page.lines().collect();
    let marker_line = lines
        .iter()
        .position(|line| marker.is_match(line))
        .ok_or(CatalogError::MarkerNotFound)?;
    debug!(
        component = "catalog",
        action = "locate",
        line = marker_line,
        "Found event list table of contents"
    );

    let mut entries = BTreeMap::new();
    for line in lines.iter().skip(marker_line + 1).take(TOC_WINDOW) {
        if line.contains(TOC_END) {
            break;
        }

        let reformatted = line
            .replace("<li><a href=\"#", "")
            .replace("</a></li>", "")
            .replace("\">", "-");
        let mut parts = reformatted.split('-');
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() {
            continue;
        }
        entries.insert(key.to_string(), value.to_string());
    }

    debug!(
        component = "catalog",
        action = "complete",
        event_types = entries.len(),
        "Built event list from table of contents"
    );
    Ok(entries)
}

/// Collect the `type` of every event object in a recent events feed.
pub fn parse_events_feed(body: &str) -> Result<EventCatalog, CatalogError> {
    match serde_json::from_str::<Value>(body)? {
        Value::Array(events) => Ok(EventCatalog::exact(
            events
                .iter()
                .filter_map(|event| event.get("type").and_then(Value::as_str)),
        )),
        Value::Object(map) => Err(CatalogError::Api(
            map.get("message")
                .and_then(Value::as_str)
                .unwrap_or("object returned instead of an event list")
                .to_string(),
        )),
        _ => Err(CatalogError::UnexpectedPayload("expected a list of events")),
    }
}

fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.get("message")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    const DOCS_PAGE: &str = r##"<html>
<body>
<h1>Event Types</h1>
<ul id="markdown-toc">
<li><a href="#commitcommentevent">CommitCommentEvent</a></li>
<li><a href="#createevent">CreateEvent</a></li>
<li><a href="#pushevent">PushEvent</a></li>
<li><a href="#watchevent">WatchEvent</a></li>
</ul>
<ul>
<li><a href="#notanevent">NotAnEvent</a></li>
</ul>
</body>
</html>"##;

    #[test]
    fn test_parse_docs_page_reads_table_of_contents() {
        let entries = parse_docs_page(DOCS_PAGE).unwrap();
        let expected: BTreeMap<String, String> = [
            ("commitcommentevent", "CommitCommentEvent"),
            ("createevent", "CreateEvent"),
            ("pushevent", "PushEvent"),
            ("watchevent", "WatchEvent"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(entries, expected);
    }

    #[test]
    fn test_parse_docs_page_stops_at_first_closing_list() {
        let entries = parse_docs_page(DOCS_PAGE).unwrap();
        assert!(!entries.contains_key("notanevent"));
    }

    #[test]
    fn test_parse_docs_page_marker_is_case_insensitive() {
        let page = "<UL ID=\"MARKDOWN-TOC\">\n<li><a href=\"#forkevent\">ForkEvent</a></li>\n</ul>";
        let entries = parse_docs_page(page).unwrap();
        assert_eq!(entries.get("forkevent").map(String::as_str), Some("ForkEvent"));
    }

    #[test]
    fn test_parse_docs_page_window_is_bounded() {
        let mut page = String::from("<ul id=\"markdown-toc\">\n");
        for i in 0..60 {
            page.push_str(&format!("<li><a href=\"#event{i}\">Event{i}</a></li>\n"));
        }
        page.push_str("</ul>\n");

        let entries = parse_docs_page(&page).unwrap();
        assert_eq!(entries.len(), TOC_WINDOW);
        assert!(entries.contains_key("event49"));
        assert!(!entries.contains_key("event50"));
    }

    #[test]
    fn test_parse_docs_page_failures() {
        assert!(matches!(parse_docs_page(""), Err(CatalogError::EmptyPage)));
        assert!(matches!(
            parse_docs_page("<ul>\n<li>nothing here</li>\n</ul>"),
            Err(CatalogError::MarkerNotFound)
        ));
    }

    #[test]
    fn test_parse_events_feed_collects_types() {
        let body = r#"[
            {"id": "1", "type": "PushEvent"},
            {"id": "2", "type": "WatchEvent"},
            {"id": "3", "type": "PushEvent"},
            {"id": "4"}
        ]"#;
        let catalog = parse_events_feed(body).unwrap();
        assert_eq!(catalog.lookup(), Lookup::ExactOnly);
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["PushEvent", "WatchEvent"]);
    }

    #[test]
    fn test_parse_events_feed_error_payload() {
        let body = r#"{"message": "API rate limit exceeded", "documentation_url": "https://docs.github.com"}"#;
        match parse_events_feed(body) {
            Err(CatalogError::Api(message)) => assert_eq!(message, "API rate limit exceeded"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(parse_events_feed("not json"), Err(CatalogError::Json(_))));
        assert!(matches!(
            parse_events_feed("42"),
            Err(CatalogError::UnexpectedPayload(_))
        ));
    }

    #[test]
    fn test_keyed_catalog_matches_display_name_or_key() {
        let catalog = EventCatalog::keyed(parse_docs_page(DOCS_PAGE).unwrap());
        assert!(catalog.contains("PushEvent"));
        assert!(catalog.contains("pushevent"));
        assert!(catalog.contains("PUSHEVENT"));
        assert!(!catalog.contains("Push"));
    }

    #[test]
    fn test_resolve_returns_display_name() {
        let catalog = EventCatalog::builtin();
        assert_eq!(catalog.resolve("PushEvent"), Some("PushEvent"));
        assert_eq!(catalog.resolve("pushevent"), Some("PushEvent"));
        assert_eq!(catalog.resolve("PUSHEVENT"), Some("PushEvent"));
        assert_eq!(catalog.resolve("Push"), None);
        assert_eq!(EventCatalog::exact(["PushEvent"]).resolve("pushevent"), None);
    }

    #[test]
    fn test_exact_catalog_is_case_sensitive() {
        let catalog = EventCatalog::exact(["PushEvent"]);
        assert!(catalog.contains("PushEvent"));
        assert!(!catalog.contains("pushevent"));
    }

    #[test]
    fn test_builtin_source() {
        let catalog = BuiltinSource.fetch().unwrap();
        assert_eq!(catalog.len(), BUILTIN_EVENT_TYPES.len());
        assert!(catalog.contains("WatchEvent"));
        assert!(catalog.contains("watchevent"));
        assert!(BuiltinSource.describe().contains(BUILTIN_EVENT_TYPES_VERSION));
    }

    /// Serve one canned HTTP response on a loopback port and return its URL.
    fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 512];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        });
        format!("http://{}/events", addr)
    }

    fn loopback_client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    #[test]
    fn test_feed_status_error_carries_api_message() {
        let url = serve_once("403 Forbidden", r#"{"message":"API rate limit exceeded"}"#);
        let err = EventsFeedSource::new(loopback_client(), url.clone())
            .fetch()
            .unwrap_err();
        match err {
            CatalogError::Status {
                url: failed,
                status,
                message,
            } => {
                assert_eq!(failed, url);
                assert_eq!(status, 403);
                assert_eq!(message, "API rate limit exceeded");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_feed_status_error_falls_back_to_body() {
        let url = serve_once("502 Bad Gateway", "upstream down");
        let err = EventsFeedSource::new(loopback_client(), url).fetch().unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Status { status: 502, ref message, .. } if message == "upstream down"
        ));
    }

    #[test]
    fn test_feed_fetch_collects_types() {
        let url = serve_once(
            "200 OK",
            r#"[{"type":"PushEvent"},{"type":"WatchEvent"},{"type":"PushEvent"}]"#,
        );
        let catalog = EventsFeedSource::new(loopback_client(), url).fetch().unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup(), Lookup::ExactOnly);
        assert_eq!(catalog.resolve("WatchEvent"), Some("WatchEvent"));
    }

    #[test]
    fn test_feed_error_object_with_ok_status() {
        let url = serve_once("200 OK", r#"{"message":"Not Found"}"#);
        let err = EventsFeedSource::new(loopback_client(), url).fetch().unwrap_err();
        assert!(matches!(err, CatalogError::Api(ref message) if message == "Not Found"));
    }

    #[test]
    fn test_docs_status_error() {
        let url = serve_once("404 Not Found", "");
        let err = DocsPageSource::new(loopback_client(), url).fetch().unwrap_err();
        assert!(matches!(err, CatalogError::Status { status: 404, .. }));
    }

    #[test]
    fn test_docs_fetch_builds_keyed_catalog() {
        let url = serve_once("200 OK", DOCS_PAGE);
        let catalog = DocsPageSource::new(loopback_client(), url).fetch().unwrap();
        assert_eq!(catalog.lookup(), Lookup::ExactOrKey);
        assert_eq!(catalog.resolve("pushevent"), Some("PushEvent"));
    }
}
