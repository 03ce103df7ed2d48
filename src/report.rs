use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::params::ResultRow;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Io(#[from] io::Error),
    #[error("failed to write CSV report: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to write XML report: {0}")]
    Xml(#[from] quick_xml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget {
    Screen,
    CsvFile,
    Xml,
}

impl OutputTarget {
    /// Unknown names fall back to the screen.
    pub fn from_arg(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "screen" => OutputTarget::Screen,
            "csv-file" | "csv" => OutputTarget::CsvFile,
            "xml" => OutputTarget::Xml,
            other => {
                warn!(
                    component = "report",
                    format = other,
                    "Unknown output format, writing to screen"
                );
                OutputTarget::Screen
            }
        }
    }

    pub fn default_path(self) -> Option<&'static str> {
        match self {
            OutputTarget::Screen => None,
            OutputTarget::CsvFile => Some("gh_repo_stats.csv"),
            OutputTarget::Xml => Some("gh_repo_stats.xml"),
        }
    }
}

pub struct ReportFormatter {
    target: OutputTarget,
    path: Option<PathBuf>,
}

impl ReportFormatter {
    pub fn new(target: OutputTarget, path: Option<PathBuf>) -> Self {
        Self { target, path }
    }

    pub fn screen() -> Self {
        Self::new(OutputTarget::Screen, None)
    }

    pub fn target(&self) -> OutputTarget {
        self.target
    }

    /// Where file targets are written; `None` for the screen.
    pub fn destination(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| self.target.default_path().map(PathBuf::from))
            .filter(|_| self.target != OutputTarget::Screen)
    }

    /// Render rows in the order received. `screen` writes to `out`; the file
    /// targets write to [`destination`](Self::destination).
    pub fn render(&self, rows: &[ResultRow], out: &mut dyn Write) -> Result<(), ReportError> {
        match (self.target, self.destination()) {
            (OutputTarget::CsvFile, Some(path)) => {
                debug!(component = "report", path = ?path, "Converting output to CSV");
                write_csv(rows, create(&path)?)?;
                info!(component = "report", path = ?path, row_count = rows.len(), "Wrote CSV report");
            }
            (OutputTarget::Xml, Some(path)) => {
                debug!(component = "report", path = ?path, "Converting output to XML");
                write_xml(rows, create(&path)?)?;
                info!(component = "report", path = ?path, row_count = rows.len(), "Wrote XML report");
            }
            _ => write_screen(rows, out)?,
        }
        Ok(())
    }
}

fn create(path: &Path) -> io::Result<BufWriter<File>> {
    File::create(path).map(BufWriter::new)
}

pub fn write_screen(rows: &[ResultRow], out: &mut dyn Write) -> io::Result<()> {
    for row in rows {
        writeln!(out, "{} - {} events", row.url, row.count)?;
    }
    out.flush()
}

pub fn write_csv<W: Write>(rows: &[ResultRow], out: W) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_writer(out);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_xml<W: Write>(rows: &[ResultRow], out: W) -> Result<(), ReportError> {
    let mut writer = quick_xml::Writer::new_with_indent(out, b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("repositories")))?;
    for row in rows {
        let count = row.count.to_string();
        let mut element = BytesStart::new("repository");
        element.push_attribute(("count", count.as_str()));
        writer.write_event(Event::Start(element))?;
        writer.write_event(Event::Text(BytesText::new(&row.url)))?;
        writer.write_event(Event::End(BytesEnd::new("repository")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("repositories")))?;
    writer.into_inner().flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rows() -> Vec<ResultRow> {
        vec![ResultRow::new("foo/bar", 42), ResultRow::new("a&b/c", 7)]
    }

    #[test]
    fn test_screen_keeps_received_order() {
        let rows = vec![ResultRow::new("small/repo", 1), ResultRow::new("big/repo", 99)];
        let mut out = Vec::new();
        ReportFormatter::screen().render(&rows, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "small/repo - 1 events\nbig/repo - 99 events\n"
        );
    }

    #[test]
    fn test_unknown_target_falls_back_to_screen() {
        assert_eq!(OutputTarget::from_arg("pdf"), OutputTarget::Screen);
        assert_eq!(OutputTarget::from_arg("CSV-FILE"), OutputTarget::CsvFile);
        assert_eq!(OutputTarget::from_arg("xml"), OutputTarget::Xml);
    }

    #[test]
    fn test_csv_output() {
        let mut out = Vec::new();
        write_csv(&rows(), &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "url,count\nfoo/bar,42\na&b/c,7\n"
        );
    }

    #[test]
    fn test_xml_output_escapes_text() {
        let mut out = Vec::new();
        write_xml(&rows(), &mut out).unwrap();
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<repository count=\"42\">foo/bar</repository>"));
        assert!(xml.contains("<repository count=\"7\">a&amp;b/c</repository>"));
        assert!(xml.trim_end().ends_with("</repositories>"));
    }

    #[test]
    fn test_file_targets_write_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let formatter = ReportFormatter::new(OutputTarget::CsvFile, Some(path.clone()));

        let mut screen = Vec::new();
        formatter.render(&rows(), &mut screen).unwrap();

        assert!(screen.is_empty());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("url,count\n"));
    }

    #[test]
    fn test_destination_defaults() {
        assert_eq!(ReportFormatter::screen().destination(), None);
        assert_eq!(
            ReportFormatter::new(OutputTarget::Xml, None).destination(),
            Some(PathBuf::from("gh_repo_stats.xml"))
        );
        assert_eq!(
            ReportFormatter::new(OutputTarget::Screen, Some(PathBuf::from("x"))).destination(),
            None
        );
    }
}
