//! Lab report text extraction.
//!
//! The report-inference script prints a free-form report that may contain a
//! `Name of Test:` heading and one markdown pipe table. Extraction runs in
//! named stages (heading scan, table span detection, row tokenization,
//! summary cleanup, classification fallback). Each stage is a pure function.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Classification used when nothing in the text identifies the test.
pub const GENERAL_LAB_REPORT: &str = "General Lab Report";

/// Fallback test names, matched case-insensitively in this order.
pub const KNOWN_TESTS: [&str; 7] = [
    "CBC",
    "Lipid Profile",
    "Blood Sugar",
    "Vitamin B12",
    "Vitamin D",
    "Calcium",
    "TSH",
];

static TEST_NAME_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Name of Test:\s*(.*)").expect("valid regex"));

static TABLE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Table\s*:?").expect("valid regex"));

static SECTION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:Inferences:|Inferences\b|Plausible Remedies:|Disclaimer:)")
        .expect("valid regex")
});

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n").expect("valid regex"));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Structured view of a lab report.
///
/// Field names on the wire follow what the web client already consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedReport {
    #[serde(rename = "result")]
    pub summary_text: String,
    #[serde(rename = "reportData")]
    pub structured_fields: BTreeMap<String, String>,
    #[serde(rename = "testType")]
    pub classification: String,
}

/// Byte range of the table section inside the report text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpan {
    pub start: usize,
    pub end: usize,
}

/// Parse a raw report. Surrounding whitespace is ignored.
pub fn extract_report(raw: &str) -> ExtractedReport {
    let text = raw.trim();

    let heading = scan_heading(text);
    let span = locate_table_span(text);
    let structured_fields = span
        .map(|span| tokenize_rows(&text[span.start..span.end]))
        .unwrap_or_default();
    let summary_text = summarize(text, span);
    let classification = heading.unwrap_or_else(|| classify(text).to_string());

    ExtractedReport {
        summary_text,
        structured_fields,
        classification,
    }
}

/// Stage 1: value after `Name of Test:`, emphasis stripped.
///
/// Whitespace (including line breaks) between the colon and the value is
/// skipped, so a value on the following line is still found.
pub fn scan_heading(text: &str) -> Option<String> {
    let captured = TEST_NAME_HEADING.captures(text)?.get(1)?.as_str();
    let value = strip_emphasis(captured).trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Stage 2: from the first `Table` marker up to the next section heading,
/// or to the end of the text.
pub fn locate_table_span(text: &str) -> Option<TableSpan> {
    let start = TABLE_MARKER.find(text)?.start();
    let end = SECTION_HEADING
        .find(&text[start..])
        .map(|m| start + m.start())
        .unwrap_or(text.len());
    Some(TableSpan { start, end })
}

/// Stage 3: data rows of a pipe table, keyed by their first cell.
///
/// Only lines starting with `|` count. The first is the header and the
/// second the separator; fewer than two means there is no table.
pub fn tokenize_rows(section: &str) -> BTreeMap<String, String> {
    let rows: Vec<&str> = section
        .lines()
        .filter(|line| line.trim().starts_with('|'))
        .collect();

    let mut fields = BTreeMap::new();
    if rows.len() < 2 {
        return fields;
    }

    for row in &rows[2..] {
        if let Some((name, value)) = row_entry(row) {
            fields.insert(name, value);
        }
    }
    fields
}

/// One data row to a `(name, value)` pair. Rows with fewer than two
/// non-empty cells yield nothing.
fn row_entry(row: &str) -> Option<(String, String)> {
    let cells: Vec<&str> = row
        .split('|')
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .collect();

    match cells.len() {
        0 | 1 => None,
        2..=4 => Some((cells[0].to_string(), cells[1].to_string())),
        _ => Some((
            cells[0].to_string(),
            format!(
                "{} {} (Ref: {}) - Normal? {}",
                cells[1], cells[2], cells[3], cells[4]
            ),
        )),
    }
}

/// Stage 4: report text without the table, on a single line.
pub fn summarize(text: &str, span: Option<TableSpan>) -> String {
    let remaining = match span {
        Some(span) => format!("{}{}", &text[..span.start], &text[span.end..]),
        None => text.to_string(),
    };
    let stripped = strip_emphasis(&remaining);
    let single_line = LINE_BREAK.replace_all(&stripped, " ");
    WHITESPACE_RUN
        .replace_all(&single_line, " ")
        .trim()
        .to_string()
}

/// Stage 5: first known test name mentioned anywhere in the text.
pub fn classify(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    KNOWN_TESTS
        .iter()
        .find(|name| lowered.contains(&name.to_lowercase()))
        .copied()
        .unwrap_or(GENERAL_LAB_REPORT)
}

fn strip_emphasis(text: &str) -> String {
    text.replace("**", "")
}
