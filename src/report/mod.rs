//! HTML report rendering.
//!
//! Templates use a small subset of Jinja syntax: `{{ uid }}` and
//! `{{ name }}` anywhere, plus a single
//! `{% for row in table_rows %} ... {% endfor %}` loop whose body may use
//! `{{ row.run_ts }}` and `{{ row.value }}`. Block tags swallow their own line
//! (leading indentation and trailing newline), so the loop body is emitted
//! once per row without blank lines.

use crate::error::ReportError;
use crate::history_store::{EntityId, Observation, ReportContent};
use std::fmt::Write;
use std::path::Path;

const DEFAULT_TEMPLATE: &str = include_str!("templates/report.html");
const LOOP_START: &str = "{% for row in table_rows %}";
const LOOP_END: &str = "{% endfor %}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Uid,
    Name,
    RowRunTs,
    RowValue,
}

#[derive(Debug, Clone)]
pub struct ReportRenderer {
    head: Vec<Segment>,
    row: Vec<Segment>,
    tail: Vec<Segment>,
}

impl Default for ReportRenderer {
    fn default() -> Self {
        Self::parse(DEFAULT_TEMPLATE).expect("bundled report template is valid")
    }
}

impl ReportRenderer {
    pub fn parse(source: &str) -> Result<Self, ReportError> {
        let start = source
            .find(LOOP_START)
            .ok_or_else(|| ReportError::Template(format!("missing `{}`", LOOP_START)))?;
        let body_start = start + LOOP_START.len();
        let end = source[body_start..]
            .find(LOOP_END)
            .map(|offset| body_start + offset)
            .ok_or_else(|| ReportError::Template(format!("missing `{}`", LOOP_END)))?;
        let tail_start = end + LOOP_END.len();
        if source[tail_start..].contains(LOOP_START) {
            return Err(ReportError::Template(
                "only one table_rows loop is supported".to_string(),
            ));
        }

        let head = lstrip_block(&source[..start]);
        let row = lstrip_block(trim_block(&source[body_start..end]));
        let tail = trim_block(&source[tail_start..]);

        Ok(Self {
            head: parse_segments(head, false)?,
            row: parse_segments(row, true)?,
            tail: parse_segments(tail, false)?,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ReportError> {
        let source = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source)
    }

    /// Render the report for one entity. Rows are emitted in the given order.
    pub fn render(&self, uid: EntityId, name: &str, table_rows: &[Observation]) -> String {
        let mut out = String::new();
        self.write_segments(&mut out, &self.head, uid, name, None);
        for row in table_rows {
            self.write_segments(&mut out, &self.row, uid, name, Some(row));
        }
        self.write_segments(&mut out, &self.tail, uid, name, None);
        out
    }

    pub fn render_content(&self, content: &ReportContent) -> String {
        self.render(content.uid, &content.name, &content.table_rows)
    }

    fn write_segments(
        &self,
        out: &mut String,
        segments: &[Segment],
        uid: EntityId,
        name: &str,
        row: Option<&Observation>,
    ) {
        for segment in segments {
            match (segment, row) {
                (Segment::Text(text), _) => out.push_str(text),
                (Segment::Uid, _) => {
                    let _ = write!(out, "{}", uid);
                }
                (Segment::Name, _) => out.push_str(&escape_html(name)),
                (Segment::RowRunTs, Some(row)) => out.push_str(&escape_html(&row.run_ts)),
                (Segment::RowValue, Some(row)) => {
                    let _ = write!(out, "{}", row.value);
                }
                // Row placeholders are rejected outside the loop at parse time
                (Segment::RowRunTs | Segment::RowValue, None) => {}
            }
        }
    }
}

fn parse_segments(source: &str, in_row: bool) -> Result<Vec<Segment>, ReportError> {
    if source.contains("{%") {
        return Err(ReportError::Template(
            "unsupported block tag".to_string(),
        ));
    }
    let mut segments = Vec::new();
    let mut rest = source;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Text(rest[..open].to_string()));
        }
        let after_open = &rest[open + 2..];
        let close = after_open
            .find("}}")
            .ok_or_else(|| ReportError::Template("unclosed `{{`".to_string()))?;
        let segment = match (after_open[..close].trim(), in_row) {
            ("uid", _) => Segment::Uid,
            ("name", _) => Segment::Name,
            ("row.run_ts", true) => Segment::RowRunTs,
            ("row.value", true) => Segment::RowValue,
            (other, _) => {
                return Err(ReportError::Template(format!(
                    "unknown placeholder `{}`",
                    other
                )))
            }
        };
        segments.push(segment);
        rest = &after_open[close + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

/// Drop the indentation in front of a block tag.
fn lstrip_block(s: &str) -> &str {
    s.trim_end_matches([' ', '\t'])
}

/// Drop the newline right after a block tag.
fn trim_block(s: &str) -> &str {
    s.strip_prefix("\r\n")
        .or_else(|| s.strip_prefix('\n'))
        .unwrap_or(s)
}

fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
