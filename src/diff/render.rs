//! Diff report rendering
//!
//! A [`DiffResult`] renders to json, html, text, or csv. The caller's
//! minimum significance suppresses changes below the floor before any
//! formatting happens, so every format sees the same filtered view and a
//! recomputed summary.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use super::engine::{DiffResult, Significance};

/// Output formats for rendered diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Html,
    Text,
    Csv,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "html" => Some(Self::Html),
            "text" | "txt" => Some(Self::Text),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Html => "html",
            Self::Text => "txt",
            Self::Csv => "csv",
        }
    }
}

/// Render a diff, suppressing changes below `min_significance`.
pub fn render(
    diff: &DiffResult,
    format: ReportFormat,
    min_significance: Significance,
) -> Result<Vec<u8>> {
    let view = diff.at_min_significance(min_significance);
    match format {
        ReportFormat::Json => serde_json::to_vec_pretty(&view)
            .map_err(|e| Error::Capture(format!("diff serialization failed: {e}"))),
        ReportFormat::Text => Ok(render_text(&view).into_bytes()),
        ReportFormat::Csv => Ok(render_csv(&view).into_bytes()),
        ReportFormat::Html => Ok(render_html(&view).into_bytes()),
    }
}

fn render_text(diff: &DiffResult) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    let _ = writeln!(out, "diff {} -> {}", diff.baseline_id, diff.compare_id);
    let s = &diff.summary;
    let _ = writeln!(
        out,
        "entries: {} -> {} | added {} removed {} modified {}",
        s.baseline_entries, s.compare_entries, s.added, s.removed, s.modified
    );
    let _ = writeln!(
        out,
        "changes: high {} medium {} low {}",
        s.changes_high, s.changes_medium, s.changes_low
    );
    let _ = writeln!(
        out,
        "bytes: {} -> {} | time: {:.1}ms -> {:.1}ms",
        s.baseline_bytes, s.compare_bytes, s.baseline_time_ms, s.compare_time_ms
    );
    for added in &diff.added {
        let _ = writeln!(out, "+ [{}] {}", added.significance, added.key);
    }
    for removed in &diff.removed {
        let _ = writeln!(out, "- [{}] {}", removed.significance, removed.key);
    }
    for modified in &diff.modified {
        let _ = writeln!(out, "~ {}", modified.key);
        for change in &modified.changes {
            let _ = writeln!(
                out,
                "    [{}] {}: {} -> {}",
                change.significance, change.field, change.baseline, change.compare
            );
        }
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn render_csv(diff: &DiffResult) -> String {
    let mut out = String::from("kind,significance,key,field,baseline,compare\n");
    let mut row = |kind: &str, sig: Significance, key: &str, field: &str, b: &str, c: &str| {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            kind,
            sig,
            csv_escape(key),
            csv_escape(field),
            csv_escape(b),
            csv_escape(c)
        ));
    };
    for added in &diff.added {
        row("added", added.significance, &added.key, "", "", "");
    }
    for removed in &diff.removed {
        row("removed", removed.significance, &removed.key, "", "", "");
    }
    for modified in &diff.modified {
        for change in &modified.changes {
            row(
                "modified",
                change.significance,
                &modified.key,
                &change.field,
                &change.baseline,
                &change.compare,
            );
        }
    }
    out
}

fn render_html(diff: &DiffResult) -> String {
    use std::fmt::Write;
    let esc = |s: &str| html_escape::encode_text(s).into_owned();
    let mut out = String::new();
    let _ = writeln!(out, "<!DOCTYPE html>");
    let _ = writeln!(
        out,
        "<html><head><meta charset=\"utf-8\"><title>capture diff {} vs {}</title>",
        esc(&diff.baseline_id),
        esc(&diff.compare_id)
    );
    let _ = writeln!(
        out,
        "<style>body{{font-family:monospace}}table{{border-collapse:collapse}}\
         td,th{{border:1px solid #ccc;padding:4px 8px}}\
         .high{{background:#fdd}}.medium{{background:#ffd}}.low{{background:#f4f4f4}}</style>"
    );
    let _ = writeln!(out, "</head><body>");
    let s = &diff.summary;
    let _ = writeln!(
        out,
        "<h1>Diff {} &rarr; {}</h1>",
        esc(&diff.baseline_id),
        esc(&diff.compare_id)
    );
    let _ = writeln!(
        out,
        "<p>entries {} &rarr; {} &middot; added {} &middot; removed {} &middot; modified {} \
         &middot; changes: {} high / {} medium / {} low</p>",
        s.baseline_entries,
        s.compare_entries,
        s.added,
        s.removed,
        s.modified,
        s.changes_high,
        s.changes_medium,
        s.changes_low
    );
    let _ = writeln!(
        out,
        "<table><tr><th>kind</th><th>significance</th><th>key</th>\
         <th>field</th><th>baseline</th><th>compare</th></tr>"
    );
    let mut row = |kind: &str, sig: Significance, key: &str, field: &str, b: &str, c: &str| {
        let _ = writeln!(
            out,
            "<tr class=\"{sig}\"><td>{}</td><td>{sig}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            esc(kind),
            esc(key),
            esc(field),
            esc(b),
            esc(c)
        );
    };
    for added in &diff.added {
        row("added", added.significance, &added.key, "", "", "");
    }
    for removed in &diff.removed {
        row("removed", removed.significance, &removed.key, "", "", "");
    }
    for modified in &diff.modified {
        for change in &modified.changes {
            row(
                "modified",
                change.significance,
                &modified.key,
                &change.field,
                &change.baseline,
                &change.compare,
            );
        }
    }
    out.push_str("</table></body></html>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::engine::diff;
    use crate::har::{Content, Creator, Entry, Request, Response, wrap_entries};
    use chrono::Utc;

    fn entry(url: &str, status: i64, size: i64, rtype: &str) -> Entry {
        Entry {
            started_date_time: Utc::now(),
            time: 5.0,
            request: Request {
                url: url.into(),
                ..Default::default()
            },
            response: Response {
                status,
                content: Content {
                    size,
                    mime_type: "text/html".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
            resource_type: Some(rtype.into()),
            ..Default::default()
        }
    }

    fn sample_diff() -> DiffResult {
        let baseline = wrap_entries(
            vec![entry("https://example.com/", 200, 100, "document")],
            Creator::default(),
        );
        let compare = wrap_entries(
            vec![
                entry("https://example.com/", 200, 110, "document"),
                entry("https://example.com/b.js", 200, 10, "script"),
            ],
            Creator::default(),
        );
        diff("base", &baseline, "cmp", &compare)
    }

    #[test]
    fn json_render_roundtrips() {
        let bytes = render(&sample_diff(), ReportFormat::Json, Significance::Low).unwrap();
        let parsed: DiffResult = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.added.len(), 1);
    }

    #[test]
    fn text_render_mentions_every_change() {
        let text =
            String::from_utf8(render(&sample_diff(), ReportFormat::Text, Significance::Low).unwrap())
                .unwrap();
        assert!(text.contains("+ [high] GET https://example.com/b.js"));
        assert!(text.contains("bodySize"));
    }

    #[test]
    fn csv_has_header_plus_rows() {
        let csv =
            String::from_utf8(render(&sample_diff(), ReportFormat::Csv, Significance::Low).unwrap())
                .unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], "kind,significance,key,field,baseline,compare");
        // one added + one bodySize change
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn html_escapes_and_marks_significance() {
        let html =
            String::from_utf8(render(&sample_diff(), ReportFormat::Html, Significance::Low).unwrap())
                .unwrap();
        assert!(html.contains("class=\"high\""));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn min_significance_filters_rows() {
        let csv = String::from_utf8(
            render(&sample_diff(), ReportFormat::Csv, Significance::High).unwrap(),
        )
        .unwrap();
        let lines: Vec<_> = csv.lines().collect();
        // only the added critical script survives
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("added,high"));
    }

    #[test]
    fn format_parsing() {
        assert_eq!(ReportFormat::parse("HTML"), Some(ReportFormat::Html));
        assert_eq!(ReportFormat::parse("txt"), Some(ReportFormat::Text));
        assert_eq!(ReportFormat::parse("yaml"), None);
    }
}
