//! Markdown rendering of composed reports.
//!
//! Operator-entered text (results, comments) is escaped so it cannot introduce headings,
//! code fences, horizontal rules or extra table cells. Documents in a multi-document report
//! are separated by [`PAGE_BREAK`] so each starts on a new printed page.

use super::{DescriptiveSection, Document, DocumentBody, Report, TableSection};
use crate::constants::NOT_COMPUTABLE;

/// Marker placed between documents; renders as a page break when printed from HTML.
pub const PAGE_BREAK: &str = "<div style=\"page-break-before: always\"></div>";

/// Render every document of a report into one printable artifact.
pub fn render_report(report: &Report) -> String {
    report
        .documents
        .iter()
        .map(render_document)
        .collect::<Vec<_>>()
        .join(&format!("\n{PAGE_BREAK}\n\n"))
}

pub fn render_document(document: &Document) -> String {
    let mut output = String::new();

    let letterhead = &document.letterhead;
    output.push_str(&format!("# {}\n", escape_inline(&letterhead.name)));
    for line in [&letterhead.address, &letterhead.contact].into_iter().flatten() {
        output.push_str(&format!("{}\n", escape_inline(line)));
    }
    output.push('\n');

    let id = &document.identification;
    output.push_str(&format!("**Reference No:** {}\n", id.order_id));
    output.push_str(&format!("**Patient:** {}\n", escape_inline(&id.patient_name)));
    output.push_str(&format!("**Age:** {}\n", id.age));
    output.push_str(&format!("**Gender:** {}\n", id.gender));
    output.push_str(&format!("**Referred By:** {}\n", escape_inline(&id.referred_by)));
    output.push_str(&format!("**Date:** {}\n\n", id.ordered_on.format("%Y-%m-%d")));

    output.push_str(&format!("## {}\n\n", document.title.to_uppercase()));

    match &document.body {
        DocumentBody::Tabular(sections) => {
            for section in sections {
                render_table(&mut output, section);
            }
        }
        DocumentBody::Descriptive(sections) => {
            for section in sections {
                render_descriptive(&mut output, section);
            }
        }
    }

    output.push_str("### Comment\n\n");
    output.push_str(&escape_body(&document.comment));
    output.push_str("\n\n---\n\n");

    let footer = &document.footer;
    output.push_str(&format!(
        "Performed by: {}\n",
        escape_inline(&footer.captured_by)
    ));
    output.push_str(&format!(
        "Authorized by: {} on {}\n",
        escape_inline(&footer.authorized_by),
        footer.authorized_at.format("%Y-%m-%d %H:%M UTC")
    ));
    output
}

fn render_heading(output: &mut String, heading: Option<&String>) {
    if let Some(heading) = heading {
        output.push_str(&format!("### {}\n\n", escape_inline(heading)));
    }
}

fn render_table(output: &mut String, section: &TableSection) {
    render_heading(output, section.heading.as_ref());
    let with_derived = section.rows.iter().any(|row| row.derived.is_some());

    if with_derived {
        output.push_str("| Test | Result | Absolute Count | Unit | Reference Range | Flag |\n");
        output.push_str("|---|---|---|---|---|---|\n");
    } else {
        output.push_str("| Test | Result | Unit | Reference Range | Flag |\n");
        output.push_str("|---|---|---|---|---|\n");
    }

    for row in &section.rows {
        let mut cells = vec![escape_cell(&row.parameter), escape_cell(&row.result)];
        if with_derived {
            cells.push(escape_cell(row.derived.as_deref().unwrap_or(NOT_COMPUTABLE)));
        }
        cells.push(escape_cell(row.unit.as_deref().unwrap_or_default()));
        cells.push(escape_cell(row.reference_range.as_deref().unwrap_or_default()));
        cells.push(row.flag.map(|f| f.to_string()).unwrap_or_default());
        output.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    output.push('\n');
}

fn render_descriptive(output: &mut String, section: &DescriptiveSection) {
    render_heading(output, section.heading.as_ref());
    output.push_str("| Test | Result |\n|---|---|\n");
    for row in &section.rows {
        output.push_str(&format!(
            "| {} | {} |\n",
            escape_cell(&row.parameter),
            escape_cell(&row.value)
        ));
    }
    output.push('\n');
}

/// Escape a block of free text.
///
/// - `#` at line start → `\#`
/// - standalone `---`, `***`, `___` → escaped
/// - triple backticks → escaped
fn escape_body(body: &str) -> String {
    body.lines()
        .map(|line| {
            let trimmed = line.trim();
            if line.trim_start().starts_with('#') {
                line.replacen('#', r"\#", 1)
            } else if trimmed == "---" || trimmed == "***" || trimmed == "___" {
                format!(r"\{trimmed}")
            } else {
                line.replace("```", r"\`\`\`")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_inline(text: &str) -> String {
    escape_body(text).replace('\n', " ")
}

fn escape_cell(text: &str) -> String {
    escape_inline(text).replace('|', r"\|")
}
