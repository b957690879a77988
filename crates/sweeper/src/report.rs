//! Batch outcome records and report rendering.
//!
//! Every identifier a batch touches yields one [`Record`]; the collected
//! [`Report`] renders as plain text for the terminal or as the HTML table
//! shape used in emailed summaries. Delivery itself (email, history
//! stores) is out of scope here.

use crate::{Decision, Error, Outcome, ResourceKind};

/// One `(resource, decision/outcome, reason)` row.
#[derive(Clone, Debug, serde::Serialize)]
pub struct Record {
    pub id: String,
    pub kind: ResourceKind,
    pub status: String,
    pub detail: String,
}

impl Record {
    pub fn decision(id: impl Into<String>, kind: ResourceKind, decision: &Decision) -> Self {
        let detail = match decision {
            Decision::Deletable => String::new(),
            Decision::Blocked { reasons } => reasons.join("; "),
        };
        Record {
            id: id.into(),
            kind,
            status: decision.to_string(),
            detail,
        }
    }

    pub fn outcome(id: impl Into<String>, kind: ResourceKind, outcome: &Outcome) -> Self {
        let detail = match outcome {
            Outcome::Deleted => String::new(),
            Outcome::Resized {
                applied_to,
                instance_class,
            } => format!("'{applied_to}' set to {instance_class}"),
            Outcome::Blocked { reasons } => reasons.join("; "),
            Outcome::Skipped => "operator exception".to_owned(),
            Outcome::Partial { done, failed } => format!("{done}; {failed}"),
        };
        Record {
            id: id.into(),
            kind,
            status: outcome.to_string(),
            detail,
        }
    }

    pub fn error(id: impl Into<String>, kind: ResourceKind, error: &Error) -> Self {
        Record {
            id: id.into(),
            kind,
            status: "failed".to_owned(),
            detail: error.to_string(),
        }
    }
}

/// An ordered batch of records.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct Report {
    records: Vec<Record>,
}

impl Report {
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render as a bordered HTML table, one row per record. Cell contents
    /// (identifiers and raw provider error text) are escaped.
    pub fn to_html_table(&self) -> String {
        let mut html = String::from("<table border=\"1\"><tr>");
        for header in ["Resource", "Kind", "Status", "Detail"] {
            html.push_str(&format!("<th>{header}</th>"));
        }
        html.push_str("</tr>");
        for record in &self.records {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&record.id),
                escape(&record.kind.to_string()),
                escape(&record.status),
                escape(&record.detail)
            ));
        }
        html.push_str("</table>");
        html
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl core::fmt::Display for Report {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.records.is_empty() {
            return f.write_str("No resources processed.\n");
        }
        for record in &self.records {
            if record.detail.is_empty() {
                writeln!(f, "  {} [{}]: {}", record.id, record.kind, record.status)?;
            } else {
                writeln!(
                    f,
                    "  {} [{}]: {} ({})",
                    record.id, record.kind, record.status, record.detail
                )?;
            }
        }
        Ok(())
    }
}
