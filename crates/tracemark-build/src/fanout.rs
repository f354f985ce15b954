//! Per-recipient builds driven by a recipient list.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::error::{BuildError, Result};
use crate::pipeline::{BuildOrchestrator, BuildReport};
use crate::request::BuildRequest;

const RECIPIENT_COLUMNS: [&str; 2] = ["recipient", "id"];

/// Recipients from CSV text whose header names a `recipient` or `id`
/// column. Blank cells and repeated recipients are dropped; `#` starts a
/// comment line. Quoted cells may contain commas but not line breaks.
pub fn parse_recipients(text: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers().map_err(list_error)?;
    if headers.iter().all(str::is_empty) {
        return Err(BuildError::Request("recipient list is empty".into()));
    }
    let column = headers
        .iter()
        .position(|cell| {
            RECIPIENT_COLUMNS
                .iter()
                .any(|name| cell.eq_ignore_ascii_case(name))
        })
        .ok_or_else(|| {
            BuildError::Request("recipient list needs a `recipient` or `id` column".into())
        })?;

    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(list_error)?;
        let Some(cell) = record.get(column).filter(|c| !c.is_empty()) else {
            continue;
        };
        // An unbalanced quote swallows the following rows into one cell.
        if cell.contains(['\n', '\r']) {
            return Err(BuildError::Request(format!(
                "recipient on row {} spans several lines; check for an unbalanced quote",
                row + 1
            )));
        }
        if seen.insert(cell.to_string()) {
            out.push(cell.to_string());
        } else {
            warn!(recipient = %cell, "duplicate recipient ignored");
        }
    }
    Ok(out)
}

fn list_error(e: csv::Error) -> BuildError {
    BuildError::Request(format!("recipient list: {e}"))
}

/// Directory name for a recipient's output. Anything outside
/// `[A-Za-z0-9._@-]` becomes `_`.
pub fn recipient_dir_name(recipient: &str) -> String {
    let name: String = recipient
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match name.trim_matches('.') {
        "" => "recipient".into(),
        trimmed => trimmed.to_string(),
    }
}

/// Result of one recipient's build.
#[derive(Debug)]
pub struct FanoutResult {
    pub recipient: String,
    pub result: Result<BuildReport>,
}

/// Build `base` once per recipient, each into its own subdirectory of the
/// base output directory. A failing recipient does not stop the others;
/// every attempt is recorded.
pub fn fanout(
    orchestrator: &BuildOrchestrator<'_>,
    base: &BuildRequest,
    recipients: &[String],
) -> Vec<FanoutResult> {
    let root = orchestrator.output_dir_for(base);
    let mut used = BTreeSet::new();
    let mut results = Vec::with_capacity(recipients.len());

    for recipient in recipients {
        let mut dir = recipient_dir_name(recipient);
        let mut n = 2;
        while !used.insert(dir.clone()) {
            dir = format!("{}-{n}", recipient_dir_name(recipient));
            n += 1;
        }
        let request = base
            .clone()
            .recipient(recipient.clone())
            .output_dir(root.join(&dir));
        let result = orchestrator.run(&request);
        if let Err(e) = &result {
            warn!(%recipient, error = %e, "fanout build failed");
        }
        results.push(FanoutResult {
            recipient: recipient.clone(),
            result,
        });
    }

    info!(
        recipients = recipients.len(),
        failed = results.iter().filter(|r| r.result.is_err()).count(),
        "fanout finished"
    );
    results
}
