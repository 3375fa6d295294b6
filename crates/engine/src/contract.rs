//! SQL result contract.
//!
//! A probe query returns rows with the columns `is_warning` (required),
//! `alert_info`, `status` and `alert_name`. Column names match
//! case-insensitively. Every row is read; the probe warns if any row does.

use serde::Deserialize;
use serde_json::Value;

use probe_common::{ProbeError, Row, Status};

use crate::resolver::{DEFAULT_ALERT_NAME, classify};

/// One row of the contract after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractRow {
    pub is_warning: bool,
    pub status: Option<Status>,
    pub alert_name: Option<String>,
    pub alert_info: String,
}

/// Synthesized probe outcome handed to the level resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub is_warning: bool,
    pub status: Option<Status>,
    pub alert_name: String,
    pub alert_info: String,
    pub row_count: usize,
}

/// How a query that returned no rows is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyResultPolicy {
    #[default]
    #[serde(alias = "ok")]
    Info,
    Warning,
    Error,
}

impl EmptyResultPolicy {
    pub fn evaluate(&self, alert_name: &str) -> Evaluation {
        let (is_warning, status, info) = match self {
            EmptyResultPolicy::Info => (false, None, "Query returned no rows (treated as OK)"),
            EmptyResultPolicy::Warning => (
                true,
                Some(Status::AbnormalYellow),
                "Query returned no rows (treated as warning)",
            ),
            EmptyResultPolicy::Error => (
                true,
                Some(Status::AbnormalRed),
                "Query returned no rows (treated as error)",
            ),
        };

        Evaluation {
            is_warning,
            status,
            alert_name: alert_name.to_string(),
            alert_info: info.to_string(),
            row_count: 0,
        }
    }
}

/// Case-insensitive column lookup. Explicit nulls count as absent.
fn column<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    row.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
        .filter(|value| !value.is_null())
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Validate one row against the contract.
pub fn parse_row(row: &Row) -> Result<ContractRow, ProbeError> {
    let raw = column(row, "is_warning")
        .ok_or_else(|| ProbeError::InvalidInput("missing required column is_warning".into()))?;
    let is_warning = parse_flag(raw).ok_or_else(|| {
        ProbeError::InvalidInput(format!("is_warning must be 0/1, got {}", raw))
    })?;

    Ok(ContractRow {
        is_warning,
        status: column(row, "status").map(|v| Status::parse(&text(v))),
        alert_name: column(row, "alert_name")
            .map(text)
            .filter(|name| !name.trim().is_empty()),
        alert_info: column(row, "alert_info").map(text).unwrap_or_default(),
    })
}

/// Fold every row of a result set into one evaluation.
///
/// `name` takes precedence over the first row's `alert_name`.
pub fn evaluate_rows(
    rows: &[Row],
    name: Option<&str>,
    empty: EmptyResultPolicy,
) -> Result<Evaluation, ProbeError> {
    if rows.is_empty() {
        return Ok(empty.evaluate(name.unwrap_or(DEFAULT_ALERT_NAME)));
    }

    let parsed = rows.iter().map(parse_row).collect::<Result<Vec<_>, _>>()?;

    let alert_name = name
        .map(str::to_string)
        .or_else(|| parsed[0].alert_name.clone())
        .unwrap_or_else(|| DEFAULT_ALERT_NAME.to_string());

    let warning: Vec<&ContractRow> = parsed.iter().filter(|r| r.is_warning).collect();

    // Most severe warning row decides the status; first one wins ties.
    let status = warning
        .iter()
        .copied()
        .fold(None::<&ContractRow>, |worst, row| match worst {
            Some(w) if classify(true, w.status.as_ref()) >= classify(true, row.status.as_ref()) => {
                Some(w)
            }
            _ => Some(row),
        })
        .and_then(|row| row.status.clone());

    let alert_info = match warning.as_slice() {
        [] if parsed.len() == 1 => parsed[0].alert_info.clone(),
        [] => format!("All {} rows passed", parsed.len()),
        [only] => only.alert_info.clone(),
        many => {
            let mut lines = vec![format!("{} alerts:", many.len())];
            for (i, row) in many.iter().enumerate() {
                let status = row
                    .status
                    .as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| Status::AbnormalYellow.to_string());
                lines.push(format!("  {}. [{}] {}", i + 1, status, row.alert_info));
            }
            lines.join("\n")
        }
    };

    Ok(Evaluation {
        is_warning: !warning.is_empty(),
        status,
        alert_name,
        alert_info,
        row_count: parsed.len(),
    })
}
