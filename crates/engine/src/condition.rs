//! Declarative aggregation conditions.
//!
//! A condition aggregates one column across the result set and compares the
//! value against a threshold. Conditions combine with ALL (AND) or ANY (OR)
//! and synthesize the `is_warning`/`status` pair the resolver consumes.

use serde::Deserialize;

use probe_common::{Row, Status};

use crate::contract::Evaluation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Max,
    Min,
    Count,
    First,
    Last,
}

impl Aggregation {
    fn apply(&self, values: &[f64]) -> Option<f64> {
        let first = *values.first()?;
        Some(match self {
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Max => values.iter().copied().fold(first, f64::max),
            Aggregation::Min => values.iter().copied().fold(first, f64::min),
            Aggregation::Count => values.len() as f64,
            Aggregation::First => first,
            Aggregation::Last => *values.last()?,
        })
    }

    fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
            Aggregation::Count => "count",
            Aggregation::First => "first",
            Aggregation::Last => "last",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Operator {
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = ">=", alias = "gte")]
    Gte,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "lte")]
    Lte,
    #[serde(rename = "==", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "neq")]
    Neq,
}

impl Operator {
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Gte => value >= threshold,
            Operator::Lt => value < threshold,
            Operator::Lte => value <= threshold,
            Operator::Eq => value == threshold,
            Operator::Neq => value != threshold,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Eq => "==",
            Operator::Neq => "!=",
        }
    }
}

/// Outcome of one condition.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionOutcome {
    pub triggered: bool,
    pub value: Option<f64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggregationCondition {
    pub column: String,
    #[serde(default = "default_aggregation")]
    pub aggregation: Aggregation,
    #[serde(default = "default_operator")]
    pub operator: Operator,
    #[serde(default)]
    pub threshold: f64,
}

fn default_aggregation() -> Aggregation {
    Aggregation::First
}

fn default_operator() -> Operator {
    Operator::Gt
}

impl AggregationCondition {
    pub fn new(column: impl Into<String>, aggregation: Aggregation, operator: Operator, threshold: f64) -> Self {
        Self {
            column: column.into(),
            aggregation,
            operator,
            threshold,
        }
    }

    /// Numeric values of the column, skipping nulls and non-numeric cells.
    /// `count` over `*` counts rows.
    fn values(&self, rows: &[Row]) -> Vec<f64> {
        if self.column == "*" {
            return vec![1.0; rows.len()];
        }
        rows.iter()
            .filter_map(|row| {
                row.iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(&self.column))
                    .map(|(_, value)| value)
            })
            .filter_map(|value| match value {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            })
            .collect()
    }

    pub fn evaluate(&self, rows: &[Row]) -> ConditionOutcome {
        let label = format!("{}({})", self.aggregation.as_str(), self.column);

        let Some(value) = self.aggregation.apply(&self.values(rows)) else {
            return ConditionOutcome {
                triggered: false,
                value: None,
                message: format!("{}: no numeric values", label),
            };
        };

        let triggered = self.operator.compare(value, self.threshold);
        ConditionOutcome {
            triggered,
            value: Some(value),
            message: format!(
                "{} = {:.2} ({} {}): {}",
                label,
                value,
                self.operator.as_str(),
                self.threshold,
                if triggered { "triggered" } else { "ok" }
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    #[default]
    All,
    Any,
}

/// One or more conditions combined with a single logic operator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConditionSet {
    pub conditions: Vec<AggregationCondition>,
    #[serde(default)]
    pub logic: Logic,
    /// Status attached when the set triggers.
    #[serde(default = "default_status")]
    pub status: Status,
}

fn default_status() -> Status {
    Status::AbnormalYellow
}

impl ConditionSet {
    pub fn all(conditions: Vec<AggregationCondition>) -> Self {
        Self {
            conditions,
            logic: Logic::All,
            status: default_status(),
        }
    }

    pub fn any(conditions: Vec<AggregationCondition>) -> Self {
        Self {
            logic: Logic::Any,
            ..Self::all(conditions)
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn evaluate(&self, rows: &[Row], alert_name: &str) -> Evaluation {
        let outcomes: Vec<ConditionOutcome> =
            self.conditions.iter().map(|c| c.evaluate(rows)).collect();

        let (triggered, joiner) = match self.logic {
            Logic::All => (
                !outcomes.is_empty() && outcomes.iter().all(|o| o.triggered),
                " AND ",
            ),
            Logic::Any => (outcomes.iter().any(|o| o.triggered), " OR "),
        };

        let message = outcomes
            .iter()
            .map(|o| o.message.as_str())
            .collect::<Vec<_>>()
            .join(joiner);

        Evaluation {
            is_warning: triggered,
            status: triggered.then(|| self.status.clone()),
            alert_name: alert_name.to_string(),
            alert_info: message,
            row_count: rows.len(),
        }
    }
}
