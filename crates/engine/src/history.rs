//! Bounded per-alert execution history with change-rate detection.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use probe_common::{Level, ProbeResult, Row};

/// Default number of records kept per alert name.
pub const DEFAULT_MAX_RECORDS: usize = 1000;

const CONTENT_PREVIEW_CHARS: usize = 200;
const CONTRACT_COLUMNS: [&str; 4] = ["alert_name", "is_warning", "alert_info", "status"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub alert_name: String,
    pub level: Level,
    pub triggered: bool,
    pub value: Option<f64>,
    pub content: String,
    pub row_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRate {
    pub current: f64,
    pub previous: f64,
    pub change: f64,
    /// Percent change against the previous value, rounded to two decimals.
    pub change_rate: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub is_anomaly: bool,
    pub change_rate: f64,
    pub message: String,
}

impl ChangeRate {
    pub fn between(current: f64, previous: f64) -> Self {
        let change = current - previous;
        let rate = if previous != 0.0 {
            change / previous.abs() * 100.0
        } else if change > 0.0 {
            100.0
        } else {
            0.0
        };

        let trend = if rate.abs() < 1.0 {
            Trend::Stable
        } else if rate > 0.0 {
            Trend::Up
        } else {
            Trend::Down
        };

        Self {
            current,
            previous,
            change,
            change_rate: (rate * 100.0).round() / 100.0,
            trend,
        }
    }
}

impl Anomaly {
    fn judge(change: &ChangeRate, threshold: f64) -> Self {
        let is_anomaly = change.change_rate.abs() >= threshold;
        let message = if is_anomaly {
            format!(
                "value moved from {} to {} ({:+.2}%), threshold {}%",
                change.previous, change.current, change.change_rate, threshold
            )
        } else {
            format!("change {:+.2}% within threshold {}%", change.change_rate, threshold)
        };

        Self {
            is_anomaly,
            change_rate: change.change_rate,
            message,
        }
    }
}

/// Numeric value to track for a result set: the named column of the first
/// row, or the first numeric non-contract column when no name is given.
pub fn tracked_value(rows: &[Row], column: Option<&str>) -> Option<f64> {
    let row = rows.first()?;
    let numeric = |value: &serde_json::Value| match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };

    match column {
        Some(name) => row
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| numeric(value)),
        None => row
            .iter()
            .filter(|(key, _)| {
                !CONTRACT_COLUMNS
                    .iter()
                    .any(|c| key.eq_ignore_ascii_case(c))
            })
            .find_map(|(_, value)| numeric(value)),
    }
}

#[derive(Debug)]
pub struct AlertHistory {
    max_records: usize,
    records: DashMap<String, VecDeque<AlertRecord>>,
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS)
    }
}

impl AlertHistory {
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            records: DashMap::new(),
        }
    }

    pub fn record(&self, result: &ProbeResult, value: Option<f64>) {
        let record = AlertRecord {
            alert_name: result.alert_name.clone(),
            level: result.level,
            triggered: result.is_warning,
            value,
            content: result.alert_info.chars().take(CONTENT_PREVIEW_CHARS).collect(),
            row_count: result.row_count,
            timestamp: result.executed_at,
        };

        let mut entries = self.records.entry(result.alert_name.clone()).or_default();
        entries.push_back(record);
        while entries.len() > self.max_records {
            entries.pop_front();
        }
    }

    /// Most recent records first, at most `limit`.
    pub fn get(&self, alert_name: &str, limit: usize) -> Vec<AlertRecord> {
        self.records
            .get(alert_name)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|e| e.key().clone()).collect()
    }

    /// Change between the last two records of `alert_name`, when both carry a value.
    pub fn change_rate(&self, alert_name: &str) -> Option<ChangeRate> {
        let values: Vec<f64> = self
            .get(alert_name, 2)
            .into_iter()
            .filter_map(|r| r.value)
            .collect();
        let &[current, previous] = values.as_slice() else {
            return None;
        };
        Some(ChangeRate::between(current, previous))
    }

    /// Flag an anomaly when the latest change rate reaches `threshold` percent.
    pub fn detect_anomaly(&self, alert_name: &str, threshold: f64, min_records: usize) -> Anomaly {
        if self.get(alert_name, min_records).len() < min_records {
            return Anomaly {
                is_anomaly: false,
                change_rate: 0.0,
                message: format!("not enough history (need at least {} records)", min_records),
            };
        }

        match self.change_rate(alert_name) {
            Some(change) => Anomaly::judge(&change, threshold),
            None => Anomaly {
                is_anomaly: false,
                change_rate: 0.0,
                message: "change rate unavailable".to_string(),
            },
        }
    }

    /// Judge a value that is about to be recorded against the latest recorded one.
    ///
    /// Returns `None` when there is no previous value to compare with.
    pub fn projected_anomaly(&self, alert_name: &str, value: f64, threshold: f64) -> Option<Anomaly> {
        let previous = self
            .records
            .get(alert_name)?
            .iter()
            .rev()
            .find_map(|r| r.value)?;
        Some(Anomaly::judge(&ChangeRate::between(value, previous), threshold))
    }

    pub fn clear(&self, alert_name: &str) {
        self.records.remove(alert_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(name: &str) -> ProbeResult {
        ProbeResult::new(Level::Info, false, None, name, "ok")
    }

    #[test]
    fn test_history_is_bounded_and_newest_first() {
        let history = AlertHistory::new(3);
        for v in 0..5 {
            history.record(&result("dau"), Some(v as f64));
        }
        let records = history.get("dau", 10);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].value, Some(4.0));
        assert_eq!(records[2].value, Some(2.0));
        assert_eq!(history.names(), vec!["dau".to_string()]);
    }

    #[test]
    fn test_change_rate() {
        let history = AlertHistory::default();
        history.record(&result("dau"), Some(200.0));
        assert!(history.change_rate("dau").is_none());

        history.record(&result("dau"), Some(50.0));
        let change = history.change_rate("dau").unwrap();
        assert_eq!(change.change, -150.0);
        assert_eq!(change.change_rate, -75.0);
        assert_eq!(change.trend, Trend::Down);
    }

    #[test]
    fn test_change_rate_from_zero() {
        let history = AlertHistory::default();
        history.record(&result("x"), Some(0.0));
        history.record(&result("x"), Some(5.0));
        assert_eq!(history.change_rate("x").unwrap().change_rate, 100.0);
    }

    #[test]
    fn test_detect_anomaly() {
        let history = AlertHistory::default();
        history.record(&result("dau"), Some(100.0));
        assert!(!history.detect_anomaly("dau", 50.0, 2).is_anomaly);

        history.record(&result("dau"), Some(120.0));
        assert!(!history.detect_anomaly("dau", 50.0, 2).is_anomaly);

        history.record(&result("dau"), Some(250.0));
        let anomaly = history.detect_anomaly("dau", 50.0, 2);
        assert!(anomaly.is_anomaly);
        assert!(anomaly.change_rate > 100.0);
    }

    #[test]
    fn test_projected_anomaly() {
        let history = AlertHistory::default();
        assert!(history.projected_anomaly("dau", 10.0, 50.0).is_none());

        history.record(&result("dau"), Some(100.0));
        assert!(!history.projected_anomaly("dau", 140.0, 50.0).unwrap().is_anomaly);
        assert!(history.projected_anomaly("dau", 40.0, 50.0).unwrap().is_anomaly);
        // Projection does not record
        assert_eq!(history.get("dau", 10).len(), 1);
    }

    #[test]
    fn test_tracked_value() {
        let rows: Vec<Row> = vec![
            json!({ "is_warning": 0, "alert_info": "x", "Total": "42.5", "other": 7 })
                .as_object()
                .cloned()
                .unwrap(),
        ];
        assert_eq!(tracked_value(&rows, Some("total")), Some(42.5));
        assert_eq!(tracked_value(&rows, Some("missing")), None);
        assert!(tracked_value(&rows, None).is_some());
        assert_eq!(tracked_value(&[], None), None);
    }
}
