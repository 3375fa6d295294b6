use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

impl Level {
    /// Display priority, `P0` being the most urgent.
    pub fn priority(&self) -> &'static str {
        match self {
            Level::Critical => "P0",
            Level::Error => "P1",
            Level::Warning => "P2",
            Level::Success => "P3",
            Level::Info => "P4",
        }
    }

    /// Card header color used by the default chat template.
    pub fn color(&self) -> &'static str {
        match self {
            Level::Critical => "red",
            Level::Error => "orange",
            Level::Warning => "yellow",
            Level::Success => "green",
            Level::Info => "blue",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Level::Critical => "🚨",
            Level::Error => "❌",
            Level::Warning => "⚠️",
            Level::Success => "✅",
            Level::Info => "ℹ️",
        }
    }

    /// Whether this level describes a failing state.
    pub fn is_failing(&self) -> bool {
        *self >= Level::Warning
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => write!(f, "INFO"),
            Level::Success => write!(f, "SUCCESS"),
            Level::Warning => write!(f, "WARNING"),
            Level::Error => write!(f, "ERROR"),
            Level::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Level::Info),
            "success" => Ok(Level::Success),
            "warning" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "critical" => Ok(Level::Critical),
            other => Err(format!("unknown level: {}", other)),
        }
    }
}

/// Status tag carried by a probe row.
///
/// The three failing statuses are recognized case-insensitively together with
/// their common aliases. Everything else is kept verbatim as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    AbnormalYellow,
    AbnormalRed,
    Critical,
    Other(String),
}

impl Status {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "abnormalyellow" | "warning" | "yellow" | "warn" => Status::AbnormalYellow,
            "abnormalred" | "error" | "red" | "err" => Status::AbnormalRed,
            "critical" | "urgent" | "fatal" => Status::Critical,
            _ => Status::Other(trimmed.to_string()),
        }
    }

    /// Statuses reserved for failing rows.
    pub fn is_failing(&self) -> bool {
        !matches!(self, Status::Other(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Status::AbnormalYellow => "AbnormalYellow",
            Status::AbnormalRed => "AbnormalRed",
            Status::Critical => "Critical",
            Status::Other(s) => s,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        Status::parse(&value)
    }
}

impl From<Status> for String {
    fn from(value: Status) -> Self {
        value.as_str().to_string()
    }
}

/// Why the gate held a notification back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suppression {
    Duplicate,
    RateLimited,
}

impl std::fmt::Display for Suppression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Suppression::Duplicate => write!(f, "duplicate"),
            Suppression::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Outcome of one probe execution or one direct notification.
///
/// Built once by the processor; later pipeline stages annotate it through the
/// consuming `with_*` methods, which return a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub id: Uuid,
    pub level: Level,
    pub is_warning: bool,
    pub status: Option<Status>,
    pub alert_name: String,
    pub alert_info: String,
    /// True only on a failing → non-failing transition for this alert identity.
    pub recovered: bool,
    pub suppressed: bool,
    pub suppression: Option<Suppression>,
    pub sent: bool,
    /// Number of delivery attempts made (0 when nothing was sent).
    pub attempts: u32,
    pub error: Option<String>,
    pub fingerprint: Option<String>,
    pub channel: Option<String>,
    pub row_count: usize,
    pub executed_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn new(
        level: Level,
        is_warning: bool,
        status: Option<Status>,
        alert_name: impl Into<String>,
        alert_info: impl Into<String>,
    ) -> Self {
        // A non-warning result never carries a failing status.
        let status = if is_warning {
            status
        } else {
            status.filter(|s| !s.is_failing())
        };

        Self {
            id: Uuid::new_v4(),
            level,
            is_warning,
            status,
            alert_name: alert_name.into(),
            alert_info: alert_info.into(),
            recovered: false,
            suppressed: false,
            suppression: None,
            sent: false,
            attempts: 0,
            error: None,
            fingerprint: None,
            channel: None,
            row_count: 0,
            executed_at: Utc::now(),
        }
    }

    pub fn with_recovered(mut self, recovered: bool) -> Self {
        self.recovered = recovered && !self.is_warning;
        self
    }

    pub fn with_row_count(mut self, row_count: usize) -> Self {
        self.row_count = row_count;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_routing(mut self, fingerprint: String, channel: String) -> Self {
        self.fingerprint = Some(fingerprint);
        self.channel = Some(channel);
        self
    }

    pub fn with_suppression(mut self, reason: Suppression) -> Self {
        self.suppressed = true;
        self.suppression = Some(reason);
        self.sent = false;
        self
    }

    pub fn with_delivery(mut self, attempts: u32, error: Option<String>) -> Self {
        self.attempts = attempts;
        self.sent = error.is_none();
        self.error = error;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.sent = false;
        self.error = Some(error.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level >= Level::Error
    }

    pub fn is_critical(&self) -> bool {
        self.level >= Level::Critical
    }
}

/// Summary of a sequential batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// Per-probe outcomes in declaration order.
    pub results: Vec<ProbeResult>,
    pub highest_level: Level,
    pub interrupted: bool,
    /// The first result whose level triggered the interrupt.
    pub interrupt_cause: Option<ProbeResult>,
}

impl BatchReport {
    pub fn triggered(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.iter().filter(|r| r.is_warning)
    }

    /// Human-readable summary of the batch.
    pub fn summary(&self) -> String {
        let triggered: Vec<&ProbeResult> = self.triggered().collect();
        if self.results.is_empty() {
            return "No checks executed".to_string();
        }
        if triggered.is_empty() {
            return format!("All {} checks passed", self.results.len());
        }

        let mut lines = vec![format!(
            "{}/{} checks triggered alerts:",
            triggered.len(),
            self.results.len()
        )];
        for r in triggered {
            let preview: String = if r.alert_info.chars().count() > 50 {
                format!("{}...", r.alert_info.chars().take(50).collect::<String>())
            } else {
                r.alert_info.clone()
            };
            lines.push(format!("  • [{}] {}: {}", r.level, r.alert_name, preview));
        }
        if self.interrupted
            && let Some(cause) = &self.interrupt_cause
        {
            lines.push(format!("Interrupted at: {}", cause.alert_name));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Info < Level::Success);
        assert!(Level::Success < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Critical);
        assert_eq!(Level::Critical.priority(), "P0");
        assert_eq!(Level::Info.priority(), "P4");
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("critical".parse::<Level>().unwrap(), Level::Critical);
        assert_eq!(" Warning ".parse::<Level>().unwrap(), Level::Warning);
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn test_status_aliases() {
        assert_eq!(Status::parse("AbnormalYellow"), Status::AbnormalYellow);
        assert_eq!(Status::parse("abnormalred"), Status::AbnormalRed);
        assert_eq!(Status::parse("Urgent"), Status::Critical);
        assert_eq!(Status::parse("Normal"), Status::Other("Normal".to_string()));
        assert!(!Status::parse("Normal").is_failing());
    }

    #[test]
    fn test_status_serde_roundtrip_keeps_canonical_name() {
        let json = serde_json::to_string(&Status::parse("red")).unwrap();
        assert_eq!(json, "\"AbnormalRed\"");
    }

    #[test]
    fn test_non_warning_result_drops_failing_status() {
        let result = ProbeResult::new(Level::Info, false, Some(Status::AbnormalRed), "n", "i");
        assert_eq!(result.status, None);

        let result = ProbeResult::new(
            Level::Info,
            false,
            Some(Status::Other("Normal".into())),
            "n",
            "i",
        );
        assert_eq!(result.status, Some(Status::Other("Normal".into())));
    }

    #[test]
    fn test_suppression_clears_sent() {
        let result = ProbeResult::new(Level::Warning, true, None, "n", "i")
            .with_suppression(Suppression::Duplicate);
        assert!(result.suppressed);
        assert!(!result.sent);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_batch_summary() {
        let ok = ProbeResult::new(Level::Info, false, None, "a", "fine");
        let bad = ProbeResult::new(Level::Error, true, Some(Status::AbnormalRed), "b", "broken");
        let report = BatchReport {
            batch_id: Uuid::new_v4(),
            results: vec![ok.clone()],
            highest_level: Level::Info,
            interrupted: false,
            interrupt_cause: None,
        };
        assert_eq!(report.summary(), "All 1 checks passed");

        let report = BatchReport {
            results: vec![ok, bad],
            highest_level: Level::Error,
            ..report
        };
        let summary = report.summary();
        assert!(summary.starts_with("1/2 checks triggered alerts:"));
        assert!(summary.contains("[ERROR] b: broken"));
    }
}
