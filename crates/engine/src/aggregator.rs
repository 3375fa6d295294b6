//! Batch aggregation and pipeline-interrupt policy.

use uuid::Uuid;

use probe_common::{BatchReport, EngineConfig, Level, PipelineInterrupt, ProbeError, ProbeResult};

/// Decides which results halt the invoking pipeline.
///
/// While `enabled`, CRITICAL always interrupts and ERROR interrupts when
/// `error_interrupts` is set. Suppressed results never interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptPolicy {
    pub enabled: bool,
    pub error_interrupts: bool,
}

impl Default for InterruptPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            error_interrupts: true,
        }
    }
}

impl From<&EngineConfig> for InterruptPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            enabled: config.interrupt_on_error,
            error_interrupts: true,
        }
    }
}

impl InterruptPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            error_interrupts: false,
        }
    }

    /// Apply a call-level `interrupt_on_error` setting.
    ///
    /// `Some(true)` turns interrupts on for the call even when the instance
    /// switch is off. `Some(false)` stops ERROR from interrupting; CRITICAL
    /// still does if the instance switch is on.
    pub fn with_override(self, interrupt_on_error: Option<bool>) -> Self {
        match interrupt_on_error {
            Some(true) => Self {
                enabled: true,
                error_interrupts: true,
            },
            Some(false) => Self {
                error_interrupts: false,
                ..self
            },
            None => self,
        }
    }

    pub fn interrupts(&self, result: &ProbeResult) -> bool {
        if !self.enabled || result.suppressed {
            return false;
        }
        match result.level {
            Level::Critical => true,
            Level::Error => self.error_interrupts,
            _ => false,
        }
    }

    /// Raise the interrupt signal for a single result, if it qualifies.
    pub fn check(&self, result: &ProbeResult) -> Result<(), ProbeError> {
        if self.interrupts(result) {
            tracing::warn!(
                alert_name = %result.alert_name,
                level = %result.level,
                "Pipeline interrupted"
            );
            return Err(PipelineInterrupt::new(result.clone()).into());
        }
        Ok(())
    }
}

/// Collects results of a sequential batch in declaration order.
#[derive(Debug)]
pub struct BatchAggregator {
    batch_id: Uuid,
    results: Vec<ProbeResult>,
    highest_level: Level,
}

impl Default for BatchAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchAggregator {
    pub fn new() -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            results: Vec::new(),
            highest_level: Level::Info,
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Record a finished probe. When `policy` marks it as interrupting, the
    /// batch stops: the returned error carries the cause and the partial report.
    pub fn record(&mut self, result: ProbeResult, policy: &InterruptPolicy) -> Result<(), ProbeError> {
        self.highest_level = self.highest_level.max(result.level);
        let interrupts = policy.interrupts(&result);
        self.results.push(result);

        if !interrupts {
            return Ok(());
        }

        let Some(cause) = self.results.last().cloned() else {
            return Ok(());
        };
        tracing::warn!(
            batch_id = %self.batch_id,
            alert_name = %cause.alert_name,
            level = %cause.level,
            completed = self.results.len(),
            "Batch interrupted"
        );

        let report = BatchReport {
            batch_id: self.batch_id,
            results: self.results.clone(),
            highest_level: self.highest_level,
            interrupted: true,
            interrupt_cause: Some(cause.clone()),
        };
        Err(PipelineInterrupt::new(cause).with_report(report).into())
    }

    pub fn finish(self) -> BatchReport {
        tracing::info!(
            batch_id = %self.batch_id,
            probes = self.results.len(),
            highest_level = %self.highest_level,
            "Batch completed"
        );
        BatchReport {
            batch_id: self.batch_id,
            results: self.results,
            highest_level: self.highest_level,
            interrupted: false,
            interrupt_cause: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_common::Suppression;

    fn result(level: Level) -> ProbeResult {
        ProbeResult::new(level, level.is_failing(), None, format!("{}", level), "info")
    }

    #[test]
    fn test_policy_levels() {
        let policy = InterruptPolicy::default();
        assert!(!policy.interrupts(&result(Level::Info)));
        assert!(!policy.interrupts(&result(Level::Warning)));
        assert!(policy.interrupts(&result(Level::Error)));
        assert!(policy.interrupts(&result(Level::Critical)));

        let critical_only = policy.with_override(Some(false));
        assert!(!critical_only.interrupts(&result(Level::Error)));
        assert!(critical_only.interrupts(&result(Level::Critical)));
        assert_eq!(policy.with_override(None), policy);

        assert!(!InterruptPolicy::disabled().interrupts(&result(Level::Critical)));
    }

    #[test]
    fn test_call_level_enable_overrides_instance_switch() {
        let off = InterruptPolicy::disabled();
        let enabled = off.with_override(Some(true));
        assert!(enabled.interrupts(&result(Level::Error)));
        assert!(enabled.interrupts(&result(Level::Critical)));

        let still_off = off.with_override(Some(false));
        assert!(!still_off.interrupts(&result(Level::Critical)));
    }

    #[test]
    fn test_suppressed_never_interrupts() {
        let policy = InterruptPolicy::default();
        let suppressed = result(Level::Critical).with_suppression(Suppression::Duplicate);
        assert!(!policy.interrupts(&suppressed));
    }

    #[test]
    fn test_batch_stops_at_first_interrupting_result() {
        let mut batch = BatchAggregator::new();
        let policy = InterruptPolicy::default();
        batch.record(result(Level::Info), &policy).unwrap();
        batch.record(result(Level::Warning), &policy).unwrap();

        let err = batch.record(result(Level::Error), &policy).unwrap_err();
        let interrupt = err.as_interrupt().unwrap();
        assert_eq!(interrupt.cause.level, Level::Error);

        let report = interrupt.report.as_ref().unwrap();
        assert!(report.interrupted);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.highest_level, Level::Error);
        assert_eq!(report.interrupt_cause.as_ref().unwrap().alert_name, "ERROR");
    }

    #[test]
    fn test_batch_without_interrupt_reports_highest() {
        let mut batch = BatchAggregator::new();
        let policy = InterruptPolicy::disabled();
        for level in [Level::Info, Level::Critical, Level::Warning] {
            batch.record(result(level), &policy).unwrap();
        }
        let report = batch.finish();
        assert!(!report.interrupted);
        assert_eq!(report.highest_level, Level::Critical);
        assert_eq!(report.results.len(), 3);
        assert!(report.interrupt_cause.is_none());
    }

    #[test]
    fn test_empty_batch() {
        let report = BatchAggregator::new().finish();
        assert_eq!(report.highest_level, Level::Info);
        assert_eq!(report.summary(), "No checks executed");
    }
}
