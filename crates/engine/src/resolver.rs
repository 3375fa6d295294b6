//! Level resolver: maps an evaluated probe outcome to a severity level and
//! detects recoveries against the identity's prior failure state.

use std::sync::Arc;

use probe_common::{Level, ProbeError, ProbeResult, Status};

use crate::contract::Evaluation;
use crate::store::StateStore;

/// Alert name used when neither the caller nor the result rows provide one.
pub const DEFAULT_ALERT_NAME: &str = "SQL Probe Alert";

/// Pure level table, without recovery.
///
/// Unrecognized statuses on a warning row fall back to WARNING; they never fail.
pub fn classify(is_warning: bool, status: Option<&Status>) -> Level {
    if !is_warning {
        return Level::Info;
    }
    match status {
        Some(Status::AbnormalRed) => Level::Error,
        Some(Status::Critical) => Level::Critical,
        Some(Status::AbnormalYellow) | Some(Status::Other(_)) | None => Level::Warning,
    }
}

/// Apply per-probe level overrides. `force` wins outright; `max` caps.
pub fn apply_overrides(level: Level, force: Option<Level>, max: Option<Level>) -> Level {
    if let Some(forced) = force {
        return forced;
    }
    match max {
        Some(cap) if level > cap => cap,
        _ => level,
    }
}

/// Resolves levels and owns the prior-state bookkeeping for alert identities.
pub struct LevelResolver {
    store: Arc<dyn StateStore>,
}

impl LevelResolver {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Resolve an evaluation for `identity`.
    ///
    /// The stored failure flag is swapped atomically: a non-warning evaluation
    /// whose previous flag was failing becomes a SUCCESS recovery, and any
    /// warning evaluation marks the identity failing.
    pub fn resolve(&self, identity: &str, evaluation: &Evaluation) -> Result<ProbeResult, ProbeError> {
        let was_failing = self.store.swap_failing(identity, evaluation.is_warning)?;
        let recovered = !evaluation.is_warning && was_failing;

        let level = if recovered {
            Level::Success
        } else {
            classify(evaluation.is_warning, evaluation.status.as_ref())
        };

        if recovered {
            tracing::info!(identity, "Alert recovered");
        }

        Ok(ProbeResult::new(
            level,
            evaluation.is_warning,
            evaluation.status.clone(),
            &evaluation.alert_name,
            &evaluation.alert_info,
        )
        .with_recovered(recovered)
        .with_row_count(evaluation.row_count))
    }
}
