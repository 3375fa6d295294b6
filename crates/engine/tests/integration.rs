//! End-to-end tests for the probe pipeline: resolution, gating, routing,
//! retries and batch interrupts, driven through in-memory collaborators.
//!
//! ```bash
//! cargo test -p probe-engine --test integration
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use probe_common::{
    AsyncTransport, DeliveryError, EngineConfig, Level, Payload, ProbeError, QueryEngine,
    RateLimitScope, RenderContext, Renderer, RetryBackoff, Row, Status, Suppression, Transport,
};
use probe_engine::{
    Aggregation, AggregationCondition, ChannelRouter, ConditionSet, EmptyResultPolicy,
    InterruptPolicy, ManualClock, Notice, Operator, ProbeProcessor, ProbeSpec, RetryPolicy,
};

// ============================================================
// Shared helpers
// ============================================================

/// Renders the context as a flat JSON object. Knows one custom template.
struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, template: Option<&str>, ctx: &RenderContext) -> Result<Payload, ProbeError> {
        if let Some(id) = template
            && id != "compact"
        {
            return Err(ProbeError::UnknownTemplate(id.to_string()));
        }
        Ok(Payload::new(json!({
            "template": template.unwrap_or("default"),
            "level": ctx.level,
            "title": ctx.title,
            "content": ctx.content,
            "source": ctx.source,
            "error_msg": ctx.error_msg,
            "mention_all": ctx.mention_all,
            "mentions": ctx.mentions,
        })))
    }
}

/// Records every attempt; fails with the queued errors first.
#[derive(Default)]
struct RecordingTransport {
    delivered: Mutex<Vec<(Payload, String)>>,
    failures: Mutex<VecDeque<DeliveryError>>,
    attempts: Mutex<u32>,
}

impl RecordingTransport {
    fn failing_with(errors: Vec<DeliveryError>) -> Self {
        Self {
            failures: Mutex::new(errors.into()),
            ..Self::default()
        }
    }

    fn attempt(&self, payload: &Payload, destination: &str) -> Result<(), DeliveryError> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.delivered
            .lock()
            .unwrap()
            .push((payload.clone(), destination.to_string()));
        Ok(())
    }

    fn delivered(&self) -> Vec<(Payload, String)> {
        self.delivered.lock().unwrap().clone()
    }

    fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, payload: &Payload, destination: &str) -> Result<(), DeliveryError> {
        self.attempt(payload, destination)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[async_trait]
impl AsyncTransport for RecordingTransport {
    async fn send(&self, payload: &Payload, destination: &str) -> Result<(), DeliveryError> {
        self.attempt(payload, destination)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Canned result sets keyed by query text; logs every query it runs.
#[derive(Default)]
struct MockQuery {
    results: HashMap<String, Result<Vec<Row>, String>>,
    executed: Mutex<Vec<String>>,
}

impl MockQuery {
    fn with_rows(mut self, sql: &str, rows: Vec<Row>) -> Self {
        self.results.insert(sql.to_string(), Ok(rows));
        self
    }

    fn with_failure(mut self, sql: &str, message: &str) -> Self {
        self.results.insert(sql.to_string(), Err(message.to_string()));
        self
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl QueryEngine for MockQuery {
    fn query(&self, sql: &str) -> Result<Vec<Row>, ProbeError> {
        self.executed.lock().unwrap().push(sql.to_string());
        match self.results.get(sql) {
            Some(Ok(rows)) => Ok(rows.clone()),
            Some(Err(message)) => Err(ProbeError::Query(message.clone())),
            None => Err(ProbeError::Query(format!("unknown table in: {}", sql))),
        }
    }
}

fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn warning_row(status: &str, info: &str) -> Vec<Row> {
    vec![row(json!({ "is_warning": 1, "status": status, "alert_info": info }))]
}

fn ok_row() -> Vec<Row> {
    vec![row(json!({ "is_warning": 0, "alert_info": "all good" }))]
}

struct Harness {
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
    processor: ProbeProcessor,
}

fn harness_with(config: EngineConfig, transport: RecordingTransport) -> Harness {
    let transport = Arc::new(transport);
    let clock = Arc::new(ManualClock::default());
    let processor = ProbeProcessor::new(config, Arc::new(JsonRenderer))
        .with_router(
            ChannelRouter::new()
                .with_route("ops", "https://hooks.example/ops")
                .with_default("https://hooks.example/default"),
        )
        .with_clock(clock.clone())
        .with_transport(transport.clone())
        .with_async_transport(transport.clone())
        .with_retry(RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
            backoff: RetryBackoff::Fixed,
        });
    Harness {
        transport,
        clock,
        processor,
    }
}

fn harness(config: EngineConfig) -> Harness {
    harness_with(config, RecordingTransport::default())
}

// ============================================================
// Level resolution and recovery
// ============================================================

#[test]
fn test_healthy_probe_is_info_and_not_sent() {
    let h = harness(EngineConfig::default());
    let result = h
        .processor
        .execute(&ProbeSpec::rows(ok_row()).with_name("orders"))
        .unwrap();

    assert_eq!(result.level, Level::Info);
    assert!(!result.recovered);
    assert!(!result.sent);
    assert!(!result.suppressed);
    assert_eq!(h.transport.attempts(), 0);
}

#[test]
fn test_recovery_is_success_and_flips_state() {
    let h = harness(EngineConfig::default());
    let failing = ProbeSpec::rows(warning_row("AbnormalRed", "3 late orders"))
        .with_name("orders")
        .with_interrupt_on_error(false);

    let result = h.processor.execute(&failing).unwrap();
    assert_eq!(result.level, Level::Error);
    assert!(result.is_warning);
    assert_eq!(result.status, Some(Status::AbnormalRed));
    assert!(result.sent);

    let healthy = ProbeSpec::rows(ok_row()).with_name("orders");
    let recovered = h.processor.execute(&healthy).unwrap();
    assert_eq!(recovered.level, Level::Success);
    assert!(recovered.recovered);
    assert!(recovered.sent);

    let (payload, _) = h.transport.delivered().pop().unwrap();
    assert_eq!(payload.as_json()["title"], "orders recovered");

    // Next healthy run is plain INFO
    let again = h.processor.execute(&healthy).unwrap();
    assert_eq!(again.level, Level::Info);
    assert!(!again.recovered);
    assert_eq!(h.transport.attempts(), 2);
}

#[test]
fn test_recovery_notice_can_be_disabled() {
    let h = harness(EngineConfig {
        notify_on_recovery: false,
        ..EngineConfig::default()
    });
    h.processor
        .execute(&ProbeSpec::rows(warning_row("AbnormalYellow", "x")).with_name("job"))
        .unwrap();
    let recovered = h
        .processor
        .execute(&ProbeSpec::rows(ok_row()).with_name("job"))
        .unwrap();

    assert_eq!(recovered.level, Level::Success);
    assert!(!recovered.sent);
    assert_eq!(h.transport.attempts(), 1);
}

#[test]
fn test_unrecognized_status_falls_back_to_warning() {
    let h = harness(EngineConfig::default());
    let result = h
        .processor
        .execute(&ProbeSpec::rows(warning_row("Purple", "odd")).with_name("odd"))
        .unwrap();
    assert_eq!(result.level, Level::Warning);
    assert!(result.sent);
}

#[test]
fn test_missing_is_warning_is_rejected() {
    let h = harness(EngineConfig::default());
    let err = h
        .processor
        .execute(&ProbeSpec::rows(vec![row(json!({ "alert_info": "x" }))]))
        .unwrap_err();
    assert!(matches!(err, ProbeError::InvalidInput(_)));
}

#[test]
fn test_level_overrides() {
    let h = harness(EngineConfig::default());
    let capped = h
        .processor
        .execute(
            &ProbeSpec::rows(warning_row("Critical", "disk full"))
                .with_name("disk")
                .with_max_level(Level::Warning),
        )
        .unwrap();
    assert_eq!(capped.level, Level::Warning);

    let forced = h
        .processor
        .execute(
            &ProbeSpec::rows(warning_row("AbnormalYellow", "slow"))
                .with_name("latency")
                .with_force_level(Level::Info),
        )
        .unwrap();
    assert_eq!(forced.level, Level::Info);
    assert!(!forced.sent);
}

// ============================================================
// Dedup and rate limiting
// ============================================================

#[test]
fn test_duplicate_within_ttl_is_suppressed() {
    let h = harness(EngineConfig::default());
    let spec = ProbeSpec::rows(warning_row("AbnormalYellow", "5 null ids")).with_name("nulls");

    let first = h.processor.execute(&spec).unwrap();
    assert!(first.sent);

    h.clock.advance(Duration::from_secs(299));
    let second = h.processor.execute(&spec).unwrap();
    assert!(second.suppressed);
    assert_eq!(second.suppression, Some(Suppression::Duplicate));
    assert!(!second.sent);
    assert!(second.error.is_none());
    assert_eq!(second.level, Level::Warning);
    assert_eq!(h.transport.attempts(), 1);

    h.clock.advance(Duration::from_secs(1));
    let third = h.processor.execute(&spec).unwrap();
    assert!(third.sent);
    assert_eq!(h.transport.attempts(), 2);
}

#[test]
fn test_rate_limit_allows_max_then_suppresses() {
    let h = harness(EngineConfig {
        dedup_enabled: false,
        rate_limit_max: 3,
        ..EngineConfig::default()
    });
    let spec = ProbeSpec::rows(warning_row("AbnormalYellow", "queue backlog")).with_name("queue");

    for _ in 0..3 {
        assert!(h.processor.execute(&spec).unwrap().sent);
    }
    let limited = h.processor.execute(&spec).unwrap();
    assert!(limited.suppressed);
    assert_eq!(limited.suppression, Some(Suppression::RateLimited));
    assert_eq!(h.transport.attempts(), 3);

    h.clock.advance(Duration::from_secs(61));
    assert!(h.processor.execute(&spec).unwrap().sent);
}

#[test]
fn test_rate_limited_message_goes_out_after_window() {
    let h = harness(EngineConfig {
        rate_limit_max: 1,
        rate_limit_scope: RateLimitScope::Channel,
        ..EngineConfig::default()
    });
    let disk = ProbeSpec::rows(warning_row("AbnormalYellow", "disk 91%")).with_name("disk");
    let inodes = ProbeSpec::rows(warning_row("AbnormalYellow", "inodes 97%")).with_name("inodes");

    assert!(h.processor.execute(&disk).unwrap().sent);
    let limited = h.processor.execute(&inodes).unwrap();
    assert_eq!(limited.suppression, Some(Suppression::RateLimited));

    // Still inside the dedup window, but the held-back message was never sent
    h.clock.advance(Duration::from_secs(61));
    let later = h.processor.execute(&inodes).unwrap();
    assert!(later.sent);
    assert_eq!(h.transport.delivered().len(), 2);
}

#[test]
fn test_critical_dedup_bypass() {
    let spec = ProbeSpec::rows(warning_row("Critical", "primary down"))
        .with_name("db")
        .with_interrupt_on_error(false);
    let quiet = InterruptPolicy::disabled();

    let h = harness(EngineConfig::default());
    let processor = h.processor.with_interrupt_policy(quiet);
    assert!(processor.execute(&spec).unwrap().sent);
    assert!(processor.execute(&spec).unwrap().suppressed);

    let h = harness(EngineConfig {
        critical_bypass_dedup: true,
        ..EngineConfig::default()
    });
    let processor = h.processor.with_interrupt_policy(quiet);
    assert!(processor.execute(&spec).unwrap().sent);
    assert!(processor.execute(&spec).unwrap().sent);
    assert_eq!(h.transport.attempts(), 2);
}

#[test]
fn test_caller_dedup_key_groups_different_messages() {
    let h = harness(EngineConfig::default());
    let first = ProbeSpec::rows(warning_row("AbnormalYellow", "7 rows"))
        .with_name("nulls")
        .with_dedup_key("nulls-daily");
    let second = ProbeSpec::rows(warning_row("AbnormalYellow", "9 rows"))
        .with_name("nulls")
        .with_dedup_key("nulls-daily");

    assert!(h.processor.execute(&first).unwrap().sent);
    let result = h.processor.execute(&second).unwrap();
    assert!(result.suppressed);
    assert_eq!(result.fingerprint.as_deref(), Some("nulls-daily"));
}

// ============================================================
// Delivery and routing
// ============================================================

#[test]
fn test_retry_succeeds_on_last_attempt() {
    let h = harness_with(
        EngineConfig::default(),
        RecordingTransport::failing_with(vec![
            DeliveryError::Transient("503".into()),
            DeliveryError::Transient("timeout".into()),
        ]),
    );
    let result = h
        .processor
        .execute(&ProbeSpec::rows(warning_row("AbnormalYellow", "x")).with_name("flaky"))
        .unwrap();

    assert!(result.sent);
    assert_eq!(result.attempts, 3);
    assert!(result.error.is_none());
}

#[test]
fn test_retry_exhaustion_surfaces_last_error() {
    let h = harness_with(
        EngineConfig::default(),
        RecordingTransport::failing_with(vec![
            DeliveryError::Transient("503".into()),
            DeliveryError::Transient("502".into()),
            DeliveryError::Transient("timeout".into()),
        ]),
    );
    let result = h
        .processor
        .execute(&ProbeSpec::rows(warning_row("AbnormalYellow", "x")).with_name("down"))
        .unwrap();

    assert!(!result.sent);
    assert_eq!(result.attempts, 3);
    assert!(result.error.as_deref().unwrap().contains("timeout"));
}

#[test]
fn test_failed_delivery_is_retried_on_next_run() {
    let h = harness_with(
        EngineConfig::default(),
        RecordingTransport::failing_with(vec![
            DeliveryError::Transient("503".into()),
            DeliveryError::Transient("502".into()),
            DeliveryError::Transient("timeout".into()),
        ]),
    );
    let spec = ProbeSpec::rows(warning_row("AbnormalYellow", "stale export")).with_name("export");

    let failed = h.processor.execute(&spec).unwrap();
    assert!(!failed.sent);
    assert!(!failed.suppressed);

    let rerun = h.processor.execute(&spec).unwrap();
    assert!(rerun.sent);
    assert!(!rerun.suppressed);
    assert_eq!(h.transport.delivered().len(), 1);

    // Delivered now, so the next repeat is a duplicate
    assert_eq!(
        h.processor.execute(&spec).unwrap().suppression,
        Some(Suppression::Duplicate)
    );
}

#[test]
fn test_permanent_failure_is_not_retried() {
    let h = harness_with(
        EngineConfig::default(),
        RecordingTransport::failing_with(vec![DeliveryError::Permanent("invalid token".into())]),
    );
    let result = h
        .processor
        .execute(&ProbeSpec::rows(warning_row("AbnormalYellow", "x")).with_name("auth"))
        .unwrap();

    assert!(!result.sent);
    assert_eq!(result.attempts, 1);
    assert_eq!(h.transport.attempts(), 1);
}

#[test]
fn test_routing_priority() {
    let h = harness(EngineConfig::default());
    let spec = |name: &str| ProbeSpec::rows(warning_row("AbnormalYellow", name)).with_name(name);

    h.processor.execute(&spec("a").with_channel("ops")).unwrap();
    h.processor.execute(&spec("b").with_channel("unknown")).unwrap();
    h.processor
        .execute(&spec("c").with_channel("ops").with_webhook("https://hooks.example/explicit"))
        .unwrap();

    let destinations: Vec<String> = h.transport.delivered().into_iter().map(|(_, d)| d).collect();
    assert_eq!(
        destinations,
        vec![
            "https://hooks.example/ops",
            "https://hooks.example/default",
            "https://hooks.example/explicit",
        ]
    );
}

#[test]
fn test_unknown_channel_without_default_is_config_error() {
    let h = harness(EngineConfig::default());
    let processor = h
        .processor
        .with_router(ChannelRouter::new().with_route("ops", "https://hooks.example/ops"));
    let spec = ProbeSpec::rows(warning_row("AbnormalYellow", "x"))
        .with_name("x")
        .with_channel("nowhere");

    // The failed routing takes no dedup slot, so a rerun fails the same way
    for _ in 0..2 {
        let err = processor.execute(&spec).unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }
    assert_eq!(h.transport.attempts(), 0);
}

#[test]
fn test_unknown_template_is_reported() {
    let h = harness(EngineConfig::default());
    let err = h
        .processor
        .execute(
            &ProbeSpec::rows(warning_row("AbnormalYellow", "x"))
                .with_name("x")
                .with_template("missing"),
        )
        .unwrap_err();
    assert!(matches!(err, ProbeError::UnknownTemplate(ref id) if id == "missing"));

    // Fixing the template afterwards still delivers the first occurrence
    let fixed = h
        .processor
        .execute(
            &ProbeSpec::rows(warning_row("AbnormalYellow", "x"))
                .with_name("x")
                .with_template("compact"),
        )
        .unwrap();
    assert!(fixed.sent);
}

#[test]
fn test_silent_probe_records_state_without_sending() {
    let h = harness(EngineConfig::default());
    let result = h
        .processor
        .execute(
            &ProbeSpec::rows(warning_row("AbnormalYellow", "x"))
                .with_name("quiet")
                .silent(),
        )
        .unwrap();
    assert_eq!(result.level, Level::Warning);
    assert!(!result.sent);
    assert_eq!(h.transport.attempts(), 0);

    // State was still recorded
    let recovered = h
        .processor
        .execute(&ProbeSpec::rows(ok_row()).with_name("quiet"))
        .unwrap();
    assert!(recovered.recovered);
}

// ============================================================
// Batch aggregation and interrupts
// ============================================================

fn batch_query() -> Arc<MockQuery> {
    Arc::new(
        MockQuery::default()
            .with_rows("SELECT ok", ok_row())
            .with_rows("SELECT err", warning_row("AbnormalRed", "ledger mismatch"))
            .with_rows("SELECT crit", warning_row("Critical", "payments halted"))
            .with_failure("SELECT broken", "table not found"),
    )
}

fn batch_specs() -> Vec<ProbeSpec> {
    vec![
        ProbeSpec::sql("SELECT ok").with_name("ok"),
        ProbeSpec::sql("SELECT err").with_name("err"),
        ProbeSpec::sql("SELECT crit").with_name("crit"),
    ]
}

#[test]
fn test_batch_interrupts_on_error_before_critical() {
    let query = batch_query();
    let h = harness(EngineConfig::default());
    let processor = h.processor.with_query_engine(query.clone());

    let err = processor.execute_batch(&batch_specs(), None).unwrap_err();
    let interrupt = err.as_interrupt().unwrap();
    assert_eq!(interrupt.cause.level, Level::Error);
    assert_eq!(interrupt.cause.alert_name, "err");

    let report = interrupt.report.as_ref().unwrap();
    assert!(report.interrupted);
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.highest_level, Level::Error);

    // The CRITICAL probe was never evaluated
    assert_eq!(query.executed(), vec!["SELECT ok", "SELECT err"]);
    // The interrupting result was still delivered
    assert_eq!(h.transport.attempts(), 1);
}

#[test]
fn test_batch_without_interrupt_reports_critical() {
    let query = batch_query();
    let h = harness(EngineConfig {
        interrupt_on_error: false,
        ..EngineConfig::default()
    });
    let processor = h.processor.with_query_engine(query.clone());

    let report = processor.execute_batch(&batch_specs(), None).unwrap();
    assert!(!report.interrupted);
    assert!(report.interrupt_cause.is_none());
    assert_eq!(report.highest_level, Level::Critical);
    assert_eq!(report.results.len(), 3);
    assert_eq!(query.executed().len(), 3);
    assert!(report.summary().starts_with("2/3 checks triggered alerts:"));
}

#[test]
fn test_batch_critical_interrupts_even_when_error_does_not() {
    let h = harness(EngineConfig::default());
    let processor = h.processor.with_query_engine(batch_query());
    let specs: Vec<ProbeSpec> = batch_specs()
        .into_iter()
        .map(|s| s.with_interrupt_on_error(false))
        .collect();

    let err = processor.execute_batch(&specs, None).unwrap_err();
    let interrupt = err.as_interrupt().unwrap();
    assert_eq!(interrupt.cause.level, Level::Critical);
    assert_eq!(interrupt.report.as_ref().unwrap().results.len(), 3);
}

#[test]
fn test_batch_query_failure_becomes_error_result() {
    let h = harness(EngineConfig {
        interrupt_on_error: false,
        ..EngineConfig::default()
    });
    let processor = h.processor.with_query_engine(batch_query());

    let report = processor
        .execute_batch(
            &[
                ProbeSpec::sql("SELECT broken").with_name("broken"),
                ProbeSpec::sql("SELECT ok").with_name("ok"),
            ],
            None,
        )
        .unwrap();

    let broken = &report.results[0];
    assert_eq!(broken.level, Level::Error);
    assert!(broken.error.as_deref().unwrap().contains("table not found"));
    assert_eq!(report.results[1].level, Level::Info);
    assert_eq!(report.highest_level, Level::Error);
}

#[test]
fn test_contained_failure_recovers_on_next_clean_run() {
    let h = harness(EngineConfig {
        interrupt_on_error: false,
        ..EngineConfig::default()
    });
    let query = Arc::new(
        MockQuery::default()
            .with_failure("SELECT stale", "connection reset")
            .with_rows("SELECT fresh", ok_row()),
    );
    let processor = h.processor.with_query_engine(query);

    let report = processor
        .execute_batch(&[ProbeSpec::sql("SELECT stale").with_name("etl")], None)
        .unwrap();
    assert_eq!(report.results[0].level, Level::Error);

    let recovered = processor
        .execute(&ProbeSpec::sql("SELECT fresh").with_name("etl"))
        .unwrap();
    assert_eq!(recovered.level, Level::Success);
    assert!(recovered.recovered);
    assert!(recovered.sent);
}

#[test]
fn test_own_setting_enables_interrupt_when_instance_is_off() {
    let h = harness(EngineConfig {
        interrupt_on_error: false,
        ..EngineConfig::default()
    });
    let spec = ProbeSpec::rows(warning_row("AbnormalRed", "ledger mismatch"))
        .with_name("ledger")
        .with_interrupt_on_error(true);

    let err = h.processor.execute(&spec).unwrap_err();
    let interrupt = err.as_interrupt().unwrap();
    assert_eq!(interrupt.cause.level, Level::Error);
    assert!(interrupt.cause.sent);
}

#[test]
fn test_batch_call_setting_controls_interrupts() {
    let h = harness(EngineConfig {
        interrupt_on_error: false,
        dedup_enabled: false,
        ..EngineConfig::default()
    });
    let processor = h.processor.with_query_engine(batch_query());

    let err = processor.execute_batch(&batch_specs(), Some(true)).unwrap_err();
    assert_eq!(err.as_interrupt().unwrap().cause.alert_name, "err");

    // A check's own setting wins over the call
    let specs = vec![
        ProbeSpec::sql("SELECT err").with_name("err").with_interrupt_on_error(false),
        ProbeSpec::sql("SELECT ok").with_name("ok"),
    ];
    let report = processor.execute_batch(&specs, Some(true)).unwrap();
    assert!(!report.interrupted);
    assert_eq!(report.results.len(), 2);
}

#[test]
fn test_single_execute_propagates_query_failure() {
    let h = harness(EngineConfig::default());
    let processor = h.processor.with_query_engine(batch_query());
    let err = processor.execute(&ProbeSpec::sql("SELECT broken")).unwrap_err();
    assert!(matches!(err, ProbeError::Query(_)));
}

#[test]
fn test_suppressed_critical_does_not_interrupt() {
    let h = harness(EngineConfig::default());
    let spec = ProbeSpec::rows(warning_row("Critical", "replica lag")).with_name("lag");

    assert!(h.processor.execute(&spec).unwrap_err().as_interrupt().is_some());
    let repeat = h.processor.execute(&spec).unwrap();
    assert!(repeat.suppressed);
}

// ============================================================
// Conditions, empty results and change detection
// ============================================================

#[test]
fn test_aggregation_condition_probe() {
    let rows = vec![
        row(json!({ "amount": 6000 })),
        row(json!({ "amount": 5000 })),
    ];
    let h = harness(EngineConfig::default());
    let spec = ProbeSpec::rows(rows)
        .with_name("refunds")
        .with_condition(
            ConditionSet::all(vec![AggregationCondition::new(
                "amount",
                Aggregation::Sum,
                Operator::Gt,
                10000.0,
            )])
            .with_status(Status::AbnormalRed),
        )
        .with_interrupt_on_error(false);

    let result = h.processor.execute(&spec).unwrap();
    assert_eq!(result.level, Level::Error);
    assert!(result.alert_info.contains("sum(amount) = 11000.00"));
    assert!(result.sent);
}

#[test]
fn test_empty_result_policy() {
    let h = harness(EngineConfig::default());
    let result = h
        .processor
        .execute(
            &ProbeSpec::rows(vec![])
                .with_name("feed")
                .with_empty_result(EmptyResultPolicy::Warning),
        )
        .unwrap();
    assert_eq!(result.level, Level::Warning);
    assert_eq!(result.row_count, 0);
    assert!(result.sent);
}

#[test]
fn test_change_rate_escalates_to_warning() {
    let h = harness(EngineConfig::default());
    let spec = |dau: i64| {
        ProbeSpec::rows(vec![row(json!({ "is_warning": 0, "alert_info": "dau", "dau": dau }))])
            .with_name("dau")
            .with_change_detection("dau", 50.0)
    };

    assert_eq!(h.processor.execute(&spec(1000)).unwrap().level, Level::Info);
    assert_eq!(h.processor.execute(&spec(1200)).unwrap().level, Level::Info);

    let dropped = h.processor.execute(&spec(400)).unwrap();
    assert_eq!(dropped.level, Level::Warning);
    assert!(dropped.alert_info.contains("Change-rate anomaly"));
    assert!(dropped.sent);
    assert_eq!(h.processor.history().get("dau", 10).len(), 3);
}

// ============================================================
// Generic notifier and async paths
// ============================================================

#[test]
fn test_notify_sends_rendered_notice() {
    let h = harness(EngineConfig::default());
    let notice = Notice::new(Level::Info, "Deploy finished", "v1.4.2 is live")
        .with_channel("ops")
        .with_template("compact");

    let result = h.processor.notify(&notice).unwrap();
    assert!(result.sent);
    assert_eq!(result.channel.as_deref(), Some("ops"));

    let (payload, destination) = h.transport.delivered().pop().unwrap();
    assert_eq!(destination, "https://hooks.example/ops");
    assert_eq!(payload.as_json()["template"], "compact");
    assert_eq!(payload.as_json()["title"], "Deploy finished");
    assert_eq!(payload.as_json()["source"], "SQL-Probe");
}

#[test]
fn test_title_prefix_and_mentions_reach_renderer() {
    let h = harness(EngineConfig::default());
    let spec = ProbeSpec::rows(warning_row("AbnormalYellow", "late rows"))
        .with_name("orders")
        .with_title_prefix("[prod] ")
        .with_mention("ou_alice")
        .with_mention("ou_bob");
    assert!(h.processor.execute(&spec).unwrap().sent);

    let notice = Notice::new(Level::Warning, "Backfill slow", "eta 2h")
        .with_title_prefix("[etl] ")
        .with_mention("ou_carol");
    assert!(h.processor.notify(&notice).unwrap().sent);

    let delivered = h.transport.delivered();
    let probe_card = delivered[0].0.as_json();
    assert_eq!(probe_card["title"], "[prod] orders");
    assert_eq!(probe_card["mentions"], json!(["ou_alice", "ou_bob"]));
    let notice_card = delivered[1].0.as_json();
    assert_eq!(notice_card["title"], "[etl] Backfill slow");
    assert_eq!(notice_card["mentions"], json!(["ou_carol"]));
}

#[test]
fn test_notify_is_gated() {
    let h = harness(EngineConfig::default());
    let notice = Notice::new(Level::Error, "Job failed", "exit code 3")
        .with_error("segfault", Some("E139".into()));

    assert!(h.processor.notify(&notice).unwrap().sent);
    let repeat = h.processor.notify(&notice).unwrap();
    assert!(repeat.suppressed);
    assert_eq!(h.transport.attempts(), 1);
}

#[tokio::test]
async fn test_async_execute_and_batch() {
    let h = harness_with(
        EngineConfig::default(),
        RecordingTransport::failing_with(vec![DeliveryError::Transient("503".into())]),
    );
    let processor = h.processor.with_query_engine(batch_query());

    let result = processor
        .execute_async(&ProbeSpec::rows(warning_row("AbnormalYellow", "async")).with_name("a"))
        .await
        .unwrap();
    assert!(result.sent);
    assert_eq!(result.attempts, 2);

    let err = processor.execute_batch_async(&batch_specs(), None).await.unwrap_err();
    assert_eq!(err.as_interrupt().unwrap().cause.alert_name, "err");

    let notice = Notice::new(Level::Warning, "async notice", "body");
    assert!(processor.notify_async(&notice).await.unwrap().sent);
}

#[test]
fn test_blocking_execute_without_transport_is_config_error() {
    let processor = ProbeProcessor::new(EngineConfig::default(), Arc::new(JsonRenderer))
        .with_router(ChannelRouter::new().with_default("https://hooks.example/default"));
    let err = processor
        .execute(&ProbeSpec::rows(warning_row("AbnormalYellow", "x")))
        .unwrap_err();
    assert!(matches!(err, ProbeError::Config(_)));
}
