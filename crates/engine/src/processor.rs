//! Probe processing pipeline.
//!
//! For each probe or notice:
//! 1. Run the query (or take inline rows) and evaluate the result contract
//! 2. Resolve the level and recovery flag (via `LevelResolver`)
//! 3. Route to a destination, render, and check the transport
//! 4. Gate on dedup and rate limit (via `NotificationGate`)
//! 5. Send with retries; a failed send releases its dedup entry
//!
//! Steps 1-4 are synchronous and shared by the blocking and the async entry
//! points; only the send differs.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use probe_common::{
    AsyncTransport, BatchReport, EngineConfig, Level, Link, Payload, ProbeError, ProbeResult,
    QueryEngine, RenderContext, Renderer, Row, Status, Transport,
};

use crate::aggregator::{BatchAggregator, InterruptPolicy};
use crate::clock::{Clock, SystemClock};
use crate::condition::ConditionSet;
use crate::contract::{EmptyResultPolicy, Evaluation, evaluate_rows};
use crate::gate::{GateConfig, GateDecision, NotificationGate, fingerprint};
use crate::history::{AlertHistory, tracked_value};
use crate::redis_store::RedisStore;
use crate::resolver::{DEFAULT_ALERT_NAME, LevelResolver, apply_overrides};
use crate::retry::{DeliveryOutcome, RetryPolicy};
use crate::router::{ChannelRouter, EnvSecrets};
use crate::store::{MemoryStore, StateStore};

/// Default change-rate threshold in percent.
pub const DEFAULT_CHANGE_THRESHOLD: f64 = 50.0;

/// Where a probe's rows come from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeSource {
    /// Query text run through the configured `QueryEngine`.
    Sql(String),
    /// Rows already fetched by the caller.
    Rows(Vec<Row>),
}

/// One probe invocation and its per-probe options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProbeSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub source: ProbeSource,
    #[serde(default)]
    pub channel: Option<String>,
    /// Explicit destination, bypassing channel routing.
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(default)]
    pub dedup_key: Option<String>,
    #[serde(default)]
    pub condition: Option<ConditionSet>,
    #[serde(default)]
    pub empty_result: EmptyResultPolicy,
    #[serde(default)]
    pub force_level: Option<Level>,
    #[serde(default)]
    pub max_level: Option<Level>,
    #[serde(default)]
    pub template: Option<String>,
    /// Resolve and record state, never deliver.
    #[serde(default)]
    pub silent: bool,
    /// Overrides whether ERROR interrupts for this probe; CRITICAL always does.
    #[serde(default)]
    pub interrupt_on_error: Option<bool>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
    #[serde(default)]
    pub mention_all: bool,
    /// User ids to @ in the message.
    #[serde(default)]
    pub mentions: Vec<String>,
    /// Prepended to the message title.
    #[serde(default)]
    pub title_prefix: Option<String>,
    /// Numeric column recorded in the alert history.
    #[serde(default)]
    pub track_value: Option<String>,
    #[serde(default)]
    pub detect_change: bool,
    #[serde(default)]
    pub change_threshold: Option<f64>,
}

impl ProbeSpec {
    pub fn new(source: ProbeSource) -> Self {
        Self {
            name: None,
            source,
            channel: None,
            webhook: None,
            dedup_key: None,
            condition: None,
            empty_result: EmptyResultPolicy::default(),
            force_level: None,
            max_level: None,
            template: None,
            silent: false,
            interrupt_on_error: None,
            links: Vec::new(),
            metrics: BTreeMap::new(),
            mention_all: false,
            mentions: Vec::new(),
            title_prefix: None,
            track_value: None,
            detect_change: false,
            change_threshold: None,
        }
    }

    pub fn sql(text: impl Into<String>) -> Self {
        Self::new(ProbeSource::Sql(text.into()))
    }

    pub fn rows(rows: Vec<Row>) -> Self {
        Self::new(ProbeSource::Rows(rows))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_webhook(mut self, webhook: impl Into<String>) -> Self {
        self.webhook = Some(webhook.into());
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_condition(mut self, condition: ConditionSet) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_empty_result(mut self, policy: EmptyResultPolicy) -> Self {
        self.empty_result = policy;
        self
    }

    pub fn with_force_level(mut self, level: Level) -> Self {
        self.force_level = Some(level);
        self
    }

    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = Some(level);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn with_interrupt_on_error(mut self, interrupt: bool) -> Self {
        self.interrupt_on_error = Some(interrupt);
        self
    }

    pub fn with_mention(mut self, user_id: impl Into<String>) -> Self {
        self.mentions.push(user_id.into());
        self
    }

    pub fn with_title_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.title_prefix = Some(prefix.into());
        self
    }

    pub fn with_change_detection(mut self, column: impl Into<String>, threshold: f64) -> Self {
        self.track_value = Some(column.into());
        self.detect_change = true;
        self.change_threshold = Some(threshold);
        self
    }
}

/// A message sent directly by application code, outside the SQL contract.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Notice {
    pub level: Level,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub mention_all: bool,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub title_prefix: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(default)]
    pub dedup_key: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
}

impl Notice {
    pub fn new(level: Level, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            content: content.into(),
            error_msg: None,
            error_code: None,
            metrics: BTreeMap::new(),
            extra: BTreeMap::new(),
            links: Vec::new(),
            mention_all: false,
            mentions: Vec::new(),
            title_prefix: None,
            channel: None,
            webhook: None,
            dedup_key: None,
            template: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>, code: Option<String>) -> Self {
        self.error_msg = Some(message.into());
        self.error_code = code;
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_webhook(mut self, webhook: impl Into<String>) -> Self {
        self.webhook = Some(webhook.into());
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn mention_all(mut self) -> Self {
        self.mention_all = true;
        self
    }

    pub fn with_mention(mut self, user_id: impl Into<String>) -> Self {
        self.mentions.push(user_id.into());
        self
    }

    pub fn with_title_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.title_prefix = Some(prefix.into());
        self
    }
}

/// Routing and rendering inputs for one outbound message.
struct Dispatch<'a> {
    channel: Option<&'a str>,
    webhook: Option<&'a str>,
    dedup_key: Option<&'a str>,
    template: Option<&'a str>,
    context: RenderContext,
}

/// Which transport a staged delivery is sent through.
#[derive(Debug, Clone, Copy)]
enum SendPath {
    Blocking,
    Async,
}

/// A result either finished before delivery or waiting for the send.
enum Staged {
    Done(ProbeResult),
    Deliver {
        result: ProbeResult,
        payload: Payload,
        destination: String,
    },
}

/// Explicitly constructed engine instance. Owns its state store, gate,
/// router and history; holds no process-wide singletons.
pub struct ProbeProcessor {
    config: EngineConfig,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    resolver: LevelResolver,
    gate: NotificationGate,
    router: ChannelRouter,
    retry: RetryPolicy,
    interrupt: InterruptPolicy,
    history: AlertHistory,
    renderer: Arc<dyn Renderer>,
    transport: Option<Arc<dyn Transport>>,
    async_transport: Option<Arc<dyn AsyncTransport>>,
    query: Option<Arc<dyn QueryEngine>>,
}

impl ProbeProcessor {
    /// Engine with an in-process store and environment-backed channel secrets.
    pub fn new(config: EngineConfig, renderer: Arc<dyn Renderer>) -> Self {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let gate = NotificationGate::new(store.clone(), clock.clone(), GateConfig::from(&config));

        Self {
            resolver: LevelResolver::new(store.clone()),
            gate,
            router: ChannelRouter::new().with_secrets(Arc::new(EnvSecrets)),
            retry: RetryPolicy::from(&config),
            interrupt: InterruptPolicy::from(&config),
            history: AlertHistory::default(),
            renderer,
            transport: None,
            async_transport: None,
            query: None,
            store,
            clock,
            config,
        }
    }

    /// Like `new`, but keeps gate and prior state in Redis when `redis_url` is set.
    pub fn connect(config: EngineConfig, renderer: Arc<dyn Renderer>) -> Result<Self, ProbeError> {
        let redis_url = config.redis_url.clone();
        let processor = Self::new(config, renderer);
        match redis_url {
            Some(url) => Ok(processor.with_store(Arc::new(RedisStore::connect(&url, "probe")?))),
            None => Ok(processor),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.resolver = LevelResolver::new(store.clone());
        self.gate = NotificationGate::new(store.clone(), self.clock.clone(), self.gate.config().clone());
        self.store = store;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.gate = NotificationGate::new(self.store.clone(), clock.clone(), self.gate.config().clone());
        self.clock = clock;
        self
    }

    pub fn with_router(mut self, router: ChannelRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_interrupt_policy(mut self, policy: InterruptPolicy) -> Self {
        self.interrupt = policy;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_async_transport(mut self, transport: Arc<dyn AsyncTransport>) -> Self {
        self.async_transport = Some(transport);
        self
    }

    pub fn with_query_engine(mut self, query: Arc<dyn QueryEngine>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history(&self) -> &AlertHistory {
        &self.history
    }

    // ---- blocking entry points ----

    /// Run one probe. Raises `ProbeError::Interrupted` when the result
    /// qualifies under the interrupt policy.
    pub fn execute(&self, spec: &ProbeSpec) -> Result<ProbeResult, ProbeError> {
        let result = self.execute_uninterrupted(spec)?;
        self.policy_for(spec, None).check(&result)?;
        Ok(result)
    }

    /// Run probes sequentially in declaration order.
    ///
    /// Query or contract failures become ERROR results; configuration errors
    /// abort the batch. The first result the interrupt policy marks stops the
    /// batch; later probes are never evaluated. `interrupt_on_error` applies
    /// to every probe that does not set its own.
    pub fn execute_batch(
        &self,
        specs: &[ProbeSpec],
        interrupt_on_error: Option<bool>,
    ) -> Result<BatchReport, ProbeError> {
        let mut batch = BatchAggregator::new();
        for spec in specs {
            let result = match self.execute_uninterrupted(spec) {
                Ok(result) => result,
                Err(e) => self.contain_failure(spec, e)?,
            };
            batch.record(result, &self.policy_for(spec, interrupt_on_error))?;
        }
        Ok(batch.finish())
    }

    /// Send a direct notification through gate, router and retrier.
    pub fn notify(&self, notice: &Notice) -> Result<ProbeResult, ProbeError> {
        match self.stage_notice(notice, SendPath::Blocking)? {
            Staged::Done(result) => Ok(result),
            Staged::Deliver {
                result,
                payload,
                destination,
            } => {
                let transport = self.blocking_transport()?;
                let outcome = self.retry.send_blocking(transport.as_ref(), &payload, &destination);
                self.complete(result, outcome)
            }
        }
    }

    // ---- async entry points ----

    pub async fn execute_async(&self, spec: &ProbeSpec) -> Result<ProbeResult, ProbeError> {
        let result = self.execute_uninterrupted_async(spec).await?;
        self.policy_for(spec, None).check(&result)?;
        Ok(result)
    }

    pub async fn execute_batch_async(
        &self,
        specs: &[ProbeSpec],
        interrupt_on_error: Option<bool>,
    ) -> Result<BatchReport, ProbeError> {
        let mut batch = BatchAggregator::new();
        for spec in specs {
            let result = match self.execute_uninterrupted_async(spec).await {
                Ok(result) => result,
                Err(e) => self.contain_failure(spec, e)?,
            };
            batch.record(result, &self.policy_for(spec, interrupt_on_error))?;
        }
        Ok(batch.finish())
    }

    pub async fn notify_async(&self, notice: &Notice) -> Result<ProbeResult, ProbeError> {
        match self.stage_notice(notice, SendPath::Async)? {
            Staged::Done(result) => Ok(result),
            Staged::Deliver {
                result,
                payload,
                destination,
            } => {
                let transport = self.async_transport()?;
                let outcome = self
                    .retry
                    .send_async(transport.as_ref(), &payload, &destination)
                    .await;
                self.complete(result, outcome)
            }
        }
    }

    // ---- shared pipeline ----

    fn execute_uninterrupted(&self, spec: &ProbeSpec) -> Result<ProbeResult, ProbeError> {
        match self.stage_probe(spec, SendPath::Blocking)? {
            Staged::Done(result) => Ok(result),
            Staged::Deliver {
                result,
                payload,
                destination,
            } => {
                let transport = self.blocking_transport()?;
                let outcome = self.retry.send_blocking(transport.as_ref(), &payload, &destination);
                self.complete(result, outcome)
            }
        }
    }

    async fn execute_uninterrupted_async(&self, spec: &ProbeSpec) -> Result<ProbeResult, ProbeError> {
        match self.stage_probe(spec, SendPath::Async)? {
            Staged::Done(result) => Ok(result),
            Staged::Deliver {
                result,
                payload,
                destination,
            } => {
                let transport = self.async_transport()?;
                let outcome = self
                    .retry
                    .send_async(transport.as_ref(), &payload, &destination)
                    .await;
                self.complete(result, outcome)
            }
        }
    }

    /// A `ProbeSpec`'s own setting wins over the call-level one.
    fn policy_for(&self, spec: &ProbeSpec, call: Option<bool>) -> InterruptPolicy {
        self.interrupt.with_override(spec.interrupt_on_error.or(call))
    }

    fn blocking_transport(&self) -> Result<Arc<dyn Transport>, ProbeError> {
        self.transport
            .clone()
            .ok_or_else(|| ProbeError::Config("no blocking transport configured".into()))
    }

    fn async_transport(&self) -> Result<Arc<dyn AsyncTransport>, ProbeError> {
        self.async_transport
            .clone()
            .ok_or_else(|| ProbeError::Config("no async transport configured".into()))
    }

    fn ensure_transport(&self, path: SendPath) -> Result<(), ProbeError> {
        match path {
            SendPath::Blocking => self.blocking_transport().map(drop),
            SendPath::Async => self.async_transport().map(drop),
        }
    }

    fn fetch_rows(&self, source: &ProbeSource) -> Result<Vec<Row>, ProbeError> {
        match source {
            ProbeSource::Rows(rows) => Ok(rows.clone()),
            ProbeSource::Sql(sql) => {
                let query = self
                    .query
                    .as_ref()
                    .ok_or_else(|| ProbeError::Config("no query engine configured".into()))?;
                query.query(sql)
            }
        }
    }

    /// Evaluate, resolve and gate a probe, then render when it goes out.
    fn stage_probe(&self, spec: &ProbeSpec, path: SendPath) -> Result<Staged, ProbeError> {
        let rows = self.fetch_rows(&spec.source)?;
        let name = spec.name.as_deref();

        let mut evaluation = if rows.is_empty() {
            spec.empty_result.evaluate(name.unwrap_or(DEFAULT_ALERT_NAME))
        } else if let Some(condition) = &spec.condition {
            condition.evaluate(&rows, name.unwrap_or(DEFAULT_ALERT_NAME))
        } else {
            evaluate_rows(&rows, name, spec.empty_result)?
        };

        let tracked = if spec.track_value.is_some() || spec.detect_change {
            tracked_value(&rows, spec.track_value.as_deref())
        } else {
            None
        };
        if spec.detect_change
            && let Some(value) = tracked
        {
            self.escalate_on_change(&mut evaluation, value, spec.change_threshold);
        }

        let resolved = self.resolver.resolve(&evaluation.alert_name, &evaluation)?;
        let level = apply_overrides(resolved.level, spec.force_level, spec.max_level);
        let result = resolved.with_level(level);
        self.history.record(&result, tracked);

        tracing::debug!(
            alert_name = %result.alert_name,
            level = %result.level,
            recovered = result.recovered,
            rows = result.row_count,
            "Probe resolved"
        );

        if spec.silent || !self.should_notify(&result) {
            return Ok(Staged::Done(result));
        }

        let prefix = spec.title_prefix.as_deref().unwrap_or_default();
        let mut context = if result.recovered {
            RenderContext::new(
                result.level,
                format!("{}{} recovered", prefix, result.alert_name),
                "Alert returned to normal",
            )
        } else {
            RenderContext::new(
                result.level,
                format!("{}{}", prefix, result.alert_name),
                &result.alert_info,
            )
        };
        context.source = self.config.source.clone();
        context.metrics = spec.metrics.clone();
        context.links = spec.links.clone();
        context.mention_all = spec.mention_all;
        context.mentions = spec.mentions.clone();
        context.timestamp = result.executed_at;
        context.extra.insert("row_count".into(), result.row_count.into());
        if let Some(status) = &result.status {
            context.extra.insert("status".into(), status.to_string().into());
        }

        self.stage_delivery(
            result,
            Dispatch {
                channel: spec.channel.as_deref(),
                webhook: spec.webhook.as_deref(),
                dedup_key: spec.dedup_key.as_deref(),
                template: spec.template.as_deref(),
                context,
            },
            path,
        )
    }

    fn stage_notice(&self, notice: &Notice, path: SendPath) -> Result<Staged, ProbeError> {
        let result = ProbeResult::new(
            notice.level,
            notice.level.is_failing(),
            None,
            &notice.title,
            &notice.content,
        );

        let title = match &notice.title_prefix {
            Some(prefix) => format!("{}{}", prefix, notice.title),
            None => notice.title.clone(),
        };
        let mut context = RenderContext::new(notice.level, title, &notice.content);
        context.source = self.config.source.clone();
        context.error_msg = notice.error_msg.clone();
        context.error_code = notice.error_code.clone();
        context.metrics = notice.metrics.clone();
        context.extra = notice.extra.clone();
        context.links = notice.links.clone();
        context.mention_all = notice.mention_all;
        context.mentions = notice.mentions.clone();
        context.timestamp = result.executed_at;

        self.stage_delivery(
            result,
            Dispatch {
                channel: notice.channel.as_deref(),
                webhook: notice.webhook.as_deref(),
                dedup_key: notice.dedup_key.as_deref(),
                template: notice.template.as_deref(),
                context,
            },
            path,
        )
    }

    /// INFO probe results are never delivered; SUCCESS only as a recovery
    /// notice when enabled.
    fn should_notify(&self, result: &ProbeResult) -> bool {
        match result.level {
            Level::Info => false,
            Level::Success => self.config.notify_on_recovery,
            _ => true,
        }
    }

    fn escalate_on_change(&self, evaluation: &mut Evaluation, value: f64, threshold: Option<f64>) {
        let threshold = threshold.unwrap_or(DEFAULT_CHANGE_THRESHOLD);
        let Some(anomaly) = self
            .history
            .projected_anomaly(&evaluation.alert_name, value, threshold)
        else {
            return;
        };
        if !anomaly.is_anomaly {
            return;
        }

        tracing::info!(
            alert_name = %evaluation.alert_name,
            change_rate = anomaly.change_rate,
            "Change-rate anomaly detected"
        );
        evaluation.alert_info = if evaluation.alert_info.is_empty() {
            format!("Change-rate anomaly: {}", anomaly.message)
        } else {
            format!("{}\n\nChange-rate anomaly: {}", evaluation.alert_info, anomaly.message)
        };
        if !evaluation.is_warning {
            evaluation.is_warning = true;
            evaluation.status = Some(Status::AbnormalYellow);
        }
    }

    /// Route, render and check the transport first: a notification that
    /// cannot be sent must not take a dedup or rate-limit slot.
    fn stage_delivery(
        &self,
        result: ProbeResult,
        dispatch: Dispatch<'_>,
        path: SendPath,
    ) -> Result<Staged, ProbeError> {
        let fp = fingerprint(dispatch.dedup_key, &result.alert_name, &result.alert_info);
        let route = self.router.resolve(dispatch.channel, dispatch.webhook)?;
        let payload = self.renderer.render(dispatch.template, &dispatch.context)?;
        self.ensure_transport(path)?;

        if let GateDecision::Suppress(reason) = self.gate.evaluate(&fp, &route.channel, result.level)? {
            return Ok(Staged::Done(
                result.with_routing(fp, route.channel).with_suppression(reason),
            ));
        }

        Ok(Staged::Deliver {
            result: result.with_routing(fp, route.channel),
            payload,
            destination: route.destination,
        })
    }

    /// Record the delivery outcome. A failed delivery gives its dedup entry
    /// back so the next occurrence is tried again.
    fn complete(&self, result: ProbeResult, outcome: DeliveryOutcome) -> Result<ProbeResult, ProbeError> {
        match &outcome.error {
            None => tracing::info!(
                alert_name = %result.alert_name,
                level = %result.level,
                channel = result.channel.as_deref().unwrap_or_default(),
                attempts = outcome.attempts,
                "Notification delivered"
            ),
            Some(e) => {
                tracing::warn!(
                    alert_name = %result.alert_name,
                    level = %result.level,
                    attempts = outcome.attempts,
                    error = %e,
                    "Notification delivery failed"
                );
                if let Some(fp) = result.fingerprint.as_deref() {
                    self.gate.release(fp, result.level)?;
                }
            }
        }
        Ok(result.with_delivery(outcome.attempts, outcome.error.map(|e| e.to_string())))
    }

    /// Configuration errors are fatal for the whole batch; anything else is
    /// contained in the probe's own result.
    fn contain_failure(&self, spec: &ProbeSpec, error: ProbeError) -> Result<ProbeResult, ProbeError> {
        match error {
            ProbeError::Config(_) | ProbeError::Interrupted(_) => Err(error),
            other => self.failed_result(spec, other),
        }
    }

    /// ERROR result standing in for a probe that could not be evaluated.
    /// It marks the alert identity failing, so the next clean run recovers.
    fn failed_result(&self, spec: &ProbeSpec, error: ProbeError) -> Result<ProbeResult, ProbeError> {
        let name = spec.name.as_deref().unwrap_or(DEFAULT_ALERT_NAME);
        tracing::warn!(alert_name = name, error = %error, "Probe failed");

        let evaluation = Evaluation {
            is_warning: true,
            status: Some(Status::AbnormalRed),
            alert_name: name.to_string(),
            alert_info: error.to_string(),
            row_count: 0,
        };
        let result = self
            .resolver
            .resolve(name, &evaluation)?
            .with_error(error.to_string());
        self.history.record(&result, None);
        Ok(result)
    }
}
