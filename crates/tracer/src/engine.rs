//! The impact tracer service: ties adapters, traces, the dispatch queue
//! and the remote scorer together.
//!
//! Constructed explicitly and passed down; independent instances never
//! share queues or settings.

use chrono::Utc;
use ecotrace_config::AppConfig;
use ecotrace_core::{
    Error, ImpactResult, ImpactScorer, Result, ScoreResponse, ScorerError, UsageProducer,
    UsageRecord,
};
use ecotrace_scorer::HttpScorer;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context;
use crate::dispatch::{DEFAULT_CAPACITY, DispatchQueue};
use crate::pending::{DEFAULT_POLL_INTERVAL, PendingResult};
use crate::trace::{Trace, TraceGuard, TraceOptions};

/// Runtime settings for an [`ImpactTracer`].
#[derive(Debug, Clone)]
pub struct TracerSettings {
    /// Score inline at submission instead of through the queue.
    pub sync_mode: bool,
    pub environment: Option<String>,
    pub client_id: Option<String>,
    pub project_id: Option<String>,
    pub application_id: Option<String>,
    pub queue_capacity: usize,
    /// How long `shutdown` waits for queued jobs.
    pub flush_timeout: Duration,
    /// Cadence of async waits.
    pub poll_interval: Duration,
}

impl Default for TracerSettings {
    fn default() -> Self {
        Self {
            sync_mode: false,
            environment: None,
            client_id: None,
            project_id: None,
            application_id: None,
            queue_capacity: DEFAULT_CAPACITY,
            flush_timeout: Duration::from_secs(2),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl TracerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sync_mode: config.sync_mode,
            environment: config.environment.clone(),
            client_id: config.attribution.client_id.clone(),
            project_id: config.attribution.project_id.clone(),
            application_id: config.attribution.application_id.clone(),
            queue_capacity: config.dispatch.capacity,
            flush_timeout: Duration::from_millis(config.dispatch.flush_timeout_ms),
            poll_interval: Duration::from_millis(config.wait.poll_interval_ms),
        }
    }
}

/// Records usage, dispatches it for scoring, and tracks it in traces.
///
/// Cheap to clone; clones share the same queue and scorer.
#[derive(Clone)]
pub struct ImpactTracer {
    inner: Arc<TracerInner>,
}

struct TracerInner {
    scorer: Arc<dyn ImpactScorer>,
    queue: DispatchQueue,
    settings: TracerSettings,
}

impl ImpactTracer {
    pub fn new(scorer: Arc<dyn ImpactScorer>, settings: TracerSettings) -> Self {
        let queue = DispatchQueue::named("impact", settings.queue_capacity);
        Self {
            inner: Arc::new(TracerInner {
                scorer,
                queue,
                settings,
            }),
        }
    }

    /// Build a tracer backed by the HTTP scorer.
    ///
    /// Fails with [`Error::Config`] when the configuration is invalid or
    /// carries no API key.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        config.require_credentials().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        let scorer = HttpScorer::from_config(config).map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        Ok(Self::new(Arc::new(scorer), TracerSettings::from_config(config)))
    }

    pub fn settings(&self) -> &TracerSettings {
        &self.inner.settings
    }

    pub fn scorer(&self) -> &Arc<dyn ImpactScorer> {
        &self.inner.scorer
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.inner.queue
    }

    // ── Traces ────────────────────────────────────────────────────────

    /// Open a trace nested under the current one. It closes when the
    /// returned guard is dropped.
    pub fn trace(&self, mut options: TraceOptions) -> TraceGuard {
        let parent = context::current_trace();
        if options.session_id.is_none() {
            options.session_id = context::root_trace()
                .and_then(|root| root.session_id().map(str::to_owned));
        }
        let trace = Trace::open(options, parent.as_ref());
        context::push(trace.clone());
        TraceGuard::new(trace)
    }

    pub fn current_trace(&self) -> Option<Trace> {
        context::current_trace()
    }

    pub fn root_trace(&self) -> Option<Trace> {
        context::root_trace()
    }

    // ── Submission ────────────────────────────────────────────────────

    /// Submit a usage record for scoring.
    ///
    /// Returns immediately with a pending handle, unless sync mode scores
    /// it inline first. Fails only with [`Error::QueueFull`]; the record is
    /// then dropped and detached from its trace.
    pub fn submit_usage(&self, record: UsageRecord) -> Result<PendingResult> {
        let (handle, trace) = self.prepare(record);
        if self.inner.settings.sync_mode {
            let outcome = self.score_inline(handle.record());
            let _ = resolve(&handle, outcome);
            return Ok(handle);
        }
        self.enqueue(handle, trace)
    }

    /// Run the blocking scorer on behalf of a caller that may sit on a
    /// runtime thread. Blocking clients must not run there, so inside a
    /// tokio runtime the call moves to a scoped helper thread. A panicking
    /// scorer becomes a transport error.
    fn score_inline(
        &self,
        record: &UsageRecord,
    ) -> std::result::Result<ScoreResponse, ScorerError> {
        let scorer = &self.inner.scorer;
        let score = || scorer.score_blocking(std::slice::from_ref(record));
        let outcome = if Handle::try_current().is_ok() {
            thread::scope(|s| s.spawn(score).join())
        } else {
            panic::catch_unwind(AssertUnwindSafe(score))
        };
        outcome.unwrap_or_else(|_| {
            Err(ScorerError::Network(format!(
                "scorer '{}' panicked",
                scorer.name()
            )))
        })
    }

    /// Async flavour of [`submit_usage`](Self::submit_usage); sync mode
    /// awaits the async scorer instead of blocking.
    pub async fn submit_usage_async(&self, record: UsageRecord) -> Result<PendingResult> {
        let (handle, trace) = self.prepare(record);
        if self.inner.settings.sync_mode {
            let outcome = self.inner.scorer.score(vec![handle.record().clone()]).await;
            let _ = resolve(&handle, outcome);
            return Ok(handle);
        }
        self.enqueue(handle, trace)
    }

    /// Adapter entry point: extract usage from `call` and submit it.
    ///
    /// Never fails; problems are logged so the instrumented call is unaffected.
    pub fn observe<C, P>(&self, producer: &P, call: &C) -> Option<PendingResult>
    where
        C: ?Sized,
        P: UsageProducer<C> + ?Sized,
    {
        let record = self.extract(producer, call)?;
        self.submit_usage(record)
            .inspect_err(|e| warn!(provider = producer.provider(), error = %e, "Usage record dropped"))
            .ok()
    }

    pub async fn observe_async<C, P>(&self, producer: &P, call: &C) -> Option<PendingResult>
    where
        C: ?Sized,
        P: UsageProducer<C> + ?Sized,
    {
        let record = self.extract(producer, call)?;
        self.submit_usage_async(record)
            .await
            .inspect_err(|e| warn!(provider = producer.provider(), error = %e, "Usage record dropped"))
            .ok()
    }

    fn extract<C, P>(&self, producer: &P, call: &C) -> Option<UsageRecord>
    where
        C: ?Sized,
        P: UsageProducer<C> + ?Sized,
    {
        let record = producer.usage(call);
        if record.is_none() {
            debug!(provider = producer.provider(), "Call carried no usage");
        }
        record
    }

    /// Stamp the record, create its handle and attach it to the current trace.
    fn prepare(&self, mut record: UsageRecord) -> (PendingResult, Option<Trace>) {
        let open = context::open_traces();
        self.stamp(&mut record, &open);
        let handle = PendingResult::new(record, self.inner.settings.poll_interval);
        let current = open.last().cloned();
        if let Some(trace) = &current {
            trace.register(&handle);
        }
        debug!(
            request_id = handle.request_id().unwrap_or("-"),
            trace_id = current.as_ref().map(|t| t.id()).unwrap_or("-"),
            "Usage record submitted"
        );
        (handle, current)
    }

    fn stamp(&self, record: &mut UsageRecord, open: &[Trace]) {
        let settings = &self.inner.settings;
        record.request_id = Some(Uuid::new_v4().to_string());
        if record.utc_datetime.is_none() {
            record.utc_datetime = Some(Utc::now());
        }
        if let Some(current) = open.last() {
            record.trace_id = Some(current.id().to_string());
        }
        if record.session_id.is_none() {
            record.session_id = open
                .first()
                .and_then(|root| root.session_id().map(str::to_owned));
        }
        inherit(&mut record.client_id, open, Trace::client_id, &settings.client_id);
        inherit(&mut record.project_id, open, Trace::project_id, &settings.project_id);
        inherit(
            &mut record.application_id,
            open,
            Trace::application_id,
            &settings.application_id,
        );
        if record.environment.is_none() {
            record.environment = settings.environment.clone();
        }
    }

    fn enqueue(&self, handle: PendingResult, trace: Option<Trace>) -> Result<PendingResult> {
        let scorer = Arc::clone(&self.inner.scorer);
        let job_handle = handle.clone();
        let accepted = self.inner.queue.submit(move || {
            let outcome = scorer.score_blocking(std::slice::from_ref(job_handle.record()));
            resolve(&job_handle, outcome)
        });

        if !accepted {
            if let Some(trace) = trace {
                trace.unregister(&handle);
            }
            warn!(
                request_id = handle.request_id().unwrap_or("-"),
                capacity = self.inner.queue.capacity(),
                "Dispatch queue full, usage record dropped"
            );
            return Err(Error::QueueFull {
                capacity: self.inner.queue.capacity(),
            });
        }
        Ok(handle)
    }

    // ── Queue lifecycle ───────────────────────────────────────────────

    /// Wait for queued scoring jobs; returns how many are still outstanding.
    pub fn flush(&self, timeout: Duration) -> usize {
        self.inner.queue.flush(timeout)
    }

    pub fn pause(&self) {
        self.inner.queue.pause();
    }

    pub fn resume(&self) {
        self.inner.queue.resume();
    }

    /// Flush with the configured timeout, then stop the worker.
    pub fn shutdown(&self) -> usize {
        let outstanding = self.flush(self.inner.settings.flush_timeout);
        self.inner.queue.kill();
        outstanding
    }
}

/// Fill `slot` from the innermost trace that sets it, else from `default`.
fn inherit(
    slot: &mut Option<String>,
    open: &[Trace],
    pick: fn(&Trace) -> Option<&str>,
    default: &Option<String>,
) {
    if slot.is_some() {
        return;
    }
    *slot = open
        .iter()
        .rev()
        .find_map(|t| pick(t).map(str::to_owned))
        .or_else(|| default.clone());
}

/// Resolve `handle` from a scoring outcome. Transport failures resolve it
/// with an error row so waiters wake up, and are reported to the caller.
fn resolve(
    handle: &PendingResult,
    outcome: std::result::Result<ScoreResponse, ScorerError>,
) -> Result<()> {
    match outcome {
        Ok(response) => {
            let row = response.rows.into_iter().next().unwrap_or_else(|| {
                ImpactResult::failed("empty_response", "scorer returned no rows")
            });
            handle.set_result(row);
            Ok(())
        }
        Err(e) => {
            warn!(
                request_id = handle.request_id().unwrap_or("-"),
                error = %e,
                "Scoring failed, resolving with error row"
            );
            handle.set_result(ImpactResult::failed("transport_error", e.to_string()));
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ecotrace_core::ImpactMetrics;

    struct EchoScorer;

    #[async_trait]
    impl ImpactScorer for EchoScorer {
        fn name(&self) -> &str {
            "echo"
        }

        fn score_blocking(
            &self,
            rows: &[UsageRecord],
        ) -> std::result::Result<ScoreResponse, ScorerError> {
            if rows.iter().any(|r| r.model_id == "offline") {
                return Err(ScorerError::Network("connection refused".into()));
            }
            Ok(ScoreResponse {
                rows: rows
                    .iter()
                    .map(|r| {
                        ImpactResult::from_inference(ImpactMetrics {
                            usage_energy_wh: r.total_tokens() as f64,
                            ..ImpactMetrics::default()
                        })
                    })
                    .collect(),
            })
        }

        async fn score(
            &self,
            rows: Vec<UsageRecord>,
        ) -> std::result::Result<ScoreResponse, ScorerError> {
            self.score_blocking(&rows)
        }
    }

    fn tracer(settings: TracerSettings) -> ImpactTracer {
        ImpactTracer::new(Arc::new(EchoScorer), settings)
    }

    #[test]
    fn from_config_without_key_is_config_error() {
        let err = ImpactTracer::from_config(&AppConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn from_config_with_key_uses_settings() {
        let config = AppConfig {
            api_key: Some("sk-test".into()),
            sync_mode: true,
            ..AppConfig::default()
        };
        let tracer = ImpactTracer::from_config(&config).unwrap();
        assert!(tracer.settings().sync_mode);
        assert_eq!(tracer.scorer().name(), "http");
        assert_eq!(tracer.queue().capacity(), 100);
    }

    #[test]
    fn stamps_identifiers() {
        let tracer = tracer(TracerSettings {
            client_id: Some("default-client".into()),
            environment: Some("test".into()),
            ..TracerSettings::default()
        });
        let trace = tracer.trace(
            TraceOptions::default()
                .with_session("s-1")
                .with_project("proj-a"),
        );
        let handle = tracer
            .submit_usage(UsageRecord::new("gpt-4o").with_tokens(1, 1))
            .unwrap();
        let record = handle.record();
        assert!(record.request_id.is_some());
        assert!(record.utc_datetime.is_some());
        assert_eq!(record.trace_id.as_deref(), Some(trace.id()));
        assert_eq!(record.session_id.as_deref(), Some("s-1"));
        assert_eq!(record.project_id.as_deref(), Some("proj-a"));
        assert_eq!(record.client_id.as_deref(), Some("default-client"));
        assert_eq!(record.environment.as_deref(), Some("test"));
        tracer.flush(Duration::from_secs(5));
    }

    #[test]
    fn explicit_record_attribution_wins() {
        let tracer = tracer(TracerSettings::default());
        let _trace = tracer.trace(TraceOptions::default().with_client("trace-client"));
        let handle = tracer
            .submit_usage(UsageRecord::new("gpt-4o").with_client("record-client"))
            .unwrap();
        assert_eq!(handle.record().client_id.as_deref(), Some("record-client"));
        tracer.flush(Duration::from_secs(5));
    }

    #[test]
    fn innermost_trace_attribution_wins() {
        let tracer = tracer(TracerSettings::default());
        let _outer = tracer.trace(TraceOptions::default().with_application("outer-app"));
        let _inner = tracer.trace(TraceOptions::default().with_application("inner-app"));
        let handle = tracer.submit_usage(UsageRecord::new("gpt-4o")).unwrap();
        assert_eq!(handle.record().application_id.as_deref(), Some("inner-app"));
        tracer.flush(Duration::from_secs(5));
    }

    #[test]
    fn nested_trace_inherits_root_session() {
        let tracer = tracer(TracerSettings::default());
        let root = tracer.trace(TraceOptions::default().with_session("sess"));
        let child = tracer.trace(TraceOptions::default());
        assert_eq!(child.session_id(), Some("sess"));
        assert_eq!(root.children(), vec![child.trace().clone()]);
    }

    #[test]
    fn sync_mode_resolves_before_returning() {
        let tracer = tracer(TracerSettings {
            sync_mode: true,
            ..TracerSettings::default()
        });
        let handle = tracer
            .submit_usage(UsageRecord::new("gpt-4o").with_tokens(3, 4))
            .unwrap();
        assert!(handle.is_resolved());
        assert!(tracer.queue().stats().processed == 0);
        let row = handle.result().unwrap();
        assert!((row.total_impact.usage_energy_wh - 7.0).abs() < 1e-10);
    }

    #[test]
    fn transport_failure_resolves_with_error_row() {
        let tracer = tracer(TracerSettings::default());
        let handle = tracer.submit_usage(UsageRecord::new("offline")).unwrap();
        let row = handle.wait_result(Some(Duration::from_secs(5))).unwrap();
        assert!(row.is_error());
        assert_eq!(row.error.unwrap().code, "transport_error");
        tracer.flush(Duration::from_secs(5));
        assert_eq!(tracer.queue().stats().failed, 1);
    }

    #[test]
    fn queue_full_detaches_from_trace() {
        let tracer = tracer(TracerSettings {
            queue_capacity: 1,
            ..TracerSettings::default()
        });
        tracer.pause();
        let trace = tracer.trace(TraceOptions::default());
        tracer.submit_usage(UsageRecord::new("a")).unwrap();
        let err = tracer.submit_usage(UsageRecord::new("b")).unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 1 }));
        assert_eq!(trace.pending_results().len(), 1);
        tracer.resume();
        tracer.flush(Duration::from_secs(5));
    }

    #[test]
    fn observe_swallows_missing_usage() {
        use ecotrace_core::{ChatCompletion, ChatCompletionUsage};

        let tracer = tracer(TracerSettings::default());
        let adapter = ChatCompletionUsage::new("openai");
        let no_usage = ChatCompletion {
            body: serde_json::json!({"model": "gpt-4o"}),
            latency: Duration::ZERO,
        };
        assert!(tracer.observe(&adapter, &no_usage).is_none());

        let with_usage = ChatCompletion {
            body: serde_json::json!({
                "model": "gpt-4o",
                "usage": {"prompt_tokens": 2, "completion_tokens": 3}
            }),
            latency: Duration::from_millis(10),
        };
        let handle = tracer.observe(&adapter, &with_usage).unwrap();
        let row = handle.wait_result(Some(Duration::from_secs(5))).unwrap();
        assert!((row.total_impact.usage_energy_wh - 5.0).abs() < 1e-10);
    }

    #[tokio::test]
    async fn async_sync_mode_awaits_scorer() {
        let tracer = tracer(TracerSettings {
            sync_mode: true,
            ..TracerSettings::default()
        });
        let handle = tracer
            .submit_usage_async(UsageRecord::new("gpt-4o").with_tokens(5, 5))
            .await
            .unwrap();
        assert!(handle.is_resolved());
    }

    fn unreachable_http_tracer() -> ImpactTracer {
        // nothing listens on port 1, so every request fails fast
        let scorer = HttpScorer::new("http://127.0.0.1:1", "sk-test", Duration::from_secs(2))
            .unwrap();
        ImpactTracer::new(
            Arc::new(scorer),
            TracerSettings {
                sync_mode: true,
                ..TracerSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn sync_mode_with_http_scorer_inside_runtime() {
        let tracer = unreachable_http_tracer();
        let handle = tracer
            .submit_usage(UsageRecord::new("gpt-4o").with_tokens(1, 1))
            .unwrap();
        let row = handle.result().unwrap();
        assert_eq!(row.error.unwrap().code, "transport_error");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn observe_in_sync_mode_inside_runtime_resolves() {
        use ecotrace_core::{ChatCompletion, ChatCompletionUsage};

        let tracer = unreachable_http_tracer();
        let call = ChatCompletion {
            body: serde_json::json!({
                "model": "gpt-4o",
                "usage": {"prompt_tokens": 3, "completion_tokens": 4}
            }),
            latency: Duration::from_millis(5),
        };
        let handle = tracer
            .observe(&ChatCompletionUsage::new("openai"), &call)
            .unwrap();
        assert!(handle.result().unwrap().is_error());
    }

    struct PanickingScorer;

    #[async_trait]
    impl ImpactScorer for PanickingScorer {
        fn name(&self) -> &str {
            "panicking"
        }

        fn score_blocking(
            &self,
            _rows: &[UsageRecord],
        ) -> std::result::Result<ScoreResponse, ScorerError> {
            panic!("scorer bug")
        }

        async fn score(
            &self,
            rows: Vec<UsageRecord>,
        ) -> std::result::Result<ScoreResponse, ScorerError> {
            self.score_blocking(&rows)
        }
    }

    #[test]
    fn sync_mode_scorer_panic_resolves_with_error_row() {
        let tracer = ImpactTracer::new(
            Arc::new(PanickingScorer),
            TracerSettings {
                sync_mode: true,
                ..TracerSettings::default()
            },
        );
        let handle = tracer.submit_usage(UsageRecord::new("gpt-4o")).unwrap();
        let row = handle.result().unwrap();
        assert_eq!(row.error.unwrap().code, "transport_error");
    }

    #[test]
    fn shutdown_stops_worker() {
        let tracer = tracer(TracerSettings::default());
        tracer.submit_usage(UsageRecord::new("gpt-4o")).unwrap();
        assert_eq!(tracer.shutdown(), 0);
        assert!(!tracer.queue().is_running());
    }
}
