//! Adaptive timeout admission controller.
//!
//! The controller wraps one outbound call. It picks the most generous tier
//! that still has a free slot across the fleet, applies that tier's timeout to
//! the request, runs the call and gives the slot back however the call ends.
//! When every tier is saturated the call is refused without running.

use crate::application::capacity::{resolve_tiers, CapacityStrategy, MIN_REGISTRATION_TTL};
use crate::application::cascade::{AdmissionPermit, CascadeOutcome, TierCascade};
use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::config::{BackendFailurePolicy, Resolvable};
use crate::application::counter::{DistributedCounter, Membership};
use crate::application::metrics::Metrics;
use crate::application::ports::{
    Clock, CounterStore, HostRequest, HostResponse, OperationError, StoreError,
};
use crate::application::tier_cache::TierCache;
use crate::domain::report::{OutcomeReport, ReportedError};
use crate::domain::target::{base_url, TargetNamespace};
use crate::domain::tier::{QuotaTier, ResolvedTier, TierConfig};
use http::{Method, StatusCode, Uri};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "async")]
use std::future::Future;

/// Predicate deciding per call whether admission control applies.
pub type RequestFilter = Arc<dyn Fn(&Method, &Uri) -> bool + Send + Sync>;

/// Receives one report per controlled call.
pub type OutcomeCallback = Arc<dyn Fn(&OutcomeReport) + Send + Sync>;

/// Called with the chosen timeout right before the call runs.
pub type BeforeRequestHook = Arc<dyn Fn(&Uri, Duration) + Send + Sync>;

/// A call refused because every tier was saturated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRefused {
    target: String,
    request_count: u64,
}

impl AdmissionRefused {
    /// Create a refusal for calls to `target`.
    pub fn new(target: impl Into<String>, request_count: u64) -> Self {
        Self {
            target: target.into(),
            request_count,
        }
    }

    /// Base URL of the refused call.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Estimated number of concurrent calls, including the refused one.
    pub fn request_count(&self) -> u64 {
        self.request_count
    }
}

impl fmt::Display for AdmissionRefused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Request to {} aborted due to {} concurrent requests",
            self.target, self.request_count
        )
    }
}

impl std::error::Error for AdmissionRefused {}

/// Error returned by `AdmissionController::execute`.
#[derive(Debug)]
pub enum AdmissionError<E> {
    /// Every tier was saturated; the call did not run
    Throttled(AdmissionRefused),
    /// The shared store failed under `BackendFailurePolicy::FailClosed`
    BackendUnavailable(StoreError),
    /// The call ran and returned this error
    Operation(E),
}

impl<E> AdmissionError<E> {
    /// True if the call was refused for lack of capacity.
    pub fn is_throttled(&self) -> bool {
        matches!(self, AdmissionError::Throttled(_))
    }

    /// The wrapped call's own error, if that is what this is.
    pub fn into_operation(self) -> Option<E> {
        match self {
            AdmissionError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::Throttled(refused) => write!(f, "{}", refused),
            AdmissionError::BackendUnavailable(e) => write!(f, "admission backend unavailable: {}", e),
            AdmissionError::Operation(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdmissionError::Throttled(refused) => Some(refused),
            AdmissionError::BackendUnavailable(e) => Some(e),
            AdmissionError::Operation(e) => Some(e),
        }
    }
}

/// Chooses a timeout tier for each call and enforces fleet-wide concurrency
/// limits per tier.
///
/// Build one with `AdmissionController::builder()`.
///
/// # Example
/// ```
/// use dynamic_timeout::{AdmissionController, MemoryStore, PendingRequest, SystemClock, TierConfig};
/// use http::{Method, StatusCode, Uri};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let store = Arc::new(MemoryStore::new(Arc::new(SystemClock::new())));
/// let controller = AdmissionController::builder()
///     .with_name("payments")
///     .with_tiers(vec![TierConfig::limited(2.0, 4), TierConfig::unlimited(0.5)])
///     .with_store(store)
///     .build()
///     .unwrap();
///
/// let mut request = PendingRequest::new(Method::GET, Uri::from_static("https://payments.internal/charge"));
/// let status = controller
///     .execute(&mut request, |_req| Ok::<_, std::io::Error>(StatusCode::OK))
///     .unwrap();
/// assert_eq!(status, StatusCode::OK);
/// assert_eq!(request.timeouts().timeout, Some(Duration::from_secs(2)));
/// ```
pub struct AdmissionController {
    pub(crate) name: Option<String>,
    pub(crate) key_prefix: String,
    pub(crate) tiers: Resolvable<Vec<TierConfig>>,
    pub(crate) tier_cache: TierCache,
    pub(crate) cascade: Option<TierCascade>,
    pub(crate) counter_store: Option<Arc<dyn CounterStore>>,
    pub(crate) capacity: Option<CapacityStrategy>,
    pub(crate) threads_per_process: Resolvable<usize>,
    pub(crate) filter: Option<RequestFilter>,
    pub(crate) callback: Option<OutcomeCallback>,
    pub(crate) before_request: Option<BeforeRequestHook>,
    pub(crate) failure_policy: BackendFailurePolicy,
    pub(crate) circuit_breaker: Arc<CircuitBreaker>,
    pub(crate) metrics: Metrics,
    pub(crate) clock: Arc<dyn Clock>,
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("name", &self.name)
            .field("key_prefix", &self.key_prefix)
            .field("tiers", &self.tiers)
            .field("has_backend", &self.cascade.is_some())
            .field("failure_policy", &self.failure_policy)
            .field("circuit_state", &self.circuit_breaker.state())
            .finish_non_exhaustive()
    }
}

/// Why admission gave up without a decision.
enum Interrupted {
    Saturated { rejected_capacity: u64 },
    Store(StoreError),
}

impl From<StoreError> for Interrupted {
    fn from(e: StoreError) -> Self {
        Interrupted::Store(e)
    }
}

impl AdmissionController {
    /// Configured target name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Prefix of every shared-store key.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Behaviour when the shared store fails.
    pub fn backend_failure_policy(&self) -> BackendFailurePolicy {
        self.failure_policy
    }

    /// Admission statistics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Health tracker of the shared store.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Normalized tiers for the current configuration.
    pub fn tiers(&self) -> Arc<[QuotaTier]> {
        self.tier_cache.get(&self.tiers.resolve())
    }

    /// Run `operation` under the timeout of the best available tier.
    ///
    /// The chosen timeout is applied to `request` before `operation` runs.
    /// Errors from `operation` are returned unchanged in
    /// `AdmissionError::Operation`.
    pub fn execute<R, T, E, F>(&self, request: &mut R, operation: F) -> Result<T, AdmissionError<E>>
    where
        R: HostRequest,
        T: HostResponse,
        E: OperationError,
        F: FnOnce(&mut R) -> Result<T, E>,
    {
        let Some(mut attempt) = self.begin::<R, E>(&*request)? else {
            return operation(request).map_err(AdmissionError::Operation);
        };

        self.prepare(request, &mut attempt);
        let result = operation(request);
        attempt.complete(&result);
        result.map_err(AdmissionError::Operation)
    }

    /// Async version of `execute`. The request is handed to `operation` by
    /// value once its timeout is applied.
    ///
    /// Dropping the returned future before it completes releases the slot and
    /// reports the call as aborted.
    #[cfg(feature = "async")]
    pub async fn execute_async<R, T, E, F, Fut>(
        &self,
        mut request: R,
        operation: F,
    ) -> Result<T, AdmissionError<E>>
    where
        R: HostRequest,
        T: HostResponse,
        E: OperationError,
        F: FnOnce(R) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(mut attempt) = self.begin::<R, E>(&request)? else {
            return operation(request).await.map_err(AdmissionError::Operation);
        };

        self.prepare(&mut request, &mut attempt);
        let result = operation(request).await;
        attempt.complete(&result);
        result.map_err(AdmissionError::Operation)
    }

    fn namespace(&self, uri: &Uri) -> TargetNamespace {
        let name = match self.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => base_url(uri),
        };
        TargetNamespace::new(self.key_prefix.as_str(), name)
    }

    fn bypass(&self, reason: &'static str) -> Option<Attempt> {
        tracing::debug!(reason, "Bypassing admission control");
        self.metrics.record_bypassed();
        None
    }

    /// Decide whether and how the call runs.
    ///
    /// `Ok(None)` means bypass. Refusals have already been reported when an
    /// error is returned.
    fn begin<R: HostRequest, E>(&self, request: &R) -> Result<Option<Attempt>, AdmissionError<E>> {
        let Some(cascade) = self.cascade.as_ref() else {
            return Ok(self.bypass("no admission backend"));
        };

        let raw = self.tiers.resolve();
        if raw.is_empty() {
            return Ok(self.bypass("no tiers configured"));
        }
        if let Some(filter) = &self.filter {
            if !filter(request.method(), request.uri()) {
                return Ok(self.bypass("filtered"));
            }
        }

        let tiers = self.tier_cache.get(&raw);
        if tiers.is_empty() {
            return Ok(self.bypass("no valid tiers"));
        }

        let namespace = self.namespace(request.uri());
        let mut attempt = Attempt::new(
            self.callback
                .as_ref()
                .map(|callback| Reporter::new(callback, request)),
            Arc::clone(&self.clock),
        );

        if !self.circuit_breaker.allow_request() {
            let error = StoreError::Connection("circuit breaker open".to_string());
            return self.on_backend_failure(attempt, error);
        }

        match self.admit(cascade, &namespace, &tiers, &mut attempt) {
            Ok(()) => {
                self.circuit_breaker.record_success();
                tracing::debug!(
                    target_name = namespace.name(),
                    timeout_ms = attempt.timeout.map(|t| t.as_millis() as u64),
                    "Admitted call"
                );
                Ok(Some(attempt))
            }
            Err(Interrupted::Saturated { rejected_capacity }) => {
                self.circuit_breaker.record_success();
                // The observed count is a snapshot and may lag behind the
                // capacity that was just refused
                let request_count = attempt
                    .observed_count
                    .max(rejected_capacity.saturating_add(1));
                let refused = AdmissionRefused::new(base_url(request.uri()), request_count);

                self.metrics.record_throttled();
                tracing::debug!(
                    target_name = namespace.name(),
                    request_count,
                    "All tiers saturated, refusing call"
                );
                attempt.finish(
                    None,
                    Some(ReportedError::Throttled {
                        request_count,
                        message: refused.to_string(),
                    }),
                );
                Err(AdmissionError::Throttled(refused))
            }
            Err(Interrupted::Store(error)) => {
                self.circuit_breaker.record_failure();
                self.metrics.record_backend_failure();
                self.on_backend_failure(attempt, error)
            }
        }
    }

    fn admit(
        &self,
        cascade: &TierCascade,
        namespace: &TargetNamespace,
        tiers: &[QuotaTier],
        attempt: &mut Attempt,
    ) -> Result<(), Interrupted> {
        if attempt.reporter.is_some() {
            if let Some(store) = &self.counter_store {
                let largest = tiers
                    .last()
                    .map(QuotaTier::timeout)
                    .filter(|ttl| !ttl.is_zero())
                    .unwrap_or(MIN_REGISTRATION_TTL);
                let counter = DistributedCounter::new(
                    namespace.requests_key(),
                    largest,
                    Arc::clone(store),
                    Arc::clone(&self.clock),
                );
                attempt.membership = Some(counter.enter()?);
                attempt.observed_count = counter.value()? as u64;
            }
        }

        let resolved = self.resolve(namespace, tiers)?;
        match cascade.select(namespace, &resolved)? {
            CascadeOutcome::Selected { timeout, permit } => {
                attempt.timeout = Some(timeout);
                attempt.permit = permit;
                Ok(())
            }
            CascadeOutcome::Saturated { rejected_capacity } => {
                Err(Interrupted::Saturated { rejected_capacity })
            }
        }
    }

    fn resolve(
        &self,
        namespace: &TargetNamespace,
        tiers: &[QuotaTier],
    ) -> Result<Vec<ResolvedTier>, StoreError> {
        let needs_fleet_size = tiers
            .iter()
            .any(|tier| tier.capacity().is_some() && !tier.is_unlimited());
        if !needs_fleet_size {
            return Ok(resolve_tiers(tiers, 0));
        }

        match &self.capacity {
            Some(strategy) => strategy.compute(namespace, tiers),
            // Without a shared counter store this process is the whole fleet
            None => {
                let threads = (self.threads_per_process.resolve() as u64).max(1);
                Ok(resolve_tiers(tiers, threads))
            }
        }
    }

    fn on_backend_failure<E>(
        &self,
        attempt: Attempt,
        error: StoreError,
    ) -> Result<Option<Attempt>, AdmissionError<E>> {
        match self.failure_policy {
            BackendFailurePolicy::FailOpen => {
                tracing::warn!(
                    error = %error,
                    "Shared store unavailable, running call without a timeout override"
                );
                attempt.discard();
                self.metrics.record_bypassed();
                Ok(None)
            }
            BackendFailurePolicy::FailClosed => {
                tracing::warn!(error = %error, "Shared store unavailable, refusing call");
                attempt.finish(
                    None,
                    Some(ReportedError::BackendUnavailable {
                        message: error.to_string(),
                    }),
                );
                Err(AdmissionError::BackendUnavailable(error))
            }
        }
    }

    fn prepare<R: HostRequest>(&self, request: &mut R, attempt: &mut Attempt) {
        // Durations exclude the time spent walking the tiers
        attempt.started = self.clock.now();

        if let Some(timeout) = attempt.timeout {
            request.apply_timeout(timeout);
            if let Some(hook) = &self.before_request {
                hook(request.uri(), timeout);
            }
        }
        self.metrics.record_admitted();
    }
}

struct Reporter {
    callback: OutcomeCallback,
    method: Method,
    uri: Uri,
}

impl Reporter {
    fn new<R: HostRequest>(callback: &OutcomeCallback, request: &R) -> Self {
        Self {
            callback: Arc::clone(callback),
            method: request.method().clone(),
            uri: request.uri().clone(),
        }
    }
}

/// State of one controlled call. Releases its slot and counter membership and
/// reports the outcome exactly once, at the latest when dropped.
struct Attempt {
    reporter: Option<Reporter>,
    clock: Arc<dyn Clock>,
    started: Instant,
    timeout: Option<Duration>,
    observed_count: u64,
    permit: Option<AdmissionPermit>,
    membership: Option<Membership>,
    settled: bool,
}

impl Attempt {
    fn new(reporter: Option<Reporter>, clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        Self {
            reporter,
            clock,
            started,
            timeout: None,
            observed_count: 1,
            permit: None,
            membership: None,
            settled: false,
        }
    }

    fn complete<T: HostResponse, E: OperationError>(self, result: &Result<T, E>) {
        let (status, error) = match result {
            Ok(response) => (response.status(), None),
            Err(e) if e.is_timeout() => (
                None,
                Some(ReportedError::TimedOut {
                    message: e.to_string(),
                }),
            ),
            Err(e) => (
                None,
                Some(ReportedError::Failed {
                    message: e.to_string(),
                }),
            ),
        };
        self.finish(status, error);
    }

    fn finish(mut self, status: Option<StatusCode>, error: Option<ReportedError>) {
        self.settle(status, error);
    }

    /// Release without reporting.
    fn discard(mut self) {
        self.settled = true;
    }

    fn settle(&mut self, status: Option<StatusCode>, error: Option<ReportedError>) {
        if self.settled {
            return;
        }
        self.settled = true;
        drop(self.permit.take());

        if let Some(reporter) = &self.reporter {
            let report = OutcomeReport::new(
                reporter.method.clone(),
                reporter.uri.clone(),
                status,
                self.clock.now().saturating_duration_since(self.started),
                self.timeout,
                self.observed_count,
                error,
            );
            (reporter.callback)(&report);
        }
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        self.settle(None, Some(ReportedError::Aborted));
    }
}
