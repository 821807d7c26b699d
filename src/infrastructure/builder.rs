//! Builder for `AdmissionController`.

use crate::application::capacity::{CapacityStrategy, ProcessIdentity};
use crate::application::cascade::TierCascade;
use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::application::config::{
    BackendFailurePolicy, ControllerSettings, Resolvable, DEFAULT_KEY_PREFIX,
};
use crate::application::controller::{
    AdmissionController, BeforeRequestHook, OutcomeCallback, RequestFilter,
};
use crate::application::metrics::Metrics;
use crate::application::ports::{AdmissionBackend, Clock, CounterStore};
use crate::application::tier_cache::TierCache;
use crate::domain::report::OutcomeReport;
use crate::domain::tier::TierConfig;
use crate::infrastructure::clock::SystemClock;
use http::{Method, Uri};
use std::sync::Arc;
use std::time::Duration;

/// Error returned when building an `AdmissionController` fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// An explicit target name must not be empty
    EmptyName,
    /// The key prefix must not be empty
    EmptyKeyPrefix,
    /// The circuit breaker needs at least one failure to open
    ZeroFailureThreshold,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::EmptyName => write!(f, "target name must not be empty"),
            BuildError::EmptyKeyPrefix => write!(f, "key prefix must not be empty"),
            BuildError::ZeroFailureThreshold => {
                write!(f, "circuit breaker failure threshold must be greater than 0")
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// Builder for constructing an `AdmissionController`.
pub struct AdmissionControllerBuilder {
    name: Option<String>,
    key_prefix: String,
    tiers: Resolvable<Vec<TierConfig>>,
    backend: Option<Arc<dyn AdmissionBackend>>,
    counter_store: Option<Arc<dyn CounterStore>>,
    identity: Option<ProcessIdentity>,
    threads_per_process: Resolvable<usize>,
    filter: Option<RequestFilter>,
    callback: Option<OutcomeCallback>,
    before_request: Option<BeforeRequestHook>,
    failure_policy: BackendFailurePolicy,
    circuit_breaker: CircuitBreakerConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl Default for AdmissionControllerBuilder {
    fn default() -> Self {
        Self {
            name: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            tiers: Resolvable::Value(Vec::new()),
            backend: None,
            counter_store: None,
            identity: None,
            threads_per_process: Resolvable::Value(1),
            filter: None,
            callback: None,
            before_request: None,
            failure_policy: BackendFailurePolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            clock: None,
        }
    }
}

impl AdmissionControllerBuilder {
    /// Seed a builder from declarative settings.
    ///
    /// Stores, callbacks and the clock still have to be set on the builder.
    pub fn from_settings(settings: ControllerSettings) -> Self {
        let builder = Self::default()
            .with_key_prefix(settings.key_prefix)
            .with_tiers(settings.tiers)
            .with_threads_per_process(settings.threads_per_process)
            .with_backend_failure_policy(settings.backend_failure_policy);

        match settings.name {
            Some(name) => builder.with_name(name),
            None => builder,
        }
    }

    /// Name the target instead of deriving it from each request's base URL.
    ///
    /// Calls to every host sharing a name share their tier slots.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the prefix of every shared-store key.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Use a fixed tier configuration.
    pub fn with_tiers(mut self, tiers: Vec<TierConfig>) -> Self {
        self.tiers = Resolvable::Value(tiers);
        self
    }

    /// Read the tier configuration from `supplier` on every call.
    ///
    /// Normalization is only redone when the supplied tiers change.
    pub fn with_tier_supplier(
        mut self,
        supplier: impl Fn() -> Vec<TierConfig> + Send + Sync + 'static,
    ) -> Self {
        self.tiers = Resolvable::supplier(supplier);
        self
    }

    /// Use one store as both admission backend and counter store.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: AdmissionBackend + CounterStore + 'static,
    {
        self.backend = Some(store.clone() as Arc<dyn AdmissionBackend>);
        self.counter_store = Some(store as Arc<dyn CounterStore>);
        self
    }

    /// Set the admission backend. Without one every call is bypassed.
    pub fn with_admission_backend(mut self, backend: Arc<dyn AdmissionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the store used for request and process counters.
    ///
    /// Without one, observed counts are 1 and capacity tiers treat this
    /// process as the whole fleet.
    pub fn with_counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counter_store = Some(store);
        self
    }

    /// Identity this process registers under. Defaults to `<hostname>:<pid>`.
    pub fn with_process_identity(mut self, identity: ProcessIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Number of concurrent calls one process can make.
    pub fn with_threads_per_process(mut self, threads: usize) -> Self {
        self.threads_per_process = Resolvable::Value(threads);
        self
    }

    /// Read the threads per process from `supplier` on every call.
    pub fn with_threads_supplier(
        mut self,
        supplier: impl Fn() -> usize + Send + Sync + 'static,
    ) -> Self {
        self.threads_per_process = Resolvable::supplier(supplier);
        self
    }

    /// Only control calls for which `filter` returns true.
    pub fn with_filter(
        mut self,
        filter: impl Fn(&Method, &Uri) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Receive an `OutcomeReport` for every controlled call.
    ///
    /// Setting a callback also enables the per-target request counter.
    pub fn with_callback(
        mut self,
        callback: impl Fn(&OutcomeReport) + Send + Sync + 'static,
    ) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Run `hook` with the chosen timeout right before each call.
    pub fn with_before_request(
        mut self,
        hook: impl Fn(&Uri, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.before_request = Some(Arc::new(hook));
        self
    }

    /// Choose what happens when the shared store fails.
    pub fn with_backend_failure_policy(mut self, policy: BackendFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Tune the circuit breaker guarding the shared store.
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    /// Returns `BuildError` if the configuration is invalid.
    pub fn build(self) -> Result<AdmissionController, BuildError> {
        if matches!(self.name.as_deref(), Some("")) {
            return Err(BuildError::EmptyName);
        }
        if self.key_prefix.is_empty() {
            return Err(BuildError::EmptyKeyPrefix);
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(BuildError::ZeroFailureThreshold);
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let metrics = Metrics::new();

        let capacity = self.counter_store.as_ref().map(|store| {
            CapacityStrategy::new(
                self.identity.unwrap_or_else(ProcessIdentity::current),
                self.threads_per_process.clone(),
                Arc::clone(store),
                Arc::clone(&clock),
            )
        });

        Ok(AdmissionController {
            name: self.name,
            key_prefix: self.key_prefix,
            tiers: self.tiers,
            tier_cache: TierCache::new(metrics.clone()),
            cascade: self.backend.map(TierCascade::new),
            counter_store: self.counter_store,
            capacity,
            threads_per_process: self.threads_per_process,
            filter: self.filter,
            callback: self.callback,
            before_request: self.before_request,
            failure_policy: self.failure_policy,
            circuit_breaker: Arc::new(CircuitBreaker::new(
                self.circuit_breaker,
                Arc::clone(&clock),
            )),
            metrics,
            clock,
        })
    }
}

impl AdmissionController {
    /// Create a builder with default settings.
    pub fn builder() -> AdmissionControllerBuilder {
        AdmissionControllerBuilder::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let controller = AdmissionController::builder().build().unwrap();
        assert_eq!(controller.name(), None);
        assert_eq!(controller.key_prefix(), DEFAULT_KEY_PREFIX);
        assert_eq!(
            controller.backend_failure_policy(),
            BackendFailurePolicy::FailOpen
        );
        assert_eq!(controller.circuit_breaker().config().failure_threshold, 5);
        assert!(controller.tiers().is_empty());
    }

    #[test]
    fn test_rejects_empty_name() {
        let result = AdmissionController::builder().with_name("").build();
        assert_eq!(result.unwrap_err(), BuildError::EmptyName);
    }

    #[test]
    fn test_rejects_empty_prefix() {
        let result = AdmissionController::builder().with_key_prefix("").build();
        assert_eq!(result.unwrap_err(), BuildError::EmptyKeyPrefix);
    }

    #[test]
    fn test_rejects_zero_failure_threshold() {
        let result = AdmissionController::builder()
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 0,
                recovery_timeout: Duration::from_secs(1),
            })
            .build();
        assert_eq!(result.unwrap_err(), BuildError::ZeroFailureThreshold);
    }

    #[test]
    fn test_from_settings() {
        let settings: ControllerSettings = serde_json::from_str(
            r#"{
                "name": "search",
                "key_prefix": "svc:",
                "tiers": [{"timeout": 1.5, "limit": 3}, {"timeout": 0.25, "limit": -1}],
                "backend_failure_policy": "fail_closed"
            }"#,
        )
        .unwrap();

        let controller = AdmissionControllerBuilder::from_settings(settings)
            .build()
            .unwrap();
        assert_eq!(controller.name(), Some("search"));
        assert_eq!(controller.key_prefix(), "svc:");
        assert_eq!(
            controller.backend_failure_policy(),
            BackendFailurePolicy::FailClosed
        );

        let tiers = controller.tiers();
        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[0].timeout(), Duration::from_millis(250));
        assert!(tiers[0].is_unlimited());
        assert_eq!(tiers[1].limit(), 3);
    }

    #[test]
    fn test_build_error_display() {
        assert_eq!(
            BuildError::ZeroFailureThreshold.to_string(),
            "circuit breaker failure threshold must be greater than 0"
        );
    }
}
