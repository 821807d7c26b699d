//! Configuration values shared by the controller and its builder.

use crate::domain::tier::TierConfig;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// A setting that is either a fixed value or a supplier called once per use.
///
/// Suppliers are re-evaluated on every call and never memoized.
pub enum Resolvable<T> {
    /// A fixed value
    Value(T),
    /// A zero-argument supplier
    Supplier(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T: Clone> Resolvable<T> {
    /// Current value of the setting.
    pub fn resolve(&self) -> T {
        match self {
            Resolvable::Value(value) => value.clone(),
            Resolvable::Supplier(supplier) => supplier(),
        }
    }
}

impl<T> Resolvable<T> {
    /// Wrap a supplier.
    pub fn supplier(f: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Resolvable::Supplier(Arc::new(f))
    }
}

impl<T> From<T> for Resolvable<T> {
    fn from(value: T) -> Self {
        Resolvable::Value(value)
    }
}

impl<T: Clone> Clone for Resolvable<T> {
    fn clone(&self) -> Self {
        match self {
            Resolvable::Value(value) => Resolvable::Value(value.clone()),
            Resolvable::Supplier(supplier) => Resolvable::Supplier(Arc::clone(supplier)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolvable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolvable::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolvable::Supplier(_) => f.write_str("Supplier(<fn>)"),
        }
    }
}

/// What to do when the shared store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFailurePolicy {
    /// Run the call without a timeout override
    #[default]
    FailOpen,
    /// Refuse the call with `AdmissionError::BackendUnavailable`
    FailClosed,
}

/// Default prefix of every shared-store key.
pub const DEFAULT_KEY_PREFIX: &str = "dynamic-timeout:";

/// Declarative controller settings, e.g. loaded from a config file.
///
/// # Example
/// ```
/// use dynamic_timeout::ControllerSettings;
///
/// let settings: ControllerSettings = serde_json::from_str(r#"{
///     "name": "payments",
///     "tiers": [{"timeout": 2.0, "capacity": 0.5}, {"timeout": 0.5, "limit": -1}],
///     "threads_per_process": 8,
///     "backend_failure_policy": "fail_closed"
/// }"#).unwrap();
/// assert_eq!(settings.tiers.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Target name; the request's base URL is used when absent
    pub name: Option<String>,
    /// Prefix of every shared-store key
    pub key_prefix: String,
    /// Raw tier entries
    pub tiers: Vec<TierConfig>,
    /// Concurrent calls one process can make
    pub threads_per_process: usize,
    /// Behaviour when the shared store fails
    pub backend_failure_policy: BackendFailurePolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            name: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            tiers: Vec::new(),
            threads_per_process: 1,
            backend_failure_policy: BackendFailurePolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_value_resolves_to_itself() {
        let setting: Resolvable<usize> = 4.into();
        assert_eq!(setting.resolve(), 4);
    }

    #[test]
    fn test_supplier_is_called_every_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let setting = Resolvable::supplier(move || counter.fetch_add(1, Ordering::SeqCst) + 1);

        assert_eq!(setting.resolve(), 1);
        assert_eq!(setting.resolve(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_settings_defaults() {
        let settings: ControllerSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, ControllerSettings::default());
        assert_eq!(settings.key_prefix, DEFAULT_KEY_PREFIX);
        assert_eq!(settings.backend_failure_policy, BackendFailurePolicy::FailOpen);
    }

    #[test]
    fn test_debug_hides_supplier() {
        let setting: Resolvable<usize> = Resolvable::supplier(|| 1);
        assert_eq!(format!("{:?}", setting), "Supplier(<fn>)");
    }
}
