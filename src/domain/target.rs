//! Naming of the shared-store keys that belong to one call target.

use http::Uri;
use std::time::Duration;

/// Base URL of a request: scheme and lowercased host, with the port only when
/// it differs from the scheme's default.
pub fn base_url(uri: &Uri) -> String {
    let scheme = uri.scheme_str().unwrap_or("http");
    let host = uri.host().unwrap_or_default().to_ascii_lowercase();
    let default_port = match scheme {
        "https" | "wss" => Some(443),
        "http" | "ws" => Some(80),
        _ => None,
    };

    match uri.port_u16() {
        Some(port) if Some(port) != default_port => format!("{}://{}:{}", scheme, host, port),
        _ => format!("{}://{}", scheme, host),
    }
}

/// Key namespace of one target in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetNamespace {
    prefix: String,
    name: String,
}

impl TargetNamespace {
    /// Create a namespace for `name` under `prefix`.
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
        }
    }

    /// Name of the target (configured name or base URL).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the admission section for one tier.
    pub fn section_key(&self, timeout: Duration) -> String {
        format!("{}{}.{}", self.prefix, self.name, timeout.as_secs_f64())
    }

    /// Key of the in-flight request counter.
    pub fn requests_key(&self) -> String {
        format!("{}{}.requests", self.prefix, self.name)
    }

    /// Key of the process registration counter.
    pub fn processes_key(&self) -> String {
        format!("{}{}.processes", self.prefix, self.name)
    }
}
