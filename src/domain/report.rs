//! Outcome reports for admitted, failed and throttled calls.

use http::{Method, StatusCode, Uri};
use std::fmt;
use std::time::Duration;

/// The terminal error of a reported call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedError {
    /// Every tier was saturated
    Throttled {
        /// Estimated number of concurrent calls, including the refused one
        request_count: u64,
        /// Human-readable refusal message
        message: String,
    },
    /// The wrapped call hit its own deadline
    TimedOut {
        /// The operation's error message
        message: String,
    },
    /// The shared store failed and the controller is configured to fail closed
    BackendUnavailable {
        /// The store error message
        message: String,
    },
    /// The wrapped call failed for any other reason
    Failed {
        /// The operation's error message
        message: String,
    },
    /// The wrapped call unwound or was dropped before it completed
    Aborted,
}

impl fmt::Display for ReportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportedError::Throttled { message, .. } => write!(f, "throttled: {}", message),
            ReportedError::TimedOut { message } => write!(f, "timed out: {}", message),
            ReportedError::BackendUnavailable { message } => {
                write!(f, "backend unavailable: {}", message)
            }
            ReportedError::Failed { message } => write!(f, "failed: {}", message),
            ReportedError::Aborted => write!(f, "aborted before completion"),
        }
    }
}

/// Immutable record of what happened to one call.
///
/// Reports are handed to the outcome callback exactly once per attempt that
/// was not bypassed.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeReport {
    method: Method,
    uri: Uri,
    status: Option<StatusCode>,
    duration: Duration,
    timeout: Option<Duration>,
    observed_count: u64,
    error: Option<ReportedError>,
}

impl OutcomeReport {
    /// Create a report.
    pub fn new(
        method: Method,
        uri: Uri,
        status: Option<StatusCode>,
        duration: Duration,
        timeout: Option<Duration>,
        observed_count: u64,
        error: Option<ReportedError>,
    ) -> Self {
        Self {
            method,
            uri,
            status,
            duration,
            timeout,
            observed_count,
            error,
        }
    }

    /// HTTP method of the call.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URI of the call.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Response status, if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Time spent in the call itself, excluding admission.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The timeout of the selected tier.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The terminal error, if any.
    pub fn error(&self) -> Option<&ReportedError> {
        self.error.as_ref()
    }

    /// Number of concurrent calls to the target.
    ///
    /// For throttled calls this is the refusal's estimate, otherwise the
    /// snapshot taken before the call started.
    pub fn request_count(&self) -> u64 {
        match &self.error {
            Some(ReportedError::Throttled { request_count, .. }) => *request_count,
            _ => self.observed_count,
        }
    }

    /// True if the call was refused because every tier was saturated.
    pub fn is_throttled(&self) -> bool {
        matches!(self.error, Some(ReportedError::Throttled { .. }))
    }

    /// True if the call failed on its own deadline.
    pub fn is_timed_out(&self) -> bool {
        matches!(self.error, Some(ReportedError::TimedOut { .. }))
    }

    /// True if the call ended with any error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(error: Option<ReportedError>) -> OutcomeReport {
        OutcomeReport::new(
            Method::GET,
            Uri::from_static("https://example.com"),
            Some(StatusCode::OK),
            Duration::from_millis(500),
            Some(Duration::from_millis(1500)),
            4,
            error,
        )
    }

    #[test]
    fn test_attributes() {
        let report = report(None);
        assert_eq!(report.method(), Method::GET);
        assert_eq!(report.uri(), &Uri::from_static("https://example.com"));
        assert_eq!(report.status(), Some(StatusCode::OK));
        assert_eq!(report.duration(), Duration::from_millis(500));
        assert_eq!(report.timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_successful_call() {
        let report = report(None);
        assert_eq!(report.request_count(), 4);
        assert!(!report.is_error());
        assert!(!report.is_throttled());
        assert!(!report.is_timed_out());
    }

    #[test]
    fn test_throttled_call_uses_refusal_estimate() {
        let report = report(Some(ReportedError::Throttled {
            request_count: 5,
            message: "throttled".to_string(),
        }));
        assert_eq!(report.request_count(), 5);
        assert!(report.is_error());
        assert!(report.is_throttled());
        assert!(!report.is_timed_out());
    }

    #[test]
    fn test_timed_out_call() {
        let report = report(Some(ReportedError::TimedOut {
            message: "timed out".to_string(),
        }));
        assert_eq!(report.request_count(), 4);
        assert!(report.is_error());
        assert!(!report.is_throttled());
        assert!(report.is_timed_out());
    }

    #[test]
    fn test_error_display() {
        let error = ReportedError::Failed {
            message: "connection reset".to_string(),
        };
        assert_eq!(error.to_string(), "failed: connection reset");
        assert_eq!(ReportedError::Aborted.to_string(), "aborted before completion");
    }
}
