//! Adapters between host request types and the `HostRequest` port.

use crate::application::ports::HostRequest;
use http::{Method, Uri};
use std::time::Duration;

/// Timeout settings carried by an outbound request.
///
/// Applying a tier's timeout sets `timeout` and clears the finer-grained
/// phases so that the overall budget is the only one in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestTimeouts {
    /// Budget for the whole call
    pub timeout: Option<Duration>,
    /// Budget for establishing the connection
    pub connect: Option<Duration>,
    /// Budget for reading the response
    pub read: Option<Duration>,
    /// Budget for writing the request
    pub write: Option<Duration>,
}

impl RequestTimeouts {
    /// Timeouts with only the overall budget set.
    pub fn overall(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

/// A transport-agnostic description of an outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    method: Method,
    uri: Uri,
    timeouts: RequestTimeouts,
}

impl PendingRequest {
    /// Create a request with no timeouts set.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            timeouts: RequestTimeouts::default(),
        }
    }

    /// Replace the request's timeouts.
    pub fn with_timeouts(mut self, timeouts: RequestTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Current timeouts.
    pub fn timeouts(&self) -> &RequestTimeouts {
        &self.timeouts
    }

    /// Mutable access to the timeouts.
    pub fn timeouts_mut(&mut self) -> &mut RequestTimeouts {
        &mut self.timeouts
    }
}

impl HostRequest for PendingRequest {
    fn method(&self) -> &Method {
        &self.method
    }

    fn uri(&self) -> &Uri {
        &self.uri
    }

    fn apply_timeout(&mut self, timeout: Duration) {
        self.timeouts = RequestTimeouts::overall(timeout);
    }
}

/// `http::Request` carries its timeouts as a `RequestTimeouts` extension that
/// the transport reads before sending.
impl<B> HostRequest for http::Request<B> {
    fn method(&self) -> &Method {
        http::Request::method(self)
    }

    fn uri(&self) -> &Uri {
        http::Request::uri(self)
    }

    fn apply_timeout(&mut self, timeout: Duration) {
        self.extensions_mut()
            .insert(RequestTimeouts::overall(timeout));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_timeout_clears_phases() {
        let mut request = PendingRequest::new(Method::GET, Uri::from_static("http://localhost"))
            .with_timeouts(RequestTimeouts {
                timeout: Some(Duration::from_secs(30)),
                connect: Some(Duration::from_secs(1)),
                read: Some(Duration::from_secs(5)),
                write: Some(Duration::from_secs(5)),
            });

        request.apply_timeout(Duration::from_millis(250));
        assert_eq!(
            *request.timeouts(),
            RequestTimeouts::overall(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_http_request_stores_timeout_extension() {
        let mut request = http::Request::builder()
            .method(Method::POST)
            .uri("https://api.example.com/v1/items")
            .extension(RequestTimeouts {
                read: Some(Duration::from_secs(3)),
                ..RequestTimeouts::default()
            })
            .body(())
            .unwrap();

        assert_eq!(HostRequest::method(&request), Method::POST);
        request.apply_timeout(Duration::from_secs(2));

        let timeouts = request.extensions().get::<RequestTimeouts>().unwrap();
        assert_eq!(timeouts.timeout, Some(Duration::from_secs(2)));
        assert_eq!(timeouts.read, None);
    }
}
