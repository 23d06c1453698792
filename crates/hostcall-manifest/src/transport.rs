//! Transports used to fetch remote module sources.
//!
//! The resolver never performs network I/O itself. A [`Transport`] is
//! supplied by the embedder; [`HttpTransport`] (feature `http`) is a
//! blocking `reqwest` implementation and [`MemoryTransport`] serves fixed
//! bytes, mainly for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use url::Url;

use crate::error::TransportError;

/// A fetch request for one module.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    /// Parsed module URL.
    pub url: &'a Url,
    /// HTTP method, uppercase.
    pub method: &'a str,
    /// Extra request headers.
    pub headers: &'a BTreeMap<String, String>,
}

/// Fetches module bytes for URL sources.
pub trait Transport: Send + Sync {
    /// Fetch the body at `request.url`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the request fails.
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<Vec<u8>, TransportError>;
}

/// A transport serving preloaded bodies keyed by URL.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    bodies: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryTransport {
    /// Create an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`.
    #[must_use]
    pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        let key = Url::parse(url).map_or_else(|_| url.to_string(), String::from);
        self.bodies.insert(key, body.into());
        self
    }

    /// URLs requested so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl Transport for MemoryTransport {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<Vec<u8>, TransportError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.url.to_string());
        }
        self.bodies
            .get(request.url.as_str())
            .cloned()
            .ok_or_else(|| TransportError::new(format!("404 Not Found: {}", request.url)))
    }
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use super::{FetchRequest, Transport};
    use crate::error::TransportError;

    /// Default request timeout.
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Blocking HTTP transport backed by `reqwest`.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: reqwest::blocking::Client,
    }

    impl HttpTransport {
        /// Create a transport with the default timeout.
        ///
        /// # Errors
        ///
        /// Returns a [`TransportError`] if the HTTP client cannot be built.
        pub fn new() -> Result<Self, TransportError> {
            Self::with_timeout(DEFAULT_TIMEOUT)
        }

        /// Create a transport with a custom request timeout.
        ///
        /// # Errors
        ///
        /// Returns a [`TransportError`] if the HTTP client cannot be built.
        pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
            let client = reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| TransportError::new(format!("failed to build HTTP client: {e}")))?;
            Ok(Self { client })
        }
    }

    impl Transport for HttpTransport {
        fn fetch(&self, request: &FetchRequest<'_>) -> Result<Vec<u8>, TransportError> {
            let method = reqwest::Method::from_bytes(request.method.as_bytes())
                .map_err(|e| TransportError::new(format!("invalid method: {e}")))?;
            let mut builder = self.client.request(method, request.url.clone());
            for (name, value) in request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let response = builder
                .send()
                .and_then(reqwest::blocking::Response::error_for_status)
                .map_err(|e| TransportError::new(e.to_string()))?;
            let body = response
                .bytes()
                .map_err(|e| TransportError::new(format!("failed to read body: {e}")))?;
            tracing::debug!(url = %request.url, bytes = body.len(), "Fetched module");
            Ok(body.to_vec())
        }
    }
}
