//! The HTTP contract required from the repository transport

use std::{error, sync::Arc};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

#[cfg(feature = "reqwest")]
pub mod client;
pub mod dto;

#[cfg(feature = "reqwest")]
pub use client::{ReqwestTransport, TransportError};

/// A transport capable of performing the token endpoints' requests
///
/// The transport also owns the set of headers that are attached to every
/// other request the client makes. The token service updates that set
/// whenever it acquires a new access token.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// The error type returned when a request fails
    type Error: error::Error + Send + Sync + 'static;

    /// Sends a `POST` request without a body and returns the response body
    ///
    /// Responses with a non-success status must be reported as errors.
    async fn post(&self, url: Url, headers: HeaderMap) -> Result<Bytes, Self::Error>;

    /// Sets a header to be sent with every subsequent request
    fn set_global_header(&self, name: HeaderName, value: HeaderValue);

    /// Stops sending a previously set global header
    fn remove_global_header(&self, name: &HeaderName) {
        let _ = name;
    }
}

#[async_trait]
impl<T: AuthTransport + ?Sized> AuthTransport for Arc<T> {
    type Error = T::Error;

    async fn post(&self, url: Url, headers: HeaderMap) -> Result<Bytes, Self::Error> {
        (**self).post(url, headers).await
    }

    fn set_global_header(&self, name: HeaderName, value: HeaderValue) {
        (**self).set_global_header(name, value)
    }

    fn remove_global_header(&self, name: &HeaderName) {
        (**self).remove_global_header(name)
    }
}

/// A shared, lock-free set of headers to attach to outgoing requests
///
/// Clones refer to the same set.
#[derive(Clone, Debug, Default)]
pub struct GlobalHeaders {
    headers: Arc<ArcSwap<HeaderMap>>,
}

impl GlobalHeaders {
    /// Constructs an empty header set
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, replacing any previous value
    pub fn insert(&self, name: HeaderName, value: HeaderValue) {
        self.headers.rcu(|current| {
            let mut next = HeaderMap::clone(current);
            next.insert(name.clone(), value.clone());
            next
        });
    }

    /// Removes `name` from the set
    pub fn remove(&self, name: &HeaderName) {
        self.headers.rcu(|current| {
            let mut next = HeaderMap::clone(current);
            next.remove(name);
            next
        });
    }

    /// Gets the current value of `name`
    pub fn get(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.headers.load().get(name).cloned()
    }

    /// Takes a snapshot of the whole set
    pub fn snapshot(&self) -> Arc<HeaderMap> {
        self.headers.load_full()
    }
}
