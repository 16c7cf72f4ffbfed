//! Middleware to automatically attach session headers to outgoing requests
//!
//! A [`JwtService`](sn_auth::JwtService) publishes the current access
//! token into a [`GlobalHeaders`] set whenever it acquires a new one. When
//! using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`GlobalHeadersMiddleware`] in the middleware stack to send
//! those headers with each outbound request.
//!
//! If a request already specifies one of the headers by the time that the
//! middleware executes, the existing value is left in place, allowing
//! overrides to be specified as required.
//!
//! ```
//! use sn_auth::GlobalHeaders;
//! use sn_auth_reqwest::GlobalHeadersMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! let global_headers = GlobalHeaders::new();
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(GlobalHeadersMiddleware::new(global_headers.clone()))
//!     .build();
//! ```
//!
//! The same set is handed to the transport used by the session, so that
//! the headers it sets show up here:
//!
//! ```ignore
//! let transport = sn_auth::ReqwestTransport::new(reqwest::Client::new())
//!     .with_global_headers(global_headers);
//! ```
//!
//! The middleware can also be configured to add the headers only
//! conditionally, which keeps the access token from leaking to hosts other
//! than the repository. Predicates can be composed together to evaluate
//! more complex requirements.
//!
//! ```
//! use predicates::prelude::PredicateBooleanExt;
//! use sn_auth::{GlobalHeaders, JwtConfig};
//! use sn_auth_reqwest::{GlobalHeadersMiddleware, HttpsOnly, RepositoryOnly};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = JwtConfig::new("https://repo.example.com/odata.svc".parse()?);
//!
//! GlobalHeadersMiddleware::new(GlobalHeaders::new())
//!     .with_predicate(HttpsOnly.and(RepositoryOnly::from_config(&config)));
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use predicates::{prelude::*, reflection};
use reqwest::{Request, Response, Url};
use reqwest_middleware::{Middleware, Next, Result};
use sn_auth::{GlobalHeaders, JwtConfig};

/// A middleware that injects the session's global headers into outgoing requests
#[derive(Clone, Debug)]
pub struct GlobalHeadersMiddleware<P> {
    global_headers: GlobalHeaders,
    predicate: P,
}

impl GlobalHeadersMiddleware<HttpsOnly> {
    /// Construct a new middleware from a shared header set
    ///
    /// By default, this middleware will only send the headers if the
    /// request is being sent via HTTPS. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(global_headers: GlobalHeaders) -> Self {
        Self {
            global_headers,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> GlobalHeadersMiddleware<P> {
        GlobalHeadersMiddleware {
            global_headers: self.global_headers,
            predicate,
        }
    }
}

#[async_trait::async_trait]
impl<P> Middleware for GlobalHeadersMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) {
            let snapshot = self.global_headers.snapshot();
            tracing::trace!(headers = snapshot.len(), "attaching global headers");

            let headers = req.headers_mut();
            for (name, value) in snapshot.iter() {
                headers
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        next.run(req, extensions).await
    }
}

/// Reports a failed expectation along with the part of the request that decided it
fn mismatch<'a, P>(
    predicate: &'a P,
    expected: bool,
    result: bool,
    name: &'static str,
    value: impl FnOnce() -> String,
) -> Option<reflection::Case<'a>>
where
    P: reflection::PredicateReflection,
{
    (result != expected).then(|| {
        reflection::Case::new(Some(predicate), result)
            .add_product(reflection::Product::new(name, value()))
    })
}

/// Only attach headers if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        mismatch(self, expected, self.eval(req), "scheme", || {
            req.url().scheme().to_owned()
        })
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach headers to requests addressed to the repository itself
///
/// A request matches when it has the same origin (scheme, host and port)
/// as the repository's base URL and its path lies at or below the base
/// path. This keeps the access token from travelling to other services
/// reached through the same client.
#[derive(Clone, Debug)]
pub struct RepositoryOnly {
    base: Url,
}

impl RepositoryOnly {
    /// Construct a new predicate from the repository's base URL
    pub fn new(base_url: &Url) -> Self {
        Self {
            base: base_url.clone(),
        }
    }

    /// Construct a new predicate for the repository a session is configured for
    pub fn from_config(config: &JwtConfig) -> Self {
        Self::new(config.base_url())
    }

    fn base_path(&self) -> &str {
        self.base.path().trim_end_matches('/')
    }
}

impl Predicate<Request> for RepositoryOnly {
    fn eval(&self, req: &Request) -> bool {
        let url = req.url();
        if url.origin() != self.base.origin() {
            return false;
        }

        match url.path().strip_prefix(self.base_path()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        mismatch(self, expected, self.eval(req), "url", || req.url().to_string())
    }
}

impl reflection::PredicateReflection for RepositoryOnly {}
impl fmt::Display for RepositoryOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "url within {}", self.base)
    }
}
