//! A cookie jar backed by reqwest's cookie store

use std::sync::Arc;

use reqwest::{
    cookie::{CookieStore, Jar},
    Url,
};

use super::{CookieJar, StorageError};

/// A view of a shared [`reqwest::cookie::Jar`] for one site
///
/// Handing the same jar to a [`reqwest::ClientBuilder::cookie_provider()`]
/// means tokens persisted as cookies also travel with requests to the
/// repository. Expired cookies are dropped by the jar itself.
#[derive(Clone, Debug)]
pub struct ReqwestCookieJar {
    jar: Arc<Jar>,
    url: Url,
}

impl ReqwestCookieJar {
    /// Constructs a new view of `jar` scoped to `url`
    pub fn new(jar: Arc<Jar>, url: Url) -> Self {
        Self { jar, url }
    }

    /// The underlying shared jar
    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }
}

impl CookieJar for ReqwestCookieJar {
    fn read_cookies(&self) -> Result<String, StorageError> {
        match self.jar.cookies(&self.url) {
            Some(value) => value
                .to_str()
                .map(str::to_owned)
                .map_err(|error| StorageError::Cookie(error.to_string())),
            None => Ok(String::new()),
        }
    }

    fn write_cookie(&self, set_cookie: &str) -> Result<(), StorageError> {
        tracing::trace!(url = %self.url, "writing cookie");
        self.jar.add_cookie_str(set_cookie, &self.url);
        Ok(())
    }
}
