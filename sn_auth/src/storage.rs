//! Storage backends that tokens can be persisted into
//!
//! Two kinds of backend exist. A [`KeyValueStorage`] maps string keys to
//! string values and stands in for a session-scoped or durable storage
//! table. A [`CookieJar`] reads and writes cookies the way a browser's
//! `document.cookie` does: reads return every visible cookie as a single
//! `name=value; name=value` line, and writes take a `Set-Cookie` line.

use std::{error, fmt, io, sync::Arc};

use thiserror::Error;

#[cfg(feature = "reqwest")]
pub mod cookie;
#[cfg(feature = "file")]
pub mod file;
pub mod memory;

#[cfg(feature = "reqwest")]
pub use cookie::ReqwestCookieJar;
#[cfg(feature = "file")]
pub use file::FileStorage;
pub use memory::MemoryStorage;

/// The key written and removed again when probing a key-value storage
pub const PROBE_KEY: &str = "__sn_auth_storage_probe__";

/// An error raised by a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying medium could not be read or written
    #[error("storage i/o failed")]
    Io(#[from] io::Error),
    /// The persisted data could not be understood
    #[error("stored data is malformed")]
    Json(#[from] serde_json::Error),
    /// The backend refused the operation
    #[error("storage is unavailable: {0}")]
    Unavailable(String),
    /// A cookie could not be written or read
    #[error("cookie rejected: {0}")]
    Cookie(String),
}

/// A string-keyed storage table
///
/// Implementations are expected to be cheap and synchronous.
pub trait KeyValueStorage: fmt::Debug + Send + Sync {
    /// Reads the value stored under `key`
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stores `value` under `key`, replacing any existing value
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes the value stored under `key`, if any
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Checks whether the storage is usable at all
    ///
    /// The default implementation writes and removes [`PROBE_KEY`].
    fn probe(&self) -> bool {
        let result = self
            .set_item(PROBE_KEY, PROBE_KEY)
            .and_then(|()| self.remove_item(PROBE_KEY));

        if let Err(error) = &result {
            tracing::debug!(
                error = (error as &dyn error::Error),
                "key-value storage failed its probe"
            );
        }

        result.is_ok()
    }
}

/// A cookie jar seen from the point of view of a single site
pub trait CookieJar: fmt::Debug + Send + Sync {
    /// Reads all cookies visible to the site as a `name=value; name=value` line
    fn read_cookies(&self) -> Result<String, StorageError>;

    /// Stores a cookie described by a `Set-Cookie` line
    fn write_cookie(&self, set_cookie: &str) -> Result<(), StorageError>;

    /// Checks whether cookies are usable at all
    fn probe(&self) -> bool {
        true
    }
}

impl<T: KeyValueStorage + ?Sized> KeyValueStorage for Arc<T> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove_item(key)
    }

    fn probe(&self) -> bool {
        (**self).probe()
    }
}

impl<T: CookieJar + ?Sized> CookieJar for Arc<T> {
    fn read_cookies(&self) -> Result<String, StorageError> {
        (**self).read_cookies()
    }

    fn write_cookie(&self, set_cookie: &str) -> Result<(), StorageError> {
        (**self).write_cookie(set_cookie)
    }

    fn probe(&self) -> bool {
        (**self).probe()
    }
}

/// Finds the value of the cookie named `name` in a `name=value; name=value` line
///
/// Returns `None` if no segment carries that name. Segments without a `=`
/// are ignored.
pub fn find_cookie<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    cookies
        .split(';')
        .filter_map(|segment| segment.trim().split_once('='))
        .find(|(n, _)| *n == name)
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_cookie_among_others() {
        let line = "theme=dark; sn-site-access=abc.def; lang=en";
        assert_eq!(find_cookie(line, "sn-site-access"), Some("abc.def"));
        assert_eq!(find_cookie(line, "lang"), Some("en"));
    }

    #[test]
    fn missing_cookie_is_none() {
        assert_eq!(find_cookie("theme=dark", "sn-site-access"), None);
        assert_eq!(find_cookie("", "sn-site-access"), None);
    }

    #[test]
    fn segments_without_a_value_are_skipped() {
        let line = "broken; sn-site-access=abc.def";
        assert_eq!(find_cookie(line, "broken"), None);
        assert_eq!(find_cookie(line, "sn-site-access"), Some("abc.def"));
    }

    #[test]
    fn value_may_contain_equals_signs() {
        assert_eq!(find_cookie("k=a=b", "k"), Some("a=b"));
    }
}
