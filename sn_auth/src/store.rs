//! Persistence of the access and refresh tokens
//!
//! A [`TokenStore`] picks one backend when it is constructed and keeps it
//! for its whole lifetime. The choice depends on which backends the
//! [`Environment`] offers and on the caller's [`TokenPersist`] preference:
//!
//! | Preference   | First choice     | Fallback           | Last resort |
//! |--------------|------------------|--------------------|-------------|
//! | `Session`    | session storage  | session cookie     | in-memory   |
//! | `Expiration` | local storage    | expiring cookie    | in-memory   |
//!
//! Every token slot is persisted under a key derived from a template, the
//! site name and the slot name, so that clients of different repositories
//! can share one storage area without colliding.

use std::{error, fmt::Write as _, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    storage::{find_cookie, CookieJar, KeyValueStorage, MemoryStorage, StorageError},
    Token,
};

/// The key template used unless configured otherwise
pub const DEFAULT_KEY_TEMPLATE: &str = "sn-${siteName}-${tokenName}";

const SITE_PLACEHOLDER: &str = "${siteName}";
const TOKEN_PLACEHOLDER: &str = "${tokenName}";

/// How long persisted tokens should be kept
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenPersist {
    /// Keep tokens only for the current session
    #[default]
    Session,
    /// Keep tokens until they expire
    Expiration,
}

/// The kind of backend a token store persists into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Cookies without an expiry
    SessionCookie,
    /// Cookies which expire together with the token they hold
    ExpirationCookie,
    /// A session-scoped key-value storage
    SessionStorage,
    /// A durable key-value storage
    LocalStorage,
    /// A process-local map
    InMemory,
}

/// One of the two token positions managed by a store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenSlot {
    /// The short-lived access token
    Access,
    /// The long-lived refresh token
    Refresh,
}

impl TokenSlot {
    /// The name of the slot as used in storage keys
    pub const fn as_str(self) -> &'static str {
        match self {
            TokenSlot::Access => "access",
            TokenSlot::Refresh => "refresh",
        }
    }
}

/// An access and refresh token pair
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionTokens {
    /// The access token
    pub access: Token,
    /// The refresh token
    pub refresh: Token,
}

/// Configuration for naming and persisting tokens
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStoreConfig {
    site_name: String,
    #[serde(default = "default_key_template")]
    key_template: String,
    #[serde(default)]
    persistence: TokenPersist,
}

fn default_key_template() -> String {
    DEFAULT_KEY_TEMPLATE.to_owned()
}

impl TokenStoreConfig {
    /// Constructs a configuration for the given site
    ///
    /// Uses [`DEFAULT_KEY_TEMPLATE`] and session persistence.
    pub fn new(site_name: impl Into<String>) -> Self {
        Self {
            site_name: site_name.into(),
            key_template: default_key_template(),
            persistence: TokenPersist::Session,
        }
    }

    /// Sets the template used to derive storage keys
    ///
    /// `${siteName}` is replaced with the site name and `${tokenName}` with
    /// the slot name.
    pub fn with_key_template(mut self, key_template: impl Into<String>) -> Self {
        self.key_template = key_template.into();
        self
    }

    /// Sets how long tokens should be persisted
    pub fn with_persistence(mut self, persistence: TokenPersist) -> Self {
        self.persistence = persistence;
        self
    }

    /// The site name used to namespace keys
    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    /// The persistence preference
    pub fn persistence(&self) -> TokenPersist {
        self.persistence
    }

    /// The storage key for a slot
    pub fn key_for(&self, slot: TokenSlot) -> String {
        self.key_template
            .replace(SITE_PLACEHOLDER, &self.site_name)
            .replace(TOKEN_PLACEHOLDER, slot.as_str())
    }
}

/// The storage facilities available to a token store
#[derive(Clone, Debug, Default)]
pub struct Environment {
    session_storage: Option<Arc<dyn KeyValueStorage>>,
    local_storage: Option<Arc<dyn KeyValueStorage>>,
    cookies: Option<Arc<dyn CookieJar>>,
}

impl Environment {
    /// An environment without any storage facilities
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a session-scoped key-value storage
    pub fn with_session_storage(mut self, storage: impl KeyValueStorage + 'static) -> Self {
        self.session_storage = Some(Arc::new(storage));
        self
    }

    /// Offers a durable key-value storage
    pub fn with_local_storage(mut self, storage: impl KeyValueStorage + 'static) -> Self {
        self.local_storage = Some(Arc::new(storage));
        self
    }

    /// Offers a cookie jar
    pub fn with_cookies(mut self, jar: impl CookieJar + 'static) -> Self {
        self.cookies = Some(Arc::new(jar));
        self
    }

    /// Probes each offered facility
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            session_storage: self.session_storage.as_ref().is_some_and(|s| s.probe()),
            local_storage: self.local_storage.as_ref().is_some_and(|s| s.probe()),
            cookies: self.cookies.as_ref().is_some_and(|c| c.probe()),
        }
    }
}

/// Which storage facilities passed their probe
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// A session-scoped key-value storage is usable
    pub session_storage: bool,
    /// A durable key-value storage is usable
    pub local_storage: bool,
    /// Cookies are usable
    pub cookies: bool,
}

/// Chooses a backend for the given capabilities and preference
pub fn select_backend(capabilities: Capabilities, persistence: TokenPersist) -> BackendKind {
    match persistence {
        TokenPersist::Expiration if capabilities.local_storage => BackendKind::LocalStorage,
        TokenPersist::Expiration if capabilities.cookies => BackendKind::ExpirationCookie,
        TokenPersist::Session if capabilities.session_storage => BackendKind::SessionStorage,
        TokenPersist::Session if capabilities.cookies => BackendKind::SessionCookie,
        _ => BackendKind::InMemory,
    }
}

#[derive(Clone, Debug)]
enum Backend {
    KeyValue(Arc<dyn KeyValueStorage>),
    Cookie {
        jar: Arc<dyn CookieJar>,
        expiring: bool,
    },
}

/// Persists tokens into the backend chosen at construction
///
/// Failures to read are reported as an empty token, and failures to write
/// are logged and otherwise ignored.
#[derive(Clone, Debug)]
pub struct TokenStore {
    config: TokenStoreConfig,
    kind: BackendKind,
    backend: Backend,
}

impl TokenStore {
    /// Constructs a token store, selecting a backend from `environment`
    pub fn new(config: TokenStoreConfig, environment: Environment) -> Self {
        let capabilities = environment.capabilities();
        let kind = select_backend(capabilities, config.persistence);

        let backend = match (kind, environment) {
            (BackendKind::SessionStorage, Environment { session_storage: Some(s), .. }) => {
                Backend::KeyValue(s)
            }
            (BackendKind::LocalStorage, Environment { local_storage: Some(s), .. }) => {
                Backend::KeyValue(s)
            }
            (BackendKind::SessionCookie, Environment { cookies: Some(jar), .. }) => {
                Backend::Cookie { jar, expiring: false }
            }
            (BackendKind::ExpirationCookie, Environment { cookies: Some(jar), .. }) => {
                Backend::Cookie { jar, expiring: true }
            }
            _ => Backend::KeyValue(Arc::new(MemoryStorage::new())),
        };

        tracing::debug!(
            site = %config.site_name,
            persistence = ?config.persistence,
            backend = ?kind,
            ?capabilities,
            "selected token storage backend"
        );

        Self {
            config,
            kind,
            backend,
        }
    }

    /// Constructs a token store which keeps tokens in memory only
    pub fn in_memory(config: TokenStoreConfig) -> Self {
        Self::new(config, Environment::new())
    }

    /// The kind of backend in use
    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// The store's configuration
    pub fn config(&self) -> &TokenStoreConfig {
        &self.config
    }

    /// Reads the token held in `slot`
    ///
    /// Returns an empty token if nothing is stored or the backend fails.
    pub fn get_token(&self, slot: TokenSlot) -> Token {
        let key = self.config.key_for(slot);
        match self.read(&key) {
            Ok(Some(raw)) => {
                tracing::trace!(%key, "read token from storage");
                Token::from_encoded(&raw)
            }
            Ok(None) => {
                tracing::trace!(%key, "no token in storage");
                Token::empty()
            }
            Err(error) => {
                tracing::warn!(
                    %key,
                    backend = ?self.kind,
                    error = (&error as &dyn error::Error),
                    "unable to read token from storage, treating as empty"
                );
                Token::empty()
            }
        }
    }

    /// Writes `token` into `slot`
    pub fn set_token(&self, slot: TokenSlot, token: &Token) {
        let key = self.config.key_for(slot);
        match self.write(&key, token) {
            Ok(()) => tracing::trace!(%key, "wrote token to storage"),
            Err(error) => tracing::warn!(
                %key,
                backend = ?self.kind,
                error = (&error as &dyn error::Error),
                "unable to write token to storage"
            ),
        }
    }

    /// Reads the access token
    pub fn access_token(&self) -> Token {
        self.get_token(TokenSlot::Access)
    }

    /// Reads the refresh token
    pub fn refresh_token(&self) -> Token {
        self.get_token(TokenSlot::Refresh)
    }

    /// Writes the access token
    pub fn set_access_token(&self, token: &Token) {
        self.set_token(TokenSlot::Access, token)
    }

    /// Writes the refresh token
    pub fn set_refresh_token(&self, token: &Token) {
        self.set_token(TokenSlot::Refresh, token)
    }

    /// Reads both tokens
    pub fn tokens(&self) -> SessionTokens {
        SessionTokens {
            access: self.access_token(),
            refresh: self.refresh_token(),
        }
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match &self.backend {
            Backend::KeyValue(storage) => storage.get_item(key),
            Backend::Cookie { jar, .. } => {
                let line = jar.read_cookies()?;
                Ok(find_cookie(&line, key).map(str::to_owned))
            }
        }
    }

    fn write(&self, key: &str, token: &Token) -> Result<(), StorageError> {
        let value = token.to_string();
        match &self.backend {
            Backend::KeyValue(storage) => storage.set_item(key, &value),
            Backend::Cookie { jar, expiring } => {
                let mut line = format!("{}={}; Path=/", key, value);
                if *expiring {
                    let expires = token.expiration_time();
                    write!(line, "; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT"))
                        .map_err(|error| StorageError::Cookie(error.to_string()))?;
                }
                jar.write_cookie(&line)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::token::test_tokens;

    const SITE: &str = "https://repo.example.com";

    #[derive(Debug, Default)]
    struct RecordingJar {
        cookies: Mutex<Vec<(String, String)>>,
        lines: Mutex<Vec<String>>,
    }

    impl CookieJar for RecordingJar {
        fn read_cookies(&self) -> Result<String, StorageError> {
            let cookies = self.cookies.lock().unwrap();
            Ok(cookies
                .iter()
                .map(|(n, v)| format!("{}={}", n, v))
                .collect::<Vec<_>>()
                .join("; "))
        }

        fn write_cookie(&self, set_cookie: &str) -> Result<(), StorageError> {
            self.lines.lock().unwrap().push(set_cookie.to_owned());

            let pair = set_cookie.split(';').next().unwrap_or_default();
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| StorageError::Cookie(set_cookie.to_owned()))?;

            let mut cookies = self.cookies.lock().unwrap();
            cookies.retain(|(n, _)| n != name);
            cookies.push((name.to_owned(), value.to_owned()));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct BrokenStorage;

    impl KeyValueStorage for BrokenStorage {
        fn get_item(&self, _: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("security error".to_owned()))
        }

        fn set_item(&self, _: &str, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".to_owned()))
        }

        fn remove_item(&self, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("security error".to_owned()))
        }

        fn probe(&self) -> bool {
            true
        }
    }

    #[derive(Debug)]
    struct DisabledJar;

    impl CookieJar for DisabledJar {
        fn read_cookies(&self) -> Result<String, StorageError> {
            Ok(String::new())
        }

        fn write_cookie(&self, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Cookie("cookies disabled".to_owned()))
        }

        fn probe(&self) -> bool {
            false
        }
    }

    fn config() -> TokenStoreConfig {
        TokenStoreConfig::new(SITE)
    }

    fn assert_round_trips(store: &TokenStore) {
        let access = test_tokens::valid("access");
        let refresh = test_tokens::valid("refresh");

        store.set_access_token(&access);
        store.set_refresh_token(&refresh);

        assert_eq!(store.access_token().to_string(), access.to_string());
        assert_eq!(store.refresh_token().to_string(), refresh.to_string());
    }

    mod backend_selection {
        use super::*;

        fn caps(session_storage: bool, local_storage: bool, cookies: bool) -> Capabilities {
            Capabilities {
                session_storage,
                local_storage,
                cookies,
            }
        }

        #[test]
        fn nothing_available_selects_in_memory() {
            for persistence in [TokenPersist::Session, TokenPersist::Expiration] {
                assert_eq!(
                    select_backend(caps(false, false, false), persistence),
                    BackendKind::InMemory
                );
            }
        }

        #[test]
        fn expiration_prefers_local_storage() {
            assert_eq!(
                select_backend(caps(true, true, true), TokenPersist::Expiration),
                BackendKind::LocalStorage
            );
        }

        #[test]
        fn expiration_falls_back_to_expiring_cookie() {
            assert_eq!(
                select_backend(caps(true, false, true), TokenPersist::Expiration),
                BackendKind::ExpirationCookie
            );
        }

        #[test]
        fn session_prefers_session_storage() {
            assert_eq!(
                select_backend(caps(true, true, true), TokenPersist::Session),
                BackendKind::SessionStorage
            );
        }

        #[test]
        fn session_falls_back_to_session_cookie() {
            assert_eq!(
                select_backend(caps(false, true, true), TokenPersist::Session),
                BackendKind::SessionCookie
            );
        }

        #[test]
        fn missing_preferred_facility_degrades_to_in_memory() {
            assert_eq!(
                select_backend(caps(true, false, false), TokenPersist::Expiration),
                BackendKind::InMemory
            );
            assert_eq!(
                select_backend(caps(false, true, false), TokenPersist::Session),
                BackendKind::InMemory
            );
        }

        #[test]
        fn failed_probe_counts_as_unavailable() {
            let environment = Environment::new().with_cookies(DisabledJar);
            let store = TokenStore::new(config(), environment);

            assert_eq!(store.backend_kind(), BackendKind::InMemory);
        }
    }

    mod keys {
        use super::*;

        #[test]
        fn default_template_combines_site_and_slot() {
            assert_eq!(
                config().key_for(TokenSlot::Access),
                "sn-https://repo.example.com-access"
            );
            assert_eq!(
                config().key_for(TokenSlot::Refresh),
                "sn-https://repo.example.com-refresh"
            );
        }

        #[test]
        fn custom_template_is_honored() {
            let config = config().with_key_template("${tokenName}@${siteName}");
            assert_eq!(config.key_for(TokenSlot::Access), "access@https://repo.example.com");
        }

        #[test]
        fn stores_for_different_sites_do_not_collide() {
            let shared = MemoryStorage::new();
            let a = TokenStore::new(
                TokenStoreConfig::new("https://a.example.com"),
                Environment::new().with_session_storage(shared.clone()),
            );
            let b = TokenStore::new(
                TokenStoreConfig::new("https://b.example.com"),
                Environment::new().with_session_storage(shared.clone()),
            );

            a.set_access_token(&test_tokens::valid("a"));

            assert_eq!(a.access_token().username(), "a");
            assert!(b.access_token().is_empty());
            assert_eq!(shared.len(), 1);
        }

        #[test]
        fn config_deserializes_with_defaults() {
            let config: TokenStoreConfig =
                serde_json::from_str(r#"{ "siteName": "https://repo.example.com" }"#).unwrap();

            assert_eq!(config, TokenStoreConfig::new(SITE));
        }
    }

    mod round_trips {
        use super::*;

        #[test]
        fn in_memory() {
            let store = TokenStore::in_memory(config());
            assert_eq!(store.backend_kind(), BackendKind::InMemory);
            assert_round_trips(&store);
        }

        #[test]
        fn session_storage() {
            let store = TokenStore::new(
                config(),
                Environment::new().with_session_storage(MemoryStorage::new()),
            );
            assert_eq!(store.backend_kind(), BackendKind::SessionStorage);
            assert_round_trips(&store);
        }

        #[test]
        fn local_storage() {
            let store = TokenStore::new(
                config().with_persistence(TokenPersist::Expiration),
                Environment::new().with_local_storage(MemoryStorage::new()),
            );
            assert_eq!(store.backend_kind(), BackendKind::LocalStorage);
            assert_round_trips(&store);
        }

        #[test]
        fn session_cookie() {
            let store =
                TokenStore::new(config(), Environment::new().with_cookies(RecordingJar::default()));
            assert_eq!(store.backend_kind(), BackendKind::SessionCookie);
            assert_round_trips(&store);
        }

        #[test]
        fn expiration_cookie() {
            let store = TokenStore::new(
                config().with_persistence(TokenPersist::Expiration),
                Environment::new().with_cookies(RecordingJar::default()),
            );
            assert_eq!(store.backend_kind(), BackendKind::ExpirationCookie);
            assert_round_trips(&store);
        }

        #[test]
        fn empty_token() {
            let store = TokenStore::in_memory(config());
            store.set_access_token(&Token::empty());
            assert_eq!(store.access_token(), Token::empty());
        }

        #[test]
        fn survives_a_new_store_over_the_same_storage() {
            let shared = MemoryStorage::new();
            let first = TokenStore::new(
                config(),
                Environment::new().with_session_storage(shared.clone()),
            );
            first.set_refresh_token(&test_tokens::valid("persisted"));

            let second = TokenStore::new(config(), Environment::new().with_session_storage(shared));
            assert_eq!(second.refresh_token().username(), "persisted");
        }
    }

    mod cookies {
        use sn_auth_clock::UnixTime;

        use super::*;

        #[test]
        fn session_cookie_has_no_expiry() {
            let jar = Arc::new(RecordingJar::default());
            let store = TokenStore::new(config(), Environment::new().with_cookies(jar.clone()));

            store.set_access_token(&Token::from_encoded("h.p"));

            let lines = jar.lines.lock().unwrap();
            assert_eq!(lines.as_slice(), ["sn-https://repo.example.com-access=h.p; Path=/"]);
        }

        #[test]
        fn expiring_cookie_expires_with_its_token() {
            let jar = Arc::new(RecordingJar::default());
            let store = TokenStore::new(
                config().with_persistence(TokenPersist::Expiration),
                Environment::new().with_cookies(jar.clone()),
            );
            let token =
                test_tokens::valid_between(UnixTime(1_700_000_000), UnixTime(1_700_003_600), "u");

            store.set_refresh_token(&token);

            let lines = jar.lines.lock().unwrap();
            assert_eq!(
                lines[0],
                format!(
                    "sn-https://repo.example.com-refresh={}; Path=/; Expires=Tue, 14 Nov 2023 23:13:20 GMT",
                    token
                )
            );
        }

        #[test]
        fn malformed_cookie_line_reads_as_empty() {
            let jar = Arc::new(RecordingJar::default());
            jar.cookies
                .lock()
                .unwrap()
                .push(("garbage".to_owned(), "%%%".to_owned()));
            let store = TokenStore::new(config(), Environment::new().with_cookies(jar));

            assert!(store.access_token().is_empty());
            assert!(!store.access_token().is_valid());
        }
    }

    mod failures {
        use super::*;

        #[test]
        fn read_failure_yields_empty_token() {
            let store =
                TokenStore::new(config(), Environment::new().with_session_storage(BrokenStorage));
            assert_eq!(store.backend_kind(), BackendKind::SessionStorage);

            assert_eq!(store.access_token(), Token::empty());
        }

        #[test]
        fn write_failure_is_swallowed() {
            let store =
                TokenStore::new(config(), Environment::new().with_session_storage(BrokenStorage));

            store.set_access_token(&test_tokens::valid("lost"));
            assert!(store.access_token().is_empty());
        }
    }
}
