use std::{
    error, fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::{header, HeaderMap, HeaderValue};
use sn_auth_clock::{Clock, System, UnixTime};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    transport::dto::{LoginResponse, RefreshResponse},
    AuthTransport, JwtConfig, PasswordRef, SessionTokens, Token, TokenStore, UsernameRef,
};

/// The authentication state of a client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoginState {
    /// A login or refresh is in flight, or the initial state has not been settled
    Pending,
    /// No valid access token is held
    Unauthenticated,
    /// A valid access token was held when this state was entered
    Authenticated,
}

/// An error while acquiring tokens from the repository
#[derive(Debug, Error)]
pub enum AuthError {
    /// The transport failed to complete the request
    #[error("error sending token request to repository")]
    Transport(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// Unable to deserialize the token body
    #[error("error deserializing token body from repository")]
    TokenBody(#[from] serde_json::Error),
    /// Unable to express a credential as a header value
    #[error("credential is not a valid header value")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    /// Unable to construct the endpoint URL
    #[error("invalid token endpoint url")]
    Url(#[from] url::ParseError),
    /// A refresh attempt failed
    ///
    /// Every caller that shared the attempt receives the same error.
    #[error("error refreshing access token")]
    Refresh(#[source] Arc<AuthError>),
}

/// The outcome of the most recent refresh, if it failed
#[derive(Debug)]
struct FailedRefresh {
    refresh: Token,
    error: Arc<AuthError>,
}

#[derive(Debug, PartialEq, Eq)]
enum Classification {
    Authenticated,
    NeedsRefresh,
    Unauthenticated,
}

fn classify(tokens: &SessionTokens, now: UnixTime) -> Classification {
    if tokens.access.is_valid_at(now) {
        Classification::Authenticated
    } else if tokens.refresh.is_valid_at(now) {
        Classification::NeedsRefresh
    } else {
        Classification::Unauthenticated
    }
}

struct Inner<T, C> {
    transport: T,
    store: TokenStore,
    config: JwtConfig,
    clock: C,
    tokens: Mutex<SessionTokens>,
    state: watch::Sender<LoginState>,
    refresh_lock: tokio::sync::Mutex<Option<FailedRefresh>>,
    refresh_attempts: AtomicU64,
}

/// Drives login, silent refresh and logout against the repository
///
/// The service is the single source of truth for a client's
/// [`LoginState`]. State changes are published on a watch channel, so a
/// late subscriber immediately sees the latest state.
///
/// Whenever a new access token is acquired, it is persisted to the
/// [`TokenStore`] and handed to the transport as a global header before the
/// new state is announced. Anyone reacting to `Authenticated` can therefore
/// issue requests that already carry the credential.
///
/// Concurrent refreshes are coalesced: while one refresh is in flight,
/// further callers wait for it and share its outcome. They either find the
/// new access token or receive the same [`AuthError::Refresh`] instead of
/// asking the repository again with the same refresh token.
///
/// Clones share the same state.
pub struct JwtService<T, C = System> {
    inner: Arc<Inner<T, C>>,
}

impl<T, C> Clone for JwtService<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, C> fmt::Debug for JwtService<T, C>
where
    T: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("JwtService")
            .field("transport", &self.inner.transport)
            .field("store", &self.inner.store)
            .field("config", &self.inner.config)
            .field("clock", &self.inner.clock)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl<T> JwtService<T, System>
where
    T: AuthTransport + 'static,
{
    /// Constructs a new service and classifies the stored tokens
    ///
    /// If the stored access token is valid, the service starts out
    /// `Authenticated` and the access token is immediately handed to the
    /// transport with [`AuthTransport::set_global_header()`], so requests made
    /// right after a restart carry it. If only the refresh token is valid, the service
    /// starts out `Pending` and a refresh is spawned onto the runtime.
    /// Otherwise it starts out `Unauthenticated`.
    ///
    /// # Panics
    ///
    /// Panics if a refresh must be spawned and this is called outside of
    /// a Tokio runtime.
    pub fn new(transport: T, store: TokenStore, config: JwtConfig) -> Self {
        Self::with_clock(transport, store, config, System)
    }
}

impl<T, C> JwtService<T, C>
where
    T: AuthTransport + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Constructs a new service using the given clock
    ///
    /// See [`JwtService::new()`].
    pub fn with_clock(transport: T, store: TokenStore, config: JwtConfig, clock: C) -> Self {
        let tokens = store.tokens();
        let initial = classify(&tokens, clock.now());
        let (state, _) = watch::channel(LoginState::Pending);

        let service = Self {
            inner: Arc::new(Inner {
                transport,
                store,
                config,
                clock,
                tokens: Mutex::new(tokens.clone()),
                state,
                refresh_lock: tokio::sync::Mutex::new(None),
                refresh_attempts: AtomicU64::new(0),
            }),
        };

        tracing::debug!(classification = ?initial, "classified stored tokens");

        match initial {
            Classification::Authenticated => {
                service.publish_access_token(&tokens.access);
                service.set_state(LoginState::Authenticated);
            }
            Classification::NeedsRefresh => {
                let refresher = service.clone();
                tokio::spawn(async move {
                    if let Err(error) = refresher.check_for_update().await {
                        tracing::warn!(
                            error = (&error as &dyn error::Error),
                            "initial token refresh failed"
                        );
                    }
                });
            }
            Classification::Unauthenticated => service.set_state(LoginState::Unauthenticated),
        }

        service
    }

    /// Subscribes to state changes
    ///
    /// The receiver observes the current state immediately.
    pub fn state(&self) -> watch::Receiver<LoginState> {
        self.inner.state.subscribe()
    }

    /// The latest state
    pub fn current_state(&self) -> LoginState {
        *self.inner.state.borrow()
    }

    /// Waits until the service is no longer `Pending`
    pub async fn settled(&self) -> LoginState {
        let mut rx = self.state();
        let settled = rx
            .wait_for(|state| *state != LoginState::Pending)
            .await
            .map(|state| *state);

        settled.unwrap_or_else(|_| self.current_state())
    }

    /// The cached access token
    pub fn access_token(&self) -> Token {
        self.tokens().access.clone()
    }

    /// The cached refresh token
    pub fn refresh_token(&self) -> Token {
        self.tokens().refresh.clone()
    }

    /// The store that tokens are persisted to
    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// The transport used to reach the repository
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// The endpoint configuration
    pub fn config(&self) -> &JwtConfig {
        &self.inner.config
    }

    /// Logs in with a username and password
    ///
    /// The credentials are sent exactly once. On success, both returned
    /// tokens are persisted and the access token becomes a global header,
    /// even if the access token turns out not to be valid. Returns whether
    /// the service ended up `Authenticated`.
    ///
    /// Only call this over a secure channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be
    /// understood. Nothing is persisted in that case and the service
    /// becomes `Unauthenticated`.
    #[tracing::instrument(err, skip(self, password))]
    pub async fn login(
        &self,
        username: &UsernameRef,
        password: &PasswordRef,
    ) -> Result<bool, AuthError> {
        let _guard = self.inner.refresh_lock.lock().await;
        self.set_state(LoginState::Pending);

        let resp = match self.request_login(username, password).await {
            Ok(resp) => resp,
            Err(error) => {
                self.set_state(LoginState::Unauthenticated);
                return Err(error);
            }
        };

        self.inner.store.set_access_token(&resp.access);
        self.inner.store.set_refresh_token(&resp.refresh);

        let authenticated = resp.access.is_valid_with_clock(&self.inner.clock);
        tracing::info!(
            authenticated,
            access.expiry = resp.access.expiry().0,
            refresh.expiry = resp.refresh.expiry().0,
            "received new tokens"
        );

        self.publish_access_token(&resp.access);
        *self.tokens() = SessionTokens {
            access: resp.access,
            refresh: resp.refresh,
        };

        self.set_state(if authenticated {
            LoginState::Authenticated
        } else {
            LoginState::Unauthenticated
        });

        Ok(authenticated)
    }

    /// Clears both tokens from the store
    ///
    /// The access token stops being sent as a global header and the
    /// service re-classifies its now empty tokens.
    pub fn logout(&self) {
        let empty = Token::empty();
        self.inner.store.set_access_token(&empty);
        self.inner.store.set_refresh_token(&empty);
        self.inner
            .transport
            .remove_global_header(self.inner.config.access_header());

        let tokens = self.reload_tokens();
        let classification = classify(&tokens, self.inner.clock.now());
        tracing::info!(?classification, "logged out");

        if classification != Classification::Authenticated {
            self.set_state(LoginState::Unauthenticated);
        }
    }

    /// Refreshes the access token if it is no longer valid
    ///
    /// No request is made while the access token is valid, or when the
    /// refresh token is not valid either; the latter leaves the service
    /// `Unauthenticated`. Returns whether a refresh was performed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Refresh`] if the refresh request fails or the
    /// response cannot be understood. The service becomes `Unauthenticated`,
    /// and the stale tokens are left in the store. Callers that waited on the
    /// failed attempt receive the same error without a request of their own.
    pub async fn check_for_update(&self) -> Result<bool, AuthError> {
        if self.access_still_valid() {
            return Ok(false);
        }

        let attempts_seen = self.inner.refresh_attempts.load(Ordering::Acquire);
        let mut last_failure = self.inner.refresh_lock.lock().await;

        let tokens = self.reload_tokens();
        match classify(&tokens, self.inner.clock.now()) {
            Classification::Authenticated => {
                tracing::debug!("refresh already performed by another caller");
                return Ok(false);
            }
            Classification::Unauthenticated => {
                tracing::debug!("neither access nor refresh token is valid");
                self.set_state(LoginState::Unauthenticated);
                return Ok(false);
            }
            Classification::NeedsRefresh => {}
        }

        let completed = self.inner.refresh_attempts.load(Ordering::Acquire);
        if completed != attempts_seen {
            if let Some(failure) = last_failure
                .as_ref()
                .filter(|failure| failure.refresh == tokens.refresh)
            {
                tracing::debug!("sharing outcome of failed concurrent refresh");
                return Err(AuthError::Refresh(Arc::clone(&failure.error)));
            }
        }

        self.set_state(LoginState::Pending);

        let result = self.request_refresh(&tokens.refresh).await;
        self.inner.refresh_attempts.fetch_add(1, Ordering::AcqRel);

        let resp = match result {
            Ok(resp) => {
                *last_failure = None;
                resp
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "unable to refresh access token"
                );
                let error = Arc::new(error);
                *last_failure = Some(FailedRefresh {
                    refresh: tokens.refresh,
                    error: Arc::clone(&error),
                });
                self.set_state(LoginState::Unauthenticated);
                return Err(AuthError::Refresh(error));
            }
        };

        self.inner.store.set_access_token(&resp.access);

        let authenticated = resp.access.is_valid_with_clock(&self.inner.clock);
        tracing::info!(
            authenticated,
            access.expiry = resp.access.expiry().0,
            "received new access token"
        );

        self.publish_access_token(&resp.access);
        self.tokens().access = resp.access;

        self.set_state(if authenticated {
            LoginState::Authenticated
        } else {
            LoginState::Unauthenticated
        });

        Ok(true)
    }

    /// Reloads the tokens and reports whether the access token is still valid
    ///
    /// Leaves the state untouched, as a login may be in flight.
    fn access_still_valid(&self) -> bool {
        let valid = self
            .reload_tokens()
            .access
            .is_valid_with_clock(&self.inner.clock);
        if valid {
            tracing::trace!("access token still valid");
        }
        valid
    }

    async fn request_login(
        &self,
        username: &UsernameRef,
        password: &PasswordRef,
    ) -> Result<LoginResponse, AuthError> {
        let url = self.inner.config.login_url()?;

        let credentials = STANDARD.encode(format!("{}:{}", username, password.as_str()));
        let mut authorization = HeaderValue::from_str(&format!("Basic {}", credentials))?;
        authorization.set_sensitive(true);

        let mut headers = self.auth_type_headers();
        headers.insert(header::AUTHORIZATION, authorization);

        tracing::trace!(%url, "requesting tokens from repository");
        let body = self
            .inner
            .transport
            .post(url, headers)
            .await
            .map_err(|error| AuthError::Transport(error.into()))?;

        Ok(serde_json::from_slice(&body)?)
    }

    #[tracing::instrument(skip(self, refresh), fields(refresh.expiry = refresh.expiry().0))]
    async fn request_refresh(&self, refresh: &Token) -> Result<RefreshResponse, AuthError> {
        let url = self.inner.config.refresh_url()?;

        let mut refresh_data = HeaderValue::from_str(&refresh.to_string())?;
        refresh_data.set_sensitive(true);

        let mut headers = self.auth_type_headers();
        headers.insert(self.inner.config.refresh_header().clone(), refresh_data);

        tracing::trace!(%url, "requesting access token from repository");
        let body = self
            .inner
            .transport
            .post(url, headers)
            .await
            .map_err(|error| AuthError::Transport(error.into()))?;

        Ok(serde_json::from_slice(&body)?)
    }

    fn auth_type_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            self.inner.config.auth_type_header().clone(),
            self.inner.config.auth_type_value().clone(),
        );
        headers
    }
}

impl<T, C> JwtService<T, C>
where
    T: AuthTransport,
{
    fn tokens(&self) -> MutexGuard<'_, SessionTokens> {
        self.inner
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn reload_tokens(&self) -> SessionTokens {
        let tokens = self.inner.store.tokens();
        *self.tokens() = tokens.clone();
        tokens
    }

    fn publish_access_token(&self, access: &Token) {
        match HeaderValue::from_str(&access.to_string()) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.inner
                    .transport
                    .set_global_header(self.inner.config.access_header().clone(), value);
            }
            Err(error) => tracing::warn!(
                error = (&error as &dyn error::Error),
                "access token is not a valid header value, not attaching it to requests"
            ),
        }
    }

    fn set_state(&self, state: LoginState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, current = ?state, "login state changed");
        }
    }
}
