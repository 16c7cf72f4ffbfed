//! Client-side session management for repositories using token authentication
//!
//! A repository issues two tokens on login: a short-lived _access_ token,
//! which is sent as a header with every request the client makes, and a
//! longer-lived _refresh_ token, which is exchanged for a new access token
//! once the old one expires. This crate keeps both tokens persisted, keeps
//! the access token attached to outgoing requests, and publishes whether
//! the client is currently logged in.
//!
//! The moving parts are:
//!
//! * [`Token`]: a JWT-style value with the claims decoded from its payload
//! * [`TokenStore`]: persistence for the access and refresh tokens, using
//!   the best storage backend available in the [`Environment`]
//! * [`JwtService`]: the login state machine, driving login, silent
//!   refresh and logout through an [`AuthTransport`]
//!
//! ```
//! use sn_auth::{
//!     Environment, JwtConfig, JwtService, LoginState, MemoryStorage, Password, ReqwestTransport,
//!     TokenStore, TokenStoreConfig, Username,
//! };
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let base_url = url::Url::parse("https://repo.example.com")?;
//!
//! let environment = Environment::new().with_session_storage(MemoryStorage::new());
//! let store = TokenStore::new(TokenStoreConfig::new(base_url.as_str()), environment);
//!
//! let service = JwtService::new(
//!     ReqwestTransport::new(reqwest::Client::new()),
//!     store,
//!     JwtConfig::new(base_url),
//! );
//!
//! assert_eq!(service.settled().await, LoginState::Unauthenticated);
//! # let _login = async move {
//! service
//!     .login(&Username::from_static("user"), &Password::from_static("hunter2"))
//!     .await?;
//! # Ok::<_, sn_auth::AuthError>(()) };
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `file`: Provides [`FileStorage`], a key-value storage persisted to the
//!   local filesystem.
//! * `reqwest`: Provides [`ReqwestTransport`] and [`ReqwestCookieJar`], based
//!   on the [reqwest] HTTP client.
//! * `default-tls`: Uses reqwest's default TLS implementation.
//!
//! The `rustls-tls` feature may be enabled instead of `default-tls`.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod config;
mod service;
pub mod storage;
mod store;
mod token;
pub mod transport;

pub use braids::*;
pub use config::JwtConfig;
pub use service::{AuthError, JwtService, LoginState};
#[cfg(feature = "file")]
pub use storage::FileStorage;
#[cfg(feature = "reqwest")]
pub use storage::ReqwestCookieJar;
pub use storage::{CookieJar, KeyValueStorage, MemoryStorage, StorageError};
pub use store::{
    select_backend, BackendKind, Capabilities, Environment, SessionTokens, TokenPersist,
    TokenSlot, TokenStore, TokenStoreConfig, DEFAULT_KEY_TEMPLATE,
};
pub use token::{Token, TokenPayload};
#[cfg(feature = "reqwest")]
pub use transport::{ReqwestTransport, TransportError};
pub use transport::{AuthTransport, GlobalHeaders};
