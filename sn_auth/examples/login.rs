use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use sn_auth::{
    Environment, FileStorage, JwtConfig, JwtService, LoginState, MemoryStorage, Password,
    ReqwestCookieJar, ReqwestTransport, TokenPersist, TokenStore, TokenStoreConfig, Username,
};
use tokio::time;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Persist {
    Session,
    Expiration,
}

#[derive(Debug, Parser)]
struct Opts {
    /// The repository's base URL
    #[arg(short, long, env)]
    base_url: url::Url,

    /// The user to log in as
    #[arg(short, long, env)]
    username: String,

    /// The user's password
    #[arg(short, long, env, hide_env_values = true)]
    password: String,

    /// The local file used to persist tokens across runs
    #[arg(short = 'f', long, env, default_value = ".tokens.json")]
    tokens_file: PathBuf,

    /// How long tokens should outlive this process
    #[arg(long, value_enum, default_value = "expiration")]
    persist: Persist,

    /// Seconds between checks for an expired access token
    #[arg(long, default_value = "30")]
    interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let jar = Arc::new(reqwest::cookie::Jar::default());
    let client = reqwest::Client::builder()
        .cookie_provider(jar.clone())
        .build()?;

    let environment = Environment::new()
        .with_session_storage(MemoryStorage::new())
        .with_local_storage(FileStorage::new(opts.tokens_file))
        .with_cookies(ReqwestCookieJar::new(jar, opts.base_url.clone()));

    let persistence = match opts.persist {
        Persist::Session => TokenPersist::Session,
        Persist::Expiration => TokenPersist::Expiration,
    };
    let store = TokenStore::new(
        TokenStoreConfig::new(opts.base_url.as_str()).with_persistence(persistence),
        environment,
    );
    tracing::info!(backend = ?store.backend_kind(), "selected token storage");

    let service = JwtService::new(
        ReqwestTransport::new(client),
        store,
        JwtConfig::new(opts.base_url),
    );

    let mut state = service.state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            tracing::info!(state = ?current, "login state changed");
        }
    });

    if service.settled().await == LoginState::Unauthenticated {
        let username = Username::new(opts.username);
        let password = Password::new(opts.password);
        service.login(&username, &password).await?;
    }

    let access = service.access_token();
    tracing::info!(
        token = format_args!("{:#?}", access),
        user = %access.username(),
        expires = %access.expiration_time(),
        "current access token"
    );

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        match service.check_for_update().await {
            Ok(true) => tracing::info!(
                expires = %service.access_token().expiration_time(),
                "refreshed access token"
            ),
            Ok(false) => tracing::debug!(state = ?service.current_state(), "no refresh needed"),
            Err(error) => {
                tracing::error!(
                    error = (&error as &dyn std::error::Error),
                    "unable to refresh access token"
                );
                break;
            }
        }

        if service.current_state() == LoginState::Unauthenticated {
            tracing::warn!("session ended");
            break;
        }
    }

    Ok(())
}
