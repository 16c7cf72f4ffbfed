//! A transport that talks to the repository using reqwest

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

use super::{AuthTransport, GlobalHeaders};

/// An error while sending a request to the repository
#[derive(Debug, Error)]
pub enum TransportError {
    /// The repository answered with an error status
    #[error("error response from repository: {body}")]
    ErrorWithBody {
        /// The underlying status error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send the request to the repository
    #[error("error sending request to repository")]
    RequestSend(#[source] reqwest::Error),
}

/// A reqwest-based transport
///
/// Global headers are kept in a [`GlobalHeaders`] set which can be shared
/// with other parts of the client, such as a request middleware, and are
/// never attached to the token endpoint requests themselves.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    global_headers: GlobalHeaders,
}

impl ReqwestTransport {
    /// Constructs a new transport with an empty global header set
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            global_headers: GlobalHeaders::new(),
        }
    }

    /// Uses an existing global header set
    pub fn with_global_headers(mut self, global_headers: GlobalHeaders) -> Self {
        self.global_headers = global_headers;
        self
    }

    /// The headers attached to every other request of the client
    pub fn global_headers(&self) -> &GlobalHeaders {
        &self.global_headers
    }
}

#[async_trait]
impl AuthTransport for ReqwestTransport {
    type Error = TransportError;

    async fn post(&self, url: Url, headers: HeaderMap) -> Result<Bytes, Self::Error> {
        tracing::trace!(%url, "sending request to repository");

        let resp = self
            .client
            .post(url)
            .headers(headers)
            .send()
            .await
            .map_err(TransportError::RequestSend)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received response from repository"
        );

        if let Err(error) = resp.error_for_status_ref() {
            let body = resp.text().await.map_err(TransportError::BodyReadError)?;
            return Err(TransportError::ErrorWithBody {
                source: error,
                body,
            });
        }

        resp.bytes().await.map_err(TransportError::BodyReadError)
    }

    fn set_global_header(&self, name: HeaderName, value: HeaderValue) {
        self.global_headers.insert(name, value);
    }

    fn remove_global_header(&self, name: &HeaderName) {
        self.global_headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        token::test_tokens, JwtConfig, JwtService, LoginState, Password, TokenStore,
        TokenStoreConfig, Username,
    };

    fn service(server: &MockServer) -> Result<JwtService<ReqwestTransport>> {
        let config = JwtConfig::new(Url::parse(&server.uri())?);
        let store = TokenStore::in_memory(TokenStoreConfig::new(server.uri()));
        Ok(JwtService::new(
            ReqwestTransport::new(reqwest::Client::new()),
            store,
            config,
        ))
    }

    #[tokio::test]
    async fn login_posts_basic_credentials() -> Result<()> {
        let server = MockServer::start().await;
        let access = test_tokens::valid("u");
        let refresh = test_tokens::valid("u");

        Mock::given(method("POST"))
            .and(path("/sn-token/login"))
            .and(header("authorization", "Basic dTpw"))
            .and(header("x-authentication-type", "Token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access": access.to_string(),
                "refresh": refresh.to_string(),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server)?;
        let logged_in = service
            .login(&Username::from_static("u"), &Password::from_static("p"))
            .await?;

        assert!(logged_in);
        assert_eq!(service.current_state(), LoginState::Authenticated);
        assert_eq!(
            service
                .transport()
                .global_headers()
                .get(&HeaderName::from_static("x-access-data")),
            Some(HeaderValue::from_str(&access.to_string())?)
        );
        Ok(())
    }

    #[tokio::test]
    async fn error_status_fails_login_with_body() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/sn-token/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server)?;
        let result = service
            .login(&Username::from_static("u"), &Password::from_static("wrong"))
            .await;

        let error = result.expect_err("login should fail");
        let source = std::error::Error::source(&error)
            .and_then(|s| s.downcast_ref::<TransportError>())
            .expect("transport error");
        assert!(
            matches!(source, TransportError::ErrorWithBody { body, .. } if body == "bad credentials")
        );
        assert_eq!(service.current_state(), LoginState::Unauthenticated);
        assert!(service.store().access_token().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_sends_refresh_token_header() -> Result<()> {
        let server = MockServer::start().await;
        let refresh = test_tokens::valid("u");
        let access = test_tokens::valid("u");

        Mock::given(method("POST"))
            .and(path("/sn-token/refresh"))
            .and(header("x-refresh-data", refresh.to_string().as_str()))
            .and(header("x-authentication-type", "Token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "access": access.to_string() })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = TokenStore::in_memory(TokenStoreConfig::new(server.uri()));
        store.set_refresh_token(&refresh);

        let service = JwtService::new(
            ReqwestTransport::new(reqwest::Client::new()),
            store,
            JwtConfig::new(Url::parse(&server.uri())?),
        );

        assert_eq!(service.settled().await, LoginState::Authenticated);
        assert_eq!(service.access_token(), access);
        Ok(())
    }
}
