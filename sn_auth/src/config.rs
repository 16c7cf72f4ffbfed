use http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration of the repository's token endpoints
///
/// The defaults match the repository's token authentication protocol:
///
/// * login: `POST {base_url}/sn-token/login`
/// * refresh: `POST {base_url}/sn-token/refresh`
/// * the access token travels in `X-Access-Data`
/// * the refresh token travels in `X-Refresh-Data`
/// * token requests are marked with `X-Authentication-Type: Token`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtConfig {
    base_url: Url,
    #[serde(default = "defaults::login_path")]
    login_path: String,
    #[serde(default = "defaults::refresh_path")]
    refresh_path: String,
    #[serde(default = "defaults::access_header", with = "header_name")]
    access_header: HeaderName,
    #[serde(default = "defaults::refresh_header", with = "header_name")]
    refresh_header: HeaderName,
    #[serde(default = "defaults::auth_type_header", with = "header_name")]
    auth_type_header: HeaderName,
    #[serde(default = "defaults::auth_type_value", with = "header_value")]
    auth_type_value: HeaderValue,
}

mod defaults {
    use http::{HeaderName, HeaderValue};

    pub(super) fn login_path() -> String {
        "sn-token/login".to_owned()
    }

    pub(super) fn refresh_path() -> String {
        "sn-token/refresh".to_owned()
    }

    pub(super) fn access_header() -> HeaderName {
        HeaderName::from_static("x-access-data")
    }

    pub(super) fn refresh_header() -> HeaderName {
        HeaderName::from_static("x-refresh-data")
    }

    pub(super) fn auth_type_header() -> HeaderName {
        HeaderName::from_static("x-authentication-type")
    }

    pub(super) fn auth_type_value() -> HeaderValue {
        HeaderValue::from_static("Token")
    }
}

impl JwtConfig {
    /// Constructs the default configuration for the repository at `base_url`
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            login_path: defaults::login_path(),
            refresh_path: defaults::refresh_path(),
            access_header: defaults::access_header(),
            refresh_header: defaults::refresh_header(),
            auth_type_header: defaults::auth_type_header(),
            auth_type_value: defaults::auth_type_value(),
        }
    }

    /// Sets the path of the login endpoint, relative to the base URL
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Sets the path of the refresh endpoint, relative to the base URL
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Sets the header used to carry the access token on outgoing requests
    pub fn with_access_header(mut self, name: HeaderName) -> Self {
        self.access_header = name;
        self
    }

    /// Sets the header used to carry the refresh token to the refresh endpoint
    pub fn with_refresh_header(mut self, name: HeaderName) -> Self {
        self.refresh_header = name;
        self
    }

    /// Sets the header and value marking requests as token authentication
    pub fn with_auth_type(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.auth_type_header = name;
        self.auth_type_value = value;
        self
    }

    /// The repository's base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The header carrying the access token
    pub fn access_header(&self) -> &HeaderName {
        &self.access_header
    }

    /// The header carrying the refresh token
    pub fn refresh_header(&self) -> &HeaderName {
        &self.refresh_header
    }

    /// The header marking token authentication requests
    pub fn auth_type_header(&self) -> &HeaderName {
        &self.auth_type_header
    }

    /// The value of the token authentication marker
    pub fn auth_type_value(&self) -> &HeaderValue {
        &self.auth_type_value
    }

    /// The full URL of the login endpoint
    pub fn login_url(&self) -> Result<Url, url::ParseError> {
        self.endpoint(&self.login_path)
    }

    /// The full URL of the refresh endpoint
    pub fn refresh_url(&self) -> Result<Url, url::ParseError> {
        self.endpoint(&self.refresh_path)
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }
}

mod header_name {
    use http::HeaderName;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(name: &HeaderName, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(name.as_str())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<HeaderName, D::Error> {
        let name = String::deserialize(d)?;
        HeaderName::from_bytes(name.as_bytes()).map_err(de::Error::custom)
    }
}

mod header_value {
    use http::HeaderValue;
    use serde::{de, ser, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &HeaderValue, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.to_str().map_err(ser::Error::custom)?)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<HeaderValue, D::Error> {
        let value = String::deserialize(d)?;
        HeaderValue::from_str(&value).map_err(de::Error::custom)
    }
}
