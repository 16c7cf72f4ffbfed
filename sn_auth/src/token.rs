use std::fmt;

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sn_auth_clock::{Clock, System, UnixTime};

use crate::braids::limited_reveal;

/// Accepts the URL-safe alphabet with or without padding
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The claims carried in the payload half of a token
///
/// Absent string claims decode as empty strings and absent time claims as the
/// Unix epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenPayload {
    /// Issuer
    pub iss: String,
    /// Subject
    pub sub: String,
    /// Audience
    pub aud: String,
    /// Expiration instant
    pub exp: UnixTime,
    /// Issued-at instant
    pub iat: UnixTime,
    /// Not-valid-before instant
    pub nbf: UnixTime,
    /// Display name of the principal
    pub name: String,
}

impl TokenPayload {
    /// Whether `time` falls strictly between the `nbf` and `exp` claims
    #[inline]
    pub fn is_valid_at(&self, time: UnixTime) -> bool {
        self.nbf < time && time < self.exp
    }
}

/// A bearer token as issued by the repository
///
/// A token is an immutable pair of an encoded header and an encoded payload.
/// Neither half is checked when the token is constructed; a malformed
/// payload simply decodes to [`TokenPayload::default()`], which is never
/// valid. A user who has never logged in and a user holding a corrupted
/// token are therefore indistinguishable: both hold an invalid token.
///
/// The `Display` implementation produces the wire format
/// `<header>.<payload>`. `Debug` only reveals a short prefix, and only when
/// the alternate flag is set.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Token {
    header: String,
    payload: String,
}

impl Token {
    /// Constructs a token from its wire format
    ///
    /// The input is split on the first `.`. Input without any `.` is taken
    /// to be all header.
    pub fn from_encoded(head_and_payload: &str) -> Self {
        let (header, payload) = head_and_payload
            .split_once('.')
            .unwrap_or((head_and_payload, ""));

        Self {
            header: header.to_owned(),
            payload: payload.to_owned(),
        }
    }

    /// Constructs a token with an empty header and payload
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether both halves of the token are empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.payload.is_empty()
    }

    /// The encoded header, verbatim
    #[inline]
    pub fn encoded_header(&self) -> &str {
        &self.header
    }

    /// The encoded payload, verbatim
    #[inline]
    pub fn encoded_payload(&self) -> &str {
        &self.payload
    }

    /// Decodes the claims from the payload
    ///
    /// Any decoding failure yields the default, all-empty payload. If the
    /// payload half carries a trailing signature segment, only the claims
    /// segment before it is decoded.
    pub fn payload(&self) -> TokenPayload {
        let claims = self.payload.split('.').next().unwrap_or_default();
        decode_payload(claims).unwrap_or_default()
    }

    /// The time at which the token expires
    pub fn expiration_time(&self) -> DateTime<Utc> {
        self.payload().exp.to_utc()
    }

    /// The time before which the token is not valid
    pub fn not_before(&self) -> DateTime<Utc> {
        self.payload().nbf.to_utc()
    }

    /// The time at which the token was issued
    pub fn issued_date(&self) -> DateTime<Utc> {
        self.payload().iat.to_utc()
    }

    /// The raw `exp` claim
    pub fn expiry(&self) -> UnixTime {
        self.payload().exp
    }

    /// The display name of the principal, empty if not available
    pub fn username(&self) -> String {
        self.payload().name
    }

    /// Whether the token is currently valid according to the system clock
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.is_valid_with_clock(&System)
    }

    /// Whether the token is currently valid according to the provided clock
    #[inline]
    pub fn is_valid_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_valid_at(clock.now())
    }

    /// Whether the token is valid as of the provided time
    #[inline]
    pub fn is_valid_at(&self, time: UnixTime) -> bool {
        self.payload().is_valid_at(time)
    }
}

fn decode_payload(encoded: &str) -> Option<TokenPayload> {
    if encoded.is_empty() {
        return None;
    }

    // Tokens minted with the standard alphabet are accepted as well.
    let normalized: String = encoded
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();

    let raw = PAYLOAD_ENGINE.decode(normalized).ok()?;
    serde_json::from_slice(&raw).ok()
}

impl From<&str> for Token {
    #[inline]
    fn from(s: &str) -> Self {
        Self::from_encoded(s)
    }
}

impl From<String> for Token {
    #[inline]
    fn from(s: String) -> Self {
        Self::from_encoded(&s)
    }
}

impl From<Token> for String {
    #[inline]
    fn from(t: Token) -> Self {
        t.to_string()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.header)?;
        f.write_str(".")?;
        f.write_str(&self.payload)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            f.write_str("\"")?;
            limited_reveal(&self.to_string(), &mut *f, 15)?;
            f.write_str("\"")
        } else {
            f.write_str("***TOKEN***")
        }
    }
}
