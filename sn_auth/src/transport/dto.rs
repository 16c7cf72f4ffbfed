//! DTOs for interacting with the repository's token endpoints

use serde::{Deserialize, Serialize};

use crate::Token;

/// The body returned by a successful login
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoginResponse {
    /// The new access token
    pub access: Token,
    /// The new refresh token
    pub refresh: Token,
}

/// The body returned by a successful refresh
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RefreshResponse {
    /// The new access token
    pub access: Token,
}
