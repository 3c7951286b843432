//! Everything that talks to the identity provider: the client-side REST calls that issue ID
//! tokens, the backend-side verification of those tokens, and the service account that mints
//! custom tokens.

pub mod service_account;
pub mod toolkit;
pub mod verify;

use serde_json::{Map, Value};

use crate::prelude::*;

pub use service_account::{ServiceAccount, ServiceAccountError};
pub use toolkit::{Grant, IdentityConfig, IdentityError, Tokens, Toolkit};
pub use verify::{KeyStore, VerifyError, Verifier};

/// Claims of a verified ID token.
///
/// The well-known claims are typed; everything else the provider put into the token is kept
/// verbatim in `extra` so it can be echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// The user id is the token's subject.
    pub fn uid(&self) -> &str {
        &self.sub
    }
}
