use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret as _, SecretString};

use crate::prelude::*;

/// Audience the identity provider expects in custom tokens.
pub const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

const CUSTOM_TOKEN_LIFETIME: i64 = 60 * 60;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServiceAccountError {
    #[snafu(display("service account private key is not a valid RSA PEM key: {source}"))]
    PrivateKey {
        source: jsonwebtoken::errors::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("uid must be between 1 and 128 characters, got {length}"))]
    InvalidUid { length: usize },

    #[snafu(display("failed to sign custom token: {source}"))]
    Sign {
        source: jsonwebtoken::errors::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CustomTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub uid: String,
}

/// The backend's credentials with the identity provider.
#[derive(Clone)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    key: EncodingKey,
}

impl ServiceAccount {
    /// Environment variables usually carry the key with escaped newlines, they are restored
    /// before parsing.
    pub fn new(
        project_id: impl Into<String>,
        client_email: impl Into<String>,
        private_key: &SecretString,
    ) -> Result<Self, ServiceAccountError> {
        let pem = private_key.expose_secret().replace("\\n", "\n");
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).context(PrivateKeySnafu)?;

        Ok(Self {
            project_id: project_id.into(),
            client_email: client_email.into(),
            key,
        })
    }

    /// Mint a one-hour custom token that signs in as `uid`.
    pub fn custom_token(&self, uid: &str) -> Result<String, ServiceAccountError> {
        let length = uid.chars().count();
        ensure!((1..=128).contains(&length), InvalidUidSnafu { length });

        let now = Utc::now().timestamp();
        let claims = CustomTokenClaims {
            iss: self.client_email.clone(),
            sub: self.client_email.clone(),
            aud: CUSTOM_TOKEN_AUDIENCE.to_owned(),
            iat: now,
            exp: now + CUSTOM_TOKEN_LIFETIME,
            uid: uid.to_owned(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .context(SignSnafu)
    }
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}
