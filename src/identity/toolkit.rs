use std::time::Duration;

use reqwest::StatusCode;
use secrecy::{ExposeSecret as _, SecretString};
use serde::de::DeserializeOwned;
use tracing::instrument;
use url::Url;

use crate::prelude::*;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_api_key")]
    pub api_key: SecretString,
    #[serde(default = "default_identity_url")]
    pub identity_url: Url,
    #[serde(default = "default_secure_token_url")]
    pub secure_token_url: Url,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            identity_url: default_identity_url(),
            secure_token_url: default_secure_token_url(),
        }
    }
}

fn default_api_key() -> SecretString {
    SecretString::new("local-api-key".into())
}

fn default_identity_url() -> Url {
    Url::parse("https://identitytoolkit.googleapis.com").expect("valid identity toolkit url")
}

fn default_secure_token_url() -> Url {
    Url::parse("https://securetoken.googleapis.com").expect("valid secure token url")
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IdentityError {
    #[snafu(display("identity provider is unreachable: {source}"))]
    Network { source: reqwest::Error },

    #[snafu(display("identity provider quota exhausted ({code})"))]
    ResourceExhausted { code: String },

    #[snafu(display("operation is restricted to administrators"))]
    AdminRestricted,

    #[snafu(display("identity provider rejected the request ({status}): {code}"))]
    Rejected { status: u16, code: String },
}

impl Exhaustion for IdentityError {
    fn is_resource_exhausted(&self) -> bool {
        matches!(self, IdentityError::ResourceExhausted { .. })
    }
}

impl IdentityError {
    fn from_response(status: StatusCode, message: Option<String>) -> Self {
        // messages look like `TOO_MANY_ATTEMPTS_TRY_LATER : Too many unsuccessful attempts`
        let code = message
            .as_deref()
            .and_then(|message| message.split(" : ").next())
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("UNKNOWN"))
            .to_owned();

        match code.as_str() {
            "ADMIN_ONLY_OPERATION" => IdentityError::AdminRestricted,
            "RESOURCE_EXHAUSTED" | "QUOTA_EXCEEDED" | "TOO_MANY_ATTEMPTS_TRY_LATER" => {
                IdentityError::ResourceExhausted { code }
            }
            _ if status == StatusCode::TOO_MANY_REQUESTS => {
                IdentityError::ResourceExhausted { code }
            }
            _ => IdentityError::Rejected {
                status: status.as_u16(),
                code,
            },
        }
    }
}

/// A freshly issued ID token and the refresh token that renews it.
#[derive(Clone, PartialEq, Eq)]
pub struct Tokens {
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: Duration,
}

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokens")
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Result of a successful sign-in or sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub uid: String,
    pub email: Option<String>,
    pub anonymous: bool,
    pub tokens: Tokens,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    local_id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

fn expires_in(seconds: &str) -> Duration {
    Duration::from_secs(seconds.parse().unwrap_or(0))
}

impl SignInResponse {
    fn into_grant(self, anonymous: bool) -> Grant {
        Grant {
            uid: self.local_id,
            email: self.email.filter(|email| !email.is_empty()),
            anonymous,
            tokens: Tokens {
                expires_in: expires_in(&self.expires_in),
                id_token: self.id_token,
                refresh_token: self.refresh_token,
            },
        }
    }
}

/// Client for the identity provider's REST API (accounts and secure token endpoints).
#[derive(Debug, Clone)]
pub struct Toolkit {
    client: reqwest::Client,
    api_key: SecretString,
    identity_url: Url,
    secure_token_url: Url,
}

impl Toolkit {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            identity_url: config.identity_url.clone(),
            secure_token_url: config.secure_token_url.clone(),
        }
    }

    fn accounts(&self, method: &str) -> String {
        format!(
            "{}/v1/accounts:{method}",
            self.identity_url.as_str().trim_end_matches('/')
        )
    }

    async fn post<R: DeserializeOwned>(
        &self,
        url: String,
        body: &serde_json::Value,
    ) -> Result<R, IdentityError> {
        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.expose_secret())])
            .json(body)
            .send()
            .await
            .context(NetworkSnafu)?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.context(NetworkSnafu);
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        let err = IdentityError::from_response(status, body.error.message);
        tracing::debug!(%status, "identity provider refused the request: {err}");

        Err(err)
    }

    #[instrument(skip(self, password))]
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Grant, IdentityError> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        });

        let response: SignInResponse = self.post(self.accounts("signUp"), &body).await?;
        Ok(response.into_grant(false))
    }

    #[instrument(skip(self, password))]
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Grant, IdentityError> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        });

        let response: SignInResponse =
            self.post(self.accounts("signInWithPassword"), &body).await?;
        Ok(response.into_grant(false))
    }

    /// Creates a new anonymous account: a sign-up without any credentials.
    #[instrument(skip(self))]
    pub async fn sign_in_anonymously(&self) -> Result<Grant, IdentityError> {
        let body = serde_json::json!({ "returnSecureToken": true });

        let response: SignInResponse = self.post(self.accounts("signUp"), &body).await?;
        Ok(response.into_grant(true))
    }

    #[instrument(skip_all)]
    pub async fn sign_in_with_custom_token(&self, token: &str) -> Result<Grant, IdentityError> {
        let body = serde_json::json!({
            "token": token,
            "returnSecureToken": true,
        });

        let response: SignInResponse = self
            .post(self.accounts("signInWithCustomToken"), &body)
            .await?;
        Ok(response.into_grant(false))
    }

    /// Exchange a refresh token for a new ID token.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<Tokens, IdentityError> {
        let url = format!(
            "{}/v1/token",
            self.secure_token_url.as_str().trim_end_matches('/')
        );
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        });

        let response: RefreshResponse = self.post(url, &body).await?;
        Ok(Tokens {
            expires_in: expires_in(&response.expires_in),
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        })
    }
}
