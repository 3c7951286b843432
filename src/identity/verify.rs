use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::header::{HeaderMap, CACHE_CONTROL};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::instrument;
use url::Url;

use super::Claims;
use crate::prelude::*;

/// Public keys used by the identity provider to sign ID tokens.
pub const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

const REFETCH_COOLDOWN: Duration = Duration::from_secs(60);

/// Tolerated clock skew, in seconds.
const LEEWAY: u64 = 60;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum VerifyError {
    #[snafu(display("ID token has expired"))]
    Expired,

    #[snafu(display("ID token is malformed or its signature is invalid: {source}"))]
    Invalid { source: jsonwebtoken::errors::Error },

    #[snafu(display("ID token header has no key id"))]
    MissingKeyId,

    #[snafu(display("ID token is signed with unknown key `{kid}`"))]
    UnknownKey { kid: String },

    #[snafu(display("ID token has an empty subject"))]
    EmptySubject,

    #[snafu(display("ID token was issued in the future"))]
    IssuedInFuture,

    #[snafu(display("cannot fetch the identity provider's public keys: {source}"))]
    FetchKeys { source: reqwest::Error },

    #[snafu(display("public key `{kid}` cannot be used: {source}"))]
    BadKey {
        kid: String,
        source: jsonwebtoken::errors::Error,
    },
}

impl VerifyError {
    pub fn is_expired(&self) -> bool {
        matches!(self, VerifyError::Expired)
    }
}

struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
    expires_at: Instant,
}

impl CachedKeys {
    fn fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Keys published by the identity provider as a JWK set, cached for as long as the provider's
/// `Cache-Control: max-age` allows.
///
/// A token naming a key missing from a fresh cache triggers a refetch at most once per cooldown,
/// so unauthenticated callers cannot drive traffic to the key server.
pub struct RemoteKeys {
    url: Url,
    client: reqwest::Client,
    refetch_cooldown: Duration,
    cache: RwLock<Option<CachedKeys>>,
}

impl RemoteKeys {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            refetch_cooldown: REFETCH_COOLDOWN,
            cache: RwLock::new(None),
        }
    }

    /// Minimum time between two fetches caused by unknown key ids.
    pub fn refetch_cooldown(mut self, cooldown: Duration) -> Self {
        self.refetch_cooldown = cooldown;
        self
    }

    async fn cached(&self, kid: &str) -> Option<DecodingKey> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|cached| cached.fresh(Instant::now()))
            .and_then(|cached| cached.keys.get(kid).cloned())
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<CachedKeys, VerifyError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .context(FetchKeysSnafu)?;

        let max_age = max_age(response.headers()).unwrap_or(DEFAULT_MAX_AGE);
        let set: JwkSet = response.json().await.context(FetchKeysSnafu)?;

        let keys: HashMap<_, _> = set
            .keys
            .iter()
            .filter_map(|jwk| {
                let kid = jwk.common.key_id.clone()?;
                match DecodingKey::from_jwk(jwk) {
                    Ok(key) => Some((kid, key)),
                    Err(err) => {
                        tracing::warn!(%kid, "skipping unusable public key: {err}");
                        None
                    }
                }
            })
            .collect();

        tracing::debug!(keys = keys.len(), ?max_age, "fetched public keys");

        let now = Instant::now();
        Ok(CachedKeys {
            keys,
            fetched_at: now,
            expires_at: now + max_age,
        })
    }

    async fn key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        if let Some(key) = self.cached(kid).await {
            return Ok(key);
        }

        // one fetch at a time, later callers see its result
        let mut cache = self.cache.write().await;
        let now = Instant::now();

        if let Some(cached) = cache.as_ref().filter(|cached| cached.fresh(now)) {
            if let Some(key) = cached.keys.get(kid) {
                return Ok(key.clone());
            }

            if now < cached.fetched_at + self.refetch_cooldown {
                return UnknownKeySnafu { kid }.fail();
            }
        }

        let fetched = self.fetch().await?;
        let key = fetched.keys.get(kid).cloned();
        *cache = Some(fetched);

        key.context(UnknownKeySnafu { kid })
    }
}

fn max_age(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(CACHE_CONTROL)?.to_str().ok()?;

    value
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|seconds| seconds.parse().ok())
        .map(Duration::from_secs)
}

/// Where the verifier looks up the key a token was signed with.
pub enum KeyStore {
    Remote(RemoteKeys),
    Pinned(HashMap<String, DecodingKey>),
}

impl KeyStore {
    pub fn remote(url: Url) -> Self {
        KeyStore::Remote(RemoteKeys::new(url))
    }

    /// A fixed set of keys, never refreshed.
    pub fn pinned() -> Self {
        KeyStore::Pinned(HashMap::new())
    }

    /// Add an RSA public key (PEM, `PUBLIC KEY` or `RSA PUBLIC KEY`) to a pinned store.
    pub fn with_rsa_pem(self, kid: impl Into<String>, pem: &[u8]) -> Result<Self, VerifyError> {
        let kid = kid.into();
        let key = DecodingKey::from_rsa_pem(pem).context(BadKeySnafu { kid: kid.clone() })?;

        let mut keys = match self {
            KeyStore::Pinned(keys) => keys,
            KeyStore::Remote(_) => HashMap::new(),
        };
        keys.insert(kid, key);

        Ok(KeyStore::Pinned(keys))
    }

    async fn key(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        match self {
            KeyStore::Remote(remote) => remote.key(kid).await,
            KeyStore::Pinned(keys) => keys.get(kid).cloned().context(UnknownKeySnafu { kid }),
        }
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStore::Remote(remote) => f.debug_tuple("Remote").field(&remote.url.as_str()).finish(),
            KeyStore::Pinned(keys) => f.debug_tuple("Pinned").field(&keys.keys()).finish(),
        }
    }
}

/// Verifies ID tokens issued for one project.
#[derive(Debug)]
pub struct Verifier {
    project_id: String,
    keys: KeyStore,
}

impl Verifier {
    pub fn new(project_id: impl Into<String>, keys: KeyStore) -> Self {
        Self {
            project_id: project_id.into(),
            keys,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = LEEWAY;
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[self.issuer()]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "aud", "iss"]);
        validation
    }

    /// Check the token's signature, audience, issuer and lifetime, then return its claims.
    #[instrument(skip_all, fields(project_id = %self.project_id))]
    pub async fn verify(&self, token: &str) -> Result<Claims, VerifyError> {
        let header = jsonwebtoken::decode_header(token).context(InvalidSnafu)?;
        let kid = header.kid.context(MissingKeyIdSnafu)?;
        let key = self.keys.key(&kid).await?;

        let data = jsonwebtoken::decode::<Claims>(token, &key, &self.validation()).map_err(
            |source| match source.kind() {
                ErrorKind::ExpiredSignature => VerifyError::Expired,
                _ => VerifyError::Invalid { source },
            },
        )?;

        let claims = data.claims;
        ensure!(!claims.sub.is_empty(), EmptySubjectSnafu);
        ensure!(
            claims.iat <= Utc::now().timestamp() + LEEWAY as i64,
            IssuedInFutureSnafu
        );

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_max_age_from_cache_control() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CACHE_CONTROL,
            "public, max-age=19958, must-revalidate, no-transform"
                .parse()
                .unwrap(),
        );

        assert_eq!(max_age(&headers), Some(Duration::from_secs(19958)));
    }

    #[test]
    fn missing_max_age_is_none() {
        let mut headers = HeaderMap::new();
        assert_eq!(max_age(&headers), None);

        headers.insert(CACHE_CONTROL, "no-cache".parse().unwrap());
        assert_eq!(max_age(&headers), None);
    }

    #[test]
    fn issuer_is_derived_from_the_project() {
        let verifier = Verifier::new("demo-project", KeyStore::pinned());
        assert_eq!(verifier.issuer(), "https://securetoken.google.com/demo-project");
    }

    #[tokio::test]
    async fn garbage_is_invalid() {
        let verifier = Verifier::new("demo-project", KeyStore::pinned());
        let err = verifier.verify("not-a-token").await.unwrap_err();
        assert!(matches!(err, VerifyError::Invalid { .. }));
        assert!(!err.is_expired());
    }
}
