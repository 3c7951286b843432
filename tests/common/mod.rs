#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use clicker::api;
use clicker::identity::{KeyStore, Verifier};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

pub const PROJECT_ID: &str = "demo-project";
pub const KEY_ID: &str = "fixture-key";

pub const SIGNING_KEY: &str = include_str!("../fixtures/signing_key.pem");
pub const PUBLIC_KEY: &str = include_str!("../fixtures/signing_key.pub.pem");
pub const ROGUE_KEY: &str = include_str!("../fixtures/rogue_key.pem");
pub const JWKS: &str = include_str!("../fixtures/jwks.json");

pub fn issuer() -> String {
    format!("https://securetoken.google.com/{PROJECT_ID}")
}

/// Claims of a freshly issued ID token for `uid`.
pub fn claims(uid: &str) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": issuer(),
        "aud": PROJECT_ID,
        "sub": uid,
        "iat": now,
        "exp": now + 3600,
        "auth_time": now,
        "email": format!("{uid}@example.com"),
        "email_verified": false,
        "firebase": {
            "identities": { "email": [format!("{uid}@example.com")] },
            "sign_in_provider": "password"
        }
    })
}

pub fn sign_with(claims: &Value, kid: Option<&str>, pem: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_owned);

    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

pub fn sign(claims: &Value) -> String {
    sign_with(claims, Some(KEY_ID), SIGNING_KEY)
}

pub fn id_token(uid: &str) -> String {
    sign(&claims(uid))
}

/// An ID token that expired well outside the verifier's leeway.
pub fn expired_id_token(uid: &str) -> String {
    let mut claims = claims(uid);
    let past = Utc::now().timestamp() - 7200;
    claims["iat"] = json!(past);
    claims["auth_time"] = json!(past);
    claims["exp"] = json!(past + 3600);
    sign(&claims)
}

pub fn pinned_verifier() -> Verifier {
    let keys = KeyStore::pinned()
        .with_rsa_pem(KEY_ID, PUBLIC_KEY.as_bytes())
        .unwrap();
    Verifier::new(PROJECT_ID, keys)
}

/// Run the backend on an ephemeral port and return its address.
pub async fn spawn_backend(verifier: Verifier) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let router = api::create_router(Arc::new(verifier));

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    address
}
