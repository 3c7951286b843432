//! The backend: one public banner route and one route that only answers requests carrying a
//! valid ID token.

pub mod client;
mod error;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::error::{ApplicationError, BindAddressSnafu, WebServerSnafu};
use crate::identity::{Claims, Verifier};
use crate::prelude::*;

pub use client::{BackendClient, BackendError};
pub use error::{ApiError, ErrorResponse};

use error::MissingTokenSnafu;

pub const BANNER: &str =
    "Hello from the clicker backend! Access /echo-user-info with a valid token.";

pub const ECHO_MESSAGE: &str = "Successfully accessed protected endpoint!";

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// The verified claims, with the subject repeated as `uid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedToken {
    pub uid: String,
    #[serde(flatten)]
    pub claims: Claims,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoResponse {
    pub message: String,
    pub user_info: UserInfo,
    pub decoded_token: DecodedToken,
}

impl From<Claims> for EchoResponse {
    fn from(claims: Claims) -> Self {
        let user_info = UserInfo {
            uid: claims.uid().to_owned(),
            email: claims.email.clone(),
            name: claims.name.clone(),
            picture: claims.picture.clone(),
        };

        Self {
            message: ECHO_MESSAGE.to_owned(),
            user_info,
            decoded_token: DecodedToken {
                uid: claims.uid().to_owned(),
                claims,
            },
        }
    }
}

pub fn create_router(verifier: Arc<Verifier>) -> Router {
    let protected = Router::new()
        .route("/echo-user-info", get(echo_user_info))
        .route_layer(middleware::from_fn_with_state(verifier, authenticate));

    Router::new()
        .route("/", get(banner))
        .merge(protected)
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
}

/// The token of an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();

    (!token.is_empty()).then_some(token)
}

/// Verify the bearer token and attach its [Claims] to the request.
async fn authenticate(
    State(verifier): State<Arc<Verifier>>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = bearer_token(request.headers())
        .map(str::to_owned)
        .context(MissingTokenSnafu)?;

    let claims = verifier.verify(&token).await.map_err(|err| {
        tracing::warn!("rejected ID token: {err}");
        ApiError::from(err)
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

async fn banner() -> &'static str {
    BANNER
}

#[instrument(skip_all, fields(uid = %claims.sub))]
async fn echo_user_info(Extension(claims): Extension<Claims>) -> Json<EchoResponse> {
    tracing::info!("echoing user info");
    Json(EchoResponse::from(claims))
}

/// Serve the backend on every interface at `port` until ctrl-c.
pub async fn serve(port: u16, verifier: Arc<Verifier>) -> Result<(), ApplicationError> {
    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .context(BindAddressSnafu { address })?;

    tracing::info!("backend server listening on port {port}");
    tracing::info!("local url: http://localhost:{port}");
    tracing::info!("protected endpoint: http://localhost:{port}/echo-user-info");

    axum::serve(listener, create_router(verifier))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context(WebServerSnafu)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }

    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(authorization).unwrap(),
        );
        headers
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Some("abc.def.ghi"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("bearer abc")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
