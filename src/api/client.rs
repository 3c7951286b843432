use tracing::instrument;
use url::Url;

use super::{EchoResponse, ErrorResponse};
use crate::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("{source}"))]
    Request { source: reqwest::Error },

    #[snafu(display("{message}"))]
    Rejected { status: u16, message: String },
}

/// Calls the backend on behalf of the signed-in user.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: Url,
}

impl BackendClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    #[instrument(skip(self, id_token), fields(base_url = %self.base_url))]
    pub async fn echo_user_info(&self, id_token: &str) -> Result<EchoResponse, BackendError> {
        let url = format!(
            "{}/echo-user-info",
            self.base_url.as_str().trim_end_matches('/')
        );

        let response = self
            .client
            .get(url)
            .bearer_auth(id_token)
            .send()
            .await
            .context(RequestSnafu)?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error,
                Err(_) => format!("HTTP error! status: {}", status.as_u16()),
            };

            return RejectedSnafu {
                status: status.as_u16(),
                message,
            }
            .fail();
        }

        response.json().await.context(RequestSnafu)
    }
}
