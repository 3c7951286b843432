//! Terminal counterpart of the click counter page: the click count of the signed-in user, the
//! last store error and the last backend response.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::api::{BackendError, EchoResponse};
use crate::context::AppContext;
use crate::counter::{Cancel, CounterError, Updates};
use crate::prelude::*;
use crate::session::{SessionError, SessionState, User};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DashboardError {
    #[snafu(display("Please sign in with an email/password account to track your clicks."))]
    ClickRequiresAccount,

    #[snafu(display("Please sign in to call the protected backend endpoint."))]
    BackendRequiresAccount,

    #[snafu(display("Failed to update click count: {source}"))]
    UpdateCount { source: CounterError },

    #[snafu(display("Backend call failed: {source}"))]
    Token { source: SessionError },

    #[snafu(display("Backend call failed: {source}"))]
    Backend { source: BackendError },
}

/// An open counter subscription for one user.
#[derive(Debug)]
struct Feed {
    uid: String,
    cancel: Cancel,
    task: JoinHandle<()>,
}

impl Feed {
    async fn close(self) {
        self.cancel.shutdown().await;
        let _ = self.task.await;
    }
}

#[derive(Debug)]
pub struct Dashboard {
    context: AppContext,
    count: Arc<watch::Sender<u64>>,
    store_error: Arc<watch::Sender<Option<String>>>,
    backend_response: Option<EchoResponse>,
    backend_error: Option<String>,
    feed: Option<Feed>,
}

impl Dashboard {
    pub fn new(context: AppContext) -> Self {
        let (count, _) = watch::channel(0);
        let (store_error, _) = watch::channel(None);

        Self {
            context,
            count: Arc::new(count),
            store_error: Arc::new(store_error),
            backend_response: None,
            backend_error: None,
            feed: None,
        }
    }

    pub fn count(&self) -> u64 {
        *self.count.borrow()
    }

    /// Observe the click count as the subscription delivers it.
    pub fn watch_count(&self) -> watch::Receiver<u64> {
        self.count.subscribe()
    }

    pub fn store_error(&self) -> Option<String> {
        self.store_error.borrow().clone()
    }

    pub fn backend_response(&self) -> Option<&EchoResponse> {
        self.backend_response.as_ref()
    }

    pub fn backend_error(&self) -> Option<&str> {
        self.backend_error.as_deref()
    }

    pub fn session(&self) -> SessionState {
        self.context.session.state()
    }

    /// Bring the counter subscription in line with the current session.
    pub async fn sync(&mut self) {
        let state = self.context.session.state();
        self.on_session(&state).await;
    }

    /// Follow a session change: an account gets its counter subscribed, anything else resets the
    /// count.
    #[instrument(skip_all)]
    pub async fn on_session(&mut self, state: &SessionState) {
        let Some(user) = state.authenticated() else {
            self.close_feed().await;
            self.count.send_replace(0);
            self.store_error.send_replace(None);
            return;
        };

        if self.feed.as_ref().is_some_and(|feed| feed.uid == user.uid) {
            return;
        }

        self.close_feed().await;

        match self.context.counter.subscribe(&user.uid).await {
            Ok((updates, cancel)) => {
                let task = tokio::spawn(track(
                    updates,
                    self.count.clone(),
                    self.store_error.clone(),
                ));

                self.feed = Some(Feed {
                    uid: user.uid.clone(),
                    cancel,
                    task,
                });
            }
            Err(err) => {
                tracing::error!(uid = %user.uid, "cannot subscribe to the click count: {err}");
                self.store_error
                    .send_replace(Some(format!("Failed to load click count: {err}")));
            }
        }
    }

    async fn close_feed(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.close().await;
        }
    }

    /// Add one click for the signed-in account. The displayed count follows through the
    /// subscription.
    #[instrument(skip(self))]
    pub async fn click(&mut self) -> Result<u64, DashboardError> {
        self.store_error.send_replace(None);

        let result = self.try_click().await;
        if let Err(err) = &result {
            tracing::error!("error updating click count: {err}");
            self.store_error.send_replace(Some(err.to_string()));
        }

        result
    }

    async fn try_click(&self) -> Result<u64, DashboardError> {
        let state = self.context.session.state();
        let user = state.authenticated().context(ClickRequiresAccountSnafu)?;

        self.context
            .counter
            .increment(&user.uid)
            .await
            .context(UpdateCountSnafu)
    }

    /// Call the protected backend endpoint with a fresh ID token.
    #[instrument(skip(self))]
    pub async fn call_backend(&mut self) -> Result<&EchoResponse, DashboardError> {
        self.backend_response = None;
        self.backend_error = None;

        match self.try_call_backend().await {
            Ok(response) => Ok(self.backend_response.insert(response)),
            Err(err) => {
                tracing::error!("error calling backend: {err}");
                self.backend_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn try_call_backend(&self) -> Result<EchoResponse, DashboardError> {
        ensure!(
            self.context.session.state().authenticated().is_some(),
            BackendRequiresAccountSnafu
        );

        let id_token = self.context.session.id_token().await.context(TokenSnafu)?;

        self.context
            .backend
            .echo_user_info(&id_token)
            .await
            .context(BackendSnafu)
    }

    pub async fn sign_up(&mut self, email: &str, password: &str) -> Result<User, SessionError> {
        let result = self.context.session.sign_up(email, password).await;
        self.sync().await;
        result
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<User, SessionError> {
        let result = self.context.session.sign_in(email, password).await;
        self.sync().await;
        result
    }

    /// Clear every message and end the session. A fresh session is established right away,
    /// anonymous unless a bootstrap token is configured.
    pub async fn sign_out(&mut self) {
        self.store_error.send_replace(None);
        self.backend_response = None;
        self.backend_error = None;

        self.context.session.sign_out();
        if let Err(err) = self.context.session.start().await {
            tracing::error!("cannot establish a session after sign out: {err}");
        }

        self.sync().await;
    }

    /// Release the counter subscription.
    pub async fn shutdown(mut self) {
        self.close_feed().await;
    }
}

/// Copy subscription updates into the dashboard's channels until the subscription ends.
async fn track(
    mut updates: Updates,
    count: Arc<watch::Sender<u64>>,
    store_error: Arc<watch::Sender<Option<String>>>,
) {
    while let Some(update) = updates.next().await {
        match update {
            Ok(value) => {
                count.send_replace(value);
            }
            Err(err) => {
                store_error.send_replace(Some(format!("Failed to load click count: {err}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use snafu::IntoError;
    use tokio::sync::mpsc;
    use url::Url;

    use super::*;
    use crate::config::ClientConfig;
    use crate::counter::{CounterRecord, DocumentPath, MalformedSnafu};
    use crate::database::Database;
    use crate::identity::IdentityConfig;

    async fn dashboard() -> Dashboard {
        let config = envy::prefixed(ClientConfig::PREFIX)
            .from_iter::<_, ClientConfig>(Vec::<(String, String)>::new())
            .unwrap();
        // nothing listens here, every remote call fails fast
        let unreachable = Url::parse("http://127.0.0.1:9").unwrap();
        let config = ClientConfig {
            backend_url: unreachable.clone(),
            identity: IdentityConfig {
                identity_url: unreachable.clone(),
                secure_token_url: unreachable,
                ..config.identity
            },
            ..config
        };

        let database = Database::memory().await.unwrap();
        let context =
            AppContext::with_database(config, database, Backoff::new(1, Duration::from_millis(1)));

        Dashboard::new(context)
    }

    #[tokio::test]
    async fn click_without_account_is_refused() {
        let mut dashboard = dashboard().await;

        let err = dashboard.click().await.unwrap_err();

        assert!(matches!(err, DashboardError::ClickRequiresAccount));
        assert_eq!(
            dashboard.store_error().as_deref(),
            Some("Please sign in with an email/password account to track your clicks.")
        );
        assert_eq!(dashboard.count(), 0);
    }

    #[tokio::test]
    async fn backend_without_account_is_refused() {
        let mut dashboard = dashboard().await;

        let err = dashboard.call_backend().await.unwrap_err();

        assert!(matches!(err, DashboardError::BackendRequiresAccount));
        assert_eq!(
            dashboard.backend_error(),
            Some("Please sign in to call the protected backend endpoint.")
        );
        assert!(dashboard.backend_response().is_none());
    }

    #[tokio::test]
    async fn sign_out_clears_messages() {
        let mut dashboard = dashboard().await;
        let _ = dashboard.click().await;
        let _ = dashboard.call_backend().await;

        dashboard.sign_out().await;

        assert_eq!(dashboard.store_error(), None);
        assert_eq!(dashboard.backend_error(), None);
        // the identity provider is unreachable, so no new session comes up
        assert_eq!(dashboard.session(), SessionState::NoSession);
    }

    #[tokio::test]
    async fn subscription_errors_are_shown_and_listening_continues() {
        let (tx, rx) = mpsc::channel(4);
        let (count, _) = watch::channel(0);
        let (store_error, _) = watch::channel(None);
        let count = Arc::new(count);
        let store_error = Arc::new(store_error);

        let path = DocumentPath::new("test-app".into(), "alice".into());
        let malformed = MalformedSnafu { path }
            .into_error(serde_json::from_str::<CounterRecord>("\"nope\"").unwrap_err());

        tx.send(Ok(3)).await.unwrap();
        tx.send(Err(malformed)).await.unwrap();
        tx.send(Ok(4)).await.unwrap();
        drop(tx);

        track(Updates::new(rx), count.clone(), store_error.clone()).await;

        assert_eq!(*count.borrow(), 4);
        let error = store_error.borrow().clone().unwrap();
        assert!(
            error.starts_with("Failed to load click count: live update is malformed"),
            "unexpected message: {error}"
        );
    }
}
