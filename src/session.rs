use std::time::Duration;

use secrecy::{ExposeSecret as _, SecretString};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::instrument;

use crate::identity::{Grant, IdentityError, Tokens, Toolkit};
use crate::prelude::*;

/// ID tokens expiring sooner than this are refreshed before being handed out.
const REFRESH_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: String,
    pub email: Option<String>,
    pub anonymous: bool,
    tokens: Tokens,
    expires_at: Instant,
}

impl User {
    fn from_grant(grant: Grant) -> Self {
        Self {
            uid: grant.uid,
            email: grant.email,
            anonymous: grant.anonymous,
            expires_at: Instant::now() + grant.tokens.expires_in,
            tokens: grant.tokens,
        }
    }

    fn renewed(&self, tokens: Tokens) -> Self {
        Self {
            uid: self.uid.clone(),
            email: self.email.clone(),
            anonymous: self.anonymous,
            expires_at: Instant::now() + tokens.expires_in,
            tokens,
        }
    }

    pub fn id_token(&self) -> &str {
        &self.tokens.id_token
    }

    fn expires_within(&self, window: Duration) -> bool {
        self.expires_at <= Instant::now() + window
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    NoSession,
    /// Waiting for the identity provider to accept the bootstrap token.
    TokenPending,
    Anonymous(User),
    Authenticated(User),
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Anonymous(user) | SessionState::Authenticated(user) => Some(user),
            SessionState::NoSession | SessionState::TokenPending => None,
        }
    }

    /// The signed-in user, unless they are anonymous.
    pub fn authenticated(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("sign up failed: {source}"))]
    SignUp { source: IdentityError },

    #[snafu(display("sign in failed: {source}"))]
    SignIn { source: IdentityError },

    #[snafu(display("anonymous sign in failed: {source}"))]
    Anonymous { source: IdentityError },

    #[snafu(display("sign in with the bootstrap token failed: {source}"))]
    Bootstrap { source: IdentityError },

    #[snafu(display("cannot refresh the ID token: {source}"))]
    Refresh { source: IdentityError },

    #[snafu(display("no user is signed in"))]
    NotSignedIn,
}

/// The client's authentication session.
///
/// State changes are published on a [watch] channel so that views can react to sign-in and
/// sign-out, see [Session::subscribe].
#[derive(Debug)]
pub struct Session {
    toolkit: Toolkit,
    backoff: Backoff,
    bootstrap_token: Option<SecretString>,
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(toolkit: Toolkit, backoff: Backoff, bootstrap_token: Option<SecretString>) -> Self {
        let (state, _) = watch::channel(SessionState::NoSession);

        Self {
            toolkit,
            backoff,
            bootstrap_token,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn publish(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn establish(&self, grant: Grant) -> User {
        let user = User::from_grant(grant);
        tracing::info!(uid = %user.uid, anonymous = user.anonymous, "signed in");

        let state = if user.anonymous {
            SessionState::Anonymous(user.clone())
        } else {
            SessionState::Authenticated(user.clone())
        };
        self.publish(state);

        user
    }

    /// Establish the initial session when there is none.
    ///
    /// With a bootstrap token the session signs in with it, falling back to an anonymous session
    /// when the provider rejects the token as restricted to administrators. Without one it signs
    /// in anonymously.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), SessionError> {
        if self.state() != SessionState::NoSession {
            return Ok(());
        }

        let Some(token) = &self.bootstrap_token else {
            return self.start_anonymously().await;
        };

        self.publish(SessionState::TokenPending);

        let result = self
            .backoff
            .run(|| self.toolkit.sign_in_with_custom_token(token.expose_secret()))
            .await;

        match result {
            Ok(grant) => {
                self.establish(grant);
                Ok(())
            }
            Err(IdentityError::AdminRestricted) => {
                tracing::warn!("bootstrap token rejected, falling back to anonymous sign-in");
                self.start_anonymously().await
            }
            Err(source) => {
                tracing::error!("authentication error with the bootstrap token: {source}");
                self.publish(SessionState::NoSession);
                Err(SessionError::Bootstrap { source })
            }
        }
    }

    async fn start_anonymously(&self) -> Result<(), SessionError> {
        match self.sign_in_anonymously().await {
            Ok(_) => Ok(()),
            Err(err) => {
                self.publish(SessionState::NoSession);
                Err(err)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn sign_in_anonymously(&self) -> Result<User, SessionError> {
        let grant = self
            .backoff
            .run(|| self.toolkit.sign_in_anonymously())
            .await
            .context(AnonymousSnafu)?;

        Ok(self.establish(grant))
    }

    #[instrument(skip(self, password))]
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<User, SessionError> {
        let grant = self
            .backoff
            .run(|| self.toolkit.sign_up(email, password))
            .await
            .context(SignUpSnafu)?;

        Ok(self.establish(grant))
    }

    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, SessionError> {
        let grant = self
            .backoff
            .run(|| self.toolkit.sign_in_with_password(email, password))
            .await
            .context(SignInSnafu)?;

        Ok(self.establish(grant))
    }

    /// Forget the local session. Nothing is sent to the identity provider.
    pub fn sign_out(&self) {
        if let Some(user) = self.state().user() {
            tracing::info!(uid = %user.uid, "signed out");
        }
        self.publish(SessionState::NoSession);
    }

    /// The current user's ID token, refreshed first when it is about to expire.
    #[instrument(skip(self))]
    pub async fn id_token(&self) -> Result<String, SessionError> {
        let state = self.state();
        let user = state.user().context(NotSignedInSnafu)?;

        if !user.expires_within(REFRESH_WINDOW) {
            return Ok(user.id_token().to_owned());
        }

        let tokens = self
            .backoff
            .run(|| self.toolkit.refresh(&user.tokens.refresh_token))
            .await
            .context(RefreshSnafu)?;

        let renewed = user.renewed(tokens);
        let id_token = renewed.id_token().to_owned();

        // the user may have signed out while the refresh was in flight
        self.state.send_if_modified(|state| match state {
            SessionState::Anonymous(current) | SessionState::Authenticated(current)
                if current.uid == renewed.uid =>
            {
                *current = renewed;
                true
            }
            _ => false,
        });

        Ok(id_token)
    }
}
