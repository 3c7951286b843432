use rustyline::{history::MemHistory, Editor};
use snafu::{ResultExt, Snafu};

use crate::dashboard::Dashboard;
use crate::session::SessionState;

mod parse;

pub use parse::ParseError;

const HELP: &str = "\
commands:
  signup <email> <password>   create an account and sign in
  signin <email> <password>   sign in with an existing account
  signout                     end the session
  click                       add one to your click count
  count                       show your click count
  echo                        call the protected backend endpoint
  whoami                      show the current session
  exit                        leave";

pub struct Repl {
    inner: Editor<(), MemHistory>,
    message: Option<String>,
}

impl Repl {
    pub fn new() -> Result<Self, ReplError> {
        let config = rustyline::Config::default();
        let inner =
            rustyline::Editor::with_history(config, MemHistory::new()).context(RustylineSnafu)?;

        let repl = Self {
            inner,
            message: None,
        };
        Ok(repl)
    }

    pub async fn prompt(&mut self) -> Action {
        let message = self
            .message
            .take()
            .map(|msg| format!("  {}\n", msg.replace('\n', "\n  ")))
            .unwrap_or_default();
        let prompt = format!("{}clicker> ", message);

        let Ok(input) = tokio::task::block_in_place(|| self.inner.readline(&prompt)) else {
            return Action::Exit;
        };

        let input = input.trim();
        if input.is_empty() {
            return Action::None;
        }

        // passwords stay out of the history
        if !input.starts_with("signup") && !input.starts_with("signin") {
            self.inner.add_history_entry(input).ok();
        }

        match parse::parse(input) {
            Ok(action) => action,
            Err(err) => {
                self.reply(err.to_string());
                Action::None
            }
        }
    }

    pub fn reply(&mut self, message: impl Into<String>) {
        let message = message.into();
        if let Some(msg) = self.message.as_mut() {
            msg.push('\n');
            msg.push_str(&message);
        } else {
            self.message = Some(message);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Action {
    SignUp { email: String, password: String },
    SignIn { email: String, password: String },
    SignOut,
    Click,
    Count,
    Echo,
    WhoAmI,
    Help,
    Exit,
    None,
}

#[derive(Debug, Snafu)]
pub enum ReplError {
    #[snafu(display("failed to initialize REPL: {}", source))]
    Rustyline {
        source: rustyline::error::ReadlineError,
    },
}

pub async fn start(repl: &mut Repl, dashboard: &mut Dashboard) -> Result<(), ReplError> {
    tracing::info!("starting REPL");

    dashboard.sync().await;
    repl.reply(describe(&dashboard.session()));
    repl.reply("type `help` for the list of commands");

    loop {
        let action = repl.prompt().await;
        dashboard.sync().await;

        match action {
            Action::Exit => break,
            Action::None => continue,
            Action::Help => repl.reply(HELP),
            Action::SignUp { email, password } => {
                match dashboard.sign_up(&email, &password).await {
                    Ok(user) => repl.reply(format!("signed up as {}", user.uid)),
                    Err(err) => {
                        tracing::error!("sign up error: {err}");
                        repl.reply(err.to_string());
                    }
                }
            }
            Action::SignIn { email, password } => {
                match dashboard.sign_in(&email, &password).await {
                    Ok(user) => repl.reply(format!("signed in as {}", user.uid)),
                    Err(err) => {
                        tracing::error!("sign in error: {err}");
                        repl.reply(err.to_string());
                    }
                }
            }
            Action::SignOut => {
                dashboard.sign_out().await;
                repl.reply("signed out");
                repl.reply(describe(&dashboard.session()));
            }
            Action::Click => match dashboard.click().await {
                Ok(count) => repl.reply(format!("clicks: {count}")),
                Err(err) => repl.reply(err.to_string()),
            },
            Action::Count => {
                repl.reply(format!("clicks: {}", dashboard.count()));
                if let Some(err) = dashboard.store_error() {
                    repl.reply(err);
                }
            }
            Action::Echo => match dashboard.call_backend().await {
                Ok(response) => {
                    let body = serde_json::to_string_pretty(response)
                        .unwrap_or_else(|err| format!("cannot render the response: {err}"));
                    repl.reply(body);
                }
                Err(err) => repl.reply(err.to_string()),
            },
            Action::WhoAmI => repl.reply(describe(&dashboard.session())),
        }
    }

    Ok(())
}

fn describe(state: &SessionState) -> String {
    match state {
        SessionState::NoSession => "not signed in".to_string(),
        SessionState::TokenPending => "signing in...".to_string(),
        SessionState::Anonymous(user) => format!(
            "signed in anonymously as {}, sign up or sign in to track your clicks",
            user.uid
        ),
        SessionState::Authenticated(user) => format!(
            "signed in as {} ({})",
            user.email.as_deref().unwrap_or("no email"),
            user.uid
        ),
    }
}
