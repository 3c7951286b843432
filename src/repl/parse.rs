use super::*;
use chumsky::{error::SimpleReason, prelude::*, text::whitespace};
use itertools::Itertools;

#[derive(Debug, Snafu)]
#[snafu(display("cannot parse '{input}' - {}", self.combine_errors("\n")))]
pub struct ParseError {
    input: String,
    errors: Vec<Simple<char>>,
}

impl ParseError {
    fn combine_errors(&self, separator: &str) -> String {
        self.errors
            .iter()
            .map(|err| {
                format!(
                    "{}:\n   {}",
                    err,
                    match err.reason() {
                        SimpleReason::Custom(msg) => format!("error {}", msg),
                        SimpleReason::Unexpected => "unexpected input".to_string(),
                        SimpleReason::Unclosed { span, delimiter } => {
                            format!(
                                "unclosed delimiter ({}..{}) in {}",
                                span.start, span.end, delimiter
                            )
                        }
                    }
                )
            })
            .join(separator)
    }
}

pub fn parse(input: &str) -> Result<Action, ParseError> {
    let action = program().parse(input).map_err(|errors| ParseError {
        input: input.to_string(),
        errors,
    })?;

    Ok(action)
}

fn program() -> impl Parser<char, Action, Error = Simple<char>> {
    choice((
        action_sign_up(),
        action_sign_in(),
        action_sign_out(),
        action_click(),
        action_count(),
        action_echo(),
        action_who_am_i(),
        action_help(),
        action_exit(),
    ))
    .padded()
    .then_ignore(end())
}

fn action_sign_up() -> impl Parser<char, Action, Error = Simple<char>> {
    text::keyword("signup")
        .ignore_then(credentials())
        .map(|(email, password)| Action::SignUp { email, password })
}

fn action_sign_in() -> impl Parser<char, Action, Error = Simple<char>> {
    text::keyword("signin")
        .ignore_then(credentials())
        .map(|(email, password)| Action::SignIn { email, password })
}

fn action_sign_out() -> impl Parser<char, Action, Error = Simple<char>> {
    text::keyword("signout").to(Action::SignOut)
}

fn action_click() -> impl Parser<char, Action, Error = Simple<char>> {
    text::keyword("click").to(Action::Click)
}

fn action_count() -> impl Parser<char, Action, Error = Simple<char>> {
    text::keyword("count").to(Action::Count)
}

fn action_echo() -> impl Parser<char, Action, Error = Simple<char>> {
    text::keyword("echo").to(Action::Echo)
}

fn action_who_am_i() -> impl Parser<char, Action, Error = Simple<char>> {
    text::keyword("whoami").to(Action::WhoAmI)
}

fn action_help() -> impl Parser<char, Action, Error = Simple<char>> {
    text::keyword("help").to(Action::Help)
}

fn action_exit() -> impl Parser<char, Action, Error = Simple<char>> {
    text::keyword("exit")
        .or(text::keyword("quit"))
        .to(Action::Exit)
}

fn credentials() -> impl Parser<char, (String, String), Error = Simple<char>> {
    whitespace()
        .at_least(1)
        .ignore_then(email())
        .then_ignore(whitespace().at_least(1))
        .then(word().labelled("password"))
}

fn email() -> impl Parser<char, String, Error = Simple<char>> {
    word().labelled("email").try_map(|email, span| {
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
            _ => Err(Simple::custom(span, format!("invalid email `{email}`"))),
        }
    })
}

fn word() -> impl Parser<char, String, Error = Simple<char>> {
    filter(|c: &char| !c.is_whitespace())
        .repeated()
        .at_least(1)
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_commands() {
        assert_eq!(parse("click").unwrap(), Action::Click);
        assert_eq!(parse("  count  ").unwrap(), Action::Count);
        assert_eq!(parse("echo").unwrap(), Action::Echo);
        assert_eq!(parse("whoami").unwrap(), Action::WhoAmI);
        assert_eq!(parse("signout").unwrap(), Action::SignOut);
        assert_eq!(parse("help").unwrap(), Action::Help);
        assert_eq!(parse("exit").unwrap(), Action::Exit);
        assert_eq!(parse("quit").unwrap(), Action::Exit);
    }

    #[test]
    fn parse_credentials() {
        assert_eq!(
            parse("signup ada@example.com hunter22").unwrap(),
            Action::SignUp {
                email: "ada@example.com".into(),
                password: "hunter22".into()
            }
        );
        assert_eq!(
            parse("signin  ada@example.com   p@ss:word").unwrap(),
            Action::SignIn {
                email: "ada@example.com".into(),
                password: "p@ss:word".into()
            }
        );
    }

    #[test]
    fn reject_malformed_input() {
        assert!(parse("signin ada@example.com").is_err());
        assert!(parse("signup not-an-email secret").is_err());
        assert!(parse("clicks").is_err());
        assert!(parse("click twice").is_err());
    }

    #[test]
    fn error_mentions_input() {
        let err = parse("dance").unwrap_err();
        assert!(err.to_string().starts_with("cannot parse 'dance'"));
    }
}
