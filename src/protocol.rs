//! Chat line protocol parser and response generator.
//!
//! Implements parsing for the four client verbs:
//! - Authentication: login, newuser
//! - Messaging: send
//! - Session: logout
//!
//! Messages carry no terminator of their own. One read delivers one request
//! and one write delivers one response.

use bytes::Bytes;
use thiserror::Error;

/// Response payload for an accepted login or registration.
pub const ACCEPTED: &str = "1";

/// Response payload for any denial or rejection.
pub const DENIED: &str = "0";

/// Parsed client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Authenticate as an existing user
    Login { username: String, password: String },

    /// Register a new user
    NewUser { username: String, password: String },

    /// Relay a message back to the sender, tagged with its username
    Send { text: String },

    /// End the session and close the connection
    Logout,
}

/// Protocol parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Nothing but whitespace was received
    #[error("empty command")]
    Empty,
    /// Verb is not one of login, newuser, send, logout
    #[error("unknown command: {0}")]
    UnknownVerb(String),
    /// Verb was recognized but carried the wrong number of arguments
    #[error("{verb} expects {expected} argument(s), got {found}")]
    WrongArity {
        verb: &'static str,
        expected: usize,
        found: usize,
    },
    /// `send` without any message text
    #[error("send requires a message")]
    MissingMessage,
}

impl Command {
    /// Parse one request line.
    ///
    /// The line is split on whitespace. For `send`, everything after the verb
    /// is rejoined with single spaces to form the message text.
    pub fn parse(line: &str) -> Result<Command, ParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, args)) = tokens.split_first() else {
            return Err(ParseError::Empty);
        };

        match verb {
            "login" => {
                let (username, password) = credentials("login", args)?;
                Ok(Command::Login { username, password })
            }
            "newuser" => {
                let (username, password) = credentials("newuser", args)?;
                Ok(Command::NewUser { username, password })
            }
            "send" => {
                if args.is_empty() {
                    return Err(ParseError::MissingMessage);
                }
                Ok(Command::Send {
                    text: args.join(" "),
                })
            }
            "logout" => {
                if !args.is_empty() {
                    return Err(ParseError::WrongArity {
                        verb: "logout",
                        expected: 0,
                        found: args.len(),
                    });
                }
                Ok(Command::Logout)
            }
            other => Err(ParseError::UnknownVerb(other.to_string())),
        }
    }

    /// Verb name, for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Login { .. } => "login",
            Command::NewUser { .. } => "newuser",
            Command::Send { .. } => "send",
            Command::Logout => "logout",
        }
    }
}

fn credentials(verb: &'static str, args: &[&str]) -> Result<(String, String), ParseError> {
    match args {
        [username, password] => Ok((username.to_string(), password.to_string())),
        _ => Err(ParseError::WrongArity {
            verb,
            expected: 2,
            found: args.len(),
        }),
    }
}

/// A single server response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Login or registration succeeded
    Accepted,
    /// Login or registration failed, or the request was rejected
    Denied,
    /// A relayed message
    Relay { user: String, text: String },
}

impl Response {
    /// Map a boolean decision onto `Accepted`/`Denied`.
    pub fn decision(accepted: bool) -> Self {
        if accepted {
            Response::Accepted
        } else {
            Response::Denied
        }
    }

    /// Encode the response as it goes on the wire.
    pub fn encode(&self) -> Bytes {
        match self {
            Response::Accepted => Bytes::from_static(ACCEPTED.as_bytes()),
            Response::Denied => Bytes::from_static(DENIED.as_bytes()),
            Response::Relay { user, text } => Bytes::from(format!("{user}: {text}")),
        }
    }
}
