//! Per-connection session state machine.
//!
//! Each accepted connection owns one [`Session`]. The session answers every
//! request with exactly one response, except `logout` and terminal
//! conditions, which close the connection without a reply.
//!
//! ```text
//! Unauthenticated --login ok--> Authenticated{user} --logout--> Terminated
//!        |                              |
//!        +------- empty / EOF / I/O error -------------------> Terminated
//! ```

use crate::auth::AuthService;
use crate::protocol::{Command, ParseError, Response};
use crate::transport::{read_message, write_message};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, trace, warn, Span};

/// Authentication state of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Initial state: only `login` and `newuser` are allowed.
    #[default]
    Unauthenticated,
    /// Logged in as `user`: only `send` and `logout` are allowed.
    Authenticated { user: String },
    /// Final state: the connection is closed.
    Terminated,
}

/// A command that is not legal in the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("already logged in as {0}")]
    AlreadyAuthenticated(String),
    #[error("not logged in")]
    NotAuthenticated,
    #[error("session is closed")]
    Terminated,
    #[error("malformed command: {0}")]
    Malformed(#[from] ParseError),
}

/// What the connection loop does after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Write this response and wait for the next request
    Reply(Response),
    /// Close the connection without replying
    Close,
}

/// Server-side state for one connection
#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Username of the authenticated user, if any
    pub fn active_user(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticated { user } => Some(user),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Apply one parsed command.
    ///
    /// Illegal transitions leave the state untouched and come back as a
    /// [`Rejection`] without touching the credential table.
    pub fn handle(&mut self, command: Command, auth: &AuthService) -> Result<Outcome, Rejection> {
        match (&self.state, command) {
            (SessionState::Terminated, _) => Err(Rejection::Terminated),

            (SessionState::Unauthenticated, Command::Login { username, password }) => {
                let accepted = auth.check_login(&username, &password);
                if accepted {
                    info!(user = %username, "User logged in");
                    self.state = SessionState::Authenticated { user: username };
                } else {
                    info!(user = %username, "Login denied");
                }
                Ok(Outcome::Reply(Response::decision(accepted)))
            }

            (SessionState::Unauthenticated, Command::NewUser { username, password }) => {
                let created = auth.register(&username, &password);
                Ok(Outcome::Reply(Response::decision(created)))
            }

            (SessionState::Unauthenticated, Command::Send { .. } | Command::Logout) => {
                Err(Rejection::NotAuthenticated)
            }

            (
                SessionState::Authenticated { user },
                Command::Login { .. } | Command::NewUser { .. },
            ) => Err(Rejection::AlreadyAuthenticated(user.clone())),

            (SessionState::Authenticated { user }, Command::Send { text }) => {
                info!("{user}: {text}");
                Ok(Outcome::Reply(Response::Relay {
                    user: user.clone(),
                    text,
                }))
            }

            (SessionState::Authenticated { user }, Command::Logout) => {
                info!(user = %user, "User logged out");
                self.state = SessionState::Terminated;
                Ok(Outcome::Close)
            }
        }
    }

    /// Parse and apply one raw request.
    ///
    /// Rejections are answered with [`Response::Denied`]. An empty request
    /// terminates the session.
    pub fn handle_line(&mut self, line: &str, auth: &AuthService) -> Outcome {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(ParseError::Empty) => {
                debug!("Empty request, closing session");
                self.state = SessionState::Terminated;
                return Outcome::Close;
            }
            Err(e) => return self.reject(Rejection::Malformed(e)),
        };

        trace!(verb = command.verb(), "Processing command");
        match self.handle(command, auth) {
            Ok(outcome) => outcome,
            Err(rejection) => self.reject(rejection),
        }
    }

    fn reject(&mut self, rejection: Rejection) -> Outcome {
        warn!(reason = %rejection, "Command rejected");
        match rejection {
            Rejection::Terminated => Outcome::Close,
            _ => Outcome::Reply(Response::Denied),
        }
    }
}

/// Drive one connection until logout, EOF, an empty request or an I/O error.
///
/// Each iteration is one bounded read followed by at most one write.
/// Requests are applied on the blocking pool, since logins and
/// registrations read and append to the credential table file.
pub async fn run<S>(
    mut stream: S,
    auth: Arc<AuthService>,
    max_message_size: usize,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session::new();

    while !session.is_terminated() {
        let line = match read_message(&mut stream, max_message_size).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Connection closed by client");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Read failed, ending session");
                return Err(e);
            }
        };

        let (returned, outcome) = handle_blocking(session, line, &auth).await?;
        session = returned;

        match outcome {
            Outcome::Reply(response) => write_message(&mut stream, &response.encode()).await?,
            Outcome::Close => break,
        }
    }

    Ok(())
}

/// Run [`Session::handle_line`] on the blocking pool and hand the session back.
async fn handle_blocking(
    mut session: Session,
    line: String,
    auth: &Arc<AuthService>,
) -> io::Result<(Session, Outcome)> {
    let auth = Arc::clone(auth);
    let span = Span::current();

    tokio::task::spawn_blocking(move || {
        let _guard = span.enter();
        let outcome = session.handle_line(&line, &auth);
        (session, outcome)
    })
    .await
    .map_err(io::Error::other)
}
