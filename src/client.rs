//! Interactive chat client.
//!
//! Commands typed at the prompt are checked locally first so obviously
//! invalid requests never reach the server. Requests that pass are sent as
//! typed, and the client waits for the single response before prompting
//! again.

use crate::cli::ClientArgs;
use crate::protocol::ACCEPTED;
use crate::store::is_storable;
use crate::transport::{read_message, write_message, DEFAULT_MAX_MESSAGE_SIZE};
use std::io;
use std::ops::RangeInclusive;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Accepted username lengths, in characters
pub const USERNAME_LEN: RangeInclusive<usize> = 3..=32;

/// Accepted password lengths, in characters
pub const PASSWORD_LEN: RangeInclusive<usize> = 4..=8;

/// Longest message accepted by `send`, in characters
pub const MAX_SEND_LEN: usize = 256;

/// Largest request line, in encoded bytes. Anything longer would be cut
/// short by the server's message bound.
pub const MAX_REQUEST_SIZE: usize = DEFAULT_MAX_MESSAGE_SIZE;

/// Read bound for responses. A relay carries the sender's name in front of
/// up to a full request's worth of text.
const REPLY_BUFFER_SIZE: usize = 2 * DEFAULT_MAX_MESSAGE_SIZE;

const BANNER: &str = "\
******************************************************************
Welcome to relaychat.

Available commands:
login <username> <password>
newuser <username> <password>
send <message>
logout

Please enter commands as shown above. You must begin with login.
******************************************************************";

/// A request that passed local validation. Each variant carries the line to
/// send, exactly as typed (minus surrounding whitespace).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    Login(&'a str),
    NewUser(&'a str),
    Send(&'a str),
    Logout,
}

/// Why a command was refused before reaching the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Invalid {
    #[error("You are already logged in.")]
    AlreadyLoggedIn,
    #[error("Denied. You cannot create a new user while logged in.")]
    NewUserWhileLoggedIn,
    #[error("You must provide a username and password.")]
    MissingCredentials,
    #[error("Your username must be between 3 and 32 characters.")]
    UsernameLength,
    #[error("Your password must be between 4 and 8 characters.")]
    PasswordLength,
    #[error("Usernames and passwords cannot contain ',', '(' or ')'.")]
    ReservedCharacter,
    #[error("Denied. Please login before sending a message.")]
    NotLoggedIn,
    #[error("You must include a message.")]
    MissingMessage,
    #[error("Your message must be 1-256 characters long.")]
    MessageTooLong,
    #[error("That command is too long to send.")]
    RequestTooLong,
    #[error("You must login before logging out.")]
    LogoutWhileLoggedOut,
    #[error("Invalid command")]
    UnknownCommand,
}

/// Check one input line against the local rules.
///
/// Returns `Ok(None)` for blank input.
pub fn validate(input: &str, logged_in: bool) -> Result<Option<Request<'_>>, Invalid> {
    let line = input.trim();
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&verb) = tokens.first() else {
        return Ok(None);
    };

    let request = match verb {
        "login" => {
            if logged_in {
                return Err(Invalid::AlreadyLoggedIn);
            }
            if tokens.len() != 3 {
                return Err(Invalid::MissingCredentials);
            }
            Request::Login(line)
        }
        "newuser" => {
            if logged_in {
                return Err(Invalid::NewUserWhileLoggedIn);
            }
            if tokens.len() != 3 {
                return Err(Invalid::MissingCredentials);
            }
            if !USERNAME_LEN.contains(&tokens[1].chars().count()) {
                return Err(Invalid::UsernameLength);
            }
            if !PASSWORD_LEN.contains(&tokens[2].chars().count()) {
                return Err(Invalid::PasswordLength);
            }
            if !is_storable(tokens[1]) || !is_storable(tokens[2]) {
                return Err(Invalid::ReservedCharacter);
            }
            Request::NewUser(line)
        }
        "send" => {
            if !logged_in {
                return Err(Invalid::NotLoggedIn);
            }
            if tokens.len() < 2 {
                return Err(Invalid::MissingMessage);
            }
            // The first word after the verb is not counted toward the limit.
            if tokens[2..].join(" ").chars().count() > MAX_SEND_LEN
                || line.len() > MAX_REQUEST_SIZE
            {
                return Err(Invalid::MessageTooLong);
            }
            Request::Send(line)
        }
        "logout" => {
            if !logged_in {
                return Err(Invalid::LogoutWhileLoggedOut);
            }
            Request::Logout
        }
        _ => return Err(Invalid::UnknownCommand),
    };

    if line.len() > MAX_REQUEST_SIZE {
        return Err(Invalid::RequestTooLong);
    }

    Ok(Some(request))
}

/// What the prompt loop does after one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing to show
    Idle,
    /// Show this line and prompt again
    Print(String),
    /// Show this line and exit
    Quit(String),
}

/// Client-side dispatcher over one server connection
pub struct Dispatcher<S> {
    stream: S,
    logged_in: bool,
    reply_limit: usize,
}

impl<S> Dispatcher<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            logged_in: false,
            reply_limit: REPLY_BUFFER_SIZE,
        }
    }

    /// Local mirror of the server's authentication state
    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Validate one input line and, if it passes, run the exchange.
    pub async fn dispatch(&mut self, input: &str) -> Step {
        let request = match validate(input, self.logged_in) {
            Ok(Some(request)) => request,
            Ok(None) => return Step::Idle,
            Err(invalid) => {
                debug!(reason = ?invalid, "Command refused locally");
                return Step::Print(invalid.to_string());
            }
        };

        match request {
            Request::Login(line) => match self.exchange(line).await {
                Ok(reply) if reply == ACCEPTED => {
                    self.logged_in = true;
                    Step::Print("You are logged in!".to_string())
                }
                Ok(_) => Step::Print("Denied. Username or password incorrect.".to_string()),
                Err(e) => {
                    warn!(error = %e, "Login exchange failed");
                    Step::Print("Login failed: lost connection to server.".to_string())
                }
            },
            Request::NewUser(line) => match self.exchange(line).await {
                Ok(reply) if reply == ACCEPTED => {
                    Step::Print("New account created! Please login.".to_string())
                }
                Ok(_) => Step::Print("Denied. User account already exists.".to_string()),
                Err(e) => {
                    warn!(error = %e, "Registration exchange failed");
                    Step::Print("Registration failed: lost connection to server.".to_string())
                }
            },
            Request::Send(line) => match self.exchange(line).await {
                Ok(reply) => Step::Print(reply),
                Err(e) => {
                    warn!(error = %e, "Send exchange failed");
                    Step::Print("Message not delivered: lost connection to server.".to_string())
                }
            },
            Request::Logout => match write_message(&mut self.stream, b"logout").await {
                Ok(()) => {
                    self.logged_in = false;
                    Step::Quit("See you next time!".to_string())
                }
                Err(e) => {
                    warn!(error = %e, "Logout failed");
                    Step::Print("Error logging out.".to_string())
                }
            },
        }
    }

    /// Send one request and wait for its single response.
    async fn exchange(&mut self, line: &str) -> io::Result<String> {
        write_message(&mut self.stream, line.as_bytes()).await?;
        match read_message(&mut self.stream, self.reply_limit).await? {
            Some(reply) => Ok(reply),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )),
        }
    }

    /// Hand back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Connect to the server and run the interactive prompt until logout or
/// end of input.
pub async fn run(args: ClientArgs) -> io::Result<()> {
    let stream = match TcpStream::connect(args.server).await {
        Ok(stream) => stream,
        Err(e) => {
            write_stdout("Please start the server first.").await?;
            return Err(e);
        }
    };
    info!(server = %args.server, "Connected");

    write_stdout(BANNER).await?;

    let mut dispatcher = Dispatcher::new(stream);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt().await?;
        let Some(input) = lines.next_line().await? else {
            break;
        };

        match dispatcher.dispatch(&input).await {
            Step::Idle => {}
            Step::Print(text) => write_stdout(&format!("> {text}")).await?,
            Step::Quit(text) => {
                write_stdout(&format!("> {text}")).await?;
                break;
            }
        }
    }

    let mut stream = dispatcher.into_inner();
    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Failed to shut down connection cleanly");
    }
    Ok(())
}

async fn prompt() -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"> ").await?;
    stdout.flush().await
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_validate_login() {
        assert_eq!(
            validate("  login bob secret1 ", false),
            Ok(Some(Request::Login("login bob secret1")))
        );
        assert_eq!(
            validate("login bob", false),
            Err(Invalid::MissingCredentials)
        );
        assert_eq!(
            validate("login bob secret1", true),
            Err(Invalid::AlreadyLoggedIn)
        );
    }

    #[test]
    fn test_validate_newuser_bounds() {
        assert_eq!(
            validate("newuser ab pass1", false),
            Err(Invalid::UsernameLength)
        );
        let long_name = "u".repeat(33);
        assert_eq!(
            validate(&format!("newuser {long_name} pass1"), false),
            Err(Invalid::UsernameLength)
        );
        assert_eq!(
            validate("newuser alice abc", false),
            Err(Invalid::PasswordLength)
        );
        assert_eq!(
            validate("newuser alice abcdefghi", false),
            Err(Invalid::PasswordLength)
        );
        assert_eq!(
            validate("newuser abc abcd", false),
            Ok(Some(Request::NewUser("newuser abc abcd")))
        );
        let max_name = "u".repeat(32);
        assert!(validate(&format!("newuser {max_name} abcdefgh"), false).is_ok());
        assert_eq!(
            validate("newuser alice pass1", true),
            Err(Invalid::NewUserWhileLoggedIn)
        );
    }

    #[test]
    fn test_validate_send() {
        assert_eq!(validate("send hi", false), Err(Invalid::NotLoggedIn));
        assert_eq!(validate("send", true), Err(Invalid::MissingMessage));
        assert_eq!(
            validate("send hello world", true),
            Ok(Some(Request::Send("send hello world")))
        );

        // The first word is not counted toward the limit.
        let at_limit = format!("send first {}", "x".repeat(MAX_SEND_LEN));
        assert!(validate(&at_limit, true).is_ok());
        let over_limit = format!("send first {}", "x".repeat(MAX_SEND_LEN + 1));
        assert_eq!(validate(&over_limit, true), Err(Invalid::MessageTooLong));
    }

    #[test]
    fn test_validate_send_counts_encoded_bytes() {
        // A long first word escapes the character count but not the byte bound.
        let long_word = format!("send {} x", "a".repeat(1100));
        assert_eq!(validate(&long_word, true), Err(Invalid::MessageTooLong));

        // 256 characters, but four bytes each.
        let wide = format!("send a {}", "\u{1F600}".repeat(MAX_SEND_LEN));
        assert!(wide.len() > MAX_REQUEST_SIZE);
        assert_eq!(validate(&wide, true), Err(Invalid::MessageTooLong));

        let narrow = format!("send a {}", "\u{1F600}".repeat(200));
        assert!(narrow.len() <= MAX_REQUEST_SIZE);
        assert!(validate(&narrow, true).is_ok());
    }

    #[test]
    fn test_validate_request_size() {
        let password = "p".repeat(MAX_REQUEST_SIZE);
        assert_eq!(
            validate(&format!("login bob {password}"), false),
            Err(Invalid::RequestTooLong)
        );
    }

    #[test]
    fn test_validate_newuser_reserved_characters() {
        assert_eq!(
            validate("newuser alice pp,q", false),
            Err(Invalid::ReservedCharacter)
        );
        assert_eq!(
            validate("newuser ann,x pw12", false),
            Err(Invalid::ReservedCharacter)
        );
        assert_eq!(
            validate("newuser (eve) pw12", false),
            Err(Invalid::ReservedCharacter)
        );
    }

    #[test]
    fn test_validate_misc() {
        assert_eq!(validate("   ", false), Ok(None));
        assert_eq!(validate("logout", false), Err(Invalid::LogoutWhileLoggedOut));
        assert_eq!(validate("logout", true), Ok(Some(Request::Logout)));
        assert_eq!(validate("dance", true), Err(Invalid::UnknownCommand));
    }

    #[tokio::test]
    async fn test_invalid_input_never_touches_network() {
        let mock = Builder::new().build();
        let mut dispatcher = Dispatcher::new(mock);

        assert_eq!(
            dispatcher.dispatch("send hi").await,
            Step::Print(Invalid::NotLoggedIn.to_string())
        );
        assert_eq!(dispatcher.dispatch("").await, Step::Idle);
        assert_eq!(
            dispatcher.dispatch("newuser al pw").await,
            Step::Print(Invalid::UsernameLength.to_string())
        );
    }

    #[tokio::test]
    async fn test_login_send_logout_flow() {
        let mock = Builder::new()
            .write(b"login bob wrong")
            .read(b"0")
            .write(b"login bob secret1")
            .read(b"1")
            .write(b"send hello world")
            .read(b"bob: hello world")
            .write(b"logout")
            .build();
        let mut dispatcher = Dispatcher::new(mock);

        assert_eq!(
            dispatcher.dispatch("login bob wrong").await,
            Step::Print("Denied. Username or password incorrect.".into())
        );
        assert!(!dispatcher.is_logged_in());

        assert_eq!(
            dispatcher.dispatch("login bob secret1").await,
            Step::Print("You are logged in!".into())
        );
        assert!(dispatcher.is_logged_in());

        assert_eq!(
            dispatcher.dispatch("send hello world").await,
            Step::Print("bob: hello world".into())
        );
        assert_eq!(
            dispatcher.dispatch("logout").await,
            Step::Quit("See you next time!".into())
        );
    }

    #[tokio::test]
    async fn test_newuser_outcomes() {
        let mock = Builder::new()
            .write(b"newuser alice pass1")
            .read(b"1")
            .write(b"newuser alice pass2")
            .read(b"0")
            .build();
        let mut dispatcher = Dispatcher::new(mock);

        assert_eq!(
            dispatcher.dispatch("newuser alice pass1").await,
            Step::Print("New account created! Please login.".into())
        );
        assert_eq!(
            dispatcher.dispatch("newuser alice pass2").await,
            Step::Print("Denied. User account already exists.".into())
        );
        assert!(!dispatcher.is_logged_in());
    }

    #[tokio::test]
    async fn test_long_relay_is_read_whole() {
        let text = "a".repeat(DEFAULT_MAX_MESSAGE_SIZE - "send ".len());
        let request = format!("send {text}");
        let relay = format!("bob: {text}");

        let mock = Builder::new()
            .write(b"login bob secret1")
            .read(b"1")
            .write(request.as_bytes())
            .read(relay.as_bytes())
            .write(b"send ping")
            .read(b"bob: ping")
            .build();
        let mut dispatcher = Dispatcher::new(mock);

        dispatcher.dispatch("login bob secret1").await;
        assert_eq!(dispatcher.dispatch(&request).await, Step::Print(relay));
        assert_eq!(
            dispatcher.dispatch("send ping").await,
            Step::Print("bob: ping".into())
        );
    }

    #[tokio::test]
    async fn test_transport_error_reports_failure() {
        let mock = Builder::new()
            .write(b"login bob secret1")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut dispatcher = Dispatcher::new(mock);

        assert_eq!(
            dispatcher.dispatch("login bob secret1").await,
            Step::Print("Login failed: lost connection to server.".into())
        );
        assert!(!dispatcher.is_logged_in());
    }
}
