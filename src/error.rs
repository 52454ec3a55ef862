//! Error types shared across the synchronizer.

use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
use std::result;
use std::str::Utf8Error;

use base64::DecodeError;
use native_tls::Error as TlsError;

/// A convenience wrapper around `Result` for [`Error`].
pub type Result<T> = result::Result<T, Error>;

/// How [`Session::safely`](crate::session::Session::safely) should treat a
/// failed operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryKind {
    /// Drop the connection, back off, reconnect, re-run.
    Reconnect,
    /// Back off and re-run on the same connection.
    InPlace,
    /// Surface immediately.
    Fatal,
}

/// Everything that can go wrong while syncing.
#[derive(Debug)]
pub enum Error {
    /// A URI missing its scheme, host or credentials.
    InvalidUri(String),
    /// Bad or conflicting configuration.
    Config(String),
    /// An `io::Error` while reading or writing a network stream.
    Io(IoError),
    /// TLS handshake rejected, typically a certificate verification failure.
    /// Never retried.
    TlsVerify(TlsError),
    /// TLS failure on an established stream.
    Tls(TlsError),
    /// Every advertised authentication method was refused. Carries the list
    /// of methods attempted.
    Auth { attempted: Vec<String>, last: String },
    /// An operation that requires an open connection was called without one.
    NotConnected,
    /// An operation that requires authentication was called before login.
    NotAuthenticated,
    /// The named mailbox does not exist on the server.
    MailboxNotFound(String),
    /// Operation on a mailbox handle that has been closed.
    MailboxClosed(String),
    /// A `BAD` response from the server.
    Bad(String),
    /// A `NO` response from the server.
    No(String),
    /// The connection was terminated unexpectedly.
    ConnectionLost,
    /// Error parsing a server response.
    Parse(ParseError),
    /// Command input contained a character IMAP strings cannot carry.
    Validate(ValidateError),
    /// The server rejected an APPEND.
    Append,
    /// A single message could not be fetched during a copy; the run
    /// continues and the failure is counted.
    MessageFetch(String),
    /// No pool session became available within the pool timeout.
    PoolTimeout,
    /// The catalog store failed.
    Catalog(rusqlite::Error),
    /// The run was aborted by a signal.
    Interrupted(&'static str),
}

impl Error {
    /// Classify for the retry envelope. Certificate verification failures
    /// and everything configuration- or programmer-shaped are fatal; socket
    /// trouble reconnects; server grumbling retries in place.
    pub fn retry_kind(&self) -> RetryKind {
        match self {
            Error::Io(_) | Error::ConnectionLost | Error::Tls(_) => RetryKind::Reconnect,
            Error::Bad(_) | Error::No(_) | Error::Parse(_) => RetryKind::InPlace,
            _ => RetryKind::Fatal,
        }
    }
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Error::Io(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<ValidateError> for Error {
    fn from(err: ValidateError) -> Error {
        Error::Validate(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Error {
        Error::Catalog(err)
    }
}

impl<T> From<bufstream::IntoInnerError<T>> for Error {
    fn from(err: bufstream::IntoInnerError<T>) -> Error {
        Error::Io(err.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidUri(uri) => write!(f, "invalid IMAP URI: {}", uri),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Io(e) => write!(f, "network error: {}", e),
            Error::TlsVerify(e) => write!(f, "TLS certificate verification failed: {}", e),
            Error::Tls(e) => write!(f, "TLS error: {}", e),
            Error::Auth { attempted, last } => write!(
                f,
                "authentication failed ({}): {}",
                attempted.join(", "),
                last
            ),
            Error::NotConnected => f.write_str("not connected"),
            Error::NotAuthenticated => f.write_str("not authenticated"),
            Error::MailboxNotFound(name) => write!(f, "no such mailbox: {}", name),
            Error::MailboxClosed(name) => write!(f, "mailbox is closed: {}", name),
            Error::Bad(msg) => write!(f, "BAD response: {}", msg),
            Error::No(msg) => write!(f, "NO response: {}", msg),
            Error::ConnectionLost => f.write_str("connection lost"),
            Error::Parse(e) => write!(f, "{}", e),
            Error::Validate(e) => write!(f, "{}", e),
            Error::Append => f.write_str("could not append message to mailbox"),
            Error::MessageFetch(msg) => write!(f, "message fetch failed: {}", msg),
            Error::PoolTimeout => f.write_str("timed out waiting for a pool session"),
            Error::Catalog(e) => write!(f, "catalog error: {}", e),
            Error::Interrupted(sig) => write!(f, "interrupted ({})", sig),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::TlsVerify(e) | Error::Tls(e) => Some(e),
            Error::Parse(ParseError::DataNotUtf8(_, e)) => Some(e),
            Error::Catalog(e) => Some(e),
            _ => None,
        }
    }
}

/// An error while interpreting a server response.
#[derive(Debug)]
pub enum ParseError {
    /// The response did not match the IMAP grammar.
    Invalid(Vec<u8>),
    /// A syntactically valid response that makes no sense for the command.
    Unexpected(String),
    /// The authentication challenge could not be located or decoded.
    Authentication(String, Option<DecodeError>),
    /// Response data that should have been UTF-8 was not.
    DataNotUtf8(Vec<u8>, Utf8Error),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Invalid(data) => write!(
                f,
                "unable to parse response: {:?}",
                String::from_utf8_lossy(&data[..data.len().min(64)])
            ),
            ParseError::Unexpected(what) => write!(f, "unexpected response: {}", what),
            ParseError::Authentication(line, _) => {
                write!(f, "unable to parse authentication challenge: {:?}", line)
            }
            ParseError::DataNotUtf8(..) => f.write_str("response data is not UTF-8"),
        }
    }
}

impl StdError for ParseError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ParseError::Authentication(_, Some(e)) => Some(e),
            ParseError::DataNotUtf8(_, e) => Some(e),
            _ => None,
        }
    }
}

/// An [invalid character](https://tools.ietf.org/html/rfc3501#section-4.3)
/// was found in an input string.
#[derive(Debug)]
pub struct ValidateError(pub char);

impl fmt::Display for ValidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // print the character in debug form, invalid ones are often whitespace
        write!(f, "invalid character in input: {:?}", self.0)
    }
}

impl StdError for ValidateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        let io = Error::Io(IoError::new(std::io::ErrorKind::BrokenPipe, "pipe"));
        assert_eq!(io.retry_kind(), RetryKind::Reconnect);
        assert_eq!(Error::ConnectionLost.retry_kind(), RetryKind::Reconnect);
        assert_eq!(Error::No("try later".into()).retry_kind(), RetryKind::InPlace);
        assert_eq!(Error::Bad("syntax".into()).retry_kind(), RetryKind::InPlace);
        assert_eq!(
            Error::Auth {
                attempted: vec!["PLAIN".into()],
                last: "NO".into()
            }
            .retry_kind(),
            RetryKind::Fatal
        );
        assert_eq!(Error::PoolTimeout.retry_kind(), RetryKind::Fatal);
        assert_eq!(Error::MailboxClosed("x".into()).retry_kind(), RetryKind::Fatal);
    }

    #[test]
    fn auth_error_names_every_method() {
        let err = Error::Auth {
            attempted: vec!["PLAIN".into(), "LOGIN".into(), "CRAM-MD5".into()],
            last: "[AUTHENTICATIONFAILED] Invalid credentials".into(),
        };
        let text = err.to_string();
        assert!(text.contains("PLAIN"));
        assert!(text.contains("LOGIN"));
        assert!(text.contains("CRAM-MD5"));
    }
}
