//! Errors surfaced by [`crate::client::ClientCore`].

use std::fmt;
use std::io;

use gatekeeper_crypto::CryptoError;
use gatekeeper_proto::ParseCommandError;

/// Everything that can go wrong talking to a gatekeeper server.
#[derive(Debug)]
pub enum ClientError {
    /// The TCP socket failed.
    Transport(io::Error),
    /// A cryptographic operation failed (bad padding, non-Latin-1 payload, ...).
    Crypto(CryptoError),
    /// The peer sent a line the wire parser rejected.
    Protocol(String),
    /// No reply arrived within the 30 s window (spec §4.7).
    Timeout,
    /// `login` completed but the server rejected the access-key proof.
    AuthRejected,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Crypto(e) => write!(f, "crypto error: {e}"),
            Self::Protocol(s) => write!(f, "protocol error: {s}"),
            Self::Timeout => write!(f, "timed out waiting for a reply"),
            Self::AuthRejected => write!(f, "login rejected"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<CryptoError> for ClientError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

impl From<ParseCommandError> for ClientError {
    fn from(e: ParseCommandError) -> Self {
        Self::Protocol(e.to_string())
    }
}
