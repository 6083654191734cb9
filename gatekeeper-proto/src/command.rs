//! Typed operational/login commands, parsed from a [`crate::framing::Record`].

use std::fmt;

use crate::framing::Record;

/// Minimum port number the core will accept for block/unblock/accept (spec §3 invariant 6).
pub const MIN_PORT: u16 = 10;

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `login <base64(hashAccessKey-digest)>`
    Login { digest_b64: String },
    /// `list ports`
    ListPorts,
    /// `list accepts`
    ListAccepts,
    /// `block <port>`
    Block { port: u16 },
    /// `unblock <port>`
    Unblock { port: u16 },
    /// `accept <addr> <port>`
    Accept { addr: String, port: u16 },
    /// `unaccept <addr> [<port>]`
    Unaccept { addr: String, port: Option<u16> },
    /// `disconnect <anything>`
    Disconnect,
}

/// Why a record failed to parse as a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCommandError {
    /// The CMD token is not one the grammar recognizes.
    UnknownCommand,
    /// ARGS did not have the shape this CMD requires.
    MalformedArgs,
    /// A port field was not a valid integer, or was below [`MIN_PORT`].
    InvalidPort,
}

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::MalformedArgs => write!(f, "malformed arguments"),
            Self::InvalidPort => write!(f, "invalid port"),
        }
    }
}
impl std::error::Error for ParseCommandError {}

fn parse_port(s: &str) -> Result<u16, ParseCommandError> {
    let port: u16 = s.parse().map_err(|_| ParseCommandError::InvalidPort)?;
    if port < MIN_PORT {
        return Err(ParseCommandError::InvalidPort);
    }
    Ok(port)
}

impl Command {
    /// Parse a record into a typed command.
    ///
    /// Matching is case-sensitive on the CMD token against the lower-case
    /// literals in the grammar table; no case-folding is performed.
    pub fn parse(record: &Record) -> Result<Self, ParseCommandError> {
        match record.cmd.as_str() {
            "login" => Ok(Command::Login {
                digest_b64: record.args.clone(),
            }),
            "list" => match record.args.as_str() {
                "ports" => Ok(Command::ListPorts),
                "accepts" => Ok(Command::ListAccepts),
                _ => Err(ParseCommandError::MalformedArgs),
            },
            "block" => Ok(Command::Block {
                port: parse_port(&record.args)?,
            }),
            "unblock" => Ok(Command::Unblock {
                port: parse_port(&record.args)?,
            }),
            "accept" => {
                let mut parts = record.args.splitn(2, ' ');
                let addr = parts.next().filter(|s| !s.is_empty()).ok_or(ParseCommandError::MalformedArgs)?;
                let port_s = parts.next().ok_or(ParseCommandError::MalformedArgs)?;
                Ok(Command::Accept {
                    addr: addr.to_string(),
                    port: parse_port(port_s.trim())?,
                })
            }
            "unaccept" => {
                let mut parts = record.args.splitn(2, ' ');
                let addr = parts.next().filter(|s| !s.is_empty()).ok_or(ParseCommandError::MalformedArgs)?;
                let port = match parts.next().map(str::trim).filter(|s| !s.is_empty()) {
                    Some(p) => Some(parse_port(p)?),
                    None => None,
                };
                Ok(Command::Unaccept {
                    addr: addr.to_string(),
                    port,
                })
            }
            "disconnect" => Ok(Command::Disconnect),
            _ => Err(ParseCommandError::UnknownCommand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(cmd: &str, args: &str) -> Record {
        Record {
            cmd: cmd.to_string(),
            args: args.to_string(),
        }
    }

    #[test]
    fn parses_all_operational_commands() {
        assert_eq!(
            Command::parse(&rec("list", "ports")).unwrap(),
            Command::ListPorts
        );
        assert_eq!(
            Command::parse(&rec("list", "accepts")).unwrap(),
            Command::ListAccepts
        );
        assert_eq!(
            Command::parse(&rec("block", "2223")).unwrap(),
            Command::Block { port: 2223 }
        );
        assert_eq!(
            Command::parse(&rec("unblock", "2223")).unwrap(),
            Command::Unblock { port: 2223 }
        );
        assert_eq!(
            Command::parse(&rec("accept", "10.0.0.1 2223")).unwrap(),
            Command::Accept {
                addr: "10.0.0.1".into(),
                port: 2223
            }
        );
        assert_eq!(
            Command::parse(&rec("unaccept", "10.0.0.1 2223")).unwrap(),
            Command::Unaccept {
                addr: "10.0.0.1".into(),
                port: Some(2223)
            }
        );
        assert_eq!(
            Command::parse(&rec("unaccept", "10.0.0.1")).unwrap(),
            Command::Unaccept {
                addr: "10.0.0.1".into(),
                port: None
            }
        );
        assert_eq!(
            Command::parse(&rec("disconnect", "ignored")).unwrap(),
            Command::Disconnect
        );
    }

    #[test]
    fn ports_below_10_are_invalid() {
        assert_eq!(
            Command::parse(&rec("block", "9")),
            Err(ParseCommandError::InvalidPort)
        );
        assert_eq!(
            Command::parse(&rec("block", "0")),
            Err(ParseCommandError::InvalidPort)
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert_eq!(
            Command::parse(&rec("frobnicate", "x")),
            Err(ParseCommandError::UnknownCommand)
        );
    }
}
