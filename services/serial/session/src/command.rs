//! Command surface: connect, disconnect, send.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::session::ConnectionSession;

/// Commands accepted by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a link, optionally replacing the reconnect timeout
    Connect {
        /// Peer address
        address: String,
        /// New reconnect streak cap; zero means forever
        reconnect_timeout: Option<Duration>,
    },
    /// Tear the session down
    Disconnect,
    /// Send text to the peer
    Send {
        /// Text to send; empty when none was given
        text: String,
    },
}

/// Command line parse failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    /// Nothing to parse
    #[error("empty command")]
    Empty,
    /// Unrecognised verb
    #[error("unknown command: {0}")]
    Unknown(String),
    /// Connect without an address
    #[error("connect requires an address")]
    MissingAddress,
    /// Timeout that humantime cannot read
    #[error("invalid reconnect timeout {0:?}: {1}")]
    Timeout(String, String),
}

impl FromStr for Command {
    type Err = CommandParseError;

    /// Parse `connect <address> [timeout]`, `disconnect`, or `send <text>`.
    /// Send keeps the rest of the line verbatim.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim_start()),
            None => (line, ""),
        };

        match verb.to_ascii_lowercase().as_str() {
            "" => Err(CommandParseError::Empty),
            "connect" => {
                let mut parts = rest.split_whitespace();
                let address = parts.next().ok_or(CommandParseError::MissingAddress)?;
                let reconnect_timeout = parts
                    .next()
                    .map(|raw| {
                        humantime::parse_duration(raw)
                            .map_err(|e| CommandParseError::Timeout(raw.to_string(), e.to_string()))
                    })
                    .transpose()?;
                Ok(Command::Connect {
                    address: address.to_string(),
                    reconnect_timeout,
                })
            }
            "disconnect" => Ok(Command::Disconnect),
            "send" => Ok(Command::Send {
                text: rest.to_string(),
            }),
            other => Err(CommandParseError::Unknown(other.to_string())),
        }
    }
}

impl ConnectionSession {
    /// Apply a command
    pub fn execute(&self, command: Command) {
        match command {
            Command::Connect {
                address,
                reconnect_timeout,
            } => {
                if let Some(timeout) = reconnect_timeout {
                    self.set_reconnect_timeout(timeout);
                }
                self.connect(&address);
                self.show_background_indicator();
            }
            Command::Disconnect => {
                self.telemetry().info("Stopping service");
                info!("Stopping session on request");
                self.disconnect();
            }
            Command::Send { text } => {
                if text.is_empty() {
                    self.telemetry().info("No text, unable to send");
                    return;
                }
                self.send(&text);
            }
        }
    }
}
