pub mod del;
pub mod executable;
pub mod get;
pub mod lindex;
pub mod llen;
pub mod lpop;
pub mod lpush;
pub mod ping;
pub mod rpop;
pub mod rpush;
pub mod set;

use bytes::Bytes;
use std::{str, vec};
use strum_macros::AsRefStr;
use thiserror::Error as ThisError;

use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

use del::Del;
use get::Get;
use lindex::Lindex;
use llen::Llen;
use lpop::Lpop;
use lpush::Lpush;
use ping::Ping;
use rpop::Rpop;
use rpush::Rpush;
use set::Set;

#[derive(Debug, PartialEq, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Command {
    Del(Del),
    Get(Get),
    Set(Set),

    Lindex(Lindex),
    Llen(Llen),
    Lpop(Lpop),
    Lpush(Lpush),
    Rpop(Rpop),
    Rpush(Rpush),

    Ping(Ping),
}

impl Executable for Command {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        match self {
            Command::Del(cmd) => cmd.exec(store),
            Command::Get(cmd) => cmd.exec(store),
            Command::Lindex(cmd) => cmd.exec(store),
            Command::Llen(cmd) => cmd.exec(store),
            Command::Lpop(cmd) => cmd.exec(store),
            Command::Lpush(cmd) => cmd.exec(store),
            Command::Ping(cmd) => cmd.exec(store),
            Command::Rpop(cmd) => cmd.exec(store),
            Command::Rpush(cmd) => cmd.exec(store),
            Command::Set(cmd) => cmd.exec(store),
        }
    }
}

impl TryFrom<Frame> for Command {
    type Error = CommandParserError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Clients send commands to the server as RESP arrays.
        let frames = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "array".to_string(),
                    actual: frame,
                })
            }
        };

        let mut parser = CommandParser {
            parts: frames.into_iter(),
        };

        let command_name = parser.parse_command_name()?;
        let lowercase_name = command_name.to_lowercase();

        let command = match &lowercase_name[..] {
            "del" => Del::try_from(&mut parser).map(Command::Del),
            "get" => Get::try_from(&mut parser).map(Command::Get),
            "lindex" => Lindex::try_from(&mut parser).map(Command::Lindex),
            "llen" => Llen::try_from(&mut parser).map(Command::Llen),
            "lpop" => Lpop::try_from(&mut parser).map(Command::Lpop),
            "lpush" => Lpush::try_from(&mut parser).map(Command::Lpush),
            "ping" => Ping::try_from(&mut parser).map(Command::Ping),
            "rpop" => Rpop::try_from(&mut parser).map(Command::Rpop),
            "rpush" => Rpush::try_from(&mut parser).map(Command::Rpush),
            "set" => Set::try_from(&mut parser).map(Command::Set),
            _ => {
                return Err(CommandParserError::UnknownCommand {
                    command: command_name,
                })
            }
        };

        command
            .and_then(|command| parser.finish(&lowercase_name).map(|_| command))
            .map_err(|err| match err {
                // Running out of arguments means the command was called with too few of them.
                CommandParserError::EndOfStream => CommandParserError::WrongNumberOfArguments {
                    command: lowercase_name,
                },
                err => err,
            })
    }
}

pub struct CommandParser {
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    fn parse_command_name(&mut self) -> Result<String, CommandParserError> {
        let command_name = match self.parts.next() {
            Some(frame) => frame,
            None => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "command name".to_string(),
                    actual: Frame::Array(vec![]),
                })
            }
        };

        match command_name {
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_string())
                // Not valid UTF-8 cannot name any command we know of.
                .map_err(|_| CommandParserError::UnknownCommand {
                    command: String::from_utf8_lossy(&bytes).into_owned(),
                }),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    fn has_next(&self) -> bool {
        self.parts.len() > 0
    }

    fn next_integer(&mut self) -> Result<i64, CommandParserError> {
        let frame = self.parts.next().ok_or(CommandParserError::EndOfStream)?;

        match frame {
            Frame::Integer(i) => Ok(i),
            Frame::Simple(string) => string
                .parse::<i64>()
                .map_err(|_| CommandParserError::NotAnInteger),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map_err(|_| CommandParserError::NotAnInteger)?
                .parse::<i64>()
                .map_err(|_| CommandParserError::NotAnInteger),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "integer".to_string(),
                actual: frame,
            }),
        }
    }

    fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        let frame = self.parts.next().ok_or(CommandParserError::EndOfStream)?;

        match frame {
            // Both `Simple` and `Bulk` frames carry strings. Keys and values are kept as raw bytes.
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    /// Collects every remaining argument. At least one is required.
    fn remaining_bytes(&mut self) -> Result<Vec<Bytes>, CommandParserError> {
        let mut values = vec![self.next_bytes()?];
        while self.has_next() {
            values.push(self.next_bytes()?);
        }
        Ok(values)
    }

    fn finish(&mut self, command: &str) -> Result<(), CommandParserError> {
        if self.has_next() {
            return Err(CommandParserError::WrongNumberOfArguments {
                command: command.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("Protocol error: invalid frame, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("unknown command '{command}'")]
    UnknownCommand { command: String },
    #[error("wrong number of arguments for '{command}' command")]
    WrongNumberOfArguments { command: String },
    #[error("value is not an integer or out of range")]
    NotAnInteger,
    #[error("attempting to extract a value failed due to the frame being fully consumed")]
    EndOfStream,
}

impl CommandParserError {
    /// Protocol errors leave the connection in an unknown state and end it. Every other error is
    /// answered and the connection keeps serving commands.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, CommandParserError::InvalidFrame { .. })
    }

    pub fn to_frame(&self) -> Frame {
        Frame::Error(format!("ERR {}", self))
    }
}
