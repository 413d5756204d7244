//! Messages sent from the server to controllers

use crate::END_OF_COMMAND;
use std::fmt;

pub const PLAYER_ID: &str = "PLAYER_ID";
pub const PLAYER_NOT_FOUND: &str = "PLAYER_NOT_FOUND";
pub const INVALID_COMMAND: &str = "INVALID_COMMAND";
pub const SERVER_FULL: &str = "SERVER_FULL";
pub const SERVER_SHUTDOWN: &str = "SERVER_SHUTDOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Registration ack, only ever sent to the registering connection
    PlayerId(usize),
    PlayerNotFound,
    InvalidCommand,
    ServerFull,
    /// Broadcast to every occupied slot when the server stops
    ServerShutdown,
}

impl Reply {
    /// Wire form including the end-of-message marker
    pub fn encode(&self) -> Vec<u8> {
        format!("{self}{END_OF_COMMAND}").into_bytes()
    }

    /// Parses a de-framed server message, as a controller would
    pub fn parse(message: &str) -> Option<Reply> {
        match message {
            PLAYER_NOT_FOUND => Some(Reply::PlayerNotFound),
            INVALID_COMMAND => Some(Reply::InvalidCommand),
            SERVER_FULL => Some(Reply::ServerFull),
            SERVER_SHUTDOWN => Some(Reply::ServerShutdown),
            _ => {
                let (prefix, id) = message.split_once(crate::SEPARATOR)?;
                if prefix != PLAYER_ID {
                    return None;
                }
                id.parse().ok().map(Reply::PlayerId)
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::PlayerId(id) => write!(f, "{PLAYER_ID}{}{id}", crate::SEPARATOR),
            Reply::PlayerNotFound => f.write_str(PLAYER_NOT_FOUND),
            Reply::InvalidCommand => f.write_str(INVALID_COMMAND),
            Reply::ServerFull => f.write_str(SERVER_FULL),
            Reply::ServerShutdown => f.write_str(SERVER_SHUTDOWN),
        }
    }
}
