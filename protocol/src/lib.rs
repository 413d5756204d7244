//! Wire protocol shared by the controller server and its clients.
//!
//! Messages are short ASCII strings whose fields are separated by `:` and
//! which are terminated on the wire by the literal marker `<EOC>`. This crate
//! performs no I/O: it turns bytes into framed messages ([`FrameDecoder`]),
//! messages into validated commands ([`parse`]), and server answers into
//! framed text ([`Reply`]).

pub mod command;
pub mod frame;
pub mod reply;

pub use command::{parse, Command, InvalidReason, PlayerNotFound, SlotLookup};
pub use frame::{FrameDecoder, FrameError};
pub use reply::Reply;

/// Field separator inside a message.
pub const SEPARATOR: char = ':';
/// End-of-message marker appended to every frame.
pub const END_OF_COMMAND: &str = "<EOC>";

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 28910;
/// Number of player slots unless configured otherwise.
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Inclusive bound for every analog axis value.
pub const AXIS_LIMIT: f32 = 1.0;
