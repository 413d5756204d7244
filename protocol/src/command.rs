//! Command grammar, parsing and validation
//!
//! A message is split on [`SEPARATOR`](crate::SEPARATOR) and matched against
//! the fixed grammar below. Keywords are case sensitive.
//!
//! | Form                                   | Fields |
//! |----------------------------------------|--------|
//! | `REGISTER:<name>`                      | 2      |
//! | `DEREGISTER:<id>`                      | 2      |
//! | `<id>:KEY_DOWN:<key>[:<extra>]`        | 3 or 4 |
//! | `<id>:JOYSTICK:<x>:<y>`                | 4      |
//! | `<id>:GYRO:<x>:<y>:<z>`                | 5      |
//!
//! Validation runs in a fixed order: field count, numeric parsing, numeric
//! range, and finally the player id of per-player commands. Only the last step
//! consults slot occupancy, and it yields [`PlayerNotFound`] rather than an
//! unrecognized command.

use crate::{AXIS_LIMIT, SEPARATOR};

pub const REGISTER: &str = "REGISTER";
pub const DEREGISTER: &str = "DEREGISTER";
pub const KEY_DOWN: &str = "KEY_DOWN";
pub const JOYSTICK: &str = "JOYSTICK";
pub const GYRO: &str = "GYRO";

const REGISTER_FIELDS: usize = 2;
const DEREGISTER_FIELDS: usize = 2;
const KEY_DOWN_FIELDS: usize = 3;
const KEY_DOWN_EXTRA_FIELDS: usize = 4;
const JOYSTICK_FIELDS: usize = 4;
const GYRO_FIELDS: usize = 5;

/// A parsed client message
///
/// Built fresh for every message and consumed once by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Register {
        name: String,
    },
    Deregister {
        player_id: usize,
    },
    KeyDown {
        player_id: usize,
        key: String,
        extra: Option<String>,
    },
    Joystick {
        player_id: usize,
        x: f32,
        y: f32,
    },
    Gyro {
        player_id: usize,
        x: f32,
        y: f32,
        z: f32,
    },
    /// Anything that does not match the grammar. Answered with
    /// `INVALID_COMMAND`.
    Unrecognized {
        raw: String,
        reason: InvalidReason,
    },
}

impl Command {
    /// Player slot targeted by a per-player action, if any
    pub fn player_id(&self) -> Option<usize> {
        match self {
            Command::KeyDown { player_id, .. }
            | Command::Joystick { player_id, .. }
            | Command::Gyro { player_id, .. } => Some(*player_id),
            Command::Deregister { player_id } => Some(*player_id),
            Command::Register { .. } | Command::Unrecognized { .. } => None,
        }
    }
}

/// Why a message was classified as [`Command::Unrecognized`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidReason {
    #[error("empty message")]
    Empty,
    #[error("unknown command keyword")]
    UnknownKeyword,
    #[error("{keyword} does not take {found} fields")]
    WrongFieldCount { keyword: &'static str, found: usize },
    #[error("empty {0} field")]
    EmptyField(&'static str),
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("{0} is outside [-1.0, 1.0]")]
    OutOfRange(f32),
    #[error("'{0}' is not a player id")]
    BadPlayerId(String),
}

/// A well-formed per-player command whose id names no occupied slot
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("player '{raw_id}' not found")]
pub struct PlayerNotFound {
    pub raw_id: String,
}

/// Read-only view of slot occupancy used while validating player ids
pub trait SlotLookup {
    fn is_occupied(&self, player_id: usize) -> bool;
}

impl<F> SlotLookup for F
where
    F: Fn(usize) -> bool,
{
    fn is_occupied(&self, player_id: usize) -> bool {
        self(player_id)
    }
}

impl SlotLookup for [bool] {
    fn is_occupied(&self, player_id: usize) -> bool {
        self.get(player_id).copied().unwrap_or(false)
    }
}

/// Parses one de-framed message against the current slot occupancy
///
/// Never fails for malformed input: grammar violations come back as
/// [`Command::Unrecognized`]. The only error is [`PlayerNotFound`], returned
/// when a well-formed per-player action names an empty or out-of-range slot.
pub fn parse<L>(raw: &str, slots: &L) -> Result<Command, PlayerNotFound>
where
    L: SlotLookup + ?Sized,
{
    let fields: Vec<&str> = raw.split(SEPARATOR).collect();
    let unrecognized = |reason| Command::Unrecognized {
        raw: raw.to_string(),
        reason,
    };

    if raw.is_empty() {
        return Ok(unrecognized(InvalidReason::Empty));
    }

    match fields[0] {
        REGISTER => return Ok(parse_register(&fields).unwrap_or_else(unrecognized)),
        DEREGISTER => return Ok(parse_deregister(&fields).unwrap_or_else(unrecognized)),
        _ => {}
    }

    let action = match fields.get(1) {
        Some(keyword) => parse_action(keyword, &fields),
        None => Err(InvalidReason::UnknownKeyword),
    };
    let action = match action {
        Ok(action) => action,
        Err(reason) => return Ok(unrecognized(reason)),
    };

    let player_id = match fields[0].parse::<usize>() {
        Ok(id) if slots.is_occupied(id) => id,
        _ => {
            return Err(PlayerNotFound {
                raw_id: fields[0].to_string(),
            })
        }
    };

    Ok(action.into_command(player_id))
}

fn parse_register(fields: &[&str]) -> Result<Command, InvalidReason> {
    expect_fields(REGISTER, fields, &[REGISTER_FIELDS])?;
    if fields[1].is_empty() {
        return Err(InvalidReason::EmptyField("name"));
    }
    Ok(Command::Register {
        name: fields[1].to_string(),
    })
}

fn parse_deregister(fields: &[&str]) -> Result<Command, InvalidReason> {
    expect_fields(DEREGISTER, fields, &[DEREGISTER_FIELDS])?;
    let player_id = fields[1]
        .parse::<usize>()
        .map_err(|_| InvalidReason::BadPlayerId(fields[1].to_string()))?;
    Ok(Command::Deregister { player_id })
}

/// A per-player action validated except for its player id
enum Action {
    KeyDown { key: String, extra: Option<String> },
    Joystick { x: f32, y: f32 },
    Gyro { x: f32, y: f32, z: f32 },
}

impl Action {
    fn into_command(self, player_id: usize) -> Command {
        match self {
            Action::KeyDown { key, extra } => Command::KeyDown {
                player_id,
                key,
                extra,
            },
            Action::Joystick { x, y } => Command::Joystick { player_id, x, y },
            Action::Gyro { x, y, z } => Command::Gyro { player_id, x, y, z },
        }
    }
}

fn parse_action(keyword: &str, fields: &[&str]) -> Result<Action, InvalidReason> {
    match keyword {
        KEY_DOWN => {
            expect_fields(KEY_DOWN, fields, &[KEY_DOWN_FIELDS, KEY_DOWN_EXTRA_FIELDS])?;
            if fields[2].is_empty() {
                return Err(InvalidReason::EmptyField("key"));
            }
            let extra = fields
                .get(3)
                .filter(|extra| !extra.is_empty())
                .map(|extra| extra.to_string());
            Ok(Action::KeyDown {
                key: fields[2].to_string(),
                extra,
            })
        }
        JOYSTICK => {
            expect_fields(JOYSTICK, fields, &[JOYSTICK_FIELDS])?;
            let [x, y] = parse_axes::<2>(&fields[2..])?;
            Ok(Action::Joystick { x, y })
        }
        GYRO => {
            expect_fields(GYRO, fields, &[GYRO_FIELDS])?;
            let [x, y, z] = parse_axes::<3>(&fields[2..])?;
            Ok(Action::Gyro { x, y, z })
        }
        _ => Err(InvalidReason::UnknownKeyword),
    }
}

fn expect_fields(
    keyword: &'static str,
    fields: &[&str],
    allowed: &[usize],
) -> Result<(), InvalidReason> {
    if allowed.contains(&fields.len()) {
        Ok(())
    } else {
        Err(InvalidReason::WrongFieldCount {
            keyword,
            found: fields.len(),
        })
    }
}

/// Parses every field first, then range-checks, so a later unparsable field
/// wins over an earlier out-of-range one.
fn parse_axes<const N: usize>(fields: &[&str]) -> Result<[f32; N], InvalidReason> {
    let mut values = [0.0f32; N];
    for (value, field) in values.iter_mut().zip(fields) {
        *value = field
            .parse::<f32>()
            .map_err(|_| InvalidReason::NotANumber(field.to_string()))?;
    }

    // NaN fails `contains`, so it is rejected here as well
    if let Some(bad) = values
        .iter()
        .find(|v| !(-AXIS_LIMIT..=AXIS_LIMIT).contains(*v))
    {
        return Err(InvalidReason::OutOfRange(*bad));
    }

    Ok(values)
}
