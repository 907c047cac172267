//! Binary wire protocol shared by the server and its clients
//!
//! Two frames travel over the byte stream:
//!
//! - [`ClientUpdate`] (`'b'`), client to server: a variant byte selects the
//!   payload shape (button press counters or collection progress), followed
//!   by the sender's position.
//! - [`ServerTick`] (`'m'`), server to client: a 24-bit length-prefixed
//!   status string, then a 24-bit length-prefixed roster section holding one
//!   `(position, name)` entry per other player.
//!
//! All multi-byte numbers are big-endian and positions are always three
//! `f32` scalars, independent of host layout. Decoding works on the front of
//! a growable buffer and only consumes a frame once every byte of it has
//! arrived, so callers can feed arbitrary chunks and call [`Frame::decode`]
//! until it yields `None`.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};

pub const TAG_CLIENT_UPDATE: u8 = b'b';
pub const TAG_SERVER_TICK: u8 = b'm';

/// Largest value a 24-bit length field can carry
pub const MAX_U24: usize = 0x00FF_FFFF;
/// Names are sent with a trailing NUL and a one byte `len + 1` prefix
pub const MAX_NAME_LEN: usize = 254;
pub const MAX_ROSTER_ENTRIES: usize = u8::MAX as usize;
pub const POSITION_SIZE: usize = 12;

const VARIANT_BUTTONS: u8 = 0x01;
const VARIANT_PROGRESS: u8 = 0x02;

/// A frame that can be written to and extracted from a byte buffer
pub trait Frame: Sized {
    const TAG: u8;

    /// Appends the encoded frame to `dst`. Nothing is written on error.
    fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError>;

    /// Extracts one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched while the frame is
    /// incomplete. On success exactly the frame's bytes are consumed.
    fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError>;
}

/// Decodes every complete frame at the front of `src`, leaving any trailing
/// partial frame in place.
pub fn decode_available<F: Frame>(src: &mut BytesMut) -> Result<Vec<F>, ProtocolError> {
    let mut frames = Vec::new();
    while let Some(frame) = F::decode(src)? {
        frames.push(frame);
    }
    Ok(frames)
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const ZERO: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Position for 2D game variants, which leave `z` at zero
    pub fn planar(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    fn put(&self, dst: &mut BytesMut) {
        dst.put_f32(self.x);
        dst.put_f32(self.y);
        dst.put_f32(self.z);
    }

    fn get(src: &mut &[u8]) -> Self {
        let x = src.get_f32();
        let y = src.get_f32();
        let z = src.get_f32();
        Self { x, y, z }
    }
}

/// Press counts accumulated since the previous update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ButtonCounts {
    pub left: u8,
    pub right: u8,
    pub down: u8,
    pub up: u8,
}

impl ButtonCounts {
    pub fn total(&self) -> u32 {
        u32::from(self.left) + u32::from(self.right) + u32::from(self.down) + u32::from(self.up)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Payload shape of a client update, selected by the variant byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controls {
    Buttons(ButtonCounts),
    Progress { collected: u8, won: bool },
}

impl Controls {
    fn variant(&self) -> u8 {
        match self {
            Controls::Buttons(_) => VARIANT_BUTTONS,
            Controls::Progress { .. } => VARIANT_PROGRESS,
        }
    }

    fn payload_len(variant: u8) -> Result<usize, ProtocolError> {
        match variant {
            VARIANT_BUTTONS => Ok(4),
            VARIANT_PROGRESS => Ok(2),
            other => Err(ProtocolError::UnknownVariant(other)),
        }
    }
}

/// Client to server: the local player's input counters and position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientUpdate {
    pub controls: Controls,
    pub position: Position,
}

impl ClientUpdate {
    pub fn buttons(counts: ButtonCounts, position: Position) -> Self {
        Self {
            controls: Controls::Buttons(counts),
            position,
        }
    }

    pub fn progress(collected: u8, won: bool, position: Position) -> Self {
        Self {
            controls: Controls::Progress { collected, won },
            position,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self.controls {
            Controls::Buttons(_) => 2 + 4 + POSITION_SIZE,
            Controls::Progress { .. } => 2 + 2 + POSITION_SIZE,
        }
    }
}

impl Frame for ClientUpdate {
    const TAG: u8 = TAG_CLIENT_UPDATE;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(self.encoded_len());
        dst.put_u8(Self::TAG);
        dst.put_u8(self.controls.variant());
        match self.controls {
            Controls::Buttons(counts) => {
                dst.put_u8(counts.left);
                dst.put_u8(counts.right);
                dst.put_u8(counts.down);
                dst.put_u8(counts.up);
            }
            Controls::Progress { collected, won } => {
                dst.put_u8(collected);
                dst.put_u8(u8::from(won));
            }
        }
        self.position.put(dst);
        Ok(())
    }

    fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        match src.first() {
            None => return Ok(None),
            Some(&TAG_CLIENT_UPDATE) => {}
            Some(&other) => return Err(ProtocolError::UnknownTag(other)),
        }
        if src.len() < 2 {
            return Ok(None);
        }

        let variant = src[1];
        let total = 2 + Controls::payload_len(variant)? + POSITION_SIZE;
        if src.len() < total {
            return Ok(None);
        }

        let mut body = &src[2..total];
        let controls = if variant == VARIANT_BUTTONS {
            Controls::Buttons(ButtonCounts {
                left: body.get_u8(),
                right: body.get_u8(),
                down: body.get_u8(),
                up: body.get_u8(),
            })
        } else {
            let collected = body.get_u8();
            let won = match body.get_u8() {
                0 => false,
                1 => true,
                flag => return Err(ProtocolError::InvalidWinFlag(flag)),
            };
            Controls::Progress { collected, won }
        };
        let position = Position::get(&mut body);

        src.advance(total);
        Ok(Some(ClientUpdate { controls, position }))
    }
}

/// One other player as seen by the recipient of a tick
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub name: String,
    pub position: Position,
}

impl RosterEntry {
    pub fn new(name: impl Into<String>, position: Position) -> Self {
        Self {
            name: name.into(),
            position,
        }
    }

    fn encoded_len(&self) -> usize {
        POSITION_SIZE + 1 + self.name.len() + 1
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.name.len() > MAX_NAME_LEN {
            return Err(ProtocolError::NameTooLong(self.name.len()));
        }
        if self.name.as_bytes().contains(&0) {
            return Err(ProtocolError::NameContainsNul);
        }
        Ok(())
    }
}

/// Server to client: status line plus the roster of every other player
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerTick {
    pub status: String,
    pub roster: Vec<RosterEntry>,
}

impl ServerTick {
    fn roster_section_len(&self) -> usize {
        self.roster.iter().map(RosterEntry::encoded_len).sum()
    }
}

impl Frame for ServerTick {
    const TAG: u8 = TAG_SERVER_TICK;

    fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.status.len() > MAX_U24 {
            return Err(ProtocolError::StatusTooLong(self.status.len()));
        }
        if self.roster.len() > MAX_ROSTER_ENTRIES {
            return Err(ProtocolError::TooManyEntries(self.roster.len()));
        }
        for entry in &self.roster {
            entry.validate()?;
        }

        // 255 entries of at most 268 bytes stay far below the u24 limit
        let roster_len = self.roster_section_len();
        debug_assert!(roster_len <= MAX_U24);

        dst.reserve(8 + self.status.len() + roster_len);
        dst.put_u8(Self::TAG);
        dst.put_uint(self.status.len() as u64, 3);
        dst.put_slice(self.status.as_bytes());
        dst.put_uint(roster_len as u64, 3);
        dst.put_u8(self.roster.len() as u8);
        for entry in &self.roster {
            entry.position.put(dst);
            dst.put_u8((entry.name.len() + 1) as u8);
            dst.put_slice(entry.name.as_bytes());
            dst.put_u8(0);
        }
        Ok(())
    }

    fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        match src.first() {
            None => return Ok(None),
            Some(&TAG_SERVER_TICK) => {}
            Some(&other) => return Err(ProtocolError::UnknownTag(other)),
        }
        if src.len() < 4 {
            return Ok(None);
        }

        let status_end = 4 + read_u24(&src[1..4]);
        if src.len() < status_end + 4 {
            return Ok(None);
        }
        let roster_len = read_u24(&src[status_end..status_end + 3]);
        let count = usize::from(src[status_end + 3]);
        let total = status_end + 4 + roster_len;
        if src.len() < total {
            return Ok(None);
        }

        let status = std::str::from_utf8(&src[4..status_end])
            .map_err(|_| ProtocolError::InvalidUtf8 {
                field: "status text",
            })?
            .to_owned();
        let roster = decode_roster(&src[status_end + 4..total], count)?;

        src.advance(total);
        Ok(Some(ServerTick { status, roster }))
    }
}

fn read_u24(mut bytes: &[u8]) -> usize {
    bytes.get_uint(3) as usize
}

/// Parses `count` entries that must exactly fill `section`
fn decode_roster(section: &[u8], count: usize) -> Result<Vec<RosterEntry>, ProtocolError> {
    let declared = section.len();
    let mut rest = section;
    let mut roster = Vec::with_capacity(count);

    for _ in 0..count {
        let consumed = declared - rest.len();
        if rest.len() < POSITION_SIZE + 1 {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: consumed + POSITION_SIZE + 1,
            });
        }
        let position = Position::get(&mut rest);
        let name_field = usize::from(rest.get_u8());
        if name_field == 0 {
            return Err(ProtocolError::EmptyNameField);
        }
        if rest.len() < name_field {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: consumed + POSITION_SIZE + 1 + name_field,
            });
        }

        let (field, tail) = rest.split_at(name_field);
        let (name, terminator) = field.split_at(name_field - 1);
        if terminator[0] != 0 {
            return Err(ProtocolError::MissingTerminator);
        }
        let name = std::str::from_utf8(name).map_err(|_| ProtocolError::InvalidUtf8 {
            field: "player name",
        })?;

        roster.push(RosterEntry::new(name, position));
        rest = tail;
    }

    if !rest.is_empty() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: declared - rest.len(),
        });
    }
    Ok(roster)
}

/// Either frame, dispatched on the tag byte
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ClientUpdate(ClientUpdate),
    ServerTick(ServerTick),
}

impl Message {
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            Message::ClientUpdate(update) => update.encode(dst),
            Message::ServerTick(tick) => tick.encode(dst),
        }
    }

    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        match src.first() {
            None => Ok(None),
            Some(&TAG_CLIENT_UPDATE) => Ok(ClientUpdate::decode(src)?.map(Message::ClientUpdate)),
            Some(&TAG_SERVER_TICK) => Ok(ServerTick::decode(src)?.map(Message::ServerTick)),
            Some(&other) => Err(ProtocolError::UnknownTag(other)),
        }
    }
}
