//! Protocol message definitions
//!
//! Defines the request types understood by the emulator and the binary
//! payload layout of each one.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::path::Path;

use super::CodecError;

/// Size of the two legacy reserved fields that prefix most payloads
pub const RESERVED_FIELDS_SIZE: usize = 8;

/// Request type tags. The discriminants are the values sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RequestType {
    ReadMemory = 1,
    WriteMemory = 2,
    PadState = 3,
    TouchState = 4,
    MotionState = 5,
    CircleState = 6,
    SetResolution = 7,
    SetGame = 8,
    SetOverrideControls = 9,
    Pause = 10,
    Resume = 11,
    Restart = 12,
    SetSpeedLimit = 13,
    SetBackgroundColor = 14,
}

impl RequestType {
    /// Every request type, in tag order
    pub const ALL: [RequestType; 14] = [
        RequestType::ReadMemory,
        RequestType::WriteMemory,
        RequestType::PadState,
        RequestType::TouchState,
        RequestType::MotionState,
        RequestType::CircleState,
        RequestType::SetResolution,
        RequestType::SetGame,
        RequestType::SetOverrideControls,
        RequestType::Pause,
        RequestType::Resume,
        RequestType::Restart,
        RequestType::SetSpeedLimit,
        RequestType::SetBackgroundColor,
    ];

    /// Wire tag of this request type
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Whether the reply to this request carries data for the caller
    pub fn returns_data(self) -> bool {
        self == RequestType::ReadMemory
    }
}

impl TryFrom<u32> for RequestType {
    type Error = CodecError;

    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        RequestType::ALL
            .iter()
            .copied()
            .find(|t| t.tag() == tag)
            .ok_or(CodecError::UnknownRequestType(tag))
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Pad button state, one bit per physical input.
///
/// Bit positions follow the 3DS HID register layout, so the circle pad
/// directions live in the top nibble.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Keys(u32);

impl Keys {
    pub const A: Keys = Keys(1 << 0);
    pub const B: Keys = Keys(1 << 1);
    pub const SELECT: Keys = Keys(1 << 2);
    pub const START: Keys = Keys(1 << 3);
    pub const D_RIGHT: Keys = Keys(1 << 4);
    pub const D_LEFT: Keys = Keys(1 << 5);
    pub const D_UP: Keys = Keys(1 << 6);
    pub const D_DOWN: Keys = Keys(1 << 7);
    pub const R: Keys = Keys(1 << 8);
    pub const L: Keys = Keys(1 << 9);
    pub const X: Keys = Keys(1 << 10);
    pub const Y: Keys = Keys(1 << 11);
    pub const CIRCLE_RIGHT: Keys = Keys(1 << 28);
    pub const CIRCLE_LEFT: Keys = Keys(1 << 29);
    pub const CIRCLE_UP: Keys = Keys(1 << 30);
    pub const CIRCLE_DOWN: Keys = Keys(1 << 31);

    /// Named keys, used for parsing user input
    pub const NAMED: [(&'static str, Keys); 16] = [
        ("a", Keys::A),
        ("b", Keys::B),
        ("select", Keys::SELECT),
        ("start", Keys::START),
        ("right", Keys::D_RIGHT),
        ("left", Keys::D_LEFT),
        ("up", Keys::D_UP),
        ("down", Keys::D_DOWN),
        ("r", Keys::R),
        ("l", Keys::L),
        ("x", Keys::X),
        ("y", Keys::Y),
        ("circle-right", Keys::CIRCLE_RIGHT),
        ("circle-left", Keys::CIRCLE_LEFT),
        ("circle-up", Keys::CIRCLE_UP),
        ("circle-down", Keys::CIRCLE_DOWN),
    ];

    pub const fn empty() -> Self {
        Keys(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Wraps raw bits as-is. Unassigned bits are kept, the emulator decides
    /// what to do with them.
    pub const fn from_bits(bits: u32) -> Self {
        Keys(bits)
    }

    /// Look up a key by its case-insensitive name
    pub fn from_name(name: &str) -> Option<Self> {
        Keys::NAMED
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, k)| *k)
    }

    pub fn contains(self, other: Keys) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Keys) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Keys) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Keys {
    type Output = Keys;

    fn bitor(self, rhs: Keys) -> Keys {
        Keys(self.0 | rhs.0)
    }
}

impl BitOrAssign for Keys {
    fn bitor_assign(&mut self, rhs: Keys) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Keys {
    type Output = Keys;

    fn bitand(self, rhs: Keys) -> Keys {
        Keys(self.0 & rhs.0)
    }
}

/// Which input sources the script takes over from the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverrideControls {
    pub pad: bool,
    pub touch: bool,
    pub motion: bool,
    pub circle: bool,
}

impl OverrideControls {
    pub fn all() -> Self {
        Self {
            pad: true,
            touch: true,
            motion: true,
            circle: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Accelerometer and gyroscope readings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionState {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub roll: i16,
    pub pitch: i16,
    pub yaw: i16,
}

/// All requests a client can issue
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Read `size` bytes of guest memory starting at `address`
    ReadMemory { address: u32, size: u32 },

    /// Write `data` into guest memory at `address`
    WriteMemory { address: u32, data: Bytes },

    /// Replace the pad button state
    PadState { keys: Keys },

    /// Touch screen position; `valid == false` releases the touch
    TouchState { x: i16, y: i16, valid: bool },

    MotionState(MotionState),

    /// Circle pad position
    CircleState { x: i16, y: i16 },

    /// Internal resolution factor
    SetResolution { factor: i16 },

    /// Load the game at `path` (a path on the emulator's host)
    SetGame { path: String },

    SetOverrideControls(OverrideControls),

    Pause,
    Resume,
    Restart,

    /// Emulation speed limit in percent
    SetSpeedLimit { percent: i16 },

    /// Background color components in the 0.0..=1.0 range
    SetBackgroundColor { r: f32, g: f32, b: f32 },
}

impl Request {
    /// Build a `SetGame` request. The emulator expects UTF-8 paths.
    pub fn set_game(path: impl AsRef<Path>) -> Result<Self, CodecError> {
        let path = path.as_ref();
        let path = path
            .to_str()
            .ok_or_else(|| CodecError::InvalidPath(path.to_string_lossy().into_owned()))?;
        Ok(Request::SetGame {
            path: path.to_string(),
        })
    }

    /// Get the request type tag for this request
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::ReadMemory { .. } => RequestType::ReadMemory,
            Request::WriteMemory { .. } => RequestType::WriteMemory,
            Request::PadState { .. } => RequestType::PadState,
            Request::TouchState { .. } => RequestType::TouchState,
            Request::MotionState(_) => RequestType::MotionState,
            Request::CircleState { .. } => RequestType::CircleState,
            Request::SetResolution { .. } => RequestType::SetResolution,
            Request::SetGame { .. } => RequestType::SetGame,
            Request::SetOverrideControls(_) => RequestType::SetOverrideControls,
            Request::Pause => RequestType::Pause,
            Request::Resume => RequestType::Resume,
            Request::Restart => RequestType::Restart,
            Request::SetSpeedLimit { .. } => RequestType::SetSpeedLimit,
            Request::SetBackgroundColor { .. } => RequestType::SetBackgroundColor,
        }
    }

    /// Payload size in bytes once encoded
    pub fn payload_len(&self) -> usize {
        match self {
            Request::ReadMemory { .. } => 8,
            Request::WriteMemory { data, .. } => 8 + data.len(),
            Request::PadState { .. } => RESERVED_FIELDS_SIZE + 4,
            Request::TouchState { .. } => RESERVED_FIELDS_SIZE + 5,
            Request::MotionState(_) => RESERVED_FIELDS_SIZE + 12,
            Request::CircleState { .. } => RESERVED_FIELDS_SIZE + 4,
            Request::SetResolution { .. } => RESERVED_FIELDS_SIZE + 2,
            Request::SetGame { path } => RESERVED_FIELDS_SIZE + path.len(),
            Request::SetOverrideControls(_) => RESERVED_FIELDS_SIZE + 4,
            Request::Pause | Request::Resume | Request::Restart => RESERVED_FIELDS_SIZE,
            Request::SetSpeedLimit { .. } => RESERVED_FIELDS_SIZE + 2,
            Request::SetBackgroundColor { .. } => RESERVED_FIELDS_SIZE + 12,
        }
    }

    /// Encode the payload into a buffer.
    ///
    /// Nothing is written when an error is returned.
    pub fn encode_payload(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        let len = self.payload_len();
        if u32::try_from(len).is_err() {
            return Err(CodecError::PayloadTooLarge(len));
        }
        buf.reserve(len);

        match self {
            Request::ReadMemory { address, size } => {
                buf.put_u32_le(*address);
                buf.put_u32_le(*size);
            }
            Request::WriteMemory { address, data } => {
                buf.put_u32_le(*address);
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            Request::PadState { keys } => {
                put_reserved(buf);
                buf.put_u32_le(keys.bits());
            }
            Request::TouchState { x, y, valid } => {
                put_reserved(buf);
                buf.put_i16_le(*x);
                buf.put_i16_le(*y);
                buf.put_u8(*valid as u8);
            }
            Request::MotionState(m) => {
                put_reserved(buf);
                for v in [m.x, m.y, m.z, m.roll, m.pitch, m.yaw] {
                    buf.put_i16_le(v);
                }
            }
            Request::CircleState { x, y } => {
                put_reserved(buf);
                buf.put_i16_le(*x);
                buf.put_i16_le(*y);
            }
            Request::SetResolution { factor } => {
                put_reserved(buf);
                buf.put_i16_le(*factor);
            }
            Request::SetGame { path } => {
                put_reserved(buf);
                // Not NUL-terminated; the header length bounds the string
                buf.put_slice(path.as_bytes());
            }
            Request::SetOverrideControls(c) => {
                put_reserved(buf);
                buf.put_u8(c.pad as u8);
                buf.put_u8(c.touch as u8);
                buf.put_u8(c.motion as u8);
                buf.put_u8(c.circle as u8);
            }
            Request::Pause | Request::Resume | Request::Restart => {
                put_reserved(buf);
            }
            Request::SetSpeedLimit { percent } => {
                put_reserved(buf);
                buf.put_i16_le(*percent);
            }
            Request::SetBackgroundColor { r, g, b } => {
                put_reserved(buf);
                buf.put_f32_le(*r);
                buf.put_f32_le(*g);
                buf.put_f32_le(*b);
            }
        }

        Ok(())
    }
}

fn put_reserved(buf: &mut BytesMut) {
    buf.put_u32_le(0);
    buf.put_u32_le(0);
}
