/*!
 # Wire codec for MagicStrip frames

 Commands are short opcode-prefixed byte strings written to the control
 characteristic. The device answers on the same characteristic with an
 acknowledgement preamble (`F0 02 01`) followed by a 5-byte status frame
 (`0F WW XX YY ZZ`).
*/

use std::fmt;

use uuid::Uuid;

/// Service UUID advertised by compatible strips
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);

/// Control characteristic used for both commands and notifications
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb);

/// Advertised names accepted during discovery (compared case-insensitively)
pub const HARDCODED_NAMES: &[&str] = &["HTZM"];

/// Trailer written after every command; makes the device emit an ACK
pub const TRIGGER_ACK: u8 = 0xf0;
/// Asks the device to dump its status frame
pub const QUERY_STATUS: u8 = 0x0f;
/// `03 RR GG BB`
pub const OP_COLOR: u8 = 0x03;
/// `04`
pub const OP_TOGGLE_POWER: u8 = 0x04;
/// `07 XX`
pub const OP_EFFECT: u8 = 0x07;
/// `08 BB`
pub const OP_BRIGHTNESS: u8 = 0x08;
/// `09 SS`, slowest at `00`
pub const OP_EFFECT_SPEED: u8 = 0x09;

/// Acknowledgement preamble sent by the device after a trigger write
pub const ACK_FRAME: [u8; 3] = [0xf0, 0x02, 0x01];

/// Encodes an opcode and its payload as a lowercase hex string.
pub fn encode_command(opcode: u8, payload: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(payload.len() + 1);
    bytes.push(opcode);
    bytes.extend_from_slice(payload);
    hex::encode(bytes)
}

/// A single device-bound command frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(Vec<u8>);

impl Command {
    /// Builds a command from an opcode and its payload
    pub fn new(opcode: u8, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.push(opcode);
        bytes.extend_from_slice(payload);
        Self(bytes)
    }

    /// Parses a command from its hex form, e.g. `"0701"`
    pub fn from_hex(value: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(value)?;
        if bytes.is_empty() {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        Ok(Self(bytes))
    }

    pub fn color(red: u8, green: u8, blue: u8) -> Self {
        Self::new(OP_COLOR, &[red, green, blue])
    }

    pub fn brightness(level: u8) -> Self {
        Self::new(OP_BRIGHTNESS, &[level])
    }

    /// Effect speed on the public scale, where 0 is the fastest.
    ///
    /// The device counts the other way round, so the byte on the wire is
    /// `255 - speed`.
    pub fn effect_speed(speed: u8) -> Self {
        Self::new(OP_EFFECT_SPEED, &[u8::MAX - speed])
    }

    pub fn effect(id: u8) -> Self {
        Self::new(OP_EFFECT, &[id])
    }

    pub fn toggle_power() -> Self {
        Self::new(OP_TOGGLE_POWER, &[])
    }

    pub fn trigger_ack() -> Self {
        Self::new(TRIGGER_ACK, &[])
    }

    pub fn query_status() -> Self {
        Self::new(QUERY_STATUS, &[])
    }

    pub fn opcode(&self) -> u8 {
        self.0[0]
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[1..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        encode_command(self.opcode(), self.payload())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Power and brightness as reported by a status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerStatus {
    pub on: bool,
    pub brightness: u8,
}

/// A decoded notification frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// `F0 02 01`
    Ack,
    /// `0F WW XX YY ZZ`
    Status {
        status: PowerStatus,
        /// Last used effect speed (`YY`). The device reports this even when
        /// no effect is running, so it says nothing about the current state.
        last_effect_speed: u8,
        /// Last used effect id (`ZZ`). Same caveat as `last_effect_speed`.
        last_effect_id: u8,
    },
    /// Anything else
    Unrecognized,
}

/// Classifies a raw notification payload.
pub fn decode_frame(data: &[u8]) -> Frame {
    if data == ACK_FRAME.as_slice() {
        return Frame::Ack;
    }

    match *data {
        [QUERY_STATUS, power @ (0x00 | 0x01), brightness, speed, effect_id] => {
            Frame::Status {
                status: PowerStatus {
                    on: power == 0x01,
                    brightness,
                },
                last_effect_speed: speed,
                last_effect_id: effect_id,
            }
        }
        _ => Frame::Unrecognized,
    }
}

/// Extracts power and brightness from a status frame, if `data` is one.
pub fn decode_status(data: &[u8]) -> Option<PowerStatus> {
    match decode_frame(data) {
        Frame::Status { status, .. } => Some(status),
        _ => None,
    }
}

/// Same as [`decode_status`] for a hex-encoded frame. Hex digits may be in
/// either case.
pub fn decode_status_hex(frame: &str) -> Option<PowerStatus> {
    hex::decode(frame).ok().and_then(|bytes| decode_status(&bytes))
}
