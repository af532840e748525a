//! Binary protocol of the electrochemical (EC) gas modules.
//!
//! A module answers the single byte [`IDENTIFY`] with an 8 byte description
//! of itself. Every other command is a 9 byte frame:
//!
//! ```text
//! FF <address> <command> 00 00 00 00 00 <checksum>
//! ```
//!
//! There is no framing or checksum on the responses. A response is only
//! recognised by its length, which is why the station discards anything
//! left in the receive buffer after every exchange.

use serde::{Deserialize, Serialize};

use crate::{Gas, Identity, Unit};

pub const IDENTIFY: u8 = 0xD1;
pub const IDENTITY_LEN: usize = 8;
pub const FRAME_LEN: usize = 9;
pub const READING_LEN: usize = 13;

const START: u8 = 0xFF;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Response too short, expected {expected} bytes got {got}")]
    TooShort { expected: usize, got: usize },
    #[error("Unknown sensor type: {0:#04x}")]
    UnknownSensorType(u8),
    #[error("Unknown unit: {0:#03x}")]
    UnknownUnit(u8),
}

/// Modules exist that listen on address 0 and modules that listen on
/// address 1. Which one is attached is a property of the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Gas concentration, temperature and humidity in one response
    ReadAll,
    LedOn,
    LedOff,
}

impl Command {
    const fn code(self) -> u8 {
        match self {
            Command::ReadAll => 0x87,
            Command::LedOn => 0x89,
            Command::LedOff => 0x88,
        }
    }

    #[must_use]
    pub fn frame(self, address: Address) -> [u8; FRAME_LEN] {
        let mut frame = [START, address.0, self.code(), 0, 0, 0, 0, 0, 0];
        frame[FRAME_LEN - 1] = checksum(&frame);
        frame
    }

    /// Whether the module answers this command.
    #[must_use]
    pub const fn has_response(self) -> bool {
        matches!(self, Command::ReadAll)
    }
}

/// Two's complement of the sum of everything between the start byte and
/// the checksum itself.
#[must_use]
pub fn checksum(frame: &[u8; FRAME_LEN]) -> u8 {
    let sum = frame[1..FRAME_LEN - 1]
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
    (!sum).wrapping_add(1)
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<&[u8; N], Error> {
    bytes
        .get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::TooShort {
            expected: N,
            got: bytes.len(),
        })
}

/// Layout: type code, max value (big endian u16), unit code, three unused
/// bytes and the decimal exponent in the upper nibble of the last byte.
pub fn decode_identity(bytes: &[u8]) -> Result<Identity, Error> {
    let bytes = fixed::<IDENTITY_LEN>(bytes)?;
    let gas = Gas::from_ec_code(bytes[0]).ok_or(Error::UnknownSensorType(bytes[0]))?;
    let unit = Unit::from_ec_code(bytes[3]).ok_or(Error::UnknownUnit(bytes[3]))?;

    Ok(Identity {
        gas,
        unit,
        max_value: u16::from_be_bytes([bytes[1], bytes[2]]),
        decimal_exponent: bytes[7] >> 4,
    })
}

/// Inverse of [`decode_identity`], what a module sends back on [`IDENTIFY`].
/// Returns `None` for gases that are not measured by an EC module.
#[must_use]
pub fn encode_identity(identity: &Identity) -> Option<[u8; IDENTITY_LEN]> {
    let [max_hi, max_lo] = identity.max_value.to_be_bytes();
    Some([
        identity.gas.ec_code()?,
        max_hi,
        max_lo,
        identity.unit.ec_code(),
        0,
        0,
        0,
        (identity.decimal_exponent & 0x0F) << 4,
    ])
}

/// One poll of an EC module
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Reading {
    /// In the unit the module reported during identification
    pub concentration: f32,
    /// °C
    pub temperature: f32,
    /// % rH
    pub humidity: f32,
}

impl Reading {
    pub fn decode(bytes: &[u8], decimal_exponent: u8) -> Result<Self, Error> {
        let bytes = fixed::<READING_LEN>(bytes)?;
        let word = |at: usize| f32::from(u16::from_be_bytes([bytes[at], bytes[at + 1]]));

        Ok(Self {
            concentration: word(7) / 10f32.powi(i32::from(decimal_exponent)),
            temperature: word(9) / 100.0,
            humidity: word(11) / 100.0,
        })
    }
}

/// Builds a response as a module would send it for [`Command::ReadAll`].
/// The bytes before the gas value carry nothing this crate reads, they are
/// filled with the command echo.
#[must_use]
pub fn encode_reading(raw_gas: u16, raw_temperature: u16, raw_humidity: u16) -> [u8; READING_LEN] {
    let mut response = [0u8; READING_LEN];
    response[0] = START;
    response[1] = Command::ReadAll.code();
    response[7..9].copy_from_slice(&raw_gas.to_be_bytes());
    response[9..11].copy_from_slice(&raw_temperature.to_be_bytes());
    response[11..13].copy_from_slice(&raw_humidity.to_be_bytes());
    response
}
