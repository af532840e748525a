//! ASCII protocol of the COZIR CO₂ module.
//!
//! In polled mode the module answers `Z\r\n` with ` Z 00420\r\n` (filtered)
//! and `z\r\n` with ` z 00415\r\n` (unfiltered). In streaming mode it
//! sends lines like ` Z 00420 z 00415\r\n` on its own.

use core::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{Gas, Identity, Unit};

pub const EOL: &[u8] = b"\r\n";

/// The module has no identification exchange
pub const IDENTITY: Identity = Identity {
    gas: Gas::CO2,
    unit: Unit::Ppm,
    max_value: 5000,
    decimal_exponent: 0,
};

const FIRST: Range<usize> = 3..8;
const SECOND: Range<usize> = 11..16;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Line too short, need {needed} characters got {got}")]
    TooShort { needed: usize, got: usize },
    #[error("Expected a {expected} field, line starts with: {got:?}")]
    WrongField { expected: char, got: char },
    #[error("Not a number: {0:?}")]
    NotANumber(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Field {
    Filtered,
    Unfiltered,
}

impl Field {
    const fn letter(self) -> u8 {
        match self {
            Field::Filtered => b'Z',
            Field::Unfiltered => b'z',
        }
    }

    #[must_use]
    pub const fn poll_command(self) -> &'static [u8] {
        match self {
            Field::Filtered => b"Z\r\n",
            Field::Unfiltered => b"z\r\n",
        }
    }
}

fn letter_at(line: &[u8], at: usize, field: Field) -> Result<(), Error> {
    let got = *line.get(at).ok_or(Error::TooShort {
        needed: at + 1,
        got: line.len(),
    })?;
    if got == field.letter() {
        Ok(())
    } else {
        Err(Error::WrongField {
            expected: char::from(field.letter()),
            got: char::from(got),
        })
    }
}

fn number(line: &[u8], window: Range<usize>) -> Result<u32, Error> {
    let digits = line.get(window.clone()).ok_or(Error::TooShort {
        needed: window.end,
        got: line.len(),
    })?;
    core::str::from_utf8(digits)
        .ok()
        .and_then(|digits| digits.trim().parse().ok())
        .ok_or_else(|| Error::NotANumber(String::from_utf8_lossy(digits).into_owned()))
}

/// Parses the answer to [`Field::poll_command`].
pub fn parse_polled(line: &[u8], field: Field) -> Result<u32, Error> {
    letter_at(line, 1, field)?;
    number(line, FIRST)
}

/// Parses a streamed line, returns `(filtered, unfiltered)`.
pub fn parse_streamed(line: &[u8]) -> Result<(u32, u32), Error> {
    letter_at(line, 1, Field::Filtered)?;
    letter_at(line, 9, Field::Unfiltered)?;
    Ok((number(line, FIRST)?, number(line, SECOND)?))
}
