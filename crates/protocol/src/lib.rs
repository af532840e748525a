#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

//! Wire formats of the gas modules attached to the station. Nothing in here
//! does any I/O, the station crate owns the serial links.

use core::fmt::Display;

use serde::{Deserialize, Serialize};

pub mod cozir;
pub mod ec;

#[derive(
    strum::EnumString,
    strum::VariantNames,
    strum::Display,
    Clone,
    Copy,
    Debug,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub enum Gas {
    NO2,
    O3,
    CO,
    CO2,
}

impl Gas {
    /// Sensor type byte an EC module reports in its identification frame.
    #[must_use]
    pub const fn from_ec_code(code: u8) -> Option<Self> {
        match code {
            0x21 => Some(Self::NO2),
            0x23 => Some(Self::O3),
            0x19 => Some(Self::CO),
            _ => None,
        }
    }

    #[must_use]
    pub const fn ec_code(self) -> Option<u8> {
        match self {
            Self::NO2 => Some(0x21),
            Self::O3 => Some(0x23),
            Self::CO => Some(0x19),
            Self::CO2 => None,
        }
    }
}

/// Native unit a module reports its concentration in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Unit {
    Ppm,
    Ppb,
    Percent,
}

impl Unit {
    #[must_use]
    pub const fn from_ec_code(code: u8) -> Option<Self> {
        match code {
            0x2 => Some(Self::Ppm),
            0x4 => Some(Self::Ppb),
            0x8 => Some(Self::Percent),
            _ => None,
        }
    }

    #[must_use]
    pub const fn ec_code(self) -> u8 {
        match self {
            Self::Ppm => 0x2,
            Self::Ppb => 0x4,
            Self::Percent => 0x8,
        }
    }

    /// How many parts per billion one of this unit is.
    #[must_use]
    pub const fn ppb(self) -> f64 {
        match self {
            Self::Ppm => 1_000.0,
            Self::Ppb => 1.0,
            Self::Percent => 10_000_000.0,
        }
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Unit::Ppm => f.write_str("ppm"),
            Unit::Ppb => f.write_str("ppb"),
            Unit::Percent => f.write_str("%"),
        }
    }
}

/// What a module told us about itself. Fixed for as long as the driver
/// lives, it is never queried again mid run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub gas: Gas,
    pub unit: Unit,
    /// Largest concentration the module can measure, in `unit`
    pub max_value: u16,
    /// Raw concentrations are divided by `10^decimal_exponent`, 0..=15
    pub decimal_exponent: u8,
}

impl Display for Identity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} sensor, range 0-{}{}, resolution 1e-{}",
            self.gas, self.max_value, self.unit, self.decimal_exponent
        )
    }
}
