//! Sensor-native concentrations to the units the station reports.

use core::fmt;

use airq_protocol::{Gas, Identity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputUnit {
    MicrogramPerM3,
    MilligramPerM3,
    Ppm,
}

impl fmt::Display for OutputUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self {
            OutputUnit::MicrogramPerM3 => "µg/m³",
            OutputUnit::MilligramPerM3 => "mg/m³",
            OutputUnit::Ppm => "ppm",
        };
        f.write_str(unit)
    }
}

/// Mass per volume for one ppb of the gas at the station's reference
/// conditions.
const O3_UG_PER_PPB: f64 = 1.96;
const NO2_UG_PER_PPB: f64 = 1.88;
const CO_MG_PER_PPM: f64 = 1.15;

/// Converts `value`, in the unit given by `identity`, to the reported unit of
/// its gas.
pub fn to_output(identity: &Identity, value: f32) -> (f32, OutputUnit) {
    let ppb = f64::from(value) * identity.unit.ppb();
    let (converted, unit) = match identity.gas {
        Gas::O3 => (ppb * O3_UG_PER_PPB, OutputUnit::MicrogramPerM3),
        Gas::NO2 => (ppb * NO2_UG_PER_PPB, OutputUnit::MicrogramPerM3),
        Gas::CO => (ppb / 1000.0 * CO_MG_PER_PPM, OutputUnit::MilligramPerM3),
        Gas::CO2 => (ppb / 1000.0, OutputUnit::Ppm),
    };
    (converted as f32, unit)
}
