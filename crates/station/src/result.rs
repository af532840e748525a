use core::fmt;
use std::collections::BTreeMap;

use airq_protocol::Gas;
use serde::{Deserialize, Serialize};

use crate::convert::OutputUnit;

/// Everything one cycle measured, handed as a whole to a [`Sink`](crate::sink::Sink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleResult {
    /// When sampling finished
    pub timestamp: jiff::Timestamp,
    /// One entry per configured channel, keyed by its label
    pub channels: BTreeMap<String, ChannelOutcome>,
    /// Mean over the measured EC modules, °C
    pub temperature: Option<f32>,
    /// Mean over the measured EC modules, % rH
    pub humidity: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelOutcome {
    /// The module never came up, nothing was sampled
    Unavailable,
    Measured(Measurement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub gas: Gas,
    /// Converted, offset and bias corrected
    pub value: f32,
    pub unit: OutputUnit,
    pub samples: u32,
    /// Samples that failed and went into the mean as zero
    pub failed: u32,
    /// Adaptive bias as applied to `value`
    pub bias: f32,
}

impl CycleResult {
    /// Every channel was measured and none of the samples failed.
    pub fn is_complete(&self) -> bool {
        !self.channels.is_empty()
            && self.channels.values().all(|outcome| match outcome {
                ChannelOutcome::Measured(m) => m.failed == 0,
                ChannelOutcome::Unavailable => false,
            })
    }

    pub fn measurement(&self, label: &str) -> Option<&Measurement> {
        match self.channels.get(label)? {
            ChannelOutcome::Measured(m) => Some(m),
            ChannelOutcome::Unavailable => None,
        }
    }

    pub fn value(&self, label: &str) -> Option<f32> {
        self.measurement(label).map(|m| m.value)
    }

    /// Label, value and unit of every measured channel.
    pub fn values(&self) -> impl Iterator<Item = (&str, f32, OutputUnit)> + '_ {
        self.channels.iter().filter_map(|(label, outcome)| match outcome {
            ChannelOutcome::Measured(m) => Some((label.as_str(), m.value, m.unit)),
            ChannelOutcome::Unavailable => None,
        })
    }
}

impl fmt::Display for CycleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.timestamp.strftime("%Y-%m-%d %H:%M:%S UTC"))?;
        for (label, outcome) in &self.channels {
            match outcome {
                ChannelOutcome::Unavailable => writeln!(f, "  {label:<8} unavailable")?,
                ChannelOutcome::Measured(m) => {
                    write!(f, "  {label:<8} {:>9.2} {}", m.value, m.unit)?;
                    if m.failed > 0 {
                        write!(f, "  ({} of {} samples failed)", m.failed, m.samples)?;
                    }
                    writeln!(f)?;
                }
            }
        }
        if let Some(temperature) = self.temperature {
            writeln!(f, "  {:<8} {temperature:>9.2} °C", "temp")?;
        }
        if let Some(humidity) = self.humidity {
            writeln!(f, "  {:<8} {humidity:>9.2} %rH", "humidity")?;
        }
        Ok(())
    }
}
