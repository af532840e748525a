//! The station's configuration file, in RON.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use airq_protocol::ec::Address;
use color_eyre::eyre::{bail, eyre, Context};
use color_eyre::{Result, Section};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::driver::Co2Mode;
use crate::link::LinkConfig;

/// Only for constants, fails to compile on zero.
pub(crate) const fn nonzero(n: u32) -> NonZeroU32 {
    match NonZeroU32::new(n) {
        Some(n) => n,
        None => panic!("must not be zero"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub ventilation: VentilationConfig,
    pub sampling: SamplingConfig,
    /// Time from the start of one cycle to the start of the next
    pub cycle_period: Duration,
    /// Shared by all serial links
    pub serial: LinkConfig,
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VentilationConfig {
    pub chip: String,
    pub line: u32,
    pub vent: Duration,
    pub wait: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub ec_iterations: NonZeroU32,
    pub ec_delay: Duration,
    /// Between sending a command to an EC module and reading its answer
    pub ec_settle: Duration,
    pub co2_iterations: NonZeroU32,
    pub co2_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Name of the channel in the cycle results
    pub label: String,
    pub path: String,
    pub protocol: Protocol,
    /// Added to every converted value
    #[serde(default)]
    pub offset: f32,
    /// Enables the adaptive bias: corrected values are never below this
    #[serde(default)]
    pub floor: Option<f32>,
    #[serde(default)]
    pub initial_bias: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Ec { address: Address },
    Co2 {
        #[serde(default)]
        mode: Co2Mode,
    },
}

impl Default for VentilationConfig {
    fn default() -> Self {
        Self {
            chip: "/dev/gpiochip0".to_owned(),
            line: 27,
            vent: Duration::from_secs(10),
            wait: Duration::from_secs(1),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            ec_iterations: nonzero(5),
            ec_delay: Duration::from_millis(100),
            ec_settle: Duration::from_millis(100),
            co2_iterations: nonzero(3),
            co2_delay: Duration::from_millis(500),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        let ec = |label: &str, path: &str, address| ChannelConfig {
            label: label.to_owned(),
            path: path.to_owned(),
            protocol: Protocol::Ec {
                address: Address(address),
            },
            offset: 0.0,
            floor: None,
            initial_bias: 0.0,
        };

        Self {
            ventilation: VentilationConfig::default(),
            sampling: SamplingConfig::default(),
            cycle_period: Duration::from_secs(15),
            serial: LinkConfig::default(),
            channels: vec![
                ec("O3", "/dev/ttyS0", 0),
                ec("CO", "/dev/ttyAMA1", 0),
                ec("NO2", "/dev/ttyAMA2", 1),
                ChannelConfig {
                    label: "CO2".to_owned(),
                    path: "/dev/ttyAMA3".to_owned(),
                    protocol: Protocol::Co2 {
                        mode: Co2Mode::Polled,
                    },
                    offset: 0.0,
                    floor: Some(420.0),
                    initial_bias: 0.0,
                },
            ],
        }
    }
}

impl StationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(eyre!("No configuration at {}", path.display()))
                    .suggestion("write the defaults there with: air-station default-config");
            }
            Err(e) => {
                return Err(e)
                    .wrap_err("Could not read configuration")
                    .with_note(|| format!("path: {}", path.display()))
            }
        };
        let config: Self = ron::from_str(&text)
            .wrap_err("Could not parse configuration")
            .with_note(|| format!("path: {}", path.display()))?;
        config
            .validate()
            .with_note(|| format!("path: {}", path.display()))?;
        Ok(config)
    }

    pub fn to_ron(&self) -> Result<String> {
        let pretty = ron::ser::PrettyConfig::new().struct_names(true);
        ron::ser::to_string_pretty(self, pretty).wrap_err("Could not serialize configuration")
    }

    /// Rejects what can not work and warns about what probably will not.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            bail!("No channels configured");
        }

        let mut labels = HashSet::new();
        let mut paths = HashSet::new();
        for channel in &self.channels {
            if !labels.insert(channel.label.as_str()) {
                bail!("Channel label {} is used twice", channel.label);
            }
            if !paths.insert(channel.path.as_str()) {
                return Err(eyre!("Serial port {} is used by two channels", channel.path))
                    .note("every module needs a serial link of its own");
            }
        }

        let settle = self.sampling.ec_settle;
        if settle < Duration::from_millis(10) || settle > Duration::from_millis(100) {
            warn!("EC settle delay of {settle:?} is outside the 10-100ms the modules need");
        }
        let purge = self.ventilation.vent + self.ventilation.wait;
        if purge >= self.cycle_period {
            warn!(
                "ventilating takes {purge:?}, longer than the cycle period of {:?}, \
                cycles will run back to back",
                self.cycle_period
            );
        }
        Ok(())
    }
}
