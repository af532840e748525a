//! The measurement loop.
//!
//! Each cycle ventilates the chamber, bulk-reads every channel one after the
//! other and only then converts and corrects, so nothing reduces a cycle
//! before all of its samples are in. Between cycles the loop idles for
//! whatever is left of the cycle period.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use airq_protocol::{ec, Identity};
use embedded_hal::digital::OutputPin;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{debug, error, info, instrument, warn};

use crate::bias::BiasTracker;
use crate::config::{nonzero, ChannelConfig, Protocol, StationConfig};
use crate::convert::to_output;
use crate::driver::{
    AnyDriver, Bulk, Co2Driver, Co2Reading, Driver, EcDriver, ReadError, SetupError,
};
use crate::link::{self, LinkConfig, OpenError, Port, SerialLink, SystemPort};
use crate::result::{ChannelOutcome, CycleResult, Measurement};
use crate::sink::Sink;
use crate::stop::StopSignal;
use crate::vent::Ventilation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub vent: Duration,
    pub wait: Duration,
    pub ec_iterations: NonZeroU32,
    pub ec_delay: Duration,
    pub co2_iterations: NonZeroU32,
    pub co2_delay: Duration,
    pub period: Duration,
}

impl Settings {
    pub fn from_config(config: &StationConfig) -> Self {
        Self {
            vent: config.ventilation.vent,
            wait: config.ventilation.wait,
            ec_iterations: config.sampling.ec_iterations,
            ec_delay: config.sampling.ec_delay,
            co2_iterations: config.sampling.co2_iterations,
            co2_delay: config.sampling.co2_delay,
            period: config.cycle_period,
        }
    }
}

/// One configured gas module and the corrections for its readings.
pub struct Channel<P> {
    label: String,
    /// None if the module never came up
    driver: Option<AnyDriver<P>>,
    offset: f32,
    bias: BiasTracker,
    failure_reports: DefaultDirectRateLimiter,
}

impl<P: Port> Channel<P> {
    pub fn new(label: impl Into<String>, driver: Option<AnyDriver<P>>) -> Self {
        let quota = Quota::per_hour(nonzero(4)).allow_burst(nonzero(10));
        Self {
            label: label.into(),
            driver,
            offset: 0.0,
            bias: BiasTracker::new(0.0, None),
            failure_reports: RateLimiter::direct(quota),
        }
    }

    pub fn with_offset(mut self, offset: f32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_bias(mut self, bias: BiasTracker) -> Self {
        self.bias = bias;
        self
    }

    /// Sets up the channel's driver over the link `open` returns. On failure
    /// the channel is still returned, as unavailable.
    pub fn connect_with(
        config: &ChannelConfig,
        serial: &LinkConfig,
        ec_settle: Duration,
        open: impl FnOnce(&str, &LinkConfig) -> Result<SerialLink<P>, OpenError>,
    ) -> Self {
        let driver = open(&config.path, serial)
            .map_err(SetupError::from)
            .and_then(|link| setup(link, config.protocol, ec_settle));
        let driver = match driver {
            Ok(driver) => Some(driver),
            Err(e) => {
                error!("{} is unavailable: {e}", config.label);
                None
            }
        };

        Self::new(config.label.clone(), driver)
            .with_offset(config.offset)
            .with_bias(BiasTracker::new(config.initial_bias, config.floor))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn driver_mut(&mut self) -> Option<&mut AnyDriver<P>> {
        self.driver.as_mut()
    }

    pub fn bias(&self) -> f32 {
        self.bias.bias()
    }

    fn sample(&mut self, settings: &Settings) -> Sampled {
        let Some(driver) = &mut self.driver else {
            return Sampled::Unavailable;
        };

        let sampled = match driver {
            AnyDriver::Ec(driver) => Sampled::Ec {
                identity: *driver.identity(),
                bulk: driver.read_bulk(settings.ec_iterations, settings.ec_delay),
            },
            AnyDriver::Co2(driver) => Sampled::Co2 {
                identity: *driver.identity(),
                bulk: driver.read_bulk(settings.co2_iterations, settings.co2_delay),
            },
        };
        report_failures(&self.label, &self.failure_reports, sampled.errors());
        sampled
    }

    /// Failed samples are part of the reported mean but the bias only ever
    /// learns from the samples that succeeded.
    fn measured<S>(
        &mut self,
        identity: &Identity,
        bulk: &Bulk<S>,
        concentration: impl Fn(&S) -> f32,
    ) -> ChannelOutcome {
        let (converted, unit) = to_output(identity, concentration(&bulk.mean));
        if let Some(valid) = &bulk.valid {
            let (valid, _) = to_output(identity, concentration(valid));
            self.bias.adapt(valid + self.offset);
        }

        ChannelOutcome::Measured(Measurement {
            gas: identity.gas,
            value: self.bias.apply(converted + self.offset),
            unit,
            samples: bulk.samples,
            failed: bulk.failed,
            bias: self.bias.bias(),
        })
    }
}

impl Channel<SystemPort> {
    /// Opens the configured serial port, retrying as `serial` says.
    pub fn connect(config: &ChannelConfig, serial: &LinkConfig, ec_settle: Duration) -> Self {
        Self::connect_with(config, serial, ec_settle, link::open_with_retry)
    }
}

fn setup<P: Port>(
    link: SerialLink<P>,
    protocol: Protocol,
    ec_settle: Duration,
) -> Result<AnyDriver<P>, SetupError> {
    Ok(match protocol {
        Protocol::Ec { address } => AnyDriver::Ec(EcDriver::identify(link, address, ec_settle)?),
        Protocol::Co2 { mode } => AnyDriver::Co2(Co2Driver::new(link, mode)),
    })
}

fn report_failures(label: &str, limiter: &DefaultDirectRateLimiter, errors: &[ReadError]) {
    for error in errors {
        if limiter.check().is_ok() {
            warn!("{label}: read failed, counted as zero: {error}");
        } else {
            debug!("{label}: read failed (report suppressed): {error}");
        }
    }
}

enum Sampled {
    Unavailable,
    Ec {
        identity: Identity,
        bulk: Bulk<ec::Reading>,
    },
    Co2 {
        identity: Identity,
        bulk: Bulk<Co2Reading>,
    },
}

impl Sampled {
    fn errors(&self) -> &[ReadError] {
        match self {
            Sampled::Unavailable => &[],
            Sampled::Ec { bulk, .. } => &bulk.errors,
            Sampled::Co2 { bulk, .. } => &bulk.errors,
        }
    }
}

pub struct Engine<P, V: OutputPin> {
    ventilation: Ventilation<V>,
    channels: Vec<Channel<P>>,
    settings: Settings,
}

impl<P: Port, V: OutputPin> Engine<P, V> {
    pub fn new(ventilation: Ventilation<V>, channels: Vec<Channel<P>>, settings: Settings) -> Self {
        Self {
            ventilation,
            channels,
            settings,
        }
    }

    /// Ventilates, samples every channel and reduces to a result. Failures
    /// never abort the cycle, they show up in the result.
    #[instrument(skip_all)]
    pub fn run_cycle(&mut self) -> CycleResult {
        if let Err(e) = self.ventilation.purge(self.settings.vent, self.settings.wait) {
            error!("ventilation failed, sampling without fresh air: {e:?}");
        }

        let settings = &self.settings;
        let sampled: Vec<_> = self
            .channels
            .iter_mut()
            .map(|channel| channel.sample(settings))
            .collect();
        let timestamp = jiff::Timestamp::now();

        self.reduce(sampled, timestamp)
    }

    fn reduce(
        &mut self,
        sampled: Vec<Sampled>,
        timestamp: jiff::Timestamp,
    ) -> CycleResult {
        let mut channels = BTreeMap::new();
        let mut climate = [0f64; 2];
        let mut ec_modules = 0u32;

        for (channel, sampled) in self.channels.iter_mut().zip(sampled) {
            let outcome = match sampled {
                Sampled::Unavailable => ChannelOutcome::Unavailable,
                Sampled::Ec { identity, bulk } => {
                    if let Some(valid) = &bulk.valid {
                        climate[0] += f64::from(valid.temperature);
                        climate[1] += f64::from(valid.humidity);
                        ec_modules += 1;
                    }
                    channel.measured(&identity, &bulk, |r| r.concentration)
                }
                Sampled::Co2 { identity, bulk } => {
                    channel.measured(&identity, &bulk, |r| r.filtered)
                }
            };
            channels.insert(channel.label.clone(), outcome);
        }

        // climate of modules that did answer, zeros would drag it down
        let mean =
            |sum: f64| (ec_modules > 0).then(|| (sum / f64::from(ec_modules)) as f32);
        CycleResult {
            timestamp,
            channels,
            temperature: mean(climate[0]),
            humidity: mean(climate[1]),
        }
    }

    /// Runs cycles until `stop` is requested. A stop is only looked at
    /// between cycles, a cycle in progress completes and reaches the sink.
    pub fn run(&mut self, stop: &StopSignal, sink: &mut impl Sink) {
        let unavailable = self.channels.iter().filter(|c| c.driver.is_none()).count();
        info!(
            "measuring {} channels ({unavailable} unavailable) every {:?}",
            self.channels.len(),
            self.settings.period
        );

        while !stop.is_requested() {
            let started = Instant::now();
            let result = self.run_cycle();
            sink.handle(&result);

            let idle = self.settings.period.saturating_sub(started.elapsed());
            debug!("idle for {idle:?}");
            if stop.wait(idle) {
                break;
            }
        }
        info!("measurement loop stopped");
    }
}
