//! Drivers for the two kinds of gas module on the station.
//!
//! Both take exclusive ownership of a [`SerialLink`](crate::link::SerialLink). Which one a channel
//! uses is decided by its configuration, never by probing the module.

use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

use airq_protocol::{cozir, ec, Identity};

use crate::link::{self, OpenError, Port};

mod co2;
mod electrochemical;

pub use co2::{Co2Driver, Co2Mode, Co2Reading};
pub use electrochemical::EcDriver;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Connection(#[from] OpenError),
    #[error("Identification exchange failed: {0}")]
    Link(#[from] link::Error),
    #[error("Module refused: {0}")]
    Identify(#[from] ec::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("Serial link failed: {0}")]
    Link(#[from] link::Error),
    #[error("Could not decode EC response: {0}")]
    Ec(#[from] ec::Error),
    #[error("Could not parse CO2 line: {0}")]
    Co2(#[from] cozir::Error),
}

/// A single read that went wrong. `sentinel` is what goes into the average
/// instead: zeros, except for the parts of the reading that were recovered.
#[derive(Debug)]
pub struct Failed<S> {
    pub sentinel: S,
    pub error: ReadError,
}

impl<S: Default> Failed<S> {
    pub fn zeroed(error: impl Into<ReadError>) -> Self {
        Self {
            sentinel: S::default(),
            error: error.into(),
        }
    }
}

/// Arithmetic mean over samples, accumulated in f64 so the order in
/// which the samples arrive does not matter.
pub trait Average: Sized {
    type Sum: Default;
    fn accumulate(sum: &mut Self::Sum, sample: &Self);
    fn mean(sum: &Self::Sum, count: u32) -> Self;
}

impl Average for ec::Reading {
    type Sum = [f64; 3];

    fn accumulate(sum: &mut Self::Sum, sample: &Self) {
        sum[0] += f64::from(sample.concentration);
        sum[1] += f64::from(sample.temperature);
        sum[2] += f64::from(sample.humidity);
    }

    fn mean(sum: &Self::Sum, count: u32) -> Self {
        let count = f64::from(count.max(1));
        Self {
            concentration: (sum[0] / count) as f32,
            temperature: (sum[1] / count) as f32,
            humidity: (sum[2] / count) as f32,
        }
    }
}

/// The result of a bulk read. Failed reads are part of the mean as their
/// sentinel and counted in `failed`.
#[derive(Debug)]
pub struct Bulk<S> {
    pub mean: S,
    /// Mean over the reads that succeeded, None if none did
    pub valid: Option<S>,
    pub samples: u32,
    pub failed: u32,
    pub errors: Vec<ReadError>,
}

pub fn average<S: Average>(
    reads: impl IntoIterator<Item = Result<S, Failed<S>>>,
) -> Bulk<S> {
    let mut sum = S::Sum::default();
    let mut valid_sum = S::Sum::default();
    let mut samples = 0;
    let mut failed = 0;
    let mut errors = Vec::new();

    for read in reads {
        samples += 1;
        match read {
            Ok(sample) => {
                S::accumulate(&mut sum, &sample);
                S::accumulate(&mut valid_sum, &sample);
            }
            Err(Failed { sentinel, error }) => {
                S::accumulate(&mut sum, &sentinel);
                failed += 1;
                errors.push(error);
            }
        }
    }

    let succeeded = samples - failed;
    Bulk {
        mean: S::mean(&sum, samples),
        valid: (succeeded > 0).then(|| S::mean(&valid_sum, succeeded)),
        samples,
        failed,
        errors,
    }
}

pub trait Driver {
    type Sample: Average;

    /// Established once when the driver was constructed.
    fn identity(&self) -> &Identity;
    fn read_single(&mut self) -> Result<Self::Sample, Failed<Self::Sample>>;

    /// `iterations` single reads with `delay` after each, averaged.
    fn read_bulk(&mut self, iterations: NonZeroU32, delay: Duration) -> Bulk<Self::Sample> {
        let reads: Vec<_> = (0..iterations.get())
            .map(|_| {
                let read = self.read_single();
                thread::sleep(delay);
                read
            })
            .collect();
        average(reads)
    }
}

/// The driver a channel was configured with
pub enum AnyDriver<P> {
    Ec(EcDriver<P>),
    Co2(Co2Driver<P>),
}

impl<P: Port> AnyDriver<P> {
    pub fn identity(&self) -> &Identity {
        match self {
            AnyDriver::Ec(driver) => driver.identity(),
            AnyDriver::Co2(driver) => driver.identity(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            AnyDriver::Ec(driver) => driver.link().path(),
            AnyDriver::Co2(driver) => driver.link().path(),
        }
    }
}
