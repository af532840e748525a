//! The fan that pushes fresh air through the sensing chamber.

use std::thread;
use std::time::Duration;

use embedded_hal::digital::{OutputPin, PinState};
use tracing::{debug, warn};

/// Owns the pin driving the fan, high is running.
pub struct Ventilation<P: OutputPin> {
    pin: P,
}

pub type GpioPin = gpiocdev_embedded_hal::OutputPin;

/// The line is requested low so the fan does not start before the first purge.
pub fn open_gpio(
    chip: &str,
    line: u32,
) -> Result<Ventilation<GpioPin>, gpiocdev_embedded_hal::Error> {
    let pin = GpioPin::new(chip, line, PinState::Low)?;
    debug!("opened gpio {line} on {chip}");
    Ventilation::new(pin)
}

impl<P: OutputPin> Ventilation<P> {
    pub fn new(mut pin: P) -> Result<Self, P::Error> {
        pin.set_low()?;
        Ok(Self { pin })
    }

    /// Runs the fan for `vent` then lets the air settle for `wait`. Always
    /// takes the full time, there is no feedback on the airflow.
    pub fn purge(&mut self, vent: Duration, wait: Duration) -> Result<(), P::Error> {
        debug!("ventilating for {vent:?}");
        self.pin.set_high()?;
        thread::sleep(vent);
        let stopped = self.pin.set_low();
        thread::sleep(wait);
        stopped
    }

    /// Switches the fan on and off `pulses` times, ends with the fan off.
    pub fn pulse(&mut self, pulses: u32, on: Duration, off: Duration) -> Result<(), P::Error> {
        for pulse in 1..=pulses {
            debug!("pulse {pulse}/{pulses}");
            self.purge(on, off)?;
        }
        Ok(())
    }
}

impl<P: OutputPin> Drop for Ventilation<P> {
    fn drop(&mut self) {
        if let Err(e) = self.pin.set_low() {
            warn!("could not switch the fan off: {e:?}");
        }
    }
}
