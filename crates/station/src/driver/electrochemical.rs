use std::thread;
use std::time::Duration;

use airq_protocol::ec::{self, Address, Command};
use airq_protocol::Identity;
use tracing::{debug, info, instrument};

use super::{Driver, Failed, ReadError, SetupError};
use crate::link::{self, Port, SerialLink};

pub struct EcDriver<P> {
    link: SerialLink<P>,
    identity: Identity,
    address: Address,
    /// Time the module needs between a command and its answer
    settle: Duration,
}

impl<P: Port> EcDriver<P> {
    /// Asks the module what it is. A module reporting a sensor type or unit
    /// we do not know is refused.
    #[instrument(skip(link), fields(path = link.path()))]
    pub fn identify(
        mut link: SerialLink<P>,
        address: Address,
        settle: Duration,
    ) -> Result<Self, SetupError> {
        link.flush()?;
        let response = link.exchange(|link| {
            link.write(&[ec::IDENTIFY])?;
            thread::sleep(settle);
            link.read_exact(ec::IDENTITY_LEN)
        })?;

        let identity = ec::decode_identity(&response)?;
        info!("{identity} at {}", link.path());

        Ok(Self {
            link,
            identity,
            address,
            settle,
        })
    }

    pub fn link(&self) -> &SerialLink<P> {
        &self.link
    }

    /// Fire and forget, the module does not answer.
    pub fn set_led(&mut self, on: bool) -> Result<(), link::Error> {
        let command = if on { Command::LedOn } else { Command::LedOff };
        debug_assert!(!command.has_response());
        let frame = command.frame(self.address);
        self.link.exchange(|link| link.write(&frame))
    }

    fn poll(&mut self) -> Result<ec::Reading, ReadError> {
        let frame = Command::ReadAll.frame(self.address);
        let settle = self.settle;
        let response = self.link.exchange(|link| {
            link.write(&frame)?;
            thread::sleep(settle);
            link.read_exact(ec::READING_LEN)
        })?;

        let reading = ec::Reading::decode(&response, self.identity.decimal_exponent)?;
        debug!(?reading, "read {}", self.identity.gas);
        Ok(reading)
    }
}

impl<P: Port> Driver for EcDriver<P> {
    type Sample = ec::Reading;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn read_single(&mut self) -> Result<ec::Reading, Failed<ec::Reading>> {
        self.poll().map_err(Failed::zeroed)
    }
}
