use airq_protocol::cozir::{self, Field};
use airq_protocol::Identity;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Average, Driver, Failed, ReadError};
use crate::link::{Port, SerialLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Co2Mode {
    /// Ask for each value, one command per value
    #[default]
    Polled,
    /// The module sends both values on its own, line after line
    Streaming,
}

/// ppm
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Co2Reading {
    pub filtered: f32,
    pub unfiltered: f32,
}

impl Average for Co2Reading {
    type Sum = [f64; 2];

    fn accumulate(sum: &mut Self::Sum, sample: &Self) {
        sum[0] += f64::from(sample.filtered);
        sum[1] += f64::from(sample.unfiltered);
    }

    fn mean(sum: &Self::Sum, count: u32) -> Self {
        let count = f64::from(count.max(1));
        Self {
            filtered: (sum[0] / count) as f32,
            unfiltered: (sum[1] / count) as f32,
        }
    }
}

pub struct Co2Driver<P> {
    link: SerialLink<P>,
    mode: Co2Mode,
}

impl<P: Port> Co2Driver<P> {
    /// The module has no identification exchange, unit and range are fixed.
    pub fn new(link: SerialLink<P>, mode: Co2Mode) -> Self {
        info!("{} at {} ({mode:?})", cozir::IDENTITY, link.path());
        Self { link, mode }
    }

    pub fn link(&self) -> &SerialLink<P> {
        &self.link
    }

    fn poll(&mut self, field: Field) -> Result<f32, ReadError> {
        let line = self.link.exchange(|link| {
            link.write(field.poll_command())?;
            link.read_until(cozir::EOL)
        })?;
        Ok(cozir::parse_polled(&line, field)? as f32)
    }

    fn next_streamed(&mut self) -> Result<Co2Reading, ReadError> {
        let line = self.link.exchange(|link| {
            // we may have started listening halfway through a line
            link.read_until(cozir::EOL)?;
            link.read_until(cozir::EOL)
        })?;

        let (filtered, unfiltered) = cozir::parse_streamed(&line)?;
        Ok(Co2Reading {
            filtered: filtered as f32,
            unfiltered: unfiltered as f32,
        })
    }

    /// Each value has its own round trip so losing one keeps the other.
    fn read_polled(&mut self) -> Result<Co2Reading, Failed<Co2Reading>> {
        let unfiltered = self.poll(Field::Unfiltered);
        let filtered = self.poll(Field::Filtered);

        match (filtered, unfiltered) {
            (Ok(filtered), Ok(unfiltered)) => Ok(Co2Reading {
                filtered,
                unfiltered,
            }),
            (Ok(filtered), Err(error)) => Err(Failed {
                sentinel: Co2Reading {
                    filtered,
                    unfiltered: 0.0,
                },
                error,
            }),
            (Err(error), Ok(unfiltered)) => Err(Failed {
                sentinel: Co2Reading {
                    filtered: 0.0,
                    unfiltered,
                },
                error,
            }),
            (Err(error), Err(also)) => {
                debug!("unfiltered CO2 lost as well: {also}");
                Err(Failed::zeroed(error))
            }
        }
    }
}

impl<P: Port> Driver for Co2Driver<P> {
    type Sample = Co2Reading;

    fn identity(&self) -> &Identity {
        &cozir::IDENTITY
    }

    fn read_single(&mut self) -> Result<Co2Reading, Failed<Co2Reading>> {
        let reading = match self.mode {
            Co2Mode::Polled => self.read_polled(),
            Co2Mode::Streaming => self.next_streamed().map_err(Failed::zeroed),
        };
        debug!(?reading, "read CO2");
        reading
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    use super::*;
    use crate::link;

    #[derive(Default)]
    struct Cozir {
        filtered: Option<&'static [u8]>,
        unfiltered: Option<&'static [u8]>,
        stream: &'static [u8],
        rx: VecDeque<u8>,
    }

    impl Read for Cozir {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.rx.is_empty() {
                self.rx.extend(self.stream);
            }
            if self.rx.is_empty() {
                return Err(io::ErrorKind::TimedOut.into());
            }
            let n = buf.len().min(self.rx.len());
            for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for Cozir {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let answer = match buf {
                b"Z\r\n" => self.filtered,
                b"z\r\n" => self.unfiltered,
                _ => None,
            };
            self.rx.extend(answer.unwrap_or_default());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Port for Cozir {
        fn discard_input(&mut self) -> io::Result<()> {
            self.rx.clear();
            Ok(())
        }
    }

    fn driver(module: Cozir, mode: Co2Mode) -> Co2Driver<Cozir> {
        let link = SerialLink::new(module, "/dev/ttyAMA3", Duration::from_secs(1));
        Co2Driver::new(link, mode)
    }

    #[test]
    fn polled_reading() {
        let module = Cozir {
            filtered: Some(b" Z 00390\r\n"),
            unfiltered: Some(b" z 00402\r\n"),
            ..Cozir::default()
        };
        let reading = driver(module, Co2Mode::Polled).read_single().unwrap();
        assert_eq!(
            reading,
            Co2Reading {
                filtered: 390.0,
                unfiltered: 402.0
            }
        );
    }

    #[test]
    fn losing_one_value_keeps_the_other() {
        let module = Cozir {
            filtered: Some(b" Z 00390\r\n"),
            unfiltered: None,
            ..Cozir::default()
        };
        let failed = driver(module, Co2Mode::Polled).read_single().unwrap_err();
        assert_eq!(failed.sentinel.filtered, 390.0);
        assert_eq!(failed.sentinel.unfiltered, 0.0);
        assert!(matches!(
            failed.error,
            ReadError::Link(link::Error::NoDelimiter { got: 0 })
        ));

        let module = Cozir {
            filtered: Some(b" Z 0o390\r\n"),
            unfiltered: Some(b" z 00402\r\n"),
            ..Cozir::default()
        };
        let failed = driver(module, Co2Mode::Polled).read_single().unwrap_err();
        assert_eq!(failed.sentinel.filtered, 0.0);
        assert_eq!(failed.sentinel.unfiltered, 402.0);
        assert!(matches!(failed.error, ReadError::Co2(cozir::Error::NotANumber(_))));
    }

    #[test]
    fn dead_module_reports_one_failure() {
        let failed = driver(Cozir::default(), Co2Mode::Polled)
            .read_single()
            .unwrap_err();
        assert_eq!(failed.sentinel, Co2Reading::default());
        assert!(matches!(
            failed.error,
            ReadError::Link(link::Error::NoDelimiter { got: 0 })
        ));
    }

    #[test]
    fn streamed_reading_skips_partial_line() {
        let module = Cozir {
            stream: b"0415\r\n Z 00420 z 00415\r\n",
            ..Cozir::default()
        };
        let reading = driver(module, Co2Mode::Streaming).read_single().unwrap();
        assert_eq!(
            reading,
            Co2Reading {
                filtered: 420.0,
                unfiltered: 415.0
            }
        );
    }

    #[test]
    fn identity_is_fixed() {
        let driver = driver(Cozir::default(), Co2Mode::Polled);
        assert_eq!(driver.identity().gas, airq_protocol::Gas::CO2);
        assert_eq!(driver.identity().max_value, 5000);
    }
}
