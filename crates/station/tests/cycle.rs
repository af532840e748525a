use std::collections::VecDeque;
use std::convert::Infallible;
use std::io::{self, Read, Write};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use air_station::bias::BiasTracker;
use air_station::config::{ChannelConfig, Protocol};
use air_station::convert::OutputUnit;
use air_station::driver::{AnyDriver, Co2Driver, Co2Mode, EcDriver};
use air_station::link::{self, LinkConfig, Port, SerialLink};
use air_station::vent::Ventilation;
use air_station::{logging, Channel, ChannelOutcome, CycleResult, Engine, Settings, StopSignal};
use airq_protocol::ec::{self, Address, Command};
use airq_protocol::{Gas, Identity, Unit};
use embedded_hal::digital::{ErrorType, OutputPin};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Fan(bool),
    Sent(&'static str),
}

type Log = Arc<Mutex<Vec<Event>>>;

fn events(log: &Log) -> Vec<Event> {
    log.lock().unwrap().clone()
}

/// Answers the way the hardware does, `respond` gets every write.
struct Module {
    name: &'static str,
    log: Log,
    respond: Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>,
    rx: VecDeque<u8>,
}

impl Read for Module {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
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

impl Write for Module {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.lock().unwrap().push(Event::Sent(self.name));
        let answer = (self.respond)(buf);
        self.rx.extend(answer);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for Module {
    fn discard_input(&mut self) -> io::Result<()> {
        self.rx.clear();
        Ok(())
    }
}

fn link(module: Module) -> SerialLink<Module> {
    let path = format!("/dev/fake-{}", module.name);
    SerialLink::new(module, path, Duration::from_millis(50))
}

/// `reads` answers to the read command before going silent
fn ec_module(
    name: &'static str,
    log: &Log,
    identity: Identity,
    reading: [u8; 13],
    reads: usize,
) -> Module {
    let address = Address(1);
    let identity = ec::encode_identity(&identity).unwrap();
    let mut left = reads;
    Module {
        name,
        log: log.clone(),
        respond: Box::new(move |written: &[u8]| {
            if written == [ec::IDENTIFY] {
                identity.to_vec()
            } else if written == Command::ReadAll.frame(address) && left > 0 {
                left -= 1;
                reading.to_vec()
            } else {
                Vec::new()
            }
        }),
        rx: VecDeque::new(),
    }
}

fn co2_module(log: &Log, filtered: &'static [u8], unfiltered: &'static [u8]) -> Module {
    Module {
        name: "CO2",
        log: log.clone(),
        respond: Box::new(move |written: &[u8]| match written {
            b"Z\r\n" => filtered.to_vec(),
            b"z\r\n" => unfiltered.to_vec(),
            _ => Vec::new(),
        }),
        rx: VecDeque::new(),
    }
}

struct Fan {
    log: Log,
    on_start: Option<StopSignal>,
}

impl ErrorType for Fan {
    type Error = Infallible;
}

impl OutputPin for Fan {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.log.lock().unwrap().push(Event::Fan(false));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.log.lock().unwrap().push(Event::Fan(true));
        if let Some(stop) = &self.on_start {
            stop.request();
        }
        Ok(())
    }
}

fn ventilation(log: &Log, on_start: Option<StopSignal>) -> Ventilation<Fan> {
    let fan = Fan {
        log: log.clone(),
        on_start,
    };
    Ventilation::new(fan).unwrap()
}

const OZONE: Identity = Identity {
    gas: Gas::O3,
    unit: Unit::Ppb,
    max_value: 1000,
    decimal_exponent: 0,
};

const NITROGEN_DIOXIDE: Identity = Identity {
    gas: Gas::NO2,
    unit: Unit::Ppm,
    max_value: 20,
    decimal_exponent: 2,
};

fn settings(period: Duration) -> Settings {
    Settings {
        vent: Duration::from_millis(20),
        wait: Duration::from_millis(5),
        ec_iterations: NonZeroU32::new(2).unwrap(),
        ec_delay: Duration::ZERO,
        co2_iterations: NonZeroU32::new(2).unwrap(),
        co2_delay: Duration::ZERO,
        period,
    }
}

fn ozone(log: &Log) -> Module {
    ec_module("O3", log, OZONE, ec::encode_reading(50, 2150, 4500), usize::MAX)
}

/// Answers `reads` times, then goes silent
fn nitrogen_dioxide(log: &Log, reads: usize) -> Module {
    let reading = ec::encode_reading(5, 2250, 5500);
    ec_module("NO2", log, NITROGEN_DIOXIDE, reading, reads)
}

fn ec_channel(label: &'static str, module: Module) -> Channel<Module> {
    let driver = EcDriver::identify(link(module), Address(1), Duration::ZERO).unwrap();
    Channel::new(label, Some(AnyDriver::Ec(driver)))
}

fn co2_channel(module: Module) -> Channel<Module> {
    let driver = Co2Driver::new(link(module), Co2Mode::Polled);
    Channel::new("CO2", Some(AnyDriver::Co2(driver)))
        .with_bias(BiasTracker::new(0.0, Some(420.0)))
}

/// Ozone, nitrogen dioxide and CO₂ all answering
fn station(log: &Log, fan_stops: Option<StopSignal>, period: Duration) -> Engine<Module, Fan> {
    let co2 = co2_module(log, b" Z 00390\r\n", b" z 00400\r\n");

    let channels = vec![
        ec_channel("O3", ozone(log)),
        ec_channel("NO2", nitrogen_dioxide(log, usize::MAX)),
        co2_channel(co2),
    ];
    let engine = Engine::new(ventilation(log, fan_stops), channels, settings(period));
    log.lock().unwrap().clear();
    engine
}

fn measured<'a>(result: &'a CycleResult, label: &str) -> &'a air_station::Measurement {
    result
        .measurement(label)
        .unwrap_or_else(|| panic!("{label} should be measured: {result:?}"))
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
}

#[test]
fn ventilation_precedes_sampling() {
    logging::setup_for_tests();
    let log = Log::default();
    let mut engine = station(&log, None, Duration::ZERO);

    let started = Instant::now();
    engine.run_cycle();
    assert!(started.elapsed() >= Duration::from_millis(25));

    let events = events(&log);
    assert_eq!(events[..2], [Event::Fan(true), Event::Fan(false)]);
    assert!(events[2..].iter().all(|e| matches!(e, Event::Sent(_))), "{events:?}");

    // every module is sampled in full before the next one
    let order: Vec<_> = events[2..]
        .iter()
        .filter_map(|e| match e {
            Event::Sent(name) => Some(*name),
            Event::Fan(_) => None,
        })
        .collect();
    assert_eq!(order, ["O3", "O3", "NO2", "NO2", "CO2", "CO2", "CO2", "CO2"]);
}

#[test]
fn values_are_converted_and_corrected() {
    logging::setup_for_tests();
    let log = Log::default();
    let mut engine = station(&log, None, Duration::ZERO);
    let result = engine.run_cycle();

    assert!(result.is_complete(), "{result:?}");

    let ozone = measured(&result, "O3");
    assert!(close(ozone.value, 98.0), "{ozone:?}");
    assert_eq!(ozone.unit, OutputUnit::MicrogramPerM3);
    assert_eq!((ozone.samples, ozone.failed), (2, 0));

    let nitrogen_dioxide = measured(&result, "NO2");
    assert!(close(nitrogen_dioxide.value, 94.0), "{nitrogen_dioxide:?}");

    let co2 = measured(&result, "CO2");
    assert_eq!(co2.value, 420.0);
    assert_eq!(co2.bias, 30.0);
    assert_eq!(co2.unit, OutputUnit::Ppm);

    assert!(close(result.temperature.unwrap(), 22.0));
    assert!(close(result.humidity.unwrap(), 50.0));

    let second = engine.run_cycle();
    assert_eq!(measured(&second, "CO2").value, 420.0);
    assert_eq!(measured(&second, "CO2").bias, 30.0);
}

#[test]
fn missing_module_leaves_the_rest() {
    logging::setup_for_tests();
    let log = Log::default();
    let config = ChannelConfig {
        label: "CO".to_owned(),
        path: "/dev/ttyAMA1".to_owned(),
        protocol: Protocol::Ec { address: Address(0) },
        offset: 0.0,
        floor: None,
        initial_bias: 0.0,
    };
    let serial = LinkConfig {
        open_attempts: 3,
        open_backoff: Duration::ZERO,
        ..LinkConfig::default()
    };

    let mut attempts = 0;
    let missing = Channel::<Module>::connect_with(&config, &serial, Duration::ZERO, |path, serial| {
        link::retry_open(path, serial, || {
            attempts += 1;
            Err(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "not there",
            ))
        })
    });
    assert_eq!(attempts, 3);

    let mut engine = Engine::new(
        ventilation(&log, None),
        vec![ec_channel("O3", ozone(&log)), missing],
        settings(Duration::ZERO),
    );

    let result = engine.run_cycle();
    assert_eq!(result.channels["CO"], ChannelOutcome::Unavailable);
    assert!(close(measured(&result, "O3").value, 98.0));
    assert!(!result.is_complete());
    assert!(close(result.temperature.unwrap(), 21.5));
}

#[test]
fn silent_module_is_flagged() {
    logging::setup_for_tests();
    let log = Log::default();
    let mut engine = Engine::new(
        ventilation(&log, None),
        vec![ec_channel("NO2", nitrogen_dioxide(&log, 1))],
        settings(Duration::ZERO),
    );

    let result = engine.run_cycle();
    let nitrogen_dioxide = measured(&result, "NO2");
    assert_eq!((nitrogen_dioxide.samples, nitrogen_dioxide.failed), (2, 1));
    // the failed read counts as zero
    assert!(close(nitrogen_dioxide.value, 47.0), "{nitrogen_dioxide:?}");
    assert!(!result.is_complete());

    let result = engine.run_cycle();
    let nitrogen_dioxide = measured(&result, "NO2");
    assert_eq!(nitrogen_dioxide.failed, 2);
    assert_eq!(nitrogen_dioxide.value, 0.0);
}

#[test]
fn silent_module_leaves_climate_alone() {
    logging::setup_for_tests();
    let log = Log::default();
    let mut engine = Engine::new(
        ventilation(&log, None),
        vec![ec_channel("O3", ozone(&log)), ec_channel("NO2", nitrogen_dioxide(&log, 0))],
        settings(Duration::ZERO),
    );

    let result = engine.run_cycle();
    assert_eq!(measured(&result, "NO2").failed, 2);
    assert!(close(result.temperature.unwrap(), 21.5), "{result:?}");
    assert!(close(result.humidity.unwrap(), 45.0), "{result:?}");
}

#[test]
fn no_climate_without_answers() {
    logging::setup_for_tests();
    let log = Log::default();
    let mut engine = Engine::new(
        ventilation(&log, None),
        vec![ec_channel("NO2", nitrogen_dioxide(&log, 0))],
        settings(Duration::ZERO),
    );

    let result = engine.run_cycle();
    assert_eq!(result.temperature, None);
    assert_eq!(result.humidity, None);
}

#[test]
fn stop_during_sampling_finishes_the_cycle() {
    logging::setup_for_tests();
    let log = Log::default();
    let stop = StopSignal::new();
    let mut engine = station(&log, Some(stop.clone()), Duration::from_secs(60));

    let mut results = Vec::new();
    let started = Instant::now();
    engine.run(&stop, &mut |result: &CycleResult| results.push(result.clone()));

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(results.len(), 1);
    assert!(results[0].is_complete(), "{:?}", results[0]);
}

#[test]
fn stop_during_idle_skips_next_cycle() {
    logging::setup_for_tests();
    let log = Log::default();
    let stop = StopSignal::new();
    let mut engine = station(&log, None, Duration::from_secs(60));

    let mut results = Vec::new();
    let remote = stop.clone();
    let started = Instant::now();
    engine.run(&stop, &mut |result: &CycleResult| {
        results.push(result.clone());
        let remote = remote.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.request();
        });
    });

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(results.len(), 1);
    let fan_starts = events(&log).iter().filter(|e| **e == Event::Fan(true)).count();
    assert_eq!(fan_starts, 1);
}

#[test]
fn stop_before_start_runs_nothing() {
    logging::setup_for_tests();
    let log = Log::default();
    let stop = StopSignal::new();
    stop.request();
    let mut engine = station(&log, None, Duration::ZERO);

    let mut cycles = 0;
    engine.run(&stop, &mut |_: &CycleResult| cycles += 1);
    assert_eq!(cycles, 0);
    assert!(events(&log).is_empty());
}
