//! Drives the gas modules of an air-quality station and turns their readings
//! into one corrected measurement per cycle.

pub mod bias;
pub mod config;
pub mod convert;
pub mod cycle;
pub mod driver;
pub mod link;
pub mod logging;
pub mod result;
pub mod sink;
pub mod stop;
pub mod vent;

pub use config::StationConfig;
pub use cycle::{Channel, Engine, Settings};
pub use result::{ChannelOutcome, CycleResult, Measurement};
pub use sink::Sink;
pub use stop::StopSignal;
