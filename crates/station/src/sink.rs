//! Where finished cycles go.

use std::io::Write;

use tracing::{info, warn};

use crate::result::CycleResult;

pub trait Sink {
    fn handle(&mut self, result: &CycleResult);
}

impl<F: FnMut(&CycleResult)> Sink for F {
    fn handle(&mut self, result: &CycleResult) {
        (self)(result)
    }
}

/// Logs each cycle as a small table.
#[derive(Debug, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn handle(&mut self, result: &CycleResult) {
        if result.is_complete() {
            info!("cycle done\n{result}");
        } else {
            warn!("cycle incomplete\n{result}");
        }
    }
}

/// Writes one JSON object per cycle, one per line.
pub struct JsonSink<W> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Sink for JsonSink<W> {
    fn handle(&mut self, result: &CycleResult) {
        let written = serde_json::to_writer(&mut self.out, result)
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"))
            .and_then(|()| self.out.flush());
        if let Err(e) = written {
            warn!("could not write cycle result: {e}");
        }
    }
}
