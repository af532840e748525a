//! Cooperative stop of the measurement loop.
//!
//! Listeners run on their own threads and only ever set the flag. The loop
//! looks at it between cycles, a cycle that started always completes.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

const SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleeps for `duration` in short slices. Returns true if a stop was
    /// requested, possibly before the full duration passed.
    pub fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return true;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            thread::sleep(left.min(SLICE));
        }
    }
}

/// The first Ctrl-C asks the loop to stop after the current cycle, a second
/// one ends the process right away.
pub fn stop_on_ctrl_c(signal: StopSignal) {
    thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("Could not start the Ctrl-C listener: {e}");
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for Ctrl-C: {e}");
                return;
            }
            info!("stopping after the current cycle, Ctrl-C again to quit now");
            signal.request();

            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("second Ctrl-C, quitting mid cycle");
                std::process::exit(130);
            }
        })
    });
}

/// Stops once a line with just `q` is read from stdin.
pub fn stop_on_quit_key(signal: StopSignal) {
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim() == "q" => {
                    info!("quit key pressed, stopping after the current cycle");
                    signal.request();
                    return;
                }
                Ok(_) => (),
                Err(e) => {
                    warn!("stopped reading stdin for the quit key: {e}");
                    return;
                }
            }
        }
    });
}
