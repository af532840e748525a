//! Where the station's logs go.
//!
//! Started by systemd the station logs to the journal, follow it with:
//! `journalctl -fu air-station --output-fields=CODE_FILE,CODE_LINE,MESSAGE -o cat`
//!
//! Otherwise logs go to stderr, stdout is kept for cycle results. What is
//! logged is set with `RUST_LOG`, for example to trace all serial traffic:
//! `RUST_LOG=air_station::link=trace,info`

use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::filter::{EnvFilter, ParseError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Journal,
    Stderr,
}

/// Directives from `RUST_LOG` if they parse, info level otherwise. A
/// directive that did not parse is handed back so it can be logged once
/// logging works.
fn env_filter(directives: Option<&str>) -> (EnvFilter, Option<ParseError>) {
    let fallback = || {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy("")
    };

    match directives.map(|d| EnvFilter::builder().with_regex(true).parse(d)) {
        Some(Ok(filter)) => (filter, None),
        Some(Err(invalid)) => (fallback(), Some(invalid)),
        None => (fallback(), None),
    }
}

pub fn setup() -> Output {
    let directives = std::env::var("RUST_LOG").ok();
    let (filter, invalid) = env_filter(directives.as_deref());
    let registry = tracing_subscriber::Registry::default().with(ErrorLayer::default());

    let journal = libsystemd::logging::connected_to_journal()
        .then(tracing_journald::layer)
        .transpose();
    let output = match journal {
        Ok(Some(journal)) => {
            registry.with(journal.with_filter(filter)).init();
            Output::Journal
        }
        Ok(None) => {
            registry.with(stderr_layer().with_filter(filter)).init();
            Output::Stderr
        }
        Err(err) => {
            registry.with(stderr_layer().with_filter(filter)).init();
            tracing::error!("Could not reach journald, logging to stderr instead: {err}");
            Output::Stderr
        }
    };

    if let Some(invalid) = invalid {
        tracing::warn!("Ignoring RUST_LOG, it did not parse: {invalid}");
    }
    tracing::debug!("logging to {output:?}");
    output
}

fn stderr_layer<S>() -> impl Layer<S>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    fmt::layer()
        .pretty()
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
}

pub fn setup_for_tests() {
    use std::sync::Once;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let (filter, _) = env_filter(std::env::var("RUST_LOG").ok().as_deref());
        let test_layer = fmt::layer()
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .pretty()
            .with_filter(filter);
        tracing_subscriber::registry()
            .with(test_layer)
            .with(ErrorLayer::default())
            .init();

        if let Err(err) = color_eyre::install() {
            tracing::warn!("color-eyre hook already installed: {err}");
        }
    })
}
