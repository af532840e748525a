use std::io;
use std::path::PathBuf;
use std::time::Duration;

use air_station::config::VentilationConfig;
use air_station::driver::{AnyDriver, Driver};
use air_station::sink::{JsonSink, LogSink};
use air_station::vent::{self, GpioPin, Ventilation};
use air_station::{logging, stop, Channel, Engine, Settings, StationConfig, StopSignal};
use clap::Parser;
use color_eyre::eyre::{bail, Context};
use color_eyre::{Result, Section};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "air-station")]
#[command(version)]
#[command(
    about = "Ventilates the sensing chamber and samples the gas modules of an air-quality station"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// station configuration, RON
    #[arg(short, long, default_value = "/etc/air-station.ron")]
    config: PathBuf,

    /// print cycle results as JSON lines on stdout instead of logging them
    #[arg(long)]
    json: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// measure until stopped with Ctrl-C
    Run {
        /// also stop on a line with just `q` on stdin
        #[arg(long)]
        quit_key: bool,
    },
    /// test the fan and every module once
    Check,
    /// pulse the fan
    Vent {
        #[arg(short, long, default_value_t = 5)]
        pulses: u32,
        /// seconds on per pulse
        #[arg(long, default_value = "2", value_parser = seconds)]
        on: Duration,
        /// seconds off after each pulse
        #[arg(long, default_value = "1", value_parser = seconds)]
        off: Duration,
    },
    /// print the default configuration
    DefaultConfig,
}

fn seconds(arg: &str) -> Result<Duration, String> {
    let secs: f64 = arg.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

fn main() -> Result<()> {
    color_eyre::install()?;
    logging::setup();
    let cli = Cli::parse();

    if let Command::DefaultConfig = cli.command {
        print!("{}", StationConfig::default().to_ron()?);
        return Ok(());
    }

    let config = StationConfig::load(&cli.config).wrap_err("Could not load configuration")?;
    info!("started air-station, args: {cli:?}");

    match cli.command {
        Command::Run { quit_key } => run(&config, cli.json, quit_key),
        Command::Check => check(&config),
        Command::Vent { pulses, on, off } => open_ventilation(&config.ventilation)?
            .pulse(pulses, on, off)
            .wrap_err("Could not switch the fan"),
        Command::DefaultConfig => Ok(()),
    }
}

fn open_ventilation(config: &VentilationConfig) -> Result<Ventilation<GpioPin>> {
    vent::open_gpio(&config.chip, config.line)
        .wrap_err("Could not open the ventilation pin")
        .with_note(|| format!("gpio line {} on {}", config.line, config.chip))
        .suggestion("check the user running the station may access the gpio chip")
}

fn connect_all(config: &StationConfig) -> Vec<Channel<air_station::link::SystemPort>> {
    config
        .channels
        .iter()
        .map(|channel| Channel::connect(channel, &config.serial, config.sampling.ec_settle))
        .collect()
}

fn run(config: &StationConfig, json: bool, quit_key: bool) -> Result<()> {
    let ventilation = open_ventilation(&config.ventilation)?;
    let mut engine = Engine::new(ventilation, connect_all(config), Settings::from_config(config));

    let signal = StopSignal::new();
    stop::stop_on_ctrl_c(signal.clone());
    if quit_key {
        stop::stop_on_quit_key(signal.clone());
    }

    if json {
        engine.run(&signal, &mut JsonSink::new(io::stdout()));
    } else {
        engine.run(&signal, &mut LogSink);
    }
    Ok(())
}

fn check(config: &StationConfig) -> Result<()> {
    open_ventilation(&config.ventilation)?
        .purge(Duration::from_secs(1), Duration::ZERO)
        .wrap_err("Could not switch the fan")?;
    println!("fan: ok");

    let mut failed = 0;
    let mut channels = connect_all(config);
    for channel in &mut channels {
        let label = channel.label().to_owned();
        let Some(driver) = channel.driver_mut() else {
            println!("{label}: unavailable");
            failed += 1;
            continue;
        };
        println!("{label}: {} on {}", driver.identity(), driver.path());

        let read = match driver {
            AnyDriver::Ec(driver) => {
                let read = driver
                    .read_single()
                    .map(|r| format!("{r:?}"))
                    .map_err(|f| f.error);
                if let Err(e) = driver.set_led(false) {
                    warn!("could not switch off the LED of {label}: {e}");
                }
                read
            }
            AnyDriver::Co2(driver) => driver
                .read_single()
                .map(|r| format!("{r:?}"))
                .map_err(|f| f.error),
        };
        match read {
            Ok(reading) => println!("{label}: {reading}"),
            Err(e) => {
                println!("{label}: read failed, {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} channels failed the check", channels.len());
    }
    Ok(())
}
