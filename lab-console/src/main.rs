//! labhub: command-line front end for the instrument hub

mod settings;

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use lab_hub::{DriverRegistry, GenericDriver, InstrumentHub, Registration};
use lab_transport::TransportKind;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use settings::Settings;

#[derive(Parser)]
#[command(name = "labhub")]
#[command(about = "Connect, identify and poll lab instruments")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $XDG_CONFIG_HOME/labhub/settings.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run without touching hardware
    #[arg(short, long, global = true)]
    debug: bool,

    /// Serial port of the Prologix adapter
    #[arg(long, global = true)]
    bridge_port: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every port an instrument could be connected to
    Ports,
    /// List known instrument types
    Drivers {
        /// Only show drivers using this transport
        #[arg(short, long)]
        transport: Option<TransportArg>,
    },
    /// Connect one instrument and print its identification
    Identify {
        /// Instrument type
        driver: String,
        /// Port or resource identifier
        port: String,
    },
    /// Connect the configured instruments and poll them
    Poll {
        /// Number of polling rounds
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Delay between rounds, in milliseconds
        #[arg(short, long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Write the current settings to the settings file
    InitConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    Visa,
    Serial,
    Prologix,
    None,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Visa => TransportKind::BusTransport,
            TransportArg::Serial => TransportKind::Serial,
            TransportArg::Prologix => TransportKind::Bridge,
            TransportArg::None => TransportKind::None,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "labhub=info,lab_transport=info,lab_detect=info,lab_hub=info,lab_sim=info".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.debug {
        settings.hub.debug = true;
    }
    if let Some(port) = &cli.bridge_port {
        settings.hub.bridge.port = Some(port.clone());
    }

    match cli.command {
        Command::Ports => list_ports(&settings),
        Command::Drivers { transport } => {
            list_drivers(&build_registry(&settings), transport.map(Into::into));
            Ok(())
        }
        Command::Identify { driver, port } => identify(&settings, &driver, &port),
        Command::Poll { count, interval_ms } => {
            poll(&settings, count, Duration::from_millis(interval_ms))
        }
        Command::InitConfig => {
            let path = match cli.config {
                Some(path) => path,
                None => Settings::default_path().context("No config directory available")?,
            };
            settings.save(&path)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

/// Built-in drivers plus the ones defined in settings
fn build_registry(settings: &Settings) -> DriverRegistry {
    let mut registry = DriverRegistry::with_builtin();
    for config in &settings.drivers {
        if registry.contains(&config.name) {
            warn!("Driver {} defined in settings replaces an existing one", config.name);
        }
        registry.register(GenericDriver::new(config.clone()));
    }
    registry
}

fn build_hub(settings: &Settings) -> InstrumentHub {
    InstrumentHub::new(settings.hub.clone(), build_registry(settings))
}

fn list_ports(settings: &Settings) -> anyhow::Result<()> {
    let mut hub = build_hub(settings);
    let ports = hub.get_connectable_ports();
    if ports.is_empty() {
        info!("No connectable ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

fn list_drivers(registry: &DriverRegistry, transport: Option<TransportKind>) {
    let names = match transport {
        Some(kind) => registry.by_transport(kind),
        None => registry.names(),
    };
    for name in names {
        let Some(driver) = registry.get(&name) else {
            continue;
        };
        let metadata = driver.metadata();
        let channels: Vec<String> = metadata
            .channels
            .iter()
            .map(|c| format!("{} [{}]", c.display_name, c.unit))
            .collect();
        println!(
            "{:<12} {:<9} {}",
            metadata.name,
            metadata.transport.name(),
            channels.join(", ")
        );
    }
}

fn identify(settings: &Settings, driver: &str, port: &str) -> anyhow::Result<()> {
    let mut hub = build_hub(settings);
    if !hub.registry().contains(driver) {
        bail!("Unknown instrument type {}", driver);
    }

    let port = match hub.connect_instrument(driver, port, "")? {
        Registration::Connected(port) | Registration::Shared(port) => port,
        Registration::Conflict { port, existing } => {
            bail!("{} is already connected as {}", port, existing)
        }
        Registration::Placeholder => bail!("Nothing connected"),
    };

    let idn = hub
        .instrument_mut(&port)
        .map(|inst| inst.identify())
        .unwrap_or_default();
    if idn.is_empty() {
        println!("FAILED {} on {}", driver, port);
    } else {
        println!("WORKED {} on {}: {}", driver, port, idn);
    }
    hub.disconnect(&port)?;
    Ok(())
}

fn poll(settings: &Settings, count: u32, interval: Duration) -> anyhow::Result<()> {
    if settings.instruments.is_empty() {
        bail!("No instruments configured");
    }

    let mut hub = build_hub(settings);
    let (names, ports, params) = settings.instrument_lists();
    for (line, result) in settings.instruments.iter().zip(hub.connect_hub(&names, &ports, &params)) {
        match result {
            Ok(Registration::Conflict { port, existing }) => {
                warn!("{} on {} conflicts with {}", line.name, port, existing)
            }
            Ok(_) => {}
            Err(e) => warn!("{} on {:?} not connected: {}", line.name, line.port, e),
        }
    }

    hub.initialize_all();

    let header: Vec<String> = settings
        .instruments
        .iter()
        .map(|l| format!("{}:{}", l.name, l.parameter))
        .collect();
    println!("{}", header.join("\t"));

    for round in 0..count {
        if round > 0 {
            thread::sleep(interval);
        }
        let row: Vec<String> = hub
            .poll()
            .into_iter()
            .map(|v| v.map(|v| v.to_string()).unwrap_or_else(|| "NaN".to_string()))
            .collect();
        println!("{}", row.join("\t"));
    }

    hub.clean_up();
    Ok(())
}
