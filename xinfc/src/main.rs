//! Wi-Fi provisioning tool for I2C NFC tags
//!
//! Writes WSC credentials to the tag so phones can join the network by
//! tapping the device.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use xinfc::{
    ConfigError, DEFAULT_BACKUP_FILE, ProvisionConfig, ProvisionError, Provisioner, hex_lines,
    parse_bus_id, parse_device_address, read_dump,
};
use xinfc_i2c::{BusError, SimulatedTag};
use xinfc_proto::{CredentialError, ModeError, ModeSupport, WscRecord, lookup_mode, usable_modes};

#[derive(Parser)]
#[command(name = "xinfc")]
#[command(version, about = "Write Wi-Fi credentials to an I2C NFC tag")]
struct Cli {
    /// Log bus traffic and other details
    #[arg(short, long, global = true)]
    verbose: bool,
    /// JSON file overriding bus settings, retry budgets and delays
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Use an in-memory tag instead of /dev/i2c-N and log every message
    #[arg(long, global = true)]
    simulate: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write credentials to the tag and verify them
    Provision {
        /// I2C bus number N of /dev/i2c-N
        #[arg(value_parser = parse_bus_id)]
        bus: String,
        /// 7-bit device address, e.g. 0x57
        #[arg(value_parser = parse_device_address)]
        device: u16,
        ssid: String,
        password: String,
        /// OpenWrt encryption mode, see `xinfc modes`
        mode: String,
        /// Where to keep the tag's original content
        #[arg(long, default_value = DEFAULT_BACKUP_FILE)]
        backup: PathBuf,
        /// Do not back up the original content
        #[arg(long)]
        no_backup: bool,
    },
    /// Print the tag's NDEF area and the credential it holds
    Dump {
        #[arg(value_parser = parse_bus_id)]
        bus: String,
        #[arg(value_parser = parse_device_address)]
        device: u16,
    },
    /// List the encryption modes that can be written
    Modes,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Credential(CredentialError::SsidLength(_)) => 3,
            CliError::Credential(CredentialError::PassphraseLength(_)) => 4,
            CliError::Mode(_) => 5,
            CliError::Config(_) => 6,
            CliError::Provision(e) => e.exit_code(),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    info!("xinfc v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Provision { bus, device, ssid, password, mode, backup, no_backup } => {
            let mode = lookup_mode(&mode)?;
            if let ModeSupport::Downgraded(msg) = mode.support {
                warn!("{msg}");
            }
            let record = WscRecord::with_mode(&ssid, &password, mode)?;
            let config = load_config(cli.config.as_deref())?;

            let mut provisioner = Provisioner::new(config);
            if cli.simulate {
                info!("Simulated tag: no backup is taken");
            } else if !no_backup {
                provisioner = provisioner.with_backup(backup);
            }

            let report = if cli.simulate {
                provisioner.run(|| Ok(SimulatedTag::new()), device, &record)?
            } else {
                provisioner.run(|| open_bus(&bus), device, &record)?
            };
            info!(
                "Wrote {} bytes in {} cycle(s), {} write retries, {} read-back retries",
                report.record_len, report.cycles, report.chunk_retries, report.readback_retries
            );
        }
        Commands::Dump { bus, device } => {
            let config = load_config(cli.config.as_deref())?;
            let dump = if cli.simulate {
                read_dump(|| Ok(SimulatedTag::new()), device, &config)?
            } else {
                read_dump(|| open_bus(&bus), device, &config)?
            };

            for line in hex_lines(dump.contents.as_slice()) {
                println!("{line}");
            }
            match dump.record {
                Some(record) => {
                    println!("ssid: {}", String::from_utf8_lossy(&record.ssid));
                    println!("auth: {}", record.auth.as_str());
                    println!("encryption: {}", record.crypt.as_str());
                }
                None => println!("no Wi-Fi credential record on tag"),
            }
        }
        Commands::Modes => {
            for mode in usable_modes() {
                match mode.support {
                    ModeSupport::Downgraded(msg) => println!("{:<24} ({msg})", mode.name),
                    _ => println!("{}", mode.name),
                }
            }
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ProvisionConfig, ConfigError> {
    match path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            ProvisionConfig::load(path)
        }
        None => Ok(ProvisionConfig::default()),
    }
}

#[cfg(target_os = "linux")]
fn open_bus(bus: &str) -> Result<xinfc_i2c::LinuxI2cBus, BusError> {
    xinfc_i2c::LinuxI2cBus::open(bus)
}

#[cfg(not(target_os = "linux"))]
fn open_bus(_bus: &str) -> Result<SimulatedTag, BusError> {
    Err(BusError::new("i2c-dev is only available on Linux", 0, -1))
}
