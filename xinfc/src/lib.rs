//! Wi-Fi credential provisioning for I2C NFC tags
//!
//! Writes a Wi-Fi Simple Config credential record into the NDEF area of a
//! dual-interface tag chip, so that phones can join the network with a tap.

pub mod backup;
pub mod config;
pub mod dump;
pub mod provision;

pub use backup::{BackupError, BackupOutcome, DEFAULT_BACKUP_FILE, write_backup};
pub use config::{AddressError, ConfigError, ProvisionConfig, parse_bus_id, parse_device_address};
pub use dump::{TagDump, hex_lines, read_dump};
pub use provision::{ProvisionError, ProvisionReport, Provisioner};
