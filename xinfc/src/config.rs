//! Run configuration: bus settings, retry budgets and delays
//!
//! Defaults match what the tag chips tolerate in practice. A JSON file can
//! override any subset, e.g.
//!
//! ```json
//! { "retry": { "verify_cycles": 3 }, "delay": { "settle_ms": 1500 } }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusSettings {
    /// Adapter response timeout
    pub timeout_ms: u64,
    /// Adapter-level retries
    pub retries: u32,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self { timeout_ms: 30, retries: 2 }
    }
}

/// Bounded retry counts; exhausting any of them is fatal
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryBudget {
    /// Extra attempts per 4-byte chunk write
    pub chunk_write: u32,
    /// Extra attempts per read-back
    pub readback: u32,
    /// Full write + verify cycles
    pub verify_cycles: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self { chunk_write: 5, readback: 20, verify_cycles: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Delays {
    pub chunk_retry_ms: u64,
    pub readback_retry_ms: u64,
    /// Wait after writing, while the chip commits to its EEPROM
    pub settle_ms: u64,
}

impl Default for Delays {
    fn default() -> Self {
        Self { chunk_retry_ms: 20, readback_retry_ms: 40, settle_ms: 1000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    pub bus: BusSettings,
    pub retry: RetryBudget,
    pub delay: Delays,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("verify_cycles must be at least 1")]
    NoCycles,
}

impl ProvisionConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path: path.to_path_buf(), source },
            other => other,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        if config.retry.verify_cycles == 0 {
            return Err(ConfigError::NoCycles);
        }
        Ok(config)
    }

    /// Default budgets without any waiting, for simulated buses
    pub fn without_delays() -> Self {
        Self {
            delay: Delays { chunk_retry_ms: 0, readback_retry_ms: 0, settle_ms: 0 },
            ..Self::default()
        }
    }

    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(self.bus.timeout_ms)
    }

    pub fn chunk_retry_delay(&self) -> Duration {
        Duration::from_millis(self.delay.chunk_retry_ms)
    }

    pub fn readback_retry_delay(&self) -> Duration {
        Duration::from_millis(self.delay.readback_retry_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.delay.settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid i2c device {0:?}: expected a 7-bit address in the format 0xMN")]
pub struct AddressError(pub String);

/// Parse a device address given as exactly `0x` plus two hex digits
pub fn parse_device_address(s: &str) -> Result<u16, AddressError> {
    let err = || AddressError(s.to_string());

    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .filter(|d| d.len() == 2 && d.bytes().all(|b| b.is_ascii_hexdigit()))
        .ok_or_else(err)?;
    let address = u16::from_str_radix(digits, 16).map_err(|_| err())?;

    if address == 0 || address > 0x7F {
        return Err(err());
    }
    Ok(address)
}

/// Bus number of `/dev/i2c-N`
pub fn parse_bus_id(s: &str) -> Result<String, String> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        Ok(s.to_string())
    } else {
        Err(format!("invalid i2c bus {s:?}: expected the number N of /dev/i2c-N"))
    }
}
