//! Provisioning run
//!
//! open -> configure -> read and back up old content -> encode -> write ->
//! settle -> read back and compare. A mismatch restarts from the write step
//! until the cycle budget runs out. The bus is closed on every exit path.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::{info, warn};
use xinfc_i2c::{BusError, I2cBus, PAGE_SIZE, TagDevice, TagError, page_aligned};
use xinfc_proto::{EncodeError, NDEF_CAPACITY, NdefBuffer, WscRecord};

use crate::backup::{self, BackupError, BackupOutcome};
use crate::config::ProvisionConfig;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{0}")]
    Open(BusError),
    #[error("{0}")]
    Configure(TagError),
    #[error("failed to read existing NDEF data: {0}")]
    InitialRead(TagError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error("failed to build NDEF record: {0}")]
    Encode(#[from] EncodeError),
    #[error("failed to write NDEF data at offset {offset} after {attempts} attempts: {source}")]
    WriteExhausted {
        offset: u16,
        attempts: u32,
        #[source]
        source: TagError,
    },
    #[error("failed to read back NDEF data after {attempts} attempts: {source}")]
    ReadbackExhausted {
        attempts: u32,
        #[source]
        source: TagError,
    },
    #[error("failed to write new NDEF data: no match after {cycles} verify cycles")]
    VerifyExhausted { cycles: u32 },
}

impl ProvisionError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::Backup(BackupError::Open { .. }) => 11,
            ProvisionError::Backup(BackupError::Write { .. }) => 12,
            ProvisionError::Encode(_) => 13,
            ProvisionError::Open(_) => 20,
            ProvisionError::Configure(_) => 21,
            ProvisionError::InitialRead(_) => 22,
            ProvisionError::WriteExhausted { .. } => 23,
            ProvisionError::ReadbackExhausted { .. } => 24,
            ProvisionError::VerifyExhausted { .. } => 25,
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Bytes of the record written
    pub record_len: usize,
    /// Write + verify cycles used, the successful one included
    pub cycles: u32,
    pub chunk_retries: u32,
    pub readback_retries: u32,
    pub backup: BackupOutcome,
}

#[derive(Default)]
struct Counters {
    chunk_retries: u32,
    readback_retries: u32,
}

/// Apply bus settings in order: timeout, retries, device address
pub fn configure<B: I2cBus>(tag: &mut TagDevice<B>, config: &ProvisionConfig) -> Result<(), TagError> {
    info!("Setting i2c timeout...");
    tag.configure_timeout(config.bus_timeout())?;

    info!("Setting i2c retries...");
    tag.configure_retries(config.bus.retries)?;

    info!("Setting i2c device address 0x{:02x}...", tag.address());
    tag.bind_address()?;
    Ok(())
}

pub struct Provisioner {
    config: ProvisionConfig,
    backup_path: Option<PathBuf>,
}

impl Provisioner {
    pub fn new(config: ProvisionConfig) -> Self {
        Self { config, backup_path: None }
    }

    /// Save the tag's previous content to `path` before the first write
    pub fn with_backup(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Open the bus with `open` and write `record` to the tag at `address`
    pub fn run<B, F>(&self, open: F, address: u16, record: &WscRecord) -> Result<ProvisionReport, ProvisionError>
    where
        B: I2cBus,
        F: FnOnce() -> Result<B, BusError>,
    {
        info!("Opening i2c bus...");
        let bus = open().map_err(ProvisionError::Open)?;
        let mut tag = TagDevice::new(bus, address);

        let result = self.run_on(&mut tag, record);
        tag.close();
        result
    }

    fn run_on<B: I2cBus>(&self, tag: &mut TagDevice<B>, record: &WscRecord) -> Result<ProvisionReport, ProvisionError> {
        configure(tag, &self.config).map_err(ProvisionError::Configure)?;
        info!("I2c device address set.");

        let backup = self.backup_existing(tag)?;

        info!("Building new NDEF data...");
        let target = record.encode()?;
        info!("New NDEF is {} bytes.", target.len());

        let mut counters = Counters::default();
        let cycles = self.write_verified(tag, target.as_slice(), &mut counters)?;

        Ok(ProvisionReport {
            record_len: target.len(),
            cycles,
            chunk_retries: counters.chunk_retries,
            readback_retries: counters.readback_retries,
            backup,
        })
    }

    fn backup_existing<B: I2cBus>(&self, tag: &mut TagDevice<B>) -> Result<BackupOutcome, ProvisionError> {
        info!("Reading existing NDEF data...");
        let mut existing = NdefBuffer::new();
        let n = tag
            .read_tag(existing.as_mut_array(), NDEF_CAPACITY)
            .map_err(ProvisionError::InitialRead)?;
        existing.set_len(n);
        info!("Read {n} bytes.");

        match &self.backup_path {
            Some(path) => Ok(backup::write_backup(path, existing.as_slice())?),
            None => Ok(BackupOutcome::Disabled),
        }
    }

    /// Write and verify until the tag holds `data`; returns the cycles used
    fn write_verified<B: I2cBus>(
        &self,
        tag: &mut TagDevice<B>,
        data: &[u8],
        counters: &mut Counters,
    ) -> Result<u32, ProvisionError> {
        let cycles = self.config.retry.verify_cycles;

        for cycle in 1..=cycles {
            info!("Writing new NDEF data...");
            self.write_chunks(tag, data, counters)?;

            thread::sleep(self.config.settle_delay());

            info!("Verifying written NDEF data...");
            let readback = self.read_back(tag, data.len(), counters)?;
            if &readback.as_slice()[..data.len()] == data {
                info!("Success.");
                return Ok(cycle);
            }

            warn!("Data does not match! Retrying... ({cycle}/{cycles})");
        }

        Err(ProvisionError::VerifyExhausted { cycles })
    }

    fn write_chunks<B: I2cBus>(
        &self,
        tag: &mut TagDevice<B>,
        data: &[u8],
        counters: &mut Counters,
    ) -> Result<(), ProvisionError> {
        let retries = self.config.retry.chunk_write;

        for (i, chunk) in data.chunks(PAGE_SIZE).enumerate() {
            let offset = (i * PAGE_SIZE) as u16;
            retry(
                retries,
                self.config.chunk_retry_delay(),
                || tag.write_tag_at(chunk, offset),
                |attempt, e| {
                    counters.chunk_retries += 1;
                    warn!("write at offset {offset} failed, retry {attempt}/{retries}: {e}");
                },
            )
            .map_err(|(attempts, source)| ProvisionError::WriteExhausted { offset, attempts, source })?;
        }
        Ok(())
    }

    fn read_back<B: I2cBus>(
        &self,
        tag: &mut TagDevice<B>,
        len: usize,
        counters: &mut Counters,
    ) -> Result<NdefBuffer, ProvisionError> {
        let retries = self.config.retry.readback;
        let aligned = page_aligned(len);
        let mut readback = NdefBuffer::new();

        let n = retry(
            retries,
            self.config.readback_retry_delay(),
            || tag.read_tag(readback.as_mut_array(), aligned),
            |attempt, e| {
                counters.readback_retries += 1;
                warn!("read-back failed, retry {attempt}/{retries}: {e}");
            },
        )
        .map_err(|(attempts, source)| ProvisionError::ReadbackExhausted { attempts, source })?;

        readback.set_len(n);
        Ok(readback)
    }
}

/// Run `op` until it succeeds, allowing `retries` extra attempts
///
/// On exhaustion returns the number of attempts made and the last error.
fn retry<T>(
    retries: u32,
    delay: Duration,
    mut op: impl FnMut() -> Result<T, TagError>,
    mut on_retry: impl FnMut(u32, &TagError),
) -> Result<T, (u32, TagError)> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < retries => {
                attempt += 1;
                on_retry(attempt, &e);
                thread::sleep(delay);
            }
            Err(e) => return Err((attempt + 1, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xinfc_i2c::{Message, NDEF_BASE_ADDR, Recorded, SimulatedTag};
    use xinfc_proto::{Auth, Crypt};

    const DEV: u16 = 0x57;

    fn record() -> WscRecord {
        WscRecord::new(b"AP", b"password", Crypt::Aes, Auth::Wpa2Personal)
    }

    fn provisioner() -> Provisioner {
        Provisioner::new(ProvisionConfig::without_delays())
    }

    fn write_transfers(sim: &SimulatedTag) -> usize {
        sim.transfers()
            .iter()
            .filter(|t| t.iter().all(|m| matches!(m, Recorded::Write { data, .. } if data.len() == 6)))
            .count()
    }

    #[test]
    fn writes_and_verifies() {
        let mut sim = SimulatedTag::new();
        let report = provisioner().run(|| Ok(&mut sim), DEV, &record()).unwrap();

        assert_eq!(
            report,
            ProvisionReport {
                record_len: 77,
                cycles: 1,
                chunk_retries: 0,
                readback_retries: 0,
                backup: BackupOutcome::Disabled,
            }
        );

        let expected = record().encode().unwrap();
        assert_eq!(sim.memory(NDEF_BASE_ADDR, 77), expected.as_slice());
        // 77 bytes -> 20 strides, the last one padded on the wire
        assert_eq!(write_transfers(&sim), 20);
        assert_eq!(sim.memory(NDEF_BASE_ADDR + 77, 3), &[0, 0, 0]);

        let settings = sim.settings();
        assert_eq!(settings.timeout, Some(Duration::from_millis(30)));
        assert_eq!(settings.retries, Some(2));
        assert_eq!(settings.address, Some(DEV));
        assert!(sim.is_closed());
    }

    #[test]
    fn reads_back_page_aligned_length() {
        let mut sim = SimulatedTag::new();
        provisioner().run(|| Ok(&mut sim), DEV, &record()).unwrap();

        let reads: Vec<usize> = sim
            .transfers()
            .iter()
            .flatten()
            .filter_map(|m| match m {
                Recorded::Read { len, .. } => Some(*len),
                _ => None,
            })
            .collect();
        assert_eq!(reads, vec![NDEF_CAPACITY, 80]);
    }

    #[test]
    fn retries_failing_chunk() {
        let mut sim = SimulatedTag::new();
        // second stride lives at tag address 0x14
        sim.fail_writes_at(NDEF_BASE_ADDR + 4, 2);

        let report = provisioner().run(|| Ok(&mut sim), DEV, &record()).unwrap();
        assert_eq!(report.chunk_retries, 2);
        assert_eq!(report.cycles, 1);
        assert_eq!(write_transfers(&sim), 22);

        let failed_addresses: Vec<_> = sim.transfers()[1..4]
            .iter()
            .map(|t| match &t[0] {
                Recorded::Write { data, .. } => u16::from_be_bytes([data[0], data[1]]),
                Recorded::Read { .. } => 0,
            })
            .collect();
        assert_eq!(failed_addresses, vec![0x10, 0x14, 0x14]);
        assert_eq!(sim.memory(NDEF_BASE_ADDR, 77), record().encode().unwrap().as_slice());
    }

    #[test]
    fn chunk_retries_exhausted() {
        let mut sim = SimulatedTag::new();
        sim.fail_writes_at(NDEF_BASE_ADDR + 8, 100);

        let err = provisioner().run(|| Ok(&mut sim), DEV, &record()).unwrap_err();
        assert!(matches!(err, ProvisionError::WriteExhausted { offset: 8, attempts: 6, .. }));
        assert_eq!(err.exit_code(), 23);
        assert!(sim.is_closed());
    }

    #[test]
    fn never_matching_readback_exhausts_cycles() {
        let mut sim = SimulatedTag::new();
        sim.drop_writes();

        let err = provisioner().run(|| Ok(&mut sim), DEV, &record()).unwrap_err();
        assert!(matches!(err, ProvisionError::VerifyExhausted { cycles: 5 }));
        assert_eq!(err.exit_code(), 25);
        assert_eq!(write_transfers(&sim), 5 * 20);
        assert!(sim.is_closed());
    }

    #[test]
    fn readback_retries_then_exhausted() {
        let mut sim = SimulatedTag::new();
        let mut config = ProvisionConfig::without_delays();
        config.retry.readback = 3;

        let mut bus = FlakyReadback::new(&mut sim, usize::MAX);
        let err = Provisioner::new(config).run(|| Ok(&mut bus), DEV, &record()).unwrap_err();
        assert!(matches!(err, ProvisionError::ReadbackExhausted { attempts: 4, .. }));
        assert_eq!(err.exit_code(), 24);
        assert!(sim.is_closed());
    }

    #[test]
    fn readback_recovers_within_budget() {
        let mut sim = SimulatedTag::new();
        let mut bus = FlakyReadback::new(&mut sim, 3);
        let report = provisioner().run(|| Ok(&mut bus), DEV, &record()).unwrap();
        assert_eq!(report.readback_retries, 3);
        assert_eq!(report.cycles, 1);
    }

    #[test]
    fn open_and_configure_failures() {
        let err = provisioner()
            .run(|| Err::<SimulatedTag, _>(BusError::new("failed to open i2c bus", 2, -1)), DEV, &record())
            .unwrap_err();
        assert_eq!(err.exit_code(), 20);
        assert_eq!(err.to_string(), "failed to open i2c bus! ret=-1 errno=2");

        let mut sim = SimulatedTag::new();
        sim.close();
        let err = provisioner().run(|| Ok(&mut sim), DEV, &record()).unwrap_err();
        assert!(matches!(err, ProvisionError::Configure(_)));
        assert_eq!(err.exit_code(), 21);
    }

    #[test]
    fn initial_read_failure() {
        let mut sim = SimulatedTag::new();
        sim.fail_reads(1);
        let err = provisioner().run(|| Ok(&mut sim), DEV, &record()).unwrap_err();
        assert!(matches!(err, ProvisionError::InitialRead(TagError::BusIo(_))));
        assert_eq!(err.exit_code(), 22);
        assert!(sim.is_closed());
    }

    #[test]
    fn oversized_record_is_fatal() {
        let mut sim = SimulatedTag::new();
        let record = WscRecord::new(&[b's'; 60], &[b'p'; 63], Crypt::Aes, Auth::Wpa2Personal);
        let err = provisioner().run(|| Ok(&mut sim), DEV, &record).unwrap_err();
        assert!(matches!(err, ProvisionError::Encode(_)));
        assert_eq!(err.exit_code(), 13);
        assert_eq!(write_transfers(&sim), 0);
    }

    #[test]
    fn backs_up_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.bin");
        let stock: Vec<u8> = (0..NDEF_CAPACITY as u8).collect();
        let mut sim = SimulatedTag::with_contents(NDEF_BASE_ADDR, &stock);

        let report = provisioner()
            .with_backup(&path)
            .run(|| Ok(&mut sim), DEV, &record())
            .unwrap();
        assert_eq!(report.backup, BackupOutcome::Created(path.clone()));
        assert_eq!(std::fs::read(&path).unwrap(), stock);

        let mut sim = SimulatedTag::new();
        let report = provisioner()
            .with_backup(&path)
            .run(|| Ok(&mut sim), DEV, &record())
            .unwrap();
        assert_eq!(report.backup, BackupOutcome::Skipped(path.clone()));
        assert_eq!(std::fs::read(&path).unwrap(), stock);
    }

    #[test]
    fn backup_failure_closes_bus() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("backup.bin");
        let mut sim = SimulatedTag::new();
        let err = provisioner()
            .with_backup(&path)
            .run(|| Ok(&mut sim), DEV, &record())
            .unwrap_err();
        assert_eq!(err.exit_code(), 11);
        assert!(sim.is_closed());
        assert_eq!(write_transfers(&sim), 0);
    }

    /// Passes the initial read through, then fails `failures` read-backs
    struct FlakyReadback<'a> {
        inner: &'a mut SimulatedTag,
        reads: usize,
        failures: usize,
    }

    impl<'a> FlakyReadback<'a> {
        fn new(inner: &'a mut SimulatedTag, failures: usize) -> Self {
            Self { inner, reads: 0, failures }
        }
    }

    impl I2cBus for FlakyReadback<'_> {
        fn set_timeout(&mut self, timeout: Duration) -> Result<(), BusError> {
            self.inner.set_timeout(timeout)
        }

        fn set_retries(&mut self, retries: u32) -> Result<(), BusError> {
            self.inner.set_retries(retries)
        }

        fn bind_address(&mut self, address: u16) -> Result<(), BusError> {
            self.inner.bind_address(address)
        }

        fn transfer(&mut self, messages: &mut [Message<'_>]) -> Result<usize, BusError> {
            if messages.iter().any(|m| m.is_read()) {
                self.reads += 1;
                if self.reads > 1 && self.failures > 0 {
                    self.failures -= 1;
                    return Err(BusError::new("simulated read fault", libc::EREMOTEIO, -1));
                }
            }
            self.inner.transfer(messages)
        }

        fn close(&mut self) {
            self.inner.close()
        }
    }
}
