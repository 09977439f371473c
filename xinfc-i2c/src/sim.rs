//! In-memory tag chip
//!
//! Behaves like the tag's I2C memory interface: a 2-byte write sets the memory
//! pointer, a longer write stores the bytes following the address, and a read
//! returns bytes from the pointer. Every message is logged in hex, which makes
//! it usable as a dry run of what would go on the wire.
//!
//! Faults can be scripted for tests: failing writes at a given tag address,
//! failing reads, and writes that are acknowledged but never committed.

use std::collections::HashMap;
use std::time::Duration;

use data_encoding::HEXLOWER;
use log::info;

use crate::bus::{BusError, I2cBus, Message};

/// Size of the simulated tag address space
pub const SIM_MEMORY_SIZE: usize = 1024;

/// A message as seen by the simulated chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Write { address: u16, data: Vec<u8> },
    Read { address: u16, len: usize },
}

/// Bus settings the simulated adapter received
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimSettings {
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub address: Option<u16>,
}

pub struct SimulatedTag {
    memory: Vec<u8>,
    pointer: usize,
    settings: SimSettings,
    closed: bool,
    close_count: usize,
    transfers: Vec<Vec<Recorded>>,
    failing_writes: HashMap<u16, usize>,
    failing_reads: usize,
    commit_writes: bool,
}

impl SimulatedTag {
    pub fn new() -> Self {
        Self {
            memory: vec![0u8; SIM_MEMORY_SIZE],
            pointer: 0,
            settings: SimSettings::default(),
            closed: false,
            close_count: 0,
            transfers: Vec::new(),
            failing_writes: HashMap::new(),
            failing_reads: 0,
            commit_writes: true,
        }
    }

    /// Start with `data` stored at tag address `at`
    pub fn with_contents(at: u16, data: &[u8]) -> Self {
        let mut sim = Self::new();
        let at = at as usize;
        sim.memory[at..at + data.len()].copy_from_slice(data);
        sim
    }

    /// Fail the next `times` transfers whose first write targets `tag_address`
    pub fn fail_writes_at(&mut self, tag_address: u16, times: usize) -> &mut Self {
        self.failing_writes.insert(tag_address, times);
        self
    }

    /// Fail the next `times` transfers containing a read
    pub fn fail_reads(&mut self, times: usize) -> &mut Self {
        self.failing_reads = times;
        self
    }

    /// Acknowledge writes without storing them
    pub fn drop_writes(&mut self) -> &mut Self {
        self.commit_writes = false;
        self
    }

    pub fn memory(&self, at: u16, len: usize) -> &[u8] {
        &self.memory[at as usize..at as usize + len]
    }

    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of `close` calls that actually released the bus
    pub fn close_count(&self) -> usize {
        self.close_count
    }

    /// Every transfer attempted, including failed ones
    pub fn transfers(&self) -> &[Vec<Recorded>] {
        &self.transfers
    }

    fn check_open(&self) -> Result<(), BusError> {
        if self.closed {
            return Err(BusError::new("i2c bus is closed", libc::EBADF, -1));
        }
        Ok(())
    }

    fn injected_fault(&mut self, recorded: &[Recorded]) -> bool {
        if recorded.iter().any(|m| matches!(m, Recorded::Read { .. })) && self.failing_reads > 0 {
            self.failing_reads -= 1;
            return true;
        }
        let first_write = recorded.iter().find_map(|m| match m {
            Recorded::Write { data, .. } if data.len() >= 2 => Some(u16::from_be_bytes([data[0], data[1]])),
            _ => None,
        });
        if let Some(addr) = first_write {
            if let Some(left) = self.failing_writes.get_mut(&addr) {
                if *left > 0 {
                    *left -= 1;
                    return true;
                }
            }
        }
        false
    }

    fn execute(&mut self, msg: &mut Message<'_>) -> Result<(), BusError> {
        match msg {
            Message::Write { data, .. } => {
                if data.len() < 2 {
                    return Err(BusError::new("short tag address", libc::EIO, -1));
                }
                let start = u16::from_be_bytes([data[0], data[1]]) as usize;
                let payload = &data[2..];
                if start + payload.len() > self.memory.len() {
                    return Err(BusError::new("tag address out of range", libc::EIO, -1));
                }
                if self.commit_writes {
                    self.memory[start..start + payload.len()].copy_from_slice(payload);
                }
                self.pointer = start + payload.len();
            }
            Message::Read { buf, .. } => {
                let start = self.pointer;
                if start + buf.len() > self.memory.len() {
                    return Err(BusError::new("tag address out of range", libc::EIO, -1));
                }
                buf.copy_from_slice(&self.memory[start..start + buf.len()]);
                self.pointer += buf.len();
            }
        }
        Ok(())
    }
}

impl Default for SimulatedTag {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cBus for SimulatedTag {
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), BusError> {
        self.check_open()?;
        info!("sim: timeout {} ms", timeout.as_millis());
        self.settings.timeout = Some(timeout);
        Ok(())
    }

    fn set_retries(&mut self, retries: u32) -> Result<(), BusError> {
        self.check_open()?;
        info!("sim: retries {retries}");
        self.settings.retries = Some(retries);
        Ok(())
    }

    fn bind_address(&mut self, address: u16) -> Result<(), BusError> {
        self.check_open()?;
        info!("sim: device address 0x{address:02x}");
        self.settings.address = Some(address);
        Ok(())
    }

    fn transfer(&mut self, messages: &mut [Message<'_>]) -> Result<usize, BusError> {
        self.check_open()?;

        let recorded: Vec<Recorded> = messages
            .iter()
            .map(|m| match m {
                Message::Write { address, data } => Recorded::Write { address: *address, data: data.to_vec() },
                Message::Read { address, buf } => Recorded::Read { address: *address, len: buf.len() },
            })
            .collect();

        for m in &recorded {
            match m {
                Recorded::Write { address, data } => {
                    info!("sim: write {} to 0x{address:02x}: {}", data.len(), HEXLOWER.encode(data))
                }
                Recorded::Read { address, len } => info!("sim: read {len} from 0x{address:02x}"),
            }
        }

        let fault = self.injected_fault(&recorded);
        self.transfers.push(recorded);
        if fault {
            return Err(BusError::new("simulated bus fault", libc::EREMOTEIO, -1));
        }

        let mut completed = 0;
        for msg in messages.iter_mut() {
            if self.execute(msg).is_err() {
                break;
            }
            completed += 1;
        }
        Ok(completed)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.close_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let mut sim = SimulatedTag::new();
        let frame = [0x00, 0x10, 1, 2, 3, 4];
        let n = sim.transfer(&mut [Message::Write { address: 0x57, data: &frame }]).unwrap();
        assert_eq!(n, 1);
        assert_eq!(sim.memory(0x10, 4), &[1, 2, 3, 4]);

        let mut out = [0u8; 4];
        let n = sim
            .transfer(&mut [
                Message::Write { address: 0x57, data: &[0x00, 0x10] },
                Message::Read { address: 0x57, buf: &mut out },
            ])
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn scripted_write_faults_run_out() {
        let mut sim = SimulatedTag::new();
        sim.fail_writes_at(0x14, 2);
        let frame = [0x00, 0x14, 9, 9, 9, 9];
        for _ in 0..2 {
            let err = sim.transfer(&mut [Message::Write { address: 0x57, data: &frame }]).unwrap_err();
            assert_eq!(err.errno, libc::EREMOTEIO);
        }
        assert_eq!(sim.transfer(&mut [Message::Write { address: 0x57, data: &frame }]).unwrap(), 1);
        assert_eq!(sim.transfers().len(), 3);
    }

    #[test]
    fn dropped_writes_leave_memory() {
        let mut sim = SimulatedTag::with_contents(0x10, &[7, 7, 7, 7]);
        sim.drop_writes();
        let frame = [0x00, 0x10, 1, 2, 3, 4];
        assert_eq!(sim.transfer(&mut [Message::Write { address: 0x57, data: &frame }]).unwrap(), 1);
        assert_eq!(sim.memory(0x10, 4), &[7, 7, 7, 7]);
    }

    #[test]
    fn out_of_range_stops_transfer() {
        let mut sim = SimulatedTag::new();
        let mut out = vec![0u8; SIM_MEMORY_SIZE];
        let n = sim
            .transfer(&mut [
                Message::Write { address: 0x57, data: &[0x00, 0x10] },
                Message::Read { address: 0x57, buf: &mut out },
            ])
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn close_is_idempotent() {
        let mut sim = SimulatedTag::new();
        sim.close();
        sim.close();
        assert_eq!(sim.close_count(), 1);
        assert!(sim.set_retries(1).is_err());
    }
}
