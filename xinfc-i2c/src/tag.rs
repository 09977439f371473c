//! Tag memory transactions
//!
//! The chip exposes its NDEF area behind a 16-bit big-endian memory address
//! starting at [`NDEF_BASE_ADDR`]. Reads set the address and read back in one
//! combined transfer. Writes are committed by the chip in 4-byte pages, so
//! every page is sent as its own address-qualified message instead of relying
//! on address auto-increment.

use std::time::Duration;

use log::debug;
use xinfc_proto::NDEF_CAPACITY;

use crate::bus::{BusError, I2cBus, Message};

/// Tag memory address of the first NDEF byte
pub const NDEF_BASE_ADDR: u16 = 0x10;

/// Chip read granularity and write page size
pub const PAGE_SIZE: usize = 4;

/// Address bytes plus one page of data
const WIRE_UNIT: usize = 2 + PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("invalid ndef buffer: need {needed} bytes, have {available}")]
    InvalidBuffer { needed: usize, available: usize },
    #[error("invalid read alignment: {0} is not a multiple of 4")]
    InvalidAlignment(usize),
    #[error("invalid ndef buffer size: {0} exceeds 160")]
    InvalidSize(usize),
    #[error(transparent)]
    Config(BusError),
    #[error(transparent)]
    BusIo(BusError),
}

impl TagError {
    /// Bus-level details, when the failure came from the adapter
    pub fn bus_error(&self) -> Option<&BusError> {
        match self {
            TagError::Config(e) | TagError::BusIo(e) => Some(e),
            _ => None,
        }
    }
}

/// Round `len` up to whole pages
pub fn page_aligned(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// An NFC tag chip behind an I2C bus
///
/// Owns the bus for its whole lifetime. The most recent failure is kept in
/// `last_error` and cleared when the next operation starts.
pub struct TagDevice<B: I2cBus> {
    bus: B,
    address: u16,
    last_error: Option<TagError>,
}

impl<B: I2cBus> TagDevice<B> {
    pub fn new(bus: B, address: u16) -> Self {
        Self { bus, address, last_error: None }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn last_error(&self) -> Option<&TagError> {
        self.last_error.as_ref()
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn configure_timeout(&mut self, timeout: Duration) -> Result<(), TagError> {
        self.last_error = None;
        let res = self.bus.set_timeout(timeout).map_err(TagError::Config);
        self.record(res)
    }

    pub fn configure_retries(&mut self, retries: u32) -> Result<(), TagError> {
        self.last_error = None;
        let res = self.bus.set_retries(retries).map_err(TagError::Config);
        self.record(res)
    }

    pub fn bind_address(&mut self) -> Result<(), TagError> {
        self.last_error = None;
        let res = self.bus.bind_address(self.address).map_err(TagError::Config);
        self.record(res)
    }

    /// Read `requested` bytes of NDEF area into `out`
    ///
    /// `requested` must be a multiple of 4 and is clamped to 160. The
    /// destination is zeroed before the transfer. Returns the number of bytes
    /// read.
    pub fn read_tag(&mut self, out: &mut [u8], requested: usize) -> Result<usize, TagError> {
        self.last_error = None;
        let res = self.read_tag_inner(out, requested);
        self.record(res)
    }

    fn read_tag_inner(&mut self, out: &mut [u8], requested: usize) -> Result<usize, TagError> {
        if requested == 0 {
            return Ok(0);
        }
        if requested % PAGE_SIZE != 0 {
            return Err(TagError::InvalidAlignment(requested));
        }
        let len = requested.min(NDEF_CAPACITY);
        if out.len() < len {
            return Err(TagError::InvalidBuffer { needed: len, available: out.len() });
        }

        let dest = &mut out[..len];
        dest.fill(0);

        let addr = NDEF_BASE_ADDR.to_be_bytes();
        let mut messages = [
            Message::Write { address: self.address, data: &addr },
            Message::Read { address: self.address, buf: dest },
        ];

        let completed = self
            .bus
            .transfer(&mut messages)
            .map_err(|e| TagError::BusIo(e.context("failed to read from i2c device")))?;
        if completed != messages.len() {
            return Err(TagError::BusIo(BusError::new(
                "failed to read from i2c device",
                0,
                completed as i32,
            )));
        }

        debug!("read {len} bytes from tag 0x{:02x}", self.address);
        Ok(len)
    }

    /// Write `data` to the NDEF area at byte offset `offset`
    ///
    /// The data is split into 4-byte pages, each sent with its own address;
    /// a short last page is zero-padded on the wire.
    pub fn write_tag_at(&mut self, data: &[u8], offset: u16) -> Result<(), TagError> {
        self.last_error = None;
        let res = self.write_tag_at_inner(data, offset);
        self.record(res)
    }

    fn write_tag_at_inner(&mut self, data: &[u8], offset: u16) -> Result<(), TagError> {
        if data.is_empty() {
            return Ok(());
        }
        if data.len() > NDEF_CAPACITY {
            return Err(TagError::InvalidSize(data.len()));
        }

        let units = page_frames(data, offset);
        let mut messages: Vec<Message<'_>> = units
            .iter()
            .map(|unit| Message::Write { address: self.address, data: unit })
            .collect();

        let completed = self
            .bus
            .transfer(&mut messages)
            .map_err(|e| TagError::BusIo(e.context("failed to write to i2c device")))?;
        if completed != messages.len() {
            return Err(TagError::BusIo(BusError::new(
                "failed to write to i2c device",
                0,
                completed as i32,
            )));
        }

        debug!(
            "wrote {} bytes at offset {offset} in {} pages",
            data.len(),
            messages.len()
        );
        Ok(())
    }

    /// Release the bus; safe to call more than once
    pub fn close(&mut self) {
        self.bus.close();
    }

    fn record<T>(&mut self, res: Result<T, TagError>) -> Result<T, TagError> {
        if let Err(e) = &res {
            self.last_error = Some(*e);
        }
        res
    }
}

impl<B: I2cBus> Drop for TagDevice<B> {
    fn drop(&mut self) {
        self.bus.close();
    }
}

/// Wire units for `data`: 2-byte page address followed by 4 data bytes
fn page_frames(data: &[u8], offset: u16) -> Vec<[u8; WIRE_UNIT]> {
    data.chunks(PAGE_SIZE)
        .enumerate()
        .map(|(i, page)| {
            let addr = NDEF_BASE_ADDR
                .wrapping_add(offset)
                .wrapping_add((i * PAGE_SIZE) as u16);
            let mut unit = [0u8; WIRE_UNIT];
            unit[..2].copy_from_slice(&addr.to_be_bytes());
            unit[2..2 + page.len()].copy_from_slice(page);
            unit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Recorded, SimulatedTag};

    const DEV: u16 = 0x57;

    fn device() -> TagDevice<SimulatedTag> {
        TagDevice::new(SimulatedTag::new(), DEV)
    }

    #[test]
    fn write_splits_into_padded_pages() {
        let mut tag = device();
        let data: Vec<u8> = (1..=10).collect();
        tag.write_tag_at(&data, 0).unwrap();

        let transfers = tag.bus().transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(
            transfers[0],
            vec![
                Recorded::Write { address: DEV, data: vec![0x00, 0x10, 1, 2, 3, 4] },
                Recorded::Write { address: DEV, data: vec![0x00, 0x14, 5, 6, 7, 8] },
                Recorded::Write { address: DEV, data: vec![0x00, 0x18, 9, 10, 0, 0] },
            ]
        );
    }

    #[test]
    fn write_offset_shifts_page_addresses() {
        let mut tag = device();
        tag.write_tag_at(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE], 0x20).unwrap();
        let transfers = tag.bus().transfers();
        assert_eq!(
            transfers[0],
            vec![
                Recorded::Write { address: DEV, data: vec![0x00, 0x30, 0xAA, 0xBB, 0xCC, 0xDD] },
                Recorded::Write { address: DEV, data: vec![0x00, 0x34, 0xEE, 0, 0, 0] },
            ]
        );
        assert_eq!(tag.bus().memory(0x30, 5), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
    }

    #[test]
    fn write_rejects_oversize_and_skips_empty() {
        let mut tag = device();
        assert_eq!(tag.write_tag_at(&[0u8; 161], 0), Err(TagError::InvalidSize(161)));
        assert_eq!(tag.last_error(), Some(&TagError::InvalidSize(161)));

        tag.write_tag_at(&[], 0).unwrap();
        assert_eq!(tag.last_error(), None);
        assert!(tag.bus().transfers().is_empty());
    }

    #[test]
    fn write_fault_is_bus_io() {
        let mut tag = device();
        tag.bus_mut().fail_writes_at(0x10, 1);
        let err = tag.write_tag_at(&[1, 2, 3, 4], 0).unwrap_err();
        let bus = err.bus_error().unwrap();
        assert_eq!(bus.message, "failed to write to i2c device");
        assert_eq!(bus.errno, libc::EREMOTEIO);
    }

    #[test]
    fn read_is_one_combined_transfer() {
        let data: Vec<u8> = (0..16).collect();
        let mut tag = TagDevice::new(SimulatedTag::with_contents(NDEF_BASE_ADDR, &data), DEV);
        let mut out = [0xFFu8; NDEF_CAPACITY];

        assert_eq!(tag.read_tag(&mut out, 16).unwrap(), 16);
        assert_eq!(&out[..16], &data[..]);
        // untouched past the requested length
        assert!(out[16..].iter().all(|b| *b == 0xFF));

        assert_eq!(
            tag.bus().transfers()[0],
            vec![
                Recorded::Write { address: DEV, data: vec![0x00, 0x10] },
                Recorded::Read { address: DEV, len: 16 },
            ]
        );
    }

    #[test]
    fn read_alignment_and_clamp() {
        let mut tag = device();
        let mut out = [0u8; 256];

        assert_eq!(tag.read_tag(&mut out, 10), Err(TagError::InvalidAlignment(10)));
        assert_eq!(tag.read_tag(&mut out, 0), Ok(0));
        assert!(tag.bus().transfers().is_empty());

        assert_eq!(tag.read_tag(&mut out, 200), Ok(NDEF_CAPACITY));
        assert_eq!(tag.bus().transfers()[0][1], Recorded::Read { address: DEV, len: NDEF_CAPACITY });
    }

    #[test]
    fn read_needs_room_for_request() {
        let mut tag = device();
        let mut out = [0u8; 8];
        assert_eq!(
            tag.read_tag(&mut out, 12),
            Err(TagError::InvalidBuffer { needed: 12, available: 8 })
        );
    }

    #[test]
    fn read_zeroes_destination_before_transfer() {
        let mut tag = device();
        tag.bus_mut().fail_reads(1);
        let mut out = [0xEEu8; 8];
        let err = tag.read_tag(&mut out, 8).unwrap_err();
        assert!(matches!(err, TagError::BusIo(_)));
        assert_eq!(out, [0u8; 8]);
        assert_eq!(tag.last_error(), Some(&err));
    }

    #[test]
    fn configuration_errors_and_reset() {
        let mut tag = device();
        tag.configure_timeout(Duration::from_millis(30)).unwrap();
        tag.configure_retries(2).unwrap();
        tag.bind_address().unwrap();
        assert_eq!(tag.bus().settings().address, Some(DEV));

        tag.close();
        let err = tag.configure_retries(2).unwrap_err();
        assert!(matches!(err, TagError::Config(e) if e.errno == libc::EBADF));
        assert!(tag.last_error().is_some());
    }

    #[test]
    fn page_alignment() {
        assert_eq!(page_aligned(0), 0);
        assert_eq!(page_aligned(1), 4);
        assert_eq!(page_aligned(77), 80);
        assert_eq!(page_aligned(80), 80);
    }
}
