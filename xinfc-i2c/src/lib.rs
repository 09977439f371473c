//! xinfc I2C layer
//!
//! Bus access and tag memory transactions for NFC tag chips with an I2C
//! memory interface.
//!
//! This crate provides:
//! - [`I2cBus`], the adapter seam, with a Linux `i2c-dev` implementation and
//!   an in-memory simulated chip
//! - [`TagDevice`], page-aligned reads and writes of the tag's NDEF area

pub mod bus;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod sim;
pub mod tag;

pub use bus::{BusError, I2cBus, Message};
#[cfg(target_os = "linux")]
pub use linux::LinuxI2cBus;
pub use sim::{Recorded, SimulatedTag};
pub use tag::{NDEF_BASE_ADDR, PAGE_SIZE, TagDevice, TagError, page_aligned};
