//! I2C bus abstraction
//!
//! The tag layer only needs what Linux `i2c-dev` offers: a few settings and a
//! combined transfer of several messages under one bus lock.

use std::time::Duration;

/// One direction-tagged unit of a combined transfer
#[derive(Debug)]
pub enum Message<'a> {
    Write { address: u16, data: &'a [u8] },
    Read { address: u16, buf: &'a mut [u8] },
}

impl Message<'_> {
    pub fn address(&self) -> u16 {
        match self {
            Message::Write { address, .. } | Message::Read { address, .. } => *address,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Message::Write { data, .. } => data.len(),
            Message::Read { buf, .. } => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Message::Read { .. })
    }
}

/// Failure reported by the bus or by a tag operation
///
/// `errno` is the OS error code (0 when the failure was detected in user
/// space) and `ret` the result of the failing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{message}! ret={ret} errno={errno}")]
pub struct BusError {
    pub message: &'static str,
    pub errno: i32,
    pub ret: i32,
}

impl BusError {
    pub fn new(message: &'static str, errno: i32, ret: i32) -> Self {
        Self { message, errno, ret }
    }

    /// Build from an `io::Error`, keeping its raw OS code
    pub fn from_io(message: &'static str, err: &std::io::Error) -> Self {
        Self::new(message, err.raw_os_error().unwrap_or(0), -1)
    }

    /// Same failure, reported under a different message
    pub fn context(self, message: &'static str) -> Self {
        Self { message, ..self }
    }
}

/// Host side of an I2C adapter
///
/// Implementations are used from a single thread; every call blocks until the
/// bus answers or the adapter timeout fires.
pub trait I2cBus {
    /// Adapter response timeout
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), BusError>;

    /// Adapter-level retries on arbitration loss
    fn set_retries(&mut self, retries: u32) -> Result<(), BusError>;

    /// Default 7-bit device address for plain reads and writes
    fn bind_address(&mut self, address: u16) -> Result<(), BusError>;

    /// Execute `messages` as one combined transfer
    ///
    /// Returns the number of messages the adapter completed.
    fn transfer(&mut self, messages: &mut [Message<'_>]) -> Result<usize, BusError>;

    /// Release the adapter; calling it again is a no-op
    fn close(&mut self);
}

impl<B: I2cBus + ?Sized> I2cBus for &mut B {
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), BusError> {
        (**self).set_timeout(timeout)
    }

    fn set_retries(&mut self, retries: u32) -> Result<(), BusError> {
        (**self).set_retries(retries)
    }

    fn bind_address(&mut self, address: u16) -> Result<(), BusError> {
        (**self).bind_address(address)
    }

    fn transfer(&mut self, messages: &mut [Message<'_>]) -> Result<usize, BusError> {
        (**self).transfer(messages)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
