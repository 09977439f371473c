//! Linux `i2c-dev` adapter (`/dev/i2c-N`)

use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

use crate::bus::{BusError, I2cBus, Message};

#[allow(non_camel_case_types)]
mod ffi {
    // <linux/i2c-dev.h>
    pub const I2C_RETRIES: u32 = 0x0701;
    pub const I2C_TIMEOUT: u32 = 0x0702;
    pub const I2C_SLAVE: u32 = 0x0703;
    pub const I2C_RDWR: u32 = 0x0707;

    // <linux/i2c.h>
    pub const I2C_M_RD: u16 = 0x0001;

    #[repr(C)]
    pub struct i2c_msg {
        pub addr: u16,
        pub flags: u16,
        pub len: u16,
        pub buf: *mut u8,
    }

    #[repr(C)]
    pub struct i2c_rdwr_ioctl_data {
        pub msgs: *mut i2c_msg,
        pub nmsgs: u32,
    }

    nix::ioctl_write_int_bad!(set_retries, I2C_RETRIES);
    nix::ioctl_write_int_bad!(set_timeout, I2C_TIMEOUT);
    nix::ioctl_write_int_bad!(set_slave_address, I2C_SLAVE);
    nix::ioctl_write_ptr_bad!(rdwr, I2C_RDWR, i2c_rdwr_ioctl_data);
}

/// `I2C_TIMEOUT` is expressed in units of 10 ms
const TIMEOUT_UNIT_MS: u128 = 10;

/// An open `/dev/i2c-N` character device
pub struct LinuxI2cBus {
    path: PathBuf,
    file: Option<File>,
}

impl LinuxI2cBus {
    /// Open `/dev/i2c-<bus>`
    pub fn open(bus: &str) -> Result<Self, BusError> {
        Self::open_path(format!("/dev/i2c-{bus}"))
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| BusError::from_io("failed to open i2c bus", &e))?;
        debug!("opened {}", path.display());
        Ok(Self { path, file: Some(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> Result<RawFd, BusError> {
        self.file
            .as_ref()
            .map(|f| f.as_raw_fd())
            .ok_or(BusError::new("i2c bus is closed", libc::EBADF, -1))
    }
}

impl I2cBus for LinuxI2cBus {
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), BusError> {
        let fd = self.fd()?;
        let units = timeout.as_millis().div_ceil(TIMEOUT_UNIT_MS);
        let units = libc::c_int::try_from(units)
            .map_err(|_| BusError::new("failed to set i2c timeout", libc::EINVAL, -1))?;
        // SAFETY: fd is an open i2c-dev descriptor, the argument is passed by value.
        unsafe { ffi::set_timeout(fd, units) }
            .map_err(|e| BusError::new("failed to set i2c timeout", e as i32, -1))?;
        Ok(())
    }

    fn set_retries(&mut self, retries: u32) -> Result<(), BusError> {
        let fd = self.fd()?;
        let retries = libc::c_int::try_from(retries)
            .map_err(|_| BusError::new("failed to set i2c retries", libc::EINVAL, -1))?;
        // SAFETY: fd is an open i2c-dev descriptor, the argument is passed by value.
        unsafe { ffi::set_retries(fd, retries) }
            .map_err(|e| BusError::new("failed to set i2c retries", e as i32, -1))?;
        Ok(())
    }

    fn bind_address(&mut self, address: u16) -> Result<(), BusError> {
        let fd = self.fd()?;
        // SAFETY: fd is an open i2c-dev descriptor, the argument is passed by value.
        unsafe { ffi::set_slave_address(fd, libc::c_int::from(address)) }
            .map_err(|e| BusError::new("failed to set i2c device address", e as i32, -1))?;
        Ok(())
    }

    fn transfer(&mut self, messages: &mut [Message<'_>]) -> Result<usize, BusError> {
        let fd = self.fd()?;

        let mut raw = Vec::with_capacity(messages.len());
        for msg in messages.iter_mut() {
            let len = u16::try_from(msg.len())
                .map_err(|_| BusError::new("i2c message too long", libc::EINVAL, -1))?;
            raw.push(match msg {
                Message::Write { address, data } => ffi::i2c_msg {
                    addr: *address,
                    flags: 0,
                    len,
                    // the kernel only reads from buffers without I2C_M_RD
                    buf: data.as_ptr().cast_mut(),
                },
                Message::Read { address, buf } => ffi::i2c_msg {
                    addr: *address,
                    flags: ffi::I2C_M_RD,
                    len,
                    buf: buf.as_mut_ptr(),
                },
            });
        }

        let nmsgs = u32::try_from(raw.len())
            .map_err(|_| BusError::new("too many i2c messages", libc::EINVAL, -1))?;
        let data = ffi::i2c_rdwr_ioctl_data { msgs: raw.as_mut_ptr(), nmsgs };

        // SAFETY: every msg points into a buffer borrowed from `messages` for the
        // duration of this call, with `len` matching the buffer length.
        let completed = unsafe { ffi::rdwr(fd, &data) }
            .map_err(|e| BusError::new("i2c transfer failed", e as i32, -1))?;

        Ok(usize::try_from(completed).unwrap_or(0))
    }

    fn close(&mut self) {
        if let Some(file) = self.file.take() {
            debug!("closing {}", self.path.display());
            drop(file);
        }
    }
}

impl Drop for LinuxI2cBus {
    fn drop(&mut self) {
        self.close();
    }
}
