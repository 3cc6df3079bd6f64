use super::i2c::{AddressMode, I2cBackend};
use i2c_linux::I2c;
use log::debug;
use std::{
    fs::File,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

const I2C_CLASS_PATH: &str = "/sys/class/i2c-dev";
const I2C_DEVICE_PATH: &str = "/dev";

pub fn device_path(bus_id: u8) -> PathBuf {
    Path::new(I2C_DEVICE_PATH).join(format!("i2c-{}", bus_id))
}

/// Whether the kernel exposes I2C character devices at all.
pub fn is_supported() -> bool {
    let path = Path::new(I2C_CLASS_PATH);
    path.exists() && path.is_dir()
}

/// `/dev/i2c-N` backend. A closed backend holds no file at all.
pub struct SysfsI2c {
    device: Option<I2c<File>>,
}

impl SysfsI2c {
    pub fn new() -> Self {
        SysfsI2c { device: None }
    }

    fn device(&mut self) -> io::Result<&mut I2c<File>> {
        self.device.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "I2C device file is closed")
        })
    }
}

impl Default for SysfsI2c {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cBackend for SysfsI2c {
    fn open(&mut self, bus_id: u8) -> io::Result<()> {
        let path = device_path(bus_id);
        let device = I2c::from_path(&path)?;
        debug!("Opened {}", path.display());
        self.device = Some(device);
        Ok(())
    }

    fn close(&mut self) {
        // dropping the handle closes the descriptor
        self.device = None;
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.device()?.write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.device()?.read(buf)
    }

    fn set_slave_address(&mut self, address: u16, mode: AddressMode) -> io::Result<()> {
        self.device()?
            .smbus_set_slave_address(address, mode.is_ten_bit())
    }
}
