use super::i2c::{AddressMode, I2CError, I2cBackend};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::{io, sync::Arc};

pub type SharedTransport = Arc<Mutex<I2cTransport>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Unset,
    Address(u16),
}

/// One opened I2C adapter.
///
/// The transport remembers which slave the descriptor is currently bound to
/// and only issues the binding ioctl when a caller asks for a different one.
/// A failed binding is parked and handed to the next `write`/`read`.
pub struct I2cTransport {
    bus_id: u8,
    backend: Box<dyn I2cBackend>,
    slave: SlaveState,
    mode: AddressMode,
    pending_error: Option<I2CError>,
    last_os_error: Option<i32>,
}

impl I2cTransport {
    /// Creates a closed transport, call [`I2cTransport::open`] before use.
    pub fn new(bus_id: u8, backend: Box<dyn I2cBackend>) -> Self {
        I2cTransport {
            bus_id,
            backend,
            slave: SlaveState::Unset,
            mode: AddressMode::default(),
            pending_error: None,
            last_os_error: None,
        }
    }

    pub fn into_shared(self) -> SharedTransport {
        Arc::new(Mutex::new(self))
    }

    pub fn bus_id(&self) -> u8 {
        self.bus_id
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_open()
    }

    pub fn slave_state(&self) -> SlaveState {
        self.slave
    }

    pub fn address_mode(&self) -> AddressMode {
        self.mode
    }

    pub fn last_os_error(&self) -> Option<i32> {
        self.last_os_error
    }

    pub fn open(&mut self) -> Result<(), I2CError> {
        if self.is_open() {
            return Ok(());
        }

        match self.backend.open(self.bus_id) {
            Ok(_) => {
                debug!("I2C bus {} opened", self.bus_id);
                self.slave = SlaveState::Unset;
                self.pending_error = None;
                self.last_os_error = None;
                Ok(())
            }
            Err(e) => {
                let err = self.record_os_error(&e, "failed to open device file");
                warn!("{}", err);
                Err(err)
            }
        }
    }

    pub fn close(&mut self) {
        if self.is_open() {
            debug!("Closing I2C bus {}", self.bus_id);
        }
        self.backend.close();
        self.slave = SlaveState::Unset;
    }

    /// Closes and reopens the device file. The only recovery path after a
    /// transport fault; nothing in the bus layer calls it on its own.
    pub fn reopen(&mut self) -> Result<(), I2CError> {
        info!("Reopening I2C bus {}", self.bus_id);
        self.close();
        self.open()
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize, I2CError> {
        self.check_health()?;
        match self.backend.write(buf) {
            Ok(count) if count == buf.len() => Ok(count),
            Ok(count) => Err(I2CError::ShortTransfer {
                expected: buf.len(),
                actual: count,
            }),
            Err(e) => Err(self.record_os_error(&e, "write failed")),
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, I2CError> {
        self.check_health()?;
        let expected = buf.len();
        match self.backend.read(buf) {
            Ok(count) if count == expected => Ok(count),
            Ok(count) => Err(I2CError::ShortTransfer {
                expected,
                actual: count,
            }),
            Err(e) => Err(self.record_os_error(&e, "read failed")),
        }
    }

    /// Two separate syscalls, not a combined transaction: another process on
    /// the same adapter may get in between. The read is skipped when the
    /// write fails.
    pub fn write_read(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(usize, usize), I2CError> {
        let transferred = self.write(tx)?;
        let received = self.read(rx)?;
        Ok((transferred, received))
    }

    pub fn configure_slave_address(&mut self, address: u16) {
        if self.slave == SlaveState::Address(address) {
            return;
        }

        self.slave = SlaveState::Address(address);
        self.bind_slave();
    }

    pub fn configure_mode(&mut self, mode: AddressMode) {
        if self.mode == mode {
            return;
        }

        self.mode = mode;
        self.bind_slave();
    }

    fn bind_slave(&mut self) {
        let address = match self.slave {
            SlaveState::Address(address) => address,
            SlaveState::Unset => return,
        };

        if !self.is_open() {
            // bound again after the next successful open
            self.slave = SlaveState::Unset;
            return;
        }

        if address > self.mode.max_address() {
            error!(
                "Slave address {:#x} does not fit {} addressing on I2C bus {}",
                address, self.mode, self.bus_id
            );
            self.pending_error = Some(I2CError::InvalidAddress(address));
            self.slave = SlaveState::Unset;
            return;
        }

        match self.backend.set_slave_address(address, self.mode) {
            Ok(_) => debug!(
                "I2C bus {} bound to slave {:#04x} ({})",
                self.bus_id, address, self.mode
            ),
            Err(e) => {
                let err = self.record_os_error(
                    &e,
                    &format!("failed to acquire bus access and/or talk to slave {:#04x}", address),
                );
                error!("{}", err);
                self.pending_error = Some(err);
                self.slave = SlaveState::Unset;
            }
        }
    }

    fn check_health(&mut self) -> Result<(), I2CError> {
        if !self.is_open() {
            return Err(I2CError::BusClosed(self.bus_id));
        }

        match self.pending_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record_os_error(&mut self, err: &io::Error, context: &str) -> I2CError {
        self.last_os_error = err.raw_os_error();
        I2CError::from_io(self.bus_id, err, context)
    }
}

impl Drop for I2cTransport {
    fn drop(&mut self) {
        self.close();
    }
}
