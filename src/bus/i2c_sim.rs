//! In-memory I2C adapter.
//!
//! Every attached slave is a flat 256-byte register file with a register
//! pointer: a write sets the pointer from its first byte and stores the rest
//! at consecutive registers, a read returns bytes starting at the pointer.
//! A slave may gate the pointer increment on a control bit, in which case
//! bursts keep hitting the same register while that bit is clear.
//! All traffic is appended to a wire log so callers can assert the exact
//! byte sequence a driver produced.

use super::i2c::{AddressMode, I2cBackend};
use log::trace;
use parking_lot::Mutex;
use std::{collections::HashMap, io, sync::Arc};

/// Remote I/O error, what the kernel reports when nobody ACKs an address.
pub const EREMOTEIO: i32 = 121;
/// Address claimed by a kernel driver.
pub const EBUSY: i32 = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    Open(u8),
    Close,
    SetSlave(u16, AddressMode),
    Write(u16, Vec<u8>),
    Read(u16, Vec<u8>),
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedFaults {
    pub refuse_open: bool,
    pub refuse_slave_address: bool,
    pub refuse_writes: bool,
    pub truncate_writes: bool,
    pub truncate_reads: bool,
}

struct SimulatedDevice {
    registers: [u8; 256],
    pointer: u8,
    /// (register, mask) that must be set for the pointer to advance
    increment_gate: Option<(u8, u8)>,
}

impl SimulatedDevice {
    fn new() -> Self {
        SimulatedDevice {
            registers: [0u8; 256],
            pointer: 0,
            increment_gate: None,
        }
    }

    fn advance(&mut self) {
        let enabled = match self.increment_gate {
            Some((register, mask)) => self.registers[register as usize] & mask != 0,
            None => true,
        };

        if enabled {
            self.pointer = self.pointer.wrapping_add(1);
        }
    }
}

#[derive(Default)]
pub struct SimulatedBus {
    devices: HashMap<u16, SimulatedDevice>,
    log: Vec<WireEvent>,
    pub faults: SimulatedFaults,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Attach a slave with all registers cleared.
    pub fn attach(&mut self, address: u16) {
        self.devices.insert(address, SimulatedDevice::new());
    }

    pub fn attach_with(&mut self, address: u16, registers: &[(u8, u8)]) {
        self.attach(address);
        for &(register, value) in registers {
            self.set_register(address, register, value);
        }
    }

    /// Like [`SimulatedBus::attach_with`], but the register pointer only
    /// advances while `gate_register & gate_mask` is nonzero, e.g. a PCA9685
    /// with MODE1.AI.
    pub fn attach_with_increment_gate(
        &mut self,
        address: u16,
        registers: &[(u8, u8)],
        gate_register: u8,
        gate_mask: u8,
    ) {
        self.attach_with(address, registers);
        if let Some(device) = self.devices.get_mut(&address) {
            device.increment_gate = Some((gate_register, gate_mask));
        }
    }

    pub fn is_attached(&self, address: u16) -> bool {
        self.devices.contains_key(&address)
    }

    pub fn register(&self, address: u16, register: u8) -> Option<u8> {
        self.devices
            .get(&address)
            .map(|device| device.registers[register as usize])
    }

    pub fn set_register(&mut self, address: u16, register: u8, value: u8) {
        if let Some(device) = self.devices.get_mut(&address) {
            device.registers[register as usize] = value;
        }
    }

    pub fn log(&self) -> &[WireEvent] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Payloads written to one slave, in order.
    pub fn writes_to(&self, address: u16) -> Vec<Vec<u8>> {
        self.log
            .iter()
            .filter_map(|event| match event {
                WireEvent::Write(a, bytes) if *a == address => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count_slave_bindings(&self) -> usize {
        self.log
            .iter()
            .filter(|event| matches!(event, WireEvent::SetSlave(..)))
            .count()
    }

    fn device(&mut self, address: u16) -> io::Result<&mut SimulatedDevice> {
        self.devices
            .get_mut(&address)
            .ok_or_else(|| io::Error::from_raw_os_error(EREMOTEIO))
    }
}

/// Backend handle onto a [`SimulatedBus`]. Several handles may share one bus.
pub struct SimulatedI2c {
    bus: Arc<Mutex<SimulatedBus>>,
    open: bool,
    slave: Option<u16>,
}

impl SimulatedI2c {
    pub fn new(bus: Arc<Mutex<SimulatedBus>>) -> Self {
        SimulatedI2c {
            bus,
            open: false,
            slave: None,
        }
    }

    pub fn bus(&self) -> Arc<Mutex<SimulatedBus>> {
        self.bus.clone()
    }

    fn slave(&self) -> io::Result<u16> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device file is closed"));
        }

        self.slave
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no slave address bound"))
    }
}

impl I2cBackend for SimulatedI2c {
    fn open(&mut self, bus_id: u8) -> io::Result<()> {
        let mut bus = self.bus.lock();
        if bus.faults.refuse_open {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such device: i2c-{}", bus_id),
            ));
        }

        bus.log.push(WireEvent::Open(bus_id));
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.bus.lock().log.push(WireEvent::Close);
        }
        self.open = false;
        self.slave = None;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let address = self.slave()?;
        let mut bus = self.bus.lock();
        if bus.faults.refuse_writes {
            return Err(io::Error::from_raw_os_error(EREMOTEIO));
        }

        bus.log.push(WireEvent::Write(address, buf.to_vec()));
        if bus.faults.truncate_writes && !buf.is_empty() {
            return Ok(buf.len() - 1);
        }

        let device = bus.device(address)?;
        if let Some((&register, data)) = buf.split_first() {
            device.pointer = register;
            for &byte in data {
                device.registers[device.pointer as usize] = byte;
                device.advance();
            }
        }

        trace!("sim write {:#04x}: {:02x?}", address, buf);
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let address = self.slave()?;
        let mut bus = self.bus.lock();
        let truncate = bus.faults.truncate_reads;
        let device = bus.device(address)?;

        let count = if truncate && !buf.is_empty() {
            buf.len() - 1
        } else {
            buf.len()
        };

        for byte in buf.iter_mut().take(count) {
            *byte = device.registers[device.pointer as usize];
            device.advance();
        }

        bus.log.push(WireEvent::Read(address, buf[..count].to_vec()));
        trace!("sim read {:#04x}: {:02x?}", address, &buf[..count]);
        Ok(count)
    }

    fn set_slave_address(&mut self, address: u16, mode: AddressMode) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device file is closed"));
        }

        let mut bus = self.bus.lock();
        if bus.faults.refuse_slave_address {
            return Err(io::Error::from_raw_os_error(EBUSY));
        }

        bus.log.push(WireEvent::SetSlave(address, mode));
        self.slave = Some(address);
        Ok(())
    }
}
