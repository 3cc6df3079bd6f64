use super::{
    i2c::{AddressMode, I2CError},
    transport::{I2cTransport, SharedTransport},
};
use parking_lot::MutexGuard;

pub const SCRATCH_LEN: usize = 128;

/// Register-level access to one slave on a shared transport.
///
/// Each call locks the transport for its whole duration and binds it to this
/// slave first, so a read-modify-write never interleaves with traffic from
/// another `RegisterBus` sharing the adapter.
pub struct RegisterBus {
    transport: SharedTransport,
    address: u16,
    scratch: [u8; SCRATCH_LEN],
}

fn bind(transport: &SharedTransport, address: u16) -> MutexGuard<'_, I2cTransport> {
    let mut guard = transport.lock();
    guard.configure_slave_address(address);
    guard
}

fn read_into(
    transport: &mut I2cTransport,
    scratch: &mut [u8; SCRATCH_LEN],
    register: u8,
    length: usize,
) -> Result<usize, I2CError> {
    if length == 0 || length > SCRATCH_LEN {
        return Err(I2CError::InvalidArgument(format!(
            "read length must be between 1 and {}, got {}",
            SCRATCH_LEN, length
        )));
    }

    let (_, received) = transport.write_read(&[register], &mut scratch[..length])?;
    Ok(received)
}

fn write_from(
    transport: &mut I2cTransport,
    scratch: &mut [u8; SCRATCH_LEN],
    register: u8,
    data: &[u8],
) -> Result<usize, I2CError> {
    if data.len() >= SCRATCH_LEN {
        return Err(I2CError::InvalidArgument(format!(
            "write length must be at most {}, got {}",
            SCRATCH_LEN - 1,
            data.len()
        )));
    }

    scratch[0] = register;
    scratch[1..=data.len()].copy_from_slice(data);
    transport.write(&scratch[..=data.len()])
}

/// Mask and shift for a field of `count` bits whose top bit is `high_bit`.
fn field(high_bit: u8, count: u8) -> Result<(u8, u8), I2CError> {
    if high_bit > 7 || count == 0 || count > high_bit + 1 {
        return Err(I2CError::InvalidArgument(format!(
            "bit field of {} bit(s) ending at bit {} does not fit in a byte",
            count, high_bit
        )));
    }

    let shift = high_bit + 1 - count;
    let mask = (((1u16 << count) - 1) << shift) as u8;
    Ok((mask, shift))
}

fn check_bit(bit: u8) -> Result<u8, I2CError> {
    if bit > 7 {
        return Err(I2CError::InvalidArgument(format!("bit index {} is out of range", bit)));
    }

    Ok(1 << bit)
}

impl RegisterBus {
    pub fn new(transport: &SharedTransport, address: u16) -> Self {
        RegisterBus {
            transport: transport.clone(),
            address,
            scratch: [0u8; SCRATCH_LEN],
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    pub fn bus_id(&self) -> u8 {
        self.transport.lock().bus_id()
    }

    pub fn is_open(&self) -> bool {
        self.transport.lock().is_open()
    }

    pub fn set_address_mode(&self, mode: AddressMode) {
        self.transport.lock().configure_mode(mode);
    }

    pub fn reopen(&self) -> Result<(), I2CError> {
        self.transport.lock().reopen()
    }

    pub fn read_byte(&mut self, register: u8) -> Result<u8, I2CError> {
        let mut transport = bind(&self.transport, self.address);
        read_into(&mut transport, &mut self.scratch, register, 1)?;
        Ok(self.scratch[0])
    }

    pub fn write_byte(&mut self, register: u8, value: u8) -> Result<usize, I2CError> {
        let mut transport = bind(&self.transport, self.address);
        write_from(&mut transport, &mut self.scratch, register, &[value])
    }

    /// The device sends the high byte first.
    pub fn read_word(&mut self, register: u8) -> Result<u16, I2CError> {
        let mut transport = bind(&self.transport, self.address);
        read_into(&mut transport, &mut self.scratch, register, 2)?;
        Ok(u16::from_be_bytes([self.scratch[0], self.scratch[1]]))
    }

    /// Goes out low byte first, the opposite of [`RegisterBus::read_word`].
    pub fn write_word(&mut self, register: u8, value: u16) -> Result<usize, I2CError> {
        let mut transport = bind(&self.transport, self.address);
        write_from(&mut transport, &mut self.scratch, register, &value.to_le_bytes())
    }

    pub fn read_bytes(&mut self, register: u8, buf: &mut [u8]) -> Result<usize, I2CError> {
        let mut transport = bind(&self.transport, self.address);
        let received = read_into(&mut transport, &mut self.scratch, register, buf.len())?;
        buf.copy_from_slice(&self.scratch[..received]);
        Ok(received)
    }

    /// Sends `[register, data..]` in a single write.
    pub fn write_bytes(&mut self, register: u8, data: &[u8]) -> Result<usize, I2CError> {
        let mut transport = bind(&self.transport, self.address);
        write_from(&mut transport, &mut self.scratch, register, data)
    }

    pub fn read_bit(&mut self, register: u8, bit: u8) -> Result<bool, I2CError> {
        let mask = check_bit(bit)?;
        Ok(self.read_byte(register)? & mask != 0)
    }

    pub fn write_bit(&mut self, register: u8, bit: u8, value: bool) -> Result<usize, I2CError> {
        let mask = check_bit(bit)?;
        let mut transport = bind(&self.transport, self.address);
        read_into(&mut transport, &mut self.scratch, register, 1)
            .map_err(|e| I2CError::PreconditionFailed { register, source: Box::new(e) })?;

        let current = self.scratch[0];
        let updated = if value { current | mask } else { current & !mask };
        write_from(&mut transport, &mut self.scratch, register, &[updated])
    }

    /// Right-aligned field of `count` bits ending at `high_bit`, e.g.
    /// `high_bit = 4, count = 3` selects bits 4..=2.
    pub fn read_bits(&mut self, register: u8, high_bit: u8, count: u8) -> Result<u8, I2CError> {
        let (mask, shift) = field(high_bit, count)?;
        Ok((self.read_byte(register)? & mask) >> shift)
    }

    pub fn write_bits(
        &mut self,
        register: u8,
        high_bit: u8,
        count: u8,
        value: u8,
    ) -> Result<usize, I2CError> {
        let (mask, shift) = field(high_bit, count)?;
        let mut transport = bind(&self.transport, self.address);
        read_into(&mut transport, &mut self.scratch, register, 1)
            .map_err(|e| I2CError::PreconditionFailed { register, source: Box::new(e) })?;

        let updated = (self.scratch[0] & !mask) | ((value << shift) & mask);
        write_from(&mut transport, &mut self.scratch, register, &[updated])
    }
}
