use std::fmt::Display;
use std::io;

pub const MAX_SEVEN_BIT_ADDRESS: u16 = 0x7F;
pub const MAX_TEN_BIT_ADDRESS: u16 = 0x3FF;

/// Addressing mode the device file is bound with. 7-bit is the plain
/// `I2C_SLAVE` binding, 10-bit additionally enables `I2C_TENBIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum AddressMode {
    #[default]
    #[strum(serialize = "7-bit")]
    SevenBit,
    #[strum(serialize = "10-bit")]
    TenBit,
}

impl AddressMode {
    pub const fn max_address(self) -> u16 {
        match self {
            AddressMode::SevenBit => MAX_SEVEN_BIT_ADDRESS,
            AddressMode::TenBit => MAX_TEN_BIT_ADDRESS,
        }
    }

    pub const fn is_ten_bit(self) -> bool {
        matches!(self, AddressMode::TenBit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The device file could not be opened, is closed, or a syscall failed.
    Transport,
    /// A read or write moved a different number of bytes than requested.
    Transfer,
    /// The read that a modify or merge depends on did not complete.
    Precondition,
    /// The caller asked for something the bus cannot do.
    Usage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum I2CError {
    BusNotFound(u8),
    BusBusy(u8),
    BusClosed(u8),
    OsError {
        bus_id: u8,
        code: Option<i32>,
        message: String,
    },
    ShortTransfer {
        expected: usize,
        actual: usize,
    },
    PreconditionFailed {
        register: u8,
        source: Box<I2CError>,
    },
    InvalidAddress(u16),
    InvalidArgument(String),
}

impl I2CError {
    pub fn kind(&self) -> FaultKind {
        match self {
            I2CError::BusClosed(_) | I2CError::OsError { .. } => FaultKind::Transport,
            I2CError::ShortTransfer { .. } => FaultKind::Transfer,
            I2CError::PreconditionFailed { .. } => FaultKind::Precondition,
            I2CError::BusNotFound(_)
            | I2CError::BusBusy(_)
            | I2CError::InvalidAddress(_)
            | I2CError::InvalidArgument(_) => FaultKind::Usage,
        }
    }

    pub fn from_io(bus_id: u8, err: &io::Error, context: &str) -> Self {
        I2CError::OsError {
            bus_id,
            code: err.raw_os_error(),
            message: format!("{}: {}", context, err),
        }
    }
}

impl Display for I2CError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&match self {
            I2CError::BusNotFound(bus_id) => format!("I2C bus {} does not exist", bus_id),
            I2CError::BusBusy(bus_id) => format!("I2C bus {} is busy", bus_id),
            I2CError::BusClosed(bus_id) => format!("I2C bus {} is not open", bus_id),
            I2CError::OsError { bus_id, code, message } => match code {
                Some(code) => format!("I2C bus {} OS error {}: {}", bus_id, code, message),
                None => format!("I2C bus {} OS error: {}", bus_id, message),
            },
            I2CError::ShortTransfer { expected, actual } => format!(
                "short transfer: expected {} byte(s) but {} were moved",
                expected, actual
            ),
            I2CError::PreconditionFailed { register, source } => format!(
                "failed to read register {:#04x} before modifying it: {}",
                register, source
            ),
            I2CError::InvalidAddress(address) => format!("invalid slave address: {:#x}", address),
            I2CError::InvalidArgument(msg) => format!("invalid argument: {}", msg),
        })
    }
}

impl std::error::Error for I2CError {}

/// Raw access to one I2C adapter device file.
///
/// Implementations perform exactly one syscall per call and never retry; the
/// transport layer above decides what a short count means.
pub trait I2cBackend: Send {
    fn open(&mut self, bus_id: u8) -> io::Result<()>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn set_slave_address(&mut self, address: u16, mode: AddressMode) -> io::Result<()>;
}
