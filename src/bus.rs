// Bus implementations
pub mod i2c; // I2CError, I2cBackend
pub mod i2c_sysfs; // SysfsI2c
pub mod i2c_sim; // SimulatedI2c
pub mod transport; // I2cTransport
pub mod registry; // TransportRegistry
pub mod register; // RegisterBus

pub use i2c::{AddressMode, FaultKind, I2CError, I2cBackend};
pub use register::RegisterBus;
pub use registry::TransportRegistry;
pub use transport::{I2cTransport, SharedTransport, SlaveState};
