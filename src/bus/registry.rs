use super::{
    i2c::{I2CError, I2cBackend},
    i2c_sim::{SimulatedBus, SimulatedI2c},
    i2c_sysfs::SysfsI2c,
    transport::{I2cTransport, SharedTransport},
};
use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};

pub const DEFAULT_BUSES: [u8; 2] = [0, 1];

pub type BackendFactory = Box<dyn Fn(u8) -> Box<dyn I2cBackend> + Send + Sync>;

/// Hands out one shared transport per bus number.
///
/// Owned by whoever composes the application; there is no process-wide
/// instance, so each test can build its own.
pub struct TransportRegistry {
    supported_buses: Vec<u8>,
    factory: BackendFactory,
    transports: RwLock<HashMap<u8, SharedTransport>>,
}

impl TransportRegistry {
    pub fn new<F>(supported_buses: &[u8], factory: F) -> Self
    where
        F: Fn(u8) -> Box<dyn I2cBackend> + Send + Sync + 'static,
    {
        TransportRegistry {
            supported_buses: supported_buses.to_vec(),
            factory: Box::new(factory),
            transports: RwLock::new(HashMap::new()),
        }
    }

    /// Registry over `/dev/i2c-N`.
    pub fn linux(supported_buses: &[u8]) -> Self {
        Self::new(supported_buses, |_| Box::new(SysfsI2c::new()))
    }

    /// Registry whose buses are all backed by simulators. Buses without an
    /// entry in `buses` get an empty simulator.
    pub fn simulated(buses: HashMap<u8, Arc<Mutex<SimulatedBus>>>) -> Self {
        let mut supported: Vec<u8> = buses.keys().copied().collect();
        supported.sort_unstable();
        Self::new(&supported, move |bus_id| {
            let bus = buses
                .get(&bus_id)
                .cloned()
                .unwrap_or_else(SimulatedBus::shared);
            Box::new(SimulatedI2c::new(bus))
        })
    }

    pub fn supported_buses(&self) -> &[u8] {
        &self.supported_buses
    }

    pub fn supports(&self, bus_id: u8) -> bool {
        self.supported_buses.contains(&bus_id)
    }

    /// Returns the transport for `bus_id`, opening it on first use. A bus
    /// that fails to open is still handed out, closed; check `is_open()`.
    pub fn get(&self, bus_id: u8) -> Result<SharedTransport, I2CError> {
        if !self.supports(bus_id) {
            error!(
                "Invalid I2C bus number {}, supported buses are {}",
                bus_id,
                self.supported_buses
                    .iter()
                    .map(|x| x.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            return Err(I2CError::BusNotFound(bus_id));
        }

        {
            let transports = self.transports.read();
            if let Some(transport) = transports.get(&bus_id) {
                return Ok(transport.clone());
            }
        }

        let mut transports = self.transports.write();
        if let Some(transport) = transports.get(&bus_id) {
            return Ok(transport.clone());
        }

        let mut transport = I2cTransport::new(bus_id, (self.factory)(bus_id));
        if let Err(e) = transport.open() {
            warn!("I2C bus {} is unavailable: {}", bus_id, e);
        }

        let shared = transport.into_shared();
        transports.insert(bus_id, shared.clone());
        debug!("Registered transport for I2C bus {}", bus_id);
        Ok(shared)
    }

    pub fn open_buses(&self) -> Vec<u8> {
        let mut buses: Vec<u8> = self.transports.read().keys().copied().collect();
        buses.sort_unstable();
        buses
    }

    /// Drops the registry's transport for `bus_id`. Refused while anybody
    /// else still holds a handle to it.
    pub fn close(&self, bus_id: u8) -> Result<(), I2CError> {
        let mut transports = self.transports.write();
        let transport = match transports.get(&bus_id) {
            Some(transport) => transport,
            None => return Err(I2CError::BusNotFound(bus_id)),
        };

        let rc = Arc::strong_count(transport);
        if rc > 1 {
            warn!(
                "Attempted to close I2C bus {} while still holding {} reference(s) to it",
                bus_id,
                rc - 1
            );
            return Err(I2CError::BusBusy(bus_id));
        }

        transports.remove(&bus_id);
        Ok(())
    }
}
