use crate::bus::i2c_sim::{SimulatedBus, SimulatedI2c};
use crate::bus::{I2cTransport, RegisterBus, SharedTransport};
use crate::drivers::pca9685::{
    Pca9685, DEFAULT_ADDRESS, MODE1_AI, POWER_ON_REGISTERS, REGISTER_MODE1,
};
use embedded_hal::delay::DelayNs;
use parking_lot::Mutex;
use std::sync::Arc;

pub const BUS_ID: u8 = 1;

/// Opened transport over `bus`.
pub fn open_transport(bus: &Arc<Mutex<SimulatedBus>>) -> SharedTransport {
    let mut transport = I2cTransport::new(BUS_ID, Box::new(SimulatedI2c::new(bus.clone())));
    transport.open().expect("simulated bus refused to open");
    transport.into_shared()
}

pub fn bus_with_device(address: u16) -> (Arc<Mutex<SimulatedBus>>, SharedTransport) {
    let bus = SimulatedBus::shared();
    bus.lock().attach(address);
    let transport = open_transport(&bus);
    (bus, transport)
}

/// Records every requested delay in milliseconds instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingDelay {
    calls: Arc<Mutex<Vec<u32>>>,
}

impl RecordingDelay {
    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().clone()
    }
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.calls.lock().push(ns / 1_000_000);
    }

    fn delay_us(&mut self, us: u32) {
        self.calls.lock().push(us / 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.calls.lock().push(ms);
    }
}

pub struct ChipFixture {
    pub bus: Arc<Mutex<SimulatedBus>>,
    pub chip: Pca9685<RecordingDelay>,
    pub delay: RecordingDelay,
}

/// A chip in its power-on state at the default address. Bursts only advance
/// the register pointer while MODE1.AI is set, as on the real part.
pub fn power_on_chip() -> ChipFixture {
    let bus = SimulatedBus::shared();
    bus.lock().attach_with_increment_gate(
        DEFAULT_ADDRESS,
        &POWER_ON_REGISTERS,
        REGISTER_MODE1,
        MODE1_AI,
    );
    let transport = open_transport(&bus);
    let delay = RecordingDelay::default();
    let chip = Pca9685::with_delay(RegisterBus::new(&transport, DEFAULT_ADDRESS), delay.clone());
    ChipFixture { bus, chip, delay }
}

impl ChipFixture {
    pub fn register(&self, register: u8) -> u8 {
        self.bus
            .lock()
            .register(DEFAULT_ADDRESS, register)
            .expect("chip not attached")
    }

    pub fn set_register(&self, register: u8, value: u8) {
        self.bus.lock().set_register(DEFAULT_ADDRESS, register, value);
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.bus.lock().writes_to(DEFAULT_ADDRESS)
    }

    /// Forget traffic and delays recorded so far.
    pub fn clear(&self) {
        self.bus.lock().clear_log();
        self.delay.calls.lock().clear();
    }
}
