use crate::bus::{I2CError, RegisterBus, TransportRegistry};
use crate::config::{ChannelConfig, PwmControllerConfig};
use crate::drivers::pca9685::{Pca9685, PWMError, FULL_SCALE};
use log::{info, warn};
use std::collections::HashMap;
use std::fmt::Display;

#[derive(Debug, PartialEq)]
pub enum DeviceError {
    NotFound(String),
    MissingRegistry,
    DuplicateDevice(String),
    HardwareError(String),
    InvalidConfig(String),
}

impl Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&match self {
            DeviceError::NotFound(name) => format!("controller \"{}\" is not registered", name),
            DeviceError::MissingRegistry => "no I2C transport registry was configured".to_string(),
            DeviceError::DuplicateDevice(name) => format!("controller \"{}\" is already registered", name),
            DeviceError::HardwareError(desc) => format!("a hardware error has occurred: {}", desc),
            DeviceError::InvalidConfig(desc) => format!("invalid config: {}", desc),
        })
    }
}

impl std::error::Error for DeviceError {}

impl From<I2CError> for DeviceError {
    fn from(err: I2CError) -> Self {
        DeviceError::HardwareError(err.to_string())
    }
}

impl From<PWMError> for DeviceError {
    fn from(err: PWMError) -> Self {
        match err {
            PWMError::InvalidConfig(msg) => DeviceError::InvalidConfig(msg),
            other => DeviceError::HardwareError(other.to_string()),
        }
    }
}

struct PwmDevice {
    config: PwmControllerConfig,
    driver: Pca9685,
}

/// Owns the transport registry and every configured PWM chip.
pub struct DeviceServer {
    registry: TransportRegistry,
    devices: HashMap<String, PwmDevice>,
}

pub struct DeviceServerBuilder {
    registry: Option<TransportRegistry>,
    controllers: Vec<PwmControllerConfig>,
}

impl DeviceServerBuilder {
    pub fn configure() -> Self {
        DeviceServerBuilder {
            registry: None,
            controllers: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: TransportRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn add_controller(mut self, config: PwmControllerConfig) -> Self {
        self.controllers.push(config);
        self
    }

    pub fn add_controllers(mut self, configs: Vec<PwmControllerConfig>) -> Self {
        self.controllers.extend(configs);
        self
    }

    pub fn build(self) -> Result<DeviceServer, DeviceError> {
        let registry = self.registry.ok_or(DeviceError::MissingRegistry)?;
        let mut server = DeviceServer::new(registry);

        for config in self.controllers {
            server.register_controller(config)?;
        }

        Ok(server)
    }
}

fn apply_channel(driver: &mut Pca9685, channel: &ChannelConfig) -> Result<(), PWMError> {
    match (channel.duty, channel.pulse_us) {
        (Some(duty), _) => driver.set_channel_duty_cycle(channel.channel, duty, channel.invert),
        (None, Some(pulse)) => driver.write_channel_microseconds(channel.channel, pulse).map(|_| ()),
        (None, None) => Err(PWMError::InvalidConfig(format!(
            "channel {} has neither duty nor pulse_us",
            channel.channel
        ))),
    }
}

impl DeviceServer {
    pub fn new(registry: TransportRegistry) -> Self {
        DeviceServer {
            registry,
            devices: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &TransportRegistry {
        &self.registry
    }

    /// Binds a driver to the controller's bus and address. Nothing is sent
    /// to the chip until [`DeviceServer::start`].
    pub fn register_controller(&mut self, config: PwmControllerConfig) -> Result<(), DeviceError> {
        if self.devices.contains_key(&config.name) {
            return Err(DeviceError::DuplicateDevice(config.name));
        }

        let transport = self.registry.get(config.bus_id)?;
        let driver = Pca9685::new(RegisterBus::new(&transport, config.address));
        self.devices
            .insert(config.name.clone(), PwmDevice { config, driver });
        Ok(())
    }

    /// Brings up every chip: reset, clock, output driver, frequency, then the
    /// configured channel outputs.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        names.sort();

        for name in names {
            let device = match self.devices.get_mut(&name) {
                Some(device) => device,
                None => continue,
            };

            let config = &device.config;
            let driver = &mut device.driver;
            if !driver.is_initialized() {
                return Err(DeviceError::HardwareError(format!(
                    "controller \"{}\": I2C bus {} is not open",
                    name, config.bus_id
                )));
            }

            driver.initialize(config.external_prescale)?;
            driver.set_oscillator_frequency(config.oscillator_hz)?;
            driver.set_output_mode(config.totem_pole)?;
            if config.external_prescale == 0 {
                driver.set_output_frequency(config.frequency_hz)?;
            }

            for channel in &config.channels {
                apply_channel(driver, channel)?;
            }

            info!(
                "Controller \"{}\" running at {} Hz with {} channel(s) configured",
                name,
                driver.output_frequency(),
                config.channels.len()
            );
        }

        Ok(())
    }

    /// Switches every output off and puts the chips to sleep. Keeps going
    /// past failures so one bad chip does not leave the others running.
    pub fn shutdown(&mut self) {
        for (name, device) in self.devices.iter_mut() {
            if let Err(e) = device.driver.set_all_channels(0, FULL_SCALE) {
                warn!("Failed to switch off outputs of controller \"{}\": {}", name, e);
            }

            if let Err(e) = device.driver.sleep() {
                warn!("Failed to put controller \"{}\" to sleep: {}", name, e);
            }
        }
    }

    pub fn get_controller(&self, name: &str) -> Option<&Pca9685> {
        self.devices.get(name).map(|device| &device.driver)
    }

    pub fn get_controller_mut(&mut self, name: &str) -> Option<&mut Pca9685> {
        self.devices.get_mut(name).map(|device| &mut device.driver)
    }

    pub fn get_config(&self, name: &str) -> Option<&PwmControllerConfig> {
        self.devices.get(name).map(|device| &device.config)
    }

    pub fn controller_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.devices.keys().map(|x| x.as_str()).collect();
        names.sort();
        names
    }

    pub fn has_controller(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn remove_controller(&mut self, name: &str) -> Result<(), DeviceError> {
        match self.devices.remove(name) {
            Some(_) => Ok(()),
            None => Err(DeviceError::NotFound(name.to_string())),
        }
    }
}
