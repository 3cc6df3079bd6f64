use crate::bus::{i2c::MAX_SEVEN_BIT_ADDRESS, registry::DEFAULT_BUSES};
use crate::drivers::pca9685::{
    CHANNEL_COUNT, DEFAULT_ADDRESS, FREQUENCY_OSCILLATOR, MAX_DUTY,
};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::io::{Read, Write};
use std::str::FromStr;

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    SerializeError(String),
    InvalidEntry(String),
    MissingEntry(String),
    DuplicateEntry(String),
    Other(String)
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&match self {
            ConfigError::SerializeError(msg) => format!("serialize/parse error: {}", msg),
            ConfigError::InvalidEntry(msg) => format!("invalid config entry: {}", msg),
            ConfigError::MissingEntry(msg) => format!("missing config entry: {}", msg),
            ConfigError::DuplicateEntry(msg) => format!("duplicate config entry: {}", msg),
            ConfigError::Other(msg) => format!("config error: {}", msg)
        })
    }
}

impl std::error::Error for ConfigError {}

#[derive(Serialize, Deserialize, Debug)]
pub struct ConfigSectionLogging {
    pub level: String
}

impl Default for ConfigSectionLogging {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl ConfigSectionLogging {
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.level).map_err(|_| ConfigError::InvalidEntry(
            format!("invalid log level \"{}\", expected one of off, error, warn, info, debug, trace", self.level)
        ))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.level_filter().map(|_| ())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Linux,
    Simulated
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ConfigSectionBus {
    pub backend: BackendKind,
    pub buses: Vec<u8>
}

impl Default for ConfigSectionBus {
    fn default() -> Self {
        Self { backend: BackendKind::Linux, buses: DEFAULT_BUSES.to_vec() }
    }
}

impl ConfigSectionBus {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buses.is_empty() {
            return Err(ConfigError::MissingEntry("at least one I2C bus must be enabled".to_string()));
        }

        let mut seen = Vec::new();
        for bus in &self.buses {
            if seen.contains(&bus) {
                return Err(ConfigError::DuplicateEntry(format!("I2C bus {} is listed more than once", bus)));
            }

            seen.push(bus);
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub channel: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duty: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulse_us: Option<f32>,
    #[serde(default)]
    pub invert: bool
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel >= CHANNEL_COUNT {
            return Err(ConfigError::InvalidEntry(
                format!("invalid channel {}, channels are 0-{}", self.channel, CHANNEL_COUNT - 1)
            ));
        }

        match (self.duty, self.pulse_us) {
            (Some(_), Some(_)) => Err(ConfigError::InvalidEntry(
                format!("channel {} sets both duty and pulse_us", self.channel)
            )),
            (None, None) => Err(ConfigError::MissingEntry(
                format!("channel {} needs either duty or pulse_us", self.channel)
            )),
            (Some(duty), None) if duty > MAX_DUTY => Err(ConfigError::InvalidEntry(
                format!("channel {} duty {} is above {}", self.channel, duty, MAX_DUTY)
            )),
            (None, Some(pulse)) if !pulse.is_finite() || pulse < 0.0 => Err(ConfigError::InvalidEntry(
                format!("channel {} pulse_us {} is not a valid pulse width", self.channel, pulse)
            )),
            _ => Ok(())
        }
    }
}

fn default_address() -> u16 {
    DEFAULT_ADDRESS
}

fn default_frequency() -> f32 {
    50.0
}

fn default_oscillator() -> u32 {
    FREQUENCY_OSCILLATOR
}

fn default_totem_pole() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PwmControllerConfig {
    pub name: String,
    pub bus_id: u8,
    #[serde(default = "default_address")]
    pub address: u16,
    #[serde(default = "default_frequency")]
    pub frequency_hz: f32,
    #[serde(default)]
    pub external_prescale: u8,
    #[serde(default = "default_oscillator")]
    pub oscillator_hz: u32,
    #[serde(default = "default_totem_pole")]
    pub totem_pole: bool,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>
}

impl PwmControllerConfig {
    pub fn new(name: &str, bus_id: u8, address: u16) -> Self {
        Self {
            name: name.to_string(),
            bus_id,
            address,
            frequency_hz: default_frequency(),
            external_prescale: 0,
            oscillator_hz: default_oscillator(),
            totem_pole: default_totem_pole(),
            channels: Vec::new()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidEntry("invalid controller config: name cannot be empty".to_string()));
        }

        if self.address > MAX_SEVEN_BIT_ADDRESS {
            return Err(ConfigError::InvalidEntry(
                format!("controller {}: slave address {:#x} is not a 7-bit address", self.name, self.address)
            ));
        }

        if !self.frequency_hz.is_finite() || self.frequency_hz <= 0.0 {
            return Err(ConfigError::InvalidEntry(
                format!("controller {}: frequency {} Hz must be positive", self.name, self.frequency_hz)
            ));
        }

        if self.oscillator_hz == 0 {
            return Err(ConfigError::InvalidEntry(
                format!("controller {}: oscillator frequency must be nonzero", self.name)
            ));
        }

        let mut seen = Vec::new();
        for channel in &self.channels {
            channel.validate()?;
            if seen.contains(&channel.channel) {
                return Err(ConfigError::DuplicateEntry(
                    format!("controller {}: channel {} is defined more than once", self.name, channel.channel)
                ));
            }

            seen.push(channel.channel);
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ConfigSectionControllers {
    pub controllers: Vec<PwmControllerConfig>
}

impl ConfigSectionControllers {
    pub fn new(controllers: Vec<PwmControllerConfig>) -> Self {
        Self { controllers }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_names = Vec::new();
        for name in self.controllers.iter().map(|x| &x.name) {
            if seen_names.contains(&name) {
                return Err(ConfigError::DuplicateEntry(format!("controller {} is defined more than once", name)));
            }

            seen_names.push(name);
        }

        let mut seen_devices = Vec::new();
        for controller in &self.controllers {
            controller.validate()?;
            let device = (controller.bus_id, controller.address);
            if seen_devices.contains(&device) {
                return Err(ConfigError::DuplicateEntry(format!(
                    "controller {}: bus {} address {:#04x} is already used by another controller",
                    controller.name, device.0, device.1
                )));
            }

            seen_devices.push(device);
        }

        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Configuration {
    #[serde(default)]
    pub logging: ConfigSectionLogging,
    #[serde(default)]
    pub bus_section: ConfigSectionBus,
    #[serde(default)]
    pub controller_section: ConfigSectionControllers
}

impl Configuration {
    pub fn new(logging: ConfigSectionLogging, bus_section: ConfigSectionBus, controller_section: ConfigSectionControllers) -> Self {
        Self { logging, bus_section, controller_section }
    }

    /// What gets written when no config file exists yet: one chip at the
    /// default address on bus 1, set up for servos.
    pub fn example() -> Self {
        Self::new(
            ConfigSectionLogging::default(),
            ConfigSectionBus::default(),
            ConfigSectionControllers::new(vec![PwmControllerConfig::new("pca9685", 1, DEFAULT_ADDRESS)])
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.validate()?;
        self.bus_section.validate()?;
        self.controller_section.validate()?;

        for controller in &self.controller_section.controllers {
            if !self.bus_section.buses.contains(&controller.bus_id) {
                return Err(ConfigError::InvalidEntry(format!(
                    "controller {} uses I2C bus {} which is not enabled",
                    controller.name, controller.bus_id
                )));
            }
        }

        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Configuration, ConfigError> {
        let config: Configuration = match serde_json::from_reader(reader) {
            Ok(c) => c,
            Err(e) => {
                return Err(ConfigError::SerializeError(
                    format!("failed to deserialize config file: {}", e)
                ));
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_str(json_str: &str) -> Result<Configuration, ConfigError> {
        Self::from_reader(json_str.as_bytes())
    }

    pub fn to_writer<W: Write>(&self, writer: W, pretty: bool) -> Result<(), ConfigError> {
        let result = if pretty {
            serde_json::to_writer_pretty(writer, self)
        } else {
            serde_json::to_writer(writer, self)
        };

        result.map_err(|e| ConfigError::SerializeError(format!("failed to serialize config: {}", e)))
    }

    pub fn to_str(&self, pretty: bool) -> Result<String, ConfigError> {
        let result = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };

        result.map_err(|e| ConfigError::SerializeError(format!("failed to serialize config: {}", e)))
    }
}
