use crate::config::{
    BackendKind, ChannelConfig, ConfigError, Configuration, PwmControllerConfig,
};
use log::LevelFilter;

fn config_with(controllers: &str) -> String {
    format!(
        r#"{{ "bus_section": {{ "backend": "simulated", "buses": [0, 1] }},
             "controller_section": {{ "controllers": [{}] }} }}"#,
        controllers
    )
}

fn duty(channel: u8, duty: u16) -> ChannelConfig {
    ChannelConfig { channel, duty: Some(duty), pulse_us: None, invert: false }
}

#[test]
fn empty_document_uses_defaults() {
    let config = Configuration::from_str("{}").unwrap();

    assert_eq!(config.logging.level_filter(), Ok(LevelFilter::Info));
    assert_eq!(config.bus_section.backend, BackendKind::Linux);
    assert_eq!(config.bus_section.buses, vec![0, 1]);
    assert!(config.controller_section.controllers.is_empty());
}

#[test]
fn controller_defaults() {
    let config = Configuration::from_str(&config_with(r#"{ "name": "servos", "bus_id": 1 }"#)).unwrap();
    let controller = &config.controller_section.controllers[0];

    assert_eq!(config.bus_section.backend, BackendKind::Simulated);
    assert_eq!(controller.address, 0x40);
    assert_eq!(controller.frequency_hz, 50.0);
    assert_eq!(controller.external_prescale, 0);
    assert_eq!(controller.oscillator_hz, 25_000_000);
    assert!(controller.totem_pole);
    assert!(controller.channels.is_empty());
}

#[test]
fn example_survives_round_trip() {
    let example = Configuration::example();
    let json = example.to_str(true).unwrap();
    let parsed = Configuration::from_str(&json).unwrap();

    assert_eq!(parsed.controller_section.controllers, example.controller_section.controllers);
    assert_eq!(parsed.logging.level, "info");

    let mut buf = Vec::new();
    example.to_writer(&mut buf, false).unwrap();
    assert!(Configuration::from_reader(buf.as_slice()).is_ok());
}

#[test]
fn channels_parsed() {
    let config = Configuration::from_str(&config_with(
        r#"{ "name": "leds", "bus_id": 0, "address": 65, "channels": [
            { "channel": 0, "duty": 2048 },
            { "channel": 5, "pulse_us": 1500.0, "invert": true }
        ] }"#,
    ))
    .unwrap();
    let channels = &config.controller_section.controllers[0].channels;

    assert_eq!(channels[0], duty(0, 2048));
    assert_eq!(channels[1].pulse_us, Some(1500.0));
    assert!(channels[1].invert);
}

#[test]
fn malformed_json() {
    assert!(matches!(
        Configuration::from_str("{ not json"),
        Err(ConfigError::SerializeError(_))
    ));
    assert!(matches!(
        Configuration::from_str(r#"{ "bus_section": { "backend": "usb", "buses": [1] } }"#),
        Err(ConfigError::SerializeError(_))
    ));
}

#[test]
fn bad_log_level() {
    assert!(matches!(
        Configuration::from_str(r#"{ "logging": { "level": "loud" } }"#),
        Err(ConfigError::InvalidEntry(_))
    ));
}

#[test]
fn bus_list_checked() {
    assert!(matches!(
        Configuration::from_str(r#"{ "bus_section": { "backend": "linux", "buses": [] } }"#),
        Err(ConfigError::MissingEntry(_))
    ));
    assert!(matches!(
        Configuration::from_str(r#"{ "bus_section": { "backend": "linux", "buses": [1, 1] } }"#),
        Err(ConfigError::DuplicateEntry(_))
    ));
}

#[test]
fn controller_checked() {
    let mut controller = PwmControllerConfig::new("pwm", 1, 0x80);
    assert!(matches!(controller.validate(), Err(ConfigError::InvalidEntry(_))));

    controller.address = 0x40;
    assert!(controller.validate().is_ok());

    controller.frequency_hz = 0.0;
    assert!(matches!(controller.validate(), Err(ConfigError::InvalidEntry(_))));
    controller.frequency_hz = 50.0;

    controller.oscillator_hz = 0;
    assert!(matches!(controller.validate(), Err(ConfigError::InvalidEntry(_))));
    controller.oscillator_hz = 25_000_000;

    controller.name = " ".to_string();
    assert!(matches!(controller.validate(), Err(ConfigError::InvalidEntry(_))));
    controller.name = "pwm".to_string();

    controller.channels = vec![duty(3, 100), duty(3, 200)];
    assert!(matches!(controller.validate(), Err(ConfigError::DuplicateEntry(_))));
}

#[test]
fn channel_checked() {
    assert!(matches!(duty(16, 0).validate(), Err(ConfigError::InvalidEntry(_))));
    assert!(matches!(duty(0, 4096).validate(), Err(ConfigError::InvalidEntry(_))));
    assert!(duty(15, 4095).validate().is_ok());

    let both = ChannelConfig { channel: 0, duty: Some(1), pulse_us: Some(1.0), invert: false };
    assert!(matches!(both.validate(), Err(ConfigError::InvalidEntry(_))));

    let neither = ChannelConfig { channel: 0, duty: None, pulse_us: None, invert: false };
    assert!(matches!(neither.validate(), Err(ConfigError::MissingEntry(_))));

    let negative = ChannelConfig { channel: 0, duty: None, pulse_us: Some(-5.0), invert: false };
    assert!(matches!(negative.validate(), Err(ConfigError::InvalidEntry(_))));
}

#[test]
fn controllers_unique() {
    let names = config_with(
        r#"{ "name": "a", "bus_id": 0 }, { "name": "a", "bus_id": 1 }"#,
    );
    assert!(matches!(
        Configuration::from_str(&names),
        Err(ConfigError::DuplicateEntry(_))
    ));

    let devices = config_with(
        r#"{ "name": "a", "bus_id": 1 }, { "name": "b", "bus_id": 1 }"#,
    );
    assert!(matches!(
        Configuration::from_str(&devices),
        Err(ConfigError::DuplicateEntry(_))
    ));

    let distinct = config_with(
        r#"{ "name": "a", "bus_id": 1 }, { "name": "b", "bus_id": 1, "address": 65 }"#,
    );
    assert!(Configuration::from_str(&distinct).is_ok());
}

#[test]
fn controller_bus_must_be_enabled() {
    assert!(matches!(
        Configuration::from_str(&config_with(r#"{ "name": "a", "bus_id": 4 }"#)),
        Err(ConfigError::InvalidEntry(_))
    ));
}
