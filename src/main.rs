use log::{info, warn, LevelFilter};
use nvos_pwm::bus::{i2c_sim::SimulatedBus, i2c_sysfs, TransportRegistry};
use nvos_pwm::config::{BackendKind, Configuration};
use nvos_pwm::device::DeviceServerBuilder;
use nvos_pwm::drivers::pca9685::{MODE1_AI, POWER_ON_REGISTERS, REGISTER_MODE1};
use simple_logger::SimpleLogger;
use std::{collections::HashMap, env, error::Error, fs::File, path::Path, sync::mpsc};

const DEFAULT_CONFIG_PATH: &str = "./config.json";

fn load_config(path: &Path) -> Result<Configuration, Box<dyn Error>> {
    if !path.exists() {
        warn!("No config file at {}, writing a default one", path.display());
        let config = Configuration::example();
        config.to_writer(File::create(path)?, true)?;
        return Ok(config);
    }

    Ok(Configuration::from_reader(File::open(path)?)?)
}

fn build_registry(config: &Configuration) -> TransportRegistry {
    let buses = &config.bus_section.buses;
    match config.bus_section.backend {
        BackendKind::Linux => {
            if !i2c_sysfs::is_supported() {
                warn!("i2c-dev does not appear to be loaded, buses will fail to open");
            }

            TransportRegistry::linux(buses)
        }
        BackendKind::Simulated => {
            let mut simulated = HashMap::new();
            for bus_id in buses {
                simulated.insert(*bus_id, SimulatedBus::shared());
            }

            for controller in &config.controller_section.controllers {
                if let Some(bus) = simulated.get(&controller.bus_id) {
                    bus.lock().attach_with_increment_gate(
                        controller.address,
                        &POWER_ON_REGISTERS,
                        REGISTER_MODE1,
                        MODE1_AI,
                    );
                }
            }

            TransportRegistry::simulated(simulated)
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // the logger passes everything, verbosity is set through the global max level
    SimpleLogger::new().with_level(LevelFilter::Trace).init()?;
    log::set_max_level(LevelFilter::Info);

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    info!("Loading config from {}", config_path);
    let config = load_config(Path::new(&config_path))?;
    log::set_max_level(config.logging.level_filter()?);

    info!("Building device server");
    let mut server = DeviceServerBuilder::configure()
        .with_registry(build_registry(&config))
        .add_controllers(config.controller_section.controllers.clone())
        .build()?;

    server.start()?;
    info!("Server running, press Ctrl-C to stop");

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    let _ = rx.recv();

    info!("Shutting down");
    server.shutdown();
    Ok(())
}
