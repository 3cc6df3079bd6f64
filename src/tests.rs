// Test suites, all driven by the simulated I2C backend
mod common;
mod config_tests;
mod registry_tests;
