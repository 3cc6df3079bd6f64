pub mod bus;
pub mod config;
pub mod delay;
pub mod device;
pub mod drivers;

#[cfg(test)]
mod tests;
