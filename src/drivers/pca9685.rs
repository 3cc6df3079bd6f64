//! PCA9685 16-channel, 12-bit PWM controller.
//!
//! Frequency changes follow the datasheet sequence: put the oscillator to
//! sleep, program PRE_SCALE, restore MODE1, wait for the oscillator to settle
//! (at least 500 µs) and set RESTART. Channel registers are accessed as
//! 4-byte bursts, which only land on consecutive registers while MODE1.AI is
//! set; the driver tracks that bit and sets it before the first burst.

use crate::{
    bus::{I2CError, RegisterBus},
    delay::ThreadDelay,
};
use embedded_hal::delay::DelayNs;
use log::{debug, info};
use std::fmt::Display;
use strum::EnumIter;

pub const DEFAULT_ADDRESS: u16 = 0x40;
pub const CHANNEL_COUNT: u8 = 16;

pub const FREQUENCY_OSCILLATOR: u32 = 25_000_000;
pub const DEFAULT_OUTPUT_FREQUENCY_HZ: f32 = 1000.0;
/// PRE_SCALE power-on value 0x1E gives ~200 Hz.
pub const POWER_ON_OUTPUT_FREQUENCY_HZ: f32 = 200.0;
pub const MIN_OUTPUT_FREQUENCY_HZ: f32 = 1.0;
pub const MAX_OUTPUT_FREQUENCY_HZ: f32 = 3500.0;
pub const PRESCALE_MIN: u8 = 3;
pub const PRESCALE_MAX: u8 = 255;

pub const TICKS_PER_CYCLE: u16 = 4096;
pub const MAX_DUTY: u16 = 4095;
/// Bit 12 of an ON or OFF pair: full on / full off.
pub const FULL_SCALE: u16 = 0x1000;

pub const REGISTER_MODE1: u8 = 0x00;
pub const REGISTER_MODE2: u8 = 0x01;
pub const REGISTER_SUBADR1: u8 = 0x02;
pub const REGISTER_SUBADR2: u8 = 0x03;
pub const REGISTER_SUBADR3: u8 = 0x04;
pub const REGISTER_ALLCALLADR: u8 = 0x05;
pub const REGISTER_LED0_ON_L: u8 = 0x06;
pub const REGISTER_LED0_ON_H: u8 = 0x07;
pub const REGISTER_LED0_OFF_L: u8 = 0x08;
pub const REGISTER_LED0_OFF_H: u8 = 0x09;
pub const REGISTER_ALL_LED_ON_L: u8 = 0xFA;
pub const REGISTER_ALL_LED_ON_H: u8 = 0xFB;
pub const REGISTER_ALL_LED_OFF_L: u8 = 0xFC;
pub const REGISTER_ALL_LED_OFF_H: u8 = 0xFD;
pub const REGISTER_PRESCALE: u8 = 0xFE;
pub const REGISTER_TESTMODE: u8 = 0xFF;
const CHANNEL_STRIDE: u8 = 4;

pub const MODE1_ALLCALL: u8 = 0x01;
pub const MODE1_SUB3: u8 = 0x02;
pub const MODE1_SUB2: u8 = 0x04;
pub const MODE1_SUB1: u8 = 0x08;
pub const MODE1_SLEEP: u8 = 0x10;
pub const MODE1_AI: u8 = 0x20;
pub const MODE1_EXTCLK: u8 = 0x40;
pub const MODE1_RESTART: u8 = 0x80;

pub const MODE2_OUTNE_0: u8 = 0x01;
pub const MODE2_OUTNE_1: u8 = 0x02;
pub const MODE2_OUTDRV: u8 = 0x04;
pub const MODE2_OCH: u8 = 0x08;
pub const MODE2_INVRT: u8 = 0x10;

/// Register contents after power-on reset.
pub const POWER_ON_REGISTERS: [(u8, u8); 5] = [
    (REGISTER_MODE1, MODE1_SLEEP | MODE1_ALLCALL),
    (REGISTER_MODE2, MODE2_OUTDRV),
    (REGISTER_SUBADR1, 0xE2),
    (REGISTER_ALLCALLADR, 0xE0),
    (REGISTER_PRESCALE, 0x1E),
];

const SETTLE_DELAY_MS: u32 = 5;
const RESET_DELAY_MS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, strum::Display)]
pub enum ChipMode {
    /// Oscillator off, PRE_SCALE may be written.
    Sleep,
    /// Oscillator running, outputs active.
    Awake,
    /// Oscillator restarted, waiting out the settle delay.
    RestartPending,
}

#[derive(Debug, PartialEq)]
pub enum PWMError {
    InvalidConfig(String),
    ChannelNotFound(u8),
    InvalidArgument(String),
    Bus(I2CError),
}

impl Display for PWMError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&match self {
            PWMError::InvalidConfig(msg) => format!("invalid config: {}", msg),
            PWMError::ChannelNotFound(channel) => format!(
                "PWM channel {} does not exist, channels are 0-{}",
                channel,
                CHANNEL_COUNT - 1
            ),
            PWMError::InvalidArgument(msg) => format!("invalid argument: {}", msg),
            PWMError::Bus(err) => format!("bus error: {}", err),
        })
    }
}

impl std::error::Error for PWMError {}

impl From<I2CError> for PWMError {
    fn from(err: I2CError) -> Self {
        PWMError::Bus(err)
    }
}

/// ON and OFF tick of one channel within the 4096-tick cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTicks {
    pub on: u16,
    pub off: u16,
}

impl ChannelTicks {
    pub const FULL_ON: ChannelTicks = ChannelTicks { on: FULL_SCALE, off: 0 };
    pub const FULL_OFF: ChannelTicks = ChannelTicks { on: 0, off: FULL_SCALE };

    pub const fn new(on: u16, off: u16) -> Self {
        ChannelTicks { on, off }
    }

    pub const fn is_full_on(&self) -> bool {
        self.on & FULL_SCALE != 0
    }

    pub const fn is_full_off(&self) -> bool {
        self.off & FULL_SCALE != 0
    }

    /// ON_L, ON_H, OFF_L, OFF_H
    pub fn to_register_bytes(self) -> [u8; 4] {
        let [on_l, on_h] = self.on.to_le_bytes();
        let [off_l, off_h] = self.off.to_le_bytes();
        [on_l, on_h, off_l, off_h]
    }

    pub fn from_register_bytes(bytes: [u8; 4]) -> Self {
        ChannelTicks {
            on: u16::from_le_bytes([bytes[0], bytes[1]]),
            off: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}

pub fn clamp_frequency(frequency_hz: f32) -> f32 {
    frequency_hz.clamp(MIN_OUTPUT_FREQUENCY_HZ, MAX_OUTPUT_FREQUENCY_HZ)
}

/// `round(osc / (4096 * f)) - 1`, kept within the chip's prescaler range.
pub fn prescale_for(frequency_hz: f32, oscillator_hz: u32) -> u8 {
    let frequency_hz = clamp_frequency(frequency_hz) as f64;
    let value = (oscillator_hz as f64 / (TICKS_PER_CYCLE as f64 * frequency_hz)).round() - 1.0;
    value.clamp(PRESCALE_MIN as f64, PRESCALE_MAX as f64) as u8
}

/// Maps a 0-4095 level to ON/OFF ticks. The two ends use the full-on and
/// full-off flags, a plain `(0, 4095)` would still leave one tick low.
pub fn duty_to_ticks(value: u16, invert: bool) -> ChannelTicks {
    let value = value.min(MAX_DUTY);
    if invert {
        match value {
            0 => ChannelTicks::FULL_ON,
            MAX_DUTY => ChannelTicks::FULL_OFF,
            v => ChannelTicks::new(0, MAX_DUTY - v),
        }
    } else {
        match value {
            MAX_DUTY => ChannelTicks::FULL_ON,
            0 => ChannelTicks::FULL_OFF,
            v => ChannelTicks::new(0, v),
        }
    }
}

/// Pulse width in µs to OFF tick for a given prescaler, truncated.
pub fn pulse_to_ticks(microseconds: f32, prescale: u8, oscillator_hz: u32) -> u16 {
    let tick_us = (prescale as f64 + 1.0) * 1_000_000.0 / oscillator_hz as f64;
    let ticks = (microseconds as f64 / tick_us) as u64;
    ticks.min(MAX_DUTY as u64) as u16
}

fn external_output_frequency(oscillator_hz: u32, prescale: u8) -> f32 {
    oscillator_hz as f32 / (TICKS_PER_CYCLE as f32 * (prescale as f32 + 1.0))
}

fn channel_register(channel: u8) -> Result<u8, PWMError> {
    if channel >= CHANNEL_COUNT {
        return Err(PWMError::ChannelNotFound(channel));
    }

    Ok(REGISTER_LED0_ON_L + CHANNEL_STRIDE * channel)
}

pub struct Pca9685<D: DelayNs = ThreadDelay> {
    bus: RegisterBus,
    delay: D,
    output_frequency_hz: f32,
    oscillator_hz: u32,
    mode: ChipMode,
    auto_increment: bool,
    external_prescale: Option<u8>,
}

impl Pca9685<ThreadDelay> {
    pub fn new(bus: RegisterBus) -> Self {
        Self::with_delay(bus, ThreadDelay)
    }
}

impl<D: DelayNs> Pca9685<D> {
    /// Wraps a bus bound to the chip. Nothing is sent until
    /// [`Pca9685::initialize`]; the chip is assumed to be in its power-on
    /// state (asleep, ~200 Hz).
    pub fn with_delay(bus: RegisterBus, delay: D) -> Self {
        Pca9685 {
            bus,
            delay,
            output_frequency_hz: POWER_ON_OUTPUT_FREQUENCY_HZ,
            oscillator_hz: FREQUENCY_OSCILLATOR,
            mode: ChipMode::Sleep,
            auto_increment: false,
            external_prescale: None,
        }
    }

    pub fn bus(&self) -> &RegisterBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut RegisterBus {
        &mut self.bus
    }

    pub fn is_initialized(&self) -> bool {
        self.bus.is_open()
    }

    pub fn mode(&self) -> ChipMode {
        self.mode
    }

    pub fn output_frequency(&self) -> f32 {
        self.output_frequency_hz
    }

    pub fn oscillator_frequency(&self) -> u32 {
        self.oscillator_hz
    }

    /// Sets the oscillator frequency used for prescaler and pulse math, e.g.
    /// a measured value for a particular chip or an external clock. On the
    /// external clock the output frequency follows immediately.
    pub fn set_oscillator_frequency(&mut self, oscillator_hz: u32) -> Result<(), PWMError> {
        if oscillator_hz == 0 {
            return Err(PWMError::InvalidArgument(
                "oscillator frequency must be nonzero".to_string(),
            ));
        }

        self.oscillator_hz = oscillator_hz;
        if let Some(prescale) = self.external_prescale {
            self.output_frequency_hz = external_output_frequency(oscillator_hz, prescale);
        }
        Ok(())
    }

    /// Resets the chip, switches every output off, then either moves to the
    /// external clock with `external_prescale` or programs the default output
    /// frequency.
    pub fn initialize(&mut self, external_prescale: u8) -> Result<(), PWMError> {
        self.oscillator_hz = FREQUENCY_OSCILLATOR;
        self.external_prescale = None;
        self.reset()?;

        self.bus.write_byte(REGISTER_MODE1, MODE1_ALLCALL | MODE1_AI)?;
        self.auto_increment = true;
        self.set_all_channels(0, FULL_SCALE)?;
        self.bus.write_byte(REGISTER_MODE2, MODE2_OUTDRV)?;

        if external_prescale != 0 {
            self.set_external_clock(external_prescale)?;
        } else {
            self.set_output_frequency(DEFAULT_OUTPUT_FREQUENCY_HZ)?;
        }

        info!(
            "PCA9685 at {:#04x} on I2C bus {} initialized ({} Hz)",
            self.bus.address(),
            self.bus.bus_id(),
            self.output_frequency_hz
        );
        Ok(())
    }

    /// Leaves MODE1 with only RESTART set, so auto-increment is off afterwards.
    pub fn reset(&mut self) -> Result<(), PWMError> {
        self.bus.write_byte(REGISTER_MODE1, MODE1_RESTART)?;
        self.auto_increment = false;
        self.mode = ChipMode::RestartPending;
        self.delay.delay_ms(RESET_DELAY_MS);
        self.mode = ChipMode::Awake;
        Ok(())
    }

    /// Returns the prescaler that was programmed.
    pub fn set_output_frequency(&mut self, frequency_hz: f32) -> Result<u8, PWMError> {
        if !frequency_hz.is_finite() {
            return Err(PWMError::InvalidArgument(format!(
                "output frequency must be finite, got {}",
                frequency_hz
            )));
        }

        let frequency_hz = clamp_frequency(frequency_hz);
        let prescale = prescale_for(frequency_hz, self.oscillator_hz);
        let old_mode = self.bus.read_byte(REGISTER_MODE1)?;

        if old_mode & MODE1_SLEEP != 0 {
            // oscillator already off, the caller wakes the chip
            debug!("Chip is asleep, programming prescaler {} only", prescale);
            self.bus.write_byte(REGISTER_PRESCALE, prescale)?;
            self.bus
                .write_byte(REGISTER_MODE1, (old_mode & !MODE1_RESTART) | MODE1_AI)?;
            self.auto_increment = true;
            self.mode = ChipMode::Sleep;
        } else {
            let sleep_mode = (old_mode & !MODE1_RESTART) | MODE1_SLEEP;
            self.bus.write_byte(REGISTER_MODE1, sleep_mode)?;
            self.mode = ChipMode::Sleep;
            self.bus.write_byte(REGISTER_PRESCALE, prescale)?;
            self.bus.write_byte(REGISTER_MODE1, old_mode)?;
            self.restart(old_mode | MODE1_RESTART | MODE1_AI)?;
        }

        debug!(
            "Output frequency set to {} Hz (prescaler {})",
            frequency_hz, prescale
        );
        self.output_frequency_hz = frequency_hz;
        Ok(prescale)
    }

    /// Switches to the clock on EXTCLK. The caller should also pass that
    /// clock's frequency to [`Pca9685::set_oscillator_frequency`].
    pub fn set_external_clock(&mut self, prescale: u8) -> Result<(), PWMError> {
        let old_mode = self.bus.read_byte(REGISTER_MODE1)?;
        let sleep_mode = (old_mode & !MODE1_RESTART) | MODE1_SLEEP;
        self.bus.write_byte(REGISTER_MODE1, sleep_mode)?;
        self.mode = ChipMode::Sleep;

        // EXTCLK is sticky and can only be set while asleep
        let ext_mode = sleep_mode | MODE1_EXTCLK;
        self.bus.write_byte(REGISTER_MODE1, ext_mode)?;
        self.bus.write_byte(REGISTER_PRESCALE, prescale)?;
        self.restart((ext_mode & !MODE1_SLEEP) | MODE1_RESTART | MODE1_AI)?;

        self.external_prescale = Some(prescale);
        self.output_frequency_hz = external_output_frequency(self.oscillator_hz, prescale);
        info!("Switched to external clock, prescaler {}", prescale);
        Ok(())
    }

    fn restart(&mut self, mode1: u8) -> Result<(), PWMError> {
        self.mode = ChipMode::RestartPending;
        self.delay.delay_ms(SETTLE_DELAY_MS);
        self.bus.write_byte(REGISTER_MODE1, mode1)?;
        self.auto_increment = mode1 & MODE1_AI != 0;
        self.mode = ChipMode::Awake;
        Ok(())
    }

    fn ensure_auto_increment(&mut self) -> Result<(), PWMError> {
        if self.auto_increment {
            return Ok(());
        }

        let current = self.bus.read_byte(REGISTER_MODE1)?;
        if current & MODE1_AI == 0 {
            // a 0 written to RESTART is ignored
            debug!("Enabling register auto-increment");
            self.bus
                .write_byte(REGISTER_MODE1, (current & !MODE1_RESTART) | MODE1_AI)?;
        }

        self.auto_increment = true;
        Ok(())
    }

    pub fn read_prescale(&mut self) -> Result<u8, PWMError> {
        Ok(self.bus.read_byte(REGISTER_PRESCALE)?)
    }

    pub fn sleep(&mut self) -> Result<(), PWMError> {
        let current = self.bus.read_byte(REGISTER_MODE1)?;
        self.bus.write_byte(REGISTER_MODE1, current | MODE1_SLEEP)?;
        // the current cycle has to finish before the oscillator stops
        self.delay.delay_ms(SETTLE_DELAY_MS);
        self.mode = ChipMode::Sleep;
        Ok(())
    }

    pub fn wakeup(&mut self) -> Result<(), PWMError> {
        let current = self.bus.read_byte(REGISTER_MODE1)?;
        if current & MODE1_SLEEP == 0 {
            self.mode = ChipMode::Awake;
            return Ok(());
        }

        let awake = (current & !MODE1_SLEEP) | MODE1_AI;
        self.bus.write_byte(REGISTER_MODE1, awake)?;
        self.auto_increment = true;
        if current & MODE1_RESTART != 0 {
            // outputs were running before sleep, resume them
            self.restart(awake | MODE1_RESTART)?;
        } else {
            self.mode = ChipMode::Awake;
        }
        Ok(())
    }

    /// Totem pole (`true`) or open drain (`false`) outputs.
    pub fn set_output_mode(&mut self, totem_pole: bool) -> Result<(), PWMError> {
        let current = self.bus.read_byte(REGISTER_MODE2)?;
        let updated = if totem_pole {
            current | MODE2_OUTDRV
        } else {
            current & !MODE2_OUTDRV
        };
        self.bus.write_byte(REGISTER_MODE2, updated)?;
        Ok(())
    }

    pub fn set_channel_raw(&mut self, channel: u8, on: u16, off: u16) -> Result<(), PWMError> {
        let register = channel_register(channel)?;
        if on > FULL_SCALE || off > FULL_SCALE {
            return Err(PWMError::InvalidArgument(format!(
                "tick values must be at most {}, got on={} off={}",
                FULL_SCALE, on, off
            )));
        }

        self.ensure_auto_increment()?;
        debug!("Channel {}: on={} off={}", channel, on, off);
        self.bus
            .write_bytes(register, &ChannelTicks::new(on, off).to_register_bytes())?;
        Ok(())
    }

    /// Same ticks on every channel through the ALL_LED registers.
    pub fn set_all_channels(&mut self, on: u16, off: u16) -> Result<(), PWMError> {
        if on > FULL_SCALE || off > FULL_SCALE {
            return Err(PWMError::InvalidArgument(format!(
                "tick values must be at most {}, got on={} off={}",
                FULL_SCALE, on, off
            )));
        }

        let [on_l, on_h, off_l, off_h] = ChannelTicks::new(on, off).to_register_bytes();
        self.bus.write_byte(REGISTER_ALL_LED_ON_L, on_l)?;
        self.bus.write_byte(REGISTER_ALL_LED_ON_H, on_h)?;
        self.bus.write_byte(REGISTER_ALL_LED_OFF_L, off_l)?;
        self.bus.write_byte(REGISTER_ALL_LED_OFF_H, off_h)?;
        Ok(())
    }

    pub fn set_channel_duty_cycle(
        &mut self,
        channel: u8,
        value: u16,
        invert: bool,
    ) -> Result<(), PWMError> {
        let ticks = duty_to_ticks(value, invert);
        self.set_channel_raw(channel, ticks.on, ticks.off)
    }

    /// Converts against the prescaler read back from the chip, so the result
    /// is only as precise as one tick. Returns the OFF tick written.
    pub fn write_channel_microseconds(
        &mut self,
        channel: u8,
        microseconds: f32,
    ) -> Result<u16, PWMError> {
        channel_register(channel)?;
        if !microseconds.is_finite() || microseconds < 0.0 {
            return Err(PWMError::InvalidArgument(format!(
                "pulse width must be a non-negative number of microseconds, got {}",
                microseconds
            )));
        }

        let prescale = self.read_prescale()?;
        let ticks = pulse_to_ticks(microseconds, prescale, self.oscillator_hz);
        self.set_channel_raw(channel, 0, ticks)?;
        Ok(ticks)
    }

    /// ON tick of a channel.
    pub fn read_channel_raw(&mut self, channel: u8) -> Result<u16, PWMError> {
        let register = channel_register(channel)?;
        self.ensure_auto_increment()?;
        let mut buf = [0u8; 2];
        self.bus.read_bytes(register, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_channel_ticks(&mut self, channel: u8) -> Result<ChannelTicks, PWMError> {
        let register = channel_register(channel)?;
        self.ensure_auto_increment()?;
        let mut buf = [0u8; 4];
        self.bus.read_bytes(register, &mut buf)?;
        Ok(ChannelTicks::from_register_bytes(buf))
    }
}
