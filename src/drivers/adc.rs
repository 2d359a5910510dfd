use embassy_time::{Duration, Timer};
use embedded_hal_async::i2c::I2c;

use super::AnalogConverter;
use crate::config::CHANNELS_PER_CONVERTER;
use crate::error::{DeviceError, Result};
use crate::log_debug;

// ADC128D818 register map
const REG_CONFIG: u8 = 0x00;
const REG_CONVERSION_RATE: u8 = 0x07;
const REG_CHANNEL_DISABLE: u8 = 0x08;
const REG_ADVANCED_CONFIG: u8 = 0x0B;
const REG_BUSY_STATUS: u8 = 0x0C;
const REG_CHANNEL_BASE: u8 = 0x20;

const CONFIG_START: u8 = 0x01;
const CONVERSION_CONTINUOUS: u8 = 0x01;
const ALL_CHANNELS_ENABLED: u8 = 0x00;
// Set while the chip is still powering up
const BUSY_NOT_READY: u8 = 0x02;

const INTERNAL_REFERENCE_V: f32 = 2.56;
const FULL_SCALE: f32 = 4096.0;

const READY_POLLS: u8 = 20;
const READY_POLL_MS: u64 = 2;

/// Input arrangement, bits [2:1] of the advanced configuration register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub enum OperationMode {
    /// Seven single-ended inputs plus the temperature sensor on IN7.
    SingleEndedWithTemp = 0,
    /// Eight single-ended inputs.
    SingleEnded = 1,
    PseudoDifferential = 2,
    Mixed = 3,
}

impl OperationMode {
    fn advanced_config_bits(self) -> u8 {
        (self as u8) << 1
    }
}

/// 8-channel 12-bit converter on the shared bus, internal 2.56 V reference.
pub struct Adc128d818 {
    addr: u8,
    mode: OperationMode,
}

impl Adc128d818 {
    pub const fn new(addr: u8) -> Self {
        Self {
            addr,
            mode: OperationMode::SingleEndedWithTemp,
        }
    }

    pub fn set_operation_mode(&mut self, mode: OperationMode) {
        self.mode = mode;
    }

    async fn wait_until_ready<I: I2c>(&self, i2c: &mut I) -> Result<()> {
        for _ in 0..READY_POLLS {
            if self.read_register(i2c, REG_BUSY_STATUS).await? & BUSY_NOT_READY == 0 {
                return Ok(());
            }
            Timer::after(Duration::from_millis(READY_POLL_MS)).await;
        }
        Err(DeviceError::Timeout)
    }

    async fn write_register<I: I2c>(&self, i2c: &mut I, reg: u8, value: u8) -> Result<()> {
        i2c.write(self.addr, &[reg, value])
            .await
            .map_err(DeviceError::bus)
    }

    async fn read_register<I: I2c>(&self, i2c: &mut I, reg: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        i2c.write_read(self.addr, &[reg], &mut buf)
            .await
            .map_err(DeviceError::bus)?;
        Ok(buf[0])
    }

    /// Raw 12-bit conversion result of `channel`.
    pub async fn read_raw<I: I2c>(&self, i2c: &mut I, channel: u8) -> Result<u16> {
        if channel as usize >= CHANNELS_PER_CONVERTER {
            return Err(DeviceError::InvalidChannel(channel));
        }
        let mut buf = [0u8; 2];
        i2c.write_read(self.addr, &[REG_CHANNEL_BASE + channel], &mut buf)
            .await
            .map_err(DeviceError::bus)?;
        // Result is left-justified in the 16-bit register
        Ok(u16::from_be_bytes(buf) >> 4)
    }
}

impl<I: I2c> AnalogConverter<I> for Adc128d818 {
    fn configure_single_ended(&mut self) {
        self.set_operation_mode(OperationMode::SingleEnded);
    }

    async fn begin(&mut self, bus: &mut I) -> Result<()> {
        self.wait_until_ready(bus).await?;

        // Registers are only writable while conversions are stopped
        self.write_register(bus, REG_CONFIG, 0x00).await?;
        self.write_register(bus, REG_ADVANCED_CONFIG, self.mode.advanced_config_bits())
            .await?;
        self.write_register(bus, REG_CONVERSION_RATE, CONVERSION_CONTINUOUS)
            .await?;
        self.write_register(bus, REG_CHANNEL_DISABLE, ALL_CHANNELS_ENABLED)
            .await?;
        self.write_register(bus, REG_CONFIG, CONFIG_START).await?;

        log_debug!("ADC128D818 at {:?} started", self.addr);
        Ok(())
    }

    async fn read_channel(&mut self, bus: &mut I, channel: u8) -> Result<f32> {
        let raw = self.read_raw(bus, channel).await?;
        Ok(raw as f32 * INTERNAL_REFERENCE_V / FULL_SCALE)
    }
}
