use embedded_hal_async::i2c::I2c;

use super::CurrentSource;
use crate::error::{DeviceError, Result};
use crate::log_debug;
use crate::scanner::CURRENT_SOURCE_CHANNELS;

// PCA9956B register map
const REG_MODE1: u8 = 0x00;
const REG_MODE2: u8 = 0x01;
const REG_LEDOUT0: u8 = 0x02;
const REG_PWMALL: u8 = 0x3F;
const REG_IREFALL: u8 = 0x40;

// Oscillator on, no sub-addresses
const MODE1_NORMAL: u8 = 0x00;
// Reserved bits [2:0] read back as 101
const MODE2_DEFAULT: u8 = 0x05;
const PWM_FULL: u8 = 0xFF;

const LEDOUT_REGISTERS: usize = CURRENT_SOURCE_CHANNELS as usize / 4;
const LED_OFF: u8 = 0b00;
const LED_ON: u8 = 0b01;

/// 24-output constant-current driver. Each output sinks the electrode
/// drive current for one electrode.
///
/// The LEDOUT registers are write-only from our point of view, so the
/// driver keeps a shadow copy and rewrites the one register that holds the
/// channel being switched.
pub struct Pca9956 {
    addr: Option<u8>,
    invert: bool,
    ledout: [u8; LEDOUT_REGISTERS],
}

impl Pca9956 {
    pub const fn new() -> Self {
        Self {
            addr: None,
            invert: false,
            ledout: [0; LEDOUT_REGISTERS],
        }
    }

    /// Whether output `channel` is currently driven.
    pub fn is_enabled(&self, channel: u8) -> bool {
        if channel >= CURRENT_SOURCE_CHANNELS {
            return false;
        }
        let (reg, shift) = Self::slot(channel);
        (self.ledout[reg] >> shift) & 0b11 == self.on_bits()
    }

    fn slot(channel: u8) -> (usize, u8) {
        (channel as usize / 4, (channel % 4) * 2)
    }

    fn on_bits(&self) -> u8 {
        if self.invert {
            LED_OFF
        } else {
            LED_ON
        }
    }

    fn off_bits(&self) -> u8 {
        if self.invert {
            LED_ON
        } else {
            LED_OFF
        }
    }

    fn all_off(&self) -> u8 {
        let bits = self.off_bits();
        bits | bits << 2 | bits << 4 | bits << 6
    }

    async fn write_register<I: I2c>(&self, i2c: &mut I, reg: u8, value: u8) -> Result<()> {
        let addr = self.addr.ok_or(DeviceError::NotResponding)?;
        i2c.write(addr, &[reg, value])
            .await
            .map_err(DeviceError::bus)
    }

    async fn set_channel<I: I2c>(&mut self, i2c: &mut I, channel: u8, on: bool) -> Result<()> {
        if channel >= CURRENT_SOURCE_CHANNELS {
            return Err(DeviceError::InvalidChannel(channel));
        }
        let (reg, shift) = Self::slot(channel);
        let bits = if on { self.on_bits() } else { self.off_bits() };
        let value = (self.ledout[reg] & !(0b11 << shift)) | bits << shift;
        self.write_register(i2c, REG_LEDOUT0 + reg as u8, value).await?;
        // Only commit once the device has it
        self.ledout[reg] = value;
        Ok(())
    }
}

impl Default for Pca9956 {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: I2c> CurrentSource<I> for Pca9956 {
    async fn init(
        &mut self,
        bus: &mut I,
        address: u8,
        max_current: u8,
        invert: bool,
    ) -> Result<()> {
        self.addr = Some(address);
        self.invert = invert;

        self.write_register(bus, REG_MODE1, MODE1_NORMAL).await?;
        self.write_register(bus, REG_MODE2, MODE2_DEFAULT).await?;
        self.write_register(bus, REG_PWMALL, PWM_FULL).await?;
        self.write_register(bus, REG_IREFALL, max_current).await?;

        let off = self.all_off();
        for reg in 0..LEDOUT_REGISTERS {
            self.write_register(bus, REG_LEDOUT0 + reg as u8, off).await?;
            self.ledout[reg] = off;
        }

        log_debug!("PCA9956 at {:?} ready, IREF {:?}", address, max_current);
        Ok(())
    }

    async fn enable_channel(&mut self, bus: &mut I, channel: u8) -> Result<()> {
        self.set_channel(bus, channel, true).await
    }

    async fn disable_channel(&mut self, bus: &mut I, channel: u8) -> Result<()> {
        self.set_channel(bus, channel, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockI2c;
    use embassy_futures::block_on;

    const ADDR: u8 = 0x01;

    fn ready(invert: bool) -> (MockI2c, Pca9956) {
        let mut i2c = MockI2c::new();
        let mut driver = Pca9956::new();
        block_on(driver.init(&mut i2c, ADDR, 0xFF, invert)).unwrap();
        i2c.clear_log();
        (i2c, driver)
    }

    #[test]
    fn init_sets_current_and_turns_everything_off() {
        let mut i2c = MockI2c::new();
        let mut driver = Pca9956::new();
        block_on(driver.init(&mut i2c, ADDR, 0x80, false)).unwrap();

        let writes = i2c.writes_to(ADDR);
        assert_eq!(writes.len(), 4 + LEDOUT_REGISTERS);
        assert!(writes.contains(&std::vec![REG_IREFALL, 0x80]));
        assert!(writes.contains(&std::vec![REG_LEDOUT0 + 5, 0x00]));
        assert!((0..CURRENT_SOURCE_CHANNELS).all(|ch| !driver.is_enabled(ch)));
    }

    #[test]
    fn enable_touches_only_its_register() {
        let (mut i2c, mut driver) = ready(false);
        block_on(driver.enable_channel(&mut i2c, 5)).unwrap();
        block_on(driver.enable_channel(&mut i2c, 6)).unwrap();
        block_on(driver.disable_channel(&mut i2c, 5)).unwrap();

        assert_eq!(
            i2c.writes_to(ADDR),
            std::vec![
                std::vec![REG_LEDOUT0 + 1, 0b0000_0100],
                std::vec![REG_LEDOUT0 + 1, 0b0001_0100],
                std::vec![REG_LEDOUT0 + 1, 0b0001_0000],
            ]
        );
        assert!(driver.is_enabled(6));
        assert!(!driver.is_enabled(5));
    }

    #[test]
    fn inverted_outputs_swap_encoding() {
        let (mut i2c, mut driver) = ready(true);
        block_on(driver.enable_channel(&mut i2c, 0)).unwrap();
        assert_eq!(
            i2c.writes_to(ADDR),
            std::vec![std::vec![REG_LEDOUT0, 0b0101_0100]]
        );
        assert!(driver.is_enabled(0));
    }

    #[test]
    fn failed_write_keeps_shadow() {
        let (mut i2c, mut driver) = ready(false);
        i2c.fail_next(1);
        assert!(block_on(driver.enable_channel(&mut i2c, 2)).is_err());
        assert!(!driver.is_enabled(2));
    }

    #[test]
    fn rejects_missing_outputs_and_uninitialized_use() {
        let (mut i2c, mut driver) = ready(false);
        assert_eq!(
            block_on(driver.enable_channel(&mut i2c, 24)),
            Err(DeviceError::InvalidChannel(24))
        );

        let mut fresh = Pca9956::new();
        assert_eq!(
            block_on(fresh.enable_channel(&mut i2c, 1)),
            Err(DeviceError::NotResponding)
        );
    }
}
