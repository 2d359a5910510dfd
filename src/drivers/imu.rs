use embassy_time::{Duration, Instant, Timer};
use embedded_hal_async::i2c::I2c;

use super::{Orientation, OrientationSource};
use crate::error::{DeviceError, Result};
use crate::{log_debug, log_error, log_info, log_warn};

// BNO055 I2C address with ADR low
pub const BNO055_ADDRESS_A: u8 = 0x28;

const BNO055_OPR_MODE_ADDR: u8 = 0x3D;
const BNO055_SYS_TRIGGER_ADDR: u8 = 0x3F;
const BNO055_UNIT_SEL_ADDR: u8 = 0x3B;
const BNO055_SYS_STAT_ADDR: u8 = 0x39;
const BNO055_SYS_ERR_ADDR: u8 = 0x3A;

// BNO055 Register Addresses
const BNO055_CHIP_ID_ADDR: u8 = 0x00;
const BNO055_EULER_H_LSB_ADDR: u8 = 0x1A;
const BNO055_CALIB_STAT_ADDR: u8 = 0x35;

// BNO055 ID
const BNO055_ID: u8 = 0xA0;

const OPR_MODE_CONFIG: u8 = 0x00;
const OPR_MODE_NDOF: u8 = 0x0C;
// Degrees, m/s², dps, °C, Android orientation
const UNIT_SEL_DEGREES: u8 = 0x80;
// Use the external 32 kHz crystal
const SYS_TRIGGER_EXT_CRYSTAL: u8 = 0x80;
const SYS_TRIGGER_RESET: u8 = 0x20;

// One LSB of an Euler angle is 1/16 degree
const EULER_LSB_PER_DEG: f32 = 16.0;

const CALIBRATION_POLL_MS: u64 = 100;

// System status values
const SYS_STAT_SYS_ERROR: u8 = 1;
const SYS_STAT_SENSOR_FUSION_RUNNING: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub struct CalibrationStatus {
    pub sys: u8,   // System calibration (0-3)
    pub gyro: u8,  // Gyroscope calibration (0-3)
    pub accel: u8, // Accelerometer calibration (0-3)
    pub mag: u8,   // Magnetometer calibration (0-3)
}

impl CalibrationStatus {
    pub fn from_byte(calib_byte: u8) -> Self {
        Self {
            sys: (calib_byte >> 6) & 0x03,
            gyro: (calib_byte >> 4) & 0x03,
            accel: (calib_byte >> 2) & 0x03,
            mag: calib_byte & 0x03,
        }
    }

    pub fn is_fully_calibrated(&self) -> bool {
        self.sys == 3 && self.gyro == 3 && self.accel == 3 && self.mag == 3
    }
}

/// BNO055 in NDOF fusion mode, read for Euler angles.
pub struct Bno055 {
    addr: u8,
    calibrated: bool,
}

impl Bno055 {
    pub const fn new(addr: u8) -> Self {
        Self {
            addr,
            calibrated: false,
        }
    }

    /// Whether the last calibration check reported all four subsystems done.
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    async fn try_init<I: I2c>(&self, i2c: &mut I) -> Result<()> {
        // Step 1: Check chip ID with retries
        let id = self.read_byte_with_retries(i2c, BNO055_CHIP_ID_ADDR, 5).await?;
        if id != BNO055_ID {
            log_error!("Invalid BNO055 ID: {}, expected {}", id, BNO055_ID);
            return Err(DeviceError::NotResponding);
        }

        // Step 2: Software reset
        self.write_byte_with_retries(i2c, BNO055_SYS_TRIGGER_ADDR, SYS_TRIGGER_RESET, 3)
            .await?;
        // Wait for reset to complete (BNO055 datasheet: up to 650ms)
        Timer::after(Duration::from_millis(700)).await;
        self.wait_for_chip_ready(i2c).await?;

        // Step 3: Config mode, units, crystal
        self.write_byte_with_retries(i2c, BNO055_OPR_MODE_ADDR, OPR_MODE_CONFIG, 3)
            .await?;
        Timer::after(Duration::from_millis(30)).await;
        self.write_byte_with_retries(i2c, BNO055_UNIT_SEL_ADDR, UNIT_SEL_DEGREES, 3)
            .await?;
        self.write_byte_with_retries(i2c, BNO055_SYS_TRIGGER_ADDR, SYS_TRIGGER_EXT_CRYSTAL, 3)
            .await?;
        Timer::after(Duration::from_millis(10)).await;

        // Step 4: NDOF mode (all sensors, fusion enabled)
        self.write_byte_with_retries(i2c, BNO055_OPR_MODE_ADDR, OPR_MODE_NDOF, 3)
            .await?;
        Timer::after(Duration::from_millis(20)).await;

        let mode = self.read_byte_with_retries(i2c, BNO055_OPR_MODE_ADDR, 3).await?;
        if mode != OPR_MODE_NDOF {
            log_error!("Failed to set NDOF mode: got {}", mode);
            return Err(DeviceError::NotResponding);
        }

        self.check_system_status(i2c).await
    }

    async fn wait_for_chip_ready<I: I2c>(&self, i2c: &mut I) -> Result<()> {
        for _ in 0..20 {
            if let Ok(id) = self.read_byte(i2c, BNO055_CHIP_ID_ADDR).await {
                if id == BNO055_ID {
                    return Ok(());
                }
            }
            Timer::after(Duration::from_millis(50)).await;
        }
        log_error!("Timeout waiting for BNO055 to come out of reset");
        Err(DeviceError::Timeout)
    }

    async fn check_system_status<I: I2c>(&self, i2c: &mut I) -> Result<()> {
        let sys_stat = self.read_byte_with_retries(i2c, BNO055_SYS_STAT_ADDR, 3).await?;
        match sys_stat {
            SYS_STAT_SYS_ERROR => {
                let sys_err = self.read_byte_with_retries(i2c, BNO055_SYS_ERR_ADDR, 3).await?;
                log_error!("BNO055 system error, code {}", sys_err);
                Err(DeviceError::NotResponding)
            }
            SYS_STAT_SENSOR_FUSION_RUNNING => Ok(()),
            other => {
                log_debug!("BNO055 system status {}", other);
                Ok(())
            }
        }
    }

    pub async fn calibration_status<I: I2c>(&mut self, i2c: &mut I) -> Result<CalibrationStatus> {
        let calib_byte = self.read_byte(i2c, BNO055_CALIB_STAT_ADDR).await?;
        let status = CalibrationStatus::from_byte(calib_byte);
        self.calibrated = status.is_fully_calibrated();
        Ok(status)
    }

    /// Poll calibration until done or `budget` runs out. The sensor is
    /// already fusing at this point, so a failed poll only ends the wait.
    async fn await_calibration<I: I2c>(&mut self, i2c: &mut I, budget: Duration) {
        let started = Instant::now();
        loop {
            match self.calibration_status(i2c).await {
                Ok(status) if status.is_fully_calibrated() => return,
                Ok(_) => {}
                Err(e) => {
                    log_warn!("BNO055 calibration poll failed: {:?}", e);
                    self.calibrated = false;
                    return;
                }
            }
            let remaining = match budget.checked_sub(started.elapsed()) {
                Some(remaining) if remaining > Duration::from_ticks(0) => remaining,
                _ => return,
            };
            Timer::after(remaining.min(Duration::from_millis(CALIBRATION_POLL_MS))).await;
        }
    }

    pub async fn read_euler<I: I2c>(&mut self, i2c: &mut I) -> Result<Orientation> {
        // heading, roll, pitch
        let raw = self.read_bytes::<_, 6>(i2c, BNO055_EULER_H_LSB_ADDR).await?;
        let roll = i16::from_le_bytes([raw[2], raw[3]]) as f32 / EULER_LSB_PER_DEG;
        let pitch = i16::from_le_bytes([raw[4], raw[5]]) as f32 / EULER_LSB_PER_DEG;
        Ok(Orientation { roll, pitch })
    }

    async fn read_byte_with_retries<I: I2c>(
        &self,
        i2c: &mut I,
        reg: u8,
        retries: u8,
    ) -> Result<u8> {
        let mut last_error = DeviceError::Timeout;

        for attempt in 1..=retries {
            match self.read_byte(i2c, reg).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_error = e;
                    if attempt < retries {
                        Timer::after(Duration::from_millis(10)).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn write_byte_with_retries<I: I2c>(
        &self,
        i2c: &mut I,
        reg: u8,
        value: u8,
        retries: u8,
    ) -> Result<()> {
        let mut last_error = DeviceError::Timeout;

        for attempt in 1..=retries {
            match self.write_byte(i2c, reg, value).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = e;
                    if attempt < retries {
                        Timer::after(Duration::from_millis(10)).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn write_byte<I: I2c>(&self, i2c: &mut I, reg: u8, value: u8) -> Result<()> {
        i2c.write(self.addr, &[reg, value])
            .await
            .map_err(DeviceError::bus)
    }

    async fn read_byte<I: I2c>(&self, i2c: &mut I, reg: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        i2c.write_read(self.addr, &[reg], &mut buf)
            .await
            .map_err(DeviceError::bus)?;
        Ok(buf[0])
    }

    async fn read_bytes<I: I2c, const N: usize>(&self, i2c: &mut I, reg: u8) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        i2c.write_read(self.addr, &[reg], &mut buf)
            .await
            .map_err(DeviceError::bus)?;
        Ok(buf)
    }
}

impl<I: I2c> OrientationSource<I> for Bno055 {
    async fn initialize(&mut self, bus: &mut I, calibration_budget: Duration) -> Result<()> {
        self.try_init(bus).await?;
        self.await_calibration(bus, calibration_budget).await;
        if self.calibrated {
            log_info!("BNO055 ready and fully calibrated");
        } else {
            log_warn!("BNO055 ready, calibration still converging");
        }
        Ok(())
    }

    async fn read_angles(&mut self, bus: &mut I) -> Result<Orientation> {
        self.read_euler(bus).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockI2c;
    use embassy_futures::block_on;

    #[test]
    fn calibration_byte_unpacks() {
        let status = CalibrationStatus::from_byte(0b11_10_01_11);
        assert_eq!(
            status,
            CalibrationStatus {
                sys: 3,
                gyro: 2,
                accel: 1,
                mag: 3
            }
        );
        assert!(!status.is_fully_calibrated());
        assert!(CalibrationStatus::from_byte(0xFF).is_fully_calibrated());
    }

    #[test]
    fn euler_maps_roll_and_pitch() {
        let mut i2c = MockI2c::new();
        // heading 90°, roll -2.5°, pitch 4°
        let heading = (90 * 16i16).to_le_bytes();
        let roll = (-40i16).to_le_bytes();
        let pitch = (64i16).to_le_bytes();
        i2c.set_register(
            BNO055_ADDRESS_A,
            BNO055_EULER_H_LSB_ADDR,
            &[heading[0], heading[1], roll[0], roll[1], pitch[0], pitch[1]],
        );

        let mut imu = Bno055::new(BNO055_ADDRESS_A);
        let angles = block_on(imu.read_angles(&mut i2c)).unwrap();
        assert_eq!(angles, Orientation { roll: -2.5, pitch: 4.0 });
    }

    #[test]
    fn calibration_status_updates_cache() {
        let mut i2c = MockI2c::new();
        i2c.set_register(BNO055_ADDRESS_A, BNO055_CALIB_STAT_ADDR, &[0xFF]);
        let mut imu = Bno055::new(BNO055_ADDRESS_A);
        assert!(!imu.is_calibrated());
        block_on(imu.calibration_status(&mut i2c)).unwrap();
        assert!(imu.is_calibrated());
    }

    #[test]
    fn wrong_chip_id_is_rejected() {
        let mut i2c = MockI2c::new();
        i2c.set_register(BNO055_ADDRESS_A, BNO055_CHIP_ID_ADDR, &[0x42]);
        let mut imu = Bno055::new(BNO055_ADDRESS_A);
        let result = block_on(imu.initialize(&mut i2c, Duration::from_millis(0)));
        assert_eq!(result, Err(DeviceError::NotResponding));
    }

    fn responsive_chip() -> MockI2c {
        let mut i2c = MockI2c::new();
        i2c.set_register(BNO055_ADDRESS_A, BNO055_CHIP_ID_ADDR, &[BNO055_ID]);
        i2c.set_register(
            BNO055_ADDRESS_A,
            BNO055_SYS_STAT_ADDR,
            &[SYS_STAT_SENSOR_FUSION_RUNNING],
        );
        i2c
    }

    #[test]
    fn init_reaches_ndof_without_calibration() {
        let mut i2c = responsive_chip();
        let mut imu = Bno055::new(BNO055_ADDRESS_A);
        block_on(imu.initialize(&mut i2c, Duration::from_millis(0))).unwrap();
        assert!(!imu.is_calibrated());
        assert_eq!(
            i2c.writes_to(BNO055_ADDRESS_A).last(),
            Some(&std::vec![BNO055_OPR_MODE_ADDR, OPR_MODE_NDOF])
        );
    }

    #[test]
    fn nack_on_calibration_poll_does_not_fail_init() {
        let mut i2c = responsive_chip();
        i2c.nack_register(BNO055_ADDRESS_A, BNO055_CALIB_STAT_ADDR);
        let mut imu = Bno055::new(BNO055_ADDRESS_A);
        assert_eq!(block_on(imu.initialize(&mut i2c, Duration::from_millis(50))), Ok(()));
        assert!(!imu.is_calibrated());
    }

    #[test]
    fn bus_failure_surfaces_as_device_error() {
        let mut i2c = MockI2c::new();
        i2c.fail_next(1);
        let mut imu = Bno055::new(BNO055_ADDRESS_A);
        assert!(matches!(
            block_on(imu.read_angles(&mut i2c)),
            Err(DeviceError::Bus(_))
        ));
    }
}
