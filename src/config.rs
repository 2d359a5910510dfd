// Centralize all configuration constants
pub const ACQUISITION_PERIOD_MS: u64 = 50;
pub const BALANCE_PERIOD_MS: u64 = 5;
pub const REPORT_PERIOD_MS: u64 = 100;
// Rendered frame: header, 208 `index,value` pairs, two flag lines
pub const CSV_CAPACITY: usize = 4096;
pub const I2C_FREQUENCY_HZ: u32 = 100_000;

// Bus arbitration: a few scheduler ticks, short enough that neither task starves
pub const BUS_ACQUIRE_TIMEOUT_MS: u64 = 5;

// Electrode array
pub const ELECTRODE_COUNT: usize = 16;
pub const CHANNELS_PER_CONVERTER: usize = 8;
pub const WINDOW_LEN: usize = ELECTRODE_COUNT - 2;
pub const DELTAS_PER_STATE: usize = WINDOW_LEN - 1;
pub const MEASUREMENT_LEN: usize = DELTAS_PER_STATE * ELECTRODE_COUNT;

// Device addresses on the shared bus
pub const ADC_A_ADDRESS: u8 = 0x1D;
pub const ADC_B_ADDRESS: u8 = 0x1F;
pub const CURRENT_SOURCE_ADDRESS: u8 = 0x01;
pub const CURRENT_SOURCE_MAX_CURRENT: u8 = 0xFF;
pub const CURRENT_SOURCE_INVERT: bool = false;
pub const IMU_ADDRESS: u8 = 0x28;

// Orientation source
pub const IMU_CALIBRATION_BUDGET_MS: u64 = 5;

// Balance loop defaults (see `BalanceConfig`)
pub const BALANCE_KP: f32 = 40.0;
pub const BALANCE_KI: f32 = 0.1;
pub const BALANCE_KD: f32 = 10.0;
pub const MAX_TILT_DEG: f32 = 10.0;
pub const INTEGRAL_LIMIT: f32 = 2550.0;
pub const MAX_PWM: u8 = 255;
pub const MOTOR_PWM_FREQUENCY_HZ: u32 = 25_000;

/// Which way a positive effort turns a motor.
///
/// The Y motor is mounted mirrored relative to X, so a positive effort
/// has to be driven in reverse to tilt the platform the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub enum Direction {
    Normal,
    Inverted,
}

impl Direction {
    pub fn apply(self, effort: f32) -> f32 {
        match self {
            Direction::Normal => effort,
            Direction::Inverted => -effort,
        }
    }
}

/// Tunable constants of the two-axis balance loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceConfig {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Tilt commanded by a setpoint fraction of 1.0, in degrees.
    pub max_tilt_deg: f32,
    /// Symmetric bound on the accumulated error of each axis.
    pub integral_limit: f32,
    pub max_pwm: u8,
    pub x_direction: Direction,
    pub y_direction: Direction,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            kp: BALANCE_KP,
            ki: BALANCE_KI,
            kd: BALANCE_KD,
            max_tilt_deg: MAX_TILT_DEG,
            integral_limit: INTEGRAL_LIMIT,
            max_pwm: MAX_PWM,
            x_direction: Direction::Normal,
            y_direction: Direction::Inverted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measurement_dimensions() {
        assert_eq!(WINDOW_LEN, 14);
        assert_eq!(DELTAS_PER_STATE, 13);
        assert_eq!(MEASUREMENT_LEN, 208);
    }

    #[test]
    fn default_axes_are_mirrored() {
        let cfg = BalanceConfig::default();
        assert_eq!(cfg.x_direction.apply(3.0), 3.0);
        assert_eq!(cfg.y_direction.apply(3.0), -3.0);
    }
}
