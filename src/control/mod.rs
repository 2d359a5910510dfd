pub mod pid;

pub use pid::{AxisPid, PidGains};

use crate::config::Direction;

/// What one motor should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub enum MotorCommand {
    Forward(u8),
    Reverse(u8),
    Brake,
}

impl MotorCommand {
    /// Map a signed effort to a direction and an 8-bit PWM magnitude.
    ///
    /// The magnitude is `|effort|` clamped to `max_pwm` and truncated. An
    /// effort of exactly zero (or NaN) brakes; it is the only case that
    /// energizes both bridge inputs.
    pub fn from_effort(effort: f32, direction: Direction, max_pwm: u8) -> Self {
        let effort = direction.apply(effort);
        let magnitude = if effort < 0.0 { -effort } else { effort };
        let magnitude = magnitude.clamp(0.0, max_pwm as f32) as u8;
        if effort > 0.0 {
            MotorCommand::Forward(magnitude)
        } else if effort < 0.0 {
            MotorCommand::Reverse(magnitude)
        } else {
            MotorCommand::Brake
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effort_sign_picks_direction() {
        assert_eq!(
            MotorCommand::from_effort(200.0, Direction::Normal, 255),
            MotorCommand::Forward(200)
        );
        assert_eq!(
            MotorCommand::from_effort(-12.7, Direction::Normal, 255),
            MotorCommand::Reverse(12)
        );
        assert_eq!(
            MotorCommand::from_effort(0.0, Direction::Normal, 255),
            MotorCommand::Brake
        );
    }

    #[test]
    fn magnitude_saturates() {
        assert_eq!(
            MotorCommand::from_effort(1e6, Direction::Normal, 255),
            MotorCommand::Forward(255)
        );
        assert_eq!(
            MotorCommand::from_effort(-1e6, Direction::Normal, 255),
            MotorCommand::Reverse(255)
        );
    }

    #[test]
    fn inverted_axis_swaps_direction() {
        assert_eq!(
            MotorCommand::from_effort(200.0, Direction::Inverted, 255),
            MotorCommand::Reverse(200)
        );
        assert_eq!(
            MotorCommand::from_effort(-5.0, Direction::Inverted, 255),
            MotorCommand::Forward(5)
        );
    }

    #[test]
    fn nan_effort_brakes() {
        assert_eq!(
            MotorCommand::from_effort(f32::NAN, Direction::Normal, 255),
            MotorCommand::Brake
        );
    }
}
