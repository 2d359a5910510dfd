//! Two-input H-bridge motor.
//!
//! | IN1 | IN2 | Motor                        |
//! |-----|-----|------------------------------|
//! | PWM | 0   | Forward (speed = duty)       |
//! | 0   | PWM | Reverse (speed = duty)       |
//! | 1   | 1   | Brake (both terminals short) |

use embedded_hal::pwm::SetDutyCycle;

use super::MotorActuator;
use crate::error::{DeviceError, Result};

const PWM_SCALE: u16 = u8::MAX as u16;

pub struct HBridgeMotor<IN1, IN2> {
    in1: IN1,
    in2: IN2,
}

impl<IN1, IN2> HBridgeMotor<IN1, IN2>
where
    IN1: SetDutyCycle,
    IN2: SetDutyCycle,
{
    /// Wrap two PWM channels. The motor is braked before it is returned.
    pub fn new(in1: IN1, in2: IN2) -> Result<Self> {
        let mut motor = Self { in1, in2 };
        motor.brake()?;
        Ok(motor)
    }

    fn set(&mut self, in1: u8, in2: u8) -> Result<()> {
        self.in1
            .set_duty_cycle_fraction(in1 as u16, PWM_SCALE)
            .map_err(|_| DeviceError::Pwm)?;
        self.in2
            .set_duty_cycle_fraction(in2 as u16, PWM_SCALE)
            .map_err(|_| DeviceError::Pwm)
    }
}

impl<IN1, IN2> MotorActuator for HBridgeMotor<IN1, IN2>
where
    IN1: SetDutyCycle,
    IN2: SetDutyCycle,
{
    #[inline]
    fn drive_forward(&mut self, magnitude: u8) -> Result<()> {
        self.set(magnitude, 0)
    }

    #[inline]
    fn drive_reverse(&mut self, magnitude: u8) -> Result<()> {
        self.set(0, magnitude)
    }

    #[inline]
    fn brake(&mut self) -> Result<()> {
        self.set(u8::MAX, u8::MAX)
    }
}
