//! Device error types shared by every capability on the board.
//!
//! Drivers map their HAL-specific errors into these variants so the task
//! state machines can log and retry without knowing which chip failed.

use embedded_hal_async::i2c::{ErrorKind, NoAcknowledgeSource};

/// Low-level two-wire bus failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub enum BusFault {
    Nack,
    ArbitrationLoss,
    Overrun,
    Bus,
    Other,
}

impl From<ErrorKind> for BusFault {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            | ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
            | ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown) => BusFault::Nack,
            ErrorKind::ArbitrationLoss => BusFault::ArbitrationLoss,
            ErrorKind::Overrun => BusFault::Overrun,
            ErrorKind::Bus => BusFault::Bus,
            _ => BusFault::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub enum DeviceError {
    /// A bus transaction failed.
    Bus(BusFault),
    /// The device answered with an unexpected identity or status.
    NotResponding,
    /// Channel index outside what the device provides.
    InvalidChannel(u8),
    /// The device did not become ready in time.
    Timeout,
    /// PWM output rejected the duty cycle.
    Pwm,
    /// A digital output could not be driven.
    Gpio,
}

impl DeviceError {
    /// Convert any `embedded-hal` I2C error.
    pub fn bus<E: embedded_hal_async::i2c::Error>(err: E) -> Self {
        DeviceError::Bus(err.kind().into())
    }
}

pub type Result<T> = core::result::Result<T, DeviceError>;
