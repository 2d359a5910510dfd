use embedded_hal::digital::{OutputPin, PinState};

use super::Multiplexer;
use crate::config::ELECTRODE_COUNT;
use crate::error::{DeviceError, Result};

/// CD74HC4067 1:16 analog multiplexer: four select lines and an
/// active-low enable.
pub struct Cd74hc4067<P> {
    select: [P; 4],
    enable_n: P,
}

impl<P: OutputPin> Cd74hc4067<P> {
    /// Takes select lines S0..S3 (LSB first) and the enable pin. The switch
    /// starts disabled.
    pub fn new(select: [P; 4], mut enable_n: P) -> Result<Self> {
        enable_n.set_high().map_err(|_| DeviceError::Gpio)?;
        Ok(Self { select, enable_n })
    }

    fn enable(&mut self) -> Result<()> {
        self.enable_n.set_low().map_err(|_| DeviceError::Gpio)
    }
}

impl<P: OutputPin> Multiplexer for Cd74hc4067<P> {
    fn select_channel(&mut self, channel: u8) -> Result<()> {
        if channel as usize >= ELECTRODE_COUNT {
            return Err(DeviceError::InvalidChannel(channel));
        }
        for (bit, pin) in self.select.iter_mut().enumerate() {
            let state = PinState::from(channel & (1 << bit) != 0);
            pin.set_state(state).map_err(|_| DeviceError::Gpio)?;
        }
        self.enable()
    }
}
