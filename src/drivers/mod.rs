//! Device capabilities consumed by the tasks, and the drivers behind them.
//!
//! Bus-attached capabilities take the raw bus as a parameter on every call.
//! The bus itself is only reachable through a [`BusSession`], so holding a
//! session is the one way to talk to a device.
//!
//! [`BusSession`]: crate::bus::BusSession

pub mod adc;
pub mod current;
pub mod imu;
pub mod motor;
pub mod mux;

pub use adc::Adc128d818;
pub use current::Pca9956;
pub use imu::Bno055;
pub use motor::HBridgeMotor;
pub use mux::Cd74hc4067;

use embassy_time::Duration;

use crate::control::MotorCommand;
use crate::error::Result;

/// Roll and pitch in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub struct Orientation {
    pub roll: f32,
    pub pitch: f32,
}

#[allow(async_fn_in_trait)]
pub trait OrientationSource<B> {
    /// Bring the sensor up, spending at most `calibration_budget` waiting for
    /// calibration. `Ok` means the sensor is delivering angles, calibrated
    /// or not.
    async fn initialize(&mut self, bus: &mut B, calibration_budget: Duration) -> Result<()>;

    async fn read_angles(&mut self, bus: &mut B) -> Result<Orientation>;
}

#[allow(async_fn_in_trait)]
pub trait AnalogConverter<B> {
    /// Select single-ended inputs for the next [`begin`](Self::begin).
    fn configure_single_ended(&mut self);

    async fn begin(&mut self, bus: &mut B) -> Result<()>;

    /// Read one input in volts.
    async fn read_channel(&mut self, bus: &mut B, channel: u8) -> Result<f32>;
}

#[allow(async_fn_in_trait)]
pub trait CurrentSource<B> {
    async fn init(&mut self, bus: &mut B, address: u8, max_current: u8, invert: bool) -> Result<()>;

    async fn enable_channel(&mut self, bus: &mut B, channel: u8) -> Result<()>;

    async fn disable_channel(&mut self, bus: &mut B, channel: u8) -> Result<()>;
}

/// 1:16 analog multiplexer routing the ground return.
pub trait Multiplexer {
    fn select_channel(&mut self, channel: u8) -> Result<()>;
}

/// One axis motor. Magnitudes are 8-bit PWM duty.
pub trait MotorActuator {
    fn drive_forward(&mut self, magnitude: u8) -> Result<()>;

    fn drive_reverse(&mut self, magnitude: u8) -> Result<()>;

    fn brake(&mut self) -> Result<()>;

    fn apply(&mut self, command: MotorCommand) -> Result<()> {
        match command {
            MotorCommand::Forward(magnitude) => self.drive_forward(magnitude),
            MotorCommand::Reverse(magnitude) => self.drive_reverse(magnitude),
            MotorCommand::Brake => self.brake(),
        }
    }
}
