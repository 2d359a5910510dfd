//! Host-side stand-ins for the bus and every device capability.
//!
//! `MockI2c` is a register-file model for exercising the real drivers.
//! The capability mocks skip the wire entirely and append to a shared
//! [`Journal`], so tests can assert the exact order of device calls across
//! devices.

use core::cell::RefCell;
use core::convert::Infallible;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::vec::Vec;

use embassy_time::{Duration, Timer};
use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_hal::pwm::{ErrorType as PwmErrorType, SetDutyCycle};
use embedded_hal_async::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

use crate::control::MotorCommand;
use crate::drivers::{
    AnalogConverter, CurrentSource, MotorActuator, Multiplexer, Orientation, OrientationSource,
};
use crate::error::{DeviceError, Result};

/// Register-file model of an I2C bus.
///
/// A write of `[reg, data..]` stores `data` as the value of `reg`; a
/// write-read of `[reg]` returns the stored value, zero-padded. Every
/// register acknowledges unless told otherwise.
#[derive(Debug, Default)]
pub struct MockI2c {
    registers: BTreeMap<(u8, u8), Vec<u8>>,
    writes: Vec<(u8, Vec<u8>)>,
    fail_next: usize,
    nacked: Vec<(u8, u8)>,
}

impl MockI2c {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register(&mut self, addr: u8, reg: u8, value: &[u8]) {
        self.registers.insert((addr, reg), value.to_vec());
    }

    /// Plain writes (not register-pointer writes) sent to `addr`, in order.
    pub fn writes_to(&self, addr: u8) -> Vec<Vec<u8>> {
        self.writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn clear_log(&mut self) {
        self.writes.clear();
    }

    /// NACK the next `count` transactions.
    pub fn fail_next(&mut self, count: usize) {
        self.fail_next = count;
    }

    /// NACK every transaction that addresses `reg` on `addr` from now on.
    pub fn nack_register(&mut self, addr: u8, reg: u8) {
        self.nacked.push((addr, reg));
    }
}

impl ErrorType for MockI2c {
    type Error = ErrorKind;
}

impl I2c for MockI2c {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> core::result::Result<(), Self::Error> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        let target = match operations.first() {
            Some(Operation::Write(bytes)) => bytes.first().map(|&reg| (address, reg)),
            _ => None,
        };
        if target.is_some_and(|target| self.nacked.contains(&target)) {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
        }

        let mut pointer = None;
        let count = operations.len();
        for index in 0..count {
            let followed_by_read = matches!(operations.get(index + 1), Some(Operation::Read(_)));
            match &mut operations[index] {
                Operation::Write(bytes) => {
                    pointer = bytes.first().copied();
                    if let Some((&reg, data)) = bytes.split_first() {
                        if !data.is_empty() {
                            self.registers.insert((address, reg), data.to_vec());
                        }
                    }
                    if !followed_by_read {
                        self.writes.push((address, bytes.to_vec()));
                    }
                }
                Operation::Read(buffer) => {
                    buffer.fill(0);
                    let stored = pointer.and_then(|reg| self.registers.get(&(address, reg)));
                    if let Some(value) = stored {
                        let len = buffer.len().min(value.len());
                        buffer[..len].copy_from_slice(&value[..len]);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Digital output that remembers its level.
#[derive(Debug, Default)]
pub struct MockPin {
    high: bool,
}

impl MockPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.high
    }
}

impl PinErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> core::result::Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Self::Error> {
        self.high = true;
        Ok(())
    }
}

/// PWM channel with a configurable resolution.
#[derive(Debug)]
pub struct MockPwm {
    max_duty: u16,
    duty: u16,
}

impl MockPwm {
    pub fn new(max_duty: u16) -> Self {
        Self { max_duty, duty: 0 }
    }

    pub fn duty(&self) -> u16 {
        self.duty
    }
}

impl PwmErrorType for MockPwm {
    type Error = Infallible;
}

impl SetDutyCycle for MockPwm {
    fn max_duty_cycle(&self) -> u16 {
        self.max_duty
    }

    fn set_duty_cycle(&mut self, duty: u16) -> core::result::Result<(), Self::Error> {
        self.duty = duty;
        Ok(())
    }
}

/// One device call, as seen by the capability mocks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCall {
    ConverterMode(u8),
    ConverterBegin(u8),
    ConverterRead { converter: u8, channel: u8 },
    SourceInit { address: u8, max_current: u8, invert: bool },
    SourceEnable(u8),
    SourceDisable(u8),
    MuxSelect(u8),
    OrientationInit,
    OrientationRead,
}

/// Shared, ordered record of device calls.
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<DeviceCall>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: DeviceCall) {
        self.0.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.0.borrow().clone()
    }

    pub fn take(&self) -> Vec<DeviceCall> {
        core::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

/// Converter returning a fixed voltage per channel.
pub struct MockConverter {
    id: u8,
    journal: Journal,
    pub volts: [f32; 8],
    pub fail: bool,
}

impl MockConverter {
    pub fn new(id: u8, journal: Journal) -> Self {
        Self {
            id,
            journal,
            volts: [0.0; 8],
            fail: false,
        }
    }
}

impl<B> AnalogConverter<B> for MockConverter {
    fn configure_single_ended(&mut self) {
        self.journal.record(DeviceCall::ConverterMode(self.id));
    }

    async fn begin(&mut self, _bus: &mut B) -> Result<()> {
        self.journal.record(DeviceCall::ConverterBegin(self.id));
        if self.fail {
            return Err(DeviceError::NotResponding);
        }
        Ok(())
    }

    async fn read_channel(&mut self, _bus: &mut B, channel: u8) -> Result<f32> {
        self.journal.record(DeviceCall::ConverterRead {
            converter: self.id,
            channel,
        });
        if self.fail {
            return Err(DeviceError::NotResponding);
        }
        self.volts
            .get(channel as usize)
            .copied()
            .ok_or(DeviceError::InvalidChannel(channel))
    }
}

pub struct MockCurrentSource {
    journal: Journal,
    pub fail: bool,
}

impl MockCurrentSource {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail: false,
        }
    }

    fn outcome(&self) -> Result<()> {
        if self.fail {
            Err(DeviceError::NotResponding)
        } else {
            Ok(())
        }
    }
}

impl<B> CurrentSource<B> for MockCurrentSource {
    async fn init(
        &mut self,
        _bus: &mut B,
        address: u8,
        max_current: u8,
        invert: bool,
    ) -> Result<()> {
        self.journal.record(DeviceCall::SourceInit {
            address,
            max_current,
            invert,
        });
        self.outcome()
    }

    async fn enable_channel(&mut self, _bus: &mut B, channel: u8) -> Result<()> {
        self.journal.record(DeviceCall::SourceEnable(channel));
        self.outcome()
    }

    async fn disable_channel(&mut self, _bus: &mut B, channel: u8) -> Result<()> {
        self.journal.record(DeviceCall::SourceDisable(channel));
        self.outcome()
    }
}

pub struct MockMux {
    journal: Journal,
}

impl MockMux {
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }
}

impl Multiplexer for MockMux {
    fn select_channel(&mut self, channel: u8) -> Result<()> {
        self.journal.record(DeviceCall::MuxSelect(channel));
        Ok(())
    }
}

/// Orientation source with scripted angles.
pub struct MockOrientation {
    journal: Journal,
    pub angles: Orientation,
    pub fail_init: bool,
    pub fail_reads: bool,
    /// Time `initialize` spends on the bus before answering.
    pub init_delay: Duration,
}

impl MockOrientation {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            angles: Orientation::default(),
            fail_init: false,
            fail_reads: false,
            init_delay: Duration::from_ticks(0),
        }
    }
}

impl<B> OrientationSource<B> for MockOrientation {
    async fn initialize(&mut self, _bus: &mut B, _calibration_budget: Duration) -> Result<()> {
        self.journal.record(DeviceCall::OrientationInit);
        if self.init_delay > Duration::from_ticks(0) {
            Timer::after(self.init_delay).await;
        }
        if self.fail_init {
            return Err(DeviceError::NotResponding);
        }
        Ok(())
    }

    async fn read_angles(&mut self, _bus: &mut B) -> Result<Orientation> {
        self.journal.record(DeviceCall::OrientationRead);
        if self.fail_reads {
            return Err(DeviceError::Timeout);
        }
        Ok(self.angles)
    }
}

/// Motor that keeps every command it was given, including the ones it
/// reports as failed.
#[derive(Debug, Default)]
pub struct MockMotor {
    pub commands: Vec<MotorCommand>,
    pub fail: bool,
}

impl MockMotor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            commands: Vec::new(),
            fail: true,
        }
    }

    pub fn last(&self) -> Option<MotorCommand> {
        self.commands.last().copied()
    }

    fn push(&mut self, command: MotorCommand) -> Result<()> {
        self.commands.push(command);
        if self.fail {
            Err(DeviceError::Pwm)
        } else {
            Ok(())
        }
    }
}

impl MotorActuator for MockMotor {
    fn drive_forward(&mut self, magnitude: u8) -> Result<()> {
        self.push(MotorCommand::Forward(magnitude))
    }

    fn drive_reverse(&mut self, magnitude: u8) -> Result<()> {
        self.push(MotorCommand::Reverse(magnitude))
    }

    fn brake(&mut self) -> Result<()> {
        self.push(MotorCommand::Brake)
    }
}
