use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Timer};

use crate::bus::{BusArbiter, SharedBus};
use crate::config::{
    BalanceConfig, BALANCE_PERIOD_MS, BUS_ACQUIRE_TIMEOUT_MS, IMU_CALIBRATION_BUDGET_MS,
};
use crate::control::{AxisPid, MotorCommand, PidGains};
use crate::drivers::{MotorActuator, Orientation, OrientationSource};
use crate::error::Result;
use crate::ipc::TargetSetpoint;
use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub enum BalanceState {
    AwaitOrientation,
    Balancing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub struct BalanceStats {
    pub updates: u32,
    pub busy_ticks: u32,
    pub read_errors: u32,
    pub init_failures: u32,
    pub motor_errors: u32,
}

fn axis_gains(config: &BalanceConfig) -> PidGains {
    PidGains {
        kp: config.kp,
        ki: config.ki,
        kd: config.kd,
        integral_limit: config.integral_limit,
    }
}

/// Two-axis tilt controller. Owns the motors; reaches the orientation
/// source only through the bus arbiter.
pub struct BalanceController<MX, MY> {
    state: BalanceState,
    config: BalanceConfig,
    x: AxisPid,
    y: AxisPid,
    x_motor: MX,
    y_motor: MY,
    orientation: Orientation,
    bus_timeout: Duration,
    calibration_budget: Duration,
    stats: BalanceStats,
}

impl<MX: MotorActuator, MY: MotorActuator> BalanceController<MX, MY> {
    /// Build the controller and brake both motors.
    pub fn new(config: BalanceConfig, mut x_motor: MX, mut y_motor: MY) -> Self {
        let x_result = x_motor.brake();
        let y_result = y_motor.brake();
        if let Err(e) = x_result.and(y_result) {
            log_error!("Failed to brake motors at startup: {:?}", e);
        }
        let gains = axis_gains(&config);
        Self {
            state: BalanceState::AwaitOrientation,
            config,
            x: AxisPid::new(gains),
            y: AxisPid::new(gains),
            x_motor,
            y_motor,
            orientation: Orientation::default(),
            bus_timeout: Duration::from_millis(BUS_ACQUIRE_TIMEOUT_MS),
            calibration_budget: Duration::from_millis(IMU_CALIBRATION_BUDGET_MS),
            stats: BalanceStats::default(),
        }
    }

    pub fn state(&self) -> BalanceState {
        self.state
    }

    pub fn stats(&self) -> BalanceStats {
        self.stats
    }

    /// Angles used by the latest update.
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn axes(&self) -> (&AxisPid, &AxisPid) {
        (&self.x, &self.y)
    }

    pub fn motors(&self) -> (&MX, &MY) {
        (&self.x_motor, &self.y_motor)
    }

    pub async fn tick<M, B, C, S, X, O>(
        &mut self,
        arbiter: &BusArbiter<M, SharedBus<B, C, S, X, O>>,
        setpoint: &TargetSetpoint,
    ) -> BalanceState
    where
        M: RawMutex,
        O: OrientationSource<B>,
    {
        match self.state {
            BalanceState::AwaitOrientation => {
                let Some(mut session) = arbiter.acquire(self.bus_timeout).await else {
                    self.stats.busy_ticks = self.stats.busy_ticks.wrapping_add(1);
                    return self.state;
                };
                let devices = &mut *session;
                let result = devices
                    .orientation
                    .initialize(&mut devices.bus, self.calibration_budget)
                    .await;
                session.release();

                match result {
                    Ok(()) => {
                        log_info!("Orientation source ready, balancing");
                        self.state = BalanceState::Balancing;
                    }
                    Err(e) => {
                        self.stats.init_failures = self.stats.init_failures.wrapping_add(1);
                        log_warn!("Orientation source init failed: {:?}", e);
                    }
                }
            }
            BalanceState::Balancing => {
                let Some(mut session) = arbiter.acquire(self.bus_timeout).await else {
                    self.stats.busy_ticks = self.stats.busy_ticks.wrapping_add(1);
                    return self.state;
                };
                let devices = &mut *session;
                let result = devices.orientation.read_angles(&mut devices.bus).await;
                session.release();

                match result {
                    Ok(orientation) => {
                        if let Err(e) = self.update(orientation, setpoint.get()) {
                            self.stats.motor_errors = self.stats.motor_errors.wrapping_add(1);
                            log_error!("Motor command failed: {:?}", e);
                        }
                    }
                    Err(e) => {
                        self.stats.read_errors = self.stats.read_errors.wrapping_add(1);
                        if self.stats.read_errors % 100 == 1 {
                            log_warn!(
                                "Orientation read error #{}: {:?}",
                                self.stats.read_errors,
                                e
                            );
                        }
                    }
                }
            }
        }
        self.state
    }

    /// One control step from a fresh orientation sample and a setpoint pair
    /// of fractions.
    pub fn update(&mut self, orientation: Orientation, target: (f32, f32)) -> Result<()> {
        self.orientation = orientation;
        self.stats.updates = self.stats.updates.wrapping_add(1);

        let x_target = target.0 * self.config.max_tilt_deg;
        let y_target = target.1 * self.config.max_tilt_deg;

        let x_effort = self.x.update(x_target, orientation.roll);
        let y_effort = self.y.update(y_target, orientation.pitch);

        let max_pwm = self.config.max_pwm;
        let x_command = MotorCommand::from_effort(x_effort, self.config.x_direction, max_pwm);
        let y_command = MotorCommand::from_effort(y_effort, self.config.y_direction, max_pwm);
        log_debug!("Effort x={} y={}", x_effort, y_effort);

        // Drive both even if the first fails
        let x_result = self.x_motor.apply(x_command);
        let y_result = self.y_motor.apply(y_command);
        x_result.and(y_result)
    }

    pub fn brake(&mut self) -> Result<()> {
        let x_result = self.x_motor.brake();
        let y_result = self.y_motor.brake();
        x_result.and(y_result)
    }
}

/// Drive the controller forever at the balance cadence.
pub async fn run<M, B, C, S, X, O, MX, MY>(
    mut controller: BalanceController<MX, MY>,
    arbiter: &BusArbiter<M, SharedBus<B, C, S, X, O>>,
    setpoint: &TargetSetpoint,
)
where
    M: RawMutex,
    O: OrientationSource<B>,
    MX: MotorActuator,
    MY: MotorActuator,
{
    log_info!("Balance task started - {}ms control period", BALANCE_PERIOD_MS);
    let period = Duration::from_millis(BALANCE_PERIOD_MS);

    loop {
        controller.tick(arbiter, setpoint).await;
        // Sleep after every tick, however long it held the bus, so a waiting
        // acquisition task gets the grant before the next attempt
        Timer::after(period).await;
    }
}
