#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use eit_balance::{
    board::{PlatformDevices, PlatformMotor},
    config::BalanceConfig,
    scanner::ElectrodeMap,
    tasks::{acquisition, balance, report, AcquisitionEngine, BalanceController},
    Board, BusArbiter, SharedState,
};

type Arbiter = BusArbiter<CriticalSectionRawMutex, PlatformDevices>;

static ARBITER: StaticCell<Arbiter> = StaticCell::new();
static SHARED: SharedState = SharedState::new();

#[embassy_executor::task]
async fn acquisition_task(arbiter: &'static Arbiter, shared: &'static SharedState) {
    let engine = AcquisitionEngine::new(ElectrodeMap::default());
    acquisition::run(engine, arbiter, &shared.publish).await
}

#[embassy_executor::task]
async fn balance_task(
    controller: BalanceController<PlatformMotor, PlatformMotor>,
    arbiter: &'static Arbiter,
    shared: &'static SharedState,
) {
    balance::run(controller, arbiter, &shared.setpoint).await
}

#[embassy_executor::task]
async fn report_task(shared: &'static SharedState) {
    report::run(&shared.publish, &shared.flags).await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting eit-balance");
    let board = Board::init();

    // Motors come up braked; keep the bridges awake for the lifetime of main
    let _motor_sleep_n = board.motor_sleep_n;
    let controller = BalanceController::new(BalanceConfig::default(), board.x_motor, board.y_motor);

    let arbiter: &'static Arbiter = ARBITER.init(BusArbiter::new(board.devices));

    spawner.spawn(balance_task(controller, arbiter, &SHARED)).unwrap();
    info!("Balance task spawned");

    spawner.spawn(acquisition_task(arbiter, &SHARED)).unwrap();
    info!("Acquisition task spawned");

    spawner.spawn(report_task(&SHARED)).unwrap();
    info!("Report task spawned");

    core::future::pending::<()>().await;
}
