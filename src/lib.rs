#![cfg_attr(not(test), no_std)]

#[cfg(all(feature = "mock", not(test)))]
extern crate std;

pub mod logging;

#[cfg(feature = "board")]
pub mod board;
pub mod bus;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod ipc;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod report;
pub mod scanner;
pub mod tasks;

#[cfg(feature = "board")]
pub use board::Board;
pub use bus::{BusArbiter, BusSession, SharedBus};
pub use error::{DeviceError, Result};
pub use ipc::SharedState;
