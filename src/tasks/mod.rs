pub mod acquisition;
pub mod balance;
pub mod report;

pub use acquisition::{AcquisitionEngine, AcquisitionEvent, AcquisitionState, AcquisitionStats};
pub use balance::{BalanceController, BalanceState, BalanceStats};
pub use report::{FrameSummary, ReportMonitor};
