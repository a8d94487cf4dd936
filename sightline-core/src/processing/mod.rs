//! Per-frame processing stages

pub mod dwell;
pub mod filter;
pub mod watchdog;

pub use dwell::{DwellState, DwellTimer, DwellTransition};
pub use filter::ObservationFilter;
pub use watchdog::{Watchdog, WatchdogKind};
