//! # Tick and State Synchronization
//!
//! Pure bookkeeping used by the coordinator. Nothing here touches the
//! transport or the simulation.
//!
//! - [`TickClock`]: host fixed-timestep pacing
//! - [`TickSynchronizer`]: tick convergence and speed throttling
//! - [`DesyncDetector`]: rolling-window checksum comparison

mod clock;
mod desync;
mod throttle;
mod tick;

pub use clock::{ClockStats, TickClock};
pub use desync::{ChecksumOutcome, DesyncDetector, DesyncStats};
pub use throttle::{LinearThrottle, ThrottlePolicy};
pub use tick::TickSynchronizer;
