//! Sensing units and their discovery.
//!
//! Every collector implements the [`Collector`] contract and is listed in the
//! compile-time [`MANIFEST`]. The sensing itself is deliberately thin: OS
//! hooks and idle queries plug in behind [`InputFeed`] and [`IdleClock`].

pub mod accumulator;
pub mod afk;
pub mod heartbeat;
pub mod input;
pub mod registry;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use accumulator::Accumulator;
pub use afk::{AfkCollector, IdleClock, NoopIdleClock};
pub use heartbeat::HeartbeatCollector;
pub use input::{InputFeed, KeystrokeCollector, MouseUsedCollector};
pub use registry::{is_valid_name, Registration, Registry, MANIFEST};
pub use traits::{Collector, Snapshot, DEAD_VALUE};
pub use types::{KeyboardEvent, MouseEvent, MouseEventType, SensorEvent};
