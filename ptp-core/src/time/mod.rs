//! Time primitives used by the servo and the event path

mod duration;
mod timestamp;

pub use duration::Duration;
pub use timestamp::Timestamp;
