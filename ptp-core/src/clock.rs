use crate::time::{Duration, Timestamp};

/// Interface to the hardware clock steered by one clock instance.
///
/// Every instance owns its own clock, as separate timing domains run on
/// separate clocks of the switch.
pub trait LocalClock: Send + 'static {
    type Error: std::error::Error;

    fn now(&self) -> Result<Timestamp, Self::Error>;

    /// Set the frequency correction, in ppb, positive making the clock run
    /// faster
    fn set_frequency(&self, ppb: f64) -> Result<(), Self::Error>;

    /// Add `offset` to the clock time
    fn step_clock(&self, offset: Duration) -> Result<(), Self::Error>;
}

#[cfg(any(test, feature = "__internal-test"))]
pub use test_clock::{ClockOperation, TestClock};

#[cfg(any(test, feature = "__internal-test"))]
mod test_clock {
    use std::{cell::RefCell, convert::Infallible};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum ClockOperation {
        Frequency(f64),
        Step(Duration),
    }

    /// Clock that only records what it was asked to do
    #[derive(Debug, Default)]
    pub struct TestClock {
        pub time: RefCell<Timestamp>,
        pub operations: RefCell<Vec<ClockOperation>>,
    }

    impl TestClock {
        pub fn take_operations(&self) -> Vec<ClockOperation> {
            std::mem::take(&mut *self.operations.borrow_mut())
        }
    }

    impl LocalClock for TestClock {
        type Error = Infallible;

        fn now(&self) -> Result<Timestamp, Self::Error> {
            Ok(*self.time.borrow())
        }

        fn set_frequency(&self, ppb: f64) -> Result<(), Self::Error> {
            self.operations
                .borrow_mut()
                .push(ClockOperation::Frequency(ppb));
            Ok(())
        }

        fn step_clock(&self, offset: Duration) -> Result<(), Self::Error> {
            let mut time = self.time.borrow_mut();
            *time = *time + offset;
            self.operations.borrow_mut().push(ClockOperation::Step(offset));
            Ok(())
        }
    }
}
