//! Kernel timekeeping
//!
//! Time is counted in timer-interrupt ticks. The timer fires at
//! [`TICKS_PER_SECOND`]; user-visible times (the sleep syscall, the system
//! time syscall) are expressed in whole seconds.

use std::fmt;

/// Timer interrupts per second
pub const TICKS_PER_SECOND: u64 = 100;

/// An absolute point in kernel time, measured in ticks since boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticks(pub u64);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    /// Advance by one timer interrupt
    pub fn advance(&mut self) {
        self.0 += 1;
    }

    /// Whole seconds elapsed
    pub fn as_seconds(self) -> u64 {
        self.0 / TICKS_PER_SECOND
    }

    /// The instant `seconds` from this one
    pub fn after_seconds(self, seconds: u64) -> Ticks {
        Ticks(self.0 + seconds * TICKS_PER_SECOND)
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_round_down() {
        assert_eq!(Ticks(0).as_seconds(), 0);
        assert_eq!(Ticks(99).as_seconds(), 0);
        assert_eq!(Ticks(100).as_seconds(), 1);
        assert_eq!(Ticks(250).as_seconds(), 2);
    }

    #[test]
    fn test_after_seconds() {
        let now = Ticks(40);
        assert_eq!(now.after_seconds(0), Ticks(40));
        assert_eq!(now.after_seconds(3), Ticks(340));
    }

    #[test]
    fn test_advance() {
        let mut now = Ticks::ZERO;
        for _ in 0..5 {
            now.advance();
        }
        assert_eq!(now, Ticks(5));
    }
}
