//! kestrel - a tiny round-robin multitasking kernel
//!
//! A fixed table of processes scheduled round-robin at one timer tick per
//! quantum, with timed sleep, counting semaphores, and bounded mailbox
//! message passing. User processes request services through a typed
//! syscall trap; the actual CPU context switch is delegated to an external
//! collaborator behind a trait.
//!
//! Everything the kernel owns lives in one [`kernel::Kernel`] value, so a
//! fresh system can be constructed per test, booted, and driven tick by
//! tick.

pub mod kernel;

pub use kernel::{Fault, Kernel, Trap};
