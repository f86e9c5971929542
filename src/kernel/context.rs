//! Execution contexts
//!
//! The kernel decides *which* process runs; actually capturing and
//! restoring CPU state is the job of an external collaborator behind the
//! [`ContextSwitch`] trait. The kernel only ever creates a context from an
//! entry point and resumes it — it never looks inside.

use std::cell::RefCell;
use std::rc::Rc;

use super::process::Pid;

/// Token naming the first instruction of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPoint(pub u64);

/// Opaque saved-execution-state handle, owned by exactly one process slot
///
/// The raw value is meaningful only to the [`ContextSwitch`] implementation
/// that created it.
#[derive(Debug, PartialEq, Eq)]
pub struct Context(u64);

impl Context {
    pub fn new(raw: u64) -> Self {
        Context(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// The context-switch collaborator
pub trait ContextSwitch {
    /// Prepare a fresh execution context that will begin at `entry`
    fn create(&mut self, entry: EntryPoint) -> Context;

    /// Hand the CPU to `pid`'s saved context
    fn resume(&mut self, pid: Pid, context: &mut Context);
}

/// Simulation collaborator: hands out sequential handles and records the
/// order in which processes were resumed.
///
/// The resume log is shared through `Rc<RefCell<...>>` so that the harness
/// driving the kernel can observe dispatch order while the kernel owns the
/// switcher.
pub struct SimContextSwitch {
    next_handle: u64,
    resumes: Rc<RefCell<Vec<Pid>>>,
}

impl SimContextSwitch {
    pub fn new() -> (Self, Rc<RefCell<Vec<Pid>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let switcher = Self {
            next_handle: 1,
            resumes: Rc::clone(&log),
        };
        (switcher, log)
    }
}

impl ContextSwitch for SimContextSwitch {
    fn create(&mut self, _entry: EntryPoint) -> Context {
        let context = Context::new(self.next_handle);
        self.next_handle += 1;
        context
    }

    fn resume(&mut self, pid: Pid, _context: &mut Context) {
        self.resumes.borrow_mut().push(pid);
    }
}
