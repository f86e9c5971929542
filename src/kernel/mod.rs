//! The kernel - processes, scheduling, synchronization, and IPC
//!
//! All kernel state lives in one explicitly owned [`Kernel`] value: the
//! process table, the scheduler's pid queues, the semaphore table, the
//! mailbox table, the tick counter, and the tracer. There are no ambient
//! globals; construct a fresh kernel per test or per boot.
//!
//! The execution model is run-to-completion: exactly one process is active
//! at a time, every kernel operation runs without interruption, and the
//! only yield point is the explicit dispatch at the end of a timer tick or
//! a blocking syscall. Fatal faults (broken kernel invariants) emit a
//! diagnostic trace event and latch the kernel halted; there is no
//! recovery path.

pub mod clock;
pub mod context;
pub mod mailbox;
pub mod process;
pub mod queue;
pub mod sched;
pub mod semaphore;
pub mod snapshot;
pub mod syscall;
pub mod trace;


pub use clock::{TICKS_PER_SECOND, Ticks};
pub use context::{Context, ContextSwitch, EntryPoint, SimContextSwitch};
pub use mailbox::{MBOX_CAPACITY, MBOX_MAX, MSG_SIZE, MailboxTable, MboxId, Message, SendStatus};
pub use process::{
    IDLE_PID, PROC_MAX, PROC_NAME_LEN, Pid, Process, ProcessState, ProcessTable, QueueTag,
    SpawnError, TerminateError,
};
pub use queue::{BoundedQueue, QueueError};
pub use sched::{Scheduler, TargetQueue};
pub use semaphore::{SEM_MAX, SemError, SemHandle, SemId, SemTable, WaitOutcome};
pub use snapshot::KernelSnapshot;
pub use syscall::{Reply, Syscall, SyscallError};
pub use trace::{TraceCategory, TraceEvent, Tracer};

use std::fmt;

/// Fatal kernel faults
///
/// Each of these means a kernel invariant no longer holds. The kernel
/// records a diagnostic and halts; every later entry point answers
/// [`Fault::Halted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The kernel has already halted on an earlier fault
    Halted,
    /// An operation that needs an active process found none
    NoActiveProcess,
    /// Dispatch ended with nothing runnable, not even the idle process
    NoRunnableProcess,
    /// A pid taken from kernel state does not name a live process
    InvalidActivePid(Pid),
    /// The process selected to run has no saved execution context
    MissingContext(Pid),
    /// A semaphore operation was handed an unusable handle
    InvalidSemaphore(SemHandle),
    /// A mailbox operation was handed an out-of-range index
    InvalidMailbox(MboxId),
    /// Send into a full mailbox with no receiver waiting
    MailboxFull(MboxId),
    /// An internal queue rejected an enqueue it must always have room for
    QueueOverflow(&'static str),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Halted => write!(f, "kernel is halted"),
            Fault::NoActiveProcess => write!(f, "no active process"),
            Fault::NoRunnableProcess => write!(f, "nothing runnable, idle queue empty"),
            Fault::InvalidActivePid(pid) => write!(f, "invalid active {pid}"),
            Fault::MissingContext(pid) => write!(f, "{pid} has no execution context"),
            Fault::InvalidSemaphore(handle) => write!(f, "invalid semaphore handle {handle:?}"),
            Fault::InvalidMailbox(id) => write!(f, "invalid mailbox {id}"),
            Fault::MailboxFull(id) => write!(f, "{id} is full"),
            Fault::QueueOverflow(which) => write!(f, "{which} overflow"),
        }
    }
}

/// A trapped entry into the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trap {
    /// Periodic timer interrupt
    Timer,
    /// Service request from the active process
    Syscall(Syscall),
}

/// The kernel
pub struct Kernel {
    now: Ticks,
    procs: ProcessTable,
    sched: Scheduler,
    sems: SemTable,
    mailboxes: MailboxTable,
    tracer: Tracer,
    switcher: Box<dyn ContextSwitch>,
    halted: bool,
}

impl Kernel {
    pub fn new(switcher: Box<dyn ContextSwitch>) -> Self {
        Self {
            now: Ticks::ZERO,
            procs: ProcessTable::new(),
            sched: Scheduler::new(),
            sems: SemTable::new(),
            mailboxes: MailboxTable::new(),
            tracer: Tracer::new(),
            switcher,
            halted: false,
        }
    }

    pub fn now(&self) -> Ticks {
        self.now
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.now.as_seconds()
    }

    pub fn active(&self) -> Option<Pid> {
        self.sched.active()
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    /// Read-only view of one process slot
    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.procs.get(pid)
    }

    pub(crate) fn procs(&self) -> &ProcessTable {
        &self.procs
    }

    pub(crate) fn sched(&self) -> &Scheduler {
        &self.sched
    }

    pub(crate) fn sems(&self) -> &SemTable {
        &self.sems
    }

    pub(crate) fn mailboxes(&self) -> &MailboxTable {
        &self.mailboxes
    }

    /// Start a new process.
    ///
    /// Claims a free slot, prepares a fresh execution context at `entry`,
    /// and admits the pid to `target`. Boot is expected to spawn the idle
    /// task first so that pid 0 lands in the idle queue.
    pub fn spawn(
        &mut self,
        name: &str,
        entry: EntryPoint,
        target: TargetQueue,
    ) -> Result<Pid, SpawnError> {
        let pid = self.procs.allocate()?;
        let context = self.switcher.create(entry);
        let display = process::clamp_name(name);

        let slot = self.procs.slot_mut(pid);
        slot.name = display.clone();
        slot.active_time = 0;
        slot.total_time = 0;
        slot.wake_time = Ticks::ZERO;
        slot.context = Some(context);
        slot.delivery = None;

        self.sched
            .admit_to(&mut self.procs, pid, target)
            .map_err(SpawnError::Fault)?;

        self.tracer.record(
            TraceEvent::instant(self.now, TraceCategory::Process, "spawn")
                .pid(pid)
                .detail(display),
        );
        Ok(pid)
    }

    /// Exit a process and return its slot to the available pool.
    ///
    /// The pid is first extracted from whatever queue owns it, keeping the
    /// one-queue-per-pid invariant. If the exiting process was active, a
    /// new process is dispatched before this returns - control never goes
    /// back to a terminated process.
    pub fn terminate(&mut self, pid: Pid) -> Result<(), TerminateError> {
        if !self.procs.contains(pid) {
            return Err(TerminateError::InvalidPid);
        }
        if pid == IDLE_PID {
            return Err(TerminateError::IdleProcess);
        }
        let tag = {
            let proc = self.procs.get(pid).ok_or(TerminateError::InvalidPid)?;
            if !proc.in_use() {
                return Err(TerminateError::AlreadyAvailable);
            }
            proc.queue
        };

        match tag {
            Some(QueueTag::SemWait(id)) => {
                self.sems.extract_waiter(id, pid);
            }
            Some(QueueTag::MboxWait(id)) => {
                self.mailboxes.extract_waiter(id, pid);
            }
            Some(other) => {
                self.sched.extract(pid, other);
            }
            None => {}
        }

        let was_active = self.sched.active() == Some(pid);
        if was_active {
            self.sched.clear_active();
        }

        self.procs.release(pid).map_err(TerminateError::Fault)?;
        self.tracer
            .record(TraceEvent::instant(self.now, TraceCategory::Process, "exit").pid(pid));

        if was_active {
            self.reschedule().map_err(TerminateError::Fault)?;
        }
        Ok(())
    }

    /// Run the first dispatch after boot spawns
    pub fn start(&mut self) -> Result<Pid, Fault> {
        if self.halted {
            return Err(Fault::Halted);
        }
        self.reschedule()
    }

    /// Timer interrupt: charge the active process, advance time, and run
    /// the scheduler.
    ///
    /// The idle process is never charged for its ticks.
    pub fn timer_tick(&mut self) -> Result<Pid, Fault> {
        if self.halted {
            return Err(Fault::Halted);
        }
        if let Some(pid) = self.sched.active()
            && pid != IDLE_PID
            && let Some(proc) = self.procs.get_mut(pid)
        {
            proc.active_time += 1;
            proc.total_time += 1;
        }
        self.now.advance();
        self.reschedule()
    }

    /// Route one trapped entry to its handler
    pub fn handle_trap(&mut self, trap: Trap) -> Result<Reply, Fault> {
        match trap {
            Trap::Timer => self.timer_tick().map(|_| Reply::None),
            Trap::Syscall(call) => self.syscall(call),
        }
    }

    /// Developer/diagnostic command: ask a process to exit.
    ///
    /// Unlike the trusted syscall path, a bad pid here is reported and
    /// ignored - the operator may guess wrong and the system keeps going.
    pub fn operator_exit(&mut self, pid: Pid) -> Result<(), Fault> {
        if self.halted {
            return Err(Fault::Halted);
        }
        match self.terminate(pid) {
            Ok(()) => Ok(()),
            Err(TerminateError::Fault(fault)) => Err(fault),
            Err(err) => {
                self.tracer.record(
                    TraceEvent::instant(self.now, TraceCategory::Process, "operator-exit-ignored")
                        .pid(pid)
                        .detail(format!("{err:?}")),
                );
                Ok(())
            }
        }
    }

    /// Stop servicing traps; the run loop is over
    pub fn shutdown(&mut self) {
        self.tracer
            .record(TraceEvent::instant(self.now, TraceCategory::Process, "shutdown"));
        self.halted = true;
    }

    /// Collect a message that was delivered while `pid` was blocked on
    /// receive. This is how the resumed receiver's reply is completed.
    pub fn take_delivery(&mut self, pid: Pid) -> Option<Message> {
        self.procs.get_mut(pid).and_then(|p| p.delivery.take())
    }

    /// Dispatch the next process and hand it the CPU
    fn reschedule(&mut self) -> Result<Pid, Fault> {
        let pid = match self.sched.schedule(&mut self.procs, self.now, &mut self.tracer) {
            Ok(pid) => pid,
            Err(fault) => return Err(self.fail(fault)),
        };

        let resumed = {
            let procs = &mut self.procs;
            let switcher = &mut self.switcher;
            match procs.get_mut(pid).and_then(|p| p.context.as_mut()) {
                Some(context) => {
                    switcher.resume(pid, context);
                    true
                }
                None => false,
            }
        };
        if !resumed {
            return Err(self.fail(Fault::MissingContext(pid)));
        }
        Ok(pid)
    }

    /// Record a fatal diagnostic and latch the kernel halted
    pub(crate) fn fail(&mut self, fault: Fault) -> Fault {
        self.tracer.record(
            TraceEvent::instant(self.now, TraceCategory::Fault, "fault").detail(fault.to_string()),
        );
        self.halted = true;
        fault
    }

    pub(crate) fn trace(&mut self, event: TraceEvent) {
        self.tracer.record(event);
    }
}
