//! Process table
//!
//! A process is one slot in a fixed table of control blocks. Each slot
//! tracks identity, a scheduling state, timing counters, and which kernel
//! queue currently holds the pid. Free slots circulate through an
//! available-id pool; pid 0 is reserved for the idle process.

use std::fmt;

use super::Fault;
use super::clock::Ticks;
use super::context::Context;
use super::mailbox::{MboxId, Message};
use super::queue::BoundedQueue;
use super::semaphore::SemId;

/// Number of process slots
pub const PROC_MAX: usize = 16;

/// Maximum length of a process name
pub const PROC_NAME_LEN: usize = 32;

/// The reserved idle process
pub const IDLE_PID: Pid = Pid(0);

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub usize);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// Process scheduling state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot is free
    Available,
    /// Runnable, waiting in the run (or idle) queue
    Running,
    /// The one process currently selected to run
    Active,
    /// Waiting in the sleep queue for a wake time
    Sleeping,
    /// Blocked on a semaphore or mailbox
    Waiting,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Available => write!(f, "available"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Active => write!(f, "active"),
            ProcessState::Sleeping => write!(f, "sleeping"),
            ProcessState::Waiting => write!(f, "waiting"),
        }
    }
}

/// Which kernel queue currently holds a pid
///
/// A pid lives in at most one queue at a time, and the marker stored in
/// its control block must agree with the queue that actually contains it.
/// The active process is in no queue at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTag {
    Available,
    Run,
    Idle,
    Sleep,
    SemWait(SemId),
    MboxWait(MboxId),
}

impl fmt::Display for QueueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueTag::Available => write!(f, "available"),
            QueueTag::Run => write!(f, "run"),
            QueueTag::Idle => write!(f, "idle"),
            QueueTag::Sleep => write!(f, "sleep"),
            QueueTag::SemWait(id) => write!(f, "sem-wait:{}", id.0),
            QueueTag::MboxWait(id) => write!(f, "mbox-wait:{}", id.0),
        }
    }
}

/// Process control block
#[derive(Debug)]
pub struct Process {
    pub pid: Pid,
    /// Display name, clamped to [`PROC_NAME_LEN`]
    pub name: String,
    pub state: ProcessState,
    /// Ticks charged since this process last became active
    pub active_time: u64,
    /// Cumulative ticks this process has been active
    pub total_time: u64,
    /// Absolute tick at which a sleeping process becomes runnable again
    pub wake_time: Ticks,
    /// Owning queue; `None` only while active
    pub queue: Option<QueueTag>,
    /// Saved execution state, created by the context-switch collaborator
    pub context: Option<Context>,
    /// A message delivered while this process was blocked on receive
    pub delivery: Option<Message>,
}

impl Process {
    fn vacant(pid: Pid) -> Self {
        Self {
            pid,
            name: String::new(),
            state: ProcessState::Available,
            active_time: 0,
            total_time: 0,
            wake_time: Ticks::ZERO,
            queue: Some(QueueTag::Available),
            context: None,
            delivery: None,
        }
    }

    pub fn in_use(&self) -> bool {
        self.state != ProcessState::Available
    }
}

/// Errors starting a new process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// Every process slot is in use
    NoFreeSlots,
    /// A kernel invariant broke while admitting the process
    Fault(Fault),
}

/// Errors exiting a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateError {
    /// Pid outside the process table
    InvalidPid,
    /// The slot is not in use; nothing to exit
    AlreadyAvailable,
    /// The idle process must always exist
    IdleProcess,
    /// A kernel invariant broke while rescheduling
    Fault(Fault),
}

/// The fixed table of process slots plus the pool of free pids
#[derive(Debug)]
pub struct ProcessTable {
    slots: Vec<Process>,
    available: BoundedQueue<Pid>,
}

impl ProcessTable {
    pub fn new() -> Self {
        let mut available = BoundedQueue::new(PROC_MAX);
        let mut slots = Vec::with_capacity(PROC_MAX);
        for i in 0..PROC_MAX {
            slots.push(Process::vacant(Pid(i)));
            // a fresh queue of PROC_MAX capacity always has room
            let _ = available.enqueue(Pid(i));
        }
        Self { slots, available }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        pid.0 < self.slots.len()
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.slots.get(pid.0)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.slots.get_mut(pid.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter()
    }

    /// Claim a free slot from the available pool
    pub fn allocate(&mut self) -> Result<Pid, SpawnError> {
        self.available.dequeue().map_err(|_| SpawnError::NoFreeSlots)
    }

    /// Return a slot to the available pool, resetting its counters
    pub fn release(&mut self, pid: Pid) -> Result<(), Fault> {
        let slot = self
            .slots
            .get_mut(pid.0)
            .ok_or(Fault::InvalidActivePid(pid))?;
        slot.state = ProcessState::Available;
        slot.active_time = 0;
        slot.total_time = 0;
        slot.wake_time = Ticks::ZERO;
        slot.queue = Some(QueueTag::Available);
        slot.context = None;
        slot.delivery = None;
        self.available
            .enqueue(pid)
            .map_err(|_| Fault::QueueOverflow("available queue"))
    }

    /// How many times `pid` appears in the available pool
    pub fn available_occupancy(&self, pid: Pid) -> usize {
        self.available.iter().filter(|&&p| p == pid).count()
    }

    pub(crate) fn slot_mut(&mut self, pid: Pid) -> &mut Process {
        &mut self.slots[pid.0]
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn clamp_name(name: &str) -> String {
    name.chars().take(PROC_NAME_LEN).collect()
}
