//! Counting semaphores
//!
//! A fixed table of counting semaphores, each with its own FIFO wait queue.
//! Slots are handed out on first use from a pool of free ids; a process
//! holds a [`SemHandle`] naming its semaphore and passes it back on every
//! wait/post.
//!
//! `count` is the number of outstanding acquisitions. `wait` increments it
//! on every entry and blocks the caller exactly when the resource was
//! already held; `post` releases the head waiter, if any, and decrements a
//! positive count. `count` cannot go negative by construction.

use std::fmt;

use super::Fault;
use super::process::{Pid, ProcessState, ProcessTable, QueueTag};
use super::queue::BoundedQueue;
use super::sched::Scheduler;

/// Number of semaphore slots
pub const SEM_MAX: usize = 16;

/// Semaphore identifier (index into the semaphore table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemId(pub usize);

impl fmt::Display for SemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sem:{}", self.0)
    }
}

/// A process's reference to a semaphore slot
///
/// Starts out uninitialized; `sem_init` fills in the id. Ids are only ever
/// produced by the table itself, so an initialized handle always names a
/// live slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SemHandle(Option<SemId>);

impl SemHandle {
    pub const UNINITIALIZED: SemHandle = SemHandle(None);

    pub fn id(&self) -> Option<SemId> {
        self.0
    }

    pub fn is_initialized(&self) -> bool {
        self.0.is_some()
    }
}

/// Result of a semaphore wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The resource was free; the caller proceeds
    Acquired,
    /// The caller was parked on the wait queue and must yield
    Blocked,
}

/// Semaphore errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemError {
    /// The free pool is exhausted
    OutOfSemaphores,
}

/// A single counting semaphore
#[derive(Debug)]
pub struct Semaphore {
    count: u64,
    initialized: bool,
    wait_q: BoundedQueue<Pid>,
}

impl Semaphore {
    fn new() -> Self {
        Self {
            count: 0,
            initialized: false,
            wait_q: BoundedQueue::new(super::process::PROC_MAX),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn waiters(&self) -> usize {
        self.wait_q.len()
    }
}

/// The semaphore table plus the pool of free semaphore ids
#[derive(Debug)]
pub struct SemTable {
    sems: Vec<Semaphore>,
    free: BoundedQueue<SemId>,
}

impl SemTable {
    pub fn new() -> Self {
        let mut free = BoundedQueue::new(SEM_MAX);
        let mut sems = Vec::with_capacity(SEM_MAX);
        for i in 0..SEM_MAX {
            sems.push(Semaphore::new());
            let _ = free.enqueue(SemId(i));
        }
        Self { sems, free }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SemId, &Semaphore)> {
        self.sems.iter().enumerate().map(|(i, s)| (SemId(i), s))
    }

    fn resolve(&self, handle: SemHandle) -> Result<SemId, Fault> {
        let id = handle.id().ok_or(Fault::InvalidSemaphore(handle))?;
        match self.sems.get(id.0) {
            Some(sem) if sem.initialized => Ok(id),
            _ => Err(Fault::InvalidSemaphore(handle)),
        }
    }

    /// Initialize (or reset) the semaphore named by `handle`.
    ///
    /// An uninitialized handle gets a fresh slot from the free pool with a
    /// zero count; an already-initialized one just has its count reset.
    pub fn init(&mut self, handle: &mut SemHandle) -> Result<(), SemError> {
        match handle.id() {
            None => {
                let id = self.free.dequeue().map_err(|_| SemError::OutOfSemaphores)?;
                let sem = &mut self.sems[id.0];
                sem.count = 0;
                sem.initialized = true;
                *handle = SemHandle(Some(id));
            }
            Some(id) => {
                if let Some(sem) = self.sems.get_mut(id.0)
                    && sem.initialized
                {
                    sem.count = 0;
                }
            }
        }
        Ok(())
    }

    /// Blocking acquire by the active process.
    ///
    /// Increments the count; if the semaphore was already held the caller
    /// is parked on the wait queue in WAITING state and the scheduler's
    /// active slot is cleared so a successor can be dispatched.
    pub fn wait(
        &mut self,
        handle: SemHandle,
        procs: &mut ProcessTable,
        sched: &mut Scheduler,
    ) -> Result<WaitOutcome, Fault> {
        let id = self.resolve(handle)?;
        let caller = sched.active().ok_or(Fault::NoActiveProcess)?;

        let sem = &mut self.sems[id.0];
        let was_held = sem.count > 0;
        sem.count += 1;
        if !was_held {
            return Ok(WaitOutcome::Acquired);
        }

        sem.wait_q
            .enqueue(caller)
            .map_err(|_| Fault::QueueOverflow("semaphore wait queue"))?;
        let proc = procs
            .get_mut(caller)
            .ok_or(Fault::InvalidActivePid(caller))?;
        proc.state = ProcessState::Waiting;
        proc.queue = Some(QueueTag::SemWait(id));
        sched.clear_active();
        Ok(WaitOutcome::Blocked)
    }

    /// Release one waiter, if any, and decrement a positive count.
    ///
    /// Returns the released pid for diagnostics.
    pub fn post(
        &mut self,
        handle: SemHandle,
        procs: &mut ProcessTable,
        sched: &mut Scheduler,
    ) -> Result<Option<Pid>, Fault> {
        let id = self.resolve(handle)?;

        let released = self.sems[id.0].wait_q.dequeue().ok();
        if let Some(pid) = released {
            sched.admit(procs, pid)?;
        }

        let sem = &mut self.sems[id.0];
        if sem.count > 0 {
            sem.count -= 1;
        }
        Ok(released)
    }

    /// Drop `pid` from the wait queue of semaphore `id` (process exit)
    pub(crate) fn extract_waiter(&mut self, id: SemId, pid: Pid) -> bool {
        match self.sems.get_mut(id.0) {
            Some(sem) => sem.wait_q.remove(&pid),
            None => false,
        }
    }

    /// How many semaphore wait queues hold `pid`
    pub fn waiter_occupancy(&self, pid: Pid) -> usize {
        self.sems
            .iter()
            .map(|s| s.wait_q.iter().filter(|&&p| p == pid).count())
            .sum()
    }
}

impl Default for SemTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::clock::Ticks;
    use super::super::trace::Tracer;

    fn fixture(workers: usize) -> (SemTable, ProcessTable, Scheduler, Tracer) {
        let mut procs = ProcessTable::new();
        let mut sched = Scheduler::new();
        for _ in 0..=workers {
            let pid = procs.allocate().unwrap();
            procs.slot_mut(pid).state = ProcessState::Running;
            sched.admit(&mut procs, pid).unwrap();
        }
        (SemTable::new(), procs, sched, Tracer::new())
    }

    fn dispatch(procs: &mut ProcessTable, sched: &mut Scheduler, tracer: &mut Tracer) -> Pid {
        sched.schedule(procs, Ticks::ZERO, tracer).unwrap()
    }

    #[test]
    fn test_init_allocates_once() {
        let (mut sems, ..) = fixture(0);

        let mut handle = SemHandle::UNINITIALIZED;
        sems.init(&mut handle).unwrap();
        let first = handle.id().unwrap();

        // Re-init of the same handle resets the count, not the id
        sems.init(&mut handle).unwrap();
        assert_eq!(handle.id(), Some(first));

        let mut other = SemHandle::UNINITIALIZED;
        sems.init(&mut other).unwrap();
        assert_ne!(other.id(), handle.id());
    }

    #[test]
    fn test_init_exhaustion() {
        let (mut sems, ..) = fixture(0);
        for _ in 0..SEM_MAX {
            let mut handle = SemHandle::UNINITIALIZED;
            sems.init(&mut handle).unwrap();
        }
        let mut handle = SemHandle::UNINITIALIZED;
        assert_eq!(sems.init(&mut handle), Err(SemError::OutOfSemaphores));
        assert!(!handle.is_initialized());
    }

    #[test]
    fn test_wait_on_uninitialized_handle_is_fatal() {
        let (mut sems, mut procs, mut sched, mut tracer) = fixture(1);
        dispatch(&mut procs, &mut sched, &mut tracer);

        let handle = SemHandle::UNINITIALIZED;
        let result = sems.wait(handle, &mut procs, &mut sched);
        assert_eq!(result, Err(Fault::InvalidSemaphore(handle)));
    }

    #[test]
    fn test_first_wait_acquires() {
        let (mut sems, mut procs, mut sched, mut tracer) = fixture(1);
        let caller = dispatch(&mut procs, &mut sched, &mut tracer);

        let mut handle = SemHandle::UNINITIALIZED;
        sems.init(&mut handle).unwrap();

        let outcome = sems.wait(handle, &mut procs, &mut sched).unwrap();
        assert_eq!(outcome, WaitOutcome::Acquired);
        assert_eq!(sems.iter().next().unwrap().1.count(), 1);
        // the caller keeps running
        assert_eq!(sched.active(), Some(caller));
        assert_eq!(procs.get(caller).unwrap().state, ProcessState::Active);
    }

    #[test]
    fn test_contended_wait_blocks_fifo_release() {
        let (mut sems, mut procs, mut sched, mut tracer) = fixture(3);
        let mut handle = SemHandle::UNINITIALIZED;
        sems.init(&mut handle).unwrap();

        // p1 acquires, then each successor blocks in turn
        let p1 = dispatch(&mut procs, &mut sched, &mut tracer);
        assert_eq!(
            sems.wait(handle, &mut procs, &mut sched).unwrap(),
            WaitOutcome::Acquired
        );

        let p2 = dispatch(&mut procs, &mut sched, &mut tracer);
        assert_ne!(p2, p1);
        assert_eq!(
            sems.wait(handle, &mut procs, &mut sched).unwrap(),
            WaitOutcome::Blocked
        );
        assert_eq!(procs.get(p2).unwrap().state, ProcessState::Waiting);

        let p3 = dispatch(&mut procs, &mut sched, &mut tracer);
        assert_eq!(
            sems.wait(handle, &mut procs, &mut sched).unwrap(),
            WaitOutcome::Blocked
        );

        // release order matches wait order
        assert_eq!(sems.post(handle, &mut procs, &mut sched).unwrap(), Some(p2));
        assert_eq!(procs.get(p2).unwrap().state, ProcessState::Running);
        assert_eq!(procs.get(p3).unwrap().state, ProcessState::Waiting);

        assert_eq!(sems.post(handle, &mut procs, &mut sched).unwrap(), Some(p3));
        assert_eq!(procs.get(p3).unwrap().state, ProcessState::Running);

        // no waiters left; count drains to zero and stays there
        assert_eq!(sems.post(handle, &mut procs, &mut sched).unwrap(), None);
        let (_, sem) = sems.iter().next().unwrap();
        assert_eq!(sem.count(), 0);
        assert_eq!(sems.post(handle, &mut procs, &mut sched).unwrap(), None);
        assert_eq!(sems.iter().next().unwrap().1.count(), 0);
    }

    #[test]
    fn test_count_tracks_outstanding_acquisitions() {
        let (mut sems, mut procs, mut sched, mut tracer) = fixture(2);
        let mut handle = SemHandle::UNINITIALIZED;
        sems.init(&mut handle).unwrap();

        dispatch(&mut procs, &mut sched, &mut tracer);
        sems.wait(handle, &mut procs, &mut sched).unwrap();
        assert_eq!(sems.iter().next().unwrap().1.count(), 1);

        dispatch(&mut procs, &mut sched, &mut tracer);
        sems.wait(handle, &mut procs, &mut sched).unwrap();
        assert_eq!(sems.iter().next().unwrap().1.count(), 2);

        sems.post(handle, &mut procs, &mut sched).unwrap();
        assert_eq!(sems.iter().next().unwrap().1.count(), 1);
    }
}
