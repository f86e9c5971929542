//! Process scheduler
//!
//! Strict round-robin over a run queue, with the idle process (pid 0) kept
//! apart in its own single-entry queue as the fallback when nothing else is
//! runnable. Sleeping processes sit in a third queue until their wake time
//! arrives.
//!
//! One invocation does, in order: wake every sleeper whose deadline has
//! passed, requeue the currently active process at the back of its queue,
//! then dispatch the head of the run queue (or the idle queue). The quantum
//! is exactly one timer tick; there is no priority and no aging.

use super::Fault;
use super::clock::Ticks;
use super::process::{IDLE_PID, PROC_MAX, Pid, ProcessState, ProcessTable, QueueTag};
use super::queue::BoundedQueue;
use super::trace::{TraceCategory, TraceEvent, Tracer};

/// Destination queue for a newly admitted process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetQueue {
    Run,
    Idle,
}

/// Round-robin scheduler state: the three pid queues and the active pid
#[derive(Debug)]
pub struct Scheduler {
    run: BoundedQueue<Pid>,
    idle: BoundedQueue<Pid>,
    sleep: BoundedQueue<Pid>,
    active: Option<Pid>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            run: BoundedQueue::new(PROC_MAX),
            idle: BoundedQueue::new(PROC_MAX),
            sleep: BoundedQueue::new(PROC_MAX),
            active: None,
        }
    }

    /// The process currently selected to run, if any
    pub fn active(&self) -> Option<Pid> {
        self.active
    }

    /// Drop the active pid without requeueing it (the caller has blocked
    /// or exited it). The next [`Scheduler::schedule`] picks a successor.
    pub fn clear_active(&mut self) -> Option<Pid> {
        self.active.take()
    }

    pub fn run_len(&self) -> usize {
        self.run.len()
    }

    pub fn sleep_len(&self) -> usize {
        self.sleep.len()
    }

    /// Make `pid` runnable in the queue appropriate for it
    pub fn admit(&mut self, procs: &mut ProcessTable, pid: Pid) -> Result<(), Fault> {
        let target = if pid == IDLE_PID {
            TargetQueue::Idle
        } else {
            TargetQueue::Run
        };
        self.admit_to(procs, pid, target)
    }

    /// Make `pid` runnable in an explicit queue
    pub fn admit_to(
        &mut self,
        procs: &mut ProcessTable,
        pid: Pid,
        target: TargetQueue,
    ) -> Result<(), Fault> {
        let (queue, tag, label) = match target {
            TargetQueue::Run => (&mut self.run, QueueTag::Run, "run queue"),
            TargetQueue::Idle => (&mut self.idle, QueueTag::Idle, "idle queue"),
        };
        queue.enqueue(pid).map_err(|_| Fault::QueueOverflow(label))?;
        let proc = procs.get_mut(pid).ok_or(Fault::InvalidActivePid(pid))?;
        proc.state = ProcessState::Running;
        proc.queue = Some(tag);
        Ok(())
    }

    /// Move the active process into the sleep queue until `wake`
    pub fn put_to_sleep(&mut self, procs: &mut ProcessTable, wake: Ticks) -> Result<Pid, Fault> {
        let pid = self.active.take().ok_or(Fault::NoActiveProcess)?;
        let proc = procs.get_mut(pid).ok_or(Fault::InvalidActivePid(pid))?;
        proc.wake_time = wake;
        proc.state = ProcessState::Sleeping;
        proc.queue = Some(QueueTag::Sleep);
        self.sleep
            .enqueue(pid)
            .map_err(|_| Fault::QueueOverflow("sleep queue"))?;
        Ok(pid)
    }

    /// Remove `pid` from the run, idle, or sleep queue it currently sits in
    pub(crate) fn extract(&mut self, pid: Pid, tag: QueueTag) -> bool {
        match tag {
            QueueTag::Run => self.run.remove(&pid),
            QueueTag::Idle => self.idle.remove(&pid),
            QueueTag::Sleep => self.sleep.remove(&pid),
            _ => false,
        }
    }

    /// Wake every sleeper whose deadline has passed.
    ///
    /// Sleepers are stored in the order they went to sleep, not in wake-time
    /// order, so the whole queue is rotated through once; the relative order
    /// of processes that keep sleeping is preserved.
    fn wake_sleepers(
        &mut self,
        procs: &mut ProcessTable,
        now: Ticks,
        tracer: &mut Tracer,
    ) -> Result<(), Fault> {
        let rounds = self.sleep.len();
        for _ in 0..rounds {
            let Ok(pid) = self.sleep.dequeue() else { break };
            let due = {
                let proc = procs.get(pid).ok_or(Fault::InvalidActivePid(pid))?;
                proc.wake_time <= now
            };
            if due {
                self.admit(procs, pid)?;
                tracer.record(TraceEvent::instant(now, TraceCategory::Timer, "wake").pid(pid));
            } else {
                self.sleep
                    .enqueue(pid)
                    .map_err(|_| Fault::QueueOverflow("sleep queue"))?;
            }
        }
        Ok(())
    }

    /// Pick the next active process.
    ///
    /// After this returns, exactly one valid pid is active; every failure
    /// here is a broken kernel invariant.
    pub fn schedule(
        &mut self,
        procs: &mut ProcessTable,
        now: Ticks,
        tracer: &mut Tracer,
    ) -> Result<Pid, Fault> {
        self.wake_sleepers(procs, now, tracer)?;

        // The outgoing process rejoins the back of its queue with a fresh
        // quantum.
        if let Some(current) = self.active.take() {
            let proc = procs
                .get_mut(current)
                .ok_or(Fault::InvalidActivePid(current))?;
            proc.active_time = 0;
            self.admit(procs, current)?;
        }

        let pid = match self.run.dequeue() {
            Ok(pid) => pid,
            Err(_) => self
                .idle
                .dequeue()
                .map_err(|_| Fault::NoRunnableProcess)?,
        };

        let proc = procs.get_mut(pid).ok_or(Fault::InvalidActivePid(pid))?;
        if proc.state != ProcessState::Running {
            return Err(Fault::InvalidActivePid(pid));
        }
        proc.state = ProcessState::Active;
        proc.queue = None;
        self.active = Some(pid);

        tracer.record(TraceEvent::instant(now, TraceCategory::Sched, "dispatch").pid(pid));
        Ok(pid)
    }

    /// How many of the scheduler's queues hold `pid`
    pub fn occupancy(&self, pid: Pid) -> usize {
        [&self.run, &self.idle, &self.sleep]
            .into_iter()
            .map(|q| q.iter().filter(|&&p| p == pid).count())
            .sum()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
