//! System call interface
//!
//! The boundary between user processes and the kernel. A trapped request
//! arrives as a [`Syscall`] value carrying its typed arguments; the reply
//! travels back in a [`Reply`]. Every operation keeps a stable number and
//! name for diagnostics.
//!
//! Blocking operations (sleep, a contended semaphore wait, a receive from
//! an empty mailbox, exit) clear the active process and run the scheduler
//! before returning; everything else returns straight to the caller.

use super::mailbox::{MSG_SIZE, MboxId, Message, SendStatus};
use super::process::{Pid, TerminateError};
use super::semaphore::{SemError, SemHandle, WaitOutcome};
use super::trace::{TraceCategory, TraceEvent};
use super::{Fault, Kernel};

/// A service request from the active process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Syscall {
    /// Seconds elapsed since boot
    GetSysTime,
    /// The calling process's pid
    GetProcPid,
    /// The calling process's name
    GetProcName,
    /// Block for at least `seconds`
    Sleep { seconds: u64 },
    /// Exit the calling process
    ProcExit,
    /// Initialize (or reset) a semaphore; the updated handle is returned
    SemInit { handle: SemHandle },
    /// Blocking acquire
    SemWait { handle: SemHandle },
    /// Release one waiter
    SemPost { handle: SemHandle },
    /// Non-blocking send into a mailbox
    MsgSend { mbox: MboxId, payload: [u8; MSG_SIZE] },
    /// Receive from a mailbox, blocking while it is empty
    MsgRecv { mbox: MboxId },
}

impl Syscall {
    /// Stable operation number
    pub fn nr(&self) -> u32 {
        match self {
            Syscall::GetSysTime => 0,
            Syscall::GetProcPid => 1,
            Syscall::GetProcName => 2,
            Syscall::Sleep { .. } => 3,
            Syscall::ProcExit => 4,
            Syscall::SemInit { .. } => 5,
            Syscall::SemWait { .. } => 6,
            Syscall::SemPost { .. } => 7,
            Syscall::MsgSend { .. } => 8,
            Syscall::MsgRecv { .. } => 9,
        }
    }

    /// Operation name for tracing
    pub fn name(&self) -> &'static str {
        match self {
            Syscall::GetSysTime => "get_sys_time",
            Syscall::GetProcPid => "get_proc_pid",
            Syscall::GetProcName => "get_proc_name",
            Syscall::Sleep { .. } => "sleep",
            Syscall::ProcExit => "proc_exit",
            Syscall::SemInit { .. } => "sem_init",
            Syscall::SemWait { .. } => "sem_wait",
            Syscall::SemPost { .. } => "sem_post",
            Syscall::MsgSend { .. } => "msg_send",
            Syscall::MsgRecv { .. } => "msg_recv",
        }
    }
}

/// Recoverable syscall-level failures, reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// The semaphore free pool is exhausted
    OutOfSemaphores,
    /// The idle process asked to exit; it must always exist
    IdleProcessExit,
}

/// What a syscall hands back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Nothing to report
    None,
    /// Seconds since boot
    Time(u64),
    /// The caller's pid
    Pid(Pid),
    /// The caller's name
    Name(String),
    /// The (possibly freshly initialized) semaphore handle
    Semaphore(SemHandle),
    /// A received message
    Message(Message),
    /// The caller blocked; another process is now active
    Blocked,
    /// The request was refused
    Error(SyscallError),
}

impl Kernel {
    /// Service one syscall from the active process
    pub fn syscall(&mut self, call: Syscall) -> Result<Reply, Fault> {
        if self.halted() {
            return Err(Fault::Halted);
        }
        let caller = match self.active() {
            Some(pid) => pid,
            None => return Err(self.fail(Fault::NoActiveProcess)),
        };
        self.trace(
            TraceEvent::instant(self.now(), TraceCategory::Syscall, call.name()).pid(caller),
        );

        match call {
            Syscall::GetSysTime => Ok(Reply::Time(self.uptime_seconds())),

            Syscall::GetProcPid => Ok(Reply::Pid(caller)),

            Syscall::GetProcName => match self.process(caller) {
                Some(proc) => Ok(Reply::Name(proc.name.clone())),
                None => Err(self.fail(Fault::InvalidActivePid(caller))),
            },

            Syscall::Sleep { seconds } => self.sys_sleep(caller, seconds),

            Syscall::ProcExit => self.sys_exit(caller),

            Syscall::SemInit { mut handle } => match self.sems.init(&mut handle) {
                Ok(()) => {
                    self.trace(
                        TraceEvent::instant(self.now(), TraceCategory::Semaphore, "sem-init")
                            .pid(caller)
                            .detail(format!("{handle:?}")),
                    );
                    Ok(Reply::Semaphore(handle))
                }
                Err(SemError::OutOfSemaphores) => {
                    Ok(Reply::Error(SyscallError::OutOfSemaphores))
                }
            },

            Syscall::SemWait { handle } => self.sys_sem_wait(caller, handle),

            Syscall::SemPost { handle } => self.sys_sem_post(caller, handle),

            Syscall::MsgSend { mbox, payload } => self.sys_msg_send(caller, mbox, payload),

            Syscall::MsgRecv { mbox } => self.sys_msg_recv(caller, mbox),
        }
    }

    fn sys_sleep(&mut self, caller: Pid, seconds: u64) -> Result<Reply, Fault> {
        let wake = self.now().after_seconds(seconds);
        if let Err(fault) = self.sched.put_to_sleep(&mut self.procs, wake) {
            return Err(self.fail(fault));
        }
        self.trace(
            TraceEvent::instant(self.now(), TraceCategory::Timer, "sleep")
                .pid(caller)
                .detail(format!("wake_at={wake}")),
        );
        self.reschedule()?;
        Ok(Reply::Blocked)
    }

    fn sys_exit(&mut self, caller: Pid) -> Result<Reply, Fault> {
        match self.terminate(caller) {
            Ok(()) => Ok(Reply::None),
            Err(TerminateError::IdleProcess) => {
                self.trace(
                    TraceEvent::instant(self.now(), TraceCategory::Process, "exit-denied")
                        .pid(caller)
                        .detail("the idle process must always exist"),
                );
                Ok(Reply::Error(SyscallError::IdleProcessExit))
            }
            Err(TerminateError::Fault(fault)) => Err(fault),
            // the active caller must be a live table entry
            Err(TerminateError::InvalidPid) | Err(TerminateError::AlreadyAvailable) => {
                Err(self.fail(Fault::InvalidActivePid(caller)))
            }
        }
    }

    fn sys_sem_wait(&mut self, caller: Pid, handle: SemHandle) -> Result<Reply, Fault> {
        let outcome = match self.sems.wait(handle, &mut self.procs, &mut self.sched) {
            Ok(outcome) => outcome,
            Err(fault) => return Err(self.fail(fault)),
        };
        match outcome {
            WaitOutcome::Acquired => Ok(Reply::None),
            WaitOutcome::Blocked => {
                self.trace(
                    TraceEvent::instant(self.now(), TraceCategory::Semaphore, "sem-block")
                        .pid(caller),
                );
                self.reschedule()?;
                Ok(Reply::Blocked)
            }
        }
    }

    fn sys_sem_post(&mut self, caller: Pid, handle: SemHandle) -> Result<Reply, Fault> {
        let released = match self.sems.post(handle, &mut self.procs, &mut self.sched) {
            Ok(released) => released,
            Err(fault) => return Err(self.fail(fault)),
        };
        if let Some(pid) = released {
            self.trace(
                TraceEvent::instant(self.now(), TraceCategory::Semaphore, "sem-release")
                    .pid(pid)
                    .detail(format!("posted_by={caller}")),
            );
        }
        Ok(Reply::None)
    }

    fn sys_msg_send(
        &mut self,
        caller: Pid,
        mbox: MboxId,
        payload: [u8; MSG_SIZE],
    ) -> Result<Reply, Fault> {
        let now = self.now();
        let status = match self
            .mailboxes
            .send(mbox, payload, &mut self.procs, &mut self.sched, now)
        {
            Ok(status) => status,
            Err(fault) => return Err(self.fail(fault)),
        };
        let event = match status {
            SendStatus::Delivered(receiver) => {
                TraceEvent::instant(self.now(), TraceCategory::Mailbox, "msg-deliver")
                    .pid(receiver)
                    .detail(format!("from={caller} via={mbox}"))
            }
            SendStatus::Buffered => {
                TraceEvent::instant(self.now(), TraceCategory::Mailbox, "msg-buffer")
                    .pid(caller)
                    .detail(format!("{mbox}"))
            }
        };
        self.trace(event);
        Ok(Reply::None)
    }

    fn sys_msg_recv(&mut self, caller: Pid, mbox: MboxId) -> Result<Reply, Fault> {
        let now = self.now();
        let received = match self
            .mailboxes
            .receive(mbox, &mut self.procs, &mut self.sched, now)
        {
            Ok(received) => received,
            Err(fault) => return Err(self.fail(fault)),
        };
        match received {
            Some(message) => Ok(Reply::Message(message)),
            None => {
                self.trace(
                    TraceEvent::instant(self.now(), TraceCategory::Mailbox, "msg-block")
                        .pid(caller)
                        .detail(format!("{mbox}")),
                );
                self.reschedule()?;
                Ok(Reply::Blocked)
            }
        }
    }
}
