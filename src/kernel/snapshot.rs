//! Kernel state snapshots
//!
//! A serializable view of everything the kernel owns, for diagnostics and
//! external inspection. Embedders typically render it with `serde_json`.

use serde::Serialize;

use super::Kernel;

/// Point-in-time view of the whole kernel
#[derive(Debug, Clone, Serialize)]
pub struct KernelSnapshot {
    pub uptime_ticks: u64,
    pub uptime_seconds: u64,
    pub halted: bool,
    /// The active pid, if a dispatch has happened
    pub active: Option<usize>,
    pub processes: Vec<ProcessSnapshot>,
    pub semaphores: Vec<SemaphoreSnapshot>,
    pub mailboxes: Vec<MailboxSnapshot>,
}

/// One process slot
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub pid: usize,
    pub name: String,
    pub state: String,
    pub active_time: u64,
    pub total_time: u64,
    pub wake_time: u64,
    /// The queue holding this pid, if any ("run", "sleep", "sem-wait:2", ...)
    pub queue: Option<String>,
}

/// One semaphore slot
#[derive(Debug, Clone, Serialize)]
pub struct SemaphoreSnapshot {
    pub id: usize,
    pub initialized: bool,
    pub count: u64,
    pub waiters: usize,
}

/// One mailbox
#[derive(Debug, Clone, Serialize)]
pub struct MailboxSnapshot {
    pub id: usize,
    pub depth: usize,
    pub capacity: usize,
    pub waiters: usize,
}

impl Kernel {
    pub fn snapshot(&self) -> KernelSnapshot {
        let processes = self
            .procs()
            .iter()
            .map(|proc| ProcessSnapshot {
                pid: proc.pid.0,
                name: proc.name.clone(),
                state: proc.state.to_string(),
                active_time: proc.active_time,
                total_time: proc.total_time,
                wake_time: proc.wake_time.0,
                queue: proc.queue.map(|tag| tag.to_string()),
            })
            .collect();

        let semaphores = self
            .sems()
            .iter()
            .map(|(id, sem)| SemaphoreSnapshot {
                id: id.0,
                initialized: sem.is_initialized(),
                count: sem.count(),
                waiters: sem.waiters(),
            })
            .collect();

        let mailboxes = self
            .mailboxes()
            .iter()
            .map(|(id, mbox)| MailboxSnapshot {
                id: id.0,
                depth: mbox.depth(),
                capacity: mbox.capacity(),
                waiters: mbox.waiters(),
            })
            .collect();

        KernelSnapshot {
            uptime_ticks: self.now().0,
            uptime_seconds: self.uptime_seconds(),
            halted: self.halted(),
            active: self.active().map(|pid| pid.0),
            processes,
            semaphores,
            mailboxes,
        }
    }
}
