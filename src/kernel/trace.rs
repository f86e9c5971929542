//! Kernel instrumentation
//!
//! Lightweight event tracing for debugging and for the fault diagnostics
//! the kernel emits before halting. Events land in a bounded ring buffer
//! (old events fall off the front) with per-category counters kept across
//! the whole run.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use super::clock::Ticks;
use super::process::Pid;

/// Maximum number of events kept in the ring buffer
const TRACE_BUFFER_SIZE: usize = 256;

/// Trace event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceCategory {
    /// Process lifecycle (spawn, exit)
    Process,
    /// Scheduling decisions
    Sched,
    /// Syscall entry
    Syscall,
    /// Semaphore operations
    Semaphore,
    /// Mailbox operations
    Mailbox,
    /// Timer-driven events (sleep, wake)
    Timer,
    /// Fatal diagnostics
    Fault,
}

impl fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceCategory::Process => write!(f, "PROC"),
            TraceCategory::Sched => write!(f, "SCHED"),
            TraceCategory::Syscall => write!(f, "SYSCALL"),
            TraceCategory::Semaphore => write!(f, "SEM"),
            TraceCategory::Mailbox => write!(f, "MBOX"),
            TraceCategory::Timer => write!(f, "TIMER"),
            TraceCategory::Fault => write!(f, "FAULT"),
        }
    }
}

/// A single trace event
#[derive(Debug, Clone)]
pub struct TraceEvent {
    /// Kernel time when the event was recorded
    pub timestamp: Ticks,
    pub category: TraceCategory,
    /// Event name (e.g. "dispatch", "spawn")
    pub name: String,
    pub detail: Option<String>,
    /// Associated process, if any
    pub pid: Option<Pid>,
}

impl TraceEvent {
    pub fn instant(timestamp: Ticks, category: TraceCategory, name: impl Into<String>) -> Self {
        Self {
            timestamp,
            category,
            name: name.into(),
            detail: None,
            pid: None,
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>6}] {:<7} {}", self.timestamp, self.category, self.name)?;
        if let Some(pid) = self.pid {
            write!(f, " {pid}")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// Per-category counts for the whole run
#[derive(Debug, Clone)]
pub struct TraceSummary {
    pub total: u64,
    pub by_category: Vec<(TraceCategory, u64)>,
}

/// Bounded event recorder
pub struct Tracer {
    events: VecDeque<TraceEvent>,
    counts: HashMap<TraceCategory, u64>,
    enabled: bool,
}

impl Tracer {
    pub fn new() -> Self {
        Self {
            events: VecDeque::with_capacity(TRACE_BUFFER_SIZE),
            counts: HashMap::new(),
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&mut self, event: TraceEvent) {
        if !self.enabled {
            return;
        }
        *self.counts.entry(event.category).or_insert(0) += 1;
        if self.events.len() == TRACE_BUFFER_SIZE {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Events still in the buffer, oldest first
    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }

    /// The `n` most recent events, oldest first
    pub fn recent(&self, n: usize) -> Vec<&TraceEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).collect()
    }

    /// All-time count for one category
    pub fn count(&self, category: TraceCategory) -> u64 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> TraceSummary {
        let mut by_category: Vec<(TraceCategory, u64)> =
            self.counts.iter().map(|(&c, &n)| (c, n)).collect();
        by_category.sort_by(|a, b| b.1.cmp(&a.1));
        TraceSummary {
            total: by_category.iter().map(|(_, n)| n).sum(),
            by_category,
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.counts.clear();
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}
