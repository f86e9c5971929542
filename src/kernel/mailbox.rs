//! Bounded mailboxes
//!
//! A fixed table of mailboxes for fixed-size message passing. Each mailbox
//! is a circular buffer of messages plus a FIFO queue of processes blocked
//! on receive. Send is non-blocking: a waiting receiver gets the message
//! handed to it directly (the buffer is never touched on that path),
//! otherwise the message is buffered. A send into a full buffer has no
//! backpressure path and is a fatal fault.

use std::fmt;

use super::Fault;
use super::clock::Ticks;
use super::process::{PROC_MAX, Pid, ProcessState, ProcessTable, QueueTag};
use super::queue::BoundedQueue;
use super::sched::Scheduler;

/// Number of mailboxes
pub const MBOX_MAX: usize = 16;

/// Messages a single mailbox can buffer
pub const MBOX_CAPACITY: usize = 8;

/// Fixed payload size in bytes
pub const MSG_SIZE: usize = 64;

/// Mailbox identifier (index into the mailbox table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MboxId(pub usize);

impl fmt::Display for MboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mbox:{}", self.0)
    }
}

/// A message in flight
///
/// `time_sent` is stamped when the sender traps in; `time_received` when
/// the message reaches its receiver (immediately for a direct delivery,
/// later for a buffered one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub sender: Pid,
    pub time_sent: Ticks,
    pub time_received: Ticks,
    pub data: [u8; MSG_SIZE],
}

impl Message {
    /// Clamp arbitrary bytes into a fixed-size payload, zero-padded
    pub fn pack(bytes: &[u8]) -> [u8; MSG_SIZE] {
        let mut data = [0u8; MSG_SIZE];
        let n = bytes.len().min(MSG_SIZE);
        data[..n].copy_from_slice(&bytes[..n]);
        data
    }

    /// The payload up to the first trailing zero run
    pub fn text(&self) -> String {
        let end = self
            .data
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.data[..end]).into_owned()
    }
}

/// How a send was completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed straight to a blocked receiver
    Delivered(Pid),
    /// Stored in the mailbox buffer
    Buffered,
}

/// One bounded mailbox
#[derive(Debug)]
pub struct Mailbox {
    messages: BoundedQueue<Message>,
    wait_q: BoundedQueue<Pid>,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            messages: BoundedQueue::new(MBOX_CAPACITY),
            wait_q: BoundedQueue::new(PROC_MAX),
        }
    }

    pub fn depth(&self) -> usize {
        self.messages.len()
    }

    pub fn capacity(&self) -> usize {
        self.messages.capacity()
    }

    pub fn waiters(&self) -> usize {
        self.wait_q.len()
    }
}

/// The fixed table of mailboxes
#[derive(Debug)]
pub struct MailboxTable {
    boxes: Vec<Mailbox>,
}

impl MailboxTable {
    pub fn new() -> Self {
        Self {
            boxes: (0..MBOX_MAX).map(|_| Mailbox::new()).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (MboxId, &Mailbox)> {
        self.boxes.iter().enumerate().map(|(i, m)| (MboxId(i), m))
    }

    /// Non-blocking send by the active process.
    ///
    /// A waiting receiver takes the message directly into its delivery slot
    /// and rejoins the run queue; otherwise the message is buffered. A full
    /// buffer is fatal.
    pub fn send(
        &mut self,
        id: MboxId,
        payload: [u8; MSG_SIZE],
        procs: &mut ProcessTable,
        sched: &mut Scheduler,
        now: Ticks,
    ) -> Result<SendStatus, Fault> {
        let caller = sched.active().ok_or(Fault::NoActiveProcess)?;
        let mbox = self.boxes.get_mut(id.0).ok_or(Fault::InvalidMailbox(id))?;

        let mut message = Message {
            sender: caller,
            time_sent: now,
            time_received: Ticks::ZERO,
            data: payload,
        };

        if let Ok(receiver) = mbox.wait_q.dequeue() {
            message.time_received = now;
            {
                let proc = procs
                    .get_mut(receiver)
                    .ok_or(Fault::InvalidActivePid(receiver))?;
                proc.delivery = Some(message);
            }
            sched.admit(procs, receiver)?;
            return Ok(SendStatus::Delivered(receiver));
        }

        mbox.messages
            .enqueue(message)
            .map_err(|_| Fault::MailboxFull(id))?;
        Ok(SendStatus::Buffered)
    }

    /// Receive by the active process.
    ///
    /// Returns the oldest buffered message immediately, or parks the caller
    /// on the wait queue (returning `None`) until a sender delivers one.
    pub fn receive(
        &mut self,
        id: MboxId,
        procs: &mut ProcessTable,
        sched: &mut Scheduler,
        now: Ticks,
    ) -> Result<Option<Message>, Fault> {
        let caller = sched.active().ok_or(Fault::NoActiveProcess)?;
        let mbox = self.boxes.get_mut(id.0).ok_or(Fault::InvalidMailbox(id))?;

        if let Ok(mut message) = mbox.messages.dequeue() {
            message.time_received = now;
            return Ok(Some(message));
        }

        mbox.wait_q
            .enqueue(caller)
            .map_err(|_| Fault::QueueOverflow("mailbox wait queue"))?;
        let proc = procs
            .get_mut(caller)
            .ok_or(Fault::InvalidActivePid(caller))?;
        proc.state = ProcessState::Waiting;
        proc.queue = Some(QueueTag::MboxWait(id));
        sched.clear_active();
        Ok(None)
    }

    /// Drop `pid` from the wait queue of mailbox `id` (process exit)
    pub(crate) fn extract_waiter(&mut self, id: MboxId, pid: Pid) -> bool {
        match self.boxes.get_mut(id.0) {
            Some(mbox) => mbox.wait_q.remove(&pid),
            None => false,
        }
    }

    /// How many mailbox wait queues hold `pid`
    pub fn waiter_occupancy(&self, pid: Pid) -> usize {
        self.boxes
            .iter()
            .map(|m| m.wait_q.iter().filter(|&&p| p == pid).count())
            .sum()
    }
}

impl Default for MailboxTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::trace::Tracer;

    fn fixture(workers: usize) -> (MailboxTable, ProcessTable, Scheduler, Tracer) {
        let mut procs = ProcessTable::new();
        let mut sched = Scheduler::new();
        for _ in 0..=workers {
            let pid = procs.allocate().unwrap();
            procs.slot_mut(pid).state = ProcessState::Running;
            sched.admit(&mut procs, pid).unwrap();
        }
        (MailboxTable::new(), procs, sched, Tracer::new())
    }

    fn dispatch(procs: &mut ProcessTable, sched: &mut Scheduler, tracer: &mut Tracer) -> Pid {
        sched.schedule(procs, Ticks::ZERO, tracer).unwrap()
    }

    #[test]
    fn test_pack_clamps_and_pads() {
        let data = Message::pack(b"hi");
        assert_eq!(&data[..2], b"hi");
        assert!(data[2..].iter().all(|&b| b == 0));

        let long = vec![7u8; MSG_SIZE * 2];
        let data = Message::pack(&long);
        assert_eq!(data, [7u8; MSG_SIZE]);
    }

    #[test]
    fn test_buffered_round_trip() {
        let (mut boxes, mut procs, mut sched, mut tracer) = fixture(1);
        let sender = dispatch(&mut procs, &mut sched, &mut tracer);

        let payload = Message::pack(b"ping");
        let status = boxes
            .send(MboxId(0), payload, &mut procs, &mut sched, Ticks(5))
            .unwrap();
        assert_eq!(status, SendStatus::Buffered);

        let message = boxes
            .receive(MboxId(0), &mut procs, &mut sched, Ticks(9))
            .unwrap()
            .expect("message should be buffered");
        assert_eq!(message.data, payload);
        assert_eq!(message.sender, sender);
        assert_eq!(message.time_sent, Ticks(5));
        assert_eq!(message.time_received, Ticks(9));
        assert!(message.time_sent <= message.time_received);
        assert_eq!(message.text(), "ping");
    }

    #[test]
    fn test_fifo_across_buffer() {
        let (mut boxes, mut procs, mut sched, mut tracer) = fixture(1);
        dispatch(&mut procs, &mut sched, &mut tracer);

        for i in 0..3u8 {
            boxes
                .send(MboxId(2), Message::pack(&[i]), &mut procs, &mut sched, Ticks(i as u64))
                .unwrap();
        }
        for i in 0..3u8 {
            let message = boxes
                .receive(MboxId(2), &mut procs, &mut sched, Ticks(10))
                .unwrap()
                .unwrap();
            assert_eq!(message.data[0], i);
        }
    }

    #[test]
    fn test_capacity_limit_is_fatal() {
        let (mut boxes, mut procs, mut sched, mut tracer) = fixture(1);
        dispatch(&mut procs, &mut sched, &mut tracer);

        for i in 0..MBOX_CAPACITY {
            boxes
                .send(MboxId(0), Message::pack(&[i as u8]), &mut procs, &mut sched, Ticks::ZERO)
                .unwrap();
        }
        let result = boxes.send(
            MboxId(0),
            Message::pack(b"overflow"),
            &mut procs,
            &mut sched,
            Ticks::ZERO,
        );
        assert_eq!(result, Err(Fault::MailboxFull(MboxId(0))));
        // the buffer itself is unchanged
        assert_eq!(boxes.iter().next().unwrap().1.depth(), MBOX_CAPACITY);
    }

    #[test]
    fn test_empty_receive_blocks() {
        let (mut boxes, mut procs, mut sched, mut tracer) = fixture(1);
        let receiver = dispatch(&mut procs, &mut sched, &mut tracer);

        let result = boxes
            .receive(MboxId(1), &mut procs, &mut sched, Ticks::ZERO)
            .unwrap();
        assert!(result.is_none());
        assert_eq!(procs.get(receiver).unwrap().state, ProcessState::Waiting);
        assert_eq!(
            procs.get(receiver).unwrap().queue,
            Some(QueueTag::MboxWait(MboxId(1)))
        );
        assert_eq!(sched.active(), None);
    }

    #[test]
    fn test_direct_delivery_bypasses_buffer() {
        let (mut boxes, mut procs, mut sched, mut tracer) = fixture(2);

        // first worker blocks on receive
        let receiver = dispatch(&mut procs, &mut sched, &mut tracer);
        boxes
            .receive(MboxId(0), &mut procs, &mut sched, Ticks(1))
            .unwrap();

        // second worker sends; the message goes straight to the waiter
        let sender = dispatch(&mut procs, &mut sched, &mut tracer);
        assert_ne!(sender, receiver);
        let status = boxes
            .send(MboxId(0), Message::pack(b"direct"), &mut procs, &mut sched, Ticks(4))
            .unwrap();
        assert_eq!(status, SendStatus::Delivered(receiver));
        assert_eq!(boxes.iter().next().unwrap().1.depth(), 0);

        let proc = procs.get(receiver).unwrap();
        assert_eq!(proc.state, ProcessState::Running);
        let delivered = proc.delivery.as_ref().unwrap();
        assert_eq!(delivered.text(), "direct");
        assert_eq!(delivered.sender, sender);
        assert_eq!(delivered.time_received, Ticks(4));
    }

    #[test]
    fn test_waiters_served_in_arrival_order() {
        let (mut boxes, mut procs, mut sched, mut tracer) = fixture(3);

        let first = dispatch(&mut procs, &mut sched, &mut tracer);
        boxes
            .receive(MboxId(0), &mut procs, &mut sched, Ticks::ZERO)
            .unwrap();
        let second = dispatch(&mut procs, &mut sched, &mut tracer);
        boxes
            .receive(MboxId(0), &mut procs, &mut sched, Ticks::ZERO)
            .unwrap();

        let sender = dispatch(&mut procs, &mut sched, &mut tracer);
        assert_ne!(sender, first);
        assert_ne!(sender, second);

        let status = boxes
            .send(MboxId(0), Message::pack(b"a"), &mut procs, &mut sched, Ticks(1))
            .unwrap();
        assert_eq!(status, SendStatus::Delivered(first));
        let status = boxes
            .send(MboxId(0), Message::pack(b"b"), &mut procs, &mut sched, Ticks(2))
            .unwrap();
        assert_eq!(status, SendStatus::Delivered(second));
    }

    #[test]
    fn test_out_of_range_mailbox_is_fatal() {
        let (mut boxes, mut procs, mut sched, mut tracer) = fixture(1);
        dispatch(&mut procs, &mut sched, &mut tracer);

        let bad = MboxId(MBOX_MAX);
        let result = boxes.send(bad, Message::pack(b"x"), &mut procs, &mut sched, Ticks::ZERO);
        assert_eq!(result, Err(Fault::InvalidMailbox(bad)));
    }
}
