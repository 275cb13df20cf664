use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::job::JobHandle;
use crate::topology::DcHandle;

/// One placed task, recorded for the job's event-queue bookkeeping and for
/// the final results printer.
#[derive(Debug, Clone)]
pub struct PlacedTask {
    pub start: u64,
    pub duration: u64,
    pub location: String,
}

/// The sealed set of events the driver understands. Each carries its own
/// fixed timestamp, set once at construction.
pub enum Event {
    /// A job becomes visible to the scheduler at `job.submission`.
    JobArrival { time: u64, job: JobHandle },
    /// Periodic trigger that asks the active scheduler to place pending
    /// work, then re-schedules itself.
    WindowScheduling { time: u64, window: u64 },
    /// A placed task finishes running; appends a `ScheduledTask` to the
    /// job's record.
    TaskEnd { time: u64, job: JobHandle, placed: PlacedTask },
    /// A node's earliest running task completes: frees capacity and drains
    /// any FIFO wait-queue.
    NodeDrain { time: u64, dc: DcHandle, node_idx: usize },
    /// A file transfer completes and the file becomes present at `dc`.
    HostFile { time: u64, file_id: String, dc: DcHandle },
}

impl Event {
    pub fn time(&self) -> u64 {
        match self {
            Event::JobArrival { time, .. } => *time,
            Event::WindowScheduling { time, .. } => *time,
            Event::TaskEnd { time, .. } => *time,
            Event::NodeDrain { time, .. } => *time,
            Event::HostFile { time, .. } => *time,
        }
    }
}

struct Entry {
    event: Event,
    seq: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.event.time() == other.event.time() && self.seq == other.seq
    }
}
impl Eq for Entry {}

// Reversed so the BinaryHeap (a max-heap) pops the smallest time first, with
// insertion order as a FIFO tie-break — required for deterministic replays.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .event
            .time()
            .cmp(&self.event.time())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of events ordered by time, FIFO among equal times.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { event, seq });
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|entry| entry.event)
    }

    pub fn peek_time(&self) -> Option<u64> {
        self.heap.peek().map(|entry| entry.event.time())
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
