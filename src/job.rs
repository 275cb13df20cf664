use std::cell::RefCell;
use std::rc::Rc;

/// A unit of work within a [`Job`]. Tasks carry no identity of their own;
/// they are addressed by position within the owning job's task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub duration: u64,
}

impl Task {
    pub fn new(duration: u64) -> anyhow::Result<Self> {
        anyhow::ensure!(duration > 0, "task duration must be > 0, found {}", duration);
        Ok(Self { duration })
    }
}

/// A task that has been placed on a data center, recorded for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub start: u64,
    pub duration: u64,
    pub location: String,
}

impl ScheduledTask {
    pub fn end(&self) -> u64 {
        self.start + self.duration
    }
}

/// A job submitted to the simulation: an ordered list of tasks sharing a
/// single input file and a uniform per-task CPU cost.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub submission: u64,
    pub cpus: u32,
    pub tasks: Vec<Task>,
    pub file_id: String,
    pub scheduled: Vec<ScheduledTask>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        submission: u64,
        cpus: u32,
        tasks: Vec<Task>,
        file_id: impl Into<String>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(cpus >= 1, "job cpu cost must be >= 1, found {}", cpus);
        anyhow::ensure!(!tasks.is_empty(), "job must have at least one task");
        Ok(Self {
            id: id.into(),
            submission,
            cpus,
            tasks,
            file_id: file_id.into(),
            scheduled: Vec::new(),
        })
    }

    /// Total remaining processing time, i.e. the sum of the durations of
    /// tasks not yet placed. Used as the SRPT ordering key.
    pub fn remaining_processing_time(&self) -> u64 {
        self.tasks.iter().map(|t| t.duration).sum()
    }

    /// Sorts tasks ascending by duration; placement always pops from the
    /// back, so the last element is the shortest remaining task.
    pub fn sort_tasks_ascending(&mut self) {
        self.tasks.sort_by_key(|t| t.duration);
    }

    pub fn into_handle(self) -> JobHandle {
        Rc::new(RefCell::new(self))
    }
}

/// Shared, mutable handle to a job. A job is reachable simultaneously from a
/// scheduler's pending structure, its results map, and any in-flight
/// `TaskEnd` events that reference it; `Rc<RefCell<_>>` is the idiomatic
/// single-threaded stand-in for that aliasing.
pub type JobHandle = Rc<RefCell<Job>>;
