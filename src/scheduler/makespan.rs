use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::event::{Event, PlacedTask};
use crate::file::SourcePolicy;
use crate::job::{JobHandle, Task};
use crate::topology::{DcHandle, HostOutcome, Topology};

use super::{best_dcs, BestDcsFilter, FilesHandle, Scheduler, TransferCenter};

/// A lightweight per-round stand-in for a real DataCenter, used only to
/// project where a job's tasks would land without mutating live state.
struct ShadowDc {
    dc: DcHandle,
    transfer_time: u64,
    free: u32,
    endings: BinaryHeap<Reverse<u64>>,
}

impl ShadowDc {
    fn from_candidate(topology: &Topology, tc: &TransferCenter, now: u64) -> Self {
        let busy = tc.capacity.saturating_sub(tc.free_slots) as usize;
        let mut endings = topology.dc(tc.dc).expected_endings();
        endings.sort_unstable();
        if endings.len() > busy {
            let excess = endings.len() - busy;
            endings.drain(0..excess);
        } else if endings.len() < busy {
            let earliest = endings.first().copied().unwrap_or(now);
            endings.splice(0..0, std::iter::repeat(earliest).take(busy - endings.len()));
        }
        Self {
            dc: tc.dc,
            transfer_time: tc.transfer_time,
            free: tc.free_slots,
            endings: endings.into_iter().map(Reverse).collect(),
        }
    }

    /// The earliest time this shadow DC could next begin a task, plus the
    /// time to get the file there; `u64::MAX` if it is already fully
    /// committed and has nothing left to reuse.
    fn key(&self, now: u64) -> u64 {
        let base = if self.free > 0 {
            now
        } else if let Some(Reverse(t)) = self.endings.peek() {
            *t
        } else {
            return u64::MAX;
        };
        base.saturating_add(self.transfer_time)
    }
}

/// Projects, without touching live Topology state, where each of `tasks`
/// (already sorted ascending by duration) would land and the resulting
/// makespan. Tasks are walked largest-first (shortest last), matching the
/// order real placement later uses. Returns the job's estimated makespan
/// and, per task index, the chosen destination and its transfer time (or
/// `None` if no candidate shadow DC could accept it).
fn estimate_makespan(
    topology: &Topology,
    candidates: &[TransferCenter],
    tasks: &[Task],
    now: u64,
) -> (u64, Vec<Option<(DcHandle, u64)>>) {
    let mut shadows: Vec<ShadowDc> = candidates.iter().map(|tc| ShadowDc::from_candidate(topology, tc, now)).collect();
    let mut destinations = vec![None; tasks.len()];
    let mut makespan = 0u64;

    for idx in (0..tasks.len()).rev() {
        let mut best: Option<(usize, u64)> = None;
        for (i, shadow) in shadows.iter().enumerate() {
            let key = shadow.key(now);
            if best.map(|(_, best_key)| key < best_key).unwrap_or(true) {
                best = Some((i, key));
            }
        }
        let Some((i, key)) = best else { continue };
        if key == u64::MAX {
            continue;
        }
        let shadow = &mut shadows[i];
        let end = if shadow.free > 0 {
            shadow.free -= 1;
            let end = now + shadow.transfer_time + tasks[idx].duration;
            shadow.endings.push(Reverse(end));
            end
        } else {
            let Reverse(t0) = shadow.endings.pop().expect("key != MAX implies endings non-empty here");
            let end = t0 + shadow.transfer_time + tasks[idx].duration;
            shadow.endings.push(Reverse(end));
            end
        };
        destinations[idx] = Some((shadow.dc, shadow.transfer_time));
        makespan = makespan.max(end);
    }
    (makespan, destinations)
}

/// A makespan-driven scheduler; Swag and GeoDis differ only in the
/// `best_dcs` filter used to build each job's candidate set.
pub struct MakespanScheduler {
    files: FilesHandle,
    filter: BestDcsFilter,
    source_policy: SourcePolicy,
    name: &'static str,
    pending: Vec<JobHandle>,
    results: HashMap<String, JobHandle>,
}

impl MakespanScheduler {
    fn new(files: FilesHandle, filter: BestDcsFilter, name: &'static str) -> Self {
        Self {
            files,
            filter,
            source_policy: SourcePolicy::default(),
            name,
            pending: Vec::new(),
            results: HashMap::new(),
        }
    }

    /// Swag: data-local-only makespan scheduler. Only DCs already holding
    /// the job's file are candidates.
    pub fn new_swag(files: FilesHandle) -> Self {
        Self::new(files, BestDcsFilter::PresentOnly, "swag")
    }

    /// GeoDis: any-DC-with-transfer makespan scheduler.
    pub fn new_geodis(files: FilesHandle) -> Self {
        Self::new(files, BestDcsFilter::Full, "geodis")
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Drains and returns any jobs still in this scheduler's pending
    /// buffer (normally empty right after `schedule`, since every pending
    /// job is committed or rejected within a single round).
    pub fn take_pending(&mut self) -> Vec<JobHandle> {
        std::mem::take(&mut self.pending)
    }
}

impl Scheduler for MakespanScheduler {
    fn add(&mut self, job: JobHandle) {
        job.borrow_mut().sort_tasks_ascending();
        self.pending.push(job);
    }

    fn schedule(&mut self, now: u64, topology: &mut Topology) -> Vec<Event> {
        let mut events = Vec::new();

        let mut plans: Vec<(JobHandle, u64, Vec<Option<(DcHandle, u64)>>)> = Vec::new();
        for job in self.pending.drain(..) {
            let (file_id, cost, job_id) = {
                let j = job.borrow();
                (j.file_id.clone(), j.cpus, j.id.clone())
            };
            let Some(file) = self.files.get(&file_id) else {
                log::warn!("job {} rejected by {}: unknown file {}", job_id, self.name, file_id);
                continue;
            };
            let candidates = best_dcs(topology, file, cost, self.filter);
            if candidates.is_empty() {
                log::warn!("job {} rejected by {}: no data center has capacity for cost {}", job_id, self.name, cost);
                continue;
            }
            let tasks = job.borrow().tasks.clone();
            let (makespan, destinations) = estimate_makespan(topology, &candidates, &tasks, now);
            plans.push((job, makespan, destinations));
        }

        plans.sort_by_key(|(_, makespan, _)| *makespan);

        for (job, _makespan, destinations) in plans {
            let (file_id, cost) = {
                let j = job.borrow();
                (j.file_id.clone(), j.cpus)
            };
            let Some(file) = self.files.get(&file_id) else { continue };
            let task_count = job.borrow().tasks.len();
            let mut placed_indices = Vec::new();
            for idx in (0..task_count).rev() {
                let Some((dc, transfer_time)) = destinations[idx] else { continue };
                let duration = job.borrow().tasks[idx].duration;
                let start = now + transfer_time;
                match topology.host(dc, job.clone(), cost, duration, start) {
                    HostOutcome::Placed { node_idx, end, was_empty } => {
                        events.push(Event::TaskEnd {
                            time: end,
                            job: job.clone(),
                            placed: PlacedTask { start, duration, location: topology.label(dc) },
                        });
                        if was_empty {
                            events.push(Event::NodeDrain { time: end, dc, node_idx });
                        }
                        if transfer_time > 0 {
                            if let Ok(arrival) = topology.begin_transfer(file, dc, now, self.source_policy) {
                                events.push(Event::HostFile { time: arrival, file_id: file.id.clone(), dc });
                            }
                        }
                        placed_indices.push(idx);
                    }
                    HostOutcome::Admitted => placed_indices.push(idx),
                    HostOutcome::Refused => {}
                }
            }
            placed_indices.sort_unstable_by(|a, b| b.cmp(a));
            {
                let mut j = job.borrow_mut();
                for idx in placed_indices {
                    j.tasks.remove(idx);
                }
            }
            let id = job.borrow().id.clone();
            self.results.insert(id, job);
        }

        events
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }

    fn results(&mut self) -> HashMap<String, JobHandle> {
        std::mem::take(&mut self.results)
    }
}
