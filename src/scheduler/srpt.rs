use std::collections::HashMap;

use crate::event::{Event, PlacedTask};
use crate::job::JobHandle;
use crate::topology::Topology;

use super::{best_dcs, BestDcsFilter, FilesHandle, Scheduler};

/// Shortest-remaining-processing-time scheduler: at every round, picks the
/// pending job with the least total unplaced task duration and tries to
/// place every one of its tasks before considering the next job.
pub struct SrptScheduler {
    files: FilesHandle,
    pending: Vec<JobHandle>,
    results: HashMap<String, JobHandle>,
}

impl SrptScheduler {
    pub fn new(files: FilesHandle) -> Self {
        Self { files, pending: Vec::new(), results: HashMap::new() }
    }

    /// Index of the pending job with the smallest remaining processing
    /// time; ties broken by earliest insertion (position in `pending`).
    fn min_index(&self) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .min_by_key(|(idx, job)| (job.borrow().remaining_processing_time(), *idx))
            .map(|(idx, _)| idx)
    }
}

impl Scheduler for SrptScheduler {
    fn add(&mut self, job: JobHandle) {
        job.borrow_mut().sort_tasks_ascending();
        let id = job.borrow().id.clone();
        self.results.insert(id, job.clone());
        self.pending.push(job);
    }

    fn schedule(&mut self, now: u64, topology: &mut Topology) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let Some(idx) = self.min_index() else { break };
            let job = self.pending[idx].clone();
            let (file_id, cost, job_id) = {
                let j = job.borrow();
                (j.file_id.clone(), j.cpus, j.id.clone())
            };
            let Some(file) = self.files.get(&file_id) else {
                log::warn!("job {} rejected: unknown file {}", job_id, file_id);
                self.pending.remove(idx);
                continue;
            };
            let candidates = best_dcs(topology, file, cost, BestDcsFilter::Full);
            if candidates.is_empty() {
                log::warn!("job {} rejected: no data center has capacity for cost {}", job_id, cost);
                self.pending.remove(idx);
                continue;
            }

            let mut placed_all = true;
            loop {
                let task = { job.borrow().tasks.last().copied() };
                let Some(task) = task else { break };
                let mut placed_this = false;
                for tc in &candidates {
                    let start = now + tc.transfer_time;
                    match topology.host(tc.dc, job.clone(), cost, task.duration, start) {
                        crate::topology::HostOutcome::Placed { node_idx, end, was_empty } => {
                            events.push(Event::TaskEnd {
                                time: end,
                                job: job.clone(),
                                placed: PlacedTask { start, duration: task.duration, location: topology.label(tc.dc) },
                            });
                            if was_empty {
                                events.push(Event::NodeDrain { time: end, dc: tc.dc, node_idx });
                            }
                            if tc.transfer_time > 0 {
                                if let Ok(arrival) = topology.begin_transfer(file, tc.dc, now, Default::default()) {
                                    events.push(Event::HostFile { time: arrival, file_id: file.id.clone(), dc: tc.dc });
                                }
                            }
                            job.borrow_mut().tasks.pop();
                            placed_this = true;
                            break;
                        }
                        crate::topology::HostOutcome::Admitted => {
                            job.borrow_mut().tasks.pop();
                            placed_this = true;
                            break;
                        }
                        crate::topology::HostOutcome::Refused => continue,
                    }
                }
                if !placed_this {
                    placed_all = false;
                    break;
                }
            }

            if placed_all {
                let job = self.pending.remove(idx);
                let id = job.borrow().id.clone();
                self.results.insert(id, job);
            } else {
                break;
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::File;
    use crate::job::{Job, Task};
    use crate::topology::DcMode;

    fn topology() -> Topology {
        Topology::new(
            &[(1, 1), (1, 1)],
            &[vec![0, 10], vec![10, 0]],
            &[DcMode::Strict, DcMode::Strict],
        )
        .unwrap()
    }

    #[test]
    fn test_srpt_prefers_shorter_job_first() {
        let mut topo = topology();
        let handles = topo.dc_handles();
        topo.seed_file_location("f1", handles[0]);
        topo.seed_file_location("f2", handles[1]);
        let mut files = HashMap::new();
        files.insert("f1".to_string(), File::new("f1", 100, vec![handles[0]]).unwrap());
        files.insert("f2".to_string(), File::new("f2", 200, vec![handles[1]]).unwrap());
        let mut sched = SrptScheduler::new(FilesHandle::new(files));

        let long_job = Job::new("long", 0, 1, vec![Task::new(100).unwrap()], "f1").unwrap().into_handle();
        let short_job = Job::new("short", 0, 1, vec![Task::new(20).unwrap()], "f2").unwrap().into_handle();
        sched.add(long_job);
        sched.add(short_job);

        let events = sched.schedule(0, &mut topo);
        // Both jobs fit (one node each); the shorter job is resolved first
        // but both should be fully placed since each DC has one free node.
        assert_eq!(sched.pending(), 0);
        assert_eq!(events.iter().filter(|e| matches!(e, Event::TaskEnd { .. })).count(), 2);
    }

    #[test]
    fn test_srpt_leaves_blocked_job_pending() {
        let mut topo = Topology::new(&[(1, 1)], &[vec![0]], &[DcMode::Strict]).unwrap();
        let handles = topo.dc_handles();
        topo.seed_file_location("f1", handles[0]);
        let mut files = HashMap::new();
        files.insert("f1".to_string(), File::new("f1", 100, vec![handles[0]]).unwrap());
        let mut sched = SrptScheduler::new(FilesHandle::new(files));

        let job_a = Job::new("a", 0, 1, vec![Task::new(10).unwrap()], "f1").unwrap().into_handle();
        let job_b = Job::new("b", 0, 1, vec![Task::new(5).unwrap()], "f1").unwrap().into_handle();
        sched.add(job_a);
        sched.add(job_b);

        sched.schedule(0, &mut topo);
        // Only one node exists; one job places, the other stays pending.
        assert_eq!(sched.pending(), 1);
    }
}
