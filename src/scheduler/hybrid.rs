use std::collections::HashMap;

use crate::event::Event;
use crate::job::JobHandle;
use crate::topology::Topology;

use super::{FilesHandle, MakespanScheduler, Scheduler};

/// Which policy statistic a hybrid scheduler uses to pick between its two
/// underlying makespan schedulers (0 = Swag, 1 = GeoDis) each round.
#[derive(Debug, Clone, Copy)]
pub enum HybridKind {
    /// Swag if the variance of tasks-per-job is below `ratio * mean`.
    Adaptive(f64),
    /// Same test, but over pooled task durations instead of task counts.
    Adaptive2(f64),
    /// Swag if `Σ job_availability(1) / Σ job_capacity(1) < ratio`.
    Ratio1(f64),
    /// Swag if `Σ job.cpus / Σ job_capacity(1) < ratio`.
    Ratio2(f64),
    /// Swag if `Σ job.cpus / Σ job_availability(1) < ratio`.
    Ratio3(f64),
}

/// Welford's online mean/sample-variance, matching the properly-squared
/// update (as opposed to an unsquared variant that appears in some source
/// revisions) and dividing by `count - 1`, not `count` — see `DESIGN.md`.
fn welford(values: &[f64]) -> (f64, f64) {
    let mut mean = 0.0;
    let mut m2 = 0.0;
    let mut count = 0usize;
    for &x in values {
        count += 1;
        let delta = x - mean;
        mean += delta / count as f64;
        let delta2 = x - mean;
        m2 += delta * delta2;
    }
    let variance = if count > 1 { m2 / (count - 1) as f64 } else { f64::NAN };
    (mean, variance)
}

fn topology_totals(topology: &Topology) -> (u64, u64) {
    topology.dc_handles().iter().fold((0, 0), |(capacity, availability), &h| {
        let dc = topology.dc(h);
        (capacity + dc.job_capacity(1) as u64, availability + dc.job_availability(1) as u64)
    })
}

/// Wraps a Swag and a GeoDis scheduler and picks between them each
/// scheduling round based on a configurable statistic over the pending
/// workload or the topology's current load.
pub struct HybridScheduler {
    kind: HybridKind,
    pending: Vec<JobHandle>,
    swag: MakespanScheduler,
    geodis: MakespanScheduler,
    results: HashMap<String, JobHandle>,
}

impl HybridScheduler {
    pub fn new(files: FilesHandle, kind: HybridKind) -> Self {
        Self {
            kind,
            pending: Vec::new(),
            swag: MakespanScheduler::new_swag(files.clone()),
            geodis: MakespanScheduler::new_geodis(files),
            results: HashMap::new(),
        }
    }

    /// Returns 0 (swag) or 1 (geodis).
    pub(crate) fn choose(&self, topology: &Topology) -> usize {
        match self.kind {
            HybridKind::Adaptive(ratio) => {
                if self.pending.len() < 2 {
                    return 1;
                }
                let values: Vec<f64> = self.pending.iter().map(|j| j.borrow().tasks.len() as f64).collect();
                let (mean, variance) = welford(&values);
                if variance < mean * ratio {
                    0
                } else {
                    1
                }
            }
            HybridKind::Adaptive2(ratio) => {
                if self.pending.len() < 2 {
                    return 1;
                }
                let values: Vec<f64> = self
                    .pending
                    .iter()
                    .flat_map(|j| j.borrow().tasks.iter().map(|t| t.duration as f64).collect::<Vec<_>>())
                    .collect();
                let (mean, variance) = welford(&values);
                if variance < mean * ratio {
                    0
                } else {
                    1
                }
            }
            HybridKind::Ratio1(ratio) => {
                let (total, available) = topology_totals(topology);
                if total == 0 {
                    return 1;
                }
                if (available as f64) / (total as f64) < ratio {
                    0
                } else {
                    1
                }
            }
            HybridKind::Ratio2(ratio) => {
                let (total, _) = topology_totals(topology);
                if total == 0 {
                    return 1;
                }
                let required: u64 = self.pending.iter().map(|j| j.borrow().cpus as u64).sum();
                if (required as f64) / (total as f64) < ratio {
                    0
                } else {
                    1
                }
            }
            HybridKind::Ratio3(ratio) => {
                let (_, available) = topology_totals(topology);
                if available == 0 {
                    return 1;
                }
                let required: u64 = self.pending.iter().map(|j| j.borrow().cpus as u64).sum();
                if (required as f64) / (available as f64) < ratio {
                    0
                } else {
                    1
                }
            }
        }
    }
}

impl Scheduler for HybridScheduler {
    fn add(&mut self, job: JobHandle) {
        self.pending.push(job);
    }

    fn schedule(&mut self, now: u64, topology: &mut Topology) -> Vec<Event> {
        let chosen = self.choose(topology);
        for job in self.pending.drain(..) {
            if chosen == 0 {
                self.swag.add(job);
            } else {
                self.geodis.add(job);
            }
        }
        let events = if chosen == 0 { self.swag.schedule(now, topology) } else { self.geodis.schedule(now, topology) };
        let sub = if chosen == 0 { &mut self.swag } else { &mut self.geodis };

        // Re-absorb anything the sub-scheduler did not finish so the next
        // round re-evaluates the swag/geodis choice against fresh state.
        self.pending.extend(sub.take_pending());
        for (id, job) in sub.results() {
            self.results.insert(id, job);
        }
        events
    }

    fn pending(&self) -> usize {
        self.pending.len() + self.swag.pending() + self.geodis.pending()
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
    use std::collections::HashMap as Map;

    fn topology() -> Topology {
        Topology::new(&[(1, 2)], &[vec![0]], &[DcMode::Strict]).unwrap()
    }

    #[test]
    fn test_hybrid_falls_back_to_geodis_with_fewer_than_two_jobs() {
        let mut topo = topology();
        let handles = topo.dc_handles();
        topo.seed_file_location("f1", handles[0]);
        let mut files = Map::new();
        files.insert("f1".to_string(), File::new("f1", 100, vec![handles[0]]).unwrap());
        let mut sched = HybridScheduler::new(FilesHandle::new(files), HybridKind::Adaptive(1.0));
        let job = Job::new("j1", 0, 1, vec![Task::new(5).unwrap()], "f1").unwrap().into_handle();
        sched.add(job);
        assert_eq!(sched.choose(&topo), 1);
        sched.schedule(0, &mut topo);
        assert_eq!(sched.results().len(), 1);
    }

    #[test]
    fn test_hybrid_ratio1_picks_swag_when_availability_is_ample() {
        let topo = topology();
        let files: Map<String, File> = Map::new();
        let sched = HybridScheduler::new(FilesHandle::new(files), HybridKind::Ratio1(0.5));
        // Fresh topology: availability/total = 1.0, never < 0.5.
        assert_eq!(sched.choose(&topo), 1);
    }
}
