use std::collections::HashMap;

use crate::event::{Event, EventQueue, PlacedTask};
use crate::job::{Job, JobHandle, ScheduledTask};
use crate::scheduler::Scheduler;
use crate::topology::Topology;

/// Owns the Topology, the active scheduler, and the event queue, and runs
/// the discrete-event loop to completion.
pub struct Simulation {
    topology: Topology,
    scheduler: Box<dyn Scheduler>,
    queue: EventQueue,
    window: u64,
}

impl Simulation {
    pub fn new(topology: Topology, scheduler: Box<dyn Scheduler>, jobs: Vec<Job>, window: u64) -> anyhow::Result<Self> {
        anyhow::ensure!(window > 0, "window must be > 0, found {}", window);
        let mut queue = EventQueue::new();
        let mut min_submission = None;
        for job in jobs {
            let submission = job.submission;
            min_submission = Some(min_submission.map_or(submission, |m: u64| m.min(submission)));
            queue.push(Event::JobArrival { time: submission, job: job.into_handle() });
        }
        if let Some(min_submission) = min_submission {
            queue.push(Event::WindowScheduling { time: min_submission + 1, window });
        }
        Ok(Self { topology, scheduler, queue, window })
    }

    /// Runs the event loop to completion and returns every job the
    /// scheduler ever accepted, keyed by id.
    pub fn run(&mut self) -> HashMap<String, JobHandle> {
        while let Some(event) = self.queue.pop() {
            self.process(event);
        }
        self.scheduler.results()
    }

    fn process(&mut self, event: Event) {
        match event {
            Event::JobArrival { job, .. } => {
                self.scheduler.add(job);
            }
            Event::WindowScheduling { time, window } => {
                let produced = self.scheduler.schedule(time, &mut self.topology);
                for e in produced {
                    self.queue.push(e);
                }
                if !self.queue.is_empty() || self.scheduler.pending() > 0 {
                    let mut when = time + window;
                    if let Some(next_time) = self.queue.peek_time() {
                        if when <= next_time {
                            when = next_time - next_time % window + window;
                        }
                    }
                    self.queue.push(Event::WindowScheduling { time: when, window });
                }
            }
            Event::TaskEnd { job, placed, .. } => {
                job.borrow_mut().scheduled.push(ScheduledTask {
                    start: placed.start,
                    duration: placed.duration,
                    location: placed.location,
                });
            }
            Event::NodeDrain { dc, node_idx, time } => {
                let outcome = self.topology.process_node_drain(dc, node_idx, time);
                let label = self.topology.label(dc);
                for (placed_idx, job, duration, end, was_empty) in outcome.placed {
                    // FIFO-queued tasks don't carry a transfer-adjusted
                    // start; they're assumed ready once capacity frees.
                    self.queue.push(Event::TaskEnd {
                        time: end,
                        job,
                        placed: PlacedTask { start: end - duration, duration, location: label.clone() },
                    });
                    if was_empty {
                        self.queue.push(Event::NodeDrain { time: end, dc, node_idx: placed_idx });
                    }
                }
                if let Some(next) = outcome.next_wake {
                    self.queue.push(Event::NodeDrain { time: next, dc, node_idx });
                }
            }
            Event::HostFile { file_id, dc, .. } => {
                self.topology.complete_transfer(&file_id, dc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::File;
    use crate::job::Task;
    use crate::scheduler::{FilesHandle, HybridKind, HybridScheduler, MakespanScheduler, SrptScheduler};
    use crate::topology::DcMode;

    fn two_dc_topology() -> Topology {
        Topology::new(
            &[(1, 1), (1, 1)],
            &[vec![0, 10], vec![10, 0]],
            &[DcMode::Strict, DcMode::Strict],
        )
        .unwrap()
    }

    #[test]
    fn test_s1_srpt_two_dcs() {
        let mut topo = two_dc_topology();
        let handles = topo.dc_handles();
        topo.seed_file_location("f1", handles[0]);
        topo.seed_file_location("f2", handles[1]);
        let mut files = HashMap::new();
        files.insert("f1".to_string(), File::new("f1", 100, vec![handles[0]]).unwrap());
        files.insert("f2".to_string(), File::new("f2", 200, vec![handles[1]]).unwrap());
        let files = FilesHandle::new(files);

        let mut sched = SrptScheduler::new(files);
        let j1 = Job::new("j1", 0, 1, vec![Task::new(100).unwrap()], "f1").unwrap().into_handle();
        let j2 = Job::new("j2", 0, 1, vec![Task::new(20).unwrap()], "f2").unwrap().into_handle();
        sched.add(j1);
        sched.add(j2);

        let events = sched.schedule(0, &mut topo);
        assert_eq!(sched.pending(), 0);
        let ends: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                Event::TaskEnd { time, .. } => Some(*time),
                _ => None,
            })
            .collect();
        assert!(ends.contains(&20));
        assert!(ends.contains(&100));
    }

    #[test]
    fn test_s2_srpt_heap_order_leaves_one_job_pending() {
        let mut topo = two_dc_topology();
        let handles = topo.dc_handles();
        topo.seed_file_location("f1", handles[0]);
        topo.seed_file_location("f2", handles[1]);
        let mut files = HashMap::new();
        files.insert("f1".to_string(), File::new("f1", 100, vec![handles[0]]).unwrap());
        files.insert("f2".to_string(), File::new("f2", 200, vec![handles[1]]).unwrap());
        let files = FilesHandle::new(files);

        let mut sched = SrptScheduler::new(files);
        let j1 = Job::new("j1", 0, 1, vec![Task::new(30).unwrap()], "f1").unwrap().into_handle();
        let j2 = Job::new("j2", 0, 1, vec![Task::new(20).unwrap(), Task::new(20).unwrap()], "f2")
            .unwrap()
            .into_handle();
        sched.add(j1);
        sched.add(j2);

        let events = sched.schedule(0, &mut topo);
        assert_eq!(sched.pending(), 1);
        let ends: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                Event::TaskEnd { time, .. } => Some(*time),
                _ => None,
            })
            .collect();
        assert!(ends.contains(&30));
        assert!(ends.contains(&20));
    }

    #[test]
    fn test_s3_geodis_makespan_race_with_transfer() {
        let mut topo = two_dc_topology();
        let handles = topo.dc_handles();
        topo.seed_file_location("f1", handles[0]);
        topo.seed_file_location("f2", handles[1]);
        let mut files = HashMap::new();
        files.insert("f1".to_string(), File::new("f1", 20, vec![handles[0]]).unwrap());
        files.insert("f2".to_string(), File::new("f2", 10, vec![handles[1]]).unwrap());
        let files = FilesHandle::new(files);

        let mut sched = MakespanScheduler::new_geodis(files);
        let j1 = Job::new("j1", 0, 1, vec![Task::new(35).unwrap()], "f1").unwrap().into_handle();
        let j2 = Job::new("j2", 0, 1, vec![Task::new(20).unwrap(), Task::new(20).unwrap()], "f2")
            .unwrap()
            .into_handle();
        sched.add(j1);
        sched.add(j2);

        let events = sched.schedule(0, &mut topo);
        let ends: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                Event::TaskEnd { time, .. } => Some(*time),
                _ => None,
            })
            .collect();
        assert!(ends.contains(&20));
        assert!(ends.contains(&21));
        assert!(!ends.contains(&35), "j1 should have been refused this round");
        let results = sched.results();
        let j2 = results.get("j2").unwrap().borrow();
        assert!(j2.tasks.is_empty());
        assert_eq!(j2.scheduled.len(), 2);
        // j1 lost the capacity race against j2's lower-makespan plan; it is
        // still recorded with its task left unplaced (matching source
        // behavior of never re-queuing a partially-committed job).
        let j1 = results.get("j1").unwrap().borrow();
        assert_eq!(j1.tasks.len(), 1);
        assert!(j1.scheduled.is_empty());
    }

    #[test]
    fn test_s4_swag_file_local_only_defers_second_task() {
        let mut topo = two_dc_topology();
        let handles = topo.dc_handles();
        topo.seed_file_location("f1", handles[0]);
        topo.seed_file_location("f2", handles[1]);
        let mut files = HashMap::new();
        files.insert("f1".to_string(), File::new("f1", 20, vec![handles[0]]).unwrap());
        files.insert("f2".to_string(), File::new("f2", 200, vec![handles[1]]).unwrap());
        let files = FilesHandle::new(files);

        let mut sched = MakespanScheduler::new_swag(files);
        let j1 = Job::new("j1", 0, 1, vec![Task::new(35).unwrap()], "f1").unwrap().into_handle();
        let j2 = Job::new("j2", 0, 1, vec![Task::new(20).unwrap(), Task::new(20).unwrap()], "f2")
            .unwrap()
            .into_handle();
        sched.add(j1.clone());
        sched.add(j2.clone());

        sched.schedule(0, &mut topo);
        let results = sched.results();
        assert_eq!(results.get("j1").unwrap().borrow().scheduled.len(), 1);
        assert_eq!(results.get("j2").unwrap().borrow().scheduled.len(), 1);
        assert_eq!(results.get("j2").unwrap().borrow().tasks.len(), 1, "second task deferred");
    }

    #[test]
    fn test_s5_adaptive_picks_swag_on_zero_variance() {
        let files = FilesHandle::new(HashMap::new());
        let mut sched = HybridScheduler::new(files, HybridKind::Adaptive(0.01));
        let j1 = Job::new("j1", 0, 1, vec![Task::new(10).unwrap()], "f1").unwrap().into_handle();
        let j2 = Job::new("j2", 0, 1, vec![Task::new(10).unwrap()], "f1").unwrap().into_handle();
        sched.add(j1);
        sched.add(j2);
        let topo = two_dc_topology();
        assert_eq!(sched.choose(&topo), 0);
    }

    #[test]
    fn test_s6_hybrid_reflushes_unplaced_jobs() {
        let mut topo = Topology::new(&[(1, 1)], &[vec![0]], &[DcMode::Strict]).unwrap();
        let handles = topo.dc_handles();
        topo.seed_file_location("f1", handles[0]);
        let mut files = HashMap::new();
        files.insert("f1".to_string(), File::new("f1", 10, vec![handles[0]]).unwrap());
        let files = FilesHandle::new(files);

        let mut sched = HybridScheduler::new(files, HybridKind::Adaptive(100.0));
        let j1 = Job::new("j1", 0, 1, vec![Task::new(10).unwrap()], "f1").unwrap().into_handle();
        let j2 = Job::new("j2", 0, 1, vec![Task::new(10).unwrap()], "f1").unwrap().into_handle();
        sched.add(j1);
        sched.add(j2);
        sched.schedule(0, &mut topo);
        // Both jobs are unconditionally popped out of the makespan
        // sub-scheduler each round (matching source behavior), so nothing
        // is re-flushed back into the hybrid's own buffer.
        assert_eq!(sched.pending(), 0);
        assert_eq!(sched.results().len(), 2);
    }

    #[test]
    fn test_end_to_end_run_drains_the_queue() {
        let mut topo = two_dc_topology();
        let handles = topo.dc_handles();
        topo.seed_file_location("f1", handles[0]);
        topo.seed_file_location("f2", handles[1]);
        let mut files = HashMap::new();
        files.insert("f1".to_string(), File::new("f1", 100, vec![handles[0]]).unwrap());
        files.insert("f2".to_string(), File::new("f2", 200, vec![handles[1]]).unwrap());
        let files = FilesHandle::new(files);
        let scheduler = Box::new(SrptScheduler::new(files));

        let jobs = vec![
            Job::new("j1", 0, 1, vec![Task::new(100).unwrap()], "f1").unwrap(),
            Job::new("j2", 0, 1, vec![Task::new(20).unwrap()], "f2").unwrap(),
        ];
        let mut sim = Simulation::new(topo, scheduler, jobs, 3).unwrap();
        let results = sim.run();
        assert_eq!(results.len(), 2);
        assert_eq!(results["j1"].borrow().scheduled[0].end(), 100);
        assert_eq!(results["j2"].borrow().scheduled[0].end(), 20);
    }

    #[test]
    fn test_empty_jobs_file_runs_cleanly() {
        let topo = two_dc_topology();
        let files = FilesHandle::new(HashMap::new());
        let scheduler = Box::new(SrptScheduler::new(files));
        let mut sim = Simulation::new(topo, scheduler, Vec::new(), 3).unwrap();
        assert!(sim.run().is_empty());
    }

    #[test]
    fn test_rejects_nonpositive_window() {
        let topo = two_dc_topology();
        let files = FilesHandle::new(HashMap::new());
        let scheduler = Box::new(SrptScheduler::new(files));
        assert!(Simulation::new(topo, scheduler, Vec::new(), 0).is_err());
    }
}
