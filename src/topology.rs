use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use petgraph::graph::DiGraph;

use crate::file::{File, FileDatabase, FileDatabaseHandle, FileContainer, SourcePolicy};
use crate::job::JobHandle;

/// Handle to a data center: a node index into the Topology's bandwidth
/// graph. Doubles as the "index instead of back-pointer" the data model
/// calls for (§9) and as the edge-weighted link lookup for transfer times.
pub type DcHandle = petgraph::graph::NodeIndex;

/// Whether a DataCenter refuses tasks it cannot place immediately
/// (`Strict`), or queues them FIFO until capacity frees up (`Fifo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcMode {
    Strict,
    Fifo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunningTask {
    end: u64,
    seq: u64,
    cpus: u32,
}

// Reversed so a plain `BinaryHeap` (a max-heap) pops the smallest end time
// first, with insertion order as a tie-break.
impl Ord for RunningTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other.end.cmp(&self.end).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for RunningTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A fixed-capacity compute unit within a data center.
#[derive(Debug)]
pub struct Node {
    total: u32,
    free: u32,
    running: BinaryHeap<RunningTask>,
    next_seq: u64,
}

impl Node {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            free: total,
            running: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn free(&self) -> u32 {
        self.free
    }

    pub fn queue_len(&self) -> usize {
        self.running.len()
    }

    fn admit(&mut self, cpus: u32, end: u64) -> bool {
        if cpus > self.free {
            return false;
        }
        self.free -= cpus;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.running.push(RunningTask { end, seq, cpus });
        true
    }

    pub fn min_end(&self) -> Option<u64> {
        self.running.peek().map(|t| t.end)
    }

    /// Pops the task with the smallest end time and frees its slots.
    fn pop_min(&mut self) -> Option<(u64, u32)> {
        self.running.pop().map(|t| {
            self.free += t.cpus;
            (t.end, t.cpus)
        })
    }

    pub fn expected_endings(&self) -> Vec<u64> {
        self.running.iter().map(|t| t.end).collect()
    }
}

struct QueuedTask {
    job: JobHandle,
    duration: u64,
    cpus: u32,
}

/// Outcome of attempting to place a task on a DataCenter.
pub enum HostOutcome {
    /// Placed directly on `node_idx`; `was_empty` is true iff the node's
    /// queue length was 0 before this placement (the 0 -> 1 transition
    /// that should spawn a fresh `NodeDrain` event).
    Placed { node_idx: usize, end: u64, was_empty: bool },
    /// Admitted into the DC's FIFO wait-queue; no node placement yet.
    Admitted,
    /// No node had room and the DC does not queue (or the task is too big
    /// for any single node).
    Refused,
}

/// A group of identical compute nodes sharing a file container.
pub struct DataCenter {
    nodes: Vec<Node>,
    pub container: FileContainer,
    mode: DcMode,
    queue: VecDeque<QueuedTask>,
}

impl DataCenter {
    pub fn new(node_count: usize, per_node_capacity: u32, mode: DcMode) -> Self {
        Self {
            nodes: (0..node_count).map(|_| Node::new(per_node_capacity)).collect(),
            container: FileContainer::new(),
            mode,
            queue: VecDeque::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn per_node_capacity(&self) -> u32 {
        self.nodes.first().map(|n| n.total()).unwrap_or(0)
    }

    /// `(per_node_capacity / cost) * node_count`.
    pub fn job_capacity(&self, cost: u32) -> u32 {
        if cost == 0 || self.nodes.is_empty() {
            return 0;
        }
        (self.per_node_capacity() / cost) * self.nodes.len() as u32
    }

    /// `Σ free_i / cost`.
    pub fn job_availability(&self, cost: u32) -> u32 {
        if cost == 0 {
            return 0;
        }
        self.nodes.iter().map(|n| n.free() / cost).sum()
    }

    pub fn expected_endings(&self) -> Vec<u64> {
        self.nodes.iter().flat_map(|n| n.expected_endings()).collect()
    }

    pub fn node_free(&self, node_idx: usize) -> u32 {
        self.nodes[node_idx].free()
    }

    pub fn node_min_end(&self, node_idx: usize) -> Option<u64> {
        self.nodes[node_idx].min_end()
    }

    /// Tries every node in order; on failure, falls back to the FIFO
    /// wait-queue if this DC is `Fifo` and the task would fit on an empty
    /// node.
    pub fn host(&mut self, job: JobHandle, cpus: u32, duration: u64, now: u64) -> HostOutcome {
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            if node.free() >= cpus {
                let was_empty = node.queue_len() == 0;
                let end = now + duration;
                let admitted = node.admit(cpus, end);
                debug_assert!(admitted);
                return HostOutcome::Placed { node_idx: idx, end, was_empty };
            }
        }
        match self.mode {
            DcMode::Strict => HostOutcome::Refused,
            DcMode::Fifo => {
                if cpus <= self.per_node_capacity() {
                    self.queue.push_back(QueuedTask { job, duration, cpus });
                    HostOutcome::Admitted
                } else {
                    HostOutcome::Refused
                }
            }
        }
    }

    /// Pops the completed task from `node_idx`'s heap and frees its slots.
    fn pop_node(&mut self, node_idx: usize) -> Option<(u64, u32)> {
        self.nodes[node_idx].pop_min()
    }

    /// Attempts to dequeue and place head-of-line FIFO tasks until one
    /// cannot be placed. Returns `(node_idx, job, duration, end, was_empty)`
    /// for each task placed this way, `was_empty` marking a 0 -> 1 queue
    /// transition on that node (callers use this to decide whether a fresh
    /// `NodeDrain` must be spawned for it).
    fn drain(&mut self, now: u64) -> Vec<(usize, JobHandle, u64, u64, bool)> {
        let mut placed = Vec::new();
        while let Some(head) = self.queue.front() {
            let cpus = head.cpus;
            let mut placement = None;
            for (idx, node) in self.nodes.iter_mut().enumerate() {
                if node.free() >= cpus {
                    let was_empty = node.queue_len() == 0;
                    let end = now + head.duration;
                    let admitted = node.admit(cpus, end);
                    debug_assert!(admitted);
                    placement = Some((idx, end, was_empty));
                    break;
                }
            }
            match placement {
                Some((idx, end, was_empty)) => {
                    let head = self.queue.pop_front().expect("front checked above");
                    placed.push((idx, head.job, head.duration, end, was_empty));
                }
                None => break,
            }
        }
        placed
    }
}

/// Result of processing a `NodeDrain` event.
pub struct NodeDrainOutcome {
    /// Tasks placed out of the DC's FIFO queue as a consequence of the
    /// freed capacity: `(node_idx, job, duration, end, was_empty)`.
    pub placed: Vec<(usize, JobHandle, u64, u64, bool)>,
    /// The draining node's minimum end time after all placements, if it
    /// still has running tasks that no placement above already accounts
    /// for with a fresh `NodeDrain` (i.e. tasks that were running
    /// concurrently with the one that just completed).
    pub next_wake: Option<u64>,
}

/// Data centers and the inter-DC bandwidth graph. Owns the DataCenters and
/// the global file-location database; the only component with a clean view
/// of both, so it also orchestrates file transfers (§9 "bidirectional file
/// container" resolution).
pub struct Topology {
    graph: DiGraph<DataCenter, u64>,
    db: FileDatabaseHandle,
}

impl Topology {
    pub fn new(capacities: &[(usize, u32)], speeds: &[Vec<u64>], modes: &[DcMode]) -> anyhow::Result<Self> {
        anyhow::ensure!(
            capacities.len() == speeds.len(),
            "len(capacities)={} != len(speeds)={}",
            capacities.len(),
            speeds.len()
        );
        anyhow::ensure!(
            capacities.len() == modes.len(),
            "len(capacities)={} != len(modes)={}",
            capacities.len(),
            modes.len()
        );
        let mut graph = DiGraph::new();
        let mut handles = Vec::with_capacity(capacities.len());
        for (i, &(node_count, per_node_cpus)) in capacities.iter().enumerate() {
            anyhow::ensure!(
                speeds[i].len() == capacities.len(),
                "speeds row {} has length {}, expected {}",
                i,
                speeds[i].len(),
                capacities.len()
            );
            let dc = DataCenter::new(node_count, per_node_cpus, modes[i]);
            handles.push(graph.add_node(dc));
        }
        for i in 0..capacities.len() {
            for j in 0..capacities.len() {
                if i != j && speeds[i][j] > 0 {
                    graph.add_edge(handles[i], handles[j], speeds[i][j]);
                }
            }
        }
        Ok(Self { graph, db: FileDatabase::new() })
    }

    pub fn dc_handles(&self) -> Vec<DcHandle> {
        self.graph.node_indices().collect()
    }

    pub fn dc(&self, handle: DcHandle) -> &DataCenter {
        &self.graph[handle]
    }

    pub fn dc_mut(&mut self, handle: DcHandle) -> &mut DataCenter {
        &mut self.graph[handle]
    }

    pub fn db(&self) -> &FileDatabaseHandle {
        &self.db
    }

    pub fn label(&self, handle: DcHandle) -> String {
        format!("DC{}", handle.index())
    }

    /// 0 if `from == to`; else `size / speed`, truncating. `u64::MAX` if the
    /// link does not exist (speed 0, or no edge at all).
    pub fn transfer_time(&self, size: u64, from: DcHandle, to: DcHandle) -> u64 {
        if from == to {
            return 0;
        }
        match self.graph.find_edge(from, to) {
            Some(edge) => size / self.graph[edge],
            None => u64::MAX,
        }
    }

    /// The minimum transfer time to `to` from any of `locations`.
    pub fn min_transfer_time(&self, size: u64, locations: &[DcHandle], to: DcHandle) -> u64 {
        locations
            .iter()
            .map(|&from| self.transfer_time(size, from, to))
            .min()
            .unwrap_or(u64::MAX)
    }

    pub fn host(&mut self, dc: DcHandle, job: JobHandle, cpus: u32, duration: u64, now: u64) -> HostOutcome {
        self.dc_mut(dc).host(job, cpus, duration, now)
    }

    /// Processes a `NodeDrain`: pops the completed task, frees its slots,
    /// drains the DC's FIFO queue if any, and reports the node's next wake
    /// time if it still has running tasks.
    pub fn process_node_drain(&mut self, dc: DcHandle, node_idx: usize, _now: u64) -> NodeDrainOutcome {
        let data_center = self.dc_mut(dc);
        let popped = data_center.pop_node(node_idx);
        debug_assert!(popped.is_some(), "NodeDrain fired against an empty node heap");
        let end_time = popped.map(|(end, _)| end).unwrap_or(0);
        let placed = data_center.drain(end_time);
        let covered = placed.iter().any(|(idx, ..)| *idx == node_idx);
        let next_wake = if covered { None } else { data_center.node_min_end(node_idx) };
        NodeDrainOutcome { placed, next_wake }
    }

    /// Begins materializing `file` at `dest`. Returns `now` if the file is
    /// already present there, or the time a scheduled transfer will finish.
    pub fn begin_transfer(
        &self,
        file: &File,
        dest: DcHandle,
        now: u64,
        policy: SourcePolicy,
    ) -> anyhow::Result<u64> {
        if self.dc(dest).container.has(&file.id) {
            return Ok(now);
        }
        let live_locations: Vec<DcHandle> = self
            .db
            .borrow()
            .locations(&file.id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_else(|| file.locations.clone());
        let candidates: Vec<(DcHandle, u64)> = live_locations
            .iter()
            .filter_map(|&from| self.graph.find_edge(from, dest).map(|edge| (from, self.graph[edge])))
            .collect();
        anyhow::ensure!(
            !candidates.is_empty(),
            "no usable link to transfer file {} to {}",
            file.id,
            self.label(dest)
        );
        let (_from, speed) = match policy {
            SourcePolicy::HighestBandwidth => *candidates.iter().max_by_key(|(_, speed)| *speed).unwrap(),
            SourcePolicy::LowestBandwidth => *candidates.iter().min_by_key(|(_, speed)| *speed).unwrap(),
        };
        Ok(now + file.size / speed)
    }

    /// Materializes a completed transfer: records the file as present both
    /// in the destination's container and in the global database.
    pub fn complete_transfer(&mut self, file_id: &str, dc: DcHandle) {
        self.dc_mut(dc).container.add(file_id);
        self.db.borrow_mut().record(file_id, dc);
    }

    /// Records a file's initial placement (used by the loader).
    pub fn seed_file_location(&mut self, file_id: &str, dc: DcHandle) {
        self.complete_transfer(file_id, dc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_dc_topology() -> Topology {
        Topology::new(
            &[(1, 1), (1, 1)],
            &[vec![0, 10], vec![10, 0]],
            &[DcMode::Strict, DcMode::Strict],
        )
        .unwrap()
    }

    #[test]
    fn test_node_admit_and_free_invariant() {
        let mut node = Node::new(4);
        assert!(!node.admit(5, 100));
        assert_eq!(node.free(), 4);
        assert!(node.admit(2, 100));
        assert_eq!(node.free(), 2);
        let (end, cpus) = node.pop_min().unwrap();
        assert_eq!(end, 100);
        assert_eq!(cpus, 2);
        assert_eq!(node.free(), 4);
    }

    #[test]
    fn test_node_min_heap_fifo_tiebreak() {
        let mut node = Node::new(10);
        node.admit(1, 50);
        node.admit(1, 50);
        node.admit(1, 10);
        assert_eq!(node.min_end(), Some(10));
        assert_eq!(node.pop_min().unwrap().0, 10);
        assert_eq!(node.pop_min().unwrap().0, 50);
        assert_eq!(node.pop_min().unwrap().0, 50);
    }

    #[test]
    fn test_transfer_time_same_dc_is_zero() {
        let topo = two_dc_topology();
        let handles = topo.dc_handles();
        assert_eq!(topo.transfer_time(100, handles[0], handles[0]), 0);
    }

    #[test]
    fn test_transfer_time_truncates() {
        let topo = two_dc_topology();
        let handles = topo.dc_handles();
        assert_eq!(topo.transfer_time(25, handles[0], handles[1]), 2);
    }

    #[test]
    fn test_transfer_time_unusable_link_is_max() {
        let topo = Topology::new(
            &[(1, 1), (1, 1)],
            &[vec![0, 0], vec![0, 0]],
            &[DcMode::Strict, DcMode::Strict],
        )
        .unwrap();
        let handles = topo.dc_handles();
        assert_eq!(topo.transfer_time(25, handles[0], handles[1]), u64::MAX);
    }

    #[test]
    fn test_job_capacity_and_availability() {
        let topo = Topology::new(
            &[(2, 4)],
            &[vec![0]],
            &[DcMode::Strict],
        )
        .unwrap();
        let dc = topo.dc(topo.dc_handles()[0]);
        assert_eq!(dc.job_capacity(2), 4); // (4/2)*2 nodes
        assert_eq!(dc.job_availability(2), 4); // both nodes fully free
    }

    #[test]
    fn test_fifo_dc_queues_then_drains() {
        let mut topo = Topology::new(&[(1, 2)], &[vec![0]], &[DcMode::Fifo]).unwrap();
        let dc = topo.dc_handles()[0];
        let job = crate::job::Job::new("j1", 0, 1, vec![crate::job::Task::new(5).unwrap()], "f1")
            .unwrap()
            .into_handle();
        // Fill the only node.
        match topo.host(dc, job.clone(), 2, 10, 0) {
            HostOutcome::Placed { was_empty, .. } => assert!(was_empty),
            _ => panic!("expected placement"),
        }
        // A second task cannot fit directly, so it is queued.
        match topo.host(dc, job.clone(), 1, 3, 0) {
            HostOutcome::Admitted => {}
            _ => panic!("expected FIFO admission"),
        }
        let outcome = topo.process_node_drain(dc, 0, 10);
        assert_eq!(outcome.placed.len(), 1);
        assert_eq!(outcome.placed[0].3, 10 + 3);
        assert!(outcome.placed[0].4);
    }
}
