mod hybrid;
mod makespan;
mod srpt;

pub use hybrid::{HybridKind, HybridScheduler};
pub use makespan::MakespanScheduler;
pub use srpt::SrptScheduler;

use std::collections::HashMap;
use std::rc::Rc;

use crate::event::Event;
use crate::file::File;
use crate::job::JobHandle;
use crate::topology::{DcHandle, Topology};

/// Shared, read-only view of every loaded file, keyed by id.
pub type FilesHandle = Rc<HashMap<String, File>>;

/// Common operations every scheduling policy exposes to the simulation
/// driver.
pub trait Scheduler {
    fn add(&mut self, job: JobHandle);
    /// Attempts to place pending work at virtual time `now`, returning any
    /// follow-up events (task completions, node drains, file arrivals).
    fn schedule(&mut self, now: u64, topology: &mut Topology) -> Vec<Event>;
    fn pending(&self) -> usize;
    /// Drains and returns every job this scheduler has fully or partially
    /// processed, keyed by job id.
    fn results(&mut self) -> HashMap<String, JobHandle>;
}

/// One destination candidate produced by [`best_dcs`].
#[derive(Debug, Clone, Copy)]
pub struct TransferCenter {
    pub transfer_time: u64,
    pub capacity: u32,
    pub free_slots: u32,
    pub dc: DcHandle,
}

/// The two `best_dcs` filter variants that distinguish Swag from GeoDis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BestDcsFilter {
    /// Every DC is a candidate; transfer_time is the minimum transfer time
    /// from any current holder of the file.
    Full,
    /// Only DCs that already hold the file are candidates, with
    /// transfer_time fixed at 0.
    PresentOnly,
}

/// Candidate destinations for `file`, sorted ascending by transfer time,
/// with zero-capacity DCs for `cost` already dropped.
pub fn best_dcs(topology: &Topology, file: &File, cost: u32, filter: BestDcsFilter) -> Vec<TransferCenter> {
    let live: Vec<DcHandle> = {
        let db = topology.db().borrow();
        db.locations(&file.id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_else(|| file.locations.clone())
    };
    let mut candidates: Vec<TransferCenter> = topology
        .dc_handles()
        .into_iter()
        .filter_map(|dc| {
            let transfer_time = match filter {
                BestDcsFilter::Full => topology.min_transfer_time(file.size, &live, dc),
                BestDcsFilter::PresentOnly => {
                    if live.contains(&dc) {
                        0
                    } else {
                        return None;
                    }
                }
            };
            let data_center = topology.dc(dc);
            let capacity = data_center.job_capacity(cost);
            if capacity == 0 {
                return None;
            }
            let free_slots = data_center.job_availability(cost);
            Some(TransferCenter { transfer_time, capacity, free_slots, dc })
        })
        .collect();
    candidates.sort_by_key(|tc| tc.transfer_time);
    candidates
}
