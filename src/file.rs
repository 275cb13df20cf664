use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::topology::DcHandle;

/// An input data file required by one or more jobs. Immutable once loaded:
/// its size never changes, though its set of holder locations (tracked in
/// the [`FileDatabase`], not here) grows as transfers complete.
#[derive(Debug, Clone)]
pub struct File {
    pub id: String,
    pub size: u64,
    pub locations: Vec<DcHandle>,
}

impl File {
    pub fn new(id: impl Into<String>, size: u64, locations: Vec<DcHandle>) -> anyhow::Result<Self> {
        anyhow::ensure!(size > 0, "file size must be > 0, found {}", size);
        anyhow::ensure!(!locations.is_empty(), "file must have at least one location");
        Ok(Self {
            id: id.into(),
            size,
            locations,
        })
    }
}

/// Global registry of which data centers currently hold a copy of which
/// file. Shared (via `Rc<RefCell<_>>`) between the Topology and every
/// DataCenter's [`FileContainer`], and updated whenever a transfer
/// completes or a file is loaded at startup.
#[derive(Debug, Default)]
pub struct FileDatabase {
    locations: HashMap<String, HashSet<DcHandle>>,
}

pub type FileDatabaseHandle = Rc<RefCell<FileDatabase>>;

impl FileDatabase {
    pub fn new() -> FileDatabaseHandle {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn record(&mut self, file_id: &str, dc: DcHandle) {
        self.locations.entry(file_id.to_string()).or_default().insert(dc);
    }

    pub fn locations(&self, file_id: &str) -> Option<&HashSet<DcHandle>> {
        self.locations.get(file_id)
    }

    pub fn has(&self, file_id: &str, dc: DcHandle) -> bool {
        self.locations
            .get(file_id)
            .map(|set| set.contains(&dc))
            .unwrap_or(false)
    }
}

/// Selects which existing holder of a file to transfer from when a task is
/// placed somewhere that doesn't have the file locally.
///
/// The original engine picks the **lowest**-bandwidth candidate link, which
/// almost certainly inverts the intended comparison (see `DESIGN.md`); the
/// default here is `HighestBandwidth`, with `LowestBandwidth` retained for
/// anyone reproducing the original numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourcePolicy {
    #[default]
    HighestBandwidth,
    LowestBandwidth,
}

/// Per-DataCenter local file store. Tracks only presence; the
/// "best source for a transfer" decision and the actual scheduling of a
/// transfer live in [`crate::topology::Topology::transfer_file`], since
/// that is the only component that can see both the bandwidth graph and
/// every DataCenter's container without an ownership cycle.
#[derive(Debug, Default)]
pub struct FileContainer {
    files: HashSet<String>,
}

impl FileContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, file_id: &str) -> bool {
        self.files.contains(file_id)
    }

    pub fn add(&mut self, file_id: &str) {
        self.files.insert(file_id.to_string());
    }
}
