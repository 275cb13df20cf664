use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use anyhow::Context;

use crate::file::File;
use crate::job::{Job, Task};
use crate::topology::{DcMode, Topology};

fn next_tok<'a, I: Iterator<Item = &'a str>>(tokens: &mut I, path: &Path, what: &str) -> anyhow::Result<&'a str> {
    tokens.next().ok_or_else(|| anyhow::anyhow!("{}: missing {}", path.display(), what))
}

fn parse<T: std::str::FromStr>(tok: &str, path: &Path, what: &str) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    tok.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{}: invalid {} {:?}: {}", path.display(), what, tok, e))
}

/// Parses a topology file (whitespace-separated tokens, newlines
/// insignificant): `N`, then N `<nodes> <cpus_per_node>` pairs, then an
/// `N`×`N` bandwidth matrix. Every DC is created with
/// [`DcMode::Strict`]; the FIFO admission mode is a capability of
/// [`crate::topology::DataCenter`] not exposed through this file format.
pub fn load_topology(path: &Path) -> anyhow::Result<Topology> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading topology file {}", path.display()))?;
    let mut tokens = content.split_whitespace();
    let n: usize = parse(next_tok(&mut tokens, path, "DC count")?, path, "DC count")?;

    let mut capacities = Vec::with_capacity(n);
    for i in 0..n {
        let nodes: usize = parse(next_tok(&mut tokens, path, &format!("node count for DC {}", i))?, path, "node count")?;
        let cpus: u32 = parse(next_tok(&mut tokens, path, &format!("per-node cpus for DC {}", i))?, path, "per-node cpus")?;
        capacities.push((nodes, cpus));
    }

    let mut speeds = Vec::with_capacity(n);
    for i in 0..n {
        let mut row = Vec::with_capacity(n);
        for j in 0..n {
            let speed: u64 = parse(
                next_tok(&mut tokens, path, &format!("speed[{}][{}]", i, j))?,
                path,
                "speed",
            )?;
            row.push(speed);
        }
        speeds.push(row);
    }

    let modes = vec![DcMode::Strict; n];
    Topology::new(&capacities, &speeds, &modes)
}

/// Parses a files manifest, one file per line:
/// `<file_id> <size_bytes> <dc_idx_1> [<dc_idx_2> ...]`. Registers each
/// file's initial locations in `topology`'s file database.
pub fn load_files(path: &Path, topology: &mut Topology) -> anyhow::Result<HashMap<String, File>> {
    let handles = topology.dc_handles();
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading files file {}", path.display()))?;
    let mut files = HashMap::new();
    for (idx, line) in raw.lines().enumerate() {
        let record = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let id = next_tok(&mut fields, path, "file id")?.to_string();
        let size: u64 = parse(
            next_tok(&mut fields, path, &format!("size at record {}", record))?,
            path,
            "file size",
        )?;
        let mut locations = Vec::new();
        for tok in fields {
            let dc_idx: usize = parse(tok, path, "dc index")?;
            anyhow::ensure!(
                dc_idx < handles.len(),
                "{}: record {}: dc index {} out of range (topology has {} DCs)",
                path.display(),
                record,
                dc_idx,
                handles.len()
            );
            locations.push(handles[dc_idx]);
        }
        anyhow::ensure!(
            !locations.is_empty(),
            "{}: record {}: file {} has no locations",
            path.display(),
            record,
            id
        );
        let file = File::new(id.clone(), size, locations.clone())
            .with_context(|| format!("{}: record {}", path.display(), record))?;
        for dc in &locations {
            topology.seed_file_location(&id, *dc);
        }
        files.insert(id, file);
    }
    Ok(files)
}

/// Parses a jobs file, one job per line:
/// `<job_id> <cpus> <inter_arrival_delta> <file_id> <task_dur_1> [...]`.
/// `inter_arrival_delta` accumulates into each job's absolute submission
/// time; deltas, not absolute timestamps.
pub fn load_jobs(path: &Path, files: &HashMap<String, File>) -> anyhow::Result<Vec<Job>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading jobs file {}", path.display()))?;
    let mut jobs = Vec::new();
    let mut submission = 0u64;
    for (idx, line) in raw.lines().enumerate() {
        let record = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let id = next_tok(&mut fields, path, "job id")?.to_string();
        let cpus: u32 = parse(
            next_tok(&mut fields, path, &format!("cpus at record {}", record))?,
            path,
            "cpus",
        )?;
        let delta: u64 = parse(
            next_tok(&mut fields, path, &format!("inter-arrival delta at record {}", record))?,
            path,
            "inter-arrival delta",
        )?;
        let file_id = next_tok(&mut fields, path, &format!("file id at record {}", record))?.to_string();
        anyhow::ensure!(
            files.contains_key(&file_id),
            "{}: record {}: job {} references unknown file {}",
            path.display(),
            record,
            id,
            file_id
        );
        let mut tasks = Vec::new();
        for tok in fields {
            let duration: u64 = parse(tok, path, "task duration")?;
            tasks.push(Task::new(duration).with_context(|| format!("{}: record {}", path.display(), record))?);
        }
        submission += delta;
        let job = Job::new(id, submission, cpus, tasks, file_id)
            .with_context(|| format!("{}: record {}", path.display(), record))?;
        jobs.push(job);
    }
    Ok(jobs)
}
