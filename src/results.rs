use std::collections::HashMap;
use std::io::Write;

use crate::job::JobHandle;

/// Renders one job's result line:
/// `<job_id> <submission> [('<file_id>', '<location>', <submission>, <start>, <end>), …]`
fn render_job(job: &JobHandle) -> String {
    let job = job.borrow();
    let tuples: Vec<String> = job
        .scheduled
        .iter()
        .map(|t| format!("('{}', '{}', {}, {}, {})", job.file_id, t.location, job.submission, t.start, t.end()))
        .collect();
    format!("{} {} [{}]", job.id, job.submission, tuples.join(", "))
}

/// Writes one line per job, ordered by `(submission, job_id)` for
/// reproducibility regardless of the results map's iteration order.
pub fn write_results<W: Write>(writer: &mut W, jobs: &HashMap<String, JobHandle>) -> std::io::Result<()> {
    let mut ordered: Vec<&JobHandle> = jobs.values().collect();
    ordered.sort_by(|a, b| {
        let a = a.borrow();
        let b = b.borrow();
        (a.submission, a.id.as_str()).cmp(&(b.submission, b.id.as_str()))
    });
    for job in ordered {
        writeln!(writer, "{}", render_job(job))?;
    }
    Ok(())
}
