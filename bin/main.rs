use std::fs::File as StdFile;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;

use gdsim::loader::{load_files, load_jobs, load_topology};
use gdsim::results::write_results;
use gdsim::scheduler::{HybridKind, HybridScheduler, MakespanScheduler, Scheduler, SrptScheduler};
use gdsim::simulation::Simulation;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum SchedulerKind {
    #[value(name = "SRPT")]
    Srpt,
    #[value(name = "GEODIS")]
    Geodis,
    #[value(name = "SWAG")]
    Swag,
    #[value(name = "ADAPTIVE")]
    Adaptive,
    #[value(name = "NADAPTIVE")]
    Nadaptive,
    #[value(name = "RATIO")]
    Ratio,
    #[value(name = "RATIO2")]
    Ratio2,
    #[value(name = "RATIO3")]
    Ratio3,
}

#[derive(Debug, clap::Parser)]
#[command(long_about = None)]
struct Args {
    /// Scheduling policy to simulate
    #[arg(long, value_enum, default_value = "SRPT")]
    scheduler: SchedulerKind,
    /// Path to the topology file
    #[arg(long)]
    topology: PathBuf,
    /// Path to the files manifest
    #[arg(long)]
    files: PathBuf,
    /// Path to the jobs file
    jobs: PathBuf,
    /// Scheduling window, in virtual time units
    #[arg(long, default_value_t = 3)]
    window: u64,
    /// Threshold ratio used by the adaptive/ratio hybrid selectors
    #[arg(long, default_value_t = 0.25)]
    ratio: f64,
    /// Redirect logging to a file, or "-" for stdout; default is stderr
    #[arg(long)]
    log: Option<String>,
    /// Write a small execution-time report to this path
    #[arg(long)]
    profiler: Option<PathBuf>,
}

fn init_logging(log: Option<&str>) {
    let mut builder = env_logger::Builder::from_default_env();
    match log {
        None => {}
        Some("-") => {
            builder.target(env_logger::Target::Stdout);
        }
        Some(path) => match StdFile::create(path) {
            Ok(f) => {
                builder.target(env_logger::Target::Pipe(Box::new(f)));
            }
            Err(e) => eprintln!("could not open log file {}: {}", path, e),
        },
    }
    builder.init();
}

fn build_scheduler(kind: SchedulerKind, ratio: f64, files: gdsim::scheduler::FilesHandle) -> anyhow::Result<Box<dyn Scheduler>> {
    anyhow::ensure!(ratio > 0.0, "ratio must be > 0, found {}", ratio);
    Ok(match kind {
        SchedulerKind::Srpt => Box::new(SrptScheduler::new(files)),
        SchedulerKind::Swag => Box::new(MakespanScheduler::new_swag(files)),
        SchedulerKind::Geodis => Box::new(MakespanScheduler::new_geodis(files)),
        SchedulerKind::Adaptive => Box::new(HybridScheduler::new(files, HybridKind::Adaptive(ratio))),
        SchedulerKind::Nadaptive => Box::new(HybridScheduler::new(files, HybridKind::Adaptive2(ratio))),
        SchedulerKind::Ratio => Box::new(HybridScheduler::new(files, HybridKind::Ratio1(ratio))),
        SchedulerKind::Ratio2 => Box::new(HybridScheduler::new(files, HybridKind::Ratio2(ratio))),
        SchedulerKind::Ratio3 => Box::new(HybridScheduler::new(files, HybridKind::Ratio3(ratio))),
    })
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log.as_deref());

    let start = Instant::now();

    let mut topology = load_topology(&args.topology)?;
    let files = load_files(&args.files, &mut topology)?;
    let jobs = load_jobs(&args.jobs, &files)?;
    let job_count = jobs.len();
    let files = std::rc::Rc::new(files);

    let scheduler = build_scheduler(args.scheduler, args.ratio, files)?;
    let mut sim = Simulation::new(topology, scheduler, jobs, args.window)?;
    let results = sim.run();

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    write_results(&mut handle, &results)?;

    if let Some(path) = args.profiler {
        let elapsed = start.elapsed();
        let mut f = StdFile::create(&path)?;
        writeln!(f, "jobs={}", job_count)?;
        writeln!(f, "elapsed_ms={}", elapsed.as_millis())?;
    }

    Ok(())
}
