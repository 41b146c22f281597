use clap::Parser as ClapParser;
use std::{io, process, sync::Arc, time::Duration};

use leakprof::{
    LeakSettings, ObjectSampler, ReportCollector, SamplingSession, SearchStrategy,
};
use log::{LevelFilter, info};
use object::{ObjectSpace, SpaceSettings};

mod report;
mod workload;

use workload::Workload;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Requests handled by every worker thread
    #[arg(long, default_value_t = 20_000)]
    objects: usize,

    #[arg(long, default_value_t = 100, help = "Leak one request in this many (0 = never)")]
    leak_every: usize,

    #[arg(long, default_value_t = 8, help = "Holder objects between the registry and a leak")]
    chain_length: usize,

    #[arg(long, default_value_t = 4)]
    threads: usize,

    #[arg(long, default_value_t = 5_000, help = "Collect every N requests per thread (0 = never)")]
    collect_every: usize,

    #[arg(long, default_value_t = 64, help = "Payload bytes per request")]
    payload: usize,

    #[arg(long, default_value_t = 256, help = "Size of the simulated heap in MiB")]
    heap_mib: usize,

    #[arg(long, default_value_t = 256)]
    sample_capacity: usize,

    #[arg(long, default_value_t = 4000, help = "Maximum depth of the depth-first search")]
    max_depth: usize,

    #[arg(long, default_value_t = 100, help = "Edges kept nearest each leaked object")]
    leak_context: usize,

    #[arg(long, default_value_t = 100, help = "Edges kept nearest the gc root")]
    root_context: usize,

    #[arg(long, default_value_t = 256 * 1024, help = "Probe stack entries")]
    probe_stack: usize,

    /// Search breadth-first (shortest chains) instead of depth-first
    #[arg(long)]
    bfs: bool,

    #[arg(long, default_value_t = 64 * 1024, help = "Edge queue entries for --bfs")]
    edge_queue: usize,

    #[arg(long, help = "Stop the search after this many milliseconds")]
    time_budget_ms: Option<u64>,

    /// Report samples allocated after the last collection too
    #[arg(long)]
    emit_all: bool,

    #[arg(long, default_value_t = 10, help = "Samples to print")]
    top: usize,

    /// -v for debug output, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn leak_settings(&self) -> LeakSettings {
        LeakSettings {
            sample_capacity: self.sample_capacity,
            max_dfs_depth: self.max_depth,
            probe_stack_capacity: self.probe_stack,
            leak_context: self.leak_context,
            root_context: self.root_context,
            edge_queue_capacity: self.edge_queue,
            strategy: if self.bfs {
                SearchStrategy::BreadthFirst
            } else {
                SearchStrategy::DepthFirst
            },
            time_budget: self.time_budget_ms.map(Duration::from_millis),
            emit_all: self.emit_all,
            ..Default::default()
        }
    }

    fn workload(&self) -> Workload {
        Workload {
            objects: self.objects,
            leak_every: self.leak_every,
            chain_length: self.chain_length,
            threads: self.threads,
            collect_every: self.collect_every,
            payload: self.payload,
        }
    }
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // RUST_LOG still wins over the flag
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let settings = cli.leak_settings();
    if let Err(err) = settings.validate() {
        eprintln!("Invalid leak settings: {}", err);
        process::exit(1);
    }

    let Some(capacity) = cli.heap_mib.checked_mul(1024 * 1024) else {
        eprintln!("Heap of {} MiB is too large", cli.heap_mib);
        process::exit(1);
    };
    let space = match ObjectSpace::new(SpaceSettings {
        capacity,
        ..Default::default()
    }) {
        Ok(space) => space,
        Err(err) => {
            eprintln!("Error creating heap: {}", err);
            process::exit(1);
        }
    };
    let sampler = Arc::new(ObjectSampler::new(
        settings.sample_capacity,
        space.weak_references(),
    ));
    space.attach_sampler(sampler.clone());

    let stats = match workload::run(&space, &cli.workload()) {
        Ok(stats) => stats,
        Err(err) => {
            eprintln!("Error running workload: {}", err);
            process::exit(1);
        }
    };
    let gc = space.collect();
    info!(
        "{} requests, {} leaked, {} collections; {} objects live ({} bytes), {} allocations contended",
        stats.requests,
        stats.leaked,
        stats.collections + 1,
        gc.live,
        space.used_bytes(),
        sampler.contended()
    );

    let session = match SamplingSession::new(&sampler, &settings) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("Error starting leak profile: {}", err);
            process::exit(1);
        }
    };
    let mut collector = ReportCollector::new();
    let summary = {
        let view = space.safepoint();
        session.run(&view, &mut collector)
    };
    let report = collector.into_report();

    let stdout = io::stdout();
    if let Err(err) = report::write(&mut stdout.lock(), &summary, &report, cli.top) {
        eprintln!("Error writing report: {}", err);
        process::exit(1);
    }
}
