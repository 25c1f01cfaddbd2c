//! chunkslab command-line tool
//!
//! Inspect the pool layout a configuration produces, or hammer an allocator
//! from many threads and verify every buffer it hands out.
//!
//! # Examples
//!
//! ```bash
//! # Show derived geometry for a 16 MiB pool of 512 byte chunks
//! chunkslab inspect --capacity 16777216 --chunk-size 512
//!
//! # Run 8 workers for 10000 iterations each and print Prometheus metrics
//! chunkslab stress --threads 8 --iterations 10000 --prometheus
//! ```

use anyhow::Context;
use chunkslab::{AllocatedBuffer, AllocatorConfig, MetricsFacade, MetricsSink, SlabAllocator};
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// chunkslab - striped off-heap slab allocator
#[derive(Parser, Debug)]
#[command(name = "chunkslab")]
#[command(version = chunkslab::VERSION)]
#[command(about = "Striped off-heap slab allocator tools", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "CHUNKSLAB_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path (logs only to the console when unset)
    #[arg(long, global = true, env = "CHUNKSLAB_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the derived pool geometry as JSON
    Inspect(SizingArgs),

    /// Run concurrent allocate/write/verify/release workers
    Stress(StressArgs),

    /// Show version
    Version,
}

/// Overrides for the configured pool size
#[derive(Args, Debug, Clone)]
struct SizingArgs {
    /// Requested pool capacity in bytes
    #[arg(long)]
    capacity: Option<usize>,

    /// Requested chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Parallelism used to size lock sections
    #[arg(long)]
    parallelism: Option<usize>,
}

/// Stress run arguments
#[derive(Args, Debug)]
struct StressArgs {
    #[command(flatten)]
    sizing: SizingArgs,

    /// Worker threads
    #[arg(short, long, default_value = "4")]
    threads: usize,

    /// Allocations per worker
    #[arg(short, long, default_value = "10000")]
    iterations: usize,

    /// Largest chunk count a single allocation asks for
    #[arg(short, long, default_value = "16")]
    max_chunks: usize,

    /// Buffers each worker keeps alive at once
    #[arg(long, default_value = "4")]
    hold: usize,

    /// Install the Prometheus recorder and print its exposition at the end
    #[arg(long)]
    prometheus: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    match &cli.command {
        Commands::Inspect(sizing) => inspect_command(&cli, sizing),
        Commands::Stress(args) => stress_command(&cli, args),
        Commands::Version => {
            println!("chunkslab {}", chunkslab::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with console output and optional rolling files
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let file_layer = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "chunkslab.log");
            Some(fmt::layer().with_writer(appender).with_ansi(false))
        }
        None => None,
    };

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

/// Resolve configuration: file and environment first, then CLI overrides
fn load_config(cli: &Cli, sizing: &SizingArgs) -> anyhow::Result<AllocatorConfig> {
    let mut config = AllocatorConfig::load(cli.config.as_deref())?;

    if let Some(capacity) = sizing.capacity {
        config.capacity = capacity;
    }
    if let Some(chunk_size) = sizing.chunk_size {
        config.chunk_size = chunk_size;
    }
    if sizing.parallelism.is_some() {
        config.parallelism = sizing.parallelism;
    }

    config.validate()?;
    Ok(config)
}

/// Inspect command - print geometry and exit
fn inspect_command(cli: &Cli, sizing: &SizingArgs) -> anyhow::Result<()> {
    let config = load_config(cli, sizing)?;
    let slab = SlabAllocator::new(&config)?;

    println!("{}", serde_json::to_string_pretty(&slab.stats())?);
    Ok(())
}

/// Per-worker counters
#[derive(Debug, Default, Clone, Copy, Serialize)]
struct WorkerReport {
    allocations: usize,
    exhausted: usize,
    partial_grants: usize,
    values_written: usize,
    verify_failures: usize,
}

impl WorkerReport {
    fn merge(self, other: Self) -> Self {
        Self {
            allocations: self.allocations + other.allocations,
            exhausted: self.exhausted + other.exhausted,
            partial_grants: self.partial_grants + other.partial_grants,
            values_written: self.values_written + other.values_written,
            verify_failures: self.verify_failures + other.verify_failures,
        }
    }
}

/// Summary printed at the end of a stress run
#[derive(Debug, Serialize)]
struct StressSummary {
    threads: usize,
    iterations: usize,
    elapsed_ms: u128,
    report: WorkerReport,
    stats: chunkslab::SlabStats,
}

/// Stress command - concurrent allocate/write/verify/release
fn stress_command(cli: &Cli, args: &StressArgs) -> anyhow::Result<()> {
    if args.threads == 0 || args.max_chunks == 0 {
        anyhow::bail!("--threads and --max-chunks must be non-zero");
    }

    let handle = if args.prometheus {
        Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("Failed to install Prometheus recorder")?,
        )
    } else {
        None
    };

    let config = load_config(cli, &args.sizing)?;
    let metrics: Arc<dyn MetricsSink> = Arc::new(MetricsFacade);
    let slab = SlabAllocator::with_metrics(&config, metrics)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .thread_name(|i| format!("chunkslab-worker-{}", i))
        .build()
        .context("Failed to build worker pool")?;

    info!(
        threads = args.threads,
        iterations = args.iterations,
        max_chunks = args.max_chunks,
        "Starting stress run"
    );

    let started = Instant::now();
    let report = pool.install(|| {
        (0..args.threads)
            .into_par_iter()
            .map(|worker| stress_worker(&slab, args, worker as u64))
            .reduce(WorkerReport::default, WorkerReport::merge)
    });
    let elapsed = started.elapsed();

    let summary = StressSummary {
        threads: args.threads,
        iterations: args.iterations,
        elapsed_ms: elapsed.as_millis(),
        report,
        stats: slab.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(handle) = handle {
        println!("{}", handle.render());
    }

    if summary.stats.allocated_bytes != 0 {
        error!(
            allocated_bytes = summary.stats.allocated_bytes,
            "Memory still reserved after all buffers were released"
        );
        anyhow::bail!("allocator leaked {} bytes", summary.stats.allocated_bytes);
    }
    if report.verify_failures > 0 {
        anyhow::bail!("{} buffers failed verification", report.verify_failures);
    }

    info!(elapsed_ms = elapsed.as_millis() as u64, "Stress run passed");
    Ok(())
}

/// One worker: keep up to `hold` buffers alive, fill each with a pattern and
/// check it before releasing
fn stress_worker(slab: &SlabAllocator, args: &StressArgs, worker: u64) -> WorkerReport {
    let mut report = WorkerReport::default();
    let mut held: Vec<(AllocatedBuffer, i64)> = Vec::with_capacity(args.hold);
    let mut state = worker.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;

    for iteration in 0..args.iterations {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;

        if held.len() >= args.hold.max(1) {
            let (buffer, seed) = held.swap_remove((state as usize) % held.len());
            if !verify(&buffer, seed) {
                report.verify_failures += 1;
            }
            buffer.release();
        }

        let wanted = 1 + (state as usize) % args.max_chunks;
        let Some(mut buffer) = slab.allocate_chunks(wanted) else {
            report.exhausted += 1;
            continue;
        };

        report.allocations += 1;
        if buffer.capacity() < wanted * slab.chunk_size() {
            report.partial_grants += 1;
        }

        let seed = ((worker as i64) << 40) | iteration as i64;
        let mut i = 0;
        while buffer.put_long(seed.wrapping_add(i)) {
            i += 1;
        }
        report.values_written += i as usize;
        held.push((buffer, seed));
    }

    for (buffer, seed) in held {
        if !verify(&buffer, seed) {
            report.verify_failures += 1;
        }
        buffer.release();
    }

    report
}

fn verify(buffer: &AllocatedBuffer, seed: i64) -> bool {
    let expected = buffer.capacity() / chunkslab::slab::LONG_BYTES;
    if buffer.len() != expected {
        warn!(len = buffer.len(), expected, "Buffer not completely filled");
        return false;
    }

    for (i, value) in buffer.iter().enumerate() {
        if value != seed.wrapping_add(i as i64) {
            warn!(index = i, value, "Sequential read mismatch");
            return false;
        }
        let random = buffer.get_long(i * chunkslab::slab::LONG_BYTES);
        if random != value {
            warn!(index = i, random, value, "Random read mismatch");
            return false;
        }
    }
    true
}
