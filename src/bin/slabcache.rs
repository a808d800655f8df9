//! slabcache driver
//!
//! Exercises the cache the way an embedding benchmark would:
//! - Print the size-class ladder
//! - Time set/get loops
//! - Fill the cache and dump its contents
//!
//! # Examples
//!
//! ```bash
//! # Show the class ladder for a config file
//! slabcache --config cache.toml classes
//!
//! # 10k keys, 100-byte values, 5 rounds
//! slabcache bench --keys 10000 --value-size 100 --rounds 5
//!
//! # Fill 20 keys and dump
//! slabcache dump --keys 20
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use slabcache::{Cache, CacheConfig};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// slabcache - slab-allocated in-process key-value cache
#[derive(Parser, Debug)]
#[command(name = "slabcache")]
#[command(version = slabcache::VERSION)]
#[command(about = "Drive and inspect the slab-allocated key-value cache", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, global = true, env = "SLABCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory; enables a daily rolling log file
    #[arg(long, global = true, env = "SLABCACHE_LOG_DIR")]
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
    /// Print the size-class ladder
    Classes,

    /// Time set/get loops
    Bench(BenchArgs),

    /// Fill the cache and print every item
    Dump {
        /// Number of keys to insert
        #[arg(short, long, default_value = "16")]
        keys: usize,
    },
}

/// Benchmark arguments
#[derive(Args, Debug)]
struct BenchArgs {
    /// Distinct keys per round
    #[arg(short, long, default_value = "1000")]
    keys: usize,

    /// Value size in bytes
    #[arg(short, long, default_value = "64")]
    value_size: usize,

    /// Rounds of set-then-get
    #[arg(short, long, default_value = "3")]
    rounds: usize,

    /// Flush between rounds
    #[arg(long)]
    flush: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(&cli)?;

    let config = CacheConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Classes => classes_command(&config),
        Commands::Bench(args) => bench_command(config, args),
        Commands::Dump { keys } => dump_command(config, keys),
    }
}

/// Setup logging with console output and an optional rolling file
fn setup_logging(cli: &Cli) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let filter = EnvFilter::from_default_env().add_directive(log_level.into());
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color);

    match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "slabcache.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(console)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(console)
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

/// Classes command - print the ladder
fn classes_command(config: &CacheConfig) -> anyhow::Result<()> {
    let chunks_per_page = |size: usize| config.page_size / size;

    println!("Class  Chunk size  Chunks/page");
    println!("-------------------------------");
    for (id, size) in config.size_classes().into_iter().enumerate() {
        println!("{:>5}  {:>10}  {:>11}", id, size, chunks_per_page(size));
    }
    println!(
        "\nPage size {} bytes, {} hash buckets",
        config.page_size,
        config.bucket_count()
    );
    Ok(())
}

/// Bench command - timed set/get loops
fn bench_command(config: CacheConfig, args: BenchArgs) -> anyhow::Result<()> {
    let mut cache = Cache::new(config).context("Failed to initialize cache")?;
    let value = vec![0x41u8; args.value_size];
    let keys: Vec<String> = (0..args.keys).map(|i| format!("key_{}", i)).collect();
    let mut out = vec![0u8; args.value_size + 1];

    info!(
        keys = args.keys,
        value_size = args.value_size,
        rounds = args.rounds,
        "Starting benchmark"
    );

    println!("Round        Set ops/s        Get ops/s   Memory used");
    println!("------------------------------------------------------");
    for round in 0..args.rounds {
        let start = Instant::now();
        for key in &keys {
            cache
                .set(key.as_bytes(), &value)
                .with_context(|| format!("Set failed for {}", key))?;
        }
        let set_elapsed = start.elapsed();

        let start = Instant::now();
        let mut misses = 0usize;
        for key in &keys {
            if cache.get_into(key.as_bytes(), &mut out)?.is_none() {
                misses += 1;
            }
        }
        let get_elapsed = start.elapsed();

        if misses > 0 {
            warn!(round, misses, "Keys missing after set");
        }

        println!(
            "{:>5}  {:>15.0}  {:>15.0}  {:>12}",
            round,
            ops_per_sec(args.keys, set_elapsed.as_secs_f64()),
            ops_per_sec(args.keys, get_elapsed.as_secs_f64()),
            cache.memory_used()
        );

        if args.flush {
            cache.flush_all()?;
        }
    }

    let stats = cache.stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        hit_rate = stats.hit_rate(),
        set_failures = stats.set_failures,
        "Benchmark complete"
    );
    Ok(())
}

/// Dump command - fill then print every item
fn dump_command(config: CacheConfig, keys: usize) -> anyhow::Result<()> {
    let mut cache = Cache::new(config).context("Failed to initialize cache")?;
    for i in 0..keys {
        let key = format!("key_{}", i);
        let value = format!("value_{}", i);
        cache.set(key.as_bytes(), value.as_bytes())?;
    }

    println!("{}", cache.dump()?);
    Ok(())
}

fn ops_per_sec(ops: usize, secs: f64) -> f64 {
    if secs > 0.0 {
        ops as f64 / secs
    } else {
        0.0
    }
}
