//! # GET Load Benchmark
//!
//! Purpose: Drive a fixed number of concurrent GET loops against one server
//! for a set period, repeat for several trials, and report median latency,
//! average latency and throughput alongside CPU/memory samples.
//!
//! ## Design Principles
//! 1. **Closed Loop**: Each worker issues its next request only after the
//!    previous reply, so `concurrency` equals the number of pending requests.
//! 2. **Lock-Free Hot Path**: Workers keep raw latencies locally and share
//!    only atomic counters.
//! 3. **Self-Healing Connections**: Connection errors are reported to the
//!    resilience manager, which replaces the pool if they persist.

mod metrics;
mod report;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use rops_client::{ClientConfig, ClientResult, ConnectionManager, ConnectionPool};
use tracing::{debug, info, warn};

use crate::metrics::{Metrics, TrialStats};
use crate::report::Report;
use crate::telemetry::Sampler;

const KEY: &[u8] = b"test";
const DEFAULT_PORT: u16 = 6379;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server as `host` or `host:port`
    host: String,
    /// AUTH password; pass "" for none
    password: String,
    /// Number of concurrent request loops
    concurrency: usize,
    /// Length of each trial in minutes
    minutes: f64,
    /// Number of trials
    trials: usize,
    /// CSV file receiving the results
    output: PathBuf,
    /// Optional JSON client configuration; `host`/`password` still override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Size of the value written before the run, in bytes
    #[arg(long, default_value_t = 1024)]
    value_size: usize,
    /// Seconds between telemetry samples
    #[arg(long, default_value_t = 2)]
    sample_secs: u64,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    run(args)
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = client_config(&args)?;
    let started_at = Utc::now();

    println!("Host:\t\t\t{}", config.endpoint());
    println!("PendingRequests:\t{}", args.concurrency);
    println!("Cache Item Size:\t{} bytes", args.value_size);
    println!();

    let manager = Arc::new(ConnectionPool::managed(config.clone()));
    prepare_dataset(&manager, args.value_size).context("failed to prepare dataset")?;

    let sampler = Sampler::start(Duration::from_secs(args.sample_secs.max(1)));
    let mut report = Report::new(config.endpoint(), started_at);
    let period = Duration::from_secs_f64(args.minutes.max(0.0) * 60.0);

    for trial in 0..args.trials {
        println!("Running trial {}", trial + 1);
        let stats = run_trial(&manager, args.concurrency, period, args.value_size);
        println!("Median Latency: {} ms", stats.median_ms);
        println!("Average Latency: {} ms", stats.average_ms);
        println!("Throughput: {} bytes/s", stats.throughput_bytes_per_sec);
        println!("Errors: {}", stats.errors);
        report.push_trial(stats);
    }

    report.set_samples(sampler.stop());
    report.write_to(&args.output)?;
    info!(path = %args.output.display(), "report written");
    Ok(())
}

fn client_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_json_file(path)?,
        None => ClientConfig::default(),
    };
    let (host, port) = split_endpoint(&args.host)
        .with_context(|| format!("invalid host '{}'", args.host))?;
    config.host = host;
    config.port = port;
    config.password = (!args.password.is_empty()).then(|| args.password.clone());
    // Request logging would dominate the measurement.
    config.log_requests = false;
    config.log_replies = false;
    // One extra connection for setup traffic.
    config.pool.max_total = args.concurrency.max(1) + 1;
    config.pool.max_idle = config.pool.max_total;
    Ok(config)
}

fn split_endpoint(raw: &str) -> Option<(String, u16)> {
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
            Some((host.trim_matches(|c| c == '[' || c == ']').to_string(), port.parse().ok()?))
        }
        Some(_) if raw.starts_with('[') => None,
        Some(_) => Some((raw.to_string(), DEFAULT_PORT)),
        None if raw.is_empty() => None,
        None => Some((raw.to_string(), DEFAULT_PORT)),
    }
}

/// Writes the benchmark key, then flushes the database.
fn prepare_dataset(manager: &ConnectionManager<ConnectionPool>, value_size: usize) -> ClientResult<()> {
    let pool = manager.connection()?;
    let mut conn = pool.acquire()?;
    conn.set(KEY, &build_value(value_size, 0x5eed))?;
    conn.flush_all()?;
    info!(peer = %conn.peer(), "dataset prepared");
    Ok(())
}

fn run_trial(
    manager: &Arc<ConnectionManager<ConnectionPool>>,
    concurrency: usize,
    period: Duration,
    value_size: usize,
) -> TrialStats {
    let metrics = Metrics::new();
    let started = Instant::now();
    let deadline = started + period;

    let samples = thread::scope(|scope| {
        let workers: Vec<_> = (0..concurrency.max(1))
            .map(|_| scope.spawn(|| request_loop(manager, &metrics, deadline)))
            .collect();
        workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap_or_default())
            .collect::<Vec<_>>()
    });
    let elapsed = started.elapsed();

    let stats = TrialStats::from_samples(samples, elapsed, value_size)
        .with_counters(&metrics.snapshot());
    info!(
        requests = stats.requests,
        errors = stats.errors,
        p99_upper_us = ?stats.p99_upper_us,
        reconnects = manager.reconnects(),
        "trial finished"
    );
    stats
}

fn request_loop(
    manager: &ConnectionManager<ConnectionPool>,
    metrics: &Metrics,
    deadline: Instant,
) -> Vec<Duration> {
    let mut samples = Vec::new();
    while Instant::now() < deadline {
        let started = Instant::now();
        match fetch_once(manager) {
            Ok(true) => {
                let latency = started.elapsed();
                metrics.record_request(latency);
                samples.push(latency);
            }
            Ok(false) => metrics.record_error(),
            Err(err) => {
                metrics.record_error();
                let outcome = manager.on_error(&err);
                warn!(error = %err, ?outcome, "request failed");
                if err.is_connection_broken() {
                    // Back off instead of spinning on a dead endpoint.
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }
    debug!(requests = samples.len(), "worker finished");
    samples
}

fn fetch_once(manager: &ConnectionManager<ConnectionPool>) -> ClientResult<bool> {
    let pool = manager.connection()?;
    let mut conn = pool.acquire()?;
    conn.get_and_forget(KEY)
}

/// Deterministic filler so repeated runs move identical payloads.
fn build_value(size: usize, seed: u64) -> Vec<u8> {
    let mut rng = XorShift64::new(seed);
    let mut value = Vec::with_capacity(size + 8);
    while value.len() < size {
        value.extend_from_slice(&rng.next_u64().to_le_bytes());
    }
    value.truncate(size);
    value
}

/// Tiny deterministic PRNG used to avoid external dependencies.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}
