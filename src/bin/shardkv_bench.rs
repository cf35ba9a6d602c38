use anyhow::{Context, Result, anyhow};
use clap::Parser;
use futures::future::join_all;
use shardkv::cluster::http_base_url;
use shardkv::stable_shard_for;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Parser, Debug, Clone)]
#[command(name = "shardkv-bench")]
#[command(about = "Write/read load generator for a shardkv cluster")]
struct Cli {
    /// Comma-separated shard owner addresses, in shard index order.
    #[arg(long, default_value = "localhost:8080", value_delimiter = ',')]
    shard_addrs: Vec<String>,

    /// Writes per worker.
    #[arg(long, default_value_t = 1000)]
    iterations: usize,

    /// Reads per worker.
    #[arg(long, default_value_t = 10000)]
    read_iterations: usize,

    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    #[arg(long, default_value_t = 5000)]
    request_timeout_ms: u64,
}

struct Target {
    client: reqwest::Client,
    base_urls: Vec<String>,
}

impl Target {
    fn url_for(&self, key: &str, path: &str) -> String {
        let shard = stable_shard_for(key.as_bytes(), self.base_urls.len() as u32) as usize;
        format!("{}{}", self.base_urls[shard], path)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.client
            .get(self.url_for(key, "/set"))
            .query(&[("key", key), ("value", value)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<()> {
        self.client
            .get(self.url_for(key, "/get"))
            .query(&[("key", key)])
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(())
    }
}

struct PhaseReport {
    name: &'static str,
    ops: u64,
    errors: u64,
    elapsed: Duration,
    latencies_us: Vec<u64>,
}

impl PhaseReport {
    fn print(&mut self) {
        self.latencies_us.sort_unstable();
        let elapsed = self.elapsed.as_secs_f64().max(0.001);
        let avg = if self.latencies_us.is_empty() {
            0
        } else {
            self.latencies_us.iter().sum::<u64>() / self.latencies_us.len() as u64
        };
        println!("{} results:", self.name);
        println!("  duration_s: {:.2}", elapsed);
        println!("  ops: {}", self.ops);
        println!("  error_ops: {}", self.errors);
        println!("  qps: {:.2}", self.ops as f64 / elapsed);
        println!("  latency_us_avg: {}", avg);
        println!("  latency_us_min: {}", self.latencies_us.first().copied().unwrap_or(0));
        println!("  latency_us_max: {}", self.latencies_us.last().copied().unwrap_or(0));
        println!("  latency_us_p50: {}", percentile(&self.latencies_us, 0.50));
        println!("  latency_us_p95: {}", percentile(&self.latencies_us, 0.95));
        println!("  latency_us_p99: {}", percentile(&self.latencies_us, 0.99));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.shard_addrs.iter().all(|addr| addr.trim().is_empty()) {
        return Err(anyhow!("--shard-addrs must list at least one address"));
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(cli.request_timeout_ms))
        .build()
        .context("failed to build HTTP client")?;
    let target = Arc::new(Target {
        client,
        base_urls: cli.shard_addrs.iter().map(|a| http_base_url(a.trim())).collect(),
    });

    let (mut write_report, keys) = write_phase(&target, &cli).await?;
    write_report.print();
    if keys.is_empty() {
        return Err(anyhow!("no key was written, nothing to read back"));
    }

    let mut read_report = read_phase(&target, &cli, Arc::new(keys)).await?;
    read_report.print();
    Ok(())
}

async fn write_phase(target: &Arc<Target>, cli: &Cli) -> Result<(PhaseReport, Vec<String>)> {
    let ops = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));
    let start = Instant::now();
    let mut handles = Vec::with_capacity(cli.concurrency);

    for worker_id in 0..cli.concurrency.max(1) {
        let target = target.clone();
        let ops = ops.clone();
        let errors = errors.clone();
        let iterations = cli.iterations;
        let mut rng = Lcg64::new(0x9e3779b97f4a7c15 ^ worker_id as u64);
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(iterations);
            let mut keys = Vec::with_capacity(iterations);
            for _ in 0..iterations {
                let key = format!("key-{}", rng.next_u64() % 1_000_000);
                let value = format!("value-{}", rng.next_u64() % 1_000_000);
                let op_start = Instant::now();
                match target.set(&key, &value).await {
                    Ok(()) => {
                        ops.fetch_add(1, Ordering::Relaxed);
                        keys.push(key);
                    }
                    Err(_) => {
                        errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                latencies.push(op_start.elapsed().as_micros() as u64);
            }
            (latencies, keys)
        }));
    }

    let mut latencies_us = Vec::new();
    let mut keys = Vec::new();
    for result in join_all(handles).await {
        let (mut worker_latencies, mut worker_keys) = result?;
        latencies_us.append(&mut worker_latencies);
        keys.append(&mut worker_keys);
    }

    let report = PhaseReport {
        name: "write",
        ops: ops.load(Ordering::Relaxed),
        errors: errors.load(Ordering::Relaxed),
        elapsed: start.elapsed(),
        latencies_us,
    };
    Ok((report, keys))
}

async fn read_phase(
    target: &Arc<Target>,
    cli: &Cli,
    keys: Arc<Vec<String>>,
) -> Result<PhaseReport> {
    let ops = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));
    let start = Instant::now();
    let mut handles = Vec::with_capacity(cli.concurrency);

    for worker_id in 0..cli.concurrency.max(1) {
        let target = target.clone();
        let keys = keys.clone();
        let ops = ops.clone();
        let errors = errors.clone();
        let iterations = cli.read_iterations;
        let mut rng = Lcg64::new(0xda942042e4dd58b5 ^ worker_id as u64);
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(iterations);
            for _ in 0..iterations {
                let key = &keys[(rng.next_u64() % keys.len() as u64) as usize];
                let op_start = Instant::now();
                match target.get(key).await {
                    Ok(()) => ops.fetch_add(1, Ordering::Relaxed),
                    Err(_) => errors.fetch_add(1, Ordering::Relaxed),
                };
                latencies.push(op_start.elapsed().as_micros() as u64);
            }
            latencies
        }));
    }

    let mut latencies_us = Vec::new();
    for result in join_all(handles).await {
        latencies_us.append(&mut result?);
    }

    Ok(PhaseReport {
        name: "read",
        ops: ops.load(Ordering::Relaxed),
        errors: errors.load(Ordering::Relaxed),
        elapsed: start.elapsed(),
        latencies_us,
    })
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx]
}

struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }
}
