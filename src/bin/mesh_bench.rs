// src/bin/mesh_bench.rs

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

use resilient_mesh::discovery::{HealthProbe, InMemoryRegistry, ServiceDiscovery};
use resilient_mesh::resilience::{CircuitBreakerConfig, RetryConfig};
use resilient_mesh::{MeshError, ResilientClient, ServiceRequest, ServiceResponse, Transport};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "mesh_bench",
    about = "Drive simulated traffic through the resilient client against flaky in-process services"
)]
struct Opt {
    /// Number of logical services
    #[structopt(short = "s", long, default_value = "4")]
    services: usize,

    /// Instances registered per service
    #[structopt(short, long, default_value = "3")]
    instances: usize,

    /// Services whose every instance fails
    #[structopt(long, default_value = "1")]
    down: usize,

    /// Probability that a call to a healthy instance returns 503
    #[structopt(short = "f", long, default_value = "0.1")]
    failure_rate: f64,

    /// Simulated latency per attempt in milliseconds
    #[structopt(long, default_value = "2")]
    latency_ms: u64,

    /// Total number of calls
    #[structopt(short = "n", long, default_value = "2000")]
    requests: usize,

    /// Concurrent callers
    #[structopt(short = "c", long, default_value = "32")]
    concurrency: usize,

    /// Consecutive failures that open a breaker
    #[structopt(long, default_value = "5")]
    threshold: usize,

    /// How long a breaker stays open in milliseconds
    #[structopt(long, default_value = "500")]
    open_timeout_ms: u64,

    /// Retries per call
    #[structopt(long, default_value = "2")]
    max_retries: usize,

    /// First retry delay in milliseconds
    #[structopt(long, default_value = "5")]
    retry_initial_ms: u64,

    /// Seed for the simulated failures
    #[structopt(long)]
    seed: Option<u64>,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,
}

/// Transport that answers in-process; hosts in `down` always fail
#[derive(Debug)]
struct FlakyTransport {
    failure_rate: f64,
    latency: Duration,
    down: HashSet<String>,
    rng: Mutex<StdRng>,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn send(&self, request: ServiceRequest) -> resilient_mesh::Result<ServiceResponse> {
        time::sleep(self.latency).await;

        let host = Url::parse(&request.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default();
        if self.down.contains(&host) {
            return Ok(ServiceResponse::new(503, "down"));
        }

        let fail = match self.rng.lock() {
            Ok(mut rng) => rng.random_bool(self.failure_rate),
            Err(_) => false,
        };
        if fail {
            Ok(ServiceResponse::new(503, "busy"))
        } else {
            Ok(ServiceResponse::new(200, "{}"))
        }
    }
}

/// Every simulated instance passes its health check
#[derive(Debug)]
struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn probe(&self, _url: &str) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone)]
struct Tally {
    ok: usize,
    circuit_open: usize,
    retries_exhausted: usize,
    not_found: usize,
    other: usize,
}

impl Tally {
    fn record(&mut self, result: &resilient_mesh::Result<ServiceResponse>) {
        match result {
            Ok(_) => self.ok += 1,
            Err(MeshError::CircuitOpen { .. }) => self.circuit_open += 1,
            Err(MeshError::RetriesExhausted { .. }) => self.retries_exhausted += 1,
            Err(MeshError::ServiceNotFound(_)) => self.not_found += 1,
            Err(_) => self.other += 1,
        }
    }

    fn merge(&mut self, other: &Tally) {
        self.ok += other.ok;
        self.circuit_open += other.circuit_open;
        self.retries_exhausted += other.retries_exhausted;
        self.not_found += other.not_found;
        self.other += other.other;
    }

    fn total(&self) -> usize {
        self.ok + self.circuit_open + self.retries_exhausted + self.not_found + self.other
    }
}

fn host_of(service: usize, instance: usize) -> String {
    format!("10.1.{}.{}", service, instance + 1)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "mesh_bench={},resilient_mesh={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if !(0.0..=1.0).contains(&opt.failure_rate) {
        return Err(format!("failure rate {} is outside 0..=1", opt.failure_rate).into());
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }

    let registry = Arc::new(InMemoryRegistry::with_probe(Arc::new(AlwaysHealthy)));
    let discovery = Arc::new(ServiceDiscovery::new(registry.clone()));

    let mut down = HashSet::new();
    for service in 0..opt.services {
        for instance in 0..opt.instances {
            let host = host_of(service, instance);
            discovery
                .register(&format!("svc-{}", service), &host, 8080, "/health")
                .await?;
            if service < opt.down {
                down.insert(host);
            }
        }
    }
    // give every checker its first pass
    time::sleep(Duration::from_millis(50)).await;
    info!(
        registrations = registry.registrations().len(),
        "Registered simulated instances"
    );

    let rng = match opt.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let transport = Arc::new(FlakyTransport {
        failure_rate: opt.failure_rate,
        latency: Duration::from_millis(opt.latency_ms),
        down,
        rng: Mutex::new(rng),
    });

    let client = Arc::new(ResilientClient::new(
        discovery,
        transport,
        CircuitBreakerConfig {
            failure_threshold: opt.threshold,
            open_timeout: Duration::from_millis(opt.open_timeout_ms),
        },
        RetryConfig {
            max_retries: opt.max_retries,
            initial_backoff: Duration::from_millis(opt.retry_initial_ms),
            max_backoff: Duration::from_millis(opt.retry_initial_ms * 8),
            use_jitter: true,
            ..RetryConfig::default()
        },
    ));

    let progress = ProgressBar::new(opt.requests as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("=>-"),
    );

    let next = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::with_capacity(opt.concurrency);

    for _ in 0..opt.concurrency.max(1) {
        let client = Arc::clone(&client);
        let next = Arc::clone(&next);
        let stop = Arc::clone(&stop);
        let progress = progress.clone();
        let total = opt.requests;
        let services = opt.services.max(1);

        handles.push(tokio::spawn(async move {
            let mut tally = Tally::default();
            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let i = next.fetch_add(1, Ordering::SeqCst);
                if i >= total {
                    break;
                }
                let service = format!("svc-{}", i % services);
                let result = client.get(&service, "/api/work").await;
                tally.record(&result);
                progress.inc(1);
            }
            tally
        }));
    }

    let mut tally = Tally::default();
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(worker) => tally.merge(&worker),
            Err(e) => warn!("Worker task failed: {}", e),
        }
    }
    progress.finish();
    let elapsed = start.elapsed();

    if stop.load(Ordering::SeqCst) {
        println!("\nInterrupted after {} calls", tally.total());
    }

    let total = tally.total().max(1) as f64;
    let mut outcomes = Table::new();
    outcomes.add_row(row!["Outcome", "Calls", "Share"]);
    for (label, count) in [
        ("ok", tally.ok),
        ("circuit open", tally.circuit_open),
        ("retries exhausted", tally.retries_exhausted),
        ("not found", tally.not_found),
        ("other", tally.other),
    ] {
        outcomes.add_row(row![label, count, format!("{:.1}%", 100.0 * count as f64 / total)]);
    }
    outcomes.printstd();

    let mut breakers = Table::new();
    breakers.add_row(row!["Destination", "State", "Failures"]);
    for snapshot in client.breaker_states() {
        breakers.add_row(row![snapshot.name, format!("{:?}", snapshot.state), snapshot.failure_count]);
    }
    breakers.printstd();

    println!(
        "{} calls in {:?} ({:.2} calls/sec)",
        tally.total(),
        elapsed,
        tally.total() as f64 / elapsed.as_secs_f64()
    );

    Ok(())
}
