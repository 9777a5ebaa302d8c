// src/bin/mesh_cli.rs

use prettytable::{row, Table};
use std::sync::Arc;
use std::time::Instant;
use structopt::StructOpt;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use resilient_mesh::discovery::{ConsulRegistry, ServiceDiscovery};
use resilient_mesh::transport::ReqwestTransport;
use resilient_mesh::{MeshConfig, ResilientClient};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "mesh_cli",
    about = "Register, resolve and call services through the resilient mesh"
)]
struct Opt {
    /// Consul agent address, overrides MESH_CONSUL_ADDR
    #[structopt(long)]
    consul: Option<String>,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Register an instance with its HTTP health check
    Register {
        #[structopt(short, long)]
        name: String,

        #[structopt(short, long, default_value = "127.0.0.1")]
        address: String,

        #[structopt(short, long)]
        port: u16,

        /// Absolute URL or a path on the instance
        #[structopt(long, default_value = "/health")]
        health_url: String,
    },

    /// Remove a registration by id
    Deregister { id: String },

    /// Pick one healthy instance of a service
    Resolve { name: String },

    /// List every healthy instance of a service
    Instances { name: String },

    /// Call a service through discovery, breaker and retries
    Get {
        service: String,

        #[structopt(default_value = "/")]
        path: String,

        /// Number of calls to make
        #[structopt(short = "n", long, default_value = "1")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let opt = Opt::from_args();

    let log_level = if opt.disable_logs {
        "error"
    } else {
        match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "mesh_cli={},resilient_mesh={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = MeshConfig::from_env()?;
    if let Some(address) = &opt.consul {
        config.consul.address = address.clone();
    }

    let registry = Arc::new(ConsulRegistry::new(&config.consul)?);
    let discovery = Arc::new(ServiceDiscovery::from_config(
        registry,
        &config.discovery,
        &config.registration,
    ));

    match opt.command {
        Command::Register {
            name,
            address,
            port,
            health_url,
        } => {
            let id = discovery.register(&name, &address, port, &health_url).await?;
            println!("Registered {}", id);
        }
        Command::Deregister { id } => {
            discovery.deregister(&id).await?;
            println!("Deregistered {}", id);
        }
        Command::Resolve { name } => {
            let endpoint = discovery.resolve(&name).await?;
            println!("{}", endpoint.base_url());
        }
        Command::Instances { name } => {
            let endpoints = discovery.resolve_all(&name).await?;

            let mut table = Table::new();
            table.add_row(row!["#", "Address", "Port", "URL"]);
            for (i, endpoint) in endpoints.iter().enumerate() {
                table.add_row(row![i + 1, endpoint.address, endpoint.port, endpoint.base_url()]);
            }
            table.printstd();
        }
        Command::Get {
            service,
            path,
            count,
        } => {
            let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);
            let client = ResilientClient::from_config(discovery, transport, &config);
            run_calls(&client, &service, &path, count).await;
        }
    }

    Ok(())
}

async fn run_calls(client: &ResilientClient, service: &str, path: &str, count: usize) {
    let mut table = Table::new();
    table.add_row(row!["Call", "Outcome", "Elapsed"]);

    for i in 0..count {
        let start = Instant::now();
        let outcome = match client.get(service, path).await {
            Ok(response) => {
                info!(status = response.status, "Call {} succeeded", i + 1);
                format!("{} {}", response.status, truncate(&response.text(), 60))
            }
            Err(e) => {
                warn!(error = %e, "Call {} failed", i + 1);
                e.to_string()
            }
        };
        table.add_row(row![i + 1, outcome, format!("{:?}", start.elapsed())]);
    }
    table.printstd();

    let mut breakers = Table::new();
    breakers.add_row(row!["Destination", "State", "Failures"]);
    for snapshot in client.breaker_states() {
        breakers.add_row(row![snapshot.name, format!("{:?}", snapshot.state), snapshot.failure_count]);
    }
    breakers.printstd();
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut short: String = text.chars().take(max).collect();
        short.push('…');
        short
    }
}
