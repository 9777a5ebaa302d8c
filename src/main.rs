use dotenv::dotenv;
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};

use resilient_mesh::discovery::{ConsulRegistry, ServiceDiscovery};
use resilient_mesh::{init_logging, MeshConfig, MeshError};

/// Identity this process registers under, read from `MESH_SERVICE_*`
struct ServiceIdentity {
    name: String,
    address: String,
    port: u16,
    health_url: String,
}

impl ServiceIdentity {
    fn from_env() -> Result<Self, MeshError> {
        let name = env::var("MESH_SERVICE_NAME")
            .map_err(|_| MeshError::Config("MESH_SERVICE_NAME is not set".to_string()))?;
        let address = env::var("MESH_SERVICE_ADDRESS").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("MESH_SERVICE_PORT")
            .map_err(|_| MeshError::Config("MESH_SERVICE_PORT is not set".to_string()))?
            .parse::<u16>()
            .map_err(|e| MeshError::Config(format!("invalid MESH_SERVICE_PORT: {}", e)))?;
        let health_url = env::var("MESH_SERVICE_HEALTH_URL").unwrap_or_else(|_| "/health".to_string());

        Ok(Self {
            name,
            address,
            port,
            health_url,
        })
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    if let Err(e) = run().await {
        error!(error = %e, "Mesh agent failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), MeshError> {
    let config = MeshConfig::from_env()?;
    let identity = ServiceIdentity::from_env()?;
    info!(consul = %config.consul.address, service = %identity.name, "Mesh agent starting up");

    let registry = Arc::new(ConsulRegistry::new(&config.consul)?);
    let discovery = ServiceDiscovery::from_config(registry, &config.discovery, &config.registration);

    // a process that cannot register must not start serving
    let id = discovery
        .register(&identity.name, &identity.address, identity.port, &identity.health_url)
        .await?;
    info!(id = %id, "Registered, waiting for shutdown signal");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| MeshError::Internal(format!("failed to listen for shutdown signal: {}", e)))?;

    info!("Shutdown signal received, deregistering");
    if let Err(e) = discovery.shutdown().await {
        warn!(error = %e, "Deregistration failed, the registry will expire the instance");
    }
    Ok(())
}
