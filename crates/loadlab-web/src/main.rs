use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use loadlab_core::sampler::Sampler;
use loadlab_core::supervisor::{self, Supervisor};

use loadlab_web::api::ApiServer;

const SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "loadlab-web", about = "Serve the loadlab metrics and load-action API")]
struct Args {
    /// Address to bind (e.g., 0.0.0.0:8080)
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,
    /// Host metrics sampling period in milliseconds
    #[arg(long, default_value_t = 1000)]
    sample_period_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let sampler = Sampler::new();
    sampler.start(Duration::from_millis(args.sample_period_ms));
    info!("Metrics sampler started (period: {}ms)", args.sample_period_ms);

    let supervisor = Supervisor::new(sampler.clone());
    supervisor.start_sweeper(SWEEP_PERIOD);
    info!("Action supervisor initialized with safety limits:");
    info!(
        "  - Max CPU: {}%, critical: {}%",
        supervisor::MAX_CPU_PERCENT,
        supervisor::CRITICAL_CPU
    );
    info!(
        "  - Max memory: {}%, critical: {}%",
        supervisor::MAX_MEMORY_PERCENT,
        supervisor::CRITICAL_MEMORY
    );
    info!("  - Max concurrent actions: {}", supervisor::MAX_CONCURRENT);

    let addr: SocketAddr = args.addr.parse().expect("invalid address");
    let server = ApiServer::new(supervisor, sampler);
    server.serve(addr).await;
    info!("Serving on http://{}", addr);
    futures::future::pending::<()>().await;
    Ok(())
}
