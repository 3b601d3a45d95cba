use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::task::JoinHandle;

use loadlab_core::sampler::MetricsSource;
use loadlab_core::supervisor::Supervisor;

use crate::handlers;

#[derive(Clone)]
pub struct ApiServer {
    pub supervisor: Arc<Supervisor>,
    pub metrics: Arc<dyn MetricsSource>,
}

impl ApiServer {
    pub fn new(supervisor: Arc<Supervisor>, metrics: Arc<dyn MetricsSource>) -> Self {
        Self {
            supervisor,
            metrics,
        }
    }

    pub async fn serve(self, addr: SocketAddr) -> JoinHandle<()> {
        let router = build_router(self);
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .expect("bind address");
            axum::serve(listener, router).await.expect("server error");
        })
    }
}

pub fn build_router(api: ApiServer) -> Router {
    let cors = tower_http::cors::CorsLayer::very_permissive();
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/metrics", get(handlers::metrics))
        .route("/api/dummy", get(handlers::dummy))
        .route("/api/actions/cpu-stress", post(handlers::start_cpu_stress))
        .route(
            "/api/actions/memory-surge",
            post(handlers::start_memory_surge),
        )
        .route("/api/actions/disk-storm", post(handlers::start_disk_storm))
        .route(
            "/api/actions/traffic-flood",
            post(handlers::start_traffic_flood),
        )
        .route("/api/actions/active", get(handlers::active_actions))
        .route("/api/actions/{id}/stop", delete(handlers::stop_action))
        .with_state(api)
        .layer(cors)
}
