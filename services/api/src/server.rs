use crate::cli::ServeArgs;
use crate::infra::{AppState, FileCertificateRenderer};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use clearance::auth::Authenticator;
use clearance::config::AppConfig;
use clearance::error::AppError;
use clearance::telemetry;
use clearance::workflows::clearance::{
    ClearanceService, InMemoryClearanceStore, NotificationDispatcher, NotificationHub,
    QueuedPublisher,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

const BOOTSTRAP_ADMIN_NAME: &str = "Registrar Administrator";

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryClearanceStore::default());
    let (publisher, events) = QueuedPublisher::channel();
    let hub = NotificationHub::default();
    tokio::spawn(NotificationDispatcher::new(store.clone(), hub).run(events));

    let renderer = Arc::new(FileCertificateRenderer::new(
        config.clearance.certificate_dir.clone(),
    ));
    let authenticator = Authenticator::new(&config.auth)?;
    let service = Arc::new(ClearanceService::new(
        store,
        Arc::new(publisher),
        renderer,
        authenticator,
    ));

    match &config.clearance.bootstrap_admin {
        Some(admin) => {
            let staff =
                service.bootstrap_admin(BOOTSTRAP_ADMIN_NAME, &admin.email, &admin.password)?;
            info!(admin = %staff.id.0, email = %staff.email, "bootstrap administrator available");
        }
        None => warn!("no bootstrap administrator configured; accounts cannot be registered"),
    }

    let app = with_service_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "graduation clearance service ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(readiness_flag))
        .await?;
    info!("graduation clearance service stopped");
    Ok(())
}

async fn shutdown_signal(readiness: Arc<std::sync::atomic::AtomicBool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    readiness.store(false, Ordering::Release);
    info!("shutdown requested, draining connections");
}
