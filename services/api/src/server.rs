use crate::cli::ServeArgs;
use crate::infra::{issue_bootstrap_key, platform_from_config, AppState};
use crate::routes::with_platform_routes;
use accredit::config::AppConfig;
use accredit::error::AppError;
use accredit::telemetry;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

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

    let api = platform_from_config(&config)?;
    let bootstrap = issue_bootstrap_key(&api, &args.bootstrap_service)?;
    info!(
        key_id = %bootstrap.id,
        prefix = %bootstrap.display_prefix,
        "bootstrap super-admin key issued"
    );
    // The raw key is shown exactly once; only its digest is retained.
    println!("bootstrap super-admin key: {}", bootstrap.key);

    let app = with_platform_routes(api)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "accreditation compliance service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
