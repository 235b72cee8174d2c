use crate::cli::ServeArgs;
use crate::infra::{build_registration_service, ApiRegistrationService, AppState};
use crate::routes::with_registration_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use member_registration::config::AppConfig;
use member_registration::error::AppError;
use member_registration::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

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

    let registration_service = build_registration_service(&config.registration);
    let flush_interval = config
        .registration
        .policy()
        .autosave_window
        .to_std()
        .unwrap_or(MIN_FLUSH_INTERVAL)
        .max(MIN_FLUSH_INTERVAL);
    spawn_autosave_flusher(Arc::clone(&registration_service), flush_interval);

    let app = with_registration_routes(registration_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "member registration service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodically write drafts whose debounce window has elapsed and drop idle sessions.
fn spawn_autosave_flusher(service: Arc<ApiRegistrationService>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let saved = service.flush_autosaves();
            if saved > 0 {
                debug!(saved, "registration drafts autosaved");
            }
            let evicted = service.evict_idle_sessions();
            if evicted > 0 {
                info!(
                    evicted,
                    remaining = service.session_count(),
                    "idle registration sessions evicted"
                );
            }
        }
    });
}
