use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use studio_booking_backend::api::{build_router, AppState};
use studio_booking_backend::config::AppConfig;
use studio_booking_backend::database::booking_repository::BookingRepository;
use studio_booking_backend::database::memory::InMemoryStore;
use studio_booking_backend::database::store::BookingStore;
use studio_booking_backend::database::{init_pool_from_config, run_migrations};
use studio_booking_backend::health::HealthChecker;
use studio_booking_backend::logging::{init_tracing, mask_identifier};
use studio_booking_backend::payments::gateway::{OfflineGateway, PaymentGateway, RazorpayGateway};
use studio_booking_backend::payments::signature::SignatureVerifier;
use studio_booking_backend::services::booking_state::BookingStateMachine;
use studio_booking_backend::services::notification::NotificationService;
use studio_booking_backend::services::order_resolver::OrderResolver;
use studio_booking_backend::services::order_service::OrderService;
use studio_booking_backend::services::slot_conflict::SlotConflictChecker;
use studio_booking_backend::services::webhook_processor::WebhookProcessor;
use studio_booking_backend::workers::reconciliation::ReconciliationSweeper;
use studio_booking_backend::workers::webhook_dispatch::WebhookDispatcher;
use studio_booking_backend::workers::webhook_retry::WebhookRetryWorker;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        skip_externals = config.skip_externals,
        "🚀 Starting studio booking backend"
    );

    let store: Arc<dyn BookingStore> = if config.skip_externals {
        info!("⏭️  Using in-memory store (SKIP_EXTERNALS=true)");
        Arc::new(InMemoryStore::new())
    } else {
        info!("📊 Initializing database connection pool...");
        let pool = init_pool_from_config(&config.database).await.map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
        run_migrations(&pool).await?;
        info!(
            max_connections = pool.options().get_max_connections(),
            "✅ Database ready"
        );
        Arc::new(BookingRepository::new(pool))
    };

    let gateway: Arc<dyn PaymentGateway> = if config.skip_externals {
        info!("⏭️  Using offline payment gateway (SKIP_EXTERNALS=true)");
        Arc::new(OfflineGateway::new(config.gateway.key_id.clone()))
    } else {
        Arc::new(RazorpayGateway::from_config(&config.gateway)?)
    };
    info!(
        key_id = %mask_identifier(gateway.key_id()),
        base_url = %config.gateway.base_url,
        "Payment gateway configured"
    );

    let verifier = SignatureVerifier::new(&config.gateway.webhook_secret)?;
    let notifier = Arc::new(NotificationService::new());
    let state_machine = Arc::new(BookingStateMachine::new(store.clone(), notifier.clone()));
    let resolver = Arc::new(OrderResolver::new(store.clone(), gateway.clone()));
    let processor = Arc::new(WebhookProcessor::new(
        verifier,
        store.clone(),
        resolver,
        state_machine.clone(),
        notifier,
    ));
    let order_service = Arc::new(OrderService::new(
        store.clone(),
        gateway.clone(),
        config.gateway.default_currency.clone(),
    ));
    let sweeper = Arc::new(ReconciliationSweeper::new(
        store.clone(),
        state_machine,
        gateway,
        config.reconcile.clone(),
    ));

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let (dispatcher, mut worker_handles) =
        WebhookDispatcher::start(processor.clone(), &config.workers, worker_shutdown_rx.clone());
    let dispatcher = Arc::new(dispatcher);

    if config.workers.retry_enabled {
        let retry_worker = WebhookRetryWorker::new(processor.clone(), &config.workers);
        worker_handles.push(tokio::spawn(retry_worker.run(worker_shutdown_rx.clone())));
        info!("✅ Webhook retry worker started");
    } else {
        info!("Webhook retry worker disabled (WEBHOOK_RETRY_ENABLED=false)");
    }

    if config.reconcile.enabled {
        worker_handles.push(tokio::spawn(sweeper.clone().run(worker_shutdown_rx.clone())));
        info!("✅ Reconciliation sweeper started");
    } else {
        info!("Reconciliation sweeper disabled (RECONCILE_ENABLED=false)");
    }

    let health_checker = HealthChecker::new(store.clone()).with_dispatcher(dispatcher.clone());
    let app = build_router(AppState {
        slot_checker: Arc::new(SlotConflictChecker::new(store.clone())),
        store,
        processor,
        dispatcher,
        order_service,
        sweeper,
        health_checker,
        confirmation_max_wait: Duration::from_secs(config.server.confirmation_max_wait_secs),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    for handle in worker_handles {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            warn!("Timed out waiting for a background worker to stop");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
