use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xlpilot_core::{Copilot, Settings};
use xlpilot_http::{router, AppState};
use xlpilot_receipts::ReceiptLog;
use xlpilot_store::InMemoryTableStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xlpilot=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load()?;
    if settings.planner.stub {
        warn!("planner stub enabled; every refinement round will fail");
    } else if settings.planner.deterministic {
        info!(seed = ?settings.planner.seed, "planner deterministic preset enabled");
    }

    let receipts = match &settings.receipts_file {
        Some(path) => Some(Arc::new(ReceiptLog::open(path)?)),
        None => None,
    };
    let planner = settings.plan_generator();
    let bind_addr = settings.bind_addr.clone();

    let copilot = Arc::new(Copilot::new(
        settings,
        Arc::new(InMemoryTableStore::new()),
        planner,
        receipts,
    ));
    copilot.spawn_sweeper();

    let app = router(AppState { copilot });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "xlpilot HTTP server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
