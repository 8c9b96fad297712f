use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use session_sync::identity::{Identity, LocalSessionSource, SessionStore, TracingSink};
use session_sync::{SessionError, SessionStoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("building log filter")?;
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let config = SessionStoreConfig::from_env().map_err(SessionError::from).map_err(|e| {
        e.report("reading session store config from environment");
        e
    })?;
    info!(target: "startup", "session-sync demo starting: RUST_LOG='{}', config={:?}", rust_log, config);

    let source = LocalSessionSource::with_identity(
        Identity::new(uuid::Uuid::new_v4().to_string())
            .with_email("demo@example.com")
            .with_name("Demo User"),
    );
    let store = SessionStore::start(&source, Arc::new(TracingSink), config)?;
    let reader = store.reader();

    let initial = reader.wait_resolved().await;
    info!(target: "startup", "resolved: {}", serde_json::to_string(&initial)?);

    let mut changes = reader.subscribe();
    source.sign_out();
    changes.changed().await?;
    info!(target: "startup", "after sign-out: {}", serde_json::to_string(&*changes.borrow())?);

    source.sign_in(Identity::new(uuid::Uuid::new_v4().to_string()).with_name("Second User"));
    changes.changed().await?;
    info!(target: "startup", "after sign-in: {}", serde_json::to_string(&*changes.borrow())?);

    store.teardown();
    info!(target: "startup", "subscribers remaining after teardown: {}", source.subscriber_count());
    Ok(())
}
