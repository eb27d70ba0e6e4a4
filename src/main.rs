//! `ledger-sync` - runs the daily projection sync once and exits.
//!
//! Schedule it with cron or a systemd timer. Exits non-zero when any template
//! failed to sync; the healthy templates are still committed.

use chrono::Utc;
use dotenvy::dotenv;
use ledger_core::{
    config::{Settings, database},
    core::projection,
    errors::{Error, Result},
    events::{EventPublisher, LogSink, spawn_dispatcher},
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file, non-fatal since env vars can be set externally
    dotenv().ok();

    // 3. Load settings
    let settings = Settings::load_from_env()
        .inspect_err(|e| error!("Failed to load settings: {}", e))?;

    // 4. Connect and make sure the schema exists
    let database_url = database::get_database_url();
    if database_url == database::DEFAULT_DATABASE_URL {
        std::fs::create_dir_all("data")?;
    }
    let db = database::create_connection(&database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db).await?;
    info!("Database ready");

    // 5. Events go to the log
    let (events, receiver) = EventPublisher::channel(settings.events.queue_capacity);
    let dispatcher = spawn_dispatcher(receiver, Arc::new(LogSink));

    // 6. Sync every template
    let today = Utc::now().date_naive();
    let outcome = projection::sync_all(&db, &events, &settings, today).await;
    drop(events);
    if let Ok(delivered) = dispatcher.await {
        info!("Delivered {} events", delivered);
    }

    match outcome {
        Ok(report) => {
            info!(
                "Synced {} templates, created {} entries",
                report.templates_processed, report.entries_created
            );
            Ok(())
        }
        Err(Error::SyncIncomplete {
            total,
            entries_created,
            failures,
        }) => {
            for failure in &failures {
                error!(
                    "Template {} in workspace {} failed: {}",
                    failure.template_id, failure.workspace_id, failure.error
                );
            }
            Err(Error::SyncIncomplete {
                total,
                entries_created,
                failures,
            })
        }
        Err(e) => Err(e),
    }
}
