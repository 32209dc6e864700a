//! Livefeed demo - opens a live task board over the in-memory backend.
//!
//! Seeds a few tasks, opens a view of the open ones, submits a new task
//! optimistically and prints the board as it changes.


use livefeed_client::{Filter, MemoryBackend, RemoteWriter, SyncConfig, Synchronizer};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livefeed_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = SyncConfig::from_env()?;
    let correlation_field = config.correlation_field.clone();

    let backend = MemoryBackend::new_shared();
    for (title, status) in [
        ("Fix the garden fence", "open"),
        ("Translate a menu", "assigned"),
        ("Logo for a bakery", "open"),
    ] {
        backend
            .insert("tasks", json!({"title": title, "status": status}))
            .await?;
    }

    let sync = Synchronizer::new(backend.clone(), config);
    let mut board = sync.open("tasks", Filter::eq("status", "open"))?;

    let view = board.wait_for(|v| v.is_ready()).await?;
    tracing::info!(tasks = view.len(), "Board loaded");

    let token = uuid::Uuid::new_v4().to_string();
    let submitted = board
        .submit(json!({
            "title": "Assemble a wardrobe",
            "status": "open",
            correlation_field: token,
        }))
        .await?;
    tracing::info!(local_id = %submitted.local_id, id = %submitted.id, "Task submitted");

    let view = board
        .wait_for(|v| v.get(&submitted.id).is_some() && v.pending == 0)
        .await?;
    for task in view.records() {
        tracing::info!(
            id = %task.id,
            sequence = task.sequence,
            title = %task.payload["title"],
            "Open task"
        );
    }

    board.close().await;
    Ok(())
}
