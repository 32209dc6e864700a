//! Integration tests for change stream handling.

use std::sync::Arc;
use std::time::Duration;

use livefeed_client::{
    ChangeEvent, Filter, MemoryBackend, RemoteWriter, RowMapping, SyncCondition, SyncConfig,
    Synchronizer,
};
use serde_json::json;

async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

fn setup() -> (Arc<MemoryBackend>, Synchronizer) {
    let backend = MemoryBackend::new_shared();
    let sync = Synchronizer::new(backend.clone(), SyncConfig::default());
    (backend, sync)
}

#[cfg(test)]
mod interruption_tests {
    use super::*;

    #[tokio::test]
    async fn test_interruption_is_reported() {
        let (backend, sync) = setup();
        let mut tasks = sync.open("tasks", Filter::All).unwrap();
        within(tasks.wait_for(|v| v.is_ready())).await.unwrap();

        assert_eq!(backend.interrupt("tasks", "network lost"), 1);
        let condition = within(tasks.next_condition()).await.unwrap();
        assert_eq!(
            condition,
            SyncCondition::StreamInterrupted {
                collection: "tasks".into(),
                reason: "network lost".into(),
            }
        );

        // The view stays readable, just stale
        backend.insert("tasks", json!({"title": "missed"})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tasks.view().is_ready());
        assert!(tasks.view().is_empty());
    }

    #[tokio::test]
    async fn test_reattach_recovers_missed_events() {
        let (backend, sync) = setup();
        let gone = backend.insert("tasks", json!({"title": "gone"})).await.unwrap();

        let mut tasks = sync.open("tasks", Filter::All).unwrap();
        within(tasks.wait_for(|v| v.len() == 1)).await.unwrap();

        backend.interrupt("tasks", "network lost");
        within(tasks.next_condition()).await.unwrap();

        let missed = backend.insert("tasks", json!({"title": "missed"})).await.unwrap();
        backend.remove("tasks", &gone.id).await.unwrap();

        within(tasks.reattach()).await.unwrap();
        assert_eq!(backend.subscriber_count("tasks"), 1);

        let view = within(tasks.wait_for(|v| v.is_ready() && v.get(&missed.id).is_some()))
            .await
            .unwrap();
        assert_eq!(view.ids(), vec![missed.id.as_str()]);

        // Live again
        let live = backend.insert("tasks", json!({"title": "live"})).await.unwrap();
        let view = within(tasks.wait_for(|v| v.len() == 2)).await.unwrap();
        assert_eq!(view.ids(), vec![missed.id.as_str(), live.id.as_str()]);
    }

    #[tokio::test]
    async fn test_reattach_replaces_live_stream() {
        let (backend, sync) = setup();
        let mut tasks = sync.open("tasks", Filter::All).unwrap();
        within(tasks.wait_for(|v| v.is_ready())).await.unwrap();

        within(tasks.reattach()).await.unwrap();
        assert_eq!(backend.subscriber_count("tasks"), 1);
        assert!(tasks.try_condition().is_none());
    }
}

#[cfg(test)]
mod row_change_tests {
    use super::*;

    #[tokio::test]
    async fn test_row_changes_feed_the_view() {
        let (backend, sync) = setup();
        let mapping = RowMapping::default();
        let mut messages = sync.open("messages", Filter::eq("task_id", 4)).unwrap();
        within(messages.wait_for(|v| v.is_ready())).await.unwrap();

        let rows = [
            r#"{"eventType": "INSERT", "table": "messages",
                "new": {"id": 2, "task_id": 4, "created_at": "2024-05-01T10:00:05Z"}}"#,
            r#"{"eventType": "INSERT", "table": "messages",
                "new": {"id": 1, "task_id": 4, "created_at": "2024-05-01T10:00:00Z"}}"#,
            r#"{"eventType": "INSERT", "table": "messages",
                "new": {"id": 3, "task_id": 9, "created_at": "2024-05-01T10:00:01Z"}}"#,
        ];
        for row in rows {
            backend.emit("messages", mapping.decode(row).unwrap());
        }

        let view = within(messages.wait_for(|v| v.len() == 2)).await.unwrap();
        assert_eq!(view.ids(), vec!["1", "2"]);

        let delete = mapping
            .decode(r#"{"eventType": "DELETE", "table": "messages", "old": {"id": 1}}"#)
            .unwrap();
        assert_eq!(delete, ChangeEvent::deleted("1"));
        backend.emit("messages", delete);

        let view = within(messages.wait_for(|v| v.len() == 1)).await.unwrap();
        assert_eq!(view.ids(), vec!["2"]);
    }
}
