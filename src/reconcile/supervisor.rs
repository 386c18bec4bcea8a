//! Polling Task Supervisor
//!
//! Registry of per-intent polling tasks, keyed by intent id, so tasks can
//! be cancelled when an intent settles early and awaited in tests and on
//! shutdown.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Tracks the background polling task for each pending intent
#[derive(Default)]
pub struct TaskSupervisor {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under an intent id. A previous task registered
    /// under the same id is aborted.
    pub async fn register(&self, intent_id: &str, handle: JoinHandle<()>) {
        if handle.is_finished() {
            // The task ran to completion before registration; its own
            // cleanup already happened
            return;
        }
        let mut tasks = self.tasks.lock().await;
        if let Some(old) = tasks.insert(intent_id.to_string(), handle) {
            old.abort();
        }
    }

    /// Drop a finished task's handle. Called by the task itself on exit.
    pub async fn forget(&self, intent_id: &str) {
        self.tasks.lock().await.remove(intent_id);
    }

    /// Abort the task for an intent, if one is still registered
    pub async fn cancel(&self, intent_id: &str) {
        if let Some(handle) = self.tasks.lock().await.remove(intent_id) {
            handle.abort();
        }
    }

    /// Take ownership of a task's handle so the caller can await it
    pub async fn take(&self, intent_id: &str) -> Option<JoinHandle<()>> {
        self.tasks.lock().await.remove(intent_id)
    }

    /// Number of registered tasks that have not finished
    pub async fn active(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Abort every registered task
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parked_task() -> JoinHandle<()> {
        tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
    }

    #[tokio::test]
    async fn test_register_take_and_await() {
        let supervisor = TaskSupervisor::new();

        supervisor.register("pi_1", tokio::spawn(async {})).await;
        // An instantly-finished task may or may not still be registered;
        // awaiting through take must not hang either way
        if let Some(handle) = supervisor.take("pi_1").await {
            handle.await.unwrap();
        }

        assert!(supervisor.take("pi_1").await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_aborts_registered_task() {
        let supervisor = TaskSupervisor::new();
        supervisor.register("pi_1", parked_task()).await;
        assert_eq!(supervisor.active().await, 1);

        supervisor.cancel("pi_1").await;
        assert_eq!(supervisor.active().await, 0);
        assert!(supervisor.take("pi_1").await.is_none());
    }

    #[tokio::test]
    async fn test_reregister_aborts_previous_task() {
        let supervisor = TaskSupervisor::new();
        supervisor.register("pi_1", parked_task()).await;

        let replacement = parked_task();
        supervisor.register("pi_1", replacement).await;
        assert_eq!(supervisor.active().await, 1);

        supervisor.shutdown().await;
        assert_eq!(supervisor.active().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_everything() {
        let supervisor = TaskSupervisor::new();
        supervisor.register("pi_1", parked_task()).await;
        supervisor.register("pi_2", parked_task()).await;
        assert_eq!(supervisor.active().await, 2);

        supervisor.shutdown().await;
        assert_eq!(supervisor.active().await, 0);
    }
}
