//! In-process task scheduler: recurring task handlers fire on
//! their own cadence, ad-hoc tasks are dispatched as one-shots. A handler
//! failure is logged and the task considered done — there is no automatic
//! retry in the core.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// A recurring cadence for a task handler.
#[derive(Debug, Clone)]
pub struct TaskSchedule {
    pub interval_seconds: u64,
    pub default_payload: serde_json::Value,
}

/// A unit of background work, keyed by `task_type` in the registry.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task type this handler answers to (e.g. `generate_tiers`).
    fn task_type(&self) -> &str;

    /// Recurring cadence, if any. `None` means on-demand only.
    fn schedule(&self) -> Option<TaskSchedule> {
        None
    }

    /// Execute one unit of work. Errors are wrapped at the call site into
    /// [`Error::TaskHandlerFailure`] and logged; they never propagate to the
    /// scheduler loop.
    async fn handle(&self, payload: serde_json::Value) -> anyhow::Result<()>;
}

/// In-process scheduler: a handler registry plus the recurring-task loops
/// spawned for handlers that declare a [`TaskSchedule`].
pub struct TaskService {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,
    recurring: RwLock<Vec<JoinHandle<()>>>,
}

impl Default for TaskService {
    fn default() -> Self {
        TaskService {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            recurring: RwLock::new(Vec::new()),
        }
    }
}

impl TaskService {
    #[must_use]
    pub fn new() -> Self {
        TaskService::default()
    }

    /// Register a handler. If it declares a [`TaskSchedule`], spawn its
    /// recurring loop immediately.
    pub fn register(&self, handler: Arc<dyn TaskHandler>) {
        let task_type = handler.task_type().to_string();
        let schedule = handler.schedule();
        self.handlers.write().insert(task_type.clone(), handler.clone());

        if let Some(schedule) = schedule {
            info!(task_type, interval_seconds = schedule.interval_seconds, "recurring task registered");
            let join = tokio::spawn(run_recurring(handler, schedule));
            self.recurring.write().push(join);
        }
    }

    /// Enqueue a one-shot task. Dispatch is synchronous from the caller's
    /// perspective (the lookup happens immediately); execution runs on a
    /// spawned task so the caller is never blocked on the handler.
    pub fn schedule_task(&self, task_type: &str, payload: serde_json::Value) -> Result<()> {
        let handler = self
            .handlers
            .read()
            .get(task_type)
            .cloned()
            .ok_or_else(|| Error::not_found("task handler", task_type))?;

        let task_type = task_type.to_string();
        tokio::spawn(async move {
            run_once(handler, &task_type, payload).await;
        });
        Ok(())
    }

    /// Same as [`Self::schedule_task`] but awaits completion in the calling
    /// task. Used by tests and by callers that genuinely need the result
    /// (e.g. `inline = true` code paths elsewhere in the crate prefer calling
    /// the domain service directly rather than going through the scheduler).
    pub async fn run_task_now(&self, task_type: &str, payload: serde_json::Value) -> Result<()> {
        let handler = self
            .handlers
            .read()
            .get(task_type)
            .cloned()
            .ok_or_else(|| Error::not_found("task handler", task_type))?;
        run_once(handler, task_type, payload).await;
        Ok(())
    }

    /// Abort every recurring loop. Ad-hoc tasks already in flight are left
    /// to finish.
    pub fn shutdown(&self) {
        for handle in self.recurring.write().drain(..) {
            handle.abort();
        }
    }
}

async fn run_once(handler: Arc<dyn TaskHandler>, task_type: &str, payload: serde_json::Value) {
    if let Err(source) = handler.handle(payload).await {
        let err = Error::TaskHandlerFailure {
            task_type: task_type.to_string(),
            source,
        };
        error!(task_type, error = %err, "task handler failed");
    } else {
        debug!(task_type, "task handler completed");
    }
}

async fn run_recurring(handler: Arc<dyn TaskHandler>, schedule: TaskSchedule) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(schedule.interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let task_type = handler.task_type().to_string();
        run_once(handler.clone(), &task_type, schedule.default_payload.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        schedule: Option<TaskSchedule>,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        fn task_type(&self) -> &str {
            "count"
        }
        fn schedule(&self) -> Option<TaskSchedule> {
            self.schedule.clone()
        }
        async fn handle(&self, _payload: serde_json::Value) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl TaskHandler for FailingHandler {
        fn task_type(&self) -> &str {
            "always_fails"
        }
        async fn handle(&self, _payload: serde_json::Value) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("boom"))
        }
    }

    #[tokio::test]
    async fn schedule_task_dispatches_to_registered_handler() {
        let service = TaskService::new();
        let calls = Arc::new(AtomicUsize::new(0));
        service.register(Arc::new(CountingHandler {
            calls: calls.clone(),
            schedule: None,
        }));

        service.run_task_now("count", serde_json::json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schedule_task_for_unknown_type_is_not_found() {
        let service = TaskService::new();
        let result = service.schedule_task("nonexistent", serde_json::json!({}));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn failing_handler_does_not_panic_the_scheduler() {
        let service = TaskService::new();
        service.register(Arc::new(FailingHandler));
        service.run_task_now("always_fails", serde_json::json!({})).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_handler_fires_on_its_own_cadence() {
        let service = TaskService::new();
        let calls = Arc::new(AtomicUsize::new(0));
        service.register(Arc::new(CountingHandler {
            calls: calls.clone(),
            schedule: Some(TaskSchedule {
                interval_seconds: 10,
                default_payload: serde_json::json!({}),
            }),
        }));

        tokio::time::advance(std::time::Duration::from_secs(25)).await;
        tokio::task::yield_now().await;
        assert!(calls.load(Ordering::SeqCst) >= 2);
        service.shutdown();
    }
}
