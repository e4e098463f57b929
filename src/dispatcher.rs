//! Bounded worker pool with a named task registry (spec §4.D). Workers
//! each own a private job channel; a scheduler loop hands queued tasks to
//! whichever worker last reported itself free — the "two-level channel
//! pool" shape spec §9 calls out as the idiomatic way to express "any
//! available worker" when workers can't share one queue directly.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::FeedError;

pub const JANITOR_INTERVAL: Duration = Duration::minutes(5);
const TASK_MAX_AGE: Duration = Duration::minutes(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Complete,
    Failed,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub state: TaskState,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;
pub type Job = Box<dyn FnOnce() -> BoxFuture + Send>;

struct WorkItem {
    id: Uuid,
    job: Job,
}

pub struct Dispatcher {
    registry: Arc<RwLock<HashMap<Uuid, TaskRecord>>>,
    queue_tx: mpsc::Sender<WorkItem>,
    active: Arc<AtomicBool>,
    cancellation_token: CancellationToken,
}

impl Dispatcher {
    /// Spawns `max_workers` worker loops plus one scheduler loop. The
    /// caller is responsible for also spawning `run_janitor` on an
    /// interval, matching the teacher's pattern of background loops being
    /// wired explicitly in `main` rather than started implicitly here.
    pub fn start(max_workers: usize, max_queue: usize, cancellation_token: CancellationToken) -> Self {
        let registry: Arc<RwLock<HashMap<Uuid, TaskRecord>>> = Arc::new(RwLock::new(HashMap::new()));
        let (queue_tx, queue_rx) = mpsc::channel::<WorkItem>(max_queue);
        let (available_tx, mut available_rx) = mpsc::channel::<usize>(max_workers);

        let mut worker_senders = Vec::with_capacity(max_workers);
        for worker_idx in 0..max_workers {
            let (job_tx, mut job_rx) = mpsc::channel::<WorkItem>(1);
            worker_senders.push(job_tx);

            let registry = registry.clone();
            let available_tx = available_tx.clone();
            let token = cancellation_token.clone();
            tokio::spawn(async move {
                let _ = available_tx.send(worker_idx).await;
                loop {
                    tokio::select! {
                        () = token.cancelled() => break,
                        item = job_rx.recv() => {
                            let Some(item) = item else { break };
                            run_one(&registry, item).await;
                            if available_tx.send(worker_idx).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        let token = cancellation_token.clone();
        let mut queue_rx = queue_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    item = queue_rx.recv() => {
                        let Some(item) = item else { break };
                        let Some(worker_idx) = available_rx.recv().await else { break };
                        if worker_senders[worker_idx].send(item).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            registry,
            queue_tx,
            active: Arc::new(AtomicBool::new(true)),
            cancellation_token,
        }
    }

    /// Enqueues `job` under a fresh UUID and returns immediately. Returns
    /// `DispatcherInactive` without blocking once `stop` has been called.
    pub async fn dispatch(&self, job: Job) -> Result<Uuid, FeedError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(FeedError::DispatcherInactive);
        }
        let id = Uuid::new_v4();
        self.registry.write().await.insert(
            id,
            TaskRecord { id, state: TaskState::Pending, result: None, error: None, created_at: Utc::now() },
        );
        self.queue_tx
            .send(WorkItem { id, job })
            .await
            .map_err(|_| FeedError::DispatcherInactive)?;
        Ok(id)
    }

    pub async fn lookup(&self, id: Uuid) -> Option<TaskRecord> {
        self.registry.read().await.get(&id).cloned()
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.cancellation_token.cancel();
    }

    /// Sweeps terminal tasks and tasks stuck past `TASK_MAX_AGE` without
    /// reaching a terminal state (spec: "a task that never calls its
    /// completion hook is still removed ... but its state remains
    /// running"). Intended to be driven by a 5-minute ticker in `main`,
    /// the same shape as the teacher's `CleanTask::run_background`.
    pub async fn run_janitor_once(&self) {
        let now = Utc::now();
        let mut registry = self.registry.write().await;
        registry.retain(|_, record| {
            let terminal = matches!(record.state, TaskState::Complete | TaskState::Failed);
            let stale = now - record.created_at > TASK_MAX_AGE;
            !(terminal || stale)
        });
    }
}

async fn run_one(registry: &Arc<RwLock<HashMap<Uuid, TaskRecord>>>, item: WorkItem) {
    if let Some(record) = registry.write().await.get_mut(&item.id) {
        record.state = TaskState::Running;
    }

    let outcome = AssertUnwindSafe((item.job)()).catch_unwind().await;

    let mut registry = registry.write().await;
    let Some(record) = registry.get_mut(&item.id) else { return };
    match outcome {
        Ok(Ok(value)) => {
            record.state = TaskState::Complete;
            record.result = Some(value);
        }
        Ok(Err(err)) => {
            record.state = TaskState::Failed;
            record.error = Some(err.to_string());
        }
        Err(panic) => {
            record.state = TaskState::Failed;
            record.error = Some(panic_message(panic));
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    fn job_ok(value: Value) -> Job {
        Box::new(move || Box::pin(async move { Ok(value) }))
    }

    fn job_panic() -> Job {
        Box::new(|| Box::pin(async move { panic!("boom") }))
    }

    #[tokio::test]
    async fn dispatch_and_lookup_completes() {
        let dispatcher = Dispatcher::start(2, 16, CancellationToken::new());
        let id = dispatcher.dispatch(job_ok(json!({"ok": true}))).await.unwrap();

        let mut record = dispatcher.lookup(id).await;
        for _ in 0..50 {
            if matches!(record.as_ref().map(|r| &r.state), Some(TaskState::Complete)) {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            record = dispatcher.lookup(id).await;
        }
        let record = record.unwrap();
        assert_eq!(record.state, TaskState::Complete);
        assert_eq!(record.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn panic_inside_task_is_recovered_as_failed() {
        let dispatcher = Dispatcher::start(1, 16, CancellationToken::new());
        let id = dispatcher.dispatch(job_panic()).await.unwrap();

        let mut record = dispatcher.lookup(id).await;
        for _ in 0..50 {
            if matches!(record.as_ref().map(|r| &r.state), Some(TaskState::Failed)) {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            record = dispatcher.lookup(id).await;
        }
        assert_eq!(record.unwrap().state, TaskState::Failed);
    }

    #[tokio::test]
    async fn dispatch_after_stop_is_rejected() {
        let dispatcher = Dispatcher::start(1, 16, CancellationToken::new());
        dispatcher.stop();
        let result = dispatcher.dispatch(job_ok(json!(null))).await;
        assert!(matches!(result, Err(FeedError::DispatcherInactive)));
    }

    #[tokio::test]
    async fn janitor_removes_terminal_tasks() {
        let dispatcher = Dispatcher::start(1, 16, CancellationToken::new());
        let id = dispatcher.dispatch(job_ok(json!(1))).await.unwrap();
        for _ in 0..50 {
            if matches!(dispatcher.lookup(id).await.map(|r| r.state), Some(TaskState::Complete)) {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        dispatcher.run_janitor_once().await;
        assert!(dispatcher.lookup(id).await.is_none());
    }
}
