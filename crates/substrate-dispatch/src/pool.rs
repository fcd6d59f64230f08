use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use substrate_core::{EventBus, EventSubscriber};
use substrate_types::SubstrateEvent;
use tokio::sync::{oneshot, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::adapter::Adapter;
use crate::types::{DispatchOptions, DispatchResult, DispatchStatus, DispatchTask, Priority, TokenEstimate};

/// Bounds process-wide concurrency like a semaphore, but admits queued
/// waiters FIFO within a priority class rather than in raw acquire-call
/// order — a `Semaphore`'s own wait queue has no notion of priority, so a
/// `High` dispatch queued behind a `Normal` one would otherwise wait its
/// turn regardless of urgency.
struct PriorityGate {
    state: StdMutex<GateState>,
}

struct GateState {
    available: usize,
    high: VecDeque<oneshot::Sender<()>>,
    normal: VecDeque<oneshot::Sender<()>>,
}

impl PriorityGate {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: StdMutex::new(GateState {
                available: capacity.max(1),
                high: VecDeque::new(),
                normal: VecDeque::new(),
            }),
        })
    }

    async fn acquire(self: &Arc<Self>, priority: Priority) -> GatePermit {
        let waiter = {
            let mut state = self.state.lock().unwrap();
            if state.available > 0 {
                state.available -= 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                match priority {
                    Priority::High => state.high.push_back(tx),
                    Priority::Normal => state.normal.push_back(tx),
                }
                Some(rx)
            }
        };
        if let Some(rx) = waiter {
            let _ = rx.await;
        }
        GatePermit { gate: self.clone() }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        match state.high.pop_front().or_else(|| state.normal.pop_front()) {
            Some(tx) => {
                drop(state);
                let _ = tx.send(());
            }
            None => state.available += 1,
        }
    }
}

struct GatePermit {
    gate: Arc<PriorityGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

struct ActiveWorker {
    task_id: String,
    cancel: CancellationToken,
}

/// A handle to one in-flight dispatch. `id` identifies the worker, not the
/// task — the pool's active-worker map is keyed by worker id, per the 1:1
/// worker/task ownership the Decision Store and Scheduler rely on.
pub struct Handle {
    pub id: String,
    pub task_id: String,
    cancel: CancellationToken,
    status: Arc<RwLock<Option<DispatchStatus>>>,
    result_rx: oneshot::Receiver<DispatchResult>,
}

impl Handle {
    /// Idempotent: cancelling twice, or cancelling after completion, is a
    /// no-op observable only through the eventual `DispatchResult`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn status(&self) -> Option<DispatchStatus> {
        *self.status.read().await
    }

    pub async fn result(self) -> DispatchResult {
        self.result_rx
            .await
            .unwrap_or_else(|_| DispatchResult::cancelled(self.task_id))
    }
}

/// Bounds concurrent dispatches process-wide and per-adapter, and terminates
/// workers in response to budget events published on the `EventBus`. Per the
/// termination-on-budget contract, this is the *only* path a task is killed
/// for cost reasons — the Budget Enforcer never calls the pool directly; it
/// only publishes the events this type subscribes to.
#[derive(Clone)]
pub struct WorkerPoolManager {
    admission: Arc<PriorityGate>,
    adapter_semaphores: Arc<RwLock<HashMap<String, Arc<Semaphore>>>>,
    active: Arc<RwLock<HashMap<String, ActiveWorker>>>,
    event_bus: EventBus,
    grace_window: std::time::Duration,
}

impl WorkerPoolManager {
    pub fn new(max_concurrent_tasks: usize, event_bus: EventBus) -> Self {
        Self {
            admission: PriorityGate::new(max_concurrent_tasks),
            adapter_semaphores: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(RwLock::new(HashMap::new())),
            event_bus,
            grace_window: std::time::Duration::from_secs(5),
        }
    }

    async fn adapter_semaphore(&self, adapter: &Arc<dyn Adapter>) -> Arc<Semaphore> {
        let info = adapter.info();
        let mut semaphores = self.adapter_semaphores.write().await;
        semaphores
            .entry(info.id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(info.max_concurrent.max(1) as usize)))
            .clone()
    }

    pub async fn dispatch(&self, task: DispatchTask, adapter: Arc<dyn Adapter>, opts: DispatchOptions) -> Handle {
        let worker_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let status: Arc<RwLock<Option<DispatchStatus>>> = Arc::new(RwLock::new(None));

        self.active.write().await.insert(
            worker_id.clone(),
            ActiveWorker {
                task_id: task.id.clone(),
                cancel: cancel.clone(),
            },
        );

        let admission = self.admission.clone();
        let priority = opts.priority;
        let adapter_semaphore = self.adapter_semaphore(&adapter).await;
        let active = self.active.clone();
        let worker_id_bg = worker_id.clone();
        let status_bg = status.clone();
        let task_id_bg = task.id.clone();
        let deadline = opts.timeout;
        let grace_window = self.grace_window;
        let cancel_bg = cancel.clone();

        tokio::spawn(async move {
            let _admission_permit = admission.acquire(priority).await;
            let _adapter_permit = adapter_semaphore.acquire_owned().await;

            let result = tokio::select! {
                result = adapter.dispatch(&task, &opts, cancel_bg.clone()) => result,
                _ = tokio::time::sleep(deadline) => {
                    cancel_bg.cancel();
                    tokio::time::sleep(grace_window).await;
                    DispatchResult::timeout(task_id_bg.clone(), (deadline + grace_window).as_millis() as u64, TokenEstimate::default())
                }
            };

            *status_bg.write().await = Some(result.status);
            active.write().await.remove(&worker_id_bg);
            let _ = tx.send(result);
        });

        Handle {
            id: worker_id,
            task_id: task.id,
            cancel,
            status,
            result_rx: rx,
        }
    }

    pub async fn find_worker_for_task(&self, task_id: &str) -> Option<String> {
        self.active
            .read()
            .await
            .iter()
            .find(|(_, worker)| worker.task_id == task_id)
            .map(|(id, _)| id.clone())
    }

    /// Terminates the active worker for one task, if any is still running.
    pub async fn terminate_task(&self, task_id: &str) -> bool {
        let active = self.active.read().await;
        match active.values().find(|w| w.task_id == task_id) {
            Some(worker) => {
                worker.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn terminate_all(&self) {
        let active = self.active.read().await;
        for worker in active.values() {
            worker.cancel.cancel();
        }
    }

    /// Snapshot of `(worker_id, task_id)` pairs. Every other consumer reads
    /// the worker map only through this copy.
    pub async fn active_workers(&self) -> Vec<(String, String)> {
        self.active
            .read()
            .await
            .iter()
            .map(|(id, worker)| (id.clone(), worker.task_id.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl EventSubscriber for WorkerPoolManager {
    fn name(&self) -> &str {
        "worker-pool"
    }

    async fn handle(&self, event: &SubstrateEvent) -> anyhow::Result<()> {
        match event {
            SubstrateEvent::BudgetExceededTask { task_id, .. } => {
                if !self.terminate_task(task_id).await {
                    warn!(task_id, "budget:exceeded:task fired for a task with no active worker");
                }
            }
            SubstrateEvent::SessionBudgetExceeded { .. } => {
                self.terminate_all().await;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::EchoAdapter;
    use std::time::Duration;
    use substrate_types::TaskType;

    fn task(id: &str) -> DispatchTask {
        DispatchTask {
            id: id.to_string(),
            prompt: "do the thing".to_string(),
            task_type: TaskType::Coding,
            agent_id: None,
        }
    }

    #[tokio::test]
    async fn priority_gate_admits_high_priority_ahead_of_an_earlier_normal_waiter() {
        let gate = PriorityGate::new(1);
        let held = gate.acquire(Priority::Normal).await;

        let order: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

        let gate_normal = gate.clone();
        let order_normal = order.clone();
        let normal_waiter = tokio::spawn(async move {
            let _permit = gate_normal.acquire(Priority::Normal).await;
            order_normal.lock().unwrap().push("normal");
        });
        // Give the normal waiter time to enqueue before the high waiter does.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let gate_high = gate.clone();
        let order_high = order.clone();
        let high_waiter = tokio::spawn(async move {
            let _permit = gate_high.acquire(Priority::High).await;
            order_high.lock().unwrap().push("high");
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(held);
        high_waiter.await.unwrap();
        normal_waiter.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["high", "normal"]);
    }

    #[tokio::test]
    async fn dispatch_completes_through_echo_adapter() {
        let pool = WorkerPoolManager::new(4, EventBus::new());
        let adapter: Arc<dyn Adapter> = Arc::new(EchoAdapter::new("echo"));
        let handle = pool.dispatch(task("t1"), adapter, DispatchOptions::default()).await;
        let result = handle.result().await;
        assert_eq!(result.status, DispatchStatus::Completed);
    }

    #[tokio::test]
    async fn budget_exceeded_event_terminates_the_right_worker() {
        let bus = EventBus::new();
        let pool = WorkerPoolManager::new(4, bus.clone());
        bus.subscribe(Arc::new(pool.clone())).await;

        let adapter: Arc<dyn Adapter> = Arc::new(SlowAdapter);
        let handle = pool
            .dispatch(
                task("t1"),
                adapter,
                DispatchOptions {
                    timeout: Duration::from_secs(30),
                    ..Default::default()
                },
            )
            .await;

        // Give the background task a moment to register as active.
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish(SubstrateEvent::BudgetExceededTask {
            run_id: "r".into(),
            task_id: "t1".into(),
        })
        .await;

        let result = handle.result().await;
        assert_eq!(result.status, DispatchStatus::Cancelled);
    }

    struct SlowAdapter;

    #[async_trait::async_trait]
    impl Adapter for SlowAdapter {
        fn info(&self) -> crate::adapter::AdapterInfo {
            crate::adapter::AdapterInfo {
                id: "slow".to_string(),
                supports: vec![TaskType::Coding],
                max_concurrent: 1,
            }
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn dispatch(&self, task: &DispatchTask, _opts: &DispatchOptions, cancel: CancellationToken) -> DispatchResult {
            cancel.cancelled().await;
            DispatchResult::cancelled(task.id.clone())
        }
    }
}
