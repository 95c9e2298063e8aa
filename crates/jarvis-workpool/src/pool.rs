//! Auto-scaling worker pool.

use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::Sender;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::executor::{BuiltinJobs, JobExecutor};
use crate::jobs::{Job, JobOutput};
use crate::task::{QueuedTask, TaskOptions, TaskRequest, WorkerTask};
use crate::worker::{WorkerCommand, spawn_worker};

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub busy: usize,
    pub idle: usize,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Mean run time of tasks that returned a result.
    pub avg_duration_ms: f64,
    pub min_workers: usize,
    pub max_workers: usize,
    pub terminated: bool,
}

struct WorkerSlot {
    sender: Sender<WorkerCommand>,
    busy: Option<Uuid>,
    idle_since: Instant,
    /// Shut down once the current task settles.
    retiring: bool,
}

impl WorkerSlot {
    fn shutdown(self) {
        let _ = self.sender.send(WorkerCommand::Shutdown);
    }
}

struct PoolState {
    queue: BinaryHeap<QueuedTask>,
    workers: HashMap<u64, WorkerSlot>,
    min_workers: usize,
    max_workers: usize,
    terminated: bool,
    completed: u64,
    failed: u64,
    timed_out: u64,
    total_duration: Duration,
}

impl PoolState {
    fn idle_count(&self) -> usize {
        self.workers.values().filter(|w| w.busy.is_none() && !w.retiring).count()
    }

    fn next_idle_worker(&self) -> Option<u64> {
        self.workers
            .iter()
            .find(|(_, w)| w.busy.is_none() && !w.retiring)
            .map(|(id, _)| *id)
    }

    fn remove_worker(&mut self, id: u64) {
        if let Some(slot) = self.workers.remove(&id) {
            slot.shutdown();
        }
    }
}

enum Outcome {
    Finished(Result<Value, PoolError>),
    Crashed,
    TimedOut,
    Terminated,
}

struct PoolInner {
    executor: Arc<dyn JobExecutor>,
    runtime: Handle,
    default_timeout: Duration,
    idle_timeout: Duration,
    state: Mutex<PoolState>,
    next_seq: AtomicU64,
    next_worker: AtomicU64,
    terminate_tx: watch::Sender<bool>,
}

/// Pool of OS-thread workers fed from a priority queue.
///
/// Workers are spawned on demand up to `max_workers` and retired after
/// `idle_timeout` down to `min_workers`. A task that outlives its timeout
/// is rejected and its worker torn down.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool. Must be called within a tokio runtime.
    pub fn new(config: PoolConfig, executor: Arc<dyn JobExecutor>) -> Result<Self, PoolError> {
        PoolConfig::validate_bounds(config.min_workers, config.max_workers)?;
        let runtime = Handle::try_current().map_err(|_| {
            PoolError::InvalidConfig("worker pool requires a tokio runtime".to_string())
        })?;
        let (terminate_tx, _) = watch::channel(false);

        let inner = Arc::new(PoolInner {
            executor,
            runtime,
            default_timeout: config.default_timeout,
            idle_timeout: config.idle_timeout,
            state: Mutex::new(PoolState {
                queue: BinaryHeap::new(),
                workers: HashMap::new(),
                min_workers: config.min_workers,
                max_workers: config.max_workers,
                terminated: false,
                completed: 0,
                failed: 0,
                timed_out: 0,
                total_duration: Duration::ZERO,
            }),
            next_seq: AtomicU64::new(0),
            next_worker: AtomicU64::new(1),
            terminate_tx,
        });

        inner.ensure_floor();
        spawn_reaper(&inner);

        info!(
            "Worker pool started (min={}, max={})",
            config.min_workers, config.max_workers
        );
        Ok(Self { inner })
    }

    /// Pool running the built-in job catalogue.
    pub fn with_builtin_jobs(config: PoolConfig) -> Result<Self, PoolError> {
        Self::new(config, Arc::new(BuiltinJobs))
    }

    /// Queue a job and wait for its result.
    pub async fn execute(
        &self,
        kind: impl Into<String>,
        payload: Value,
        options: TaskOptions,
    ) -> Result<Value, PoolError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return Err(PoolError::Terminated);
            }
            let task = WorkerTask::new(
                kind,
                payload,
                options.priority,
                options.timeout.unwrap_or(self.inner.default_timeout),
            );
            debug!("Queued task {} ({}, {})", task.id, task.kind, task.priority);
            state.queue.push(QueuedTask {
                task,
                seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
                resolver: tx,
            });
        }
        self.inner.drain();
        rx.await.unwrap_or(Err(PoolError::Terminated))
    }

    /// Run a batch. Results come back in submission order.
    pub async fn execute_all(&self, requests: Vec<TaskRequest>) -> Vec<Result<Value, PoolError>> {
        join_all(
            requests
                .into_iter()
                .map(|r| self.execute(r.kind, r.payload, r.options)),
        )
        .await
    }

    /// Run a typed built-in job.
    pub async fn run(&self, job: Job) -> Result<JobOutput, PoolError> {
        self.run_with(job, TaskOptions::default()).await
    }

    pub async fn run_with(&self, job: Job, options: TaskOptions) -> Result<JobOutput, PoolError> {
        let kind = job.kind();
        let value = self.execute(kind, job.payload(), options).await?;
        JobOutput::from_value(kind, value)
    }

    /// Change the worker bounds.
    ///
    /// Idle workers above the new ceiling are retired immediately, busy
    /// ones once their task settles.
    pub fn resize(&self, min_workers: usize, max_workers: usize) -> Result<(), PoolError> {
        PoolConfig::validate_bounds(min_workers, max_workers)?;
        {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return Err(PoolError::Terminated);
            }
            state.min_workers = min_workers;
            state.max_workers = max_workers;

            let mut excess = state.workers.len().saturating_sub(max_workers);
            let idle: Vec<u64> = state
                .workers
                .iter()
                .filter(|(_, w)| w.busy.is_none())
                .map(|(id, _)| *id)
                .take(excess)
                .collect();
            for id in idle {
                state.remove_worker(id);
                excess -= 1;
            }
            for slot in state.workers.values_mut().filter(|w| !w.retiring).take(excess) {
                slot.retiring = true;
            }
            info!("Worker pool resized (min={}, max={})", min_workers, max_workers);
        }
        self.inner.ensure_floor();
        self.inner.drain();
        Ok(())
    }

    /// Reject queued and in-flight tasks and stop all workers.
    pub fn terminate(&self) {
        let rejected = {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            for (_, slot) in state.workers.drain() {
                slot.shutdown();
            }
            std::mem::take(&mut state.queue).into_vec()
        };
        let count = rejected.len();
        for queued in rejected {
            let _ = queued.resolver.send(Err(PoolError::Terminated));
        }
        self.inner.terminate_tx.send_replace(true);
        info!("Worker pool terminated ({} queued tasks rejected)", count);
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminated
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        let busy = state.workers.values().filter(|w| w.busy.is_some()).count();
        let finished = state.completed + state.failed;
        let avg_duration_ms = if finished == 0 {
            0.0
        } else {
            state.total_duration.as_secs_f64() * 1000.0 / finished as f64
        };
        PoolStats {
            workers: state.workers.len(),
            busy,
            idle: state.workers.len() - busy,
            queued: state.queue.len(),
            completed: state.completed,
            failed: state.failed,
            timed_out: state.timed_out,
            avg_duration_ms,
            min_workers: state.min_workers,
            max_workers: state.max_workers,
            terminated: state.terminated,
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("stats", &self.stats()).finish()
    }
}

impl PoolInner {
    fn spawn_into(&self, state: &mut PoolState) -> Result<u64, PoolError> {
        let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let sender = spawn_worker(id, self.executor.clone())?;
        state.workers.insert(
            id,
            WorkerSlot {
                sender,
                busy: None,
                idle_since: Instant::now(),
                retiring: false,
            },
        );
        Ok(id)
    }

    fn ensure_floor(&self) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        while state.workers.len() < state.min_workers {
            if let Err(e) = self.spawn_into(&mut state) {
                error!("Failed to keep worker floor: {}", e);
                break;
            }
        }
    }

    /// Scale up to demand, then hand queued tasks to idle workers.
    ///
    /// Spawning compares queue depth against *idle* workers, not busy ones:
    /// a new worker starts while queued tasks outnumber idle workers and the
    /// ceiling allows it.
    fn drain(self: &Arc<Self>) {
        let mut dispatched = Vec::new();
        {
            let mut state = self.state.lock();
            if state.terminated {
                return;
            }
            loop {
                while state.queue.len() > state.idle_count() && state.workers.len() < state.max_workers {
                    if let Err(e) = self.spawn_into(&mut state) {
                        error!("Failed to scale worker pool: {}", e);
                        break;
                    }
                }

                let mut lost_worker = false;
                while let Some(worker_id) = state.next_idle_worker() {
                    let Some(queued) = state.queue.pop() else {
                        break;
                    };
                    let (reply, reply_rx) = oneshot::channel();
                    let command = WorkerCommand::Run {
                        kind: queued.task.kind.clone(),
                        payload: queued.task.payload.clone(),
                        reply,
                    };
                    let sent = state
                        .workers
                        .get(&worker_id)
                        .is_some_and(|slot| slot.sender.send(command).is_ok());
                    if !sent {
                        warn!("Worker {} is gone, requeueing task {}", worker_id, queued.task.id);
                        state.workers.remove(&worker_id);
                        state.queue.push(queued);
                        lost_worker = true;
                        continue;
                    }
                    if let Some(slot) = state.workers.get_mut(&worker_id) {
                        slot.busy = Some(queued.task.id);
                    }
                    dispatched.push((worker_id, queued, reply_rx));
                }
                if !lost_worker {
                    break;
                }
            }
        }

        for (worker_id, queued, reply_rx) in dispatched {
            let inner = self.clone();
            self.runtime
                .spawn(async move { inner.supervise(worker_id, queued, reply_rx).await });
        }
    }

    async fn supervise(
        self: Arc<Self>,
        worker_id: u64,
        queued: QueuedTask,
        reply_rx: oneshot::Receiver<Result<Value, PoolError>>,
    ) {
        let QueuedTask { task, resolver, .. } = queued;
        let started = Instant::now();
        let mut terminate_rx = self.terminate_tx.subscribe();

        let outcome = tokio::select! {
            result = tokio::time::timeout(task.timeout, reply_rx) => match result {
                Ok(Ok(result)) => Outcome::Finished(result),
                Ok(Err(_)) => Outcome::Crashed,
                Err(_) => Outcome::TimedOut,
            },
            _ = terminate_rx.wait_for(|terminated| *terminated) => Outcome::Terminated,
        };
        let elapsed = started.elapsed();

        let result = {
            let mut state = self.state.lock();
            match outcome {
                Outcome::Finished(result) => {
                    if result.is_ok() {
                        state.completed += 1;
                    } else {
                        state.failed += 1;
                    }
                    state.total_duration += elapsed;
                    let over_ceiling = state.workers.len() > state.max_workers;
                    let retire = state
                        .workers
                        .get(&worker_id)
                        .map(|slot| slot.retiring || over_ceiling);
                    match retire {
                        Some(true) => {
                            debug!("Retiring worker {}", worker_id);
                            state.remove_worker(worker_id);
                        }
                        Some(false) => {
                            if let Some(slot) = state.workers.get_mut(&worker_id) {
                                slot.busy = None;
                                slot.idle_since = Instant::now();
                            }
                        }
                        None => {}
                    }
                    result
                }
                Outcome::Crashed => {
                    error!("Worker {} crashed while running task {}", worker_id, task.id);
                    state.failed += 1;
                    state.workers.remove(&worker_id);
                    Err(PoolError::WorkerCrashed(worker_id))
                }
                Outcome::TimedOut => {
                    warn!(
                        "Task {} ({}) timed out after {:?}, tearing down worker {}",
                        task.id, task.kind, task.timeout, worker_id
                    );
                    state.timed_out += 1;
                    // Dropping the sender detaches the thread; it exits after the job returns.
                    state.workers.remove(&worker_id);
                    Err(PoolError::Timeout {
                        task_id: task.id.to_string(),
                        timeout_ms: task.timeout.as_millis() as u64,
                    })
                }
                Outcome::Terminated => Err(PoolError::Terminated),
            }
        };

        self.ensure_floor();
        self.drain();
        let _ = resolver.send(result);
    }

    /// Retire idle workers above the floor. Returns false once terminated.
    fn reap_idle(&self) -> bool {
        let mut state = self.state.lock();
        if state.terminated {
            return false;
        }
        let surplus = state.workers.len().saturating_sub(state.min_workers);
        if surplus == 0 {
            return true;
        }
        let now = Instant::now();
        let expired: Vec<u64> = state
            .workers
            .iter()
            .filter(|(_, w)| w.busy.is_none() && now.duration_since(w.idle_since) >= self.idle_timeout)
            .map(|(id, _)| *id)
            .take(surplus)
            .collect();
        for id in expired {
            debug!("Reaping idle worker {}", id);
            state.remove_worker(id);
        }
        true
    }
}

fn spawn_reaper(inner: &Arc<PoolInner>) {
    let weak: Weak<PoolInner> = Arc::downgrade(inner);
    let period = (inner.idle_timeout / 2).max(Duration::from_millis(10));
    inner.runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if !inner.reap_idle() {
                break;
            }
        }
    });
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
