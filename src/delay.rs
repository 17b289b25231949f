//! Delay queue that batches GUI-originated work.
//!
//! Tasks are collected for one quantum after the first task of a batch
//! arrives; the whole batch then goes to the consumer. The default consumer,
//! [`run_latest_per_type`], runs only the highest-clocked task of each task
//! type, so a burst of keystrokes turns into one tree refresh.
//!
//! The worker thread starts on first use and stops once every holder has
//! released the queue; scheduling again starts a new worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::clock::ClockSnapshot;

pub struct DelayedTask {
    pub task_type: String,
    pub clock: ClockSnapshot,
    pub queued_at: Instant,
    run: Box<dyn FnOnce() + Send>,
}

impl DelayedTask {
    pub fn new<F>(task_type: &str, clock: ClockSnapshot, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            task_type: task_type.to_string(),
            clock,
            queued_at: Instant::now(),
            run: Box::new(f),
        }
    }
    pub fn run(self) {
        (self.run)()
    }
}

impl std::fmt::Debug for DelayedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("DelayedTask")
            .field("task_type", &self.task_type)
            .field("clock", &self.clock)
            .finish()
    }
}

pub type DelayConsumer = Arc<dyn Fn(Vec<DelayedTask>) + Send + Sync>;

/// Keeps the newest task per type (ties go to the later one) and runs the
/// survivors in order of each type's first appearance.
pub fn run_latest_per_type(tasks: Vec<DelayedTask>) {
    let total = tasks.len();
    let mut latest: Vec<DelayedTask> = Vec::new();
    for task in tasks {
        match latest.iter().position(|t| t.task_type == task.task_type) {
            Some(pos) => {
                if task.clock >= latest[pos].clock {
                    latest[pos] = task;
                }
            }
            None => latest.push(task),
        }
    }
    debug!(queued = total, running = latest.len(), "delayed batch");
    for task in latest {
        task.run();
    }
}

struct DelayShared {
    pending: Mutex<Vec<DelayedTask>>,
    wake: Condvar,
    stopped: AtomicBool,
}

struct DelayState {
    worker: Option<(Arc<DelayShared>, JoinHandle<()>)>,
    holders: usize,
}

pub struct DelayQueue {
    quantum: Duration,
    consumer: DelayConsumer,
    state: Mutex<DelayState>,
}

impl DelayQueue {
    pub fn new(quantum: Duration) -> Arc<Self> {
        Self::with_consumer(quantum, Arc::new(run_latest_per_type))
    }

    pub fn with_consumer(quantum: Duration, consumer: DelayConsumer) -> Arc<Self> {
        Arc::new(Self {
            quantum,
            consumer,
            state: Mutex::new(DelayState { worker: None, holders: 0 }),
        })
    }

    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    pub fn acquire(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.holders += 1;
    }

    /// Drops one holder; the last one stops the worker after flushing.
    pub fn release(&self) {
        let worker = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.holders = state.holders.saturating_sub(1);
            if state.holders == 0 { state.worker.take() } else { None }
        };
        if let Some((shared, handle)) = worker {
            shared.stopped.store(true, Ordering::SeqCst);
            shared.wake.notify_all();
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
            debug!("delay queue stopped");
        }
    }

    pub fn schedule(&self, task: DelayedTask) {
        trace!(task_type = %task.task_type, clock = %task.clock, "delayed task queued");
        let Some(shared) = self.running_worker() else {
            // no worker thread available, run now
            (self.consumer)(vec![task]);
            return;
        };
        let mut pending = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.push(task);
        shared.wake.notify_all();
    }

    /// Runs everything queued so far on the calling thread.
    pub fn flush(&self) {
        let shared = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.worker.as_ref().map(|(shared, _)| Arc::clone(shared))
        };
        if let Some(shared) = shared {
            let batch: Vec<DelayedTask> = {
                let mut pending = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
                pending.drain(..).collect()
            };
            if !batch.is_empty() {
                (self.consumer)(batch);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().map(|s| s.worker.is_some()).unwrap_or(false)
    }

    fn running_worker(&self) -> Option<Arc<DelayShared>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((shared, _)) = &state.worker {
            return Some(Arc::clone(shared));
        }
        let shared = Arc::new(DelayShared {
            pending: Mutex::new(Vec::new()),
            wake: Condvar::new(),
            stopped: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let consumer = Arc::clone(&self.consumer);
        let quantum = self.quantum;
        let spawned = std::thread::Builder::new()
            .name("autobind-delay".to_string())
            .spawn(move || delay_loop(worker_shared, consumer, quantum));
        match spawned {
            Ok(handle) => {
                debug!(quantum_ms = quantum.as_millis() as u64, "delay queue started");
                state.worker = Some((Arc::clone(&shared), handle));
                Some(shared)
            }
            Err(e) => {
                warn!(error = %e, "could not spawn the delay queue thread");
                None
            }
        }
    }
}

fn delay_loop(shared: Arc<DelayShared>, consumer: DelayConsumer, quantum: Duration) {
    loop {
        let mut pending = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
        while pending.is_empty() && !shared.stopped.load(Ordering::SeqCst) {
            pending = shared.wake.wait(pending).unwrap_or_else(|e| e.into_inner());
        }
        if pending.is_empty() {
            break;
        }
        // hold the batch open for one quantum from its first task
        let deadline = pending[0].queued_at + quantum;
        while !shared.stopped.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = shared
                .wake
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            pending = guard;
        }
        let batch: Vec<DelayedTask> = pending.drain(..).collect();
        drop(pending);
        if !batch.is_empty() {
            consumer(batch);
        }
    }
}
