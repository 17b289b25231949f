//! Task runners used to invoke user code (getters, setters, actions).
//!
//! Two strategies share one interface, [`TaskRunner`]:
//! * [`InlineRunner`] runs a task on the first thread that waits for it.
//! * [`WorkerPool`] is a fixed set of worker threads. A task submitted from
//!   inside one of its own workers runs right away on that worker, so an action
//!   that calls back into the engine never waits for a free slot.
//!
//! A process keeps one [`SharedPool`]; every bound tree takes a [`PoolLease`]
//! and the threads are torn down when the last lease is released. Acquiring
//! again afterwards starts a fresh pool.
//!
//! Cancellation is cooperative via [`CancelToken`]; user code observes it
//! through the token passed to each task.

use std::any::Any;
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{AutobindError, Result};
use crate::value::Value;

pub type Task = Box<dyn FnOnce(&CancelToken) -> Result<Value> + Send + 'static>;

/// Cancellation token shared with the thread running a task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    pub fn new() -> Self { Self(Arc::new(AtomicBool::new(false))) }
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Relaxed) }
    /// Convenience for user code: `token.check()?` inside long loops.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() { Err(AutobindError::Cancelled) } else { Ok(()) }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Runs `task` with panics converted into `Invocation` errors.
fn run_guarded(task: Task, token: &CancelToken) -> Result<Value> {
    if token.is_cancelled() {
        return Err(AutobindError::Cancelled);
    }
    match panic::catch_unwind(AssertUnwindSafe(|| task(token))) {
        Ok(result) => result,
        Err(payload) => Err(AutobindError::invocation("task", panic_message(payload))),
    }
}

// ------------- TaskFuture -------------
struct FutureState {
    result: Mutex<Option<Result<Value>>>,
    done: Condvar,
    token: CancelToken,
    // only inline futures keep their task here until the first get()
    pending: Mutex<Option<Task>>,
    cancel_timeout: Duration,
}

impl FutureState {
    fn new(pending: Option<Task>, cancel_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(None),
            done: Condvar::new(),
            token: CancelToken::new(),
            pending: Mutex::new(pending),
            cancel_timeout,
        })
    }
    fn complete(&self, result: Result<Value>) {
        let mut slot = self.result.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(result);
        }
        self.done.notify_all();
    }
    fn is_done(&self) -> bool {
        self.result.lock().map(|r| r.is_some()).unwrap_or(true)
    }
}

/// Handle to the outcome of a submitted task.
#[derive(Clone)]
pub struct TaskFuture {
    state: Arc<FutureState>,
}

impl TaskFuture {
    fn completed(result: Result<Value>) -> Self {
        let state = FutureState::new(None, Duration::ZERO);
        state.complete(result);
        Self { state }
    }

    /// Block until the task finishes. Inline tasks run here on first call.
    pub fn get(&self) -> Result<Value> {
        self.run_pending();
        let mut slot = self.state.result.lock()?;
        while slot.is_none() {
            slot = self.state.done.wait(slot)?;
        }
        slot.clone().unwrap_or(Err(AutobindError::Cancelled))
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<Value> {
        self.run_pending();
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.result.lock()?;
        while slot.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return Err(AutobindError::Timeout(timeout.as_millis() as u64));
            }
            let (guard, _) = self.state.done.wait_timeout(slot, deadline - now)?;
            slot = guard;
        }
        slot.clone().unwrap_or(Err(AutobindError::Cancelled))
    }

    fn run_pending(&self) {
        let task = self.state.pending.lock().ok().and_then(|mut p| p.take());
        if let Some(task) = task {
            let result = run_guarded(task, &self.state.token);
            self.state.complete(result);
        }
    }

    /// Requests cancellation. A task that has not started is dropped. A running
    /// inline task gets a watchdog that raises the token once the configured
    /// timeout passes without completion; pool tasks see the token at once.
    pub fn cancel(&self) -> bool {
        if self.is_done() {
            return false;
        }
        let pending = self.state.pending.lock().ok().and_then(|mut p| p.take());
        if pending.is_some() {
            self.state.token.cancel();
            self.state.complete(Err(AutobindError::Cancelled));
            return true;
        }
        if self.state.cancel_timeout.is_zero() {
            self.state.token.cancel();
        } else {
            let state = Arc::clone(&self.state);
            std::thread::spawn(move || {
                let slot = state.result.lock().unwrap_or_else(|e| e.into_inner());
                let (slot, _) = state
                    .done
                    .wait_timeout_while(slot, state.cancel_timeout, |r| r.is_none())
                    .unwrap_or_else(|e| e.into_inner());
                if slot.is_none() {
                    debug!("watchdog cancelling task that outlived its timeout");
                    state.token.cancel();
                }
            });
        }
        true
    }

    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }
    pub fn is_cancelled(&self) -> bool {
        self.state.token.is_cancelled()
    }
}

// ------------- TaskRunner -------------
pub trait TaskRunner: Send + Sync {
    fn name(&self) -> &'static str;
    fn submit(&self, task: Task) -> TaskFuture;
    /// Like [`TaskRunner::submit`], but the task runs even if nobody ever
    /// waits on the returned future.
    fn dispatch(&self, task: Task) -> TaskFuture {
        self.submit(task)
    }
    /// Fire-and-forget submission.
    fn execute(&self, task: Task) {
        let _ = self.submit(task);
    }
    fn shutdown(&self);
}

/// Runs tasks without any thread of its own.
pub struct InlineRunner {
    cancel_timeout: Duration,
}

impl InlineRunner {
    pub fn new(cancel_timeout: Duration) -> Self {
        Self { cancel_timeout }
    }
}

impl TaskRunner for InlineRunner {
    fn name(&self) -> &'static str {
        "inline"
    }
    fn submit(&self, task: Task) -> TaskFuture {
        TaskFuture { state: FutureState::new(Some(task), self.cancel_timeout) }
    }
    fn dispatch(&self, task: Task) -> TaskFuture {
        let state = FutureState::new(None, self.cancel_timeout);
        let result = run_guarded(task, &state.token);
        state.complete(result);
        TaskFuture { state }
    }
    fn execute(&self, task: Task) {
        if let Err(e) = run_guarded(task, &CancelToken::new()) {
            warn!(error = %e, "inline task failed");
        }
    }
    fn shutdown(&self) {}
}

// ------------- WorkerPool -------------
struct Job {
    task: Task,
    state: Arc<FutureState>,
}

struct PoolQueue {
    jobs: Mutex<VecDeque<Job>>,
    available: Condvar,
    stopped: AtomicBool,
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_POOL: Cell<u64> = const { Cell::new(0) };
}

pub struct WorkerPool {
    id: u64,
    queue: Arc<PoolQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(parallelism: usize) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::new(PoolQueue {
            jobs: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stopped: AtomicBool::new(false),
        });
        let mut workers = Vec::new();
        for n in 0..parallelism.max(1) {
            let queue = Arc::clone(&queue);
            let spawned = std::thread::Builder::new()
                .name(format!("autobind-pool-{}-{}", id, n))
                .spawn(move || worker_loop(id, queue));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!(error = %e, "could not spawn pool worker"),
            }
        }
        info!(pool = id, parallelism, "worker pool started");
        Self {
            id,
            queue,
            workers: Mutex::new(workers),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.queue.stopped.load(Ordering::SeqCst)
    }

    fn on_worker_thread(&self) -> bool {
        CURRENT_POOL.with(|c| c.get()) == self.id
    }
}

fn worker_loop(pool: u64, queue: Arc<PoolQueue>) {
    CURRENT_POOL.with(|c| c.set(pool));
    loop {
        let job = {
            let mut jobs = queue.jobs.lock().unwrap_or_else(|e| e.into_inner());
            loop {
                if let Some(job) = jobs.pop_front() {
                    break Some(job);
                }
                if queue.stopped.load(Ordering::SeqCst) {
                    break None;
                }
                jobs = queue.available.wait(jobs).unwrap_or_else(|e| e.into_inner());
            }
        };
        let Some(Job { task, state }) = job else { break };
        if state.is_done() {
            continue; // cancelled while queued
        }
        let result = run_guarded(task, &state.token);
        state.complete(result);
    }
}

impl TaskRunner for WorkerPool {
    fn name(&self) -> &'static str {
        "pool"
    }
    fn submit(&self, task: Task) -> TaskFuture {
        if self.on_worker_thread() {
            // nested submission: run now on this worker
            let state = FutureState::new(None, Duration::ZERO);
            let result = run_guarded(task, &state.token);
            state.complete(result);
            return TaskFuture { state };
        }
        if self.is_stopped() {
            warn!(pool = self.id, "task submitted to a stopped pool");
            return TaskFuture::completed(Err(AutobindError::Cancelled));
        }
        let state = FutureState::new(None, Duration::ZERO);
        let mut jobs = self.queue.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.push_back(Job { task, state: Arc::clone(&state) });
        self.queue.available.notify_one();
        TaskFuture { state }
    }
    fn shutdown(&self) {
        if self.queue.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.available.notify_all();
        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .map(|mut w| w.drain(..).collect())
            .unwrap_or_default();
        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        info!(pool = self.id, "worker pool stopped");
    }
}

// ------------- SharedPool -------------
struct SharedPoolState {
    pool: Option<Arc<WorkerPool>>,
    leases: usize,
}

/// Reference-counted owner of the process-wide worker pool.
pub struct SharedPool {
    parallelism: usize,
    state: Mutex<SharedPoolState>,
}

impl SharedPool {
    pub fn new(parallelism: usize) -> Arc<Self> {
        Arc::new(Self {
            parallelism,
            state: Mutex::new(SharedPoolState { pool: None, leases: 0 }),
        })
    }

    pub fn acquire(self: &Arc<Self>) -> PoolLease {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let pool = match &state.pool {
            Some(pool) => Arc::clone(pool),
            None => {
                let pool = Arc::new(WorkerPool::new(self.parallelism));
                state.pool = Some(Arc::clone(&pool));
                pool
            }
        };
        state.leases += 1;
        debug!(leases = state.leases, "pool lease acquired");
        PoolLease {
            shared: Arc::clone(self),
            pool,
            released: AtomicBool::new(false),
        }
    }

    fn release(&self) {
        let stopping = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.leases = state.leases.saturating_sub(1);
            debug!(leases = state.leases, "pool lease released");
            if state.leases == 0 { state.pool.take() } else { None }
        };
        if let Some(pool) = stopping {
            pool.shutdown();
        }
    }

    pub fn lease_count(&self) -> usize {
        self.state.lock().map(|s| s.leases).unwrap_or(0)
    }
    pub fn is_running(&self) -> bool {
        self.state.lock().map(|s| s.pool.is_some()).unwrap_or(false)
    }
}

/// One tree's handle on the shared pool.
pub struct PoolLease {
    shared: Arc<SharedPool>,
    pool: Arc<WorkerPool>,
    released: AtomicBool,
}

impl TaskRunner for PoolLease {
    fn name(&self) -> &'static str {
        "pool"
    }
    fn submit(&self, task: Task) -> TaskFuture {
        self.pool.submit(task)
    }
    fn shutdown(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.shared.release();
        }
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.shutdown();
    }
}
