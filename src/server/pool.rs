//! Bounded handler tasks and free-lists of request/response objects.
//!
//! Each handler task owns a one-slot channel. Idle handlers wait on it;
//! [`HandlerPool::assign`] hands a job to an idle one, spawns a new one
//! while under the cap, or gives the job back.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, trace, Instrument};

use crate::config::PoolConfig;
use crate::error::{panic_message, ServletError};
use crate::http::request::Request;
use crate::http::response::Response;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type JobHandler<J> = Arc<dyn Fn(J) -> BoxFuture<()> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A job the pool had no handler for.
#[derive(Debug)]
pub struct PoolFull<J>(pub J);

/// Snapshot of the handler pool. `idle + busy <= max` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub busy: usize,
    pub max: usize,
    pub rejected: u64,
}

#[derive(Debug, Clone)]
pub struct HandlerPoolConfig {
    pub max_handlers: usize,
    pub min_idle: usize,
    pub idle_timeout: Duration,
}

impl From<&PoolConfig> for HandlerPoolConfig {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_handlers: config.max_handlers.max(1),
            min_idle: config.min_idle_handlers.min(config.max_handlers),
            idle_timeout: config.idle_timeout(),
        }
    }
}

struct PoolState<J> {
    idle: Vec<(usize, mpsc::Sender<J>)>,
    busy: usize,
    next_id: usize,
}

struct Shared<J> {
    state: Mutex<PoolState<J>>,
    config: HandlerPoolConfig,
    handler: JobHandler<J>,
    rejected: AtomicU64,
}

pub struct HandlerPool<J> {
    shared: Arc<Shared<J>>,
}

impl<J> Clone for HandlerPool<J> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<J: Send + 'static> HandlerPool<J> {
    /// Creates the pool and starts `min_idle` handlers. Must be called
    /// from within a tokio runtime.
    pub fn new(config: HandlerPoolConfig, handler: JobHandler<J>) -> Self {
        let pool = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    busy: 0,
                    next_id: 0,
                }),
                config,
                handler,
                rejected: AtomicU64::new(0),
            }),
        };

        let mut state = lock(&pool.shared.state);
        for _ in 0..pool.shared.config.min_idle {
            let id = state.next_id;
            state.next_id += 1;
            let (tx, rx) = mpsc::channel(1);
            state.idle.push((id, tx.clone()));
            spawn_worker(Arc::clone(&pool.shared), id, tx, rx, None);
        }
        drop(state);
        pool
    }

    /// Hands `job` to a handler, or returns it when every handler is busy
    /// and the pool is at its cap.
    pub fn assign(&self, job: J) -> Result<(), PoolFull<J>> {
        let mut job = job;
        let mut state = lock(&self.shared.state);

        while let Some((id, tx)) = state.idle.pop() {
            match tx.try_send(job) {
                Ok(()) => {
                    state.busy += 1;
                    trace!(worker = id, "job assigned to idle handler");
                    return Ok(());
                }
                // The handler is exiting; try the next one.
                Err(TrySendError::Closed(back)) | Err(TrySendError::Full(back)) => job = back,
            }
        }

        if state.idle.len() + state.busy < self.shared.config.max_handlers {
            let id = state.next_id;
            state.next_id += 1;
            state.busy += 1;
            drop(state);
            let (tx, rx) = mpsc::channel(1);
            spawn_worker(Arc::clone(&self.shared), id, tx, rx, Some(job));
            debug!(worker = id, "handler spawned");
            return Ok(());
        }

        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        Err(PoolFull(job))
    }

    pub fn stats(&self) -> PoolStats {
        let state = lock(&self.shared.state);
        PoolStats {
            idle: state.idle.len(),
            busy: state.busy,
            max: self.shared.config.max_handlers,
            rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }

    /// Waits until no handler is busy, or `limit` has passed. Returns
    /// whether the pool went quiet.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.stats().busy == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn spawn_worker<J: Send + 'static>(
    shared: Arc<Shared<J>>,
    id: usize,
    tx: mpsc::Sender<J>,
    rx: mpsc::Receiver<J>,
    first: Option<J>,
) {
    let span = tracing::debug_span!("worker", id);
    tokio::spawn(worker_loop(shared, id, tx, rx, first).instrument(span));
}

/// What an idle handler does once its wait times out.
enum IdleOutcome {
    Retire,
    Keep,
    /// Assigned just as the timeout fired; the job is in the channel.
    Assigned,
}

/// Runs jobs until the handler has been idle past the timeout while more
/// than `min_idle` handlers are waiting.
async fn worker_loop<J: Send + 'static>(
    shared: Arc<Shared<J>>,
    id: usize,
    tx: mpsc::Sender<J>,
    mut rx: mpsc::Receiver<J>,
    first: Option<J>,
) {
    let mut job = first;
    loop {
        if let Some(work) = job.take() {
            let run = AssertUnwindSafe((shared.handler)(work)).catch_unwind().await;
            if let Err(payload) = run {
                error!(panic = %panic_message(payload.as_ref()), "handler job panicked");
            }
            let mut state = lock(&shared.state);
            state.busy -= 1;
            state.idle.push((id, tx.clone()));
        }

        job = match tokio::time::timeout(shared.config.idle_timeout, rx.recv()).await {
            Ok(Some(work)) => Some(work),
            Ok(None) => break,
            Err(_) => match idle_timed_out(&shared, id) {
                IdleOutcome::Retire => {
                    trace!("idle handler retired");
                    break;
                }
                IdleOutcome::Keep => None,
                IdleOutcome::Assigned => match rx.recv().await {
                    Some(work) => Some(work),
                    None => break,
                },
            },
        };
    }
}

fn idle_timed_out<J>(shared: &Shared<J>, id: usize) -> IdleOutcome {
    let mut state = lock(&shared.state);
    let surplus = state.idle.len() > shared.config.min_idle;
    match state.idle.iter().position(|(i, _)| *i == id) {
        Some(pos) if surplus => {
            state.idle.remove(pos);
            IdleOutcome::Retire
        }
        Some(_) => IdleOutcome::Keep,
        None => IdleOutcome::Assigned,
    }
}

/// Values that can be reused across request cycles.
pub trait Recycle: Default + Send {
    /// Returns the value to its freshly constructed state.
    fn recycle(&mut self);
}

impl Recycle for Request {
    fn recycle(&mut self) {
        *self = Request::default();
    }
}

impl Recycle for Response {
    fn recycle(&mut self) {
        Response::recycle(self);
    }
}

struct FreeList<T> {
    free: Vec<T>,
    created: usize,
}

/// A capped free-list. Objects are created on demand until `cap` exist;
/// after that, acquiring with none free is an error.
pub struct ObjectPool<T: Recycle> {
    name: &'static str,
    cap: usize,
    inner: Mutex<FreeList<T>>,
}

impl<T: Recycle> ObjectPool<T> {
    pub fn new(name: &'static str, cap: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            cap,
            inner: Mutex::new(FreeList {
                free: Vec::new(),
                created: 0,
            }),
        })
    }

    pub fn acquire(self: &Arc<Self>) -> Result<Pooled<T>, ServletError> {
        let mut inner = lock(&self.inner);
        let value = match inner.free.pop() {
            Some(value) => value,
            None if inner.created < self.cap => {
                inner.created += 1;
                T::default()
            }
            None => return Err(ServletError::ObjectPoolExhausted(self.name)),
        };
        Ok(Pooled {
            value,
            pool: Arc::clone(self),
        })
    }

    /// Objects currently on the free-list.
    pub fn available(&self) -> usize {
        lock(&self.inner).free.len()
    }

    /// Objects created so far.
    pub fn created(&self) -> usize {
        lock(&self.inner).created
    }

    fn release(&self, mut value: T) {
        value.recycle();
        lock(&self.inner).free.push(value);
    }
}

/// A pooled object, returned to its pool when dropped.
pub struct Pooled<T: Recycle> {
    value: T,
    pool: Arc<ObjectPool<T>>,
}

impl<T: Recycle> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Recycle> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Recycle> Drop for Pooled<T> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.value));
    }
}
