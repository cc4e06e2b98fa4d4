//! Background job execution

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::core::config::WorkerPoolConfig;
use crate::core::error::Error;
use crate::core::types::Result;

/// Scheduling class of a job. Asset loads run at `Low` so frame-critical work
/// sharing the pool is never starved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobPriority {
    High,
    Low,
}

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget job submission.
pub trait JobDispatcher: Send + Sync {
    fn dispatch(&self, job: Job, priority: JobPriority);
}

#[derive(Default)]
struct JobQueues {
    high: VecDeque<Job>,
    low: VecDeque<Job>,
    /// Queued plus running
    outstanding: usize,
}

#[derive(Default)]
struct Shared {
    queues: Mutex<JobQueues>,
    idle: Condvar,
}

impl Shared {
    /// Take the most urgent queued job and run it.
    fn run_next(&self) {
        let job = {
            let mut queues = self.queues.lock();
            queues.high.pop_front().or_else(|| queues.low.pop_front())
        };
        let Some(job) = job else {
            return;
        };

        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Worker job panicked: {}", message);
        }

        let mut queues = self.queues.lock();
        queues.outstanding -= 1;
        if queues.outstanding == 0 {
            self.idle.notify_all();
        }
    }
}

/// Fixed-size worker pool on top of a dedicated rayon thread pool.
///
/// Jobs go into a shared two-level queue; every dispatch spawns one rayon
/// task that runs whichever queued job is most urgent at the time it starts.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(config: &WorkerPoolConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("rtscene-worker-{}", i))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;
        log::debug!("Started worker pool with {} threads", config.threads);
        Ok(Self { pool, shared: Arc::new(Shared::default()) })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Jobs queued or running.
    pub fn outstanding(&self) -> usize {
        self.shared.queues.lock().outstanding
    }

    /// Block until every dispatched job has finished.
    pub fn wait_idle(&self) {
        let mut queues = self.shared.queues.lock();
        while queues.outstanding > 0 {
            self.shared.idle.wait(&mut queues);
        }
    }
}

impl JobDispatcher for WorkerPool {
    fn dispatch(&self, job: Job, priority: JobPriority) {
        {
            let mut queues = self.shared.queues.lock();
            match priority {
                JobPriority::High => queues.high.push_back(job),
                JobPriority::Low => queues.low.push_back(job),
            }
            queues.outstanding += 1;
        }
        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || shared.run_next());
    }
}

/// Runs every job inline on the calling thread. Deterministic, for tests and tools.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateDispatcher;

impl JobDispatcher for ImmediateDispatcher {
    fn dispatch(&self, job: Job, _priority: JobPriority) {
        job();
    }
}
