use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

pub use rayon::ThreadPoolBuildError;

/// Background worker pool for work that must not block the main tick.
pub struct JobSystem {
    pool: ThreadPool,
}

impl JobSystem {
    pub fn new(num_threads: Option<usize>) -> Result<Self, ThreadPoolBuildError> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|index| format!("gen-worker-{index}"));
        if let Some(count) = num_threads {
            builder = builder.num_threads(count.max(1));
        }

        let pool = builder.build()?;
        debug!("job system started with {} threads", pool.current_num_threads());
        Ok(Self { pool })
    }

    pub fn thread_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `job` on the pool. The caller observes completion by polling the
    /// returned handle; nothing is pushed back to the caller's thread.
    pub fn spawn_polled<T, F>(&self, job: F) -> PolledTask<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let slot = Arc::new(TaskSlot {
            finished: AtomicBool::new(false),
            output: Mutex::new(None),
        });
        let worker_slot = Arc::clone(&slot);
        self.pool.spawn(move || {
            let output = job();
            *worker_slot
                .output
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(output);
            worker_slot.finished.store(true, Ordering::Release);
        });
        PolledTask { slot }
    }
}

impl Default for JobSystem {
    fn default() -> Self {
        let pool = ThreadPoolBuilder::new()
            .thread_name(|index| format!("gen-worker-{index}"))
            .build()
            .expect("failed to create default rayon thread pool");
        Self { pool }
    }
}

struct TaskSlot<T> {
    finished: AtomicBool,
    output: Mutex<Option<T>>,
}

/// Handle to a job started with [`JobSystem::spawn_polled`].
///
/// There is no cancellation and no timeout: a job that never returns keeps
/// its handle pending forever.
pub struct PolledTask<T> {
    slot: Arc<TaskSlot<T>>,
}

impl<T> PolledTask<T> {
    pub fn is_finished(&self) -> bool {
        self.slot.finished.load(Ordering::Acquire)
    }

    /// Takes the job output once the readiness flag is set. Returns `None`
    /// while the job is still running or after the output was taken.
    pub fn try_take(&mut self) -> Option<T> {
        if !self.is_finished() {
            return None;
        }
        self.slot
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
