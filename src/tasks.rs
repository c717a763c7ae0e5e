use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::warn;

use crate::error::KiraError;

/// Shared flag telling every branch of a run to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), KiraError> {
        if self.is_cancelled() {
            return Err(KiraError::Cancelled);
        }
        Ok(())
    }
}

/// Bounded pool of independent branches sharing one cancel token.
///
/// The first failing branch cancels the token; branches that have not
/// started yet are skipped, and the group reports that first failure.
pub struct TaskGroup {
    pool: ThreadPool,
    cancel: CancelToken,
}

impl TaskGroup {
    pub fn new(threads: usize, cancel: CancelToken) -> Result<Self, KiraError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("kira-pg-{index}"))
            .build()
            .map_err(|err| KiraError::Filesystem(format!("thread pool: {err}")))?;
        Ok(Self { pool, cancel })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Runs `task` over every item. Results keep the input order no matter
    /// in which order the branches complete.
    pub fn run<T, R, F>(&self, items: Vec<T>, task: F) -> Result<Vec<R>, KiraError>
    where
        T: Send,
        R: Send,
        F: Fn(T, &CancelToken) -> Result<R, KiraError> + Sync + Send,
    {
        let first_error = Mutex::new(None);
        let cancel = &self.cancel;
        let results: Vec<Option<R>> = self.pool.install(|| {
            items
                .into_par_iter()
                .map(|item| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    match task(item, cancel) {
                        Ok(value) => Some(value),
                        Err(err) => {
                            record_failure(&first_error, err);
                            cancel.cancel();
                            None
                        }
                    }
                })
                .collect()
        });

        let first_error = first_error
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(err) = first_error {
            return Err(err);
        }
        cancel.check()?;
        Ok(results.into_iter().flatten().collect())
    }
}

fn record_failure(slot: &Mutex<Option<KiraError>>, err: KiraError) {
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let replace = match guard.as_ref() {
        None => true,
        Some(existing) => existing.is_cancelled() && !err.is_cancelled(),
    };
    if replace {
        if !err.is_cancelled() {
            warn!("branch failed, cancelling siblings: {err}");
        }
        *guard = Some(err);
    }
}

/// Number of concurrent branches when every branch asks for
/// `per_task_threads` cores on a host with `host_threads` cores.
pub fn bounded_parallelism(requested: usize, per_task_threads: usize, host_threads: usize) -> usize {
    let cap = (host_threads / per_task_threads.max(1)).max(1);
    requested.max(1).min(cap)
}

pub fn host_threads() -> usize {
    std::thread::available_parallelism()
        .map(|value| value.get())
        .unwrap_or(1)
}
