//! Bounded-concurrency processing of an item list.
//!
//! [`ConcurrentProcessor::process`] runs a handler over every item with at
//! most `max_concurrency` invocations in flight. A fixed set of workers pulls
//! the next unclaimed index from a shared counter until the list is
//! exhausted, so items start in input order but may finish in any order.
//! Each result is stored at its own index.
//!
//! Workers are plain futures joined on the caller's task: handlers may borrow
//! from the caller and nothing needs to be `'static` or `Send`.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::{debug, warn};

/// Default number of concurrent handler invocations.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Progress callback invoked with `(completed, total)` after each item.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Per-call processing options.
#[derive(Clone, Default)]
pub struct ProcessOptions {
    /// Overrides the processor's concurrency for this call.
    pub max_concurrency: Option<usize>,
    /// Called after every item completes, successfully or not.
    pub on_progress: Option<ProgressFn>,
    /// Abandon unstarted items after the first failure and return it.
    pub stop_on_error: bool,
}

impl ProcessOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency for this call.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    /// Sets the progress callback.
    pub fn with_progress(mut self, on_progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    /// Enables stop-on-error.
    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }
}

impl fmt::Debug for ProcessOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessOptions")
            .field("max_concurrency", &self.max_concurrency)
            .field("on_progress", &self.on_progress.is_some())
            .field("stop_on_error", &self.stop_on_error)
            .finish()
    }
}

/// A handler failure tagged with the index of the item that caused it.
#[derive(Debug)]
pub struct ItemFailure<E> {
    /// Input index of the failed item.
    pub index: usize,
    /// The handler's error.
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for ItemFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {} failed: {}", self.index, self.error)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ItemFailure<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Results of a completed `process` call.
#[derive(Debug)]
pub struct ProcessOutcome<R, E> {
    /// One slot per input item; `None` where the handler failed.
    pub results: Vec<Option<R>>,
    /// Failures sorted by index.
    pub errors: Vec<ItemFailure<E>>,
}

impl<R, E> ProcessOutcome<R, E> {
    /// Number of items whose handler succeeded.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }
}

/// Runs handlers over item lists with bounded parallelism.
#[derive(Debug, Clone)]
pub struct ConcurrentProcessor {
    max_concurrency: usize,
}

impl Default for ConcurrentProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl ConcurrentProcessor {
    /// Creates a processor; a concurrency of 0 is treated as 1.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Get the configured concurrency.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Invokes `handler` exactly once per item (unless stopped early) with
    /// at most the configured number of invocations in flight.
    ///
    /// # Errors
    ///
    /// Only with `stop_on_error`: returns the first failure once every
    /// already-running handler has finished. Without it, failures are
    /// collected in [`ProcessOutcome::errors`] and never cancel other items.
    pub async fn process<'a, T, R, E, H, Fut>(
        &self,
        items: &'a [T],
        handler: H,
        options: ProcessOptions,
    ) -> Result<ProcessOutcome<R, E>, ItemFailure<E>>
    where
        H: Fn(&'a T, usize) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: fmt::Display,
    {
        let total = items.len();
        if total == 0 {
            return Ok(ProcessOutcome {
                results: Vec::new(),
                errors: Vec::new(),
            });
        }

        let workers = options
            .max_concurrency
            .unwrap_or(self.max_concurrency)
            .max(1)
            .min(total);
        debug!(total, workers, "Processing items");

        let next = AtomicUsize::new(0);
        let completed = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let slots: Mutex<Vec<Option<R>>> = Mutex::new((0..total).map(|_| None).collect());
        let errors: Mutex<Vec<ItemFailure<E>>> = Mutex::new(Vec::new());
        let first_failure: Mutex<Option<ItemFailure<E>>> = Mutex::new(None);

        let (next, completed, stop) = (&next, &completed, &stop);
        let (slots, errors, first_failure) = (&slots, &errors, &first_failure);
        let handler = &handler;
        let options = &options;

        let pool = (0..workers).map(|worker| async move {
            loop {
                if stop.load(Ordering::SeqCst) {
                    debug!(worker, "Stop requested, worker exiting");
                    break;
                }
                let index = next.fetch_add(1, Ordering::SeqCst);
                if index >= total {
                    break;
                }

                match handler(&items[index], index).await {
                    Ok(value) => {
                        slots.lock().expect("result slots lock poisoned")[index] = Some(value);
                    }
                    Err(error) => {
                        warn!(worker, index, error = %error, "Item handler failed");
                        let failure = ItemFailure { index, error };
                        if options.stop_on_error {
                            stop.store(true, Ordering::SeqCst);
                            let mut first = first_failure.lock().expect("failure lock poisoned");
                            if first.is_none() {
                                *first = Some(failure);
                                continue_progress(options, completed, total);
                                continue;
                            }
                        }
                        errors.lock().expect("errors lock poisoned").push(failure);
                    }
                }
                continue_progress(options, completed, total);
            }
        });
        join_all(pool).await;

        if let Some(failure) = first_failure.lock().expect("failure lock poisoned").take() {
            return Err(failure);
        }

        let results = std::mem::take(&mut *slots.lock().expect("result slots lock poisoned"));
        let mut errors = std::mem::take(&mut *errors.lock().expect("errors lock poisoned"));
        errors.sort_by_key(|f| f.index);
        Ok(ProcessOutcome { results, errors })
    }
}

fn continue_progress(options: &ProcessOptions, completed: &AtomicUsize, total: usize) {
    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(on_progress) = &options.on_progress {
        on_progress(done, total);
    }
}
