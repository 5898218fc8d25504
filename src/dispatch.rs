//! The bounded queue and worker pool which push entries to Loki off the caller's thread.
//!
//! Callers enqueue [`Entry`] values without ever blocking: when the queue is full or the pool is
//! shut down the entry is dropped and counted. A fixed number of named worker threads pull from
//! the queue and hand each entry to a [`LogSender`]. [`Dispatcher::flush`] and
//! [`Dispatcher::shutdown`] wait until every accepted entry was processed.
//!
//! Diagnostics of the pool and the calls to the [`ErrorHandler`] run with dispatching disabled
//! on the current thread. A host which forwards `log` records into the provider therefore
//! neither deadlocks on the queue nor turns a failing push into a new entry.
use crate::client::LogSender;
use crate::error::{LokiError, Result};
use crate::labels::Fields;
use crate::DIAGNOSTIC_TARGET;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

/// The callback which is invoked for every push which failed
pub type ErrorHandler = Arc<dyn Fn(&LokiError) + Send + Sync>;

thread_local! {
    static REPORTING: Cell<bool> = const { Cell::new(false) };
}

/// Resets the reporting flag of the current thread when dropped, even while unwinding.
struct ReportingGuard {
    previous: bool,
}

impl Drop for ReportingGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        REPORTING.with(|flag| flag.set(previous));
    }
}

/// Run `f` while entries dispatched from this thread are discarded.
fn reporting<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ReportingGuard {
        previous: REPORTING.with(|flag| flag.replace(true)),
    };
    f()
}

fn is_reporting() -> bool {
    REPORTING.with(Cell::get)
}

/// The default [`ErrorHandler`]: report the failure through the `log` facade.
///
/// The handler runs on a worker thread which discards its own entries, so a host logger which
/// feeds `log` records back into the provider does not push these reports to Loki.
pub fn log_error_handler() -> ErrorHandler {
    Arc::new(|error: &LokiError| {
        log::error!(target: DIAGNOSTIC_TARGET, "Failed to send log to Loki: {}", error);
    })
}

/// A log entry waiting to be pushed.
#[derive(Debug)]
pub struct Entry {
    /// The moment the entry was written
    pub timestamp: SystemTime,
    /// The Loki name of the level
    pub level: &'static str,
    pub message: String,
    pub fields: Fields,
}

/// Counters describing what happened to the entries handed to the provider.
#[derive(Debug, Default)]
pub struct ProviderMetrics {
    /// Entries accepted into the queue
    queued: AtomicU64,
    /// Entries Loki acknowledged
    sent: AtomicU64,
    /// Entries whose push failed
    failed: AtomicU64,
    /// Entries dropped because the queue was full or the provider was closed
    dropped: AtomicU64,
}

impl ProviderMetrics {
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the previous drop count
    fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed)
    }
}

/// Counts entries which were accepted but not yet processed.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    /// Returns `false` if entries were still pending at the deadline. A timeout too large for
    /// an [`Instant`] waits without a deadline.
    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut count = self.count.lock();
        while *count > 0 {
            match deadline {
                Some(deadline) => {
                    if self.idle.wait_until(&mut count, deadline).timed_out() {
                        return *count == 0;
                    }
                }
                None => self.idle.wait(&mut count),
            }
        }
        true
    }
}

/// The worker pool.
pub struct Dispatcher {
    sender: Mutex<Option<Sender<Entry>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    pending: Arc<Pending>,
    metrics: Arc<ProviderMetrics>,
}

impl Dispatcher {
    /// Spawn `workers` threads which push entries through `client`.
    pub fn start(
        client: Arc<dyn LogSender>,
        workers: usize,
        queue_capacity: usize,
        on_error: ErrorHandler,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(LokiError::config(
                "ProviderConfig",
                "at least one worker is required",
            ));
        }
        if queue_capacity == 0 {
            return Err(LokiError::config(
                "ProviderConfig",
                "the queue capacity must be greater than zero",
            ));
        }

        let (sender, receiver) = bounded(queue_capacity);
        let pending = Arc::new(Pending::default());
        let metrics = Arc::new(ProviderMetrics::default());

        let dispatcher = Dispatcher {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Vec::with_capacity(workers)),
            pending,
            metrics,
        };

        for index in 0..workers {
            let worker = Worker {
                receiver: receiver.clone(),
                client: Arc::clone(&client),
                pending: Arc::clone(&dispatcher.pending),
                metrics: Arc::clone(&dispatcher.metrics),
                on_error: Arc::clone(&on_error),
            };
            let handle = thread::Builder::new()
                .name(format!("loki-push-{}", index))
                .spawn(move || worker.run());
            match handle {
                Ok(handle) => dispatcher.workers.lock().push(handle),
                Err(error) => {
                    // the workers which already run stop once the sender is gone
                    dispatcher.sender.lock().take();
                    return Err(error.into());
                }
            }
        }

        Ok(dispatcher)
    }

    /// Queue an entry without blocking. Returns `false` if it was dropped.
    ///
    /// Entries dispatched while this thread reports a diagnostic or a failed push are discarded
    /// without being counted.
    pub fn dispatch(&self, entry: Entry) -> bool {
        if is_reporting() {
            return false;
        }

        // the lock must not be held while logging, the log may come back here
        let sender = match self.sender.lock().as_ref() {
            Some(sender) => sender.clone(),
            None => {
                self.metrics.record_dropped();
                return false;
            }
        };

        self.pending.add();
        match sender.try_send(entry) {
            Ok(()) => {
                self.metrics.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.pending.done();
                let previous = self.metrics.record_dropped();
                if previous % 1000 == 0 {
                    reporting(|| {
                        log::warn!(
                            target: DIAGNOSTIC_TARGET,
                            "Loki push queue is full, {} log entries dropped so far",
                            previous + 1
                        )
                    });
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.pending.done();
                self.metrics.record_dropped();
                false
            }
        }
    }

    /// Wait until every queued entry was processed.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        if self.pending.wait_idle(timeout) {
            Ok(())
        } else {
            Err(LokiError::FlushTimeout(timeout))
        }
    }

    /// Stop accepting entries, then wait for the queue to drain and the workers to exit.
    ///
    /// Calling this more than once is fine; later calls only wait for what is still pending.
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        // dropping the only sender lets the workers run dry and exit
        self.sender.lock().take();
        self.flush(timeout)?;

        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                reporting(|| log::error!(target: DIAGNOSTIC_TARGET, "A Loki push worker panicked"));
            }
        }
        Ok(())
    }

    pub fn metrics(&self) -> &ProviderMetrics {
        &self.metrics
    }
}

struct Worker {
    receiver: Receiver<Entry>,
    client: Arc<dyn LogSender>,
    pending: Arc<Pending>,
    metrics: Arc<ProviderMetrics>,
    on_error: ErrorHandler,
}

impl Worker {
    fn run(self) {
        // nothing this thread logs is pushed again
        REPORTING.with(|flag| flag.set(true));
        log::debug!(target: DIAGNOSTIC_TARGET, "Loki push worker started");

        for entry in self.receiver.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                self.client
                    .send_log_at(entry.timestamp, entry.level, &entry.message, &entry.fields)
            }));
            match result {
                Ok(Ok(())) => {
                    self.metrics.sent.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(error)) => {
                    self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                    (self.on_error)(&error);
                }
                Err(_) => {
                    self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                    log::error!(target: DIAGNOSTIC_TARGET, "Sending a log entry to Loki panicked");
                }
            }
            self.pending.done();
        }

        log::debug!(target: DIAGNOSTIC_TARGET, "Loki push worker stopped");
    }
}
