//! Worker pool that runs node drains.
//!
//! Nodes never own a thread. Each drain is a short unit of work handed to a
//! [`Dispatcher`], which runs it on one of a fixed set of workers and tells
//! it how many messages it may process before yielding. Panics in scheduled
//! work are caught on the worker, logged, and reported by
//! [`PoolDispatcher::shutdown`].

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use super::config::TransportConfig;
use super::error::TransportError;

/// A unit of work. Receives the number of messages it may process.
pub type Work = Box<dyn FnOnce(usize) + Send + 'static>;

/// Runs units of work on a shared pool.
///
/// No ordering is guaranteed between units.
pub trait Dispatcher: Send + Sync {
    /// Enqueues `work`. Must not block on the work itself.
    fn schedule(&self, work: Work);
}

/// Fixed-size pool of named worker threads fed by a channel.
pub struct PoolDispatcher {
    sender: Mutex<Option<Sender<Work>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    panics: Arc<Mutex<Vec<String>>>,
    throughput: usize,
}

impl PoolDispatcher {
    /// Starts `config.workers` workers.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] if the configuration does
    /// not validate, or [`TransportError::SpawnFailed`] if a thread cannot
    /// be started.
    pub fn start(config: &TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let (sender, receiver) = crossbeam_channel::unbounded::<Work>();
        let panics = Arc::new(Mutex::new(Vec::new()));
        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let receiver = receiver.clone();
            let panics = Arc::clone(&panics);
            let throughput = config.throughput;
            let handle = thread::Builder::new()
                .name(format!("sluice-worker-{index}"))
                .spawn(move || worker_main(&receiver, &panics, throughput))
                .map_err(|e| TransportError::SpawnFailed {
                    index,
                    message: e.to_string(),
                })?;
            workers.push(handle);
        }
        debug!(workers = config.workers, throughput = config.throughput, "dispatcher started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            panics,
            throughput: config.throughput,
        })
    }

    /// Throughput handed to every unit of work.
    #[must_use]
    pub fn throughput(&self) -> usize {
        self.throughput
    }

    /// Number of running workers.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.lock().len()
    }

    /// Panic messages caught so far.
    #[must_use]
    pub fn panics(&self) -> Vec<String> {
        self.panics.lock().clone()
    }

    /// Stops accepting work, lets queued work finish and joins the workers.
    ///
    /// Work scheduled afterwards is dropped. Calling this from a worker
    /// thread skips joining that worker.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::WorkerPanicked`] with the first caught
    /// panic if any unit of work panicked.
    pub fn shutdown(&self) -> Result<(), TransportError> {
        drop(self.sender.lock().take());

        let current = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                self.panics.lock().push("worker thread exited by panic".to_string());
            }
        }

        match self.panics.lock().first() {
            Some(msg) => Err(TransportError::WorkerPanicked(msg.clone())),
            None => Ok(()),
        }
    }
}

impl Dispatcher for PoolDispatcher {
    fn schedule(&self, work: Work) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => {
                if tx.send(work).is_err() {
                    warn!("dispatcher workers are gone; dropping scheduled work");
                }
            }
            None => warn!("work scheduled after dispatcher shutdown; dropping it"),
        }
    }
}

impl Drop for PoolDispatcher {
    fn drop(&mut self) {
        // Disconnects the channel. Workers exit on their own and are not joined.
        drop(self.sender.get_mut().take());
    }
}

impl std::fmt::Debug for PoolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolDispatcher")
            .field("workers", &self.workers())
            .field("throughput", &self.throughput)
            .finish_non_exhaustive()
    }
}

/// Extracts the message of a caught panic.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn worker_main(receiver: &Receiver<Work>, panics: &Mutex<Vec<String>>, throughput: usize) {
    while let Ok(work) = receiver.recv() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| work(throughput))) {
            let msg = panic_message(panic.as_ref());
            error!(panic = %msg, "scheduled work panicked");
            panics.lock().push(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config(workers: usize, throughput: usize) -> TransportConfig {
        TransportConfig::builder()
            .workers(workers)
            .throughput(throughput)
            .build()
    }

    #[test]
    fn test_runs_work_with_throughput() {
        let pool = PoolDispatcher::start(&config(2, 16)).unwrap();
        assert_eq!(pool.workers(), 2);
        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..10 {
            let tx = tx.clone();
            pool.schedule(Box::new(move |throughput| {
                let name = thread::current().name().map(str::to_string);
                tx.send((throughput, name)).unwrap();
            }));
        }
        for _ in 0..10 {
            let (throughput, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(throughput, 16);
            assert!(name.unwrap().starts_with("sluice-worker-"));
        }
        pool.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_drains_queued_work() {
        let pool = PoolDispatcher::start(&config(1, 1)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let count = Arc::clone(&count);
            pool.schedule(Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.shutdown().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 100);
        assert_eq!(pool.workers(), 0);

        // Dropped, not run.
        let late = Arc::clone(&count);
        pool.schedule(Box::new(move |_| {
            late.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_panics_are_caught_and_reported() {
        let pool = PoolDispatcher::start(&config(1, 1)).unwrap();
        let after = Arc::new(AtomicUsize::new(0));
        pool.schedule(Box::new(|_| panic!("operator blew up")));
        let seen = Arc::clone(&after);
        pool.schedule(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let err = pool.shutdown().unwrap_err();
        assert!(matches!(err, TransportError::WorkerPanicked(ref m) if m == "operator blew up"));
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(pool.panics().len(), 1);
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let err = PoolDispatcher::start(&config(0, 1)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidConfig(_)));
    }
}
