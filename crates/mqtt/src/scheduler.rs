//! One-shot timer facility used for reconnect attempts.
//!
//! Reconnects fire from the scheduler's context, never from the transport
//! callback context. `schedule` is fire-and-forget: it queues the task and
//! returns immediately.
//!
//! The default [`TimerScheduler`] owns a dedicated background thread running
//! a current-thread tokio runtime, so it works whether or not the caller is
//! inside a runtime.

use std::{thread, time::Duration};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::error::SchedulerError;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks once after a delay.
pub trait Scheduler: Send + Sync {
    /// Runs `task` once after `delay`.
    ///
    /// # Errors
    /// `SchedulerError::Shutdown` once `shutdown()` has been called.
    fn schedule(&self, delay: Duration, task: Task) -> Result<(), SchedulerError>;

    /// Cancels every pending task and rejects new ones.
    ///
    /// A task that has already started is not interrupted.
    fn shutdown(&self);
}

struct Job {
    delay: Duration,
    task: Task,
}

/// Default scheduler backed by a single dedicated timer thread.
pub struct TimerScheduler {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    cancel: CancellationToken,
}

impl TimerScheduler {
    /// Starts the timer thread.
    ///
    /// # Errors
    /// `SchedulerError::Start` if the runtime or the thread cannot be created.
    pub fn new() -> Result<Self, SchedulerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();

        thread::Builder::new()
            .name("iotdatatunnel-timer".into())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        tokio::select! {
                            _ = worker_cancel.cancelled() => break,
                            job = receiver.recv() => {
                                let Some(Job { delay, task }) = job else { break };
                                let cancel = worker_cancel.clone();
                                tokio::spawn(async move {
                                    tokio::select! {
                                        _ = cancel.cancelled() => {
                                            trace!("Scheduled task cancelled");
                                        }
                                        _ = tokio::time::sleep(delay) => task(),
                                    }
                                });
                            }
                        }
                    }
                    debug!("Timer thread stopped");
                });
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            cancel,
        })
    }
}

impl Scheduler for TimerScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> Result<(), SchedulerError> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(SchedulerError::Shutdown)?;
        sender
            .send(Job { delay, task })
            .map_err(|_| SchedulerError::Shutdown)
    }

    fn shutdown(&self) {
        self.sender.lock().take();
        self.cancel.cancel();
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
