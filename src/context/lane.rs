//! Confinement lanes.
//!
//! A lane is one named worker thread draining a bounded FIFO of jobs. Every
//! context is bound to exactly one lane and all of its work runs there, in
//! submission order.

use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::{debug, error};

use crate::error::{ContextError, MellonError, MellonResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Lane {
    name: String,
    tx: Sender<Job>,
    worker: Option<JoinHandle<()>>,
    thread: ThreadId,
    capacity: usize,
}

impl Lane {
    pub(crate) fn start(name: impl Into<String>, capacity: usize) -> Self {
        let name = name.into();
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<Job>(capacity);

        let lane_name = name.clone();
        let worker = thread::Builder::new()
            .name(format!("mellon-{name}"))
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(lane = %lane_name, "job panicked; lane keeps running");
                    }
                }
                debug!(lane = %lane_name, "lane stopped");
            })
            .expect("failed to spawn mellon lane");

        Self {
            name,
            tx,
            thread: worker.thread().id(),
            worker: Some(worker),
            capacity,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Returns true when called from this lane's own thread.
    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Queues `job` and returns immediately.
    ///
    /// From another thread this blocks while the queue is full. From the lane
    /// itself blocking would never end, so a full queue is an error.
    pub(crate) fn perform<F>(&self, job: F) -> MellonResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);
        if !self.is_current() {
            return self.tx.send(job).map_err(|_| self.disconnected());
        }
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ContextError::LaneFull {
                lane: self.name.clone(),
                capacity: self.capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(self.disconnected()),
        }
    }

    /// Runs `f` on the lane and waits for its result.
    ///
    /// Already on the lane, `f` runs inline. A panic inside `f` resumes on
    /// the calling thread.
    pub(crate) fn perform_and_wait<R, F>(&self, f: F) -> MellonResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }

        let (reply_tx, reply_rx) = bounded::<thread::Result<R>>(1);
        self.perform(move || {
            let _ = reply_tx.send(panic::catch_unwind(AssertUnwindSafe(f)));
        })?;

        match reply_rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(self.disconnected()),
        }
    }

    /// Waits until every job queued before this call has run.
    pub(crate) fn drain(&self) -> MellonResult<()> {
        self.perform_and_wait(|| ())
    }

    fn disconnected(&self) -> MellonError {
        ContextError::LaneDisconnected {
            lane: self.name.clone(),
        }
        .into()
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        // Replacing the sender closes the channel; the worker drains what is
        // queued, then exits.
        drop(mem::replace(&mut self.tx, bounded(1).0));
        if let Some(worker) = self.worker.take() {
            if thread::current().id() != self.thread {
                let _ = worker.join();
            }
        }
    }
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
