//! Execution contexts for camera (un)binding
//!
//! Camera stacks usually insist that use-cases are bound from one designated
//! thread. The controller never calls the frame source directly; it hands a
//! job to a [`BindingContext`] and awaits the outcome.

use crate::error::BindError;
use async_trait::async_trait;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Work item run on the binding context
pub type BindingJob = Box<dyn FnOnce() -> Result<(), BindError> + Send>;

#[async_trait]
pub trait BindingContext: Send + Sync {
    /// Run `job` on this context and wait for it to finish
    async fn execute(&self, job: BindingJob) -> Result<(), BindError>;
}

/// Runs binding jobs directly on the calling task
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineBindingContext;

#[async_trait]
impl BindingContext for InlineBindingContext {
    async fn execute(&self, job: BindingJob) -> Result<(), BindError> {
        job()
    }
}

type QueuedJob = (BindingJob, oneshot::Sender<Result<(), BindError>>);

/// Runs binding jobs on one dedicated OS thread, in submission order
pub struct ThreadBindingContext {
    name: String,
    sender: Mutex<Option<Sender<QueuedJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadBindingContext {
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = unbounded::<QueuedJob>();

        let thread_name = name.clone();
        let handle = std::thread::Builder::new().name(name.clone()).spawn(move || {
            debug!("Binding context {} started", thread_name);
            while let Ok((job, reply)) = rx.recv() {
                let outcome = match catch_unwind(AssertUnwindSafe(job)) {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!("Binding job panicked on {}", thread_name);
                        Err(BindError::UseCase("binding job panicked".to_string()))
                    }
                };
                let _ = reply.send(outcome);
            }
            debug!("Binding context {} stopped", thread_name);
        })?;

        info!("Binding context {} spawned", name);
        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting jobs and join the thread once queued jobs have run
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("Binding context {} thread panicked", self.name);
            }
        }
    }
}

#[async_trait]
impl BindingContext for ThreadBindingContext {
    async fn execute(&self, job: BindingJob) -> Result<(), BindError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let sender = self.sender.lock();
            let sender = sender.as_ref().ok_or(BindError::ContextClosed)?;
            sender
                .send((job, reply_tx))
                .map_err(|_| BindError::ContextClosed)?;
        }
        reply_rx.await.map_err(|_| BindError::ContextClosed)?
    }
}

impl Drop for ThreadBindingContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
