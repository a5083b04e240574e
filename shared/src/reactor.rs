//! The I/O thread behind a server or client
//!
//! A [`Reactor`] owns a single-threaded tokio runtime and, once started, runs
//! it on a dedicated OS thread until [`Reactor::stop`] is called. Accept and
//! read loops are spawned onto it through a cloneable [`ReactorHandle`]; the
//! application thread uses the same handle to drive synchronous writes while
//! the reactor thread keeps polling the I/O driver.
//!
//! Each server and client owns its own reactor, so several instances can live
//! in one process and shut down deterministically.

use crate::error::TransportError;
use log::{debug, error};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::runtime::{Builder, EnterGuard, Handle, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owner of the reactor thread and its runtime
#[derive(Debug)]
pub struct Reactor {
    name: String,
    /// Present until the reactor is started (or stopped without starting)
    runtime: Option<Runtime>,
    handle: ReactorHandle,
    stop_tx: watch::Sender<bool>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Cloneable access to a reactor from any thread
#[derive(Debug, Clone)]
pub struct ReactorHandle {
    runtime: Handle,
    stop: watch::Receiver<bool>,
    running: Arc<AtomicBool>,
}

/// Resolves once the owning reactor has been asked to stop
///
/// Every long-running loop on the reactor selects on this next to its I/O so
/// that stopping never leaves a loop spinning.
#[derive(Debug, Clone)]
pub struct StopSignal {
    stop: watch::Receiver<bool>,
}

impl Reactor {
    /// Builds the runtime without starting the thread.
    pub fn new(name: &str) -> Result<Self, TransportError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = ReactorHandle {
            runtime: runtime.handle().clone(),
            stop: stop_rx,
            running: Arc::new(AtomicBool::new(false)),
        };

        Ok(Self {
            name: name.to_string(),
            runtime: Some(runtime),
            handle,
            stop_tx,
            thread: None,
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Moves the runtime onto its own thread and begins processing I/O.
    ///
    /// A reactor runs at most once: starting it again, or after a stop,
    /// fails with [`TransportError::AlreadyStarted`].
    pub fn start(&mut self) -> Result<(), TransportError> {
        let runtime = self.runtime.take().ok_or(TransportError::AlreadyStarted)?;
        let mut signal = self.handle.stop_signal();
        let running = Arc::clone(&self.handle.running);
        let name = self.name.clone();

        // Flag is raised before the thread exists so a send issued right
        // after start() is not rejected.
        running.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                debug!("{} thread started", name);

                runtime.block_on(async move {
                    signal.wait().await;
                    // Give loops woken by the stop signal a chance to exit
                    // on their own before the runtime drops them.
                    tokio::task::yield_now().await;
                });

                running.store(false, Ordering::SeqCst);
                drop(runtime);
                debug!("{} thread stopped", name);
            });

        match spawned {
            Ok(thread) => {
                self.thread = Some(thread);
                Ok(())
            }
            Err(e) => {
                self.handle.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Signals every loop to stop, then joins the reactor thread.
    ///
    /// Idempotent. Tasks that did not observe the signal are dropped with the
    /// runtime, so nothing is queued after this returns.
    pub fn stop(&mut self) {
        self.stop_tx.send_replace(true);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("{} thread panicked", self.name);
            }
        }

        self.handle.running.store(false, Ordering::SeqCst);
        self.runtime.take();
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ReactorHandle {
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Runs a future to completion on the calling thread.
    ///
    /// Socket readiness is delivered by the reactor thread, so this must only
    /// be called from outside the reactor while it is running.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Enters the runtime context, needed to register std sockets with the
    /// reactor's I/O driver.
    pub fn enter(&self) -> EnterGuard<'_> {
        self.runtime.enter()
    }

    pub fn stop_signal(&self) -> StopSignal {
        StopSignal::new(self.stop.clone())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl StopSignal {
    pub(crate) fn new(stop: watch::Receiver<bool>) -> Self {
        Self { stop }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Waits until a stop is requested. Cancel safe.
    pub async fn wait(&mut self) {
        while !*self.stop.borrow_and_update() {
            // Sender dropped means the reactor itself is gone
            if self.stop.changed().await.is_err() {
                return;
            }
        }
    }
}
