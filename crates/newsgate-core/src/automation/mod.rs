//! Automation runtime: concurrent task bookkeeping and graceful shutdown
//! for the orchestrator loop, queue processor, and retry sweeper.

pub mod scheduler;

pub use scheduler::{scheduler_from_config, LoopScheduler};

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Automation runtime that manages concurrent task lifecycles.
///
/// The runtime owns a `CancellationToken` shared by all spawned tasks and
/// collects their `JoinHandle`s for graceful shutdown (§5): a first signal
/// finishes the task currently in flight and exits; a second signal forces
/// immediate exit with code 130.
pub struct Runtime {
    cancel: CancellationToken,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Runtime {
    /// Create a new runtime with a fresh cancellation token.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Return a clone of the cancellation token for passing to tasks.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn an automation task with a descriptive name.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        tracing::info!(task = %name, "spawning automation task");
        let handle = tokio::spawn(future);
        self.handles.push((name, handle));
    }

    /// Return the number of spawned tasks.
    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Initiate graceful shutdown: cancel the token, then await all tasks
    /// with a 30-second timeout.
    pub async fn shutdown(&mut self) {
        tracing::info!("initiating graceful shutdown");
        self.cancel.cancel();

        let timeout_duration = Duration::from_secs(30);
        let handles: Vec<_> = self.handles.drain(..).collect();

        let shutdown = async {
            for (name, handle) in handles {
                match handle.await {
                    Ok(()) => tracing::info!(task = %name, "task completed cleanly"),
                    Err(e) => {
                        tracing::warn!(task = %name, error = %e, "task panicked during shutdown")
                    }
                }
            }
        };

        if tokio::time::timeout(timeout_duration, shutdown)
            .await
            .is_err()
        {
            tracing::warn!("shutdown timeout exceeded (30s), some tasks may still be running");
        } else {
            tracing::info!("graceful shutdown complete");
        }
    }

    /// Block until a shutdown signal is received, then gracefully stop all
    /// tasks. A second signal received while shutting down forces an
    /// immediate process exit with code 130.
    pub async fn run_until_shutdown(mut self) {
        wait_for_shutdown_signal().await;
        tokio::select! {
            () = self.shutdown() => {}
            () = wait_for_shutdown_signal() => {
                tracing::warn!("second shutdown signal received, exiting immediately");
                std::process::exit(130);
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for an OS shutdown signal (Ctrl+C or SIGTERM).
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "failed to register SIGTERM handler, using Ctrl+C only"
                );
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for Ctrl+C");
                } else {
                    tracing::info!("received Ctrl+C");
                }
                return;
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Ctrl+C handler error");
                }
                tracing::info!("received Ctrl+C");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        } else {
            tracing::info!("received Ctrl+C");
        }
    }
}
