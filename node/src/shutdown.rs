//! Process-wide stop signal.
//!
//! OS signals, the disk watchdog and embedders all converge on one
//! [`StopSignal`]. The first request wins; later ones are only logged.
//! `Application::run` waits on it before stopping the node.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;

struct Inner {
    stopped: AtomicBool,
    requests: AtomicU64,
    tx: watch::Sender<bool>,
}

/// Cloneable handle to the node's stop request.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                stopped: AtomicBool::new(false),
                requests: AtomicU64::new(0),
                tx,
            }),
        }
    }

    /// Request a stop. Returns `true` only for the request that actually
    /// triggered it.
    pub fn signal_stop(&self, reason: &str) -> bool {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!(reason, "stop already requested");
            return false;
        }
        tracing::warn!(reason, "server stopping");
        self.inner.tx.send_replace(true);
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Every call to [`signal_stop`](Self::signal_stop), effective or not.
    pub fn requests(&self) -> u64 {
        self.inner.requests.load(Ordering::Relaxed)
    }

    /// Resolve once a stop has been requested.
    pub async fn wait(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives in `inner`, so the channel cannot close here.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Translate SIGINT/SIGTERM into stop requests until the process exits.
    pub async fn listen_for_os_signals(self) {
        #[cfg(unix)]
        let mut terminate =
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    None
                }
            };

        loop {
            #[cfg(unix)]
            let terminated = async {
                match terminate.as_mut() {
                    Some(stream) => {
                        stream.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            #[cfg(not(unix))]
            let terminated = std::future::pending::<()>();

            tokio::select! {
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "failed to listen for SIGINT");
                        return;
                    }
                    tracing::info!("received SIGINT");
                    self.signal_stop("SIGINT");
                }
                _ = terminated => {
                    tracing::info!("received SIGTERM");
                    self.signal_stop("SIGTERM");
                }
            }
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
