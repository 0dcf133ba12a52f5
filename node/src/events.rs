//! Lifecycle notifications for code outside the node core.
//!
//! Subscribers register on a [`LifecycleEvents`] before it is handed to
//! `Application::new`. Setup subscribers run once during setup and can veto
//! it; shutdown subscribers run after every component has stopped.

/// Setup hook. An `Err` aborts setup with the given reason.
pub type SetupListener = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

pub type ShutdownListener = Box<dyn Fn() + Send + Sync>;

/// Synchronous fan-out of the setup and shutdown events.
///
/// Listeners are invoked inline in registration order.
#[derive(Default)]
pub struct LifecycleEvents {
    setup: Vec<(String, SetupListener)>,
    shutdown: Vec<(String, ShutdownListener)>,
}

impl LifecycleEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_setup(&mut self, name: impl Into<String>, listener: SetupListener) {
        self.setup.push((name.into(), listener));
    }

    pub fn on_shutdown(&mut self, name: impl Into<String>, listener: ShutdownListener) {
        self.shutdown.push((name.into(), listener));
    }

    /// Run setup listeners, stopping at the first failure.
    pub fn emit_setup(&self) -> Result<(), crate::NodeError> {
        for (name, listener) in &self.setup {
            if let Err(reason) = listener() {
                tracing::error!(subscriber = %name, %reason, "setup subscriber failed");
                return Err(crate::NodeError::Setup {
                    subscriber: name.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }

    pub fn emit_shutdown(&self) {
        for (name, listener) in &self.shutdown {
            tracing::debug!(subscriber = %name, "notifying shutdown");
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn setup_stops_at_first_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = LifecycleEvents::new();
        let c = Arc::clone(&calls);
        events.on_setup(
            "ok",
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        events.on_setup("port", Box::new(|| Err("port in use".to_string())));
        let c = Arc::clone(&calls);
        events.on_setup(
            "never",
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let err = events.emit_setup().unwrap_err();
        assert!(matches!(
            err,
            crate::NodeError::Setup { ref subscriber, .. } if subscriber == "port"
        ));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_reaches_every_listener() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = LifecycleEvents::new();
        for name in ["a", "b"] {
            let c = Arc::clone(&calls);
            events.on_shutdown(
                name,
                Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        events.emit_shutdown();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
