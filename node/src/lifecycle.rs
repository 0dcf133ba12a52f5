//! Component lifecycle.
//!
//! Every long-lived service implementing [`Component`] moves through the
//! same [`Phase`]s. The [`LifecycleManager`] drives them: prepare and start
//! in construction order, stop in reverse, each stop awaited before the next
//! begins.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::events::LifecycleEvents;
use crate::NodeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Constructed,
    Prepared,
    Started,
    Stopping,
    Stopped,
}

/// A service with start/stop behavior.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// Validate configuration. Must not have side effects.
    fn on_prepare(&self) -> Result<(), NodeError> {
        Ok(())
    }

    async fn on_start(&self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Release resources. Must finish all outstanding work before returning.
    async fn on_stop(&self) {}
}

struct Child {
    component: Arc<dyn Component>,
    phase: Mutex<Phase>,
}

/// Move `phase` to `to` if it currently is one of `from`.
fn advance(name: &str, phase: &Mutex<Phase>, from: &[Phase], to: Phase) -> Result<(), NodeError> {
    let mut current = phase.lock().unwrap_or_else(|e| e.into_inner());
    if !from.contains(&current) {
        return Err(NodeError::Lifecycle {
            component: name.to_string(),
            from: *current,
            to,
        });
    }
    *current = to;
    Ok(())
}

pub struct LifecycleManager {
    phase: Mutex<Phase>,
    children: Vec<Child>,
    events: Arc<LifecycleEvents>,
}

impl LifecycleManager {
    pub fn new(events: Arc<LifecycleEvents>) -> Self {
        Self {
            phase: Mutex::new(Phase::Constructed),
            children: Vec::new(),
            events,
        }
    }

    /// Add a child. Children start in the order they are added.
    pub fn add(&mut self, component: Arc<dyn Component>) {
        self.children.push(Child {
            component,
            phase: Mutex::new(Phase::Constructed),
        });
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn child_phases(&self) -> Vec<(String, Phase)> {
        self.children
            .iter()
            .map(|child| {
                (
                    child.component.name().to_string(),
                    *child.phase.lock().unwrap_or_else(|e| e.into_inner()),
                )
            })
            .collect()
    }

    pub fn prepare(&self) -> Result<(), NodeError> {
        advance("node", &self.phase, &[Phase::Constructed], Phase::Prepared)?;
        for child in &self.children {
            child.component.on_prepare()?;
            advance(
                child.component.name(),
                &child.phase,
                &[Phase::Constructed],
                Phase::Prepared,
            )?;
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<(), NodeError> {
        {
            let current = self.phase();
            if current != Phase::Prepared {
                return Err(NodeError::Lifecycle {
                    component: "node".to_string(),
                    from: current,
                    to: Phase::Started,
                });
            }
        }
        for (index, child) in self.children.iter().enumerate() {
            let name = child.component.name();
            if let Err(e) = child.component.on_start().await {
                tracing::error!(
                    component = name,
                    error = %e,
                    "start failed, stopping started components"
                );
                if let Err(stop_err) = self.roll_back(index).await {
                    tracing::warn!(error = %stop_err, "rollback after failed start incomplete");
                }
                return Err(e);
            }
            advance(name, &child.phase, &[Phase::Prepared], Phase::Started)?;
            tracing::debug!(component = name, "started");
        }
        advance("node", &self.phase, &[Phase::Prepared], Phase::Started)
    }

    /// Stop the first `started` children in reverse order after a failed
    /// start. The node ends up `Stopped`.
    async fn roll_back(&self, started: usize) -> Result<(), NodeError> {
        advance("node", &self.phase, &[Phase::Prepared], Phase::Stopping)?;
        for child in self.children[..started].iter().rev() {
            let name = child.component.name();
            advance(name, &child.phase, &[Phase::Started], Phase::Stopping)?;
            child.component.on_stop().await;
            advance(name, &child.phase, &[Phase::Stopping], Phase::Stopped)?;
        }
        self.events.emit_shutdown();
        advance("node", &self.phase, &[Phase::Stopping], Phase::Stopped)
    }

    /// Stop every prepared or started child in reverse order, then notify
    /// shutdown subscribers.
    pub async fn stop(&self) -> Result<(), NodeError> {
        advance(
            "node",
            &self.phase,
            &[Phase::Constructed, Phase::Prepared, Phase::Started],
            Phase::Stopping,
        )?;
        for child in self.children.iter().rev() {
            let name = child.component.name();
            if advance(
                name,
                &child.phase,
                &[Phase::Prepared, Phase::Started],
                Phase::Stopping,
            )
            .is_err()
            {
                continue;
            }
            tracing::debug!(component = name, "stopping");
            child.component.on_stop().await;
            advance(name, &child.phase, &[Phase::Stopping], Phase::Stopped)?;
        }
        self.events.emit_shutdown();
        advance("node", &self.phase, &[Phase::Stopping], Phase::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
    }

    #[async_trait]
    impl Component for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_start(&self) -> Result<(), NodeError> {
            if self.fail_start {
                return Err(NodeError::Config(format!("{} cannot start", self.name)));
            }
            self.log.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        async fn on_stop(&self) {
            tokio::task::yield_now().await;
            self.log.lock().unwrap().push(format!("stop {}", self.name));
        }
    }

    fn manager(log: &Arc<Mutex<Vec<String>>>, events: LifecycleEvents) -> LifecycleManager {
        manager_failing(log, events, None)
    }

    fn manager_failing(
        log: &Arc<Mutex<Vec<String>>>,
        events: LifecycleEvents,
        failing: Option<&str>,
    ) -> LifecycleManager {
        let mut manager = LifecycleManager::new(Arc::new(events));
        for name in ["jobs", "manifests", "validations", "sweep"] {
            manager.add(Arc::new(Recorder {
                name: name.to_string(),
                log: Arc::clone(log),
                fail_start: failing == Some(name),
            }));
        }
        manager
    }

    #[tokio::test]
    async fn stop_reverses_start_order_then_notifies() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut events = LifecycleEvents::new();
        let shutdown_log = Arc::clone(&log);
        events.on_shutdown(
            "observer",
            Box::new(move || shutdown_log.lock().unwrap().push("shutdown".to_string())),
        );
        let manager = manager(&log, events);

        manager.prepare().unwrap();
        manager.start().await.unwrap();
        assert_eq!(manager.phase(), Phase::Started);
        manager.stop().await.unwrap();
        assert_eq!(manager.phase(), Phase::Stopped);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "start jobs",
                "start manifests",
                "start validations",
                "start sweep",
                "stop sweep",
                "stop validations",
                "stop manifests",
                "stop jobs",
                "shutdown",
            ]
        );
        assert!(manager
            .child_phases()
            .iter()
            .all(|(_, phase)| *phase == Phase::Stopped));
    }

    #[tokio::test]
    async fn start_before_prepare_is_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = manager(&log, LifecycleEvents::new());
        let err = manager.start().await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::Lifecycle {
                from: Phase::Constructed,
                to: Phase::Started,
                ..
            }
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_stop_is_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = manager(&log, LifecycleEvents::new());
        manager.prepare().unwrap();
        manager.start().await.unwrap();
        manager.stop().await.unwrap();
        assert!(manager.stop().await.is_err());
        assert_eq!(log.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn failed_start_stops_started_children() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut events = LifecycleEvents::new();
        let shutdown_log = Arc::clone(&log);
        events.on_shutdown(
            "observer",
            Box::new(move || shutdown_log.lock().unwrap().push("shutdown".to_string())),
        );
        let manager = manager_failing(&log, events, Some("validations"));
        manager.prepare().unwrap();

        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
        assert_eq!(manager.phase(), Phase::Stopped);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "start jobs",
                "start manifests",
                "stop manifests",
                "stop jobs",
                "shutdown",
            ]
        );
        assert_eq!(
            manager.child_phases(),
            vec![
                ("jobs".to_string(), Phase::Stopped),
                ("manifests".to_string(), Phase::Stopped),
                ("validations".to_string(), Phase::Prepared),
                ("sweep".to_string(), Phase::Prepared),
            ]
        );
        assert!(manager.stop().await.is_err());
    }

    #[tokio::test]
    async fn stop_skips_children_that_never_prepared() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = manager(&log, LifecycleEvents::new());
        manager.stop().await.unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(manager.phase(), Phase::Stopped);
    }
}
