//! Process lifecycle: signal handling and the top-level run.

use crate::driver::{RunSummary, StreamDriver};
use crate::logging::event_names;
use pw_common::{Result, RunId, StructuredError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, info_span};

/// Shared shutdown request flag.
///
/// Signal handlers only set it; the driver checks it between units and
/// during sleeps.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct LifecycleController {
    shutdown: ShutdownFlag,
    run_id: RunId,
}

impl LifecycleController {
    pub fn new(shutdown: ShutdownFlag) -> Self {
        Self {
            shutdown,
            run_id: RunId::new(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Route SIGINT and SIGTERM to the shutdown flag.
    pub fn install_signal_handlers(&self) -> std::result::Result<(), ctrlc::Error> {
        let flag = self.shutdown.clone();
        ctrlc::set_handler(move || flag.request())
    }

    /// Drive the monitor until it stops, logging the outcome.
    pub fn run(&self, driver: &mut StreamDriver) -> Result<RunSummary> {
        let span = info_span!("monitor", run_id = %self.run_id);
        let _entered = span.enter();

        info!(
            event = event_names::MONITOR_STARTED,
            version = env!("CARGO_PKG_VERSION"),
            "monitor started"
        );

        match driver.run() {
            Ok(summary) => {
                info!(
                    event = event_names::MONITOR_STOPPED,
                    processed = summary.processed,
                    alerts = summary.alerts,
                    mean_score = summary.mean_score,
                    max_score = summary.max_score,
                    final_threshold = summary.final_threshold,
                    sessions_bound = summary.sessions_bound,
                    rotations = summary.rotations,
                    elapsed_secs = summary.elapsed_secs,
                    "monitor stopped"
                );
                Ok(summary)
            }
            Err(e) => {
                let structured = StructuredError::from(&e);
                let summary = driver.summary();
                error!(
                    event = event_names::MONITOR_FATAL,
                    code = structured.code,
                    category = %structured.category,
                    suggested_action = %structured.suggested_action,
                    remediation = e.remediation(),
                    detail = %structured.to_json(),
                    processed = summary.processed,
                    alerts = summary.alerts,
                    "monitor failed: {}",
                    e
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_shared_between_clones() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        assert!(!other.is_requested());
        flag.request();
        assert!(other.is_requested());
    }

    #[test]
    fn test_controller_hands_out_same_flag() {
        let controller = LifecycleController::new(ShutdownFlag::new());
        let flag = controller.shutdown_flag();
        flag.request();
        assert!(controller.shutdown.is_requested());
        assert!(controller.run_id().0.starts_with("run-"));
    }
}
