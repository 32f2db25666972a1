//! Run lifecycle: the single teardown path
//!
//! Every resource that must not outlive the run (server process tree, its
//! data directory, the browser) registers a [`Teardown`] here. Whatever ends
//! the run (the in-page exit call, a signal, a setup failure, the browser
//! driver going away) goes through [`Lifecycle::shutdown`], which runs the
//! registered actions once, newest first, and yields the exit code.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::HarnessResult;

/// Signals that end the run early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn number(self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => 2,
            ShutdownSignal::Terminate => 15,
        }
    }
}

/// Why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The in-page runner called the exit entry point.
    Reported(i32),
    Signal(ShutdownSignal),
    /// The browser driver went away before an exit code was reported.
    DriverExited,
    /// Setup or navigation failed.
    Failed,
}

impl Termination {
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Reported(code) => code,
            Termination::Signal(signal) => 128 + signal.number(),
            Termination::DriverExited | Termination::Failed => 1,
        }
    }
}

/// A resource released at the end of the run. Failures are logged by the
/// lifecycle and never stop the remaining actions.
#[async_trait]
pub trait Teardown: Send {
    fn name(&self) -> String;

    async fn teardown(self: Box<Self>) -> HarnessResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Terminating(i32),
    Terminated(i32),
}

pub struct Lifecycle {
    phase: Mutex<Phase>,
    actions: Mutex<Vec<Box<dyn Teardown>>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Running),
            actions: Mutex::new(Vec::new()),
        }
    }

    /// Actions registered once shutdown has begun are never run.
    pub fn register(&self, action: Box<dyn Teardown>) {
        if !self.is_running() {
            warn!("Shutdown already started, {} will not be released", action.name());
        }
        debug!("Registered teardown: {}", action.name());
        self.actions.lock().push(action);
    }

    /// Number of actions still waiting for shutdown.
    pub fn pending(&self) -> usize {
        self.actions.lock().len()
    }

    pub fn is_running(&self) -> bool {
        *self.phase.lock() == Phase::Running
    }

    /// Release everything and return the exit code for `termination`.
    ///
    /// Only the first call does any work; later calls return the code
    /// decided by the first.
    pub async fn shutdown(&self, termination: Termination) -> i32 {
        let code = termination.exit_code();
        {
            let mut phase = self.phase.lock();
            match *phase {
                Phase::Running => *phase = Phase::Terminating(code),
                Phase::Terminating(first) | Phase::Terminated(first) => return first,
            }
        }

        info!("Shutting down ({:?}, exit code {})", termination, code);

        let actions = std::mem::take(&mut *self.actions.lock());
        for action in actions.into_iter().rev() {
            let name = action.name();
            match action.teardown().await {
                Ok(()) => debug!("Released {}", name),
                Err(e) => error!("Error when releasing {}: {}", name, e),
            }
        }

        *self.phase.lock() = Phase::Terminated(code);
        code
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use std::sync::Arc;

    struct Recorder {
        name: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Teardown for Recorder {
        fn name(&self) -> String {
            self.name.to_string()
        }

        async fn teardown(self: Box<Self>) -> HarnessResult<()> {
            self.log.lock().push(self.name);
            if self.fail {
                Err(HarnessError::Driver(format!("{} failed", self.name)))
            } else {
                Ok(())
            }
        }
    }

    fn recorder(
        name: &'static str,
        fail: bool,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<dyn Teardown> {
        Box::new(Recorder {
            name,
            fail,
            log: log.clone(),
        })
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Termination::Reported(0).exit_code(), 0);
        assert_eq!(Termination::Reported(3).exit_code(), 3);
        assert_eq!(Termination::Signal(ShutdownSignal::Interrupt).exit_code(), 130);
        assert_eq!(Termination::Signal(ShutdownSignal::Terminate).exit_code(), 143);
        assert_eq!(Termination::DriverExited.exit_code(), 1);
        assert_eq!(Termination::Failed.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_every_action_runs_newest_first_despite_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = Lifecycle::new();
        lifecycle.register(recorder("data dir", false, &log));
        lifecycle.register(recorder("server", true, &log));
        lifecycle.register(recorder("browser", true, &log));

        let code = lifecycle.shutdown(Termination::Reported(7)).await;

        assert_eq!(code, 7);
        assert_eq!(*log.lock(), vec!["browser", "server", "data dir"]);
        assert!(!lifecycle.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_happens_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = Lifecycle::new();
        lifecycle.register(recorder("server", false, &log));

        let first = lifecycle
            .shutdown(Termination::Signal(ShutdownSignal::Interrupt))
            .await;
        let second = lifecycle.shutdown(Termination::Reported(0)).await;

        assert_eq!(first, 130);
        assert_eq!(second, 130);
        assert_eq!(*log.lock(), vec!["server"]);
    }

    #[tokio::test]
    async fn test_late_registration_is_not_released() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.is_running());

        lifecycle.shutdown(Termination::Reported(0)).await;
        lifecycle.register(recorder("late", false, &log));

        assert!(!lifecycle.is_running());
        assert_eq!(lifecycle.shutdown(Termination::Failed).await, 0);
        assert_eq!(lifecycle.pending(), 1);
        assert!(log.lock().is_empty());
    }
}
