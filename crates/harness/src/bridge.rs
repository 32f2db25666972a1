//! Host side of the in-page bridge
//!
//! The page gets two functions: `codeAutomationLog(level, args)` and
//! `codeAutomationExit(code)`. Calls arrive here as [`BridgeMessage`]s. The
//! bridge stays `Running` until an exit code is reported (or the run is
//! interrupted), after which further messages are ignored.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::diagnostics::DiagnosticsRelay;
use crate::lifecycle::Termination;
use crate::playwright::SessionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Log,
    Debug,
    Trace,
}

impl LogLevel {
    /// Console method names as used in the page. Unknown names map to `Log`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "error" | "assert" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warning,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Log,
        }
    }

    pub fn is_error_or_warning(self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Warning)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    Log { level: LogLevel, args: Vec<Value> },
    Exit { code: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Running,
    Terminating,
    Terminated,
}

/// Where forwarded page logs end up.
pub trait ConsoleSink: Send {
    fn write(&mut self, level: LogLevel, line: &str);
}

/// Errors and warnings to stderr, everything else to stdout.
#[derive(Debug, Default)]
pub struct StdConsole;

impl ConsoleSink for StdConsole {
    fn write(&mut self, level: LogLevel, line: &str) {
        if level.is_error_or_warning() {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
}

pub struct Bridge {
    state: BridgeState,
    console: Box<dyn ConsoleSink>,
}

impl Bridge {
    pub fn new(console: Box<dyn ConsoleSink>) -> Self {
        Self {
            state: BridgeState::Running,
            console,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Apply one message. Returns the termination once an exit code arrives.
    pub fn handle(&mut self, message: BridgeMessage) -> Option<Termination> {
        if self.state != BridgeState::Running {
            debug!("Ignoring bridge message after exit: {:?}", message);
            return None;
        }

        match message {
            BridgeMessage::Log { level, args } => {
                self.console.write(level, &render_args(&args));
                None
            }
            BridgeMessage::Exit { code } => {
                info!("Test run finished with exit code {}", code);
                self.begin_termination();
                Some(Termination::Reported(code))
            }
        }
    }

    /// Leave `Running`; used for exit reports and for interrupts.
    pub fn begin_termination(&mut self) {
        if self.state == BridgeState::Running {
            self.state = BridgeState::Terminating;
        }
    }

    /// Teardown is complete.
    pub fn finish(&mut self) {
        self.state = BridgeState::Terminated;
    }

    /// Consume session events until the run ends.
    pub async fn run(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
        relay: &DiagnosticsRelay,
    ) -> Termination {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Bridge(message) => {
                    if let Some(termination) = self.handle(message) {
                        return termination;
                    }
                }
                SessionEvent::Diagnostic(diagnostic) => relay.forward(&diagnostic),
                SessionEvent::Navigated(url) => debug!("Page loaded: {}", url),
                SessionEvent::Fatal(message) => {
                    error!("{}", message);
                    self.begin_termination();
                    return Termination::Failed;
                }
            }
        }

        error!("Browser driver exited before the tests reported a result");
        self.begin_termination();
        Termination::DriverExited
    }
}

/// Render console arguments the way a console would: strings as-is, other
/// values as JSON, separated by spaces.
pub fn render_args(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
