//! Page diagnostics forwarded to the harness log

use clap::ValueEnum;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::bridge::{render_args, LogLevel};

/// Which page console messages are forwarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ConsoleFilter {
    /// Errors and warnings only
    #[default]
    Warning,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    PageError {
        message: String,
    },
    Crash,
    HttpError {
        status: u16,
        url: String,
    },
    RequestFailed {
        url: String,
        reason: Option<String>,
    },
    Console {
        level: LogLevel,
        text: String,
        args: Vec<Value>,
    },
    /// Resolving console arguments failed in the page.
    ConsoleFailure {
        message: String,
    },
}

impl Diagnostic {
    pub fn level(&self) -> LogLevel {
        match self {
            Diagnostic::Console { level, .. } => *level,
            _ => LogLevel::Error,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Diagnostic::PageError { message } => format!("Playwright ERROR: page error: {}", message),
            Diagnostic::Crash => "Playwright ERROR: page crash".to_string(),
            Diagnostic::HttpError { status, url } => {
                format!("Playwright ERROR: HTTP status {} for {}", status, url)
            }
            Diagnostic::RequestFailed { url, reason } => format!(
                "Request Failed {} {}",
                url,
                reason.as_deref().unwrap_or("unknown error")
            ),
            // Resolved arguments win; `text` is Playwright's preview of them
            Diagnostic::Console { text, args, .. } if args.is_empty() => text.clone(),
            Diagnostic::Console { args, .. } => render_args(args),
            Diagnostic::ConsoleFailure { message } => format!("Error logging console: {}", message),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsRelay {
    filter: ConsoleFilter,
}

impl DiagnosticsRelay {
    pub fn new(filter: ConsoleFilter) -> Self {
        Self { filter }
    }

    pub fn admits(&self, diagnostic: &Diagnostic) -> bool {
        match diagnostic {
            Diagnostic::Console { level, .. } => {
                self.filter == ConsoleFilter::All || level.is_error_or_warning()
            }
            _ => true,
        }
    }

    pub fn forward(&self, diagnostic: &Diagnostic) {
        if !self.admits(diagnostic) {
            return;
        }

        let line = diagnostic.render();
        match diagnostic.level() {
            LogLevel::Error => error!(target: "page", "{}", line),
            LogLevel::Warning => warn!(target: "page", "{}", line),
            LogLevel::Info | LogLevel::Log => info!(target: "page", "{}", line),
            LogLevel::Debug | LogLevel::Trace => debug!(target: "page", "{}", line),
        }
    }
}
