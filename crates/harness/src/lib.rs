//! Web integration test harness
//!
//! Runs an extension's integration tests inside the editor's web front end:
//! - Launches the editor server (or attaches to a running one) and reads its
//!   address from the `Web UI available at <url>` line
//! - Drives a headless browser through a generated Playwright script
//! - Exposes `codeAutomationLog` / `codeAutomationExit` to the page and
//!   relays the reported exit code
//! - Tears the server, its data directory and the browser down exactly once
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Harness (Rust)                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  runner::run                                                │
//! │    ├── resolve_endpoint() -> Endpoint (+ server::launch)    │
//! │    ├── BrowserSession::launch() -> events                   │
//! │    ├── navigate(folder|workspace + payload)                 │
//! │    ├── Bridge::run(events) -> Termination                   │
//! │    └── Lifecycle::shutdown() -> exit code                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Driver script (Node + Playwright), JSON lines over stdio   │
//! │    ├── commands: navigate, close                            │
//! │    └── events: ready, log, exit, pageError, httpError, ...  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod navigation;
pub mod playwright;
pub mod resolver;
pub mod runner;
pub mod server;

pub use config::{Cli, HarnessConfig};
pub use endpoint::Endpoint;
pub use error::{HarnessError, HarnessResult};
pub use lifecycle::{Lifecycle, Termination};
pub use runner::run;
