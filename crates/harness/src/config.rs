//! Command line and run configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::diagnostics::ConsoleFilter;
use crate::playwright::{BrowserKind, SessionConfig};
use crate::server::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "code-web-harness")]
#[command(about = "Runs extension integration tests against the web editor in a headless browser")]
#[command(version)]
pub struct Cli {
    /// Attach to a running server instead of launching one
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Base64-encoded JSON cookie added to the browser context
    #[arg(long = "authCookie", alias = "auth-cookie", env = "AUTH_COOKIE", hide_env_values = true)]
    pub auth_cookie: Option<String>,

    /// Folder or .code-workspace file to open
    #[arg(long = "workspacePath", alias = "workspace-path")]
    pub workspace_path: PathBuf,

    /// Path of the extension under test
    #[arg(long = "extensionDevelopmentPath", alias = "extension-development-path")]
    pub extension_development_path: Option<PathBuf>,

    /// Path of the extension's test entry point
    #[arg(long = "extensionTestsPath", alias = "extension-tests-path")]
    pub extension_tests_path: Option<PathBuf>,

    /// Echo server output and show the browser window
    #[arg(long)]
    pub debug: bool,

    /// Browser in which the integration tests run
    #[arg(long, value_enum, default_value_t = BrowserKind::Chromium)]
    pub browser: BrowserKind,

    /// Server distribution to launch when no endpoint is given
    #[arg(long = "serverPath", alias = "server-path", env = "VSCODE_REMOTE_SERVER_PATH")]
    pub server_path: Option<PathBuf>,

    /// Seconds to wait for the server's ready line (0 = no limit)
    #[arg(long = "serverReadyTimeout", alias = "server-ready-timeout", default_value_t = 120)]
    pub server_ready_timeout: u64,

    /// Log directory passed to the server
    #[arg(long = "logsPath", alias = "logs-path")]
    pub logs_path: Option<PathBuf>,

    /// Page console messages to forward
    #[arg(long = "consoleLevel", alias = "console-level", value_enum, default_value_t = ConsoleFilter::Warning)]
    pub console_level: ConsoleFilter,

    /// Extra payload entry for the test runner (repeatable)
    #[arg(long = "payload", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub payload: Vec<(String, String)>,

    /// Node.js binary used to run Playwright
    #[arg(long = "nodePath", alias = "node-path", env = "NODE_BINARY", default_value = "node")]
    pub node_path: PathBuf,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Everything a run needs, resolved from the command line and environment.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub endpoint: Option<String>,
    /// Still encoded; decoded when the session starts
    pub auth_cookie: Option<String>,
    pub workspace_path: PathBuf,
    pub extension_development_path: Option<PathBuf>,
    pub extension_tests_path: Option<PathBuf>,
    pub extra_payload: Vec<(String, String)>,
    pub console_filter: ConsoleFilter,
    pub server: ServerConfig,
    pub session: SessionConfig,
}

impl Cli {
    pub fn into_config(self) -> HarnessConfig {
        let ready_timeout = match self.server_ready_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        HarnessConfig {
            endpoint: self.endpoint,
            auth_cookie: self.auth_cookie,
            workspace_path: self.workspace_path,
            extension_development_path: self.extension_development_path,
            extension_tests_path: self.extension_tests_path,
            extra_payload: self.payload,
            console_filter: self.console_level,
            server: ServerConfig {
                server_path: self.server_path,
                browser: self.browser,
                debug: self.debug,
                ready_timeout,
                logs_path: self.logs_path,
                ..Default::default()
            },
            session: SessionConfig {
                browser: self.browser,
                headless: !self.debug,
                node_binary: self.node_path,
                ..Default::default()
            },
        }
    }
}
