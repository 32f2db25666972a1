//! Playwright browser automation
//!
//! The browser is driven by a generated Node.js script. The harness and the
//! script talk over JSON lines: commands (`navigate`, `close`) go to the
//! script's stdin, events (bridge calls, page diagnostics, lifecycle
//! notifications) come back on its stdout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::AuthCookie;
use crate::bridge::{BridgeMessage, LogLevel};
use crate::diagnostics::Diagnostic;
use crate::error::{HarnessError, HarnessResult};
use crate::lifecycle::{Lifecycle, Teardown};
use crate::server::kill_tree_now;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

/// Configuration for the browser session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub browser: BrowserKind,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Added to the context before the page is created
    pub cookie: Option<AuthCookie>,
    pub node_binary: PathBuf,
    /// Limit for browser, context and page creation
    pub launch_timeout: Duration,
    /// Limit for closing the browser at teardown
    pub close_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            browser: BrowserKind::Chromium,
            headless: true,
            viewport_width: 1200,
            viewport_height: 800,
            cookie: None,
            node_binary: PathBuf::from("node"),
            launch_timeout: Duration::from_secs(60),
            close_timeout: Duration::from_secs(10),
        }
    }
}

/// Raw event written by the driver script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DriverEvent {
    Ready,
    Navigated {
        url: String,
    },
    Log {
        level: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Exit {
        code: i32,
    },
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
        #[serde(default)]
        reason: Option<String>,
    },
    Console {
        level: String,
        text: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    ConsoleFailure {
        message: String,
    },
    CloseFailed {
        message: String,
    },
    Closed,
    Fatal {
        message: String,
    },
}

/// What the run loop sees from the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Bridge(BridgeMessage),
    Diagnostic(Diagnostic),
    Navigated(String),
    Fatal(String),
}

impl SessionEvent {
    /// Events that only concern the session itself map to `None`.
    pub fn from_driver(event: DriverEvent) -> Option<Self> {
        let event = match event {
            DriverEvent::Navigated { url } => SessionEvent::Navigated(url),
            DriverEvent::Log { level, args } => SessionEvent::Bridge(BridgeMessage::Log {
                level: LogLevel::parse(&level),
                args,
            }),
            DriverEvent::Exit { code } => SessionEvent::Bridge(BridgeMessage::Exit { code }),
            DriverEvent::PageError { message } => {
                SessionEvent::Diagnostic(Diagnostic::PageError { message })
            }
            DriverEvent::Crash => SessionEvent::Diagnostic(Diagnostic::Crash),
            DriverEvent::HttpError { status, url } => {
                SessionEvent::Diagnostic(Diagnostic::HttpError { status, url })
            }
            DriverEvent::RequestFailed { url, reason } => {
                SessionEvent::Diagnostic(Diagnostic::RequestFailed { url, reason })
            }
            DriverEvent::Console { level, text, args } => {
                SessionEvent::Diagnostic(Diagnostic::Console {
                    level: LogLevel::parse(&level),
                    text,
                    args,
                })
            }
            DriverEvent::ConsoleFailure { message } => {
                SessionEvent::Diagnostic(Diagnostic::ConsoleFailure { message })
            }
            DriverEvent::Fatal { message } => SessionEvent::Fatal(message),
            DriverEvent::Ready | DriverEvent::Closed | DriverEvent::CloseFailed { .. } => {
                return None
            }
        };
        Some(event)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "camelCase")]
enum DriverCommand {
    Navigate { url: String },
    Close,
}

#[derive(Debug, Serialize)]
struct DriverSettings<'a> {
    browser: &'static str,
    headless: bool,
    viewport: Viewport,
    cookie: Option<&'a AuthCookie>,
}

#[derive(Debug, Serialize)]
struct Viewport {
    width: u32,
    height: u32,
}

/// Handle used to steer the page once the browser is up.
pub struct BrowserSession {
    commands: mpsc::UnboundedSender<DriverCommand>,
}

impl BrowserSession {
    /// Start the browser, context and page, with the bridge and diagnostics
    /// installed. Returns once the page is ready for navigation.
    ///
    /// Closing the browser is registered with `lifecycle`.
    pub async fn launch(
        config: &SessionConfig,
        lifecycle: &Lifecycle,
    ) -> HarnessResult<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        check_playwright_installed(config).await?;

        let script_dir = tempfile::Builder::new().prefix("driver").tempdir()?;
        let script_path = script_dir.path().join("driver.js");
        std::fs::write(&script_path, build_script(config)?)?;

        info!("Launching {} (headless: {})", config.browser.as_str(), config.headless);
        debug!("Driver script: {}", script_path.display());

        let mut child = spawn_driver(&config.node_binary, &script_path)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdin, stdout) = match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => return Err(HarnessError::Driver("driver pipes not captured".to_string())),
        };
        if let Some(stderr) = stderr {
            tokio::spawn(echo_stderr(stderr));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_commands(stdin, command_rx));

        let (ready_tx, ready_rx) = oneshot::channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_events(stdout, ready_tx, event_tx));

        lifecycle.register(Box::new(BrowserTeardown::new(
            command_tx.clone(),
            child,
            config.close_timeout,
            script_dir,
        )?));

        match timeout(config.launch_timeout, ready_rx).await {
            Err(_) => Err(HarnessError::Driver(format!(
                "browser was not ready within {:?}",
                config.launch_timeout
            ))),
            Ok(Err(_)) => Err(HarnessError::Driver(
                "driver exited before the browser was ready".to_string(),
            )),
            Ok(Ok(Err(message))) => Err(HarnessError::Driver(message)),
            Ok(Ok(Ok(()))) => {
                info!("Browser ready");
                Ok((Self { commands: command_tx }, event_rx))
            }
        }
    }

    /// Start navigating. Progress and failures arrive as session events.
    pub fn navigate(&self, url: &Url) -> HarnessResult<()> {
        self.send(DriverCommand::Navigate {
            url: url.to_string(),
        })
    }

    fn send(&self, command: DriverCommand) -> HarnessResult<()> {
        self.commands
            .send(command)
            .map_err(|_| HarnessError::Driver("driver is no longer running".to_string()))
    }
}

/// Spawn `program script` in its own process group, so that the browser
/// processes Playwright starts can be killed along with the driver.
fn spawn_driver(program: &Path, script: &Path) -> HarnessResult<Child> {
    let mut cmd = Command::new(program);
    cmd.arg(script)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn()
        .map_err(|e| HarnessError::Driver(format!("Failed to spawn {}: {}", program.display(), e)))
}

/// Verify that node can resolve the playwright package from here.
async fn check_playwright_installed(config: &SessionConfig) -> HarnessResult<()> {
    let status = Command::new(&config.node_binary)
        .args(["-e", "require.resolve('playwright', { paths: [process.cwd()] })"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => Ok(()),
        _ => Err(HarnessError::PlaywrightNotFound),
    }
}

/// Build the driver script for `config`.
pub fn build_script(config: &SessionConfig) -> HarnessResult<String> {
    let settings = DriverSettings {
        browser: config.browser.as_str(),
        headless: config.headless,
        viewport: Viewport {
            width: config.viewport_width,
            height: config.viewport_height,
        },
        cookie: config.cookie.as_ref(),
    };
    let settings = serde_json::to_string(&settings)?;

    Ok(format!(
        r#"
const readline = require('readline');
const settings = {settings};

function emit(event) {{
  process.stdout.write(JSON.stringify(event) + '\n');
}}

function describe(value) {{
  return value instanceof Error ? (value.stack || value.message) : String(value);
}}

(async () => {{
  const playwright = require(require.resolve('playwright', {{ paths: [process.cwd()] }}));
  const browser = await playwright[settings.browser].launch({{ headless: settings.headless }});
  const context = await browser.newContext();
  if (settings.cookie) {{
    await context.addCookies([settings.cookie]);
  }}
  const page = await context.newPage();
  await page.setViewportSize(settings.viewport);

  page.on('pageerror', error => emit({{ type: 'pageError', message: describe(error) }}));
  page.on('crash', () => emit({{ type: 'crash' }}));
  page.on('response', response => {{
    if (response.status() >= 400) {{
      emit({{ type: 'httpError', status: response.status(), url: response.url() }});
    }}
  }});
  page.on('requestfailed', request => {{
    const failure = request.failure();
    emit({{ type: 'requestFailed', url: request.url(), reason: failure ? failure.errorText : null }});
  }});
  page.on('console', async message => {{
    try {{
      const args = await Promise.all(message.args().map(arg => arg.jsonValue()));
      emit({{ type: 'console', level: message.type(), text: message.text(), args }});
    }} catch (error) {{
      emit({{ type: 'consoleFailure', message: describe(error) }});
    }}
  }});

  await page.exposeFunction('codeAutomationLog', (level, args) => {{
    emit({{ type: 'log', level: String(level), args: Array.isArray(args) ? args : [args] }});
  }});
  await page.exposeFunction('codeAutomationExit', code => {{
    emit({{ type: 'exit', code: Number(code) | 0 }});
  }});

  let closing = false;
  const close = async () => {{
    if (closing) {{
      return;
    }}
    closing = true;
    try {{
      await browser.close();
    }} catch (error) {{
      emit({{ type: 'closeFailed', message: describe(error) }});
    }}
    emit({{ type: 'closed' }});
    process.exit(0);
  }};

  const commands = readline.createInterface({{ input: process.stdin }});
  commands.on('line', async line => {{
    let command;
    try {{
      command = JSON.parse(line);
    }} catch (error) {{
      return;
    }}
    if (command.command === 'navigate') {{
      try {{
        await page.goto(command.url);
        emit({{ type: 'navigated', url: command.url }});
      }} catch (error) {{
        emit({{ type: 'fatal', message: 'navigation failed: ' + describe(error) }});
      }}
    }} else if (command.command === 'close') {{
      await close();
    }}
  }});
  commands.on('close', close);

  emit({{ type: 'ready' }});
}})().catch(error => {{
  emit({{ type: 'fatal', message: describe(error) }});
  process.exit(1);
}});
"#,
        settings = settings,
    ))
}

async fn write_commands(mut stdin: ChildStdin, mut commands: mpsc::UnboundedReceiver<DriverCommand>) {
    while let Some(command) = commands.recv().await {
        let mut line = match serde_json::to_string(&command) {
            Ok(line) => line,
            Err(e) => {
                error!("Cannot encode driver command: {}", e);
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            debug!("Driver stdin closed: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!("Driver stdin flush failed: {}", e);
            break;
        }
    }
}

/// Route driver output: readiness to `ready`, everything else to `events`.
async fn pump_events<R>(
    stdout: R,
    ready: oneshot::Sender<Result<(), String>>,
    events: mpsc::UnboundedSender<SessionEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    let mut ready = Some(ready);

    while let Ok(Some(line)) = lines.next_line().await {
        let event: DriverEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(_) => {
                debug!("Driver stdout: {}", line);
                continue;
            }
        };

        match event {
            DriverEvent::Ready => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            DriverEvent::Fatal { message } if ready.is_some() => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(message));
                }
            }
            DriverEvent::Closed => debug!("Browser closed"),
            DriverEvent::CloseFailed { message } => {
                error!("Error when closing browser: {}", message)
            }
            other => {
                if let Some(event) = SessionEvent::from_driver(other) {
                    let _ = events.send(event);
                }
            }
        }
    }

    debug!("Driver stdout closed");
}

async fn echo_stderr<R>(stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!("Driver stderr: {}", line);
    }
}

struct BrowserTeardown {
    commands: mpsc::UnboundedSender<DriverCommand>,
    child: Child,
    pid: u32,
    close_timeout: Duration,
    _script_dir: TempDir,
}

impl BrowserTeardown {
    fn new(
        commands: mpsc::UnboundedSender<DriverCommand>,
        child: Child,
        close_timeout: Duration,
        script_dir: TempDir,
    ) -> HarnessResult<Self> {
        let pid = child
            .id()
            .ok_or_else(|| HarnessError::Driver("driver exited immediately".to_string()))?;
        Ok(Self {
            commands,
            child,
            pid,
            close_timeout,
            _script_dir: script_dir,
        })
    }
}

#[async_trait]
impl Teardown for BrowserTeardown {
    fn name(&self) -> String {
        format!("browser (driver pid: {})", self.pid)
    }

    async fn teardown(mut self: Box<Self>) -> HarnessResult<()> {
        let _ = self.commands.send(DriverCommand::Close);

        match timeout(self.close_timeout, self.child.wait()).await {
            Ok(status) => {
                debug!("Driver exited with {}", status?);
                Ok(())
            }
            Err(_) => {
                kill_tree_now(self.pid);
                #[cfg(not(unix))]
                self.child.start_kill()?;
                self.child.wait().await?;
                Err(HarnessError::Driver(format!(
                    "browser did not close within {:?}, driver and browser killed",
                    self.close_timeout
                )))
            }
        }
    }
}
