//! Server management - spawning the editor server and discovering its address

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::{HarnessError, HarnessResult};
use crate::lifecycle::{Lifecycle, Teardown};
use crate::playwright::BrowserKind;

/// Environment variable pointing at the server distribution.
pub const SERVER_PATH_ENV: &str = "VSCODE_REMOTE_SERVER_PATH";

/// Environment variable telling the server which browser drives it.
pub const BROWSER_ENV: &str = "VSCODE_BROWSER";

/// Configuration for spawning a server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server distribution root (or the launch script itself)
    pub server_path: Option<PathBuf>,

    /// Browser the tests run in, exported to the server
    pub browser: BrowserKind,

    /// Echo the server's stdout and stderr
    pub debug: bool,

    /// How long to wait for the ready line (None = forever)
    pub ready_timeout: Option<Duration>,

    /// Passed through as `--logsPath`
    pub logs_path: Option<PathBuf>,

    /// Time between SIGTERM and SIGKILL when stopping the server
    pub kill_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_path: None,
            browser: BrowserKind::default(),
            debug: false,
            ready_timeout: Some(Duration::from_secs(120)),
            logs_path: None,
            kill_grace: Duration::from_secs(2),
        }
    }
}

/// A server that reported its address.
#[derive(Debug, Clone)]
pub struct LaunchedServer {
    pub endpoint: Endpoint,
    pub pid: u32,
    pub data_dir: PathBuf,
}

/// Spawn the server and wait for it to report where it listens.
///
/// The process and its data directory are handed to `lifecycle` as soon as
/// they exist, so they are released even if the wait below is abandoned.
pub async fn launch(config: &ServerConfig, lifecycle: &Lifecycle) -> HarnessResult<LaunchedServer> {
    let root = config
        .server_path
        .as_deref()
        .ok_or(HarnessError::MissingEnv(SERVER_PATH_ENV))?;
    let executable = server_executable(root);

    let data_dir = tempfile::Builder::new().prefix("t").tempdir()?;
    let server_data_dir = data_dir.path().join("d");
    lifecycle.register(Box::new(ServerDataDir(data_dir)));

    let args = server_args(config, &server_data_dir);
    info!("Starting server: {}", executable.display());
    debug!("Server arguments: {}", args.join(" "));

    let mut cmd = Command::new(&executable);
    cmd.args(&args)
        .env(BROWSER_ENV, config.browser.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(if config.debug { Stdio::piped() } else { Stdio::null() })
        .kill_on_drop(true);

    // Own process group so the whole tree can be signalled at once
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| {
        HarnessError::ServerStartup(format!("Failed to spawn {}: {}", executable.display(), e))
    })?;

    let pid = child
        .id()
        .ok_or_else(|| HarnessError::ServerStartup("server exited immediately".to_string()))?;
    info!("Server started (pid: {})", pid);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| HarnessError::ServerStartup("server stdout not captured".to_string()))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(echo_stderr(stderr));
    }

    lifecycle.register(Box::new(ServerProcess {
        child,
        pid,
        grace: config.kill_grace,
    }));

    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(scan_stdout(stdout, config.debug, ready_tx));

    let endpoint = match config.ready_timeout {
        Some(limit) => timeout(limit, ready_rx)
            .await
            .map_err(|_| HarnessError::ServerReadyTimeout(limit))?,
        None => ready_rx.await,
    }
    .map_err(|_| HarnessError::ServerExited("stdout closed without a ready line".to_string()))?;

    info!("Server is ready at {}", endpoint);
    Ok(LaunchedServer {
        endpoint,
        pid,
        data_dir: server_data_dir,
    })
}

/// `<root>/server.sh` (or `server.cmd`), unless `root` is the script itself.
pub fn server_executable(root: &Path) -> PathBuf {
    if root.is_file() {
        return root.to_path_buf();
    }
    let script = if cfg!(windows) { "server.cmd" } else { "server.sh" };
    root.join(script)
}

pub fn server_args(config: &ServerConfig, server_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--driver".to_string(),
        "web".to_string(),
        "--enable-proposed-api".to_string(),
        "--disable-telemetry".to_string(),
        "--accept-server-license-terms".to_string(),
        "--server-data-dir".to_string(),
        server_data_dir.display().to_string(),
    ];

    if let Some(logs_path) = &config.logs_path {
        args.push(format!("--logsPath={}", logs_path.display()));
    }

    args
}

/// Scan stdout until the ready line shows up, then keep draining it so the
/// server never blocks on a full pipe.
async fn scan_stdout<R>(stdout: R, echo: bool, ready: oneshot::Sender<Endpoint>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    let mut ready = Some(ready);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if echo {
                    info!("Server stdout: {}", line);
                }
                if ready.is_some() {
                    if let Some(endpoint) = Endpoint::from_ready_output(&line) {
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(endpoint);
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading server stdout: {}", e);
                break;
            }
        }
    }

    debug!("Server stdout closed");
}

async fn echo_stderr<R>(stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!("Server stderr: {}", line);
    }
}

/// The running server process, stopped at teardown.
struct ServerProcess {
    child: Child,
    pid: u32,
    grace: Duration,
}

#[async_trait]
impl Teardown for ServerProcess {
    fn name(&self) -> String {
        format!("server process tree (pid: {})", self.pid)
    }

    async fn teardown(mut self: Box<Self>) -> HarnessResult<()> {
        info!("Stopping server (pid: {})", self.pid);
        terminate_tree(&mut self.child, self.pid, self.grace).await
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        // Only reached with a live child if teardown never ran
        if self.child.id().is_some() {
            kill_tree_now(self.pid);
        }
    }
}

#[cfg(unix)]
async fn terminate_tree(child: &mut Child, pid: u32, grace: Duration) -> HarnessResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if child.id().is_none() {
        return Ok(());
    }

    let group = Pid::from_raw(pid as i32);
    match killpg(group, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => {
            return Err(HarnessError::ProcessKill {
                pid,
                reason: e.to_string(),
            })
        }
    }

    if timeout(grace, child.wait()).await.is_err() {
        warn!("Server did not stop within {:?}, killing it", grace);
    }

    // Anything left in the group gets no second chance
    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => {
            return Err(HarnessError::ProcessKill {
                pid,
                reason: e.to_string(),
            })
        }
    }
    child.wait().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate_tree(child: &mut Child, pid: u32, _grace: Duration) -> HarnessResult<()> {
    child.start_kill().map_err(|e| HarnessError::ProcessKill {
        pid,
        reason: e.to_string(),
    })?;
    child.wait().await?;
    Ok(())
}

#[cfg(unix)]
pub(crate) fn kill_tree_now(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
pub(crate) fn kill_tree_now(_pid: u32) {
    // kill_on_drop on the child covers this
}

/// Temporary data directory of the server, removed at teardown.
struct ServerDataDir(TempDir);

#[async_trait]
impl Teardown for ServerDataDir {
    fn name(&self) -> String {
        format!("server data directory {}", self.0.path().display())
    }

    async fn teardown(self: Box<Self>) -> HarnessResult<()> {
        self.0.close()?;
        Ok(())
    }
}
