//! Main run orchestration: server, browser session, bridge and teardown

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::AuthCookie;
use crate::bridge::{Bridge, ConsoleSink, StdConsole};
use crate::config::HarnessConfig;
use crate::diagnostics::DiagnosticsRelay;
use crate::error::HarnessResult;
use crate::lifecycle::{Lifecycle, ShutdownSignal, Termination};
use crate::navigation::{navigation_url, NavigationPayload, OpenTarget};
use crate::playwright::{BrowserSession, SessionConfig, SessionEvent};
use crate::resolver::resolve_endpoint;

/// Run the tests and return the process exit code.
pub async fn run(config: HarnessConfig) -> i32 {
    run_with_console(config, Box::new(StdConsole)).await
}

pub async fn run_with_console(config: HarnessConfig, console: Box<dyn ConsoleSink>) -> i32 {
    let mut signals = match ShutdownSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            error!("Cannot install signal handlers: {}", e);
            return Termination::Failed.exit_code();
        }
    };

    let lifecycle = Lifecycle::new();
    let mut bridge = Bridge::new(console);
    let relay = DiagnosticsRelay::new(config.console_filter);

    let termination = tokio::select! {
        termination = drive(&config, &lifecycle, &mut bridge, &relay) => termination,
        signal = signals.recv() => {
            warn!("Received {:?}, stopping", signal);
            Termination::Signal(signal)
        }
    };

    bridge.begin_termination();
    let code = lifecycle.shutdown(termination).await;
    bridge.finish();
    code
}

async fn drive(
    config: &HarnessConfig,
    lifecycle: &Lifecycle,
    bridge: &mut Bridge,
    relay: &DiagnosticsRelay,
) -> Termination {
    match start(config, lifecycle).await {
        Ok((_session, mut events)) => bridge.run(&mut events, relay).await,
        Err(e) if e.is_config() => {
            error!("{} (see --help)", e);
            Termination::Failed
        }
        Err(e) => {
            error!("{}", e);
            Termination::Failed
        }
    }
}

/// Everything up to and including the start of navigation.
async fn start(
    config: &HarnessConfig,
    lifecycle: &Lifecycle,
) -> HarnessResult<(BrowserSession, mpsc::UnboundedReceiver<SessionEvent>)> {
    let cookie = AuthCookie::from_option(config.auth_cookie.as_deref())?;
    if let Some(cookie) = &cookie {
        debug!("Using auth cookie '{}' for {}", cookie.name, cookie.domain);
    }

    let address = resolve_endpoint(config.endpoint.as_deref(), &config.server, lifecycle).await?;
    let endpoint = &address.endpoint;

    let target = OpenTarget::for_path(endpoint, &config.workspace_path)?;
    let payload = NavigationPayload::new(
        endpoint,
        config.extension_development_path.as_deref(),
        config.extension_tests_path.as_deref(),
        &config.extra_payload,
    )?;
    if payload.get("extensionTestsPath").is_none() {
        warn!("No extension tests path given, the workbench opens without running tests");
    }
    let url = navigation_url(endpoint, &target, &payload)?;

    let session_config = SessionConfig {
        cookie,
        ..config.session.clone()
    };
    let (session, events) = BrowserSession::launch(&session_config, lifecycle).await?;

    info!("Opening {} {}", target.query_key(), target.uri());
    debug!("Navigating to {}", url);
    session.navigate(&url)?;

    Ok((session, events))
}

/// SIGINT / SIGTERM listeners, installed before anything is spawned.
#[cfg(unix)]
struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
        }
    }
}

#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> ShutdownSignal {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownSignal::Interrupt,
            Err(_) => std::future::pending().await,
        }
    }
}
