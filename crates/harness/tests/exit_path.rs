//! The exit entry point ends the run: browser close and server kill are
//! both attempted, in that order, and the reported code wins.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use code_web_harness::bridge::{Bridge, BridgeMessage, BridgeState, ConsoleSink, LogLevel};
use code_web_harness::diagnostics::{ConsoleFilter, Diagnostic, DiagnosticsRelay};
use code_web_harness::lifecycle::{Lifecycle, Teardown};
use code_web_harness::playwright::SessionEvent;
use code_web_harness::{HarnessError, HarnessResult};

type Log = Arc<Mutex<Vec<String>>>;

struct FakeResource {
    name: &'static str,
    fail: bool,
    log: Log,
}

#[async_trait]
impl Teardown for FakeResource {
    fn name(&self) -> String {
        self.name.to_string()
    }

    async fn teardown(self: Box<Self>) -> HarnessResult<()> {
        self.log.lock().push(format!("teardown {}", self.name));
        if self.fail {
            Err(HarnessError::Driver(format!("{} refused", self.name)))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone)]
struct SharedConsole(Log);

impl ConsoleSink for SharedConsole {
    fn write(&mut self, level: LogLevel, line: &str) {
        self.0.lock().push(format!("{:?}: {}", level, line));
    }
}

fn resource(name: &'static str, fail: bool, log: &Log) -> Box<dyn Teardown> {
    Box::new(FakeResource {
        name,
        fail,
        log: log.clone(),
    })
}

async fn run_to_exit(browser_fails: bool, server_fails: bool, code: i32) -> (i32, Vec<String>) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let lifecycle = Lifecycle::new();
    lifecycle.register(resource("server", server_fails, &log));
    lifecycle.register(resource("browser", browser_fails, &log));

    let mut bridge = Bridge::new(Box::new(SharedConsole(log.clone())));
    let relay = DiagnosticsRelay::new(ConsoleFilter::Warning);
    let (tx, mut rx) = mpsc::unbounded_channel();

    tx.send(SessionEvent::Navigated("http://127.0.0.1:9999/".to_string())).unwrap();
    tx.send(SessionEvent::Diagnostic(Diagnostic::HttpError {
        status: 404,
        url: "http://127.0.0.1:9999/favicon.ico".to_string(),
    }))
    .unwrap();
    tx.send(SessionEvent::Bridge(BridgeMessage::Log {
        level: LogLevel::Log,
        args: vec![json!("2 passing")],
    }))
    .unwrap();
    tx.send(SessionEvent::Bridge(BridgeMessage::Exit { code })).unwrap();

    let termination = bridge.run(&mut rx, &relay).await;
    assert_eq!(bridge.state(), BridgeState::Terminating);

    let exit_code = lifecycle.shutdown(termination).await;
    bridge.finish();
    assert_eq!(bridge.state(), BridgeState::Terminated);

    let entries = log.lock().clone();
    (exit_code, entries)
}

#[tokio::test]
async fn exit_code_is_relayed_after_teardown() {
    let (code, log) = run_to_exit(false, false, 0).await;
    assert_eq!(code, 0);
    assert_eq!(log, vec!["Log: 2 passing", "teardown browser", "teardown server"]);
}

#[tokio::test]
async fn failing_browser_close_still_kills_server() {
    let (code, log) = run_to_exit(true, false, 5).await;
    assert_eq!(code, 5);
    assert_eq!(log[1..], ["teardown browser", "teardown server"]);
}

#[tokio::test]
async fn failing_server_kill_keeps_reported_code() {
    let (code, log) = run_to_exit(true, true, 2).await;
    assert_eq!(code, 2);
    assert_eq!(log[1..], ["teardown browser", "teardown server"]);
}
