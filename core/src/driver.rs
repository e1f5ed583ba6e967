//! Interactive test driver.
//!
//! Drives one scripted conversation with a sandboxed candidate shell and
//! records everything observable as a typed event stream. The driver never
//! grades; it only captures. A partial conversation (timeout, early exit,
//! runner error) still produces a complete `RunResult` so the evaluator can
//! fail the test with a precise reason.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shellgrade_protocol::Command;
use shellgrade_protocol::Event;
use shellgrade_protocol::EventType;
use shellgrade_protocol::RunResult;
use shellgrade_protocol::TestCase;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::error::GraderErr;
use crate::error::Result;
use crate::prompt;
use crate::sandbox::ChunkOutcome;
use crate::sandbox::Sandbox;

/// Bound on each wait for the very first prompt after a cold start, which is
/// dominated by container startup rather than the candidate itself.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on how much trailing output is salvaged after an unexpected exit.
const FINAL_DRAIN_CHARS: usize = 1024;

const RAW_LOG_HEADER: &str = "##### START RAW OUTPUT #####\n";

/// Why command dispatch stopped early.
enum Abort {
    /// The candidate hit EOF or a timeout mid-conversation; remaining
    /// commands are not sent but the run result is still produced.
    ChildExited,
    /// A runner error was already recorded as an ERROR event.
    Fatal,
    /// The operator pressed Ctrl-C.
    Interrupted,
}

/// Runs test cases against one candidate binary, one sandbox per test.
pub struct Driver {
    binary: PathBuf,
    ctrl_c: Arc<Notify>,
}

impl Driver {
    pub fn new(binary: PathBuf, ctrl_c: Arc<Notify>) -> Self {
        Self { binary, ctrl_c }
    }

    /// Execute `testcase` in a fresh sandbox and return its event log. All
    /// failures of the candidate (and of the runner itself) are folded into
    /// the event stream; the only error surfaced to the caller is an
    /// operator abort.
    pub async fn run(&self, testcase: &TestCase) -> Result<RunResult> {
        let mut diag = DiagLog::new();
        diag.info(format!("running testcase: {}", testcase.description));

        let sandbox = match Sandbox::start(&self.binary, testcase.requires_test_folder).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                diag.error(format!("sandbox startup failed: {e}"));
                return Ok(RunResult {
                    testcase: testcase.clone(),
                    events: vec![Event::new(EventType::Error, format!("Unexpected error: {e}"))],
                    raw_log: RAW_LOG_HEADER.to_string(),
                    driver_log: diag.into_contents(),
                });
            }
        };
        diag.info(format!("spawned container {}", sandbox.container_name()));

        let mut state = RunState {
            sandbox,
            events: Vec::new(),
            buffer: String::new(),
            eof: false,
            timeout: testcase.timeout_duration(),
            diag,
            ctrl_c: Arc::clone(&self.ctrl_c),
        };

        let outcome = state.drive(testcase).await;
        if matches!(outcome, Err(Abort::ChildExited)) {
            state.drain_final_output().await;
        }

        state.sandbox.stop().await;
        let raw_log = state.sandbox.raw_log();
        state
            .diag
            .info("finished running testcase, sandbox stopped");

        let result = RunResult {
            testcase: testcase.clone(),
            events: state.events,
            raw_log,
            driver_log: state.diag.into_contents(),
        };

        if matches!(outcome, Err(Abort::Interrupted)) {
            return Err(GraderErr::Interrupted);
        }
        Ok(result)
    }
}

struct RunState {
    sandbox: Sandbox,
    events: Vec<Event>,
    buffer: String,
    eof: bool,
    timeout: Duration,
    diag: DiagLog,
    ctrl_c: Arc<Notify>,
}

impl RunState {
    async fn drive(&mut self, testcase: &TestCase) -> std::result::Result<(), Abort> {
        self.await_prompt(STARTUP_TIMEOUT).await?;
        for cmd in &testcase.cmds {
            self.send_cmd(cmd).await?;
        }
        Ok(())
    }

    async fn send_cmd(&mut self, cmd: &Command) -> std::result::Result<(), Abort> {
        let serialized = serde_json::to_string(cmd)
            .unwrap_or_else(|e| format!("unserializable command: {e}"));
        self.add_event(EventType::Input, serialized, true)?;

        match cmd {
            Command::Generic(generic) => {
                self.sandbox.send_line(&generic.cmd).await;
            }
            Command::Signal(signal) => match signal.code.chars().next() {
                Some(code) => match signal_name(code) {
                    Some(name) => {
                        match self.sandbox.signal(name).await {
                            Ok(()) => self.diag.debug(format!(
                                "sent {name} to container {}",
                                self.sandbox.container_name()
                            )),
                            // The container may already be gone; record and
                            // keep going.
                            Err(e) => self.diag.error(format!("failed to send signal: {e}")),
                        }
                    }
                    None => self.sandbox.send_control(code).await,
                },
                None => {
                    self.diag.error("encountered empty control-signal code");
                    self.add_event(
                        EventType::Error,
                        "Encountered empty command in TestCase.cmds",
                        true,
                    )?;
                }
            },
            Command::StartShell(_) => {
                self.diag.info("restarting shell");
                if let Err(e) = self.sandbox.restart().await {
                    self.diag.error(format!("restart failed: {e}"));
                    self.add_event(EventType::Error, format!("Unexpected error: {e}"), true)?;
                    return Err(Abort::Fatal);
                }
                self.buffer.clear();
                self.eof = false;
            }
        }

        if !cmd.expect_exit() && !cmd.skip_prompt_check() {
            self.await_prompt(self.timeout).await?;
        } else if cmd.expect_exit() {
            self.await_exit().await?;
        }
        Ok(())
    }

    /// Consume events until the most recent one is a prompt (or the child
    /// exited). Each individual wait is bounded by `timeout`.
    async fn await_prompt(&mut self, timeout: Duration) -> std::result::Result<(), Abort> {
        while !self.exit_event() && !self.prompt_event() {
            self.consume_event(timeout, true).await?;
        }
        Ok(())
    }

    /// Consume events until EOF, bounded by a wall clock of one testcase
    /// timeout. EOF here does not truncate the run: a StartShell may follow.
    async fn await_exit(&mut self) -> std::result::Result<(), Abort> {
        let start = Instant::now();
        while !self.exit_event() {
            if start.elapsed() > self.timeout {
                self.add_event(EventType::Timeout, "Timed out waiting for exit", false)?;
                continue;
            }
            self.consume_event(self.timeout, false).await?;
        }
        Ok(())
    }

    /// Resolve exactly one of the four observable outcomes: a prompt, a
    /// complete line, EOF, or a timeout.
    async fn consume_event(
        &mut self,
        timeout: Duration,
        raise_if_exit: bool,
    ) -> std::result::Result<(), Abort> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((token, consumed)) = next_token(&self.buffer) {
                self.buffer.drain(..consumed);
                return match token {
                    Token::Prompt { before, text } => {
                        if !before.is_empty() {
                            self.add_event(EventType::Output, before, raise_if_exit)?;
                        }
                        self.add_event(EventType::Output, text, raise_if_exit)
                    }
                    // A bare CRLF is consumed without producing an event.
                    Token::Line { text } if text.is_empty() => Ok(()),
                    Token::Line { text } => {
                        self.add_event(EventType::Output, text, raise_if_exit)
                    }
                };
            }

            if self.eof {
                return self.add_event(EventType::Eof, "EOF received from child", raise_if_exit);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.add_event(EventType::Timeout, "Child timed out", raise_if_exit);
            }

            let outcome = {
                let ctrl_c = Arc::clone(&self.ctrl_c);
                let recv = self.sandbox.recv_chunk(remaining);
                tokio::pin!(recv);
                tokio::select! {
                    biased;
                    _ = ctrl_c.notified() => None,
                    outcome = &mut recv => Some(outcome),
                }
            };
            match outcome {
                None => return Err(Abort::Interrupted),
                Some(ChunkOutcome::Data(bytes)) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&bytes));
                }
                Some(ChunkOutcome::Eof) => self.eof = true,
                Some(ChunkOutcome::TimedOut) => {
                    return self.add_event(EventType::Timeout, "Child timed out", raise_if_exit);
                }
            }
        }
    }

    /// Salvage whatever the child printed on its way out so the raw record
    /// is complete, without blocking past one testcase timeout.
    async fn drain_final_output(&mut self) {
        let deadline = Instant::now() + self.timeout;
        while !self.eof && self.buffer.len() < FINAL_DRAIN_CHARS {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            match self.sandbox.recv_chunk(remaining).await {
                ChunkOutcome::Data(bytes) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&bytes));
                }
                ChunkOutcome::Eof => self.eof = true,
                ChunkOutcome::TimedOut => return,
            }
        }
        let text: String = self.buffer.chars().take(FINAL_DRAIN_CHARS).collect();
        self.buffer.clear();
        if !text.is_empty() {
            let _ = self.add_event(EventType::Output, text, false);
        }
    }

    fn add_event(
        &mut self,
        kind: EventType,
        details: impl Into<String>,
        raise_if_exit: bool,
    ) -> std::result::Result<(), Abort> {
        let event = Event::new(kind, details);
        self.diag
            .debug(format!("received event: {} {:?}", event.kind, event.details));
        self.events.push(event);
        if raise_if_exit && self.exit_event() {
            self.diag
                .info("exit event received, truncating remaining commands");
            return Err(Abort::ChildExited);
        }
        Ok(())
    }

    fn prompt_event(&self) -> bool {
        self.events
            .last()
            .is_some_and(|e| e.kind == EventType::Output && prompt::matches_full(&e.details))
    }

    fn exit_event(&self) -> bool {
        self.events
            .last()
            .is_some_and(|e| matches!(e.kind, EventType::Eof | EventType::Timeout))
    }
}

fn signal_name(code: char) -> Option<&'static str> {
    match code {
        'c' => Some("SIGINT"),
        'z' => Some("SIGTSTP"),
        '\\' => Some("SIGQUIT"),
        _ => None,
    }
}

/// One resolved token from the head of the PTY buffer.
#[derive(Debug, PartialEq, Eq)]
enum Token {
    Prompt { before: String, text: String },
    Line { text: String },
}

/// Find the earliest match in `buffer` between the prompt regex and a
/// CRLF-terminated line, mirroring the expect semantics of the capture loop:
/// the match starting earliest wins, with the prompt preferred on ties.
/// Returns the token and the number of bytes consumed.
fn next_token(buffer: &str) -> Option<(Token, usize)> {
    let prompt_match = prompt::find(buffer);
    let crlf = buffer.find("\r\n");

    let prompt_wins = match (prompt_match, crlf) {
        (Some((start, _)), Some(line_start)) => start <= line_start,
        (Some(_), None) => true,
        (None, _) => false,
    };

    if prompt_wins {
        let (start, end) = prompt_match?;
        let text = buffer[start..end].trim_end_matches(['\r', '\n']).to_string();
        let before = buffer[..start].to_string();
        Some((Token::Prompt { before, text }, end))
    } else {
        let line_end = crlf? + 2;
        let text = buffer[..line_end].trim_end_matches(['\r', '\n']).to_string();
        Some((Token::Line { text }, line_end))
    }
}

/// Per-run diagnostic log: every driver decision is mirrored to the tracing
/// stack and into an in-memory buffer that ships inside the RunResult.
struct DiagLog {
    name: String,
    lines: String,
}

impl DiagLog {
    fn new() -> Self {
        Self {
            name: format!("driver.{}", uuid::Uuid::new_v4().simple()),
            lines: String::new(),
        }
    }

    fn record(&mut self, level: &str, message: &str) {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        self.lines
            .push_str(&format!("{timestamp} - {} - {level} - {message}\n", self.name));
    }

    fn debug(&mut self, message: impl AsRef<str>) {
        debug!("{}", message.as_ref());
        self.record("DEBUG", message.as_ref());
    }

    fn info(&mut self, message: impl AsRef<str>) {
        info!("{}", message.as_ref());
        self.record("INFO", message.as_ref());
    }

    fn error(&mut self, message: impl AsRef<str>) {
        error!("{}", message.as_ref());
        self.record("ERROR", message.as_ref());
    }

    fn into_contents(self) -> String {
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn line_before_prompt_wins() {
        let buffer = "hello\r\n<u@h:/app> ";
        let (token, consumed) = next_token(buffer).expect("token");
        assert_eq!(
            token,
            Token::Line {
                text: "hello".to_string()
            }
        );
        assert_eq!(consumed, 7);
    }

    #[test]
    fn prompt_at_start_beats_later_line() {
        let buffer = "<u@h:/app> echo\r\n";
        let (token, _) = next_token(buffer).expect("token");
        assert_eq!(
            token,
            Token::Prompt {
                before: String::new(),
                text: "<u@h:/app> ".to_string()
            }
        );
    }

    #[test]
    fn offset_prompt_beats_a_later_line_ending() {
        // The prompt starts mid-buffer but still before the CRLF; earliest
        // match wins, so the prompt boundary must not be swallowed into an
        // opaque line.
        let buffer = "xx<u@h:/app>yy\r\nzz";
        let (token, consumed) = next_token(buffer).expect("token");
        assert_eq!(
            token,
            Token::Prompt {
                before: "xx".to_string(),
                text: "<u@h:/app>".to_string()
            }
        );
        assert_eq!(consumed, 12);
    }

    #[test]
    fn unterminated_text_before_prompt_is_carried_as_before() {
        let buffer = "partial<u@h:/app> ";
        let (token, consumed) = next_token(buffer).expect("token");
        assert_eq!(
            token,
            Token::Prompt {
                before: "partial".to_string(),
                text: "<u@h:/app> ".to_string()
            }
        );
        assert_eq!(consumed, buffer.len());
    }

    #[test]
    fn bare_crlf_produces_empty_line_token() {
        let (token, consumed) = next_token("\r\nrest").expect("token");
        assert_eq!(
            token,
            Token::Line {
                text: String::new()
            }
        );
        assert_eq!(consumed, 2);
    }

    #[test]
    fn incomplete_buffer_yields_nothing() {
        assert_eq!(next_token("no line ending yet"), None);
        assert_eq!(next_token(""), None);
    }

    #[test]
    fn prompt_without_trailing_newline_is_recognized() {
        let (token, _) = next_token("<user@host:/app>").expect("token");
        assert_eq!(
            token,
            Token::Prompt {
                before: String::new(),
                text: "<user@host:/app>".to_string()
            }
        );
    }

    #[test]
    fn signal_map_matches_the_keyboard_contract() {
        assert_eq!(signal_name('c'), Some("SIGINT"));
        assert_eq!(signal_name('z'), Some("SIGTSTP"));
        assert_eq!(signal_name('\\'), Some("SIGQUIT"));
        assert_eq!(signal_name('d'), None);
    }
}
