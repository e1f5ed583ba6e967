use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// One expected line of output from the candidate shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Line {
    /// Expected content of the line.
    pub text: String,
    /// Interpret `text` as a regex (substring search) instead of an exact
    /// line comparison.
    #[serde(default)]
    pub is_re: bool,
    /// Invert the check: a match fails the test, no match passes.
    #[serde(default)]
    pub negative_match: bool,
}

impl Line {
    pub fn exact(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_re: false,
            negative_match: false,
        }
    }
}

/// A literal command line sent to the candidate shell, together with the
/// output contract for that command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenericCmd {
    /// The command to run, including its arguments.
    pub cmd: String,
    /// Output lines the command must produce, in order. Leave empty when the
    /// command is expected to print nothing.
    #[serde(default)]
    pub sequential_outputs: Vec<Line>,
    /// Output lines the command may produce in any order. These are searched
    /// for and extracted before the sequential outputs are checked, which is
    /// useful for output whose order is non-deterministic (job notifications
    /// and the like).
    #[serde(default)]
    pub nonsequential_outputs: Vec<Line>,
    /// Accept the command without checking its output at all.
    #[serde(default)]
    pub ignore_output: bool,
    /// Expected working directory after this command, when the command is
    /// supposed to change it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd_after: Option<String>,
    #[serde(default)]
    pub expect_exit: bool,
    #[serde(default)]
    pub skip_prompt_check: bool,
}

/// A control keystroke delivered to the candidate: `c`, `z` and `\` map to
/// SIGINT/SIGTSTP/SIGQUIT on the sandboxed process group, anything else is
/// written to the PTY as the raw control character (`d` for EOF).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlSignal {
    /// Single lowercase letter (or `\`) naming the control key. May be
    /// empty, in which case the driver records a runner error for the step.
    pub code: String,
    /// Expected single line of output, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Line>,
    #[serde(default)]
    pub expect_exit: bool,
    #[serde(default)]
    pub skip_prompt_check: bool,
}

/// Starts the shell again after an exit. The sandbox workspace is preserved,
/// so state left on disk by earlier commands survives the restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartShell {
    /// Short reason for restarting the shell.
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub expect_exit: bool,
    #[serde(default)]
    pub skip_prompt_check: bool,
}

/// One scripted step of a test case.
///
/// The JSON encoding is structural rather than tagged: an object with a
/// `cmd` field is a [`GenericCmd`], one with a `code` field is a
/// [`ControlSignal`], and one with neither is a [`StartShell`]. Unknown
/// fields are rejected, which keeps the three shapes unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    Generic(GenericCmd),
    Signal(ControlSignal),
    StartShell(StartShell),
}

impl Command {
    /// Whether the shell is expected to terminate after this input, e.g.
    /// after a Ctrl+D.
    pub fn expect_exit(&self) -> bool {
        match self {
            Command::Generic(c) => c.expect_exit,
            Command::Signal(c) => c.expect_exit,
            Command::StartShell(c) => c.expect_exit,
        }
    }

    /// Whether to skip waiting for a prompt after this input.
    pub fn skip_prompt_check(&self) -> bool {
        match self {
            Command::Generic(c) => c.skip_prompt_check,
            Command::Signal(c) => c.skip_prompt_check,
            Command::StartShell(c) => c.skip_prompt_check,
        }
    }

    /// Human-readable label used in failure reasons.
    pub fn label(&self) -> String {
        match self {
            Command::Generic(c) => c.cmd.clone(),
            Command::Signal(c) => format!("Ctrl+{}", c.code),
            Command::StartShell(_) => "Restart shell".to_string(),
        }
    }
}

/// Course section a test case belongs to. The set is closed: a test-case
/// file naming anything else fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Section {
    #[serde(rename = "A.1")]
    A1,
    #[serde(rename = "A.2")]
    A2,
    #[serde(rename = "A.3")]
    A3,
    #[serde(rename = "B.1")]
    B1,
    #[serde(rename = "B.2")]
    B2,
    #[serde(rename = "B.3")]
    B3,
    #[serde(rename = "C.1")]
    C1,
    #[serde(rename = "C.2")]
    C2,
    #[serde(rename = "C.3")]
    C3,
    #[serde(rename = "C.4")]
    C4,
    #[serde(rename = "D.1")]
    D1,
    #[serde(rename = "D.2")]
    D2,
    #[serde(rename = "E.1")]
    E1,
    #[serde(rename = "E.2")]
    E2,
    #[serde(rename = "E.3")]
    E3,
    #[serde(rename = "E.4")]
    E4,
    Misc,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::A1 => "A.1",
            Section::A2 => "A.2",
            Section::A3 => "A.3",
            Section::B1 => "B.1",
            Section::B2 => "B.2",
            Section::B3 => "B.3",
            Section::C1 => "C.1",
            Section::C2 => "C.2",
            Section::C3 => "C.3",
            Section::C4 => "C.4",
            Section::D1 => "D.1",
            Section::D2 => "D.2",
            Section::E1 => "E.1",
            Section::E2 => "E.2",
            Section::E3 => "E.3",
            Section::E4 => "E.4",
            Section::Misc => "Misc",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_timeout() -> f64 {
    2.0
}

/// A single scripted conversation with the candidate shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestCase {
    /// Section of the course this test exercises.
    pub section: Section,
    /// Short description of the test case.
    pub description: String,
    /// Commands to run sequentially.
    pub cmds: Vec<Command>,
    /// Per-event timeout in seconds. Applied to every individual wait on the
    /// candidate's output.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Require a structurally well-formed `<user@host:cwd>` prompt after
    /// every checked command, and verify its cwd against `cwd_after` where
    /// one is given.
    #[serde(default)]
    pub strict_prompt: bool,
    /// Materialize the fixture tree at `/app/test` inside the sandbox before
    /// the shell starts.
    #[serde(default)]
    pub requires_test_folder: bool,
}

impl TestCase {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }
}

/// Ordered collection of test cases, as stored in the test-case JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestCaseList {
    pub testcases: Vec<TestCase>,
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to parse test-case file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("testcase {index} ({description:?}): timeout must be positive, got {timeout}")]
    NonPositiveTimeout {
        index: usize,
        description: String,
        timeout: f64,
    },

    #[error(
        "testcase {index} ({description:?}), command {cmd_index}: control-signal code must be empty or a single character in a-z or '\\', got {code:?}"
    )]
    BadSignalCode {
        index: usize,
        description: String,
        cmd_index: usize,
        code: String,
    },
}

impl TestCaseList {
    /// Parse and validate a test-case file. An invalid file is a fatal
    /// configuration error; callers report it once and abort the run.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let list: TestCaseList = serde_json::from_str(json)?;
        list.validate()?;
        Ok(list)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        for (index, testcase) in self.testcases.iter().enumerate() {
            if testcase.timeout <= 0.0 {
                return Err(SchemaError::NonPositiveTimeout {
                    index,
                    description: testcase.description.clone(),
                    timeout: testcase.timeout,
                });
            }
            for (cmd_index, cmd) in testcase.cmds.iter().enumerate() {
                if let Command::Signal(signal) = cmd {
                    let mut chars = signal.code.chars();
                    let valid = matches!(
                        (chars.next(), chars.next()),
                        (None, None) | (Some('a'..='z') | Some('\\'), None)
                    );
                    if !valid {
                        return Err(SchemaError::BadSignalCode {
                            index,
                            description: testcase.description.clone(),
                            cmd_index,
                            code: signal.code.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_discrimination_is_structural() {
        let json = r#"{
            "testcases": [{
                "section": "A.1",
                "description": "variants",
                "cmds": [
                    {"cmd": "echo hi", "sequential_outputs": [{"text": "hi"}]},
                    {"code": "c"},
                    {"reason": "fresh shell"}
                ]
            }]
        }"#;
        let list = TestCaseList::from_json(json).expect("should parse");
        let cmds = &list.testcases[0].cmds;
        assert!(matches!(cmds[0], Command::Generic(_)));
        assert!(matches!(cmds[1], Command::Signal(_)));
        assert!(matches!(cmds[2], Command::StartShell(_)));
    }

    #[test]
    fn defaults_are_applied() {
        let json = r#"{
            "testcases": [{
                "section": "Misc",
                "description": "defaults",
                "cmds": [{"cmd": "pwd"}]
            }]
        }"#;
        let list = TestCaseList::from_json(json).expect("should parse");
        let tc = &list.testcases[0];
        assert_eq!(tc.timeout, 2.0);
        assert!(!tc.strict_prompt);
        assert!(!tc.requires_test_folder);
        let Command::Generic(cmd) = &tc.cmds[0] else {
            panic!("expected GenericCmd");
        };
        assert!(cmd.sequential_outputs.is_empty());
        assert!(!cmd.ignore_output);
        assert_eq!(cmd.cwd_after, None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let json = r#"{
            "testcases": [{
                "section": "A.1",
                "description": "bad",
                "cmds": [{"cmd": "ls", "extra_field": 1}]
            }]
        }"#;
        assert!(TestCaseList::from_json(json).is_err());
    }

    #[test]
    fn unknown_section_is_rejected() {
        let json = r#"{
            "testcases": [{
                "section": "Z.9",
                "description": "bad section",
                "cmds": [{"cmd": "ls"}]
            }]
        }"#;
        assert!(TestCaseList::from_json(json).is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let json = r#"{
            "testcases": [{
                "section": "A.1",
                "description": "no time",
                "cmds": [{"cmd": "ls"}],
                "timeout": 0.0
            }]
        }"#;
        assert!(matches!(
            TestCaseList::from_json(json),
            Err(SchemaError::NonPositiveTimeout { .. })
        ));
    }

    #[test]
    fn signal_code_is_validated() {
        for (code, ok) in [("c", true), ("\\", true), ("", true), ("cd", false), ("C", false)] {
            let json = format!(
                r#"{{
                    "testcases": [{{
                        "section": "C.1",
                        "description": "signal",
                        "cmds": [{{"code": {}}}]
                    }}]
                }}"#,
                serde_json::to_string(code).expect("string encodes"),
            );
            assert_eq!(TestCaseList::from_json(&json).is_ok(), ok, "code {code:?}");
        }
    }

    #[test]
    fn roundtrip_preserves_structural_encoding() {
        let cmd = Command::Signal(ControlSignal {
            code: "d".to_string(),
            output: None,
            expect_exit: true,
            skip_prompt_check: false,
        });
        let json = serde_json::to_string(&cmd).expect("serializes");
        let back: Command = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(cmd, back);
        assert!(json.contains("\"code\""));
        assert!(!json.contains("\"type\""));
    }
}
