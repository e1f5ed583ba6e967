//! Grading evaluator.
//!
//! A pure replay of a recorded `RunResult` against the test case's declared
//! expectations. The evaluator never touches the candidate or the sandbox;
//! it reads only the event stream, so grading the same result twice always
//! yields the same report. The first failing check wins.

use chrono::Duration as ChronoDuration;
use shellgrade_protocol::Command;
use shellgrade_protocol::Event;
use shellgrade_protocol::EventType;
use shellgrade_protocol::FailureReason;
use shellgrade_protocol::GradeReport;
use shellgrade_protocol::RunResult;

use crate::prompt;

/// Ctrl+D must produce EOF within this long of the keystroke. A design
/// constant, deliberately independent of the testcase timeout.
const EOF_LATENCY_MS: i64 = 500;

/// Grade one recorded run.
pub fn grade(test_id: &str, result: &RunResult) -> GradeReport {
    let testcase = &result.testcase;
    match evaluate(result) {
        Ok(()) => GradeReport::passed(test_id, testcase.section, testcase.description.clone()),
        Err(failure) => GradeReport::failed(
            test_id,
            testcase.section,
            testcase.description.clone(),
            failure,
        ),
    }
}

fn evaluate(result: &RunResult) -> Result<(), FailureReason> {
    let testcase = &result.testcase;

    if result.events.iter().any(|e| e.kind == EventType::Error) {
        return Err(FailureReason::new(
            -1,
            "Global Execution",
            "Test runner encountered an error (see raw logs).",
        ));
    }

    let stream: Vec<&Event> = result
        .events
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                EventType::Input | EventType::Output | EventType::Timeout | EventType::Eof
            )
        })
        .collect();
    let input_indices: Vec<usize> = stream
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind == EventType::Input)
        .map(|(i, _)| i)
        .collect();

    if input_indices.len() != testcase.cmds.len() {
        return Err(FailureReason::new(
            input_indices.len() as i64,
            "Sequence Check",
            format!(
                "Expected {} commands, but executed {}.",
                testcase.cmds.len(),
                input_indices.len()
            ),
        ));
    }

    for (cmd_idx, cmd) in testcase.cmds.iter().enumerate() {
        // A restart carries no output contract.
        if matches!(cmd, Command::StartShell(_)) {
            continue;
        }

        let start = input_indices[cmd_idx];
        let end = input_indices
            .get(cmd_idx + 1)
            .copied()
            .unwrap_or(stream.len());
        let command_events = &stream[start..end];

        let outputs_only: Vec<&Event> = command_events
            .iter()
            .skip(1)
            .filter(|e| e.kind == EventType::Output)
            .copied()
            .collect();

        // The trailing prompt, if any, is split off; the rest is content.
        let (prompt_output, content): (Option<&str>, &[&Event]) = match outputs_only.split_last() {
            Some((last, rest)) if prompt::matches_prefix(&last.details) => {
                (Some(last.details.as_str()), rest)
            }
            _ => (None, &outputs_only[..]),
        };
        let actual_lines: Vec<&str> = content.iter().map(|e| e.details.as_str()).collect();

        let step = cmd_idx as i64;
        let errcmd = cmd.label();

        if let Command::Signal(signal) = cmd
            && signal.code == "d"
        {
            // The EOF must land inside this command's slice: a later restart
            // may legitimately extend the stream past it.
            let last = command_events[command_events.len() - 1];
            let input_event = command_events[0];
            let within_latency = last
                .time
                .signed_duration_since(input_event.time)
                <= ChronoDuration::milliseconds(EOF_LATENCY_MS);
            if last.kind != EventType::Eof || !within_latency {
                return Err(FailureReason::new(step, errcmd, "Expected EOF from child.")
                    .with_expected("EventType.EOF")
                    .with_actual(format!(
                        "EventType.{}",
                        last.kind.to_string().to_uppercase()
                    )));
            }
            continue;
        }

        let prompt_checked = !cmd.expect_exit() && !cmd.skip_prompt_check();
        if prompt_checked && prompt_output.is_none() {
            return Err(FailureReason::new(
                step,
                errcmd,
                "Prompt not found after command execution.",
            ));
        }

        if testcase.strict_prompt
            && prompt_checked
            && let Some(prompt_text) = prompt_output
        {
            match prompt::parse_strict(prompt_text) {
                None => {
                    return Err(FailureReason::new(step, errcmd, "Prompt malformed.")
                        .with_actual(prompt_text));
                }
                Some((_user, _host, cwd)) => {
                    if let Command::Generic(generic) = cmd
                        && let Some(expected_cwd) = &generic.cwd_after
                        && expected_cwd != &cwd
                    {
                        return Err(FailureReason::new(
                            step,
                            generic.cmd.clone(),
                            "Wrong CWD in prompt.",
                        )
                        .with_expected(expected_cwd.clone())
                        .with_actual(cwd));
                    }
                }
            }
        }

        let mut lines_to_check: Vec<String> =
            actual_lines.iter().map(|l| l.trim().to_string()).collect();

        if let Command::Signal(signal) = cmd {
            let expected_count = usize::from(signal.output.is_some());
            if lines_to_check.len() != expected_count {
                return Err(FailureReason::new(
                    step,
                    errcmd,
                    "Incorrect number of output lines for sequential check.",
                ));
            }
            if let Some(expected) = &signal.output {
                let actual_line = &lines_to_check[0];
                let is_match = line_matches(actual_line, &expected.text, expected.is_re);
                if expected.negative_match {
                    if is_match {
                        return Err(FailureReason::new(
                            step,
                            errcmd,
                            "Found forbidden sequential output at line 0",
                        )
                        .with_actual(actual_line.clone()));
                    }
                } else if !is_match {
                    return Err(FailureReason::new(
                        step,
                        errcmd,
                        "Mismatch at sequential line 0",
                    )
                    .with_expected(expected.text.clone())
                    .with_actual(actual_line.clone()));
                }
            }
            continue;
        }

        let Command::Generic(generic) = cmd else {
            continue;
        };

        // Non-sequential expectations are consumed in declaration order;
        // matched lines are removed so later checks see only the residue.
        for ns_line in &generic.nonsequential_outputs {
            let found = lines_to_check
                .iter()
                .position(|line| line_matches(line, &ns_line.text, ns_line.is_re));
            if ns_line.negative_match {
                if let Some(found_index) = found {
                    return Err(FailureReason::new(
                        step,
                        generic.cmd.clone(),
                        format!("Found forbidden output: '{}'", ns_line.text),
                    )
                    .with_actual(lines_to_check[found_index].clone()));
                }
            } else {
                match found {
                    None => {
                        return Err(FailureReason::new(
                            step,
                            generic.cmd.clone(),
                            format!(
                                "Missing required non-sequential output: '{}'",
                                ns_line.text
                            ),
                        )
                        .with_actual(actual_lines.join("\r\n")));
                    }
                    Some(found_index) => {
                        lines_to_check.remove(found_index);
                    }
                }
            }
        }

        if generic.ignore_output {
            continue;
        }

        if !generic.sequential_outputs.is_empty() {
            if lines_to_check.len() != generic.sequential_outputs.len() {
                return Err(FailureReason::new(
                    step,
                    generic.cmd.clone(),
                    "Incorrect number of output lines for sequential check.",
                )
                .with_expected(generic.sequential_outputs.len().to_string())
                .with_actual(lines_to_check.len().to_string()));
            }
            for (seq_idx, seq_line) in generic.sequential_outputs.iter().enumerate() {
                let actual_line = &lines_to_check[seq_idx];
                let is_match = line_matches(actual_line, &seq_line.text, seq_line.is_re);
                if seq_line.negative_match {
                    if is_match {
                        return Err(FailureReason::new(
                            step,
                            generic.cmd.clone(),
                            format!("Found forbidden sequential output at index {seq_idx}"),
                        )
                        .with_actual(actual_line.clone()));
                    }
                } else if !is_match {
                    return Err(FailureReason::new(
                        step,
                        generic.cmd.clone(),
                        format!("Mismatch at sequential line {seq_idx}"),
                    )
                    .with_expected(seq_line.text.clone())
                    .with_actual(actual_line.clone()));
                }
            }
        }
    }

    Ok(())
}

/// Match one actual line against one expectation: exact equality, or a
/// substring regex search after backslash-escape expansion when `is_regex`
/// is set. An invalid pattern simply does not match.
fn line_matches(line: &str, expected: &str, is_regex: bool) -> bool {
    if is_regex {
        match regex_lite::Regex::new(&unescape(expected)) {
            Ok(re) => re.is_match(line),
            Err(_) => false,
        }
    } else {
        line == expected
    }
}

/// Expand backslash escapes in an expectation string so a JSON test file can
/// spell `\\n` to mean a newline. Unrecognized escapes (`\d`, `\s`, ...) are
/// preserved verbatim; they are regex syntax, not escapes.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            None => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('v') => out.push('\x0b'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('x') => push_hex_escape(&mut out, &mut chars, 'x', 2),
            Some('u') => push_hex_escape(&mut out, &mut chars, 'u', 4),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

fn push_hex_escape(out: &mut String, chars: &mut std::str::Chars<'_>, marker: char, width: usize) {
    let digits: String = chars.clone().take(width).collect();
    if digits.len() == width
        && let Ok(value) = u32::from_str_radix(&digits, 16)
        && let Some(decoded) = char::from_u32(value)
    {
        out.push(decoded);
        for _ in 0..width {
            chars.next();
        }
    } else {
        out.push('\\');
        out.push(marker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unescape_expands_common_escapes() {
        assert_eq!(unescape(r"a\nb"), "a\nb");
        assert_eq!(unescape(r"tab\there"), "tab\there");
        assert_eq!(unescape(r"\x41"), "A");
        assert_eq!(unescape(r"A"), "A");
        assert_eq!(unescape(r"\\d"), r"\d");
    }

    #[test]
    fn unescape_preserves_regex_classes() {
        assert_eq!(unescape(r"\d+ jobs"), r"\d+ jobs");
        assert_eq!(unescape(r"\s*"), r"\s*");
        assert_eq!(unescape(r"trailing\"), "trailing\\");
    }

    #[test]
    fn exact_match_is_not_a_search() {
        assert!(line_matches("hello", "hello", false));
        assert!(!line_matches("hello world", "hello", false));
    }

    #[test]
    fn regex_match_is_a_substring_search() {
        assert!(line_matches("job [1] started", r"job \[\d\]", true));
        assert!(line_matches("prefix 42 suffix", r"\d+", true));
        assert!(!line_matches("no digits here", r"\d+", true));
    }

    #[test]
    fn invalid_regex_never_matches() {
        assert!(!line_matches("anything", r"([unclosed", true));
    }
}
