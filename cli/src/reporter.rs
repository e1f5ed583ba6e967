use std::time::Duration;

use chrono::Utc;
use owo_colors::OwoColorize;
use owo_colors::Style;
use shellgrade_common::elapsed::format_duration;
use shellgrade_protocol::GradeSummary;

macro_rules! ts_println {
    ($($arg:tt)*) => {{
        let now = Utc::now();
        let formatted = now.format("%Y-%m-%dT%H:%M:%S").to_string();
        print!("[{}] ", formatted);
        println!($($arg)*);
    }};
}

/// Styled terminal output for run progress and grade tables.
#[derive(Clone, Copy)]
pub(crate) struct Reporter {
    // To ensure that --color=never is respected, ANSI escapes _must_ be
    // added using .style() with one of these fields.
    bold: Style,
    dimmed: Style,
    red: Style,
    green: Style,
}

impl Reporter {
    pub(crate) fn create_with_ansi(with_ansi: bool) -> Self {
        if with_ansi {
            Self {
                bold: Style::new().bold(),
                dimmed: Style::new().dimmed(),
                red: Style::new().red(),
                green: Style::new().green(),
            }
        } else {
            Self {
                bold: Style::new(),
                dimmed: Style::new(),
                red: Style::new(),
                green: Style::new(),
            }
        }
    }

    pub(crate) fn run_started(&self, student: &str, test_count: usize) {
        ts_println!(
            "{}",
            format!("Running {test_count} testcases for {student}").style(self.bold)
        );
    }

    pub(crate) fn run_finished(&self, student: &str, elapsed: Duration) {
        ts_println!(
            "{}",
            format!("Finished {student} in {}", format_duration(elapsed)).style(self.dimmed)
        );
    }

    pub(crate) fn print_student_summary(&self, student: &str, summary: &GradeSummary) {
        ts_println!("{}", format!("Grades for {student}").style(self.bold));
        for report in &summary.results {
            let verdict = if report.passed {
                "PASS".style(self.green).to_string()
            } else {
                "FAIL".style(self.red).to_string()
            };
            println!(
                "  {verdict} {} [{}] {}",
                report.test_id, report.section, report.description
            );
            if let Some(failure) = &report.failure {
                println!(
                    "       {}",
                    format!(
                        "step {} ({}): {}",
                        failure.step_index, failure.command, failure.reason
                    )
                    .style(self.dimmed)
                );
                if let Some(expected) = &failure.expected {
                    println!("       {}", format!("expected: {expected}").style(self.dimmed));
                }
                if let Some(actual) = &failure.actual {
                    println!("       {}", format!("actual:   {actual}").style(self.dimmed));
                }
            }
        }
        let totals = format!(
            "Passed: {}/{}",
            summary.passed_tests, summary.total_tests
        );
        let totals = if summary.failed_tests == 0 {
            totals.style(self.green).to_string()
        } else {
            totals.style(self.red).to_string()
        };
        ts_println!("{totals}");
    }
}
