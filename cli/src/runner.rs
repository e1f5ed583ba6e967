use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use shellgrade_core::Driver;
use shellgrade_core::ensure_tester_image;
use shellgrade_core::error::GraderErr;
use shellgrade_core::util::notify_on_sigint;
use shellgrade_protocol::TestCase;
use shellgrade_protocol::TestCaseList;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::error;

use crate::cli::RunArgs;
use crate::reporter::Reporter;

/// Name of the candidate binary inside each student's build directory.
const CANDIDATE_BINARY: &str = "shell.out";

pub(crate) async fn run_tests(args: RunArgs, with_ansi: bool) -> anyhow::Result<()> {
    let testcases_text = fs::read_to_string(&args.testcases)
        .with_context(|| format!("unable to read testcase file {}", args.testcases.display()))?;
    let testcases = TestCaseList::from_json(&testcases_text)
        .context("unable to validate loaded testcases file")?;

    let students = discover_students(&args.binaries_dir)?;
    anyhow::ensure!(
        !students.is_empty(),
        "no candidate binaries found in {}",
        args.binaries_dir.display()
    );

    ensure_tester_image(args.force_rebuild).await?;
    fs::create_dir_all(&args.logging_dir)?;

    let reporter = Reporter::create_with_ansi(with_ansi);
    let ctrl_c = notify_on_sigint();
    let semaphore = Arc::new(Semaphore::new(args.jobs.max(1)));
    let testcases = Arc::new(testcases.testcases);
    let filter = Arc::new(TestFilter {
        section: args.section,
        test_case: args.test_case,
    });

    let mut handles = Vec::new();
    for (student, binary) in students {
        let log_dir = args.logging_dir.join(&student);
        let semaphore = Arc::clone(&semaphore);
        let testcases = Arc::clone(&testcases);
        let filter = Arc::clone(&filter);
        let ctrl_c = Arc::clone(&ctrl_c);
        handles.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return Ok(());
            };
            run_student(
                &student, &binary, &log_dir, &testcases, &filter, ctrl_c, reporter,
            )
            .await
            .map_err(|e| (student, e))
        }));
    }

    let mut failed_students = 0usize;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err((_, GraderErr::Interrupted))) => {
                anyhow::bail!("interrupted; sandboxes were stopped");
            }
            Ok(Err((student, e))) => {
                error!("failed to run tests for {student}: {e}");
                failed_students += 1;
            }
            Err(e) => {
                error!("worker panicked: {e}");
                failed_students += 1;
            }
        }
    }
    anyhow::ensure!(
        failed_students == 0,
        "{failed_students} student(s) could not be fully tested"
    );
    Ok(())
}

struct TestFilter {
    section: Option<String>,
    test_case: Option<usize>,
}

impl TestFilter {
    fn is_unrestricted(&self) -> bool {
        self.section.is_none() && self.test_case.is_none()
    }

    fn matches(&self, id: usize, testcase: &TestCase) -> bool {
        if self.test_case.is_some_and(|wanted| wanted != id) {
            return false;
        }
        if let Some(section) = &self.section
            && !testcase.section.as_str().contains(section.as_str())
        {
            return false;
        }
        true
    }
}

async fn run_student(
    student: &str,
    binary: &Path,
    log_dir: &Path,
    testcases: &[TestCase],
    filter: &TestFilter,
    ctrl_c: Arc<tokio::sync::Notify>,
    reporter: Reporter,
) -> Result<(), GraderErr> {
    let tests_dir = log_dir.join("tests");
    // A full run starts from a clean slate; filtered runs keep earlier logs
    // so single tests can be re-recorded in place.
    if filter.is_unrestricted() && tests_dir.exists() {
        fs::remove_dir_all(&tests_dir)?;
    }
    fs::create_dir_all(&tests_dir)?;

    let selected: Vec<(usize, &TestCase)> = testcases
        .iter()
        .enumerate()
        .filter(|(id, testcase)| filter.matches(*id, testcase))
        .collect();
    reporter.run_started(student, selected.len());
    let started = Instant::now();

    let driver = Driver::new(binary.to_path_buf(), ctrl_c);
    for (id, testcase) in selected {
        let result = driver.run(testcase).await?;
        fs::write(
            tests_dir.join(format!("test_{id}.log")),
            serde_json::to_string_pretty(&result)?,
        )?;
        debug!("{student}: recorded test_{id}");
    }

    reporter.run_finished(student, started.elapsed());
    Ok(())
}

/// Find candidate binaries: either `<binaries_dir>/<student>/shell.out` for
/// a whole roster, or `<binaries_dir>/shell.out` for a single student.
fn discover_students(binaries_dir: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let direct = binaries_dir.join(CANDIDATE_BINARY);
    if direct.is_file() {
        let name = binaries_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "student".to_string());
        return Ok(vec![(name, direct)]);
    }

    let mut students = Vec::new();
    for entry in fs::read_dir(binaries_dir)
        .with_context(|| format!("unable to read binaries dir {}", binaries_dir.display()))?
    {
        let path = entry?.path();
        let binary = path.join(CANDIDATE_BINARY);
        if path.is_dir() && binary.is_file() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            students.push((name, binary));
        }
    }
    students.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(students)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellgrade_protocol::Section;

    fn testcase_in(section: Section) -> TestCase {
        TestCase {
            section,
            description: "filter target".to_string(),
            cmds: Vec::new(),
            timeout: 2.0,
            strict_prompt: false,
            requires_test_folder: false,
        }
    }

    #[test]
    fn section_filter_is_a_substring_match() {
        let filter = TestFilter {
            section: Some("A".to_string()),
            test_case: None,
        };
        assert!(filter.matches(0, &testcase_in(Section::A1)));
        assert!(filter.matches(5, &testcase_in(Section::A3)));
        assert!(!filter.matches(0, &testcase_in(Section::B1)));
    }

    #[test]
    fn test_case_filter_selects_one_index() {
        let filter = TestFilter {
            section: None,
            test_case: Some(3),
        };
        assert!(!filter.matches(0, &testcase_in(Section::A1)));
        assert!(filter.matches(3, &testcase_in(Section::A1)));
    }

    #[test]
    fn unrestricted_filter_accepts_everything() {
        let filter = TestFilter {
            section: None,
            test_case: None,
        };
        assert!(filter.is_unrestricted());
        assert!(filter.matches(7, &testcase_in(Section::Misc)));
    }
}
