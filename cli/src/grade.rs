use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use shellgrade_core::summary::grade_student;
use shellgrade_protocol::TestCaseList;

use crate::cli::GradeArgs;
use crate::reporter::Reporter;

pub(crate) fn grade_logs(args: &GradeArgs, with_ansi: bool) -> anyhow::Result<()> {
    // The testcase file is validated up front: a schema error is a fatal
    // configuration problem reported once, before any grades are written.
    let testcases_text = fs::read_to_string(&args.testcases)
        .with_context(|| format!("unable to read testcase file {}", args.testcases.display()))?;
    TestCaseList::from_json(&testcases_text)
        .context("unable to validate loaded testcases file")?;

    let student_dirs = discover_log_dirs(&args.logging_dir)?;
    anyhow::ensure!(
        !student_dirs.is_empty(),
        "no recorded test logs under {}",
        args.logging_dir.display()
    );

    let reporter = Reporter::create_with_ansi(with_ansi);
    for dir in student_dirs {
        let student = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let summary = grade_student(&dir)
            .with_context(|| format!("failed to grade logs in {}", dir.display()))?;
        reporter.print_student_summary(&student, &summary);
    }
    Ok(())
}

/// Either `<logging_dir>` itself (when it holds a `tests/` folder) or every
/// subdirectory that does.
fn discover_log_dirs(logging_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if logging_dir.join("tests").is_dir() {
        return Ok(vec![logging_dir.to_path_buf()]);
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(logging_dir)
        .with_context(|| format!("unable to read logging dir {}", logging_dir.display()))?
    {
        let path = entry?.path();
        if path.join("tests").is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}
