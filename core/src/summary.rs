//! Per-student aggregation of grade reports.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use shellgrade_protocol::GradeReport;
use shellgrade_protocol::GradeSummary;
use shellgrade_protocol::RunResult;
use tracing::error;
use tracing::info;

use crate::error::Result;
use crate::grader;

/// Grade every recorded run under `<log_dir>/tests`, write one grade JSON
/// per test under `<log_dir>/grade` (recreated from scratch) plus
/// `<log_dir>/summary.json`, and return the summary.
///
/// Result files that fail to parse are logged and skipped; one corrupt log
/// must not sink the rest of the student's grade.
pub fn grade_student(log_dir: &Path) -> Result<GradeSummary> {
    let tests_dir = log_dir.join("tests");
    let grade_dir = log_dir.join("grade");

    if grade_dir.exists() {
        fs::remove_dir_all(&grade_dir)?;
    }
    fs::create_dir_all(&grade_dir)?;

    let mut results: Vec<GradeReport> = Vec::new();
    for log_file in sorted_test_logs(&tests_dir)? {
        let stem = log_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let result: std::result::Result<RunResult, crate::error::GraderErr> =
            fs::read_to_string(&log_file)
                .map_err(Into::into)
                .and_then(|text| serde_json::from_str(&text).map_err(Into::into));
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                error!("failed to parse {}: {e}", log_file.display());
                continue;
            }
        };

        let report = grader::grade(&stem, &result);
        fs::write(
            grade_dir.join(format!("{stem}_grade.json")),
            serde_json::to_string_pretty(&report)?,
        )?;
        results.push(report);
    }

    let summary = GradeSummary::from_results(results);
    fs::write(
        log_dir.join("summary.json"),
        serde_json::to_string_pretty(&summary)?,
    )?;
    info!(
        "grading complete. Passed: {}/{}. Logs in {}",
        summary.passed_tests,
        summary.total_tests,
        grade_dir.display()
    );
    Ok(summary)
}

/// `tests/*.log`, ordered by the numeric suffix of the stem so `test_10`
/// sorts after `test_9`.
fn sorted_test_logs(tests_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut logs: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(tests_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "log") {
            logs.push(path);
        }
    }
    logs.sort_by_key(|path| test_number(path));
    Ok(logs)
}

fn test_number(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.split('_').nth(1))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_number_orders_by_numeric_suffix() {
        let mut paths = vec![
            PathBuf::from("tests/test_10.log"),
            PathBuf::from("tests/test_2.log"),
            PathBuf::from("tests/test_0.log"),
        ];
        paths.sort_by_key(|p| test_number(p));
        assert_eq!(
            paths,
            vec![
                PathBuf::from("tests/test_0.log"),
                PathBuf::from("tests/test_2.log"),
                PathBuf::from("tests/test_10.log"),
            ]
        );
    }

    #[test]
    fn stems_without_numbers_sort_first() {
        assert_eq!(test_number(Path::new("tests/bogus.log")), 0);
        assert_eq!(test_number(Path::new("tests/test_7.log")), 7);
    }
}
