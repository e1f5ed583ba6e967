use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::ValueEnum;

/// Autograder for student shell submissions.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    /// Specifies color settings for use in the output.
    #[arg(long = "color", value_enum, default_value_t = Color::Auto, global = true)]
    pub color: Color,

    #[command(subcommand)]
    pub command: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Run the test cases against student binaries and record event logs.
    #[clap(visible_alias = "r")]
    Run(RunArgs),

    /// Grade previously recorded event logs and write grade summaries.
    #[clap(visible_alias = "g")]
    Grade(GradeArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Folder with built binaries: either one student per subfolder, or a
    /// single folder containing the candidate binary directly.
    #[arg(long = "binaries-dir", short = 'b')]
    pub binaries_dir: PathBuf,

    /// Folder to save per-student logs in.
    #[arg(long = "logging-dir", short = 'l')]
    pub logging_dir: PathBuf,

    /// Path to the JSON file containing the test cases.
    #[arg(long = "testcases", short = 't')]
    pub testcases: PathBuf,

    /// Only run test cases whose section contains this string (e.g. "A"
    /// or "B.2").
    #[arg(long = "section", short = 's')]
    pub section: Option<String>,

    /// Only run the test case with this index.
    #[arg(long = "test-case")]
    pub test_case: Option<usize>,

    /// Rebuild the tester image even if it already exists.
    #[arg(long = "force-rebuild", default_value_t = false)]
    pub force_rebuild: bool,

    /// Number of students to test in parallel. Each student's tests always
    /// run sequentially.
    #[arg(long = "jobs", short = 'j', default_value_t = 16)]
    pub jobs: usize,
}

#[derive(Debug, Args)]
pub struct GradeArgs {
    /// Folder holding the recorded logs (a single student directory, or one
    /// subdirectory per student).
    #[arg(long = "logging-dir", short = 'l')]
    pub logging_dir: PathBuf,

    /// Path to the JSON file containing the test cases; validated before any
    /// grading happens.
    #[arg(long = "testcases", short = 't')]
    pub testcases: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum Color {
    Always,
    Never,
    #[default]
    Auto,
}
