//! Data model shared between the test driver and the grading evaluator.
//!
//! Everything in this crate is plain serde data: the declarative test-case
//! schema, the typed event stream a driver records, and the grade artifacts
//! the evaluator produces. No I/O happens here.

mod event;
mod report;
mod testcase;

pub use event::Event;
pub use event::EventType;
pub use event::RunResult;
pub use report::FailureReason;
pub use report::GradeReport;
pub use report::GradeSummary;
pub use testcase::Command;
pub use testcase::ControlSignal;
pub use testcase::GenericCmd;
pub use testcase::Line;
pub use testcase::SchemaError;
pub use testcase::Section;
pub use testcase::StartShell;
pub use testcase::TestCase;
pub use testcase::TestCaseList;
