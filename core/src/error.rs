use std::io;

use thiserror::Error;
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, GraderErr>;

#[derive(Error, Debug)]
pub enum SandboxErr {
    /// The workspace, image, or container spawn failed before the candidate
    /// produced any output.
    #[error("sandbox startup failed: {0}")]
    Startup(String),

    /// Building the tester image failed.
    #[error("tester image build failed: {0}")]
    ImageBuild(String),

    /// The PTY layer failed.
    #[error("pty error: {0}")]
    Pty(String),
}

#[derive(Error, Debug)]
pub enum GraderErr {
    /// Sandbox error
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxErr),

    /// The operator pressed Ctrl-C; the run unwinds after stopping its
    /// sandbox.
    #[error("interrupted (Ctrl-C)")]
    Interrupted,

    /// The test-case file failed schema validation.
    #[error(transparent)]
    Schema(#[from] shellgrade_protocol::SchemaError),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TokioJoin(#[from] JoinError),
}
