//! Container lifecycle for one candidate shell under test.
//!
//! Each test owns a fresh Docker container running the candidate binary as a
//! dropped-privilege user, attached to a PTY so the candidate sees an
//! interactive terminal. Signals are delivered through the container runtime
//! by name, which addresses the exact process group inside the sandbox and
//! sidesteps PTY-level signal forwarding ambiguities.

use std::io::ErrorKind;
use std::io::Read;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::Result;
use crate::error::SandboxErr;
use crate::fixture;

pub const IMAGE_NAME: &str = "shell_tester:latest";

/// Hostname given to every container. The strict prompt check compares the
/// candidate's prompt against this value.
pub const SANDBOX_HOSTNAME: &str = "osntesting";

const DOCKERFILE_CONTENT: &str = include_str!("tester.dockerfile");
const ENTRYPOINT_CONTENT: &str = include_str!("tester_entrypoint.sh");

/// Ensure the tester image exists, building it from the embedded Dockerfile
/// and entrypoint when missing (or when `force_rebuild` is set).
pub async fn ensure_tester_image(force_rebuild: bool) -> Result<()> {
    if !force_rebuild {
        let inspect = Command::new("docker")
            .args(["image", "inspect", IMAGE_NAME])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if inspect.success() {
            debug!("tester image {IMAGE_NAME} already exists");
            return Ok(());
        }
    }

    info!("building tester image {IMAGE_NAME}...");
    let build_dir = TempDir::new()?;
    std::fs::write(build_dir.path().join("Dockerfile"), DOCKERFILE_CONTENT)?;
    std::fs::write(build_dir.path().join("entrypoint.sh"), ENTRYPOINT_CONTENT)?;

    let output = Command::new("docker")
        .args(["build", "-t", IMAGE_NAME, "."])
        .current_dir(build_dir.path())
        .output()
        .await?;
    if !output.status.success() {
        return Err(SandboxErr::ImageBuild(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        )
        .into());
    }
    info!("tester image {IMAGE_NAME} built successfully");
    Ok(())
}

/// What one wait on the sandbox's output produced.
pub enum ChunkOutcome {
    /// More PTY bytes arrived.
    Data(Vec<u8>),
    /// The candidate closed its side of the PTY.
    Eof,
    /// Nothing arrived before the deadline.
    TimedOut,
}

struct PtySession {
    chunk_rx: mpsc::Receiver<Vec<u8>>,
    writer_tx: mpsc::Sender<Vec<u8>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    raw: Arc<StdMutex<String>>,
}

/// A running sandbox: scratch workspace, container, and attached PTY.
///
/// `stop()` is idempotent and called on every exit path; dropping the handle
/// force-removes the container as a backstop so no test can outlive its
/// sandbox even when a worker unwinds.
pub struct Sandbox {
    container_name: String,
    workspace: TempDir,
    binary_name: String,
    session: Option<PtySession>,
    raw_logs: Vec<Arc<StdMutex<String>>>,
    stopped: bool,
}

impl Sandbox {
    /// Materialize a workspace around `binary`, optionally seed the fixture
    /// tree at `<workspace>/test`, and boot the first container.
    pub async fn start(binary: &Path, with_fixture: bool) -> Result<Self> {
        let workspace = TempDir::new()
            .map_err(|e| SandboxErr::Startup(format!("failed to create workspace: {e}")))?;
        let test_dir = workspace.path().join("test");
        std::fs::create_dir(&test_dir)
            .map_err(|e| SandboxErr::Startup(format!("failed to create test dir: {e}")))?;

        let binary_name = binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SandboxErr::Startup(format!("invalid binary path: {binary:?}")))?;
        std::fs::copy(binary, workspace.path().join(&binary_name))
            .map_err(|e| SandboxErr::Startup(format!("failed to copy {binary:?}: {e}")))?;

        if with_fixture {
            fixture::materialize(&test_dir)
                .map_err(|e| SandboxErr::Startup(format!("failed to write fixture: {e}")))?;
        }

        let mut sandbox = Self {
            container_name: String::new(),
            workspace,
            binary_name,
            session: None,
            raw_logs: Vec::new(),
            stopped: false,
        };
        sandbox.spawn_container()?;
        Ok(sandbox)
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Spawn `docker run` for the current workspace under a fresh PTY and
    /// wire up the reader/writer plumbing.
    fn spawn_container(&mut self) -> Result<()> {
        self.container_name = format!("tester_{}", uuid::Uuid::new_v4().simple());

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SandboxErr::Pty(format!("openpty failed: {e}")))?;

        // The candidate's own echo is silenced by the entrypoint's
        // `stty -echo`; clearing ECHO on our master keeps the outer PTY from
        // reflecting sent commands back into the captured stream.
        #[cfg(unix)]
        if let Some(fd) = pair.master.as_raw_fd() {
            disable_echo(fd);
        }

        let volume = format!("{}:/app", self.workspace.path().display());
        let entrypoint_arg = format!("/app/{}", self.binary_name);
        let mut cmd = CommandBuilder::new("docker");
        cmd.args([
            "run",
            "--name",
            self.container_name.as_str(),
            "-i",
            "-t",
            "--rm",
            "--init",
            "-h",
            SANDBOX_HOSTNAME,
            "-v",
            volume.as_str(),
            "-w",
            "/app",
            IMAGE_NAME,
            entrypoint_arg.as_str(),
        ]);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SandboxErr::Startup(format!("failed to spawn container: {e}")))?;
        let killer = child.clone_killer();

        let raw = Arc::new(StdMutex::new(String::new()));
        self.raw_logs.push(Arc::clone(&raw));

        // Reader thread: drain the PTY, mirror into the raw transcript, and
        // forward chunks to the driver.
        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(256);
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SandboxErr::Pty(format!("failed to clone reader: {e}")))?;
        let raw_for_reader = Arc::clone(&raw);
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut log) = raw_for_reader.lock() {
                            log.push_str(&String::from_utf8_lossy(&buf[..n]));
                        }
                        if chunk_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                    Err(_) => break,
                }
            }
        });

        // Writer task: apply stdin writes to the PTY writer on a blocking
        // thread.
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SandboxErr::Pty(format!("failed to take writer: {e}")))?;
        let writer = Arc::new(StdMutex::new(writer));
        tokio::spawn(async move {
            while let Some(bytes) = writer_rx.recv().await {
                let writer = Arc::clone(&writer);
                let _ = tokio::task::spawn_blocking(move || {
                    if let Ok(mut guard) = writer.lock() {
                        use std::io::Write;
                        let _ = guard.write_all(&bytes);
                        let _ = guard.flush();
                    }
                })
                .await;
            }
        });

        // Reap the docker client when it exits; EOF reaches the driver via
        // the reader channel closing.
        let container = self.container_name.clone();
        tokio::task::spawn_blocking(move || {
            let mut child = child;
            match child.wait() {
                Ok(status) => debug!("container client for {container} exited: {status:?}"),
                Err(e) => warn!("failed to wait on container client for {container}: {e}"),
            }
        });

        info!(
            "spawned container {} for binary {}",
            self.container_name, self.binary_name
        );

        self.session = Some(PtySession {
            chunk_rx,
            writer_tx,
            killer,
            raw,
        });
        Ok(())
    }

    /// Wait up to `timeout` for the next chunk of PTY output.
    pub async fn recv_chunk(&mut self, timeout: Duration) -> ChunkOutcome {
        let Some(session) = self.session.as_mut() else {
            return ChunkOutcome::Eof;
        };
        match tokio::time::timeout(timeout, session.chunk_rx.recv()).await {
            Ok(Some(bytes)) => ChunkOutcome::Data(bytes),
            Ok(None) => ChunkOutcome::Eof,
            Err(_) => ChunkOutcome::TimedOut,
        }
    }

    /// Write `line` plus a newline to the candidate's stdin.
    pub async fn send_line(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.send_bytes(bytes).await;
    }

    /// Write the control character for `code` (e.g. `d` becomes 0x04).
    pub async fn send_control(&self, code: char) {
        if !code.is_ascii_lowercase() {
            warn!("ignoring non-letter control code {code:?}");
            return;
        }
        let byte = (code as u8) & 0x1f;
        self.send_bytes(vec![byte]).await;
    }

    async fn send_bytes(&self, bytes: Vec<u8>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Ok(mut log) = session.raw.lock() {
            log.push_str(&String::from_utf8_lossy(&bytes));
        }
        if session.writer_tx.send(bytes).await.is_err() {
            warn!("pty writer for {} is gone", self.container_name);
        }
    }

    /// Deliver a named POSIX signal to the container's init process. Errors
    /// are returned so the driver can log them; a dead container is not
    /// fatal.
    pub async fn signal(&self, signal: &str) -> std::io::Result<()> {
        let output = Command::new("docker")
            .args(["kill", "--signal", signal, &self.container_name])
            .output()
            .await?;
        if output.status.success() {
            debug!("sent {signal} to container {}", self.container_name);
            Ok(())
        } else {
            Err(std::io::Error::other(format!(
                "docker kill --signal {signal} {}: {}",
                self.container_name,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Tear down the current container and boot a fresh one on the same
    /// workspace. Files the candidate wrote under `/app` survive; the
    /// fixture is not re-copied.
    pub async fn restart(&mut self) -> Result<()> {
        self.kill_container().await;
        self.close_session();
        self.spawn_container()
    }

    /// Force-remove the container. Idempotent; the workspace is deleted when
    /// the handle is dropped.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.kill_container().await;
        self.close_session();
    }

    /// The full PTY transcript across all sessions of this sandbox, with
    /// restart separators between them.
    pub fn raw_log(&self) -> String {
        let mut log = String::from("##### START RAW OUTPUT #####\n");
        for (idx, segment) in self.raw_logs.iter().enumerate() {
            if idx > 0 {
                log.push_str("##### RESTARTED SHELL #####\n");
            }
            if let Ok(segment) = segment.lock() {
                log.push_str(&segment);
            }
        }
        log
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.killer.kill() {
                debug!("killing pty child for {}: {e}", self.container_name);
            }
        }
    }

    async fn kill_container(&self) {
        let output = Command::new("docker")
            .args(["rm", "-f", &self.container_name])
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                debug!("force removed container {}", self.container_name);
            }
            Ok(output) => {
                debug!(
                    "docker rm -f {}: {}",
                    self.container_name,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Err(e) => warn!("failed to remove container {}: {e}", self.container_name),
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        // Synchronous backstop for unwinds that skipped stop().
        if let Some(mut session) = self.session.take() {
            let _ = session.killer.kill();
        }
        let _ = std::process::Command::new("docker")
            .args(["rm", "-f", &self.container_name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

#[cfg(unix)]
fn disable_echo(fd: std::os::unix::io::RawFd) {
    use nix::sys::termios;
    use std::os::unix::io::BorrowedFd;

    // Safety: the master fd stays open for the lifetime of the pty pair; we
    // only borrow it for the duration of the termios round-trip.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    match termios::tcgetattr(fd) {
        Ok(mut attrs) => {
            attrs.local_flags.remove(termios::LocalFlags::ECHO);
            if let Err(e) = termios::tcsetattr(fd, termios::SetArg::TCSANOW, &attrs) {
                warn!("failed to disable echo on pty master: {e}");
            }
        }
        Err(e) => warn!("failed to read termios on pty master: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn raw_log_inserts_restart_separators() {
        let first = Arc::new(StdMutex::new("session one\r\n".to_string()));
        let second = Arc::new(StdMutex::new("session two\r\n".to_string()));
        let sandbox = Sandbox {
            container_name: "tester_test".to_string(),
            workspace: TempDir::new().expect("tempdir"),
            binary_name: "shell.out".to_string(),
            session: None,
            raw_logs: vec![first, second],
            stopped: true,
        };
        assert_eq!(
            sandbox.raw_log(),
            "##### START RAW OUTPUT #####\nsession one\r\n##### RESTARTED SHELL #####\nsession two\r\n"
        );
    }

    #[test]
    fn embedded_image_assets_are_complete() {
        assert!(DOCKERFILE_CONTENT.contains("gosu"));
        assert!(DOCKERFILE_CONTENT.contains("entrypoint.sh"));
        assert!(ENTRYPOINT_CONTENT.contains("stty -echo"));
        assert!(ENTRYPOINT_CONTENT.contains("exec gosu"));
    }
}
