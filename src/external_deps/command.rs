//! [`SpoofServer`] backed by a spoofing proxy binary run as a child process.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use super::spoof_server::{SpoofServer, SpoofServerError, SpoofServerResult};

/// How long a stopped server gets to finish in-flight requests after SIGTERM.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Launches `<program> [args..] --spoof <address>` and keeps it running until
/// it exits or [`SpoofServer::stop`] is called.
///
/// The binary must understand two flags:
///
/// - `--spoof <address>` serves the spoofing proxy until terminated, printing
///   its fatal error as the last stderr line before a non-zero exit.
/// - `--list-fingerprints` prints one fingerprint identifier per line on
///   stdout and exits zero. A build that only knows `--spoof` exits with
///   usage (status 2), which surfaces as a [`SpoofServerError::Reported`].
///
/// Stopping sends SIGTERM and waits up to the shutdown grace period for the
/// process to exit on its own before killing it.
///
/// A stop is sticky: once requested, later calls to `start` return
/// [`SpoofServerError::Stopped`] without launching anything, so a stop that
/// races ahead of startup is never lost.
pub struct CommandSpoofServer {
    program: PathBuf,
    args: Vec<String>,
    grace: Duration,
    shutdown: watch::Sender<bool>,
}

impl CommandSpoofServer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            program: program.into(),
            args: Vec::new(),
            grace: DEFAULT_SHUTDOWN_GRACE,
            shutdown,
        }
    }

    /// Arguments placed before the control flags.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null());
        command
    }
}

#[async_trait]
impl SpoofServer for CommandSpoofServer {
    async fn start(&self, address: &str) -> SpoofServerResult<()> {
        if address.trim().is_empty() {
            return Err(SpoofServerError::Reported("address must be provided".into()));
        }

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(SpoofServerError::Stopped);
        }

        let mut child = self
            .command()
            .arg("--spoof")
            .arg(address)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        log::debug!(
            "spawned {} (pid {:?}) for {address}",
            self.program.display(),
            child.id()
        );

        let stderr = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(last_line(pipe)));

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = stop_requested(&mut shutdown) => None,
        };

        let Some(status) = exited else {
            shutdown_child(&mut child, self.grace).await?;
            return Err(SpoofServerError::Stopped);
        };

        let status = status?;
        if status.success() {
            return Ok(());
        }

        let captured = match stderr {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        Err(SpoofServerError::Reported(exit_message(&captured, status)))
    }

    async fn stop(&self) -> SpoofServerResult<()> {
        self.shutdown.send_replace(true);
        Ok(())
    }

    async fn list_fingerprints(&self) -> SpoofServerResult<String> {
        let output = self
            .command()
            .arg("--list-fingerprints")
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpoofServerError::Reported(exit_message(&stderr, output.status)));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// SIGTERM first, SIGKILL once `grace` runs out.
async fn shutdown_child(child: &mut Child, grace: Duration) -> io::Result<()> {
    if child.id().is_none() {
        return Ok(());
    }

    if request_termination(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                log::debug!("spoofing server shut down: {}", status?);
                return Ok(());
            }
            Err(_) => log::warn!("spoofing server still running {grace:?} after SIGTERM; killing it"),
        }
    }

    child.kill().await
}

#[cfg(unix)]
fn request_termination(child: &Child) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            log::debug!("could not signal spoofing server (pid {pid}): {err}");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) -> bool {
    false
}

/// Drain `pipe` to EOF, keeping only the last non-empty line.
async fn last_line<R>(pipe: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    let mut last = String::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => last = line,
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(err) => {
                log::debug!("spoofing server stderr unreadable: {err}");
                break;
            }
        }
    }
    last
}

async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            // Sender dropped: nobody can ask us to stop any more.
            std::future::pending::<()>().await;
        }
    }
}

/// Last non-empty stderr line, which is where the server prints its fatal error.
fn exit_message(stderr: &str, status: ExitStatus) -> String {
    stderr
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("spoofing server exited with {status}"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn shell(script: &str) -> CommandSpoofServer {
        CommandSpoofServer::new("sh").with_args(["-c", script, "spoof"])
    }

    #[tokio::test]
    async fn rejects_empty_address() {
        let server = shell("exit 0");
        let err = server.start("").await.unwrap_err();
        assert_eq!(err.to_string(), "address must be provided");
    }

    #[tokio::test]
    async fn failed_exit_reports_last_stderr_line() {
        let server = shell("echo starting >&2; echo 'listen, err: address already in use' >&2; exit 1");
        let err = server.start("127.0.0.1:8887").await.unwrap_err();
        assert_eq!(err.to_string(), "listen, err: address already in use");
    }

    #[tokio::test]
    async fn clean_exit_is_ok() {
        let server = shell("exit 0");
        assert!(server.start("127.0.0.1:8887").await.is_ok());
    }

    #[tokio::test]
    async fn stop_terminates_running_child() {
        let server = Arc::new(shell("sleep 30"));
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.start("127.0.0.1:8887").await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        server.stop().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("start did not return after stop")
            .unwrap();
        assert!(matches!(result, Err(SpoofServerError::Stopped)));
    }

    #[tokio::test]
    async fn stop_lets_child_run_its_term_handler() {
        let marker = std::env::temp_dir().join(format!("spoof-term-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);
        let script = format!(
            "trap 'touch {}; exit 0' TERM; while true; do sleep 0.05; done",
            marker.display()
        );
        let server = Arc::new(shell(&script).with_shutdown_grace(Duration::from_secs(5)));
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.start("127.0.0.1:8887").await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        server.stop().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), running)
            .await
            .expect("start did not return after stop")
            .unwrap();
        assert!(matches!(result, Err(SpoofServerError::Stopped)));
        assert!(marker.exists(), "TERM handler did not run");
        let _ = std::fs::remove_file(&marker);
    }

    #[tokio::test]
    async fn child_ignoring_term_is_killed_after_grace() {
        let server = Arc::new(
            shell("trap '' TERM; while true; do sleep 0.05; done")
                .with_shutdown_grace(Duration::from_millis(200)),
        );
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.start("127.0.0.1:8887").await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        server.stop().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("start did not return after grace period")
            .unwrap();
        assert!(matches!(result, Err(SpoofServerError::Stopped)));
    }

    #[tokio::test]
    async fn stderr_capture_keeps_only_last_line() {
        let noise = "http: TLS handshake error from 127.0.0.1:50000: EOF\n".repeat(5000);
        let input = format!("{noise}listen, err: bad key\n\n");
        assert_eq!(last_line(input.as_bytes()).await, "listen, err: bad key");
    }

    #[tokio::test]
    async fn noisy_server_reports_final_error() {
        let server = shell(
            "i=0; while [ $i -lt 2000 ]; do echo \"handshake error $i\" >&2; i=$((i+1)); done; \
             echo 'NewCertificateAuthority, err: bad key' >&2; exit 1",
        );
        let err = server.start("127.0.0.1:8887").await.unwrap_err();
        assert_eq!(err.to_string(), "NewCertificateAuthority, err: bad key");
    }

    #[tokio::test]
    async fn stop_before_start_prevents_launch() {
        let server = shell("sleep 30");
        server.stop().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), server.start("127.0.0.1:8887"))
            .await
            .expect("start launched after stop");
        assert!(matches!(result, Err(SpoofServerError::Stopped)));
    }

    #[tokio::test]
    async fn lists_fingerprints_from_stdout() {
        let server = shell("printf 'default\\nchrome_120\\n'");
        let catalog = server.list_fingerprints().await.unwrap();
        assert_eq!(catalog, "default\nchrome_120\n");
    }
}
