use std::env;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::errors::Error;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};

// Once the process starts printing, keep collecting until it has been quiet this long.
const OUTPUT_SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GracePeriod {
    pub poll_interval: Duration,
    pub retries: u32,
}

impl Default for GracePeriod {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            retries: 20,
        }
    }
}

// A `binary` containing a path separator is taken relative to the working directory,
// anything else is searched for in `search_path` (or `$PATH` when `None`).
pub fn locate_binary(binary: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let search_path = search_path
        .map(OsStr::to_os_string)
        .or_else(|| env::var_os("PATH"));
    let cwd = env::current_dir().unwrap_or_default();
    which::which_in(binary, search_path, cwd).ok()
}

type KillRequest = oneshot::Sender<io::Result<()>>;

// The `Child` itself is owned by the `reap` task; this handle only talks to it.
pub struct TunnelProcess {
    pid: Option<u32>,
    exited: watch::Receiver<Option<String>>,
    kill_tx: mpsc::Sender<KillRequest>,
}

/// stdout and stderr, merged.
pub struct ProcessOutput {
    chunks: mpsc::Receiver<Vec<u8>>,
}

#[derive(Clone)]
pub struct ExitWatch(watch::Receiver<Option<String>>);

impl TunnelProcess {
    pub fn start(binary: &Path, port: u16) -> Result<(Self, ProcessOutput), Error> {
        tracing::debug!(binary = %binary.display(), port, "spawning tunnel process");
        let mut child = Command::new(binary)
            .arg("http")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Last resort if the runtime goes away before the reaper saw the exit.
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                binary: binary.display().to_string(),
                source,
            })?;

        let (chunk_tx, chunks) = mpsc::channel(16);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, chunk_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, chunk_tx));
        }

        let pid = child.id();
        let (exited_tx, exited) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::channel(1);
        tokio::spawn(reap(child, kill_rx, exited_tx));

        Ok((
            Self {
                pid,
                exited,
                kill_tx,
            },
            ProcessOutput { chunks },
        ))
    }

    pub fn has_exited(&self) -> bool {
        self.exited.borrow().is_some()
    }

    pub fn exit_watch(&self) -> ExitWatch {
        ExitWatch(self.exited.clone())
    }

    #[cfg(unix)]
    pub async fn send_graceful_terminate(&self) -> Result<(), Error> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        if self.has_exited() {
            return Ok(());
        }
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            // ESRCH: already gone
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno).into()),
        }
    }

    // There is no graceful signal to send elsewhere.
    #[cfg(not(unix))]
    pub async fn send_graceful_terminate(&self) -> Result<(), Error> {
        self.force_kill().await
    }

    pub async fn force_kill(&self) -> Result<(), Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.kill_tx.send(reply_tx).await.is_err() {
            // The reaper only stops once the process has been waited on.
            return Ok(());
        }
        match reply_rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Ok(()),
        }
    }

    /// Ask the process to stop, then kill it if it is still alive after the grace period.
    pub async fn shutdown(&self, grace: &GracePeriod) -> Result<(), Error> {
        if self.has_exited() {
            return Ok(());
        }

        tracing::debug!(pid = ?self.pid, "sending SIGTERM to tunnel process");
        if let Err(err) = self.send_graceful_terminate().await {
            tracing::warn!(error = %err, "failed to signal tunnel process, killing it");
            return self.force_kill().await;
        }

        for attempt in 1..=grace.retries {
            tracing::debug!(attempt, "waiting for tunnel process to shut down");
            tokio::time::sleep(grace.poll_interval).await;
            if self.has_exited() {
                tracing::info!("tunnel process shut down");
                return Ok(());
            }
        }

        tracing::warn!(pid = ?self.pid, "tunnel process ignored SIGTERM, killing it");
        self.force_kill().await
    }
}

impl ProcessOutput {
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.chunks.recv().await
    }

    /// Append to `output` until the streams close or go quiet.
    pub async fn settle(&mut self, mut output: Vec<u8>) -> Vec<u8> {
        while let Ok(Some(chunk)) = tokio::time::timeout(OUTPUT_SETTLE, self.chunks.recv()).await {
            output.extend_from_slice(&chunk);
        }
        output
    }
}

impl ExitWatch {
    pub async fn wait(&mut self) -> String {
        match self.0.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone().unwrap_or_default(),
            Err(_) => "exit status unknown".to_string(),
        }
    }
}

// Reads until EOF even after the receiver is gone. Closing the pipe would kill the child with
// SIGPIPE the next time it writes.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, chunks: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; 4096];
    let mut forwarding = true;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) if forwarding => {
                forwarding = chunks.send(buf[..n].to_vec()).await.is_ok();
            }
            Ok(_) => {}
        }
    }
}

async fn reap(
    mut child: Child,
    mut kill_rx: mpsc::Receiver<KillRequest>,
    exited: watch::Sender<Option<String>>,
) {
    let mut orphaned = false;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            request = kill_rx.recv(), if !orphaned => match request {
                Some(reply) => {
                    let _ = reply.send(child.start_kill());
                }
                None => {
                    // The TunnelProcess was dropped, so nobody is left to stop the child.
                    orphaned = true;
                    tracing::warn!("tunnel process dropped while still running, killing it");
                    if let Err(err) = child.start_kill() {
                        tracing::warn!(error = %err, "failed to kill tunnel process");
                    }
                }
            },
        }
    };

    let description = match status {
        Ok(status) => status.to_string(),
        Err(err) => format!("failed to wait on process: {err}"),
    };
    tracing::debug!(exit = %description, "tunnel process exited");
    exited.send_replace(Some(description));
}
