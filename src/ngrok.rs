use std::ffi::OsString;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::classify::classify;
use crate::errors::Error;
use crate::poller::ConnectionPoller;
use crate::process::{locate_binary, ExitWatch, GracePeriod, ProcessOutput, TunnelProcess};
use crate::tunnel::{Endpoint, Tunneler};

use async_trait::async_trait;
use tokio::sync::{oneshot, Notify};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:4040/api/tunnels";

#[derive(Debug, Clone)]
pub struct NgrokOptions {
    /// Name of the ngrok executable, or a path to it.
    pub binary: String,
    /// Directories to search for `binary`, in `PATH` format. `None` uses `$PATH`.
    pub search_path: Option<OsString>,
    /// The local ngrok API listing the established tunnels.
    pub api_url: String,
    pub startup_timeout: Duration,
    /// Delay before the first query of the ngrok API.
    pub initial_poll_delay: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub grace: GracePeriod,
}

impl Default for NgrokOptions {
    fn default() -> Self {
        Self {
            binary: "ngrok".to_string(),
            search_path: None,
            api_url: DEFAULT_API_URL.to_string(),
            startup_timeout: Duration::from_secs(20),
            initial_poll_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
            grace: GracePeriod::default(),
        }
    }
}

impl NgrokOptions {
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_polling(mut self, initial_delay: Duration, interval: Duration) -> Self {
        self.initial_poll_delay = initial_delay;
        self.poll_interval = interval;
        self
    }

    pub fn with_grace(mut self, grace: GracePeriod) -> Self {
        self.grace = grace;
        self
    }
}

enum State {
    Idle,
    Opening,
    Open(TunnelProcess),
    Closing,
}

/// An `ngrok http <port>` tunnel. One instance holds at most one open tunnel.
pub struct NgrokTunnel {
    options: NgrokOptions,
    state: Mutex<State>,
    // Serializes `close` so only one caller runs the shutdown sequence.
    closing: tokio::sync::Mutex<()>,
    // Woken whenever an `open` leaves the Opening state.
    settled: Notify,
}

impl NgrokTunnel {
    pub fn new(options: NgrokOptions) -> Self {
        Self {
            options,
            state: Mutex::new(State::Idle),
            closing: tokio::sync::Mutex::new(()),
            settled: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_open(&self) -> Result<Opening<'_>, Error> {
        let mut state = self.state();
        if !matches!(*state, State::Idle) {
            return Err(Error::AlreadyOpen);
        }
        *state = State::Opening;
        Ok(Opening {
            tunnel: self,
            settled: false,
        })
    }

    // Start ngrok and race the connection poller, the process watcher and the startup timeout.
    async fn establish(&self, port: u16) -> Result<(TunnelProcess, Vec<Endpoint>), Error> {
        let options = &self.options;

        tracing::debug!(binary = %options.binary, "searching for ngrok in path");
        let binary = locate_binary(&options.binary, options.search_path.as_deref()).ok_or_else(
            || Error::BinaryNotFound {
                binary: options.binary.clone(),
            },
        )?;
        tracing::debug!(path = %binary.display(), "found ngrok");

        let poller = ConnectionPoller::new(
            &options.api_url,
            port,
            options.initial_poll_delay,
            options.poll_interval,
            options.request_timeout,
        )?;

        tracing::info!(port, "starting ngrok http tunnel");
        let (process, output) = TunnelProcess::start(&binary, port)?;

        let (exit_tx, mut exit_rx) = oneshot::channel();
        tokio::spawn(watch_process(output, process.exit_watch(), exit_tx));

        let (connection_tx, mut connection_rx) = oneshot::channel();
        tokio::spawn(poller.watch(connection_tx));

        let outcome = tokio::select! {
            biased;
            Ok(info) = &mut connection_rx => info,
            Ok(err) = &mut exit_rx => Err(err),
            _ = tokio::time::sleep(options.startup_timeout) => {
                Err(Error::StartupTimeout(options.startup_timeout))
            }
        };

        match outcome {
            Ok(endpoints) => {
                for endpoint in &endpoints {
                    tracing::info!(url = %endpoint.url, secure = endpoint.secure, "ngrok tunnel established");
                }
                Ok((process, endpoints))
            }
            Err(err) => {
                // The process may still be running. Shut it down in the background so that it
                // is reaped even though nobody will ever call `close` for it.
                let grace = options.grace.clone();
                tokio::spawn(async move {
                    if let Err(err) = process.shutdown(&grace).await {
                        tracing::warn!(error = %err, "failed to shut down ngrok after failed startup");
                    }
                });
                Err(err)
            }
        }
    }
}

// Resets the manager to idle if `open` is dropped before it settles.
struct Opening<'a> {
    tunnel: &'a NgrokTunnel,
    settled: bool,
}

impl Opening<'_> {
    fn settle(mut self, state: State) {
        *self.tunnel.state() = state;
        self.settled = true;
        self.tunnel.settled.notify_waiters();
    }
}

impl Drop for Opening<'_> {
    fn drop(&mut self) {
        if !self.settled {
            *self.tunnel.state() = State::Idle;
            self.tunnel.settled.notify_waiters();
        }
    }
}

#[async_trait]
impl Tunneler for NgrokTunnel {
    async fn open(&self, port: u16) -> Result<Vec<Endpoint>, Error> {
        let opening = self.begin_open()?;

        match self.establish(port).await {
            Ok((process, endpoints)) => {
                opening.settle(State::Open(process));
                Ok(endpoints)
            }
            Err(err) => {
                tracing::warn!(error = %err, port, "ngrok tunnel failed to start");
                opening.settle(State::Idle);
                Err(err)
            }
        }
    }

    async fn close(&self) -> Result<(), Error> {
        let _closing = self.closing.lock().await;

        let process = loop {
            // Registered before the state is read so a settle in between is not missed.
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            {
                let mut state = self.state();
                match std::mem::replace(&mut *state, State::Closing) {
                    State::Open(process) => break process,
                    State::Opening => *state = State::Opening,
                    other => {
                        *state = other;
                        return Ok(());
                    }
                }
            }

            tracing::debug!("ngrok tunnel is starting, waiting for it before closing");
            settled.await;
        };

        tracing::info!("closing ngrok tunnel");
        let result = process.shutdown(&self.options.grace).await;
        *self.state() = State::Idle;
        result
    }
}

// Resolves with an error once the process prints anything or exits. A healthy ngrok does
// neither, so on success this only finishes after the tunnel is closed, and nobody listens.
async fn watch_process(
    mut output: ProcessOutput,
    mut exit: ExitWatch,
    failure: oneshot::Sender<Error>,
) {
    let err = tokio::select! {
        biased;
        Some(first) = output.next_chunk() => classify(&output.settle(first).await),
        status = exit.wait() => {
            let remaining = output.settle(Vec::new()).await;
            if remaining.is_empty() {
                Error::ProcessExit(status)
            } else {
                classify(&remaining)
            }
        }
    };

    if failure.send(err).is_err() {
        tracing::debug!("tunnel startup already settled, discarding process failure");
    }
}
