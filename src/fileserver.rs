//! A minimal HTTP server that serves exactly one file, plus the endpoint the messaging provider
//! reports delivery status to. Each server owns its routes; nothing is registered globally.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::Error;
use crate::sendable::SendableFile;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

pub const FILE_PREFIX: &str = "file";
pub const CALLBACK_PATH: &str = "callback";

struct Served {
    file: SendableFile,
    downloads: watch::Sender<usize>,
}

pub struct FileServer {
    addr: SocketAddr,
    downloads: watch::Receiver<usize>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl FileServer {
    pub async fn start(file: SendableFile, addr: SocketAddr) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        let (downloads_tx, downloads) = watch::channel(0);
        let app = router(Arc::new(Served {
            file,
            downloads: downloads_tx,
        }));

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::debug!(%addr, "file server listening");
        Ok(Self {
            addr,
            downloads,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn downloads(&self) -> usize {
        *self.downloads.borrow()
    }

    /// Wait up to `window` for the file to be fetched at least once.
    pub async fn wait_for_download(&mut self, window: Duration) -> bool {
        matches!(
            tokio::time::timeout(window, self.downloads.wait_for(|count| *count > 0)).await,
            Ok(Ok(_))
        )
    }

    pub async fn stop(self) -> Result<(), Error> {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(result) => Ok(result?),
            Err(err) => Err(std::io::Error::other(err).into()),
        }
    }
}

fn router(served: Arc<Served>) -> Router {
    Router::new()
        .route(&format!("/{FILE_PREFIX}/{{name}}"), get(serve_file))
        .route(&format!("/{CALLBACK_PATH}"), post(status_callback))
        .with_state(served)
}

async fn serve_file(State(served): State<Arc<Served>>, Path(name): Path<String>) -> Response {
    if name != served.file.name() {
        tracing::debug!(requested = %name, served = %served.file.name(), "refusing to serve unknown file");
        return StatusCode::NOT_FOUND.into_response();
    }

    match tokio::fs::read(served.file.path()).await {
        Ok(contents) => {
            served.downloads.send_modify(|count| *count += 1);
            tracing::info!(file = %served.file.name(), "serving file");
            ([(header::CONTENT_TYPE, served.file.content_type())], contents).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, path = %served.file.path().display(), "failed to read file");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn status_callback(Form(params): Form<HashMap<String, String>>) -> StatusCode {
    tracing::info!(
        sid = params.get("MessageSid").map(String::as_str).unwrap_or_default(),
        status = params.get("MessageStatus").map(String::as_str).unwrap_or_default(),
        "message status update"
    );
    StatusCode::NO_CONTENT
}
