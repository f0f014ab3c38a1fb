use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::errors::Error;
use crate::fileserver::{FileServer, CALLBACK_PATH};
use crate::sendable::SendableFile;
use crate::tunnel::{secure_endpoint, Endpoint, Tunneler};
use crate::twilio::Messenger;

use futures::future::TryFutureExt;
use url::Url;

/// Sends photos to phones: serves the file locally, exposes it through a tunnel and asks the
/// messaging provider to fetch it as MMS media.
pub struct Sender {
    tunnel: Box<dyn Tunneler>,
    messenger: Box<dyn Messenger>,
    port: u16,
    serve_window: Duration,
}

impl Sender {
    /// `port` is used for the local file server and must not be in use by another process.
    pub fn new(tunnel: Box<dyn Tunneler>, messenger: Box<dyn Messenger>, port: u16) -> Self {
        Self {
            tunnel,
            messenger,
            port,
            serve_window: Duration::from_secs(60),
        }
    }

    /// How long to keep the file available for the provider to fetch it.
    pub fn with_serve_window(mut self, serve_window: Duration) -> Self {
        self.serve_window = serve_window;
        self
    }

    pub async fn send_file(&self, destination: &str, file_path: impl AsRef<Path>) -> Result<(), Error> {
        let file = SendableFile::new(file_path)?;
        let mut server =
            FileServer::start(file.clone(), SocketAddr::from(([127, 0, 0, 1], self.port))).await?;

        let delivery = self
            .tunnel
            .open(self.port)
            .and_then(|endpoints| self.deliver(endpoints, &file, &mut server, destination))
            .await;

        // The tunnel and the server are torn down whatever happened above.
        let closed = self.tunnel.close().await;
        let stopped = server.stop().await;

        delivery?;
        closed?;
        stopped
    }

    async fn deliver(
        &self,
        endpoints: Vec<Endpoint>,
        file: &SendableFile,
        server: &mut FileServer,
        destination: &str,
    ) -> Result<(), Error> {
        let base = secure_endpoint(&endpoints).ok_or(Error::NoSecureEndpoint)?;
        let media_url = file.public_url(&base.url)?;
        let callback_url = Url::parse(&base.url)?.join(CALLBACK_PATH)?;

        tracing::info!(%media_url, destination, "sending file");
        self.messenger
            .send_mms(destination, &media_url, &callback_url)
            .await?;

        if server.wait_for_download(self.serve_window).await {
            tracing::info!(file = %file.name(), "file fetched by messaging provider");
        } else {
            tracing::warn!(
                file = %file.name(),
                window = ?self.serve_window,
                "file was not fetched before the serve window closed"
            );
        }
        Ok(())
    }
}
