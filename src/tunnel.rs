use crate::errors::Error;

use async_trait::async_trait;

/// A publicly reachable URL that tunnels to a local port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub secure: bool,
}

#[async_trait]
pub trait Tunneler: Send + Sync {
    // Open the tunnel towards `port` and return the public endpoints once they are reachable.
    // At most one tunnel may be open per instance; a second call fails with `Error::AlreadyOpen`.
    async fn open(&self, port: u16) -> Result<Vec<Endpoint>, Error>;
    // Tear the tunnel down. Calling this on a tunnel that is not open is a no-op.
    async fn close(&self) -> Result<(), Error>;
}

/// Pick the first secure endpoint, if any.
pub fn secure_endpoint(endpoints: &[Endpoint]) -> Option<&Endpoint> {
    endpoints.iter().find(|ep| ep.secure)
}
