use std::time::Duration;

use crate::errors::Error;
use crate::tunnel::Endpoint;

use serde::Deserialize;
use tokio::sync::oneshot;
use url::Url;

pub type ConnectionInfo = Result<Vec<Endpoint>, Error>;

#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<TunnelRecord>,
}

#[derive(Debug, Deserialize)]
struct TunnelRecord {
    public_url: String,
    proto: String,
}

pub struct ConnectionPoller {
    client: reqwest::Client,
    api_url: Url,
    port: u16,
    initial_delay: Duration,
    interval: Duration,
}

impl ConnectionPoller {
    pub fn new(
        api_url: &str,
        port: u16,
        initial_delay: Duration,
        interval: Duration,
        request_timeout: Duration,
    ) -> Result<Self, Error> {
        let api_url = Url::parse(api_url)
            .map_err(|err| Error::Config(format!("invalid ngrok API url `{api_url}`: {err}")))?;
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            api_url,
            port,
            initial_delay,
            interval,
        })
    }

    // Stops without delivering anything once the receiver is dropped.
    pub async fn watch(self, mut result: oneshot::Sender<ConnectionInfo>) {
        // Let the tunnel process initialize before the first query.
        tokio::select! {
            _ = result.closed() => return,
            _ = tokio::time::sleep(self.initial_delay) => {}
        }

        loop {
            if let Some(info) = self.poll_once().await {
                if result.send(info).is_err() {
                    tracing::debug!(port = self.port, "tunnel startup already settled, discarding connection info");
                }
                return;
            }

            tokio::select! {
                _ = result.closed() => {
                    tracing::debug!(port = self.port, "tunnel startup settled, no longer polling");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    // None means "not yet, try again".
    async fn poll_once(&self) -> Option<ConnectionInfo> {
        tracing::debug!(url = %self.api_url, "querying ngrok API for tunnels");

        let list = match self.fetch().await {
            Ok(list) => list,
            Err(err) => {
                tracing::debug!(error = %err, url = %self.api_url, "ngrok API not ready, trying again");
                return None;
            }
        };

        tracing::debug!(count = list.tunnels.len(), port = self.port, "ngrok API reported tunnels");
        endpoints_from(list.tunnels)
    }

    async fn fetch(&self) -> Result<TunnelList, reqwest::Error> {
        self.client
            .get(self.api_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

// ngrok opens an http and an https tunnel for every `ngrok http` session, so a single session
// shows up as exactly one secure and one insecure tunnel.
fn endpoints_from(tunnels: Vec<TunnelRecord>) -> Option<ConnectionInfo> {
    match tunnels.len() {
        0 => None,
        2 => {
            let endpoints: Vec<Endpoint> = tunnels
                .into_iter()
                .map(|tunnel| Endpoint {
                    secure: tunnel.proto == "https",
                    url: tunnel.public_url,
                })
                .collect();

            let secure = endpoints.iter().filter(|ep| ep.secure).count();
            if secure != 1 {
                return Some(Err(Error::MultipleTunnels(endpoints.len())));
            }
            Some(Ok(endpoints))
        }
        count => Some(Err(Error::MultipleTunnels(count))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{control_api, tunnels_json};

    fn record(url: &str, proto: &str) -> TunnelRecord {
        TunnelRecord {
            public_url: url.to_string(),
            proto: proto.to_string(),
        }
    }

    fn poller(api_url: &str) -> ConnectionPoller {
        ConnectionPoller::new(
            api_url,
            7070,
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_api_url() {
        let result = ConnectionPoller::new(
            "not a url",
            7070,
            Duration::ZERO,
            Duration::ZERO,
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_no_tunnels_is_not_terminal() {
        assert!(endpoints_from(vec![]).is_none());
    }

    #[test]
    fn test_secure_and_insecure_pair() {
        let info = endpoints_from(vec![
            record("https://abc.ngrok.io", "https"),
            record("http://abc.ngrok.io", "http"),
        ])
        .unwrap()
        .unwrap();

        assert_eq!(
            info,
            vec![
                Endpoint {
                    url: "https://abc.ngrok.io".to_string(),
                    secure: true
                },
                Endpoint {
                    url: "http://abc.ngrok.io".to_string(),
                    secure: false
                },
            ]
        );
    }

    #[test]
    fn test_single_tunnel_is_terminal_failure() {
        let info = endpoints_from(vec![record("https://abc.ngrok.io", "https")]).unwrap();
        assert!(matches!(info, Err(Error::MultipleTunnels(1))));
    }

    #[test]
    fn test_two_secure_tunnels_is_terminal_failure() {
        let info = endpoints_from(vec![
            record("https://abc.ngrok.io", "https"),
            record("https://def.ngrok.io", "https"),
        ])
        .unwrap();
        assert!(matches!(info, Err(Error::MultipleTunnels(2))));
    }

    #[test]
    fn test_three_tunnels_is_terminal_failure() {
        let info = endpoints_from(vec![
            record("https://abc.ngrok.io", "https"),
            record("http://abc.ngrok.io", "http"),
            record("tcp://0.tcp.ngrok.io:12345", "tcp"),
        ])
        .unwrap();
        assert!(matches!(info, Err(Error::MultipleTunnels(3))));
    }

    #[tokio::test]
    async fn test_watch_retries_through_bad_responses() {
        let api = control_api(|poll| match poll {
            0 => "not json".to_string(),
            1 => tunnels_json(&[]),
            _ => tunnels_json(&[("https://abc.ngrok.io", "https"), ("http://abc.ngrok.io", "http")]),
        })
        .await;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(poller(api.url.as_str()).watch(tx));

        let endpoints = rx.await.unwrap().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(api.polls(), 3);
    }

    #[tokio::test]
    async fn test_watch_retries_when_api_unreachable() {
        // Nothing listens on this port once the listener is dropped.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api/tunnels", listener.local_addr().unwrap());
        drop(listener);

        let (tx, rx) = oneshot::channel();
        tokio::spawn(poller(&url).watch(tx));

        let outcome = tokio::time::timeout(Duration::from_millis(300), rx).await;
        assert!(outcome.is_err(), "poller should still be retrying");
    }

    #[tokio::test]
    async fn test_watch_stops_once_abandoned() {
        let api = control_api(|_| tunnels_json(&[])).await;

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(poller(api.url.as_str()).watch(tx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(rx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
    }
}
