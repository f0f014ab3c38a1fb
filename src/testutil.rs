//! Fakes shared by the unit tests: a scripted ngrok binary and an in-process control API.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use url::Url;

/// Write an executable shell script called `name` into `dir`.
#[cfg(unix)]
pub fn fake_binary(dir: &Path, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A local port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn tunnels_json(tunnels: &[(&str, &str)]) -> String {
    let tunnels: Vec<_> = tunnels
        .iter()
        .map(|(url, proto)| serde_json::json!({ "public_url": url, "proto": proto }))
        .collect();
    serde_json::json!({ "tunnels": tunnels }).to_string()
}

type Respond = Box<dyn Fn(usize) -> String + Send + Sync>;

struct ApiState {
    polls: AtomicUsize,
    respond: Respond,
}

pub struct ControlApi {
    pub url: Url,
    state: Arc<ApiState>,
}

impl ControlApi {
    pub fn polls(&self) -> usize {
        self.state.polls.load(Ordering::SeqCst)
    }
}

/// Serve `GET /api/tunnels` on a random local port. `respond` gets the zero-based poll number
/// and returns the response body.
pub async fn control_api<F>(respond: F) -> ControlApi
where
    F: Fn(usize) -> String + Send + Sync + 'static,
{
    let state = Arc::new(ApiState {
        polls: AtomicUsize::new(0),
        respond: Box::new(respond),
    });
    let app = Router::new()
        .route("/api/tunnels", get(list_tunnels))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    ControlApi {
        url: Url::parse(&format!("http://{addr}/api/tunnels")).unwrap(),
        state,
    }
}

async fn list_tunnels(State(state): State<Arc<ApiState>>) -> String {
    let poll = state.polls.fetch_add(1, Ordering::SeqCst);
    (state.respond)(poll)
}
