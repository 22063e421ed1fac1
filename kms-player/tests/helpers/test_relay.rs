//! In-process relay for channel and end-to-end tests

use kms_relay::{build_router, AppState, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

/// Start a relay on an ephemeral port; returns its `ws://` base URL
pub async fn spawn_relay() -> String {
    spawn_relay_with_registry().await.0
}

/// Start a relay and keep a handle on its registry
pub async fn spawn_relay_with_registry() -> (String, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new(64));
    let app = build_router(AppState::new(Arc::clone(&registry)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{}", addr), registry)
}

/// TCP forwarder in front of a relay whose link can be cut and restored
///
/// Cutting drops the listener and every forwarded connection, so devices
/// behind it see the relay vanish while the relay itself keeps its state.
pub struct RelayLink {
    addr: SocketAddr,
    upstream: SocketAddr,
    task: Option<JoinHandle<()>>,
}

impl RelayLink {
    /// Forward to the relay at `relay_url` (`ws://host:port`)
    pub async fn start(relay_url: &str) -> Self {
        let upstream: SocketAddr = relay_url.trim_start_matches("ws://").parse().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self {
            addr,
            upstream,
            task: Some(tokio::spawn(forward(listener, upstream))),
        }
    }

    /// `ws://` base URL of the forwarder
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn cut(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    /// Listen again on the same port
    pub async fn restore(&mut self) {
        let listener = TcpListener::bind(self.addr).await.unwrap();
        self.task = Some(tokio::spawn(forward(listener, self.upstream)));
    }
}

async fn forward(listener: TcpListener, upstream: SocketAddr) {
    // Dropping the set aborts every forwarded connection
    let mut links = JoinSet::new();
    while let Ok((mut client, _)) = listener.accept().await {
        links.spawn(async move {
            if let Ok(mut server) = TcpStream::connect(upstream).await {
                let _ = tokio::io::copy_bidirectional(&mut client, &mut server).await;
            }
        });
    }
}
