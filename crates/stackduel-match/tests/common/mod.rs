//! Boots the full system in one process: persistence and session services
//! as tasks, match servers as real child processes via the launcher.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream};

use stackduel_core::net::envelope::Response;
use stackduel_core::net::frame::{self, FramedJson};
use stackduel_core::net::session_msg::SessionRequest;
use stackduel_session::launcher::{Launcher, LauncherConfig};
use stackduel_session::state::AppState;
use stackduel_store::client::StoreClient;
use stackduel_store::storage::MemStore;

pub struct System {
    pub session_addr: String,
    pub store_addr: String,
}

/// Each test gets its own `match_port_base` so parallel tests never race
/// for match ports.
pub async fn boot(match_port_base: u16) -> System {
    let store_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let store_addr = store_listener.local_addr().unwrap().to_string();
    let store = Arc::new(Mutex::new(MemStore::new()));
    tokio::spawn(stackduel_store::service::serve(store_listener, store));

    let session_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let session_addr = session_listener.local_addr().unwrap().to_string();

    let store_client = StoreClient::connect(&store_addr).await.unwrap();
    let launcher = Launcher::new(LauncherConfig {
        match_bin: PathBuf::from(env!("CARGO_BIN_EXE_stackduel-match")),
        listen_host: "127.0.0.1".into(),
        session_addr: session_addr.clone(),
        port_base: match_port_base,
        port_span: 16,
        max_match_duration: Duration::from_secs(1800),
    });
    let state = AppState::new(store_client, launcher, "127.0.0.1".into());
    tokio::spawn(stackduel_session::serve(session_listener, state));

    System {
        session_addr,
        store_addr,
    }
}

pub struct TestClient {
    framed: FramedJson,
}

impl TestClient {
    pub async fn connect(addr: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: frame::framed(stream),
        }
    }

    pub async fn send<T: serde::Serialize>(&mut self, msg: &T) {
        frame::send(&mut self.framed, msg).await.unwrap();
    }

    pub async fn recv<T: DeserializeOwned>(&mut self, secs: u64) -> T {
        frame::recv_deadline(&mut self.framed, Duration::from_secs(secs))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn request(&mut self, request: SessionRequest) -> Response {
        self.send(&request).await;
        self.recv(5).await
    }

    pub async fn register_and_login(&mut self, name: &str, email: &str, password: &str) -> u64 {
        let resp = self
            .request(SessionRequest::Register {
                name: name.into(),
                email: email.into(),
                password: password.into(),
            })
            .await;
        assert!(resp.is_success(), "register failed: {}", resp.message);
        let resp = self
            .request(SessionRequest::Login {
                email: email.into(),
                password: password.into(),
            })
            .await;
        assert!(resp.is_success(), "login failed: {}", resp.message);
        resp.data["user_id"].as_u64().unwrap()
    }
}
