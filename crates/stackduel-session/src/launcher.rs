//! Spawns and tracks per-match server processes.
//!
//! The launcher owns the match port pool: it hands the lowest free port to
//! each launch, watches the child, kills it past the hard duration cap,
//! and reclaims the port when the process exits.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::mpsc;
use uuid::Uuid;

use stackduel_core::types::{Role, RoomId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("match port pool exhausted")]
    PortsExhausted,
    #[error("failed to spawn match server: {0}")]
    Spawn(std::io::Error),
    #[error("match server did not start listening")]
    NotReady,
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Path to the `stackduel-match` binary.
    pub match_bin: PathBuf,
    /// Address match servers bind on.
    pub listen_host: String,
    /// Address the match server reports completion to.
    pub session_addr: String,
    pub port_base: u16,
    pub port_span: u16,
    /// Hard cap: children overrunning this are killed.
    pub max_match_duration: Duration,
}

/// A successfully launched match server.
#[derive(Debug, Clone)]
pub struct LaunchedMatch {
    pub match_id: String,
    pub port: u16,
    pub seed: u64,
}

pub struct Launcher {
    config: LauncherConfig,
    in_use: BTreeSet<u16>,
    freed_tx: mpsc::UnboundedSender<u16>,
    freed_rx: mpsc::UnboundedReceiver<u16>,
}

impl Launcher {
    pub fn new(config: LauncherConfig) -> Self {
        let (freed_tx, freed_rx) = mpsc::unbounded_channel();
        Self {
            config,
            in_use: BTreeSet::new(),
            freed_tx,
            freed_rx,
        }
    }

    fn alloc_port(&mut self) -> Result<u16, LaunchError> {
        while let Ok(port) = self.freed_rx.try_recv() {
            self.in_use.remove(&port);
        }
        let base = self.config.port_base;
        let span = self.config.port_span;
        let port = (base..base.saturating_add(span))
            .find(|p| !self.in_use.contains(p))
            .ok_or(LaunchError::PortsExhausted)?;
        self.in_use.insert(port);
        Ok(port)
    }

    /// Spawn a match server for `room_id` with the two authorized players.
    /// Returns once the child is accepting connections on its port.
    pub async fn launch(
        &mut self,
        room_id: RoomId,
        players: [(UserId, Role); 2],
    ) -> Result<LaunchedMatch, LaunchError> {
        let port = self.alloc_port()?;
        let match_id = Uuid::new_v4().to_string();
        let seed: u64 = rand::rng().random();

        let mut cmd = Command::new(&self.config.match_bin);
        cmd.arg("--host")
            .arg(&self.config.listen_host)
            .arg("--port")
            .arg(port.to_string())
            .arg("--match-id")
            .arg(&match_id)
            .arg("--seed")
            .arg(seed.to_string())
            .arg("--room-id")
            .arg(room_id.to_string())
            .arg("--session-addr")
            .arg(&self.config.session_addr);
        for (user_id, role) in players {
            cmd.arg("--player").arg(format!("{user_id}:{role}"));
        }
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.release(port);
                return Err(LaunchError::Spawn(e));
            }
        };
        tracing::info!(
            match_id = %match_id,
            room_id,
            port,
            pid = child.id(),
            "match server spawned"
        );

        // Watch the child: log the exit, enforce the duration cap, and give
        // the port back to the pool.
        let freed = self.freed_tx.clone();
        let cap = self.config.max_match_duration;
        let watched_id = match_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(cap, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(
                        match_id = %watched_id,
                        code = status.code(),
                        "match server exited"
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(match_id = %watched_id, error = %e, "match server wait failed");
                }
                Err(_) => {
                    tracing::warn!(match_id = %watched_id, "match server overran cap, killing");
                    let _ = child.kill().await;
                }
            }
            let _ = freed.send(port);
        });

        // Don't report the endpoint until the child has bound it.
        if !await_listening(&self.config.listen_host, port).await {
            return Err(LaunchError::NotReady);
        }

        Ok(LaunchedMatch {
            match_id,
            port,
            seed,
        })
    }

    fn release(&mut self, port: u16) {
        self.in_use.remove(&port);
    }
}

/// Poll until the child's listener answers. The probe connection closes
/// before HELLO, which the match server treats as noise.
async fn await_listening(host: &str, port: u16) -> bool {
    let target = if host == "0.0.0.0" { "127.0.0.1" } else { host };
    for _ in 0..80 {
        if TcpStream::connect((target, port)).await.is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LauncherConfig {
        LauncherConfig {
            match_bin: PathBuf::from("/nonexistent/stackduel-match"),
            listen_host: "127.0.0.1".into(),
            session_addr: "127.0.0.1:10002".into(),
            port_base: 10100,
            port_span: 4,
            max_match_duration: Duration::from_secs(1800),
        }
    }

    #[test]
    fn ports_allocate_lowest_free_first() {
        let mut launcher = Launcher::new(config());
        assert_eq!(launcher.alloc_port().unwrap(), 10100);
        assert_eq!(launcher.alloc_port().unwrap(), 10101);
        launcher.release(10100);
        assert_eq!(launcher.alloc_port().unwrap(), 10100);
    }

    #[test]
    fn exhausted_pool_is_an_error() {
        let mut launcher = Launcher::new(config());
        for _ in 0..4 {
            launcher.alloc_port().unwrap();
        }
        assert!(matches!(
            launcher.alloc_port(),
            Err(LaunchError::PortsExhausted)
        ));
    }

    #[test]
    fn freed_ports_return_through_the_channel() {
        let mut launcher = Launcher::new(config());
        let port = launcher.alloc_port().unwrap();
        launcher.freed_tx.send(port).unwrap();
        // The next allocation drains the channel and reuses the port.
        assert_eq!(launcher.alloc_port().unwrap(), port);
    }

    #[tokio::test]
    async fn missing_binary_reports_spawn_failure_and_releases_port() {
        let mut launcher = Launcher::new(config());
        let err = launcher
            .launch(1, [(1, Role::P1), (2, Role::P2)])
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn(_)));
        // Port went back to the pool.
        assert_eq!(launcher.alloc_port().unwrap(), 10100);
    }
}
