//! One process, one match. The server accepts player connections,
//! validates them against the launcher-provided roster, runs the
//! authoritative tick loop, and reports the result to the session service
//! before exiting: `AwaitingPlayers → Running → Terminating → Done`.

pub mod conn;
pub mod game_loop;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;

use stackduel_core::net::envelope::Response;
use stackduel_core::net::frame;
use stackduel_core::net::match_msg::MatchMsg;
use stackduel_core::net::session_msg::SessionRequest;
use stackduel_core::net::{GRAVITY_DROP_MS, HANDSHAKE_TIMEOUT_SECS, TICK_HZ};
use stackduel_core::time::now_millis;
use stackduel_core::types::{PlayerResult, Role, RoomId, UserId};
use stackduel_engine::Engine;

use conn::{HandshakeConfig, PlayerReady};
use game_loop::{LoopConfig, MatchOutcome, PlayerSlot};

pub struct MatchConfig {
    pub match_id: String,
    pub room_id: RoomId,
    pub seed: u64,
    /// The authorized `(user_id, role)` pairs, host first.
    pub players: [(UserId, Role); 2],
    pub drop_ms: u64,
    pub tick_ms: u64,
    pub handshake_timeout: Duration,
    /// Session-service control endpoint for the completion report.
    pub session_addr: Option<String>,
}

impl MatchConfig {
    pub fn new(
        match_id: String,
        room_id: RoomId,
        seed: u64,
        players: [(UserId, Role); 2],
    ) -> Self {
        Self {
            match_id,
            room_id,
            seed,
            players,
            drop_ms: GRAVITY_DROP_MS,
            tick_ms: 1000 / TICK_HZ as u64,
            handshake_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            session_addr: None,
        }
    }
}

/// Run the match to completion. Returns the final outcome after the
/// completion report has been attempted.
pub async fn run_match(
    listener: TcpListener,
    config: MatchConfig,
) -> std::io::Result<MatchOutcome> {
    let lobby_opened = now_millis();
    let handshake = Arc::new(HandshakeConfig {
        room_id: config.room_id,
        seed: config.seed,
        drop_ms: config.drop_ms,
        players: config.players,
    });
    let claimed: Arc<Mutex<HashSet<UserId>>> = Arc::new(Mutex::new(HashSet::new()));
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<PlayerReady>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    // AwaitingPlayers: the handshake clock starts at the first connection.
    let far_future = Instant::now() + Duration::from_secs(7 * 24 * 3600);
    let timer = tokio::time::sleep_until(far_future);
    tokio::pin!(timer);
    let mut deadline = far_future;
    let mut armed = false;
    let mut ready: Vec<PlayerReady> = Vec::new();

    let timed_out = loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                if !armed {
                    armed = true;
                    deadline = Instant::now() + config.handshake_timeout;
                    timer.as_mut().reset(deadline);
                }
                tracing::debug!(%peer, "inbound connection");
                tokio::spawn(conn::serve_connection(
                    stream,
                    Arc::clone(&handshake),
                    Arc::clone(&claimed),
                    deadline,
                    ready_tx.clone(),
                    cmd_tx.clone(),
                ));
            }
            Some(player) = ready_rx.recv() => {
                tracing::info!(user_id = player.user_id, role = %player.role, "player joined");
                ready.push(player);
                if ready.len() == 2 {
                    break false;
                }
            }
            _ = &mut timer, if armed => {
                break true;
            }
        }
    };
    // Exactly two connections play; later ones get connection refused.
    drop(listener);

    let outcome = if timed_out {
        tracing::warn!(match_id = %config.match_id, "handshake deadline passed, aborting");
        abort_unfilled(&config, &ready, lobby_opened)
    } else {
        // Running. Slots in role order so results read P1 first.
        ready.sort_by_key(|p| p.role != Role::P1);
        let players: Vec<PlayerSlot> = ready
            .into_iter()
            .map(|p| PlayerSlot::new(p.user_id, p.role, Engine::new(config.seed), p.writer))
            .collect();
        let loop_config = LoopConfig {
            tick_interval: Duration::from_millis(config.tick_ms),
            gravity_interval: Duration::from_millis(config.drop_ms),
        };
        game_loop::run_loop(loop_config, players, cmd_rx).await
    };

    // Terminating: tell the session service so the room leaves `playing`
    // and the log is written.
    if let Some(addr) = &config.session_addr {
        if let Err(e) = report_completion(addr, &config, &outcome).await {
            tracing::warn!(error = %e, "completion report failed");
        }
    }

    tracing::info!(
        match_id = %config.match_id,
        winner = ?outcome.winner,
        "match done"
    );
    Ok(outcome)
}

/// The 30-second abort: whoever completed HELLO wins by default, the
/// missing seat gets an empty result.
fn abort_unfilled(config: &MatchConfig, ready: &[PlayerReady], start_at: u64) -> MatchOutcome {
    let results: Vec<PlayerResult> = config
        .players
        .iter()
        .map(|&(user_id, _)| PlayerResult {
            user_id,
            score: 0,
            lines: 0,
            max_combo: 0,
        })
        .collect();
    let outcome = MatchOutcome {
        winner: ready.first().map(|p| p.user_id),
        results,
        start_at,
        end_at: now_millis(),
    };
    let game_over = MatchMsg::GameOver {
        winner: outcome.winner,
        results: outcome.results.clone(),
    };
    if let Ok(value) = serde_json::to_value(&game_over) {
        for player in ready {
            let _ = player.writer.try_send(value.clone());
        }
    }
    outcome
}

async fn report_completion(
    addr: &str,
    config: &MatchConfig,
    outcome: &MatchOutcome,
) -> std::io::Result<()> {
    let request = SessionRequest::MatchComplete {
        match_id: config.match_id.clone(),
        room_id: config.room_id,
        winner: outcome.winner,
        results: outcome.results.clone(),
        start_at: outcome.start_at,
        end_at: outcome.end_at,
    };
    let stream = TcpStream::connect(addr).await?;
    let mut framed = frame::framed(stream);
    frame::send(&mut framed, &request)
        .await
        .map_err(std::io::Error::other)?;
    let response: Option<Response> = frame::recv_deadline(&mut framed, Duration::from_secs(5))
        .await
        .map_err(std::io::Error::other)?;
    match response {
        Some(resp) if resp.is_success() => Ok(()),
        Some(resp) => Err(std::io::Error::other(format!(
            "session rejected completion: {}",
            resp.message
        ))),
        None => Err(std::io::Error::other("session closed the control channel")),
    }
}
