//! The authoritative tick loop. It is the sole mutator of engine state;
//! inputs arrive only through the match command queue, in arrival order,
//! and are applied at tick boundaries interleaved with gravity.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use stackduel_core::net::match_msg::{ActivePieceMsg, MatchMsg, SnapshotMsg};
use stackduel_core::time::now_millis;
use stackduel_core::types::{PlayerResult, Role, UserId};
use stackduel_engine::{Action, Engine};

/// Commands sent from the connection readers to the tick loop.
#[derive(Debug)]
pub enum MatchCommand {
    PlayerInput { user_id: UserId, action: Action },
    /// The player's connection dropped before game over: forfeit.
    PlayerGone { user_id: UserId },
}

/// One player inside the running match.
pub struct PlayerSlot {
    pub user_id: UserId,
    pub role: Role,
    pub engine: Engine,
    pub writer: mpsc::Sender<Value>,
    last_gravity: Instant,
    /// Tick at which this player's game ended (top-out or forfeit).
    ended_at_tick: Option<u64>,
    forfeited: bool,
}

impl PlayerSlot {
    pub fn new(user_id: UserId, role: Role, engine: Engine, writer: mpsc::Sender<Value>) -> Self {
        Self {
            user_id,
            role,
            engine,
            writer,
            last_gravity: Instant::now(),
            ended_at_tick: None,
            forfeited: false,
        }
    }
}

/// Final verdict of a finished match.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub winner: Option<UserId>,
    pub results: Vec<PlayerResult>,
    pub start_at: u64,
    pub end_at: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub tick_interval: Duration,
    pub gravity_interval: Duration,
}

/// Run the match to completion: apply queued inputs, step gravity, emit a
/// snapshot per player per tick, and finish one tick after the first game
/// over so the final boards reach both clients.
pub async fn run_loop(
    config: LoopConfig,
    mut players: Vec<PlayerSlot>,
    mut commands: mpsc::UnboundedReceiver<MatchCommand>,
) -> MatchOutcome {
    let start_at = now_millis();
    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let now = Instant::now();
    for slot in &mut players {
        slot.last_gravity = now;
    }

    let mut tick: u64 = 0;
    let mut final_tick: Option<u64> = None;
    loop {
        interval.tick().await;
        tick += 1;

        // Drain all pending commands in arrival order.
        while let Ok(command) = commands.try_recv() {
            match command {
                MatchCommand::PlayerInput { user_id, action } => {
                    if let Some(slot) = players.iter_mut().find(|s| s.user_id == user_id)
                        && !slot.forfeited
                    {
                        let outcome = slot.engine.apply(action);
                        if outcome.locked {
                            slot.last_gravity = Instant::now();
                        }
                    }
                }
                MatchCommand::PlayerGone { user_id } => {
                    if let Some(slot) = players.iter_mut().find(|s| s.user_id == user_id)
                        && !slot.engine.is_game_over()
                    {
                        tracing::info!(user_id, "player disconnected, forfeiting");
                        slot.forfeited = true;
                    }
                }
            }
        }

        // Gravity: one step per player when the interval has elapsed since
        // that player's last gravity or lock event.
        for slot in &mut players {
            if slot.forfeited || slot.engine.is_game_over() {
                continue;
            }
            if slot.last_gravity.elapsed() >= config.gravity_interval {
                slot.engine.gravity();
                slot.last_gravity = Instant::now();
            }
        }

        // Record the tick a player's game ended on.
        for slot in &mut players {
            if slot.ended_at_tick.is_none() && (slot.engine.is_game_over() || slot.forfeited) {
                slot.ended_at_tick = Some(tick);
            }
        }

        broadcast_snapshots(&mut players, tick);

        match final_tick {
            None => {
                if players.iter().any(|s| s.ended_at_tick.is_some()) {
                    // One more tick so the final snapshots go out.
                    final_tick = Some(tick + 1);
                }
            }
            Some(t) if tick >= t => break,
            Some(_) => {}
        }
    }

    let outcome = conclude(&players, start_at);
    let game_over = MatchMsg::GameOver {
        winner: outcome.winner,
        results: outcome.results.clone(),
    };
    if let Ok(value) = serde_json::to_value(&game_over) {
        for slot in &players {
            let _ = slot.writer.try_send(value.clone());
        }
    }
    outcome
}

fn broadcast_snapshots(players: &mut [PlayerSlot], tick: u64) {
    let at = now_millis();
    let mut frames: Vec<Value> = Vec::with_capacity(players.len());
    for slot in players.iter_mut() {
        match serde_json::to_value(MatchMsg::Snapshot(snapshot_of(slot, tick, at))) {
            Ok(value) => frames.push(value),
            Err(e) => tracing::error!(tick, error = %e, "failed to encode snapshot"),
        }
    }
    for slot in players.iter() {
        for frame in &frames {
            if slot.writer.try_send(frame.clone()).is_err() {
                tracing::debug!(
                    user_id = slot.user_id,
                    tick,
                    "snapshot skipped, slow or closed client"
                );
            }
        }
    }
}

fn snapshot_of(slot: &mut PlayerSlot, tick: u64, at: u64) -> SnapshotMsg {
    let active = slot.engine.active();
    let active_msg = ActivePieceMsg {
        shape: active.kind.letter().to_string(),
        x: active.x,
        y: active.y,
        rot: active.rot,
    };
    SnapshotMsg {
        tick,
        user_id: slot.user_id,
        role: slot.role,
        board_rle: slot.engine.board().encode_rle(),
        active: active_msg,
        hold: slot.engine.hold().map(|k| k.letter().to_string()),
        next: slot
            .engine
            .next_preview()
            .iter()
            .map(|k| k.letter().to_string())
            .collect(),
        score: slot.engine.score(),
        lines: slot.engine.lines(),
        level: slot.engine.level(),
        game_over: slot.engine.is_game_over() || slot.forfeited,
        at,
    }
}

fn conclude(players: &[PlayerSlot], start_at: u64) -> MatchOutcome {
    let results: Vec<PlayerResult> = players
        .iter()
        .map(|slot| PlayerResult {
            user_id: slot.user_id,
            score: slot.engine.score(),
            lines: slot.engine.lines(),
            max_combo: 0,
        })
        .collect();

    let winner = match players {
        [a, b] => match (a.ended_at_tick, b.ended_at_tick) {
            (Some(_), None) => Some(b.user_id),
            (None, Some(_)) => Some(a.user_id),
            (Some(ta), Some(tb)) if ta < tb => Some(b.user_id),
            (Some(ta), Some(tb)) if tb < ta => Some(a.user_id),
            // Both ended on the same tick, or (unreachable in practice)
            // neither ended.
            _ => None,
        },
        _ => None,
    };

    MatchOutcome {
        winner,
        results,
        start_at,
        end_at: now_millis(),
    }
}
