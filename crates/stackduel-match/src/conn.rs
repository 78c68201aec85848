//! Player connections: HELLO validation, WELCOME, and the reader task
//! that drains inputs into the tick loop's command queue.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use stackduel_core::error::ErrorKind;
use stackduel_core::net::PROTOCOL_VERSION;
use stackduel_core::net::envelope::Response;
use stackduel_core::net::frame::{self, FramedJson};
use stackduel_core::net::match_msg::{GravityPlan, MatchMsg};
use stackduel_core::types::{Role, RoomId, UserId};
use stackduel_engine::Action;

use crate::game_loop::MatchCommand;

/// What a connection must present to claim a seat.
pub struct HandshakeConfig {
    pub room_id: RoomId,
    pub seed: u64,
    pub drop_ms: u64,
    pub players: [(UserId, Role); 2],
}

/// Reported to the lobby once a player has been welcomed.
pub struct PlayerReady {
    pub user_id: UserId,
    pub role: Role,
    pub writer: mpsc::Sender<Value>,
}

/// Outbound channel depth per player connection.
const PLAYER_BUFFER: usize = 256;

/// Drive one inbound connection: handshake, then the input reader. Probe
/// connections that close before HELLO simply end here; a claimed player
/// whose stream ends is reported as gone (forfeit).
pub async fn serve_connection(
    stream: TcpStream,
    config: Arc<HandshakeConfig>,
    claimed: Arc<Mutex<HashSet<UserId>>>,
    deadline: tokio::time::Instant,
    ready_tx: mpsc::UnboundedSender<PlayerReady>,
    cmd_tx: mpsc::UnboundedSender<MatchCommand>,
) {
    let mut framed = frame::framed(stream);

    let hello = tokio::time::timeout_at(deadline, frame::recv::<MatchMsg>(&mut framed)).await;
    let (user_id, role) = match hello {
        Ok(Ok(Some(MatchMsg::Hello {
            version,
            room_id,
            user_id,
        }))) => {
            let seat = config
                .players
                .iter()
                .find(|&&(expected, _)| expected == user_id)
                .copied();
            match seat {
                Some((_, role)) if version == PROTOCOL_VERSION && room_id == config.room_id => {
                    let fresh = claim(&claimed, user_id);
                    if !fresh {
                        reject(&mut framed, "seat already taken").await;
                        return;
                    }
                    (user_id, role)
                }
                _ => {
                    tracing::warn!(user_id, room_id, "unauthorized HELLO");
                    reject(&mut framed, "unauthorized for this match").await;
                    return;
                }
            }
        }
        Ok(Ok(Some(_))) => {
            reject(&mut framed, "expected HELLO").await;
            return;
        }
        Ok(Err(e)) => {
            let resp = Response::error(ErrorKind::MalformedFrame, e.to_string());
            let _ = frame::send(&mut framed, &resp).await;
            return;
        }
        // Probe (launcher readiness check) or handshake deadline; the
        // lobby timer owns the abort.
        Ok(Ok(None)) | Err(_) => return,
    };

    let welcome = MatchMsg::Welcome {
        role,
        seed: config.seed,
        bag_rule: "7bag".into(),
        gravity_plan: GravityPlan::fixed(config.drop_ms),
    };
    if frame::send(&mut framed, &welcome).await.is_err() {
        unclaim(&claimed, user_id);
        return;
    }

    let (sink, reader) = framed.split();
    let (writer_tx, writer_rx) = mpsc::channel(PLAYER_BUFFER);
    spawn_writer(sink, writer_rx);
    if ready_tx
        .send(PlayerReady {
            user_id,
            role,
            writer: writer_tx.clone(),
        })
        .is_err()
    {
        return;
    }

    read_inputs(reader, user_id, writer_tx, &cmd_tx).await;
    let _ = cmd_tx.send(MatchCommand::PlayerGone { user_id });
}

fn claim(claimed: &Mutex<HashSet<UserId>>, user_id: UserId) -> bool {
    match claimed.lock() {
        Ok(mut set) => set.insert(user_id),
        Err(poisoned) => poisoned.into_inner().insert(user_id),
    }
}

fn unclaim(claimed: &Mutex<HashSet<UserId>>, user_id: UserId) {
    if let Ok(mut set) = claimed.lock() {
        set.remove(&user_id);
    }
}

async fn reject(framed: &mut FramedJson, message: &str) {
    let resp = Response::error(ErrorKind::PermissionDenied, message);
    let _ = frame::send(framed, &resp).await;
}

fn spawn_writer(mut sink: SplitSink<FramedJson, Value>, mut rx: mpsc::Receiver<Value>) {
    tokio::spawn(async move {
        while let Some(value) = rx.recv().await {
            if sink.send(value).await.is_err() {
                break;
            }
        }
    });
}

/// Forward INPUT frames to the tick loop. `seq` must be strictly
/// increasing; duplicates, out-of-order frames, wrong user ids, and
/// unknown action strings are dropped without closing the connection.
/// An undecodable frame ends the connection (and with it, the player).
async fn read_inputs(
    mut reader: SplitStream<FramedJson>,
    user_id: UserId,
    writer: mpsc::Sender<Value>,
    cmd_tx: &mpsc::UnboundedSender<MatchCommand>,
) {
    let mut last_seq: u64 = 0;
    while let Some(item) = reader.next().await {
        let value = match item {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(user_id, error = %e, "bad frame, closing");
                break;
            }
        };
        let msg = match serde_json::from_value::<MatchMsg>(value) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(user_id, error = %e, "unknown frame type, closing");
                break;
            }
        };
        match msg {
            MatchMsg::Input {
                user_id: claimed_id,
                seq,
                ts: _,
                action,
            } => {
                if claimed_id != user_id {
                    tracing::debug!(user_id, claimed_id, "input for wrong user dropped");
                    continue;
                }
                if seq <= last_seq {
                    tracing::debug!(user_id, seq, last_seq, "stale input dropped");
                    continue;
                }
                last_seq = seq;
                match Action::from_wire(&action) {
                    Some(action) => {
                        let _ = cmd_tx.send(MatchCommand::PlayerInput { user_id, action });
                    }
                    None => tracing::debug!(user_id, action = %action, "unknown action dropped"),
                }
            }
            MatchMsg::Ping { ts } => {
                if let Ok(pong) = serde_json::to_value(MatchMsg::Pong { ts }) {
                    let _ = writer.try_send(pong);
                }
            }
            other => {
                tracing::debug!(user_id, msg = ?other, "unexpected frame ignored");
            }
        }
    }
}
