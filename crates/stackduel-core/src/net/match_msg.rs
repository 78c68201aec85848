//! Message catalogue of the match protocol.
//!
//! Frames are tagged by `type`; an unknown tag fails to decode and is a
//! protocol error for the connection. Unknown *action strings* inside an
//! otherwise well-formed INPUT are a softer failure: the input is dropped
//! and the connection lives on, which is why `action` stays a `String`
//! here and is resolved against the engine's action set at the ingestion
//! point.

use serde::{Deserialize, Serialize};

use crate::types::{PlayerResult, Role, RoomId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MatchMsg {
    #[serde(rename = "HELLO")]
    Hello {
        version: u32,
        #[serde(rename = "roomId")]
        room_id: RoomId,
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    #[serde(rename = "WELCOME")]
    Welcome {
        role: Role,
        seed: u64,
        #[serde(rename = "bagRule")]
        bag_rule: String,
        #[serde(rename = "gravityPlan")]
        gravity_plan: GravityPlan,
    },
    #[serde(rename = "INPUT")]
    Input {
        #[serde(rename = "userId")]
        user_id: UserId,
        seq: u64,
        ts: u64,
        action: String,
    },
    #[serde(rename = "SNAPSHOT")]
    Snapshot(SnapshotMsg),
    #[serde(rename = "GAME_OVER")]
    GameOver {
        winner: Option<UserId>,
        results: Vec<PlayerResult>,
    },
    #[serde(rename = "PING")]
    Ping { ts: u64 },
    #[serde(rename = "PONG")]
    Pong { ts: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GravityPlan {
    pub mode: String,
    #[serde(rename = "dropMs")]
    pub drop_ms: u64,
}

impl GravityPlan {
    pub fn fixed(drop_ms: u64) -> Self {
        Self {
            mode: "fixed".into(),
            drop_ms,
        }
    }
}

/// Per-player state broadcast on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMsg {
    pub tick: u64,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub role: Role,
    #[serde(rename = "boardRLE")]
    pub board_rle: String,
    pub active: ActivePieceMsg,
    /// Piece kind parked in the hold slot, if any.
    pub hold: Option<String>,
    /// The next three previewed kinds.
    pub next: Vec<String>,
    pub score: u64,
    pub lines: u32,
    pub level: u32,
    #[serde(rename = "gameOver")]
    pub game_over: bool,
    /// Advisory wall-clock millis.
    pub at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePieceMsg {
    pub shape: String,
    pub x: i8,
    pub y: i8,
    pub rot: u8,
}
