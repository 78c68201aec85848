use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type RoomId = u64;

/// A registered account. `password_hash` is an opaque digest; the
/// persistence layer never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: u64,
    pub last_login_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Idle,
    Playing,
}

/// A match lobby. Invariants: the host is always a member, membership holds
/// one or two user ids with the host first, and membership is frozen while
/// the status is `playing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub host_user_id: UserId,
    pub visibility: Visibility,
    /// Relevant only when the room is private.
    pub invited: Vec<UserId>,
    pub members: Vec<UserId>,
    pub status: RoomStatus,
    pub created_at: u64,
}

impl Room {
    pub fn is_member(&self, user_id: UserId) -> bool {
        self.members.contains(&user_id)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= 2
    }
}

/// Player role within a match: `P1` is the host, `P2` the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    P1,
    P2,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P1" => Ok(Role::P1),
            "P2" => Ok(Role::P2),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Final per-player outcome recorded in a match log and sent in GAME_OVER.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerResult {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub score: u64,
    pub lines: u32,
    /// Reserved; always written as 0.
    #[serde(rename = "maxCombo")]
    pub max_combo: u32,
}

/// Durable record of one finished match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchLog {
    pub id: u64,
    pub match_id: String,
    pub room_id: RoomId,
    pub users: Vec<UserId>,
    pub start_at: u64,
    pub end_at: u64,
    pub results: Vec<PlayerResult>,
}
