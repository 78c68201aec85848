//! Request catalogue of the persistence service.

use serde::{Deserialize, Serialize};

use crate::types::{PlayerResult, RoomId, RoomStatus, UserId, Visibility};

/// One persistence request, decoded from the `{action, data}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum StoreRequest {
    CreateUser {
        name: String,
        email: String,
        password_hash: String,
    },
    LoginUser {
        email: String,
        password_hash: String,
    },
    GetUser {
        id: UserId,
    },
    GetUserByEmail {
        email: String,
    },
    CreateRoom {
        name: String,
        host_user_id: UserId,
        visibility: Visibility,
    },
    GetRoom {
        id: RoomId,
    },
    ListRooms {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        visibility: Option<Visibility>,
    },
    UpdateRoom {
        id: RoomId,
        patch: RoomPatch,
    },
    DeleteRoom {
        id: RoomId,
    },
    CreateGameLog {
        match_id: String,
        room_id: RoomId,
        users: Vec<UserId>,
        start_at: u64,
        end_at: u64,
        results: Vec<PlayerResult>,
    },
    ListGameLogs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
}

/// Partial room update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<UserId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RoomStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invited: Option<Vec<UserId>>,
}
