//! Request and event catalogue of the session service.

use serde::{Deserialize, Serialize};

use crate::types::{PlayerResult, Role, RoomId, UserId, Visibility};

/// One session request, decoded from the `{action, data}` envelope.
///
/// `match_complete` is the control-channel action used by match servers;
/// client connections never need it and it carries its own validation
/// (the session service checks the `(match_id, room_id)` pair against the
/// matches it launched).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum SessionRequest {
    Register {
        name: String,
        email: String,
        password: String,
    },
    Login {
        email: String,
        password: String,
    },
    Logout {},
    ListOnlineUsers {},
    ListRooms {},
    CreateRoom {
        name: String,
        visibility: Visibility,
    },
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {},
    Invite {
        room_id: RoomId,
        user_id: UserId,
    },
    Kick {
        room_id: RoomId,
        user_id: UserId,
    },
    StartGame {
        room_id: RoomId,
    },
    MatchComplete {
        match_id: String,
        room_id: RoomId,
        winner: Option<UserId>,
        results: Vec<PlayerResult>,
        start_at: u64,
        end_at: u64,
    },
}

/// Unsolicited `{event, data}` frames pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Pushed to the guest when the host starts the match.
    MatchReady {
        host: String,
        port: u16,
        match_id: String,
        role: Role,
    },
    /// Pushed to an online user when a host invites them to a private room.
    Invited {
        room_id: RoomId,
        room_name: String,
        from_user_id: UserId,
    },
}

/// Payload of the success reply to `start_game`, sent to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartGameReply {
    pub host: String,
    pub port: u16,
    pub match_id: String,
    pub role: Role,
}

/// One row of the `list_online_users` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub user_id: UserId,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_tags_are_snake_case() {
        let req = SessionRequest::StartGame { room_id: 4 };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["action"], "start_game");
        assert_eq!(json["data"]["room_id"], 4);
    }

    #[test]
    fn dataless_actions_accept_empty_object() {
        let raw = serde_json::json!({"action": "logout", "data": {}});
        let req: SessionRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req, SessionRequest::Logout {});
    }

    #[test]
    fn unknown_action_is_rejected_at_parse() {
        let raw = serde_json::json!({"action": "become_admin", "data": {}});
        assert!(serde_json::from_value::<SessionRequest>(raw).is_err());
    }

    #[test]
    fn match_ready_event_shape() {
        let event = SessionEvent::MatchReady {
            host: "10.0.0.5".into(),
            port: 10104,
            match_id: "m-1".into(),
            role: Role::P2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "match_ready");
        assert_eq!(json["data"]["role"], "P2");
        assert_eq!(json["data"]["port"], 10104);
    }
}
