//! In-memory table set. The request/response contract in
//! [`crate::service`] is the only observable surface; everything here can
//! be swapped for a durable backend without touching the wire.

use std::collections::HashMap;

use stackduel_core::error::ErrorKind;
use stackduel_core::net::store_msg::RoomPatch;
use stackduel_core::time::now_millis;
use stackduel_core::types::{
    MatchLog, PlayerResult, Room, RoomId, RoomStatus, User, UserId, Visibility,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email is already registered")]
    EmailTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{0} not found")]
    NotFound(&'static str),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::EmailTaken => ErrorKind::Conflict,
            StoreError::InvalidCredentials => ErrorKind::InvalidCredentials,
            StoreError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

/// All durable state. Ids are monotonic and never reused.
#[derive(Debug, Default)]
pub struct MemStore {
    users: HashMap<UserId, User>,
    rooms: HashMap<RoomId, Room>,
    logs: Vec<MatchLog>,
    next_user_id: UserId,
    next_room_id: RoomId,
    next_log_id: u64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn user_by_email_mut(&mut self, email: &str) -> Option<&mut User> {
        self.users
            .values_mut()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }

    pub fn create_user(
        &mut self,
        name: String,
        email: String,
        password_hash: String,
    ) -> Result<User, StoreError> {
        if self.user_by_email_mut(&email).is_some() {
            return Err(StoreError::EmailTaken);
        }
        self.next_user_id += 1;
        let now = now_millis();
        let user = User {
            id: self.next_user_id,
            name,
            email,
            password_hash,
            created_at: now,
            last_login_at: now,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub fn login_user(&mut self, email: &str, password_hash: &str) -> Result<User, StoreError> {
        let now = now_millis();
        let user = self
            .user_by_email_mut(email)
            .filter(|u| u.password_hash == password_hash)
            .ok_or(StoreError::InvalidCredentials)?;
        user.last_login_at = now;
        Ok(user.clone())
    }

    pub fn get_user(&self, id: UserId) -> Result<User, StoreError> {
        self.users.get(&id).cloned().ok_or(StoreError::NotFound("user"))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(StoreError::NotFound("user"))
    }

    pub fn create_room(
        &mut self,
        name: String,
        host_user_id: UserId,
        visibility: Visibility,
    ) -> Room {
        self.next_room_id += 1;
        let room = Room {
            id: self.next_room_id,
            name,
            host_user_id,
            visibility,
            invited: Vec::new(),
            members: vec![host_user_id],
            status: RoomStatus::Idle,
            created_at: now_millis(),
        };
        self.rooms.insert(room.id, room.clone());
        room
    }

    pub fn get_room(&self, id: RoomId) -> Result<Room, StoreError> {
        self.rooms.get(&id).cloned().ok_or(StoreError::NotFound("room"))
    }

    pub fn list_rooms(&self, visibility: Option<Visibility>) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .rooms
            .values()
            .filter(|r| visibility.is_none_or(|v| r.visibility == v))
            .cloned()
            .collect();
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub fn update_room(&mut self, id: RoomId, patch: RoomPatch) -> Result<Room, StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::NotFound("room"))?;
        if let Some(members) = patch.members {
            room.members = members;
        }
        if let Some(status) = patch.status {
            room.status = status;
        }
        if let Some(invited) = patch.invited {
            room.invited = invited;
        }
        Ok(room.clone())
    }

    pub fn delete_room(&mut self, id: RoomId) -> Result<(), StoreError> {
        self.rooms
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound("room"))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_game_log(
        &mut self,
        match_id: String,
        room_id: RoomId,
        users: Vec<UserId>,
        start_at: u64,
        end_at: u64,
        results: Vec<PlayerResult>,
    ) -> MatchLog {
        self.next_log_id += 1;
        let log = MatchLog {
            id: self.next_log_id,
            match_id,
            room_id,
            users,
            start_at,
            end_at,
            results,
        };
        self.logs.push(log.clone());
        log
    }

    pub fn list_game_logs(&self, user_id: Option<UserId>) -> Vec<MatchLog> {
        self.logs
            .iter()
            .filter(|log| user_id.is_none_or(|u| log.users.contains(&u)))
            .cloned()
            .collect()
    }
}
