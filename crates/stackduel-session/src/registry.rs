//! The session service's in-memory registry: connected sessions, the
//! online-user index, the live room table, and the matches in flight.
//!
//! Everything here sits behind one mutex owned by [`crate::state::AppState`];
//! these methods validate and mutate synchronously, and the connection
//! handlers write the results through to persistence while still holding
//! that lock, so room invariants hold under concurrent requests.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;

use stackduel_core::error::ErrorKind;
use stackduel_core::types::{Room, RoomId, RoomStatus, UserId, Visibility};

pub type SessionId = u64;

/// Per-session sender for outbound frames (responses and event pushes).
/// Bounded so a stalled client cannot pin server memory.
pub type ClientSender = mpsc::Sender<Value>;

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<stackduel_store::client::StoreClientError> for SessionError {
    fn from(e: stackduel_store::client::StoreClientError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

pub struct SessionEntry {
    pub sender: ClientSender,
    pub user_id: Option<UserId>,
    pub user_name: Option<String>,
    pub room_id: Option<RoomId>,
}

/// A match the session service launched and has not yet seen complete.
pub struct LiveMatch {
    pub match_id: String,
    pub port: u16,
}

#[derive(Default)]
pub struct Registry {
    sessions: HashMap<SessionId, SessionEntry>,
    online: HashMap<UserId, SessionId>,
    rooms: HashMap<RoomId, Room>,
    matches: HashMap<RoomId, LiveMatch>,
    next_session_id: SessionId,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_session(&mut self, sender: ClientSender) -> SessionId {
        self.next_session_id += 1;
        let id = self.next_session_id;
        self.sessions.insert(
            id,
            SessionEntry {
                sender,
                user_id: None,
                user_name: None,
                room_id: None,
            },
        );
        id
    }

    pub fn session(&self, id: SessionId) -> Option<&SessionEntry> {
        self.sessions.get(&id)
    }

    /// The authenticated user of a session, or `Unauthenticated`.
    pub fn user_of(&self, id: SessionId) -> Result<UserId, SessionError> {
        self.sessions
            .get(&id)
            .and_then(|s| s.user_id)
            .ok_or_else(|| SessionError::new(ErrorKind::Unauthenticated, "not logged in"))
    }

    /// Bind a freshly logged-in user to a session. A user id may hold at
    /// most one live session.
    pub fn bind_user(
        &mut self,
        id: SessionId,
        user_id: UserId,
        name: String,
    ) -> Result<(), SessionError> {
        if self.sessions.get(&id).is_some_and(|s| s.user_id.is_some()) {
            return Err(SessionError::new(
                ErrorKind::InvalidState,
                "session is already logged in",
            ));
        }
        if self.online.contains_key(&user_id) {
            return Err(SessionError::new(
                ErrorKind::Conflict,
                "user is already online",
            ));
        }
        let entry = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| SessionError::new(ErrorKind::NotFound, "session gone"))?;
        entry.user_id = Some(user_id);
        entry.user_name = Some(name);
        self.online.insert(user_id, id);
        Ok(())
    }

    /// Clear a session's user binding. Callers handle room departure first.
    pub fn unbind_user(&mut self, id: SessionId) {
        if let Some(entry) = self.sessions.get_mut(&id)
            && let Some(user_id) = entry.user_id.take()
        {
            entry.user_name = None;
            self.online.remove(&user_id);
        }
    }

    pub fn remove_session(&mut self, id: SessionId) -> Option<SessionEntry> {
        let entry = self.sessions.remove(&id)?;
        if let Some(user_id) = entry.user_id {
            self.online.remove(&user_id);
        }
        Some(entry)
    }

    pub fn online_users(&self) -> Vec<(UserId, String)> {
        let mut users: Vec<(UserId, String)> = self
            .online
            .iter()
            .filter_map(|(&user_id, session_id)| {
                let name = self.sessions.get(session_id)?.user_name.clone()?;
                Some((user_id, name))
            })
            .collect();
        users.sort_by_key(|&(id, _)| id);
        users
    }

    pub fn sender_for_user(&self, user_id: UserId) -> Option<ClientSender> {
        let session_id = self.online.get(&user_id)?;
        Some(self.sessions.get(session_id)?.sender.clone())
    }

    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn live_match(&self, room_id: RoomId) -> Option<&LiveMatch> {
        self.matches.get(&room_id)
    }

    /// Rooms visible to `user_id`: public rooms plus private rooms where
    /// the user is invited or already a member.
    pub fn rooms_visible_to(&self, user_id: UserId) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .rooms
            .values()
            .filter(|room| match room.visibility {
                Visibility::Public => true,
                Visibility::Private => {
                    room.invited.contains(&user_id) || room.is_member(user_id)
                }
            })
            .cloned()
            .collect();
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    /// Mirror a room created in persistence and put the creator in it.
    pub fn insert_room(&mut self, session_id: SessionId, room: Room) {
        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.room_id = Some(room.id);
        }
        self.rooms.insert(room.id, room);
    }

    /// Validate and apply a join. Returns the updated room for the
    /// write-through.
    pub fn join_room(
        &mut self,
        session_id: SessionId,
        room_id: RoomId,
    ) -> Result<Room, SessionError> {
        let user_id = self.user_of(session_id)?;
        if self
            .sessions
            .get(&session_id)
            .is_some_and(|s| s.room_id.is_some())
        {
            return Err(SessionError::new(
                ErrorKind::InvalidState,
                "already in a room",
            ));
        }
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| SessionError::new(ErrorKind::NotFound, "room not found"))?;
        if room.status != RoomStatus::Idle {
            return Err(SessionError::new(
                ErrorKind::InvalidState,
                "room is playing",
            ));
        }
        if room.is_full() {
            return Err(SessionError::new(ErrorKind::Capacity, "room is full"));
        }
        if room.visibility == Visibility::Private
            && room.host_user_id != user_id
            && !room.invited.contains(&user_id)
        {
            return Err(SessionError::new(
                ErrorKind::PermissionDenied,
                "room is private",
            ));
        }
        room.members.push(user_id);
        let updated = room.clone();
        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.room_id = Some(room_id);
        }
        Ok(updated)
    }

    /// Undo half of a join whose write-through failed.
    pub fn revert_join(&mut self, session_id: SessionId, room_id: RoomId) {
        let user_id = self.sessions.get(&session_id).and_then(|s| s.user_id);
        if let Some(room) = self.rooms.get_mut(&room_id)
            && let Some(user_id) = user_id
        {
            room.members.retain(|&m| m != user_id);
        }
        if let Some(entry) = self.sessions.get_mut(&session_id) {
            entry.room_id = None;
        }
    }

    /// What a departure means for the room the session is in.
    pub fn plan_departure(&self, session_id: SessionId) -> Result<Departure, SessionError> {
        let user_id = self.user_of(session_id)?;
        let room_id = self
            .sessions
            .get(&session_id)
            .and_then(|s| s.room_id)
            .ok_or_else(|| SessionError::new(ErrorKind::InvalidState, "not in a room"))?;
        let room = self
            .rooms
            .get(&room_id)
            .ok_or_else(|| SessionError::new(ErrorKind::NotFound, "room not found"))?;
        if room.status == RoomStatus::Playing {
            return Err(SessionError::new(
                ErrorKind::InvalidState,
                "membership is frozen while the room is playing",
            ));
        }
        if room.host_user_id == user_id {
            Ok(Departure::Disband { room_id })
        } else {
            let mut members = room.members.clone();
            members.retain(|&m| m != user_id);
            Ok(Departure::Leave { room_id, members })
        }
    }

    /// Apply a planned departure after its write-through succeeded.
    pub fn apply_departure(&mut self, session_id: SessionId, departure: &Departure) {
        match departure {
            Departure::Disband { room_id } => {
                self.rooms.remove(room_id);
                self.matches.remove(room_id);
                for entry in self.sessions.values_mut() {
                    if entry.room_id == Some(*room_id) {
                        entry.room_id = None;
                    }
                }
            }
            Departure::Leave { room_id, members } => {
                if let Some(room) = self.rooms.get_mut(room_id) {
                    room.members = members.clone();
                }
                if let Some(entry) = self.sessions.get_mut(&session_id) {
                    entry.room_id = None;
                }
            }
        }
    }

    /// Host-only guard for invite/kick/start.
    pub fn require_host_of_idle_room(
        &self,
        session_id: SessionId,
        room_id: RoomId,
    ) -> Result<&Room, SessionError> {
        let user_id = self.user_of(session_id)?;
        let room = self
            .rooms
            .get(&room_id)
            .ok_or_else(|| SessionError::new(ErrorKind::NotFound, "room not found"))?;
        if room.host_user_id != user_id {
            return Err(SessionError::new(
                ErrorKind::PermissionDenied,
                "only the host may do that",
            ));
        }
        if room.status != RoomStatus::Idle {
            return Err(SessionError::new(
                ErrorKind::InvalidState,
                "room is playing",
            ));
        }
        Ok(room)
    }

    pub fn add_invite(&mut self, room_id: RoomId, user_id: UserId) -> Option<Vec<UserId>> {
        let room = self.rooms.get_mut(&room_id)?;
        if !room.invited.contains(&user_id) {
            room.invited.push(user_id);
        }
        Some(room.invited.clone())
    }

    pub fn remove_invite(&mut self, room_id: RoomId, user_id: UserId) {
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.invited.retain(|&u| u != user_id);
        }
    }

    pub fn remove_member(&mut self, room_id: RoomId, user_id: UserId) -> Option<Vec<UserId>> {
        let room = self.rooms.get_mut(&room_id)?;
        room.members.retain(|&m| m != user_id);
        let members = room.members.clone();
        for entry in self.sessions.values_mut() {
            if entry.user_id == Some(user_id) && entry.room_id == Some(room_id) {
                entry.room_id = None;
            }
        }
        Some(members)
    }

    /// Undo a member removal whose write-through failed: restore the
    /// membership list and the removed user's session binding.
    pub fn restore_member(&mut self, room_id: RoomId, user_id: UserId, members: Vec<UserId>) {
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.members = members;
        }
        for entry in self.sessions.values_mut() {
            if entry.user_id == Some(user_id) && entry.room_id.is_none() {
                entry.room_id = Some(room_id);
            }
        }
    }

    /// Flip a room to playing and remember the launched match.
    pub fn mark_playing(&mut self, room_id: RoomId, match_id: String, port: u16) {
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.status = RoomStatus::Playing;
        }
        self.matches.insert(room_id, LiveMatch { match_id, port });
    }

    /// Return a playing room to idle once its match reported completion.
    /// Validates the `(match_id, room_id)` pair against the launch record.
    pub fn complete_match(
        &mut self,
        room_id: RoomId,
        match_id: &str,
    ) -> Result<(), SessionError> {
        match self.matches.get(&room_id) {
            Some(live) if live.match_id == match_id => {
                self.matches.remove(&room_id);
                if let Some(room) = self.rooms.get_mut(&room_id) {
                    room.status = RoomStatus::Idle;
                }
                Ok(())
            }
            _ => Err(SessionError::new(
                ErrorKind::PermissionDenied,
                "unknown match for room",
            )),
        }
    }
}

/// Outcome of a leave/logout/disconnect for the room involved.
#[derive(Debug)]
pub enum Departure {
    /// The host left an idle room: the room is deleted.
    Disband { room_id: RoomId },
    /// A guest left: membership shrinks to `members`.
    Leave {
        room_id: RoomId,
        members: Vec<UserId>,
    },
}
