//! Thin call-site facade over the persistence wire contract, used by the
//! session service (and its control channel). One framed connection, one
//! in-flight request at a time.

use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use stackduel_core::error::ErrorKind;
use stackduel_core::net::envelope::Response;
use stackduel_core::net::frame::{self, FrameError, FramedJson};
use stackduel_core::net::store_msg::{RoomPatch, StoreRequest};
use stackduel_core::types::{MatchLog, PlayerResult, Room, RoomId, User, UserId, Visibility};

#[derive(Debug, thiserror::Error)]
pub enum StoreClientError {
    #[error("persistence transport error: {0}")]
    Transport(#[from] FrameError),
    #[error("persistence connection closed")]
    Closed,
    #[error("{message}")]
    Service { kind: ErrorKind, message: String },
}

impl StoreClientError {
    /// The wire-visible kind this failure maps to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreClientError::Transport(_) | StoreClientError::Closed => {
                ErrorKind::PersistenceUnavailable
            }
            StoreClientError::Service { kind, .. } => *kind,
        }
    }

    /// Transport failures may succeed on a fresh connection; service
    /// verdicts will not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreClientError::Service { .. })
    }
}

#[derive(Clone)]
pub struct StoreClient {
    addr: String,
    framed: Arc<Mutex<FramedJson>>,
}

impl StoreClient {
    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            addr: addr.to_string(),
            framed: Arc::new(Mutex::new(frame::framed(stream))),
        })
    }

    /// Replace a broken connection. Callers retrying a transient failure
    /// reconnect first; the old stream is unusable after a frame error.
    pub async fn reconnect(&self) -> std::io::Result<()> {
        let stream = TcpStream::connect(&self.addr).await?;
        *self.framed.lock().await = frame::framed(stream);
        Ok(())
    }

    async fn call(&self, request: StoreRequest) -> Result<Value, StoreClientError> {
        let mut framed = self.framed.lock().await;
        frame::send(&mut framed, &request).await?;
        let response: Response = frame::recv(&mut framed)
            .await?
            .ok_or(StoreClientError::Closed)?;
        if response.is_success() {
            Ok(response.data)
        } else {
            Err(StoreClientError::Service {
                kind: response.error_kind().unwrap_or(ErrorKind::PersistenceUnavailable),
                message: response.message,
            })
        }
    }

    async fn call_as<T: serde::de::DeserializeOwned>(
        &self,
        request: StoreRequest,
    ) -> Result<T, StoreClientError> {
        let data = self.call(request).await?;
        serde_json::from_value(data).map_err(|e| StoreClientError::Transport(e.into()))
    }

    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreClientError> {
        self.call_as(StoreRequest::CreateUser {
            name: name.into(),
            email: email.into(),
            password_hash: password_hash.into(),
        })
        .await
    }

    pub async fn login_user(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreClientError> {
        self.call_as(StoreRequest::LoginUser {
            email: email.into(),
            password_hash: password_hash.into(),
        })
        .await
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, StoreClientError> {
        self.call_as(StoreRequest::GetUser { id }).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<User, StoreClientError> {
        self.call_as(StoreRequest::GetUserByEmail {
            email: email.into(),
        })
        .await
    }

    pub async fn create_room(
        &self,
        name: &str,
        host_user_id: UserId,
        visibility: Visibility,
    ) -> Result<Room, StoreClientError> {
        self.call_as(StoreRequest::CreateRoom {
            name: name.into(),
            host_user_id,
            visibility,
        })
        .await
    }

    pub async fn get_room(&self, id: RoomId) -> Result<Room, StoreClientError> {
        self.call_as(StoreRequest::GetRoom { id }).await
    }

    pub async fn list_rooms(
        &self,
        visibility: Option<Visibility>,
    ) -> Result<Vec<Room>, StoreClientError> {
        #[derive(serde::Deserialize)]
        struct Payload {
            rooms: Vec<Room>,
        }
        let payload: Payload = self.call_as(StoreRequest::ListRooms { visibility }).await?;
        Ok(payload.rooms)
    }

    pub async fn update_room(
        &self,
        id: RoomId,
        patch: RoomPatch,
    ) -> Result<Room, StoreClientError> {
        self.call_as(StoreRequest::UpdateRoom { id, patch }).await
    }

    pub async fn delete_room(&self, id: RoomId) -> Result<(), StoreClientError> {
        self.call(StoreRequest::DeleteRoom { id }).await.map(|_| ())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_game_log(
        &self,
        match_id: &str,
        room_id: RoomId,
        users: Vec<UserId>,
        start_at: u64,
        end_at: u64,
        results: Vec<PlayerResult>,
    ) -> Result<MatchLog, StoreClientError> {
        self.call_as(StoreRequest::CreateGameLog {
            match_id: match_id.into(),
            room_id,
            users,
            start_at,
            end_at,
            results,
        })
        .await
    }

    pub async fn list_game_logs(
        &self,
        user_id: Option<UserId>,
    ) -> Result<Vec<MatchLog>, StoreClientError> {
        #[derive(serde::Deserialize)]
        struct Payload {
            logs: Vec<MatchLog>,
        }
        let payload: Payload = self.call_as(StoreRequest::ListGameLogs { user_id }).await?;
        Ok(payload.logs)
    }
}
