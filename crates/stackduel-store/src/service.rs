//! Request/response loop of the persistence service.
//!
//! One worker task per inbound connection; every storage mutation happens
//! under the single [`MemStore`] mutex, so each request observes a
//! consistent snapshot.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;

use stackduel_core::error::ErrorKind;
use stackduel_core::net::READ_IDLE_TIMEOUT_SECS;
use stackduel_core::net::envelope::Response;
use stackduel_core::net::frame::{self, FrameError, FramedJson};
use stackduel_core::net::store_msg::StoreRequest;

use crate::storage::MemStore;

pub type SharedStore = Arc<Mutex<MemStore>>;

/// Accept loop. Runs until the listener fails.
pub async fn serve(listener: TcpListener, store: SharedStore) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            tracing::debug!(%peer, "store connection opened");
            let mut framed = frame::framed(stream);
            handle_conn(&mut framed, &store).await;
            tracing::debug!(%peer, "store connection closed");
        });
    }
}

async fn handle_conn(framed: &mut FramedJson, store: &SharedStore) {
    let idle = Duration::from_secs(READ_IDLE_TIMEOUT_SECS);
    loop {
        let value = match frame::recv_deadline::<Value>(framed, idle).await {
            Ok(Some(value)) => value,
            Ok(None) => return,
            Err(FrameError::Deadline) => {
                tracing::debug!("store connection idle past deadline");
                return;
            }
            Err(e) => {
                // Report a bad frame once, then drop the connection.
                tracing::debug!(error = %e, "malformed frame");
                let resp = Response::error(ErrorKind::MalformedFrame, e.to_string());
                let _ = frame::send(framed, &resp).await;
                return;
            }
        };

        let response = match serde_json::from_value::<StoreRequest>(value) {
            Ok(request) => dispatch(store, request),
            Err(e) => Response::error(ErrorKind::UnknownAction, e.to_string()),
        };
        if frame::send(framed, &response).await.is_err() {
            return;
        }
    }
}

fn dispatch(store: &SharedStore, request: StoreRequest) -> Response {
    // The mutex is held only across the synchronous storage call.
    let mut store = match store.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let result = match request {
        StoreRequest::CreateUser {
            name,
            email,
            password_hash,
        } => store
            .create_user(name, email, password_hash)
            .map(|user| json!(user)),
        StoreRequest::LoginUser {
            email,
            password_hash,
        } => store.login_user(&email, &password_hash).map(|u| json!(u)),
        StoreRequest::GetUser { id } => store.get_user(id).map(|u| json!(u)),
        StoreRequest::GetUserByEmail { email } => {
            store.get_user_by_email(&email).map(|u| json!(u))
        }
        StoreRequest::CreateRoom {
            name,
            host_user_id,
            visibility,
        } => Ok(json!(store.create_room(name, host_user_id, visibility))),
        StoreRequest::GetRoom { id } => store.get_room(id).map(|r| json!(r)),
        StoreRequest::ListRooms { visibility } => {
            Ok(json!({ "rooms": store.list_rooms(visibility) }))
        }
        StoreRequest::UpdateRoom { id, patch } => store.update_room(id, patch).map(|r| json!(r)),
        StoreRequest::DeleteRoom { id } => store.delete_room(id).map(|_| json!({})),
        StoreRequest::CreateGameLog {
            match_id,
            room_id,
            users,
            start_at,
            end_at,
            results,
        } => Ok(json!(
            store.create_game_log(match_id, room_id, users, start_at, end_at, results)
        )),
        StoreRequest::ListGameLogs { user_id } => {
            Ok(json!({ "logs": store.list_game_logs(user_id) }))
        }
    };

    match result {
        Ok(data) => Response::ok(data),
        Err(e) => Response::error(e.kind(), e.to_string()),
    }
}
