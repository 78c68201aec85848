//! Per-connection worker: reads framed requests, dispatches them against
//! the registry and persistence, and feeds responses and event pushes
//! through the session's outbound channel. A writer task owns the socket's
//! write half; pushes to other sessions are non-blocking best-effort.

use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use stackduel_core::error::ErrorKind;
use stackduel_core::net::READ_IDLE_TIMEOUT_SECS;
use stackduel_core::net::envelope::Response;
use stackduel_core::net::frame::{self, FramedJson};
use stackduel_core::net::session_msg::{OnlineUser, SessionEvent, SessionRequest, StartGameReply};
use stackduel_core::net::store_msg::RoomPatch;
use stackduel_core::types::{PlayerResult, Role, RoomId, RoomStatus, UserId};

use crate::registry::{Departure, SessionError, SessionId};
use crate::state::{AppState, with_store_retries};

/// Outbound channel depth per client.
const CLIENT_BUFFER: usize = 256;

pub async fn handle_client(stream: TcpStream, state: AppState) {
    let peer = stream.peer_addr().ok();
    let (sink, mut reader) = frame::framed(stream).split();
    let (tx, rx) = mpsc::channel::<Value>(CLIENT_BUFFER);
    spawn_writer(sink, rx);

    let session_id = state.registry.lock().await.register_session(tx.clone());
    tracing::debug!(session_id, ?peer, "client connected");

    let idle = Duration::from_secs(READ_IDLE_TIMEOUT_SECS);
    loop {
        let value = match tokio::time::timeout(idle, reader.next()).await {
            Err(_) => {
                tracing::debug!(session_id, "client idle past deadline");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                // One report, then the connection is closed.
                tracing::debug!(session_id, error = %e, "malformed frame");
                send_response(&tx, Response::error(ErrorKind::MalformedFrame, e.to_string()))
                    .await;
                break;
            }
            Ok(Some(Ok(value))) => value,
        };

        let response = match serde_json::from_value::<SessionRequest>(value) {
            Ok(request) => dispatch(&state, session_id, request).await,
            Err(e) => Response::error(ErrorKind::UnknownAction, e.to_string()),
        };
        if !send_response(&tx, response).await {
            break;
        }
    }

    disconnect(&state, session_id).await;
    tracing::debug!(session_id, ?peer, "client disconnected");
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

async fn send_response(tx: &mpsc::Sender<Value>, response: Response) -> bool {
    match serde_json::to_value(&response) {
        Ok(value) => tx.send(value).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
            false
        }
    }
}

async fn dispatch(state: &AppState, session_id: SessionId, request: SessionRequest) -> Response {
    let result = match request {
        SessionRequest::Register {
            name,
            email,
            password,
        } => register(state, session_id, name, email, password).await,
        SessionRequest::Login { email, password } => {
            login(state, session_id, email, password).await
        }
        SessionRequest::Logout {} => logout(state, session_id).await,
        SessionRequest::ListOnlineUsers {} => list_online_users(state, session_id).await,
        SessionRequest::ListRooms {} => list_rooms(state, session_id).await,
        SessionRequest::CreateRoom { name, visibility } => {
            create_room(state, session_id, name, visibility).await
        }
        SessionRequest::JoinRoom { room_id } => join_room(state, session_id, room_id).await,
        SessionRequest::LeaveRoom {} => leave_room(state, session_id).await,
        SessionRequest::Invite { room_id, user_id } => {
            invite(state, session_id, room_id, user_id).await
        }
        SessionRequest::Kick { room_id, user_id } => {
            kick(state, session_id, room_id, user_id).await
        }
        SessionRequest::StartGame { room_id } => start_game(state, session_id, room_id).await,
        SessionRequest::MatchComplete {
            match_id,
            room_id,
            winner,
            results,
            start_at,
            end_at,
        } => match_complete(state, match_id, room_id, winner, results, start_at, end_at).await,
    };
    match result {
        Ok(data) => Response::ok(data),
        Err(e) => Response::error(e.kind, e.message),
    }
}

fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn require_logged_out(
    registry: &crate::registry::Registry,
    session_id: SessionId,
) -> Result<(), SessionError> {
    if registry
        .session(session_id)
        .is_some_and(|s| s.user_id.is_some())
    {
        return Err(SessionError::new(
            ErrorKind::InvalidState,
            "already logged in",
        ));
    }
    Ok(())
}

async fn register(
    state: &AppState,
    session_id: SessionId,
    name: String,
    email: String,
    password: String,
) -> Result<Value, SessionError> {
    require_logged_out(&*state.registry.lock().await, session_id)?;
    let hash = hash_password(&password);
    let user = with_store_retries(&state.store, |store| {
        let (name, email, hash) = (name.clone(), email.clone(), hash.clone());
        async move { store.create_user(&name, &email, &hash).await }
    })
    .await?;
    tracing::info!(user_id = user.id, "user registered");
    Ok(json!({ "user_id": user.id }))
}

async fn login(
    state: &AppState,
    session_id: SessionId,
    email: String,
    password: String,
) -> Result<Value, SessionError> {
    require_logged_out(&*state.registry.lock().await, session_id)?;
    let hash = hash_password(&password);
    let user = with_store_retries(&state.store, |store| {
        let (email, hash) = (email.clone(), hash.clone());
        async move { store.login_user(&email, &hash).await }
    })
    .await?;
    state
        .registry
        .lock()
        .await
        .bind_user(session_id, user.id, user.name.clone())?;
    tracing::info!(user_id = user.id, session_id, "user logged in");
    Ok(json!({ "user_id": user.id, "name": user.name }))
}

async fn logout(state: &AppState, session_id: SessionId) -> Result<Value, SessionError> {
    let mut registry = state.registry.lock().await;
    registry.user_of(session_id)?;
    depart_room(state, &mut registry, session_id, true).await?;
    registry.unbind_user(session_id);
    Ok(json!({}))
}

async fn list_online_users(
    state: &AppState,
    session_id: SessionId,
) -> Result<Value, SessionError> {
    let registry = state.registry.lock().await;
    registry.user_of(session_id)?;
    let users: Vec<OnlineUser> = registry
        .online_users()
        .into_iter()
        .map(|(user_id, name)| OnlineUser { user_id, name })
        .collect();
    Ok(json!({ "users": users }))
}

async fn list_rooms(state: &AppState, session_id: SessionId) -> Result<Value, SessionError> {
    let registry = state.registry.lock().await;
    let user_id = registry.user_of(session_id)?;
    Ok(json!({ "rooms": registry.rooms_visible_to(user_id) }))
}

async fn create_room(
    state: &AppState,
    session_id: SessionId,
    name: String,
    visibility: stackduel_core::types::Visibility,
) -> Result<Value, SessionError> {
    let mut registry = state.registry.lock().await;
    let user_id = registry.user_of(session_id)?;
    if registry
        .session(session_id)
        .is_some_and(|s| s.room_id.is_some())
    {
        return Err(SessionError::new(
            ErrorKind::InvalidState,
            "already in a room",
        ));
    }
    let room = with_store_retries(&state.store, |store| {
        let name = name.clone();
        async move { store.create_room(&name, user_id, visibility).await }
    })
    .await?;
    tracing::info!(room_id = room.id, host = user_id, "room created");
    registry.insert_room(session_id, room.clone());
    Ok(json!(room))
}

async fn join_room(
    state: &AppState,
    session_id: SessionId,
    room_id: RoomId,
) -> Result<Value, SessionError> {
    let mut registry = state.registry.lock().await;
    let room = registry.join_room(session_id, room_id)?;
    let members = room.members.clone();
    let written = with_store_retries(&state.store, |store| {
        let members = members.clone();
        async move {
            store
                .update_room(
                    room_id,
                    RoomPatch {
                        members: Some(members),
                        ..RoomPatch::default()
                    },
                )
                .await
        }
    })
    .await;
    if let Err(e) = written {
        registry.revert_join(session_id, room_id);
        return Err(e);
    }
    Ok(json!(room))
}

async fn leave_room(state: &AppState, session_id: SessionId) -> Result<Value, SessionError> {
    let mut registry = state.registry.lock().await;
    registry.user_of(session_id)?;
    depart_room(state, &mut registry, session_id, false).await?;
    Ok(json!({}))
}

/// Shared departure path for leave_room, logout, and disconnect.
///
/// When `forced`, a frozen (playing) room keeps its membership and the
/// departure is a no-op, and persistence failures are logged rather than
/// surfaced: a closing connection has nobody to report them to.
async fn depart_room(
    state: &AppState,
    registry: &mut crate::registry::Registry,
    session_id: SessionId,
    forced: bool,
) -> Result<(), SessionError> {
    let in_room = registry
        .session(session_id)
        .is_some_and(|s| s.room_id.is_some());
    if !in_room {
        if forced {
            return Ok(());
        }
        return Err(SessionError::new(ErrorKind::InvalidState, "not in a room"));
    }

    let departure = match registry.plan_departure(session_id) {
        Ok(departure) => departure,
        Err(e) if forced => {
            tracing::debug!(session_id, reason = %e, "departure deferred");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let written = match &departure {
        Departure::Disband { room_id } => {
            let room_id = *room_id;
            with_store_retries(&state.store, move |store| async move {
                store.delete_room(room_id).await
            })
            .await
            .map(|_| ())
        }
        Departure::Leave { room_id, members } => {
            let room_id = *room_id;
            let members = members.clone();
            with_store_retries(&state.store, move |store| {
                let members = members.clone();
                async move {
                    store
                        .update_room(
                            room_id,
                            RoomPatch {
                                members: Some(members),
                                ..RoomPatch::default()
                            },
                        )
                        .await
                        .map(|_| ())
                }
            })
            .await
        }
    };
    match written {
        Ok(()) => {}
        Err(e) if forced => {
            tracing::warn!(session_id, error = %e, "departure write-through failed")
        }
        Err(e) => return Err(e),
    }

    registry.apply_departure(session_id, &departure);
    Ok(())
}

async fn invite(
    state: &AppState,
    session_id: SessionId,
    room_id: RoomId,
    user_id: UserId,
) -> Result<Value, SessionError> {
    let mut registry = state.registry.lock().await;
    let room = registry.require_host_of_idle_room(session_id, room_id)?;
    let room_name = room.name.clone();
    let host_id = room.host_user_id;
    let was_invited = room.invited.contains(&user_id);

    let invited = registry
        .add_invite(room_id, user_id)
        .ok_or_else(|| SessionError::new(ErrorKind::NotFound, "room not found"))?;
    let written = with_store_retries(&state.store, |store| {
        let invited = invited.clone();
        async move {
            store
                .update_room(
                    room_id,
                    RoomPatch {
                        invited: Some(invited),
                        ..RoomPatch::default()
                    },
                )
                .await
        }
    })
    .await;
    if let Err(e) = written {
        if !was_invited {
            registry.remove_invite(room_id, user_id);
        }
        return Err(e);
    }

    // Best-effort notification: the target may be offline or slow.
    if let Some(sender) = registry.sender_for_user(user_id) {
        let event = SessionEvent::Invited {
            room_id,
            room_name,
            from_user_id: host_id,
        };
        if let Ok(value) = serde_json::to_value(&event)
            && sender.try_send(value).is_err()
        {
            tracing::debug!(user_id, "invite push skipped, channel full");
        }
    }
    Ok(json!({}))
}

async fn kick(
    state: &AppState,
    session_id: SessionId,
    room_id: RoomId,
    user_id: UserId,
) -> Result<Value, SessionError> {
    let mut registry = state.registry.lock().await;
    let room = registry.require_host_of_idle_room(session_id, room_id)?;
    if room.host_user_id == user_id {
        return Err(SessionError::new(
            ErrorKind::PermissionDenied,
            "the host cannot kick themselves",
        ));
    }
    if !room.is_member(user_id) {
        return Err(SessionError::new(ErrorKind::NotFound, "not a member"));
    }
    let before = room.members.clone();
    let members = registry
        .remove_member(room_id, user_id)
        .ok_or_else(|| SessionError::new(ErrorKind::NotFound, "room not found"))?;
    let written = with_store_retries(&state.store, |store| {
        let members = members.clone();
        async move {
            store
                .update_room(
                    room_id,
                    RoomPatch {
                        members: Some(members),
                        ..RoomPatch::default()
                    },
                )
                .await
        }
    })
    .await;
    if let Err(e) = written {
        registry.restore_member(room_id, user_id, before);
        return Err(e);
    }
    Ok(json!({}))
}

async fn start_game(
    state: &AppState,
    session_id: SessionId,
    room_id: RoomId,
) -> Result<Value, SessionError> {
    let mut registry = state.registry.lock().await;
    let room = registry.require_host_of_idle_room(session_id, room_id)?;
    if room.members.len() != 2 {
        return Err(SessionError::new(
            ErrorKind::InvalidState,
            "room needs exactly two players",
        ));
    }
    let host_id = room.host_user_id;
    let guest_id = *room
        .members
        .iter()
        .find(|&&m| m != host_id)
        .ok_or_else(|| SessionError::new(ErrorKind::InvalidState, "room has no guest"))?;

    let launched = state
        .launcher
        .lock()
        .await
        .launch(room_id, [(host_id, Role::P1), (guest_id, Role::P2)])
        .await
        .map_err(|e| SessionError::new(ErrorKind::LauncherError, format!("start failed: {e}")))?;

    // The room flips to playing only after the write-through sticks; on
    // failure it stays idle and the orphan match aborts on its own
    // handshake timeout.
    with_store_retries(&state.store, |store| async move {
        store
            .update_room(
                room_id,
                RoomPatch {
                    status: Some(RoomStatus::Playing),
                    ..RoomPatch::default()
                },
            )
            .await
    })
    .await
    .map_err(|e| {
        tracing::warn!(room_id, error = %e, "start unwound, room stays idle");
        SessionError::new(ErrorKind::LauncherError, "start failed: persistence")
    })?;

    registry.mark_playing(room_id, launched.match_id.clone(), launched.port);
    tracing::info!(
        room_id,
        match_id = %launched.match_id,
        port = launched.port,
        "match started"
    );

    if let Some(sender) = registry.sender_for_user(guest_id) {
        let event = SessionEvent::MatchReady {
            host: state.advertise_host.clone(),
            port: launched.port,
            match_id: launched.match_id.clone(),
            role: Role::P2,
        };
        if let Ok(value) = serde_json::to_value(&event)
            && sender.try_send(value).is_err()
        {
            tracing::warn!(guest_id, "match_ready push skipped, channel full");
        }
    }

    Ok(json!(StartGameReply {
        host: state.advertise_host.clone(),
        port: launched.port,
        match_id: launched.match_id,
        role: Role::P1,
    }))
}

#[allow(clippy::too_many_arguments)]
async fn match_complete(
    state: &AppState,
    match_id: String,
    room_id: RoomId,
    winner: Option<UserId>,
    results: Vec<PlayerResult>,
    start_at: u64,
    end_at: u64,
) -> Result<Value, SessionError> {
    let mut registry = state.registry.lock().await;
    // Reject unknown (match, room) pairs before touching anything.
    if registry
        .live_match(room_id)
        .is_none_or(|live| live.match_id != match_id)
    {
        return Err(SessionError::new(
            ErrorKind::PermissionDenied,
            "unknown match for room",
        ));
    }

    let users: Vec<UserId> = results.iter().map(|r| r.user_id).collect();
    with_store_retries(&state.store, |store| {
        let (match_id, users, results) = (match_id.clone(), users.clone(), results.clone());
        async move {
            store
                .create_game_log(&match_id, room_id, users, start_at, end_at, results)
                .await
        }
    })
    .await?;

    let written = with_store_retries(&state.store, |store| async move {
        store
            .update_room(
                room_id,
                RoomPatch {
                    status: Some(RoomStatus::Idle),
                    ..RoomPatch::default()
                },
            )
            .await
    })
    .await;
    if let Err(e) = written {
        // The live mirror still returns to idle; persistence catches up on
        // the next room mutation.
        tracing::warn!(room_id, error = %e, "room status write-through failed");
    }

    registry.complete_match(room_id, &match_id)?;
    tracing::info!(room_id, match_id = %match_id, winner = ?winner, "match completed");
    Ok(json!({}))
}

async fn disconnect(state: &AppState, session_id: SessionId) {
    let mut registry = state.registry.lock().await;
    if let Err(e) = depart_room(state, &mut registry, session_id, true).await {
        tracing::warn!(session_id, error = %e, "disconnect cleanup failed");
    }
    registry.remove_session(session_id);
}
