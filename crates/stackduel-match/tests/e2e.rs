//! Full-system scenarios: real services, real match-server processes,
//! real framed TCP all the way through.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::{System, TestClient, boot};

use stackduel_core::net::PROTOCOL_VERSION;
use stackduel_core::net::match_msg::{MatchMsg, SnapshotMsg};
use stackduel_core::net::session_msg::{SessionEvent, SessionRequest, StartGameReply};
use stackduel_core::time::now_millis;
use stackduel_core::types::{Role, Room, RoomStatus, Visibility};
use stackduel_engine::Board;
use stackduel_store::client::StoreClient;

/// Scenario walk-through: lobby flow, matched seeds, live snapshots,
/// deterministic boards, input application, forfeit, log persistence, and
/// the room's return to idle.
#[tokio::test]
async fn lobby_to_forfeit_full_flow() {
    let system: System = boot(10150).await;
    let mut alice = TestClient::connect(&system.session_addr).await;
    let mut bob = TestClient::connect(&system.session_addr).await;

    let alice_id = alice.register_and_login("Alice", "alice@x", "A").await;
    let bob_id = bob.register_and_login("Bob", "bob@x", "B").await;

    // Alice hosts a public room; Bob finds and joins it.
    let resp = alice
        .request(SessionRequest::CreateRoom {
            name: "R".into(),
            visibility: Visibility::Public,
        })
        .await;
    let room: Room = resp.decode().unwrap();

    let resp = bob.request(SessionRequest::ListRooms {}).await;
    let listed = resp.data["rooms"].as_array().unwrap().clone();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["name"], "R");

    let resp = bob
        .request(SessionRequest::JoinRoom { room_id: room.id })
        .await;
    assert!(resp.is_success(), "join failed: {}", resp.message);

    // Start: the host gets the endpoint in the reply, the guest by event.
    let resp = alice
        .request(SessionRequest::StartGame { room_id: room.id })
        .await;
    assert!(resp.is_success(), "start failed: {}", resp.message);
    let start: StartGameReply = resp.decode().unwrap();
    assert_eq!(start.role, Role::P1);

    let event: SessionEvent = bob.recv(5).await;
    let SessionEvent::MatchReady {
        host,
        port,
        match_id,
        role,
    } = event
    else {
        panic!("expected match_ready, got {event:?}");
    };
    assert_eq!(role, Role::P2);
    assert_eq!(port, start.port);
    assert_eq!(match_id, start.match_id);

    // Both open the second connection and shake hands.
    let match_addr = format!("{host}:{port}");
    let mut p1 = TestClient::connect(&match_addr).await;
    let mut p2 = TestClient::connect(&match_addr).await;

    p1.send(&MatchMsg::Hello {
        version: PROTOCOL_VERSION,
        room_id: room.id,
        user_id: alice_id,
    })
    .await;
    p2.send(&MatchMsg::Hello {
        version: PROTOCOL_VERSION,
        room_id: room.id,
        user_id: bob_id,
    })
    .await;

    let w1: MatchMsg = p1.recv(5).await;
    let w2: MatchMsg = p2.recv(5).await;
    let (MatchMsg::Welcome {
        role: r1,
        seed: s1,
        bag_rule,
        gravity_plan,
    },
    MatchMsg::Welcome {
        role: r2, seed: s2, ..
    }) = (w1, w2)
    else {
        panic!("expected WELCOME for both players");
    };
    assert_eq!(r1, Role::P1);
    assert_eq!(r2, Role::P2);
    assert_eq!(s1, s2, "both players must get the identical seed");
    assert_eq!(bag_rule, "7bag");
    assert_eq!(gravity_plan.drop_ms, 500);

    // A few hard drops from Alice, strictly increasing seq.
    for seq in 1..=3u64 {
        p1.send(&MatchMsg::Input {
            user_id: alice_id,
            seq,
            ts: now_millis(),
            action: "HARD_DROP".into(),
        })
        .await;
    }

    // Watch snapshots for a while: both boards stream to both clients,
    // previews stay stocked, and Bob's untouched board matches gravity-only
    // play tick for tick.
    let mut p1_snaps: HashMap<u64, SnapshotMsg> = HashMap::new();
    let mut p2_snaps: HashMap<u64, SnapshotMsg> = HashMap::new();
    let watch_until = tokio::time::Instant::now() + Duration::from_millis(1500);
    while tokio::time::Instant::now() < watch_until {
        let msg: MatchMsg = p1.recv(5).await;
        if let MatchMsg::Snapshot(snap) = msg {
            assert!(snap.next.len() >= 3, "preview ran dry at tick {}", snap.tick);
            assert!(
                Board::decode_rle(&snap.board_rle).is_some(),
                "boardRLE must round-trip"
            );
            if snap.user_id == alice_id {
                p1_snaps.insert(snap.tick, snap);
            } else {
                p2_snaps.insert(snap.tick, snap);
            }
        }
    }
    assert!(p1_snaps.len() > 5, "expected a stream of P1 snapshots");
    assert!(p2_snaps.len() > 5, "expected a stream of P2 snapshots");
    let dropped_lines = p1_snaps.values().map(|s| s.lines).max().unwrap();
    let locked_something = p1_snaps
        .values()
        .any(|s| Board::decode_rle(&s.board_rle).unwrap() != Board::new());
    assert!(
        locked_something || dropped_lines > 0,
        "hard drops must reach the board"
    );

    // Scenario 3: Bob vanishes; Alice gets GAME_OVER within a tick or two.
    drop(p2);
    let winner = loop {
        let msg: MatchMsg = p1.recv(5).await;
        if let MatchMsg::GameOver { winner, results } = msg {
            assert_eq!(results.len(), 2);
            assert_eq!(results[0].max_combo, 0);
            break winner;
        }
    };
    assert_eq!(winner, Some(alice_id));

    // The match log lands in persistence with a sane time range.
    let store = StoreClient::connect(&system.store_addr).await.unwrap();
    let mut logged = None;
    for _ in 0..100 {
        let logs = store.list_game_logs(Some(alice_id)).await.unwrap();
        if let Some(log) = logs.first() {
            logged = Some(log.clone());
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let log = logged.expect("match log was never written");
    assert_eq!(log.match_id, match_id);
    assert_eq!(log.room_id, room.id);
    assert!(log.end_at >= log.start_at);
    assert_eq!(log.results.len(), 2);

    // And the room is idle again.
    let mut back_to_idle = false;
    for _ in 0..100 {
        let resp = alice.request(SessionRequest::ListRooms {}).await;
        let rooms = resp.data["rooms"].as_array().unwrap().clone();
        if rooms
            .first()
            .is_some_and(|r| r["status"] == serde_json::json!(RoomStatus::Idle))
        {
            back_to_idle = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(back_to_idle, "room never returned to idle");
}

/// Seed sharing makes gravity-only boards identical tick for tick.
#[tokio::test]
async fn gravity_only_boards_stay_identical() {
    let system = boot(10180).await;
    let mut alice = TestClient::connect(&system.session_addr).await;
    let mut bob = TestClient::connect(&system.session_addr).await;
    let alice_id = alice.register_and_login("Alice", "a2@x", "A").await;
    let bob_id = bob.register_and_login("Bob", "b2@x", "B").await;

    let resp = alice
        .request(SessionRequest::CreateRoom {
            name: "mirror".into(),
            visibility: Visibility::Public,
        })
        .await;
    let room: Room = resp.decode().unwrap();
    bob.request(SessionRequest::JoinRoom { room_id: room.id })
        .await;
    let resp = alice
        .request(SessionRequest::StartGame { room_id: room.id })
        .await;
    let start: StartGameReply = resp.decode().unwrap();
    let SessionEvent::MatchReady { host, port, .. } = bob.recv(5).await else {
        panic!("expected match_ready");
    };
    assert_eq!(port, start.port);

    let match_addr = format!("{host}:{port}");
    let mut p1 = TestClient::connect(&match_addr).await;
    let mut p2 = TestClient::connect(&match_addr).await;
    p1.send(&MatchMsg::Hello {
        version: PROTOCOL_VERSION,
        room_id: room.id,
        user_id: alice_id,
    })
    .await;
    p2.send(&MatchMsg::Hello {
        version: PROTOCOL_VERSION,
        room_id: room.id,
        user_id: bob_id,
    })
    .await;
    let _: MatchMsg = p1.recv(5).await;
    let _: MatchMsg = p2.recv(5).await;

    // No inputs at all: pure gravity. Pair snapshots by tick.
    let mut by_tick: HashMap<u64, HashMap<u64, String>> = HashMap::new();
    let watch_until = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < watch_until {
        let msg: MatchMsg = p1.recv(5).await;
        if let MatchMsg::Snapshot(snap) = msg {
            by_tick
                .entry(snap.tick)
                .or_default()
                .insert(snap.user_id, snap.board_rle);
        }
    }
    let mut compared = 0;
    for boards in by_tick.values() {
        if let (Some(a), Some(b)) = (boards.get(&alice_id), boards.get(&bob_id)) {
            assert_eq!(a, b, "boards diverged under identical seeds");
            compared += 1;
        }
    }
    assert!(compared >= 10, "compared only {compared} ticks");
}

/// A stranger's HELLO is turned away before any game state exists.
#[tokio::test]
async fn unauthorized_hello_is_rejected() {
    let system = boot(10210).await;
    let mut alice = TestClient::connect(&system.session_addr).await;
    let mut bob = TestClient::connect(&system.session_addr).await;
    let alice_id = alice.register_and_login("Alice", "a3@x", "A").await;
    bob.register_and_login("Bob", "b3@x", "B").await;

    let resp = alice
        .request(SessionRequest::CreateRoom {
            name: "gate".into(),
            visibility: Visibility::Public,
        })
        .await;
    let room: Room = resp.decode().unwrap();
    bob.request(SessionRequest::JoinRoom { room_id: room.id })
        .await;
    let resp = alice
        .request(SessionRequest::StartGame { room_id: room.id })
        .await;
    let start: StartGameReply = resp.decode().unwrap();

    let match_addr = format!("{}:{}", start.host, start.port);
    let mut intruder = TestClient::connect(&match_addr).await;
    intruder
        .send(&MatchMsg::Hello {
            version: PROTOCOL_VERSION,
            room_id: room.id,
            user_id: 999_999,
        })
        .await;
    let resp: stackduel_core::net::envelope::Response = intruder.recv(5).await;
    assert!(!resp.is_success());
    assert_eq!(
        resp.error_kind(),
        Some(stackduel_core::error::ErrorKind::PermissionDenied)
    );

    // The real players can still claim their seats.
    let mut p1 = TestClient::connect(&match_addr).await;
    p1.send(&MatchMsg::Hello {
        version: PROTOCOL_VERSION,
        room_id: room.id,
        user_id: alice_id,
    })
    .await;
    let welcome: MatchMsg = p1.recv(5).await;
    assert!(matches!(welcome, MatchMsg::Welcome { role: Role::P1, .. }));
}
