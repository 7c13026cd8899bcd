//! Integration tests for the realtime match server
//!
//! Each test boots a full server on an ephemeral port and drives it through
//! real WebSocket connections, speaking the same wire protocol as production
//! clients.

use futures_util::{SinkExt, StreamExt};
use server::auth::sign_token;
use server::backend::{Backend, MatchRecord, MemoryBackend, Profile, SeasonWindow};
use server::game::MatchMode;
use server::server::{Server, StatusHandle};
use shared::{
    ClientEvent, EloUpdate, ErrorCode, Feedback, KickReason, MatchOutcome, OpponentInfo,
    RoomErrorKind, ServerEvent, TurnSnapshot, TURN_MILLIS,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const JWT_SECRET: &str = "integration-secret";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// SESSION AND AUTHENTICATION TESTS
mod session_tests {
    use super::*;

    /// Tests that signing in from a second device displaces the first
    #[tokio::test]
    async fn second_login_displaces_first() {
        let (addr, _status) = start_server(Arc::new(MemoryBackend::new())).await;
        let token = account_token("user-1");

        let mut first = connect(addr, &format!("token={}", token)).await;
        // Let the first connection register before the second arrives
        sleep(Duration::from_millis(150)).await;
        let mut second = connect(addr, &format!("token={}", token)).await;

        assert_eq!(wait_for_kick(&mut first).await, KickReason::AnotherLogin);
        expect_closed(first).await;

        // The surviving connection still works
        send(&mut second, &ClientEvent::CreateRoom { name: None }).await;
        let room_id = wait_for(&mut second, |event| match event {
            ServerEvent::RoomCreated { room_id } => Some(room_id),
            _ => None,
        })
        .await;
        assert_eq!(room_id.len(), 6);
    }

    /// Tests that a token minted under an old session is refused at connect
    #[tokio::test]
    async fn stale_session_token_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_session("user-1", "session-current").await;
        let (addr, _status) = start_server(Arc::clone(&backend)).await;

        let stale =
            sign_token("user-1", Some("session-old"), JWT_SECRET).expect("token should sign");
        let mut socket = connect(addr, &format!("token={}", stale)).await;
        assert_eq!(wait_for_kick(&mut socket).await, KickReason::SessionRevoked);
        expect_closed(socket).await;

        // A token minted under the current session is untouched
        let fresh =
            sign_token("user-1", Some("session-current"), JWT_SECRET).expect("token should sign");
        let mut socket = connect(addr, &format!("token={}", fresh)).await;
        send(&mut socket, &ClientEvent::CreateRoom { name: None }).await;
        wait_for(&mut socket, |event| match event {
            ServerEvent::RoomCreated { .. } => Some(()),
            _ => None,
        })
        .await;
    }

    /// Tests that refreshing auth on a guest connection takes over the account
    #[tokio::test]
    async fn auth_refresh_moves_the_account() {
        let (addr, _status) = start_server(Arc::new(MemoryBackend::new())).await;
        let token = account_token("user-1");

        let mut first = connect(addr, &format!("token={}", token)).await;
        sleep(Duration::from_millis(150)).await;

        let mut second = connect(addr, "").await;
        send(&mut second, &ClientEvent::RefreshAuth { token }).await;

        assert_eq!(wait_for_kick(&mut first).await, KickReason::AnotherLogin);

        // The refreshed connection now owns the account, so it may queue
        // ranked and meet another account in a match
        send(&mut second, &ClientEvent::RankedEnqueue).await;
        sleep(Duration::from_millis(150)).await;
        let mut partner = connect(addr, &format!("token={}", account_token("user-2"))).await;
        send(&mut partner, &ClientEvent::RankedEnqueue).await;

        let (_, ranked, _) = wait_for_match_started(&mut second).await;
        assert!(ranked);
        wait_for_match_started(&mut partner).await;
    }
}

/// RANKED QUEUE TESTS
mod ranked_queue_tests {
    use super::*;

    /// Tests that paired players each see the other's profile and the first
    /// entry holds the opening turn
    #[tokio::test]
    async fn pairing_crosses_profiles() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .insert_profile("user-a", profile("Alice", 300, "Bronze", "I"))
            .await;
        backend
            .insert_profile("user-b", profile("Bob", 120, "Bronze", "III"))
            .await;
        let (addr, _status) = start_server(Arc::clone(&backend)).await;

        let mut a = connect(addr, &format!("token={}", account_token("user-a"))).await;
        let mut b = connect(addr, &format!("token={}", account_token("user-b"))).await;

        send(&mut a, &ClientEvent::RankedEnqueue).await;
        // Queue order decides seating, so the first entry must land first
        sleep(Duration::from_millis(150)).await;
        send(&mut b, &ClientEvent::RankedEnqueue).await;

        let (_, ranked, opponent) = wait_for_match_started(&mut a).await;
        assert!(ranked);
        assert_eq!(opponent.display_name, "Bob");
        assert_eq!(opponent.elo_points, 120);

        let (_, _, opponent) = wait_for_match_started(&mut b).await;
        assert_eq!(opponent.display_name, "Alice");
        assert_eq!(opponent.elo_points, 300);

        let snapshot = wait_for_turn(&mut a).await;
        assert!(snapshot.your_turn);
        assert!(snapshot.waiting_for_secrets);
        assert_eq!(snapshot.time_left_ms, 0);
        assert_eq!(snapshot.opponent, "Bob");
        assert_eq!(snapshot.your_tier, "Bronze");
        assert_eq!(snapshot.your_rank, "I");
        assert_eq!(snapshot.opponent_rank, "III");

        let snapshot = wait_for_turn(&mut b).await;
        assert!(!snapshot.your_turn);
        assert_eq!(snapshot.opponent, "Alice");
    }

    /// Tests that guests are refused from the ranked queue
    #[tokio::test]
    async fn guests_cannot_queue_ranked() {
        let (addr, _status) = start_server(Arc::new(MemoryBackend::new())).await;
        let mut guest = connect(addr, "").await;

        send(&mut guest, &ClientEvent::RankedEnqueue).await;
        assert_eq!(
            wait_for_match_error(&mut guest).await,
            ErrorCode::AuthRequired
        );
    }

    /// Tests that ranked queueing is refused while the season is paused
    #[tokio::test]
    async fn queue_closed_outside_season() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_season(SeasonWindow::Paused).await;
        let (addr, _status) = start_server(Arc::clone(&backend)).await;

        let mut socket = connect(addr, &format!("token={}", account_token("user-1"))).await;
        send(&mut socket, &ClientEvent::RankedEnqueue).await;
        assert_eq!(
            wait_for_match_error(&mut socket).await,
            ErrorCode::RankedPaused
        );
    }

    /// Tests that rapid-fire enqueue requests are throttled
    #[tokio::test]
    async fn enqueue_spam_is_throttled() {
        let (addr, _status) = start_server(Arc::new(MemoryBackend::new())).await;
        let mut socket = connect(addr, &format!("token={}", account_token("user-1"))).await;

        for _ in 0..3 {
            send(&mut socket, &ClientEvent::RankedEnqueue).await;
        }
        assert_eq!(
            wait_for_match_error(&mut socket).await,
            ErrorCode::TooManyRequests
        );
    }
}

/// MATCH PLAY TESTS
mod match_play_tests {
    use super::*;

    /// Tests a complete casual match: secret exchange, countdown ticks, and
    /// a winning guess
    #[tokio::test]
    async fn casual_match_plays_to_victory() {
        let (addr, _status) = start_server(Arc::new(MemoryBackend::new())).await;
        let (mut a, mut b) = start_casual_pair(addr).await;

        send(
            &mut a,
            &ClientEvent::SetSecret {
                secret: "1234".to_string(),
            },
        )
        .await;
        wait_for(&mut a, |event| match event {
            ServerEvent::SecretSet => Some(()),
            _ => None,
        })
        .await;
        let (yours, opponents) = wait_for_secret_status(&mut a).await;
        assert!(yours && !opponents);
        let (yours, opponents) = wait_for_secret_status(&mut b).await;
        assert!(!yours && opponents);

        send(
            &mut b,
            &ClientEvent::SetSecret {
                secret: "5678".to_string(),
            },
        )
        .await;
        let (yours, opponents) = wait_for_secret_status(&mut b).await;
        assert!(yours && opponents);

        let snapshot = wait_for_active_turn(&mut a).await;
        assert!(snapshot.your_turn);
        assert!(snapshot.time_left_ms > 0);
        assert!(snapshot.opponent.starts_with("Guest-"));
        let snapshot = wait_for_active_turn(&mut b).await;
        assert!(!snapshot.your_turn);

        // The countdown broadcast reaches both seats
        let (time_left, your_turn) = wait_for(&mut a, |event| match event {
            ServerEvent::Tick {
                time_left_ms,
                your_turn,
                ..
            } => Some((time_left_ms, your_turn)),
            _ => None,
        })
        .await;
        assert!(your_turn);
        assert!(time_left > 0 && time_left <= TURN_MILLIS);

        send(
            &mut a,
            &ClientEvent::Guess {
                guess: "5678".to_string(),
            },
        )
        .await;
        let feedback = wait_for_guess_result(&mut a).await;
        assert!(feedback.is_winning());
        let (guess, feedback) = wait_for_opponent_guess(&mut b).await;
        assert_eq!(guess, "5678");
        assert!(feedback.is_winning());

        let (result, update) = wait_for_match_end(&mut a).await;
        assert_eq!(result, MatchOutcome::Win);
        assert!(update.is_none());
        let (result, update) = wait_for_match_end(&mut b).await;
        assert_eq!(result, MatchOutcome::Loss);
        assert!(update.is_none());
    }

    /// Tests that guessing out of turn is refused and a miss passes the turn
    #[tokio::test]
    async fn turn_order_is_enforced() {
        let (addr, _status) = start_server(Arc::new(MemoryBackend::new())).await;
        let (mut a, mut b) = start_casual_pair(addr).await;
        exchange_secrets(&mut a, &mut b, "1234", "5678").await;

        // Seat 1 may not open the match
        send(
            &mut b,
            &ClientEvent::Guess {
                guess: "0000".to_string(),
            },
        )
        .await;
        assert_eq!(wait_for_match_error(&mut b).await, ErrorCode::NotYourTurn);

        // A miss from seat 0 hands the turn over
        send(
            &mut a,
            &ClientEvent::Guess {
                guess: "1111".to_string(),
            },
        )
        .await;
        let feedback = wait_for_guess_result(&mut a).await;
        assert!(!feedback.is_winning());
        wait_for_opponent_guess(&mut b).await;

        let snapshot = wait_for_active_turn(&mut a).await;
        assert!(!snapshot.your_turn);
        assert!(snapshot.last_guess.is_none());
        let snapshot = wait_for_active_turn(&mut b).await;
        assert!(snapshot.your_turn);
        assert_eq!(snapshot.last_guess.as_deref(), Some("1111"));

        // Now seat 1 may play, and wins outright
        send(
            &mut b,
            &ClientEvent::Guess {
                guess: "1234".to_string(),
            },
        )
        .await;
        let feedback = wait_for_guess_result(&mut b).await;
        assert!(feedback.is_winning());

        let (result, _) = wait_for_match_end(&mut b).await;
        assert_eq!(result, MatchOutcome::Win);
        let (result, _) = wait_for_match_end(&mut a).await;
        assert_eq!(result, MatchOutcome::Loss);
    }

    /// Tests that leaving a match concedes it
    #[tokio::test]
    async fn leaving_concedes_the_match() {
        let (addr, _status) = start_server(Arc::new(MemoryBackend::new())).await;
        let (mut a, mut b) = start_casual_pair(addr).await;

        send(&mut b, &ClientEvent::LeaveMatch).await;

        let (result, _) = wait_for_match_end(&mut a).await;
        assert_eq!(result, MatchOutcome::Win);
        let (result, _) = wait_for_match_end(&mut b).await;
        assert_eq!(result, MatchOutcome::Loss);
    }

    /// Tests that dropping the connection forfeits a running match
    #[tokio::test]
    async fn disconnect_forfeits_the_match() {
        let (addr, _status) = start_server(Arc::new(MemoryBackend::new())).await;
        let (mut a, b) = start_casual_pair(addr).await;

        drop(b);

        let (result, update) = wait_for_match_end(&mut a).await;
        assert_eq!(result, MatchOutcome::Win);
        assert!(update.is_none());
    }
}

/// BOT OPPONENT TESTS
mod bot_tests {
    use super::*;

    /// Tests that a lone casual player is matched with the computer, which
    /// then plays its turn
    #[tokio::test]
    async fn lone_casual_player_meets_the_bot() {
        let (addr, _status) = start_server(Arc::new(MemoryBackend::new())).await;
        let mut player = connect(addr, "").await;

        send(&mut player, &ClientEvent::CasualEnqueue).await;

        let (_, ranked, opponent) = wait_for_match_started(&mut player).await;
        assert!(!ranked);
        assert_eq!(opponent.display_name, "CPU (Medium)");

        let snapshot = wait_for_turn(&mut player).await;
        assert!(snapshot.waiting_for_secrets);
        assert!(snapshot.opponent_secret_set);
        assert!(!snapshot.your_secret_set);

        send(
            &mut player,
            &ClientEvent::SetSecret {
                secret: "4321".to_string(),
            },
        )
        .await;
        let snapshot = wait_for_active_turn(&mut player).await;
        assert!(snapshot.your_turn);

        // A deliberate miss hands the turn to the computer
        send(
            &mut player,
            &ClientEvent::Guess {
                guess: "0000".to_string(),
            },
        )
        .await;
        let feedback = wait_for_guess_result(&mut player).await;
        assert!(!feedback.is_winning());

        // The computer opens with the lowest code still in its pool
        let (guess, feedback) = wait_for_opponent_guess(&mut player).await;
        assert_eq!(guess, "0000");
        assert_eq!(
            feedback,
            Feedback {
                correct_positions: 0,
                correct_digits: 0
            }
        );

        let snapshot = wait_for_active_turn(&mut player).await;
        assert!(snapshot.your_turn);
    }
}

/// PRIVATE ROOM TESTS
mod room_tests {
    use super::*;

    /// Tests the whole room flow: create, join, host-only start
    #[tokio::test]
    async fn room_flow_from_create_to_start() {
        let (addr, _status) = start_server(Arc::new(MemoryBackend::new())).await;

        let mut host = connect(addr, "").await;
        send(
            &mut host,
            &ClientEvent::CreateRoom {
                name: Some("after work".to_string()),
            },
        )
        .await;
        let room_id = wait_for(&mut host, |event| match event {
            ServerEvent::RoomCreated { room_id } => Some(room_id),
            _ => None,
        })
        .await;
        assert_eq!(room_id.len(), 6);
        assert!(room_id.chars().all(|c| c.is_ascii_digit()));

        let (players, is_host) = wait_for_room_status(&mut host).await;
        assert_eq!(players.len(), 1);
        assert!(is_host);

        let mut friend = connect(addr, "").await;
        send(
            &mut friend,
            &ClientEvent::JoinRoom {
                room_id: room_id.clone(),
            },
        )
        .await;
        wait_for(&mut friend, |event| match event {
            ServerEvent::RoomJoined { .. } => Some(()),
            _ => None,
        })
        .await;
        let (players, is_host) = wait_for_room_status(&mut friend).await;
        assert_eq!(players.len(), 2);
        assert!(!is_host);

        // Only the host can launch the room
        send(&mut friend, &ClientEvent::StartRoom).await;
        assert_eq!(
            wait_for_room_error(&mut friend).await,
            RoomErrorKind::NotHost
        );

        send(&mut host, &ClientEvent::StartRoom).await;
        let (_, ranked, opponent) = wait_for_match_started(&mut host).await;
        assert!(!ranked);
        assert!(opponent.display_name.starts_with("Guest-"));
        wait_for_match_started(&mut friend).await;
    }

    /// Tests that joining a room that does not exist fails cleanly
    #[tokio::test]
    async fn joining_an_unknown_room_fails() {
        let (addr, _status) = start_server(Arc::new(MemoryBackend::new())).await;
        let mut socket = connect(addr, "").await;

        // Codes are six digits starting at 100000, so this can never exist
        send(
            &mut socket,
            &ClientEvent::JoinRoom {
                room_id: "000000".to_string(),
            },
        )
        .await;
        assert_eq!(
            wait_for_room_error(&mut socket).await,
            RoomErrorKind::NotFound
        );
    }
}

/// RANKED RESULT TESTS
mod rating_tests {
    use super::*;

    /// Tests that a ranked victory updates ratings, history, and daily plays
    #[tokio::test]
    async fn victory_updates_both_ratings() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .insert_profile("user-a", profile("Alice", 300, "Bronze", "I"))
            .await;
        backend
            .insert_profile("user-b", profile("Bob", 120, "Bronze", "III"))
            .await;
        let (addr, _status) = start_server(Arc::clone(&backend)).await;

        let (mut a, mut b) = start_ranked_pair(addr).await;
        exchange_secrets(&mut a, &mut b, "1234", "5678").await;

        send(
            &mut a,
            &ClientEvent::Guess {
                guess: "5678".to_string(),
            },
        )
        .await;
        let feedback = wait_for_guess_result(&mut a).await;
        assert!(feedback.is_winning());

        // 180-point gap: the favourite earns 25 - 4, the loser drops 15 + 2
        let (result, update) = wait_for_match_end(&mut a).await;
        assert_eq!(result, MatchOutcome::Win);
        let update = update.expect("ranked win should carry rating changes");
        assert_eq!(update.winner.user_id, "user-a");
        assert_eq!(update.winner.delta, 21);
        assert_eq!(update.winner.elo_points, 321);
        assert_eq!(update.loser.user_id, "user-b");
        assert_eq!(update.loser.delta, -17);
        assert_eq!(update.loser.elo_points, 103);
        assert_eq!(update.loser.division_tier, "Bronze");
        assert_eq!(update.loser.division_rank, "III");

        let (result, update) = wait_for_match_end(&mut b).await;
        assert_eq!(result, MatchOutcome::Loss);
        assert_eq!(update.expect("loser sees the same update").winner.delta, 21);

        let rows = wait_for_history(&backend, 1).await;
        assert_eq!(rows[0].winner_user_id, "user-a");
        assert_eq!(rows[0].loser_user_id, "user-b");
        assert!(rows[0].ranked);
        assert_eq!(rows[0].mode, MatchMode::Ranked);

        let alice = backend
            .stored_profile("user-a")
            .await
            .expect("winner profile persisted");
        assert_eq!(alice.elo_points, 321);

        // Daily plays are keyed by the device that reported them; the second
        // seat's counter is written last
        for _ in 0..50 {
            if backend.daily_total("device-b").await == 1 {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(backend.daily_total("device-a").await, 1);
        assert_eq!(backend.daily_total("device-b").await, 1);
    }

    /// Tests that a rating outage still delivers results, without rating
    /// changes or persistence
    #[tokio::test]
    async fn rating_outage_degrades_gracefully() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .insert_profile("user-a", profile("Alice", 300, "Bronze", "I"))
            .await;
        backend
            .insert_profile("user-b", profile("Bob", 120, "Bronze", "III"))
            .await;
        backend.set_rating_failure(true).await;
        let (addr, _status) = start_server(Arc::clone(&backend)).await;

        let (mut a, mut b) = start_ranked_pair(addr).await;
        exchange_secrets(&mut a, &mut b, "1234", "5678").await;

        send(
            &mut a,
            &ClientEvent::Guess {
                guess: "5678".to_string(),
            },
        )
        .await;

        let (result, update) = wait_for_match_end(&mut a).await;
        assert_eq!(result, MatchOutcome::Win);
        assert!(update.is_none());
        let (result, update) = wait_for_match_end(&mut b).await;
        assert_eq!(result, MatchOutcome::Loss);
        assert!(update.is_none());

        // With no rating outcome, nothing else is persisted either
        sleep(Duration::from_millis(300)).await;
        assert!(backend.history().await.is_empty());
        let alice = backend
            .stored_profile("user-a")
            .await
            .expect("profile still stored");
        assert_eq!(alice.elo_points, 300);
        assert_eq!(backend.daily_total("device-a").await, 0);
    }
}

/// STATUS TESTS
mod status_tests {
    use super::*;

    /// Tests that the status snapshot counts players, rooms, and the queue
    #[tokio::test]
    async fn status_counts_live_state() {
        let (addr, status) = start_server(Arc::new(MemoryBackend::new())).await;

        let mut account = connect(addr, &format!("token={}", account_token("user-1"))).await;
        let _guest = connect(addr, "").await;
        sleep(Duration::from_millis(150)).await;

        send(&mut account, &ClientEvent::CreateRoom { name: None }).await;
        wait_for(&mut account, |event| match event {
            ServerEvent::RoomCreated { .. } => Some(()),
            _ => None,
        })
        .await;

        let snapshot = status.fetch().await.expect("server should answer");
        assert_eq!(snapshot.players, 1, "guests are not counted as players");
        assert_eq!(snapshot.rooms, 1);
        assert_eq!(snapshot.matches, 0);
        assert_eq!(snapshot.queue, 0);

        send(&mut account, &ClientEvent::RankedEnqueue).await;
        sleep(Duration::from_millis(200)).await;

        let snapshot = status.fetch().await.expect("server should answer");
        assert_eq!(snapshot.queue, 1);
        assert_eq!(snapshot.matches, 0);
    }
}

// HELPER FUNCTIONS

/// Boots a server with the given backend on an ephemeral port.
async fn start_server(backend: Arc<MemoryBackend>) -> (SocketAddr, StatusHandle) {
    let mut server = Server::bind(
        "127.0.0.1:0",
        JWT_SECRET.to_string(),
        backend as Arc<dyn Backend>,
    )
    .await
    .expect("failed to bind test server");
    let addr = server
        .local_addr()
        .expect("listener should report its address");
    let status = server.status_handle();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    (addr, status)
}

async fn connect(addr: SocketAddr, query: &str) -> Socket {
    let url = if query.is_empty() {
        format!("ws://{}/", addr)
    } else {
        format!("ws://{}/?{}", addr, query)
    };
    let (socket, _) = connect_async(url)
        .await
        .expect("websocket handshake failed");
    socket
}

fn account_token(user_id: &str) -> String {
    sign_token(user_id, None, JWT_SECRET).expect("token should sign")
}

fn profile(name: &str, elo_points: i32, tier: &str, rank: &str) -> Profile {
    Profile {
        display_name: name.to_string(),
        elo_points,
        division_tier: tier.to_string(),
        division_rank: rank.to_string(),
        avatar_asset: None,
    }
}

async fn send(socket: &mut Socket, event: &ClientEvent) {
    let text = serde_json::to_string(event).expect("client event should encode");
    socket
        .send(Message::Text(text))
        .await
        .expect("websocket send failed");
}

/// Reads frames until `accept` returns a value. Unrelated events (countdown
/// ticks, room updates) are skipped, so tests only assert what they care
/// about. Panics if nothing acceptable arrives within five seconds.
async fn wait_for<T>(socket: &mut Socket, accept: impl Fn(ServerEvent) -> Option<T>) -> T {
    timeout(Duration::from_secs(5), async {
        loop {
            let frame = socket
                .next()
                .await
                .expect("connection closed before the expected event")
                .expect("websocket read failed");
            if let Message::Text(text) = frame {
                let event: ServerEvent =
                    serde_json::from_str(&text).expect("server sent an undecodable event");
                if let Some(value) = accept(event) {
                    return value;
                }
            }
        }
    })
    .await
    .expect("timed out waiting for a server event")
}

async fn wait_for_kick(socket: &mut Socket) -> KickReason {
    wait_for(socket, |event| match event {
        ServerEvent::Kicked { reason } => Some(reason),
        _ => None,
    })
    .await
}

async fn wait_for_match_started(socket: &mut Socket) -> (String, bool, OpponentInfo) {
    wait_for(socket, |event| match event {
        ServerEvent::MatchStarted {
            match_id,
            ranked,
            opponent,
        } => Some((match_id, ranked, opponent)),
        _ => None,
    })
    .await
}

async fn wait_for_turn(socket: &mut Socket) -> TurnSnapshot {
    wait_for(socket, |event| match event {
        ServerEvent::Turn(snapshot) => Some(snapshot),
        _ => None,
    })
    .await
}

/// Reads through to a turn snapshot with the countdown running.
async fn wait_for_active_turn(socket: &mut Socket) -> TurnSnapshot {
    wait_for(socket, |event| match event {
        ServerEvent::Turn(snapshot) if !snapshot.waiting_for_secrets => Some(snapshot),
        _ => None,
    })
    .await
}

async fn wait_for_secret_status(socket: &mut Socket) -> (bool, bool) {
    wait_for(socket, |event| match event {
        ServerEvent::SecretStatus {
            your_secret_set,
            opponent_secret_set,
        } => Some((your_secret_set, opponent_secret_set)),
        _ => None,
    })
    .await
}

async fn wait_for_guess_result(socket: &mut Socket) -> Feedback {
    wait_for(socket, |event| match event {
        ServerEvent::GuessResult { feedback, .. } => Some(feedback),
        _ => None,
    })
    .await
}

async fn wait_for_opponent_guess(socket: &mut Socket) -> (String, Feedback) {
    wait_for(socket, |event| match event {
        ServerEvent::OpponentGuessed { guess, feedback } => Some((guess, feedback)),
        _ => None,
    })
    .await
}

async fn wait_for_match_end(socket: &mut Socket) -> (MatchOutcome, Option<EloUpdate>) {
    wait_for(socket, |event| match event {
        ServerEvent::MatchEnded { result, elo_update } => Some((result, elo_update)),
        _ => None,
    })
    .await
}

async fn wait_for_match_error(socket: &mut Socket) -> ErrorCode {
    wait_for(socket, |event| match event {
        ServerEvent::MatchError { error } => Some(error),
        _ => None,
    })
    .await
}

async fn wait_for_room_status(socket: &mut Socket) -> (Vec<String>, bool) {
    wait_for(socket, |event| match event {
        ServerEvent::RoomStatus {
            players,
            you_are_host,
            ..
        } => Some((players, you_are_host)),
        _ => None,
    })
    .await
}

async fn wait_for_room_error(socket: &mut Socket) -> RoomErrorKind {
    wait_for(socket, |event| match event {
        ServerEvent::RoomError { error } => Some(error),
        _ => None,
    })
    .await
}

/// Drains a socket until the server closes it, failing if more events come.
async fn expect_closed(mut socket: Socket) {
    timeout(Duration::from_secs(5), async {
        while let Some(frame) = socket.next().await {
            match frame {
                Ok(Message::Text(text)) => panic!("unexpected event after close: {}", text),
                Ok(_) => {}
                Err(_) => break,
            }
        }
    })
    .await
    .expect("server never closed the socket");
}

/// Connects two guests and pairs them through the casual queue. The first
/// socket holds seat 0 and the opening turn.
async fn start_casual_pair(addr: SocketAddr) -> (Socket, Socket) {
    let mut a = connect(addr, "").await;
    let mut b = connect(addr, "").await;

    send(&mut a, &ClientEvent::CasualEnqueue).await;
    // Queue order decides seating, so the first entry must land first
    sleep(Duration::from_millis(100)).await;
    send(&mut b, &ClientEvent::CasualEnqueue).await;

    let (_, ranked, opponent) = wait_for_match_started(&mut a).await;
    assert!(!ranked);
    assert!(
        opponent.display_name.starts_with("Guest-"),
        "expected a human opponent, got {}",
        opponent.display_name
    );
    wait_for_match_started(&mut b).await;

    let snapshot = wait_for_turn(&mut a).await;
    assert!(snapshot.your_turn);
    wait_for_turn(&mut b).await;
    (a, b)
}

/// Connects `user-a` and `user-b` (with device ids) and pairs them through
/// the ranked queue, `user-a` in seat 0.
async fn start_ranked_pair(addr: SocketAddr) -> (Socket, Socket) {
    let mut a = connect(
        addr,
        &format!("token={}&deviceId=device-a", account_token("user-a")),
    )
    .await;
    let mut b = connect(
        addr,
        &format!("token={}&deviceId=device-b", account_token("user-b")),
    )
    .await;

    send(&mut a, &ClientEvent::RankedEnqueue).await;
    sleep(Duration::from_millis(150)).await;
    send(&mut b, &ClientEvent::RankedEnqueue).await;

    let (_, ranked, _) = wait_for_match_started(&mut a).await;
    assert!(ranked);
    wait_for_match_started(&mut b).await;
    wait_for_turn(&mut a).await;
    wait_for_turn(&mut b).await;
    (a, b)
}

/// Sets both secrets and consumes events up to the first running-countdown
/// snapshot on each socket.
async fn exchange_secrets(a: &mut Socket, b: &mut Socket, secret_a: &str, secret_b: &str) {
    send(
        a,
        &ClientEvent::SetSecret {
            secret: secret_a.to_string(),
        },
    )
    .await;
    wait_for(a, |event| match event {
        ServerEvent::SecretSet => Some(()),
        _ => None,
    })
    .await;
    send(
        b,
        &ClientEvent::SetSecret {
            secret: secret_b.to_string(),
        },
    )
    .await;
    wait_for(b, |event| match event {
        ServerEvent::SecretSet => Some(()),
        _ => None,
    })
    .await;

    wait_for_active_turn(a).await;
    wait_for_active_turn(b).await;
}

/// Polls until the backend shows `want` history rows, since persistence
/// happens off the main loop.
async fn wait_for_history(backend: &MemoryBackend, want: usize) -> Vec<MatchRecord> {
    for _ in 0..50 {
        let rows = backend.history().await;
        if rows.len() >= want {
            return rows;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("backend never recorded {} match(es)", want);
}
