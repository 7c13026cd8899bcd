//! Main server loop coordinating matchmaking, rooms, and live matches
//!
//! Everything mutable lives inside [`Server`] and is touched only by its
//! `run` loop, which interleaves inbound connection messages with a global
//! 250ms tick. Deferred work (casual-queue deadlines, bot moves) is a
//! spawned sleep that sends a message back into the same loop and gets
//! re-validated on arrival, so no timer ever mutates state directly.

use log::{debug, info, warn};
use serde::Serialize;
use shared::{
    evaluate_guess, is_valid_code, ClientEvent, ErrorCode, KickReason, MatchOutcome,
    ServerEvent, BOT_MAX_DELAY_MILLIS, BOT_MIN_DELAY_MILLIS, CASUAL_BOT_WAIT_MILLIS, TICK_MILLIS,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use uuid::Uuid;

use crate::auth;
use crate::backend::{Backend, MatchRecord, Profile, SeasonWindow};
use crate::bot::random_bot_secret;
use crate::game::{Match, MatchMode, MatchPlayer, MatchTable};
use crate::matchmaker::Matchmaker;
use crate::network::{self, ConnId, Inbound, Outbound, OutboundSender};
use crate::rate_limit::{FixedWindowLimiter, ENQUEUE_LIMIT, PLAY_LIMIT};
use crate::registry::{self, Connection, Registry};
use crate::rooms::{RoomMember, RoomTable};
use rand::Rng;

/// Point-in-time counters exposed for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RealtimeStatus {
    /// Distinct signed-in accounts currently connected.
    pub players: usize,
    pub rooms: usize,
    pub matches: usize,
    /// Connections waiting in the ranked queue.
    pub queue: usize,
}

/// Cloneable handle for querying a running server from outside its loop.
#[derive(Clone)]
pub struct StatusHandle {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl StatusHandle {
    /// Requests a snapshot. `None` when the server loop has stopped.
    pub async fn fetch(&self) -> Option<RealtimeStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Inbound::Status { reply }).ok()?;
        rx.await.ok()
    }
}

/// Main server owning all realtime state
pub struct Server {
    listener: Option<TcpListener>,
    jwt_secret: String,
    backend: Arc<dyn Backend>,

    registry: Registry,
    matchmaker: Matchmaker,
    rooms: RoomTable,
    matches: MatchTable,

    limit_enqueue_ranked: FixedWindowLimiter,
    limit_enqueue_casual: FixedWindowLimiter,
    limit_set_secret: FixedWindowLimiter,
    limit_guess: FixedWindowLimiter,

    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
}

impl Server {
    pub async fn bind(
        addr: &str,
        jwt_secret: String,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            jwt_secret,
            backend,
            registry: Registry::new(),
            matchmaker: Matchmaker::new(),
            rooms: RoomTable::new(),
            matches: MatchTable::new(),
            limit_enqueue_ranked: FixedWindowLimiter::with_limit(ENQUEUE_LIMIT),
            limit_enqueue_casual: FixedWindowLimiter::with_limit(ENQUEUE_LIMIT),
            limit_set_secret: FixedWindowLimiter::with_limit(PLAY_LIMIT),
            limit_guess: FixedWindowLimiter::with_limit(PLAY_LIMIT),
            inbound_tx,
            inbound_rx,
        })
    }

    /// Address the listener actually bound to. Handy with port 0.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            tx: self.inbound_tx.clone(),
        }
    }

    /// Runs the accept loop and the main event loop until the process stops.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = self.listener.take().ok_or("server is already running")?;
        network::spawn_acceptor(listener, self.inbound_tx.clone());

        let mut tick = interval(Duration::from_millis(TICK_MILLIS));
        info!("Game server started");

        loop {
            tokio::select! {
                message = self.inbound_rx.recv() => {
                    match message {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!("Inbound channel closed, stopping");
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    self.run_tick();
                }
            }
        }

        Ok(())
    }

    async fn handle_message(&mut self, message: Inbound) {
        match message {
            Inbound::Connected {
                conn,
                token,
                device_id,
                tx,
            } => self.handle_connected(conn, token, device_id, tx).await,
            Inbound::Event { conn, event } => self.handle_event(conn, event).await,
            Inbound::Disconnected { conn } => self.handle_disconnect(conn),
            Inbound::CasualDeadline { conn } => self.handle_casual_deadline(conn).await,
            Inbound::BotDeadline { match_id, seq } => self.handle_bot_deadline(match_id, seq),
            Inbound::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    async fn handle_event(&mut self, conn: ConnId, event: ClientEvent) {
        debug!("connection {}: {:?}", conn, event);
        match event {
            ClientEvent::RankedEnqueue => self.handle_ranked_enqueue(conn).await,
            ClientEvent::CasualEnqueue => self.handle_casual_enqueue(conn).await,
            ClientEvent::SetSecret { secret } => self.handle_set_secret(conn, secret),
            ClientEvent::Guess { guess } => self.handle_guess(conn, guess),
            ClientEvent::LeaveMatch => self.handle_leave(conn),
            ClientEvent::CreateRoom { name } => self.handle_room_create(conn, name).await,
            ClientEvent::JoinRoom { room_id } => self.handle_room_join(conn, room_id).await,
            ClientEvent::StartRoom => self.handle_room_start(conn).await,
            ClientEvent::RefreshAuth { token } => self.handle_auth_refresh(conn, token).await,
        }
    }

    // ---- connection lifecycle ----

    async fn handle_connected(
        &mut self,
        conn: ConnId,
        token: Option<String>,
        device_id: Option<String>,
        tx: OutboundSender,
    ) {
        let claims = token
            .as_deref()
            .and_then(|t| auth::verify_token(t, &self.jwt_secret));
        let (user_id, session_id) = match claims {
            Some(claims) => (claims.user_id, claims.session_id),
            None => (registry::mint_guest_id(), None),
        };

        if !registry::is_guest(&user_id) {
            if self.session_revoked(&user_id, session_id.as_deref()).await {
                info!("connection {} rejected: session revoked for {}", conn, user_id);
                let _ = tx.send(Outbound::Event(ServerEvent::Kicked {
                    reason: KickReason::SessionRevoked,
                }));
                let _ = tx.send(Outbound::Close);
                return;
            }
            if let Some(previous) = self.registry.conn_of_user(&user_id) {
                if previous != conn {
                    info!("{} reconnected, displacing connection {}", user_id, previous);
                    self.kick(previous, KickReason::AnotherLogin);
                }
            }
        }

        info!("connection {} identified as {}", conn, user_id);
        self.registry.register(Connection {
            id: conn,
            user_id,
            session_id,
            device_id,
            tx,
        });
    }

    /// True when the account has a recorded session and the token was minted
    /// under a different one. Tokens without a session id are never revoked.
    async fn session_revoked(&self, user_id: &str, session_id: Option<&str>) -> bool {
        let Some(session_id) = session_id else {
            return false;
        };
        match self.backend.session_token(user_id).await {
            Ok(Some(current)) => current != session_id,
            Ok(None) => false,
            Err(e) => {
                warn!("session lookup failed for {}: {}", user_id, e);
                false
            }
        }
    }

    /// Sends a kick notice, closes the socket, and tears the connection's
    /// state down immediately rather than waiting for the close to round-trip.
    fn kick(&mut self, conn: ConnId, reason: KickReason) {
        if let Some(connection) = self.registry.get(conn) {
            let _ = connection.tx.send(Outbound::Event(ServerEvent::Kicked { reason }));
            let _ = connection.tx.send(Outbound::Close);
        }
        self.handle_disconnect(conn);
    }

    fn handle_disconnect(&mut self, conn: ConnId) {
        let Some(connection) = self.registry.remove(conn) else {
            return;
        };
        info!("connection {} ({}) disconnected", conn, connection.user_id);

        self.matchmaker.remove(conn);
        self.limit_enqueue_ranked.forget(conn);
        self.limit_enqueue_casual.forget(conn);
        self.limit_set_secret.forget(conn);
        self.limit_guess.forget(conn);

        if let Some(room_id) = self.rooms.remove_conn(conn) {
            self.broadcast_room_status(&room_id);
        }

        if let Some(match_id) = self.matches.find_id_by_conn(conn) {
            let leaver = self
                .matches
                .get(&match_id)
                .and_then(|m| m.index_of_conn(conn));
            if let Some(leaver) = leaver {
                // Walkover: the remaining seat takes the win
                self.end_match(&match_id, Some(1 - leaver));
            }
        }
    }

    async fn handle_auth_refresh(&mut self, conn: ConnId, token: String) {
        let Some(claims) = auth::verify_token(&token, &self.jwt_secret) else {
            return;
        };
        if self.registry.get(conn).is_none() {
            return;
        }

        if self
            .session_revoked(&claims.user_id, claims.session_id.as_deref())
            .await
        {
            info!("connection {}: refreshed session is revoked", conn);
            self.kick(conn, KickReason::SessionRevoked);
            return;
        }

        if let Some(previous) = self.registry.conn_of_user(&claims.user_id) {
            if previous != conn {
                info!(
                    "{} refreshed on connection {}, displacing {}",
                    claims.user_id, conn, previous
                );
                self.kick(previous, KickReason::AnotherLogin);
            }
        }
        self.registry.rebind(conn, claims.user_id, claims.session_id);
    }

    // ---- matchmaking ----

    async fn handle_ranked_enqueue(&mut self, conn: ConnId) {
        if !self.limit_enqueue_ranked.allow(conn) {
            self.send_error(conn, ErrorCode::TooManyRequests);
            return;
        }
        let Some(user_id) = self.registry.user_id_of(conn).map(str::to_string) else {
            return;
        };
        if registry::is_guest(&user_id) {
            self.send_error(conn, ErrorCode::AuthRequired);
            return;
        }
        match self.backend.season_window().await {
            Ok(SeasonWindow::Active) => {}
            Ok(_) => {
                self.send_error(conn, ErrorCode::RankedPaused);
                return;
            }
            Err(e) => {
                warn!("season lookup failed: {}", e);
                self.send_error(conn, ErrorCode::RankedPaused);
                return;
            }
        }
        if self.matches.find_id_by_conn(conn).is_some() {
            return;
        }
        if !self.matchmaker.enqueue_ranked(conn) {
            return;
        }
        debug!("connection {} queued ranked ({} waiting)", conn, self.matchmaker.ranked_len());

        let pairs = self
            .matchmaker
            .ranked_pairs(|c| self.registry.get(c).is_some());
        for (first, second) in pairs {
            self.start_queue_match(first, second, true, MatchMode::Ranked)
                .await;
        }
    }

    async fn handle_casual_enqueue(&mut self, conn: ConnId) {
        // Casual throttle drops silently; the queue state is unchanged either way
        if !self.limit_enqueue_casual.allow(conn) {
            return;
        }
        if self.registry.get(conn).is_none() {
            return;
        }
        if self.matches.find_id_by_conn(conn).is_some() {
            return;
        }
        if !self.matchmaker.enqueue_casual(conn) {
            return;
        }

        if let Some((first, second)) = self
            .matchmaker
            .casual_pair(|c| self.registry.get(c).is_some())
        {
            self.start_queue_match(first, second, false, MatchMode::Casual)
                .await;
            return;
        }

        // Lone entry: give a human opponent a short window, then fall back
        // to a bot
        let tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(CASUAL_BOT_WAIT_MILLIS)).await;
            let _ = tx.send(Inbound::CasualDeadline { conn });
        });
    }

    async fn handle_casual_deadline(&mut self, conn: ConnId) {
        // Paired or disconnected in the meantime: nothing to do
        if !self.matchmaker.take_casual(conn) {
            return;
        }
        let Some(human) = self.build_player(conn).await else {
            return;
        };
        info!("casual queue: pairing {} with a bot", human.display_name);
        let bot = MatchPlayer::bot(random_bot_secret());
        self.start_match(human, bot, false, MatchMode::Casual);
    }

    async fn start_queue_match(&mut self, first: ConnId, second: ConnId, ranked: bool, mode: MatchMode) {
        let Some(player1) = self.build_player(first).await else {
            return;
        };
        let Some(player2) = self.build_player(second).await else {
            return;
        };
        self.start_match(player1, player2, ranked, mode);
    }

    /// Resolves a connection into a match seat, loading the account profile
    /// for signed-in users.
    async fn build_player(&self, conn: ConnId) -> Option<MatchPlayer> {
        let connection = self.registry.get(conn)?;
        let user_id = connection.user_id.clone();
        let device_id = connection.device_id.clone();

        if registry::is_guest(&user_id) {
            return Some(MatchPlayer::guest(conn, user_id, device_id));
        }
        let profile = match self.backend.profile(&user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("profile lookup failed for {}: {}", user_id, e);
                Profile::default()
            }
        };
        Some(MatchPlayer::human(conn, user_id, device_id, profile))
    }

    fn start_match(
        &mut self,
        player1: MatchPlayer,
        player2: MatchPlayer,
        ranked: bool,
        mode: MatchMode,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        info!(
            "match {} started ({}): {} vs {}",
            id,
            mode.as_str(),
            player1.display_name,
            player2.display_name
        );

        let started_for_1 = ServerEvent::MatchStarted {
            match_id: id.clone(),
            ranked,
            opponent: player2.opponent_info(),
        };
        let started_for_2 = ServerEvent::MatchStarted {
            match_id: id.clone(),
            ranked,
            opponent: player1.opponent_info(),
        };
        let conn1 = player1.conn;
        let conn2 = player2.conn;

        self.matches
            .insert(Match::new(id.clone(), player1, player2, ranked, mode));

        if let Some(conn) = conn1 {
            self.send(conn, started_for_1);
        }
        if let Some(conn) = conn2 {
            self.send(conn, started_for_2);
        }
        self.broadcast_turn(&id, Instant::now());
        id
    }

    // ---- rooms ----

    async fn handle_room_create(&mut self, conn: ConnId, name: Option<String>) {
        let Some(user_id) = self.registry.user_id_of(conn).map(str::to_string) else {
            return;
        };
        self.leave_current_room(conn);

        let display_name = self.display_name_of(&user_id).await;
        let room_id = self.rooms.create(
            name,
            RoomMember {
                conn,
                user_id: user_id.clone(),
                display_name,
            },
        );
        info!("room {} created by {}", room_id, user_id);

        self.send(
            conn,
            ServerEvent::RoomCreated {
                room_id: room_id.clone(),
            },
        );
        self.broadcast_room_status(&room_id);
    }

    async fn handle_room_join(&mut self, conn: ConnId, room_id: String) {
        let Some(user_id) = self.registry.user_id_of(conn).map(str::to_string) else {
            return;
        };
        self.leave_current_room(conn);

        let display_name = self.display_name_of(&user_id).await;
        let member = RoomMember {
            conn,
            user_id,
            display_name,
        };
        match self.rooms.join(&room_id, member) {
            Ok(()) => {
                self.send(
                    conn,
                    ServerEvent::RoomJoined {
                        room_id: room_id.clone(),
                    },
                );
                self.broadcast_room_status(&room_id);
            }
            Err(error) => self.send(conn, ServerEvent::RoomError { error }),
        }
    }

    async fn handle_room_start(&mut self, conn: ConnId) {
        let Some(user_id) = self.registry.user_id_of(conn).map(str::to_string) else {
            return;
        };
        let (room_id, host_user_id, member_conns) = match self.rooms.find_by_conn(conn) {
            Some(room) => (
                room.id.clone(),
                room.host_user_id.clone(),
                room.members.iter().map(|m| m.conn).collect::<Vec<_>>(),
            ),
            None => return,
        };
        if host_user_id != user_id {
            self.send(
                conn,
                ServerEvent::RoomError {
                    error: shared::RoomErrorKind::NotHost,
                },
            );
            return;
        }
        if member_conns.len() != 2 {
            self.send(
                conn,
                ServerEvent::RoomError {
                    error: shared::RoomErrorKind::NeedTwoPlayers,
                },
            );
            return;
        }
        // A member already mid-match means a stale start request
        if member_conns
            .iter()
            .any(|&c| self.matches.find_id_by_conn(c).is_some())
        {
            return;
        }

        let Some(player1) = self.build_player(member_conns[0]).await else {
            return;
        };
        let Some(player2) = self.build_player(member_conns[1]).await else {
            return;
        };
        let match_id = self.start_match(player1, player2, false, MatchMode::WithFriends);
        self.rooms.set_match(&room_id, match_id);
    }

    async fn display_name_of(&self, user_id: &str) -> String {
        if registry::is_guest(user_id) {
            return registry::guest_display_name(user_id);
        }
        match self.backend.profile(user_id).await {
            Ok(profile) => profile.display_name,
            Err(_) => Profile::default().display_name,
        }
    }

    fn leave_current_room(&mut self, conn: ConnId) {
        if let Some(room_id) = self.rooms.remove_conn(conn) {
            self.broadcast_room_status(&room_id);
        }
    }

    fn broadcast_room_status(&self, room_id: &str) {
        let Some(room) = self.rooms.get(room_id) else {
            return;
        };
        let players: Vec<String> = room.members.iter().map(|m| m.display_name.clone()).collect();
        for member in &room.members {
            self.send(
                member.conn,
                ServerEvent::RoomStatus {
                    room_id: room.id.clone(),
                    players: players.clone(),
                    you_are_host: member.user_id == room.host_user_id,
                },
            );
        }
    }

    // ---- live match play ----

    fn handle_set_secret(&mut self, conn: ConnId, secret: String) {
        if !self.limit_set_secret.allow(conn) {
            self.send_error(conn, ErrorCode::TooManyRequests);
            return;
        }
        let Some(match_id) = self.matches.find_id_by_conn(conn) else {
            return;
        };
        if !is_valid_code(&secret) {
            self.send_error(conn, ErrorCode::InvalidSecret);
            return;
        }

        let now = Instant::now();
        let mut statuses = Vec::new();
        let became_active = {
            let Some(m) = self.matches.get_mut(&match_id) else {
                return;
            };
            let Some(index) = m.index_of_conn(conn) else {
                return;
            };
            // First write wins; a repeat just re-syncs the client below
            if m.players[index].secret.is_none() {
                m.players[index].secret = Some(secret);
            }

            let mut became_active = false;
            if m.waiting_for_secrets && m.both_secrets_set() {
                m.begin_countdown(now);
                became_active = true;
                info!("match {}: both secrets set, countdown running", match_id);
            }

            for (idx, player) in m.players.iter().enumerate() {
                if let Some(player_conn) = player.conn {
                    statuses.push((
                        player_conn,
                        ServerEvent::SecretStatus {
                            your_secret_set: player.secret.is_some(),
                            opponent_secret_set: m.players[1 - idx].secret.is_some(),
                        },
                    ));
                }
            }
            became_active
        };

        self.send(conn, ServerEvent::SecretSet);
        for (status_conn, event) in statuses {
            self.send(status_conn, event);
        }
        if became_active {
            self.broadcast_turn(&match_id, now);
        }
    }

    fn handle_guess(&mut self, conn: ConnId, guess: String) {
        if !self.limit_guess.allow(conn) {
            self.send_error(conn, ErrorCode::TooManyRequests);
            return;
        }
        let Some(match_id) = self.matches.find_id_by_conn(conn) else {
            return;
        };

        let now = Instant::now();
        let result = {
            let Some(m) = self.matches.get_mut(&match_id) else {
                return;
            };
            if m.waiting_for_secrets || m.countdown_ends_at.is_none() {
                Err(ErrorCode::SecretsNotReady)
            } else if m.index_of_conn(conn) != Some(m.current_turn) {
                Err(ErrorCode::NotYourTurn)
            } else {
                let guesser = m.current_turn;
                let opponent = 1 - guesser;
                match m.players[opponent].secret.clone() {
                    None => Err(ErrorCode::OpponentSecretNotSet),
                    Some(_) if !is_valid_code(&guess) => Err(ErrorCode::InvalidGuess),
                    Some(opponent_secret) => {
                        let feedback = evaluate_guess(&opponent_secret, &guess);
                        m.players[guesser].last_guess = Some(guess.clone());
                        m.players[guesser].last_feedback = Some(feedback);
                        let opponent_conn = m.players[opponent].conn;
                        let winner = feedback.is_winning().then_some(guesser);
                        if winner.is_none() {
                            m.switch_turn(now);
                        }
                        Ok((feedback, opponent_conn, winner))
                    }
                }
            }
        };

        match result {
            Err(code) => self.send_error(conn, code),
            Ok((feedback, opponent_conn, winner)) => {
                self.send(
                    conn,
                    ServerEvent::GuessResult {
                        guess: guess.clone(),
                        feedback,
                    },
                );
                if let Some(opponent_conn) = opponent_conn {
                    self.send(
                        opponent_conn,
                        ServerEvent::OpponentGuessed { guess, feedback },
                    );
                }
                match winner {
                    Some(winner) => self.end_match(&match_id, Some(winner)),
                    None => self.broadcast_turn(&match_id, now),
                }
            }
        }
    }

    fn handle_leave(&mut self, conn: ConnId) {
        let Some(match_id) = self.matches.find_id_by_conn(conn) else {
            return;
        };
        let leaver = self
            .matches
            .get(&match_id)
            .and_then(|m| m.index_of_conn(conn));
        if let Some(leaver) = leaver {
            self.end_match(&match_id, Some(1 - leaver));
        }
    }

    // ---- turn clock ----

    /// One global tick: broadcast remaining time for every running match and
    /// expire turns whose deadline has passed. This is the only place a turn
    /// times out, so each expiry produces exactly one timeout notice.
    fn run_tick(&mut self) {
        let now = Instant::now();
        let mut ticks = Vec::new();
        let mut expired = Vec::new();

        for m in self.matches.iter() {
            if m.waiting_for_secrets || m.countdown_ends_at.is_none() {
                continue;
            }
            let time_left_ms = m.time_left_ms(now);
            for (idx, player) in m.players.iter().enumerate() {
                if let Some(conn) = player.conn {
                    ticks.push((
                        conn,
                        ServerEvent::Tick {
                            match_id: m.id.clone(),
                            time_left_ms,
                            your_turn: idx == m.current_turn,
                        },
                    ));
                }
            }
            if time_left_ms == 0 {
                expired.push(m.id.clone());
            }
        }

        for (conn, event) in ticks {
            self.send(conn, event);
        }
        for match_id in expired {
            self.handle_turn_timeout(&match_id, now);
        }
    }

    fn handle_turn_timeout(&mut self, match_id: &str, now: Instant) {
        let mut notices = Vec::new();
        {
            let Some(m) = self.matches.get_mut(match_id) else {
                return;
            };
            let timed_out_index = m.current_turn;
            info!("match {}: seat {} ran out of time", match_id, timed_out_index);
            m.switch_turn(now);
            for player in &m.players {
                if let Some(conn) = player.conn {
                    notices.push((conn, ServerEvent::TimedOut { timed_out_index }));
                }
            }
        }
        for (conn, event) in notices {
            self.send(conn, event);
        }
        self.broadcast_turn(match_id, now);
    }

    // ---- bot scheduling ----

    /// Arms a delayed bot move when it is the bot's turn and play is
    /// possible. The deadline message carries the current move sequence; any
    /// later transition bumps it and orphans the message.
    fn schedule_bot_if_due(&mut self, match_id: &str) {
        let Some(m) = self.matches.get_mut(match_id) else {
            return;
        };
        if m.waiting_for_secrets || !m.current_player().is_bot() {
            return;
        }
        let opponent = 1 - m.current_turn;
        if m.players[opponent].secret.is_none() {
            return;
        }

        m.cancel_bot_timer();
        let seq = m.bot_move_seq;
        let delay =
            Duration::from_millis(rand::thread_rng().gen_range(BOT_MIN_DELAY_MILLIS..BOT_MAX_DELAY_MILLIS));
        let tx = self.inbound_tx.clone();
        let id = match_id.to_string();
        m.arm_bot_timer(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Inbound::BotDeadline { match_id: id, seq });
        }));
    }

    fn handle_bot_deadline(&mut self, match_id: String, seq: u64) {
        let now = Instant::now();
        let (guess, feedback, human_conn, winner) = {
            let Some(m) = self.matches.get_mut(&match_id) else {
                return;
            };
            if seq != m.bot_move_seq {
                debug!("match {}: stale bot deadline ignored", match_id);
                return;
            }
            if m.waiting_for_secrets || !m.current_player().is_bot() {
                return;
            }
            let bot_index = m.current_turn;
            let human_index = 1 - bot_index;
            let Some(human_secret) = m.players[human_index].secret.clone() else {
                return;
            };
            let Some(solver) = m.bot_solver.as_mut() else {
                return;
            };

            let guess = solver.next_guess();
            let feedback = evaluate_guess(&human_secret, &guess);
            solver.record(guess.clone(), feedback);
            debug!(
                "match {}: bot guessed {} ({} candidates left)",
                match_id,
                guess,
                m.bot_solver.as_ref().map(|s| s.remaining()).unwrap_or(0)
            );

            m.players[bot_index].last_guess = Some(guess.clone());
            m.players[bot_index].last_feedback = Some(feedback);
            let human_conn = m.players[human_index].conn;
            let winner = feedback.is_winning().then_some(bot_index);
            if winner.is_none() {
                m.switch_turn(now);
            }
            (guess, feedback, human_conn, winner)
        };

        if let Some(conn) = human_conn {
            self.send(conn, ServerEvent::OpponentGuessed { guess, feedback });
        }
        match winner {
            Some(winner) => self.end_match(&match_id, Some(winner)),
            None => self.broadcast_turn(&match_id, now),
        }
    }

    // ---- match end ----

    /// Ends a match. The table entry is removed before anything else, so
    /// every later end request for the same id is a no-op.
    fn end_match(&mut self, match_id: &str, winner: Option<usize>) {
        let Some(finished) = self.matches.remove(match_id) else {
            return;
        };

        let Some(winner_index) = winner else {
            info!("match {} ended in a draw", match_id);
            for player in &finished.players {
                self.send_seat(
                    player,
                    ServerEvent::MatchEnded {
                        result: MatchOutcome::Draw,
                        elo_update: None,
                    },
                );
            }
            return;
        };

        info!(
            "match {} won by {}",
            match_id, finished.players[winner_index].display_name
        );

        if finished.ranked {
            self.finish_ranked(finished, winner_index);
            return;
        }

        for (index, player) in finished.players.iter().enumerate() {
            let result = if index == winner_index {
                MatchOutcome::Win
            } else {
                MatchOutcome::Loss
            };
            self.send_seat(
                player,
                ServerEvent::MatchEnded {
                    result,
                    elo_update: None,
                },
            );
        }
        self.spawn_daily_plays(&finished);
    }

    /// Applies the rating outcome off the main loop. The spawned task owns
    /// everything it touches: cloned senders and the backend handle. When
    /// the rating write fails both players still get a result, just without
    /// rating changes.
    fn finish_ranked(&mut self, finished: Match, winner_index: usize) {
        let loser_index = 1 - winner_index;
        let winner_id = finished.players[winner_index].user_id.clone();
        let loser_id = finished.players[loser_index].user_id.clone();

        let mut sends: Vec<(usize, OutboundSender)> = Vec::new();
        for (index, player) in finished.players.iter().enumerate() {
            if let Some(conn) = player.conn {
                if let Some(connection) = self.registry.get(conn) {
                    sends.push((index, connection.tx.clone()));
                }
            }
        }

        let record = MatchRecord {
            player1_id: finished.players[0].user_id.clone(),
            player2_id: finished.players[1].user_id.clone(),
            winner_user_id: winner_id.clone(),
            loser_user_id: loser_id.clone(),
            ranked: true,
            mode: finished.mode,
            started_at_ms: finished.started_at_ms,
        };
        let daily: Vec<(Option<String>, String)> = finished
            .players
            .iter()
            .filter(|p| !p.is_bot())
            .map(|p| (p.device_id.clone(), p.user_id.clone()))
            .collect();
        let mode = finished.mode;
        let backend = Arc::clone(&self.backend);
        let match_id = finished.id.clone();

        tokio::spawn(async move {
            let update = match backend.record_ranked_result(&winner_id, &loser_id).await {
                Ok(update) => Some(update),
                Err(e) => {
                    warn!("match {}: rating update failed: {}", match_id, e);
                    None
                }
            };

            for (index, tx) in &sends {
                let result = if *index == winner_index {
                    MatchOutcome::Win
                } else {
                    MatchOutcome::Loss
                };
                let _ = tx.send(Outbound::Event(ServerEvent::MatchEnded {
                    result,
                    elo_update: update.clone(),
                }));
            }

            if update.is_some() {
                if let Err(e) = backend.record_match_history(record).await {
                    warn!("match {}: history write failed: {}", match_id, e);
                }
                for (device_id, user_id) in daily {
                    if let Err(e) = backend
                        .record_daily_play(device_id.as_deref(), &user_id, mode)
                        .await
                    {
                        warn!("daily play write failed for {}: {}", user_id, e);
                    }
                }
            }
        });
    }

    fn spawn_daily_plays(&self, finished: &Match) {
        let entries: Vec<(Option<String>, String)> = finished
            .players
            .iter()
            .filter(|p| !p.is_bot())
            .map(|p| (p.device_id.clone(), p.user_id.clone()))
            .collect();
        let mode = finished.mode;
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            for (device_id, user_id) in entries {
                if let Err(e) = backend
                    .record_daily_play(device_id.as_deref(), &user_id, mode)
                    .await
                {
                    warn!("daily play write failed for {}: {}", user_id, e);
                }
            }
        });
    }

    // ---- plumbing ----

    /// Sends the personalized turn view to both seats and re-arms the bot
    /// timer when applicable.
    fn broadcast_turn(&mut self, match_id: &str, now: Instant) {
        let mut snapshots = Vec::new();
        if let Some(m) = self.matches.get(match_id) {
            for (index, player) in m.players.iter().enumerate() {
                if let Some(conn) = player.conn {
                    snapshots.push((conn, ServerEvent::Turn(m.turn_snapshot(index, now))));
                }
            }
        }
        for (conn, event) in snapshots {
            self.send(conn, event);
        }
        self.schedule_bot_if_due(match_id);
    }

    fn send(&self, conn: ConnId, event: ServerEvent) {
        if let Some(connection) = self.registry.get(conn) {
            // A failed send means the writer is gone; the disconnect message
            // is already on its way
            let _ = connection.tx.send(Outbound::Event(event));
        }
    }

    fn send_seat(&self, player: &MatchPlayer, event: ServerEvent) {
        if let Some(conn) = player.conn {
            self.send(conn, event);
        }
    }

    fn send_error(&self, conn: ConnId, error: ErrorCode) {
        self.send(conn, ServerEvent::MatchError { error });
    }

    fn status(&self) -> RealtimeStatus {
        RealtimeStatus {
            players: self.registry.signed_in_count(),
            rooms: self.rooms.len(),
            matches: self.matches.len(),
            queue: self.matchmaker.ranked_len(),
        }
    }
}
