use crate::backend::{Profile, DIVISION_RANKS, DIVISION_TIERS};
use crate::bot::{BotSolver, BOT_DISPLAY_NAME, BOT_USER_ID};
use crate::network::ConnId;
use crate::registry;
use shared::{Feedback, OpponentInfo, TurnSnapshot, TURN_MILLIS};
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

/// How a match was formed. Recorded in history and daily-play counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Ranked,
    Casual,
    WithFriends,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Ranked => "ranked",
            MatchMode::Casual => "casual",
            MatchMode::WithFriends => "withFriends",
        }
    }
}

/// One seat in a match. Rating fields are a snapshot taken at match start;
/// later rating changes do not bleed into a running match.
#[derive(Debug)]
pub struct MatchPlayer {
    /// Transport id, or `None` for a bot seat.
    pub conn: Option<ConnId>,
    pub user_id: String,
    pub display_name: String,
    pub device_id: Option<String>,
    pub elo_points: i32,
    pub division_tier: String,
    pub division_rank: String,
    pub avatar_asset: Option<String>,
    pub secret: Option<String>,
    pub last_guess: Option<String>,
    pub last_feedback: Option<Feedback>,
}

impl MatchPlayer {
    pub fn human(
        conn: ConnId,
        user_id: String,
        device_id: Option<String>,
        profile: Profile,
    ) -> Self {
        MatchPlayer {
            conn: Some(conn),
            user_id,
            display_name: profile.display_name,
            device_id,
            elo_points: profile.elo_points,
            division_tier: profile.division_tier,
            division_rank: profile.division_rank,
            avatar_asset: profile.avatar_asset,
            secret: None,
            last_guess: None,
            last_feedback: None,
        }
    }

    pub fn guest(conn: ConnId, user_id: String, device_id: Option<String>) -> Self {
        let display_name = registry::guest_display_name(&user_id);
        MatchPlayer {
            conn: Some(conn),
            user_id,
            display_name,
            device_id,
            elo_points: 0,
            division_tier: DIVISION_TIERS[0].to_string(),
            division_rank: DIVISION_RANKS[0].to_string(),
            avatar_asset: None,
            secret: None,
            last_guess: None,
            last_feedback: None,
        }
    }

    /// Bot seat with its secret already chosen.
    pub fn bot(secret: String) -> Self {
        MatchPlayer {
            conn: None,
            user_id: BOT_USER_ID.to_string(),
            display_name: BOT_DISPLAY_NAME.to_string(),
            device_id: None,
            elo_points: 0,
            division_tier: DIVISION_TIERS[0].to_string(),
            division_rank: DIVISION_RANKS[0].to_string(),
            avatar_asset: None,
            secret: Some(secret),
            last_guess: None,
            last_feedback: None,
        }
    }

    pub fn is_bot(&self) -> bool {
        registry::is_bot(&self.user_id)
    }

    /// Public view of this player sent to their opponent at match start.
    pub fn opponent_info(&self) -> OpponentInfo {
        OpponentInfo {
            display_name: self.display_name.clone(),
            elo_points: self.elo_points,
            division_tier: self.division_tier.clone(),
            division_rank: self.division_rank.clone(),
            avatar_asset: self.avatar_asset.clone(),
        }
    }
}

/// A running match between two seats.
pub struct Match {
    pub id: String,
    pub players: [MatchPlayer; 2],
    /// Index into `players` of whoever may guess right now.
    pub current_turn: usize,
    pub ranked: bool,
    pub mode: MatchMode,
    /// True until both secrets are in; no countdown runs while set.
    pub waiting_for_secrets: bool,
    /// Deadline for the current turn, absent while waiting for secrets.
    pub countdown_ends_at: Option<Instant>,
    pub started_at_ms: u64,
    pub bot_solver: Option<BotSolver>,
    bot_timer: Option<JoinHandle<()>>,
    /// Bumped whenever a pending bot move is invalidated; a fired deadline
    /// carrying a stale value is ignored.
    pub bot_move_seq: u64,
}

impl Match {
    pub fn new(
        id: String,
        player1: MatchPlayer,
        player2: MatchPlayer,
        ranked: bool,
        mode: MatchMode,
    ) -> Self {
        let has_bot = player1.is_bot() || player2.is_bot();
        Match {
            id,
            players: [player1, player2],
            current_turn: 0,
            ranked,
            mode,
            waiting_for_secrets: true,
            countdown_ends_at: None,
            started_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            bot_solver: has_bot.then(BotSolver::new),
            bot_timer: None,
            bot_move_seq: 0,
        }
    }

    pub fn index_of_conn(&self, conn: ConnId) -> Option<usize> {
        self.players.iter().position(|p| p.conn == Some(conn))
    }

    pub fn current_player(&self) -> &MatchPlayer {
        &self.players[self.current_turn]
    }

    pub fn both_secrets_set(&self) -> bool {
        self.players.iter().all(|p| p.secret.is_some())
    }

    /// Starts the first countdown once both secrets are in.
    pub fn begin_countdown(&mut self, now: Instant) {
        self.waiting_for_secrets = false;
        self.countdown_ends_at = Some(now + Duration::from_millis(TURN_MILLIS));
    }

    /// Hands the turn to the other seat and restarts the countdown. Any
    /// pending bot move belongs to the old turn and is cancelled.
    pub fn switch_turn(&mut self, now: Instant) {
        self.cancel_bot_timer();
        self.current_turn = 1 - self.current_turn;
        self.countdown_ends_at = Some(now + Duration::from_millis(TURN_MILLIS));
    }

    pub fn time_left_ms(&self, now: Instant) -> u64 {
        match self.countdown_ends_at {
            Some(ends) if ends > now => (ends - now).as_millis() as u64,
            _ => 0,
        }
    }

    /// Invalidates any scheduled bot move.
    pub fn cancel_bot_timer(&mut self) {
        self.bot_move_seq += 1;
        if let Some(handle) = self.bot_timer.take() {
            handle.abort();
        }
    }

    /// Arms the bot timer. The matching deadline message must carry
    /// `bot_move_seq` as it is after this call.
    pub fn arm_bot_timer(&mut self, handle: JoinHandle<()>) {
        self.bot_timer = Some(handle);
    }

    /// Builds the turn view for one seat. Each side sees its own flags and
    /// the opponent's most recent guess with its feedback.
    pub fn turn_snapshot(&self, recipient: usize, now: Instant) -> TurnSnapshot {
        let you = &self.players[recipient];
        let other = &self.players[1 - recipient];
        TurnSnapshot {
            match_id: self.id.clone(),
            your_turn: recipient == self.current_turn,
            time_left_ms: self.time_left_ms(now),
            opponent: other.display_name.clone(),
            opponent_tier: other.division_tier.clone(),
            opponent_rank: other.division_rank.clone(),
            your_tier: you.division_tier.clone(),
            your_rank: you.division_rank.clone(),
            opponent_avatar_asset: other.avatar_asset.clone(),
            your_avatar_asset: you.avatar_asset.clone(),
            last_guess: other.last_guess.clone(),
            last_feedback: other.last_feedback,
            your_secret_set: you.secret.is_some(),
            opponent_secret_set: other.secret.is_some(),
            waiting_for_secrets: self.waiting_for_secrets,
        }
    }
}

impl Drop for Match {
    fn drop(&mut self) {
        if let Some(handle) = self.bot_timer.take() {
            handle.abort();
        }
    }
}

/// Live matches by id.
pub struct MatchTable {
    matches: HashMap<String, Match>,
}

impl MatchTable {
    pub fn new() -> Self {
        MatchTable {
            matches: HashMap::new(),
        }
    }

    pub fn insert(&mut self, game: Match) {
        self.matches.insert(game.id.clone(), game);
    }

    pub fn get(&self, id: &str) -> Option<&Match> {
        self.matches.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Match> {
        self.matches.get_mut(id)
    }

    /// Takes a match out of the table. Ending a match starts here, so a
    /// second end request finds nothing and becomes a no-op.
    pub fn remove(&mut self, id: &str) -> Option<Match> {
        self.matches.remove(id)
    }

    pub fn find_id_by_conn(&self, conn: ConnId) -> Option<String> {
        self.matches
            .values()
            .find(|m| m.index_of_conn(conn).is_some())
            .map(|m| m.id.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Match> {
        self.matches.values()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}
