//! Account and season storage behind the realtime server.
//!
//! The match loop never talks to a database directly; everything it needs
//! from durable storage goes through the [`Backend`] trait so the realtime
//! core can be driven entirely in-memory under test. [`MemoryBackend`] is
//! the reference implementation and also what the standalone binary runs.

use crate::game::MatchMode;
use async_trait::async_trait;
use shared::{EloSide, EloUpdate};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Rating tiers from lowest to highest, one per 400 points.
pub const DIVISION_TIERS: [&str; 5] = ["Bronze", "Silver", "Gold", "Platinum", "Diamond"];
/// Ranks inside a tier from lowest to highest, one per 100 points.
pub const DIVISION_RANKS: [&str; 4] = ["IV", "III", "II", "I"];

/// Error from a storage operation.
#[derive(Debug)]
pub struct BackendError(pub String);

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackendError {}

/// Account fields the realtime server reads when a match starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub display_name: String,
    pub elo_points: i32,
    pub division_tier: String,
    pub division_rank: String,
    pub avatar_asset: Option<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            display_name: "Player".to_string(),
            elo_points: 0,
            division_tier: DIVISION_TIERS[0].to_string(),
            division_rank: DIVISION_RANKS[0].to_string(),
            avatar_asset: None,
        }
    }
}

/// Whether ranked play is currently allowed.
///
/// `Paused` covers the payout window after a season ends; ranked queueing is
/// refused in both non-`Active` states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonWindow {
    Active,
    Paused,
    Closed,
}

/// Completed-match row handed to the history writer.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub player1_id: String,
    pub player2_id: String,
    pub winner_user_id: String,
    pub loser_user_id: String,
    pub ranked: bool,
    pub mode: MatchMode,
    pub started_at_ms: u64,
}

/// Durable storage consulted by the realtime server.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Loads the profile for an account, falling back to defaults for
    /// accounts the store has never seen.
    async fn profile(&self, user_id: &str) -> Result<Profile, BackendError>;

    /// Returns the account's current session id, if one is recorded.
    /// A token minted under a different session has been revoked.
    async fn session_token(&self, user_id: &str) -> Result<Option<String>, BackendError>;

    /// Reports whether the ranked queue is open right now.
    async fn season_window(&self) -> Result<SeasonWindow, BackendError>;

    /// Applies a ranked result to both accounts and returns the rating
    /// changes to announce.
    async fn record_ranked_result(
        &self,
        winner_id: &str,
        loser_id: &str,
    ) -> Result<EloUpdate, BackendError>;

    /// Appends a completed match to the history log.
    async fn record_match_history(&self, record: MatchRecord) -> Result<(), BackendError>;

    /// Bumps the per-day play counter for a player. Keyed by device when one
    /// is known, otherwise by account.
    async fn record_daily_play(
        &self,
        device_id: Option<&str>,
        user_id: &str,
        mode: MatchMode,
    ) -> Result<(), BackendError>;
}

/// Rounds half-up, with ties going toward positive infinity.
///
/// The rating formula was tuned against that rounding mode, which differs
/// from `f64::round` for negative ties: `-0.5` rounds to `0`, not `-1`.
fn round_half_up(x: f64) -> i32 {
    (x + 0.5).floor() as i32
}

/// Computes `(winner_gain, loser_loss)` for a ranked result.
///
/// The gap between ratings is clamped to ±400 and shrinks the reward for
/// beating weaker opponents. Gains never drop below 10, losses below 5.
pub fn elo_delta(winner_elo: i32, loser_elo: i32) -> (i32, i32) {
    let gap = (winner_elo - loser_elo).clamp(-400, 400);
    let adjustment = round_half_up(-(gap as f64) / 40.0);
    let winner_gain = (25 + adjustment).max(10);
    let loser_loss = (15 - adjustment.div_euclid(2)).max(5);
    (winner_gain, loser_loss)
}

/// Maps a rating to its `(tier, rank)` pair.
pub fn compute_division(elo_points: i32) -> (&'static str, &'static str) {
    let steps = (elo_points.max(0) / 100) as usize;
    let tier_index = (steps / DIVISION_RANKS.len()).min(DIVISION_TIERS.len() - 1);
    let rank_index = steps % DIVISION_RANKS.len();
    (DIVISION_TIERS[tier_index], DIVISION_RANKS[rank_index])
}

fn current_day_index() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / 86_400
}

#[derive(Debug, Default, Clone)]
struct DailyCounter {
    total: u32,
    ranked: u32,
    casual: u32,
    with_friends: u32,
}

struct Inner {
    profiles: HashMap<String, Profile>,
    sessions: HashMap<String, String>,
    season: SeasonWindow,
    history: Vec<MatchRecord>,
    daily: HashMap<(String, u64), DailyCounter>,
    fail_ratings: bool,
}

/// In-memory backend. One open season, no persistence.
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            inner: Mutex::new(Inner {
                profiles: HashMap::new(),
                sessions: HashMap::new(),
                season: SeasonWindow::Active,
                history: Vec::new(),
                daily: HashMap::new(),
                fail_ratings: false,
            }),
        }
    }

    pub async fn insert_profile(&self, user_id: &str, profile: Profile) {
        let mut inner = self.inner.lock().await;
        inner.profiles.insert(user_id.to_string(), profile);
    }

    pub async fn set_session(&self, user_id: &str, session_id: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .sessions
            .insert(user_id.to_string(), session_id.to_string());
    }

    pub async fn set_season(&self, window: SeasonWindow) {
        self.inner.lock().await.season = window;
    }

    /// Makes subsequent rating updates fail, for exercising the degraded
    /// match-end path.
    pub async fn set_rating_failure(&self, fail: bool) {
        self.inner.lock().await.fail_ratings = fail;
    }

    pub async fn stored_profile(&self, user_id: &str) -> Option<Profile> {
        self.inner.lock().await.profiles.get(user_id).cloned()
    }

    pub async fn history(&self) -> Vec<MatchRecord> {
        self.inner.lock().await.history.clone()
    }

    /// Today's play count for a device or account key.
    pub async fn daily_total(&self, key: &str) -> u32 {
        let day = current_day_index();
        self.inner
            .lock()
            .await
            .daily
            .get(&(key.to_string(), day))
            .map(|c| c.total)
            .unwrap_or(0)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn profile(&self, user_id: &str) -> Result<Profile, BackendError> {
        let inner = self.inner.lock().await;
        Ok(inner.profiles.get(user_id).cloned().unwrap_or_default())
    }

    async fn session_token(&self, user_id: &str) -> Result<Option<String>, BackendError> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(user_id).cloned())
    }

    async fn season_window(&self) -> Result<SeasonWindow, BackendError> {
        Ok(self.inner.lock().await.season)
    }

    async fn record_ranked_result(
        &self,
        winner_id: &str,
        loser_id: &str,
    ) -> Result<EloUpdate, BackendError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_ratings {
            return Err(BackendError("rating store unavailable".to_string()));
        }

        let mut winner = inner.profiles.get(winner_id).cloned().unwrap_or_default();
        let mut loser = inner.profiles.get(loser_id).cloned().unwrap_or_default();

        let (gain, loss) = elo_delta(winner.elo_points, loser.elo_points);
        winner.elo_points = (winner.elo_points + gain).max(0);
        loser.elo_points = (loser.elo_points - loss).max(0);

        let (tier, rank) = compute_division(winner.elo_points);
        winner.division_tier = tier.to_string();
        winner.division_rank = rank.to_string();
        let (tier, rank) = compute_division(loser.elo_points);
        loser.division_tier = tier.to_string();
        loser.division_rank = rank.to_string();

        let update = EloUpdate {
            winner: EloSide {
                user_id: winner_id.to_string(),
                elo_points: winner.elo_points,
                division_tier: winner.division_tier.clone(),
                division_rank: winner.division_rank.clone(),
                delta: gain,
            },
            loser: EloSide {
                user_id: loser_id.to_string(),
                elo_points: loser.elo_points,
                division_tier: loser.division_tier.clone(),
                division_rank: loser.division_rank.clone(),
                delta: -loss,
            },
        };

        inner.profiles.insert(winner_id.to_string(), winner);
        inner.profiles.insert(loser_id.to_string(), loser);
        Ok(update)
    }

    async fn record_match_history(&self, record: MatchRecord) -> Result<(), BackendError> {
        self.inner.lock().await.history.push(record);
        Ok(())
    }

    async fn record_daily_play(
        &self,
        device_id: Option<&str>,
        user_id: &str,
        mode: MatchMode,
    ) -> Result<(), BackendError> {
        let key = device_id.unwrap_or(user_id).to_string();
        let mut inner = self.inner.lock().await;
        let counter = inner
            .daily
            .entry((key, current_day_index()))
            .or_default();
        counter.total += 1;
        match mode {
            MatchMode::Ranked => counter.ranked += 1,
            MatchMode::Casual => counter.casual += 1,
            MatchMode::WithFriends => counter.with_friends += 1,
        }
        Ok(())
    }
}
