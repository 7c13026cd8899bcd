use serde::{Deserialize, Serialize};

pub const CODE_LEN: usize = 4;
pub const TURN_MILLIS: u64 = 30_000;
pub const TICK_MILLIS: u64 = 250;
pub const CASUAL_BOT_WAIT_MILLIS: u64 = 700;
pub const BOT_MIN_DELAY_MILLIS: u64 = 1_000;
pub const BOT_MAX_DELAY_MILLIS: u64 = 2_000;

/// Score of one guess against a secret. `correct_digits` includes the exact
/// matches, so `correct_positions <= correct_digits <= CODE_LEN` always holds.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub correct_positions: u8,
    pub correct_digits: u8,
}

impl Feedback {
    pub fn is_winning(&self) -> bool {
        self.correct_positions as usize == CODE_LEN
    }
}

pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

/// Standard Mastermind scoring with repeated digits allowed. Exact positional
/// matches are counted first, then leftover digits on both sides are matched
/// by multiplicity: `evaluate_guess("1122", "1111")` gives two exact matches
/// and no extra digit matches.
pub fn evaluate_guess(secret: &str, guess: &str) -> Feedback {
    if secret.len() != CODE_LEN || guess.len() != CODE_LEN {
        return Feedback {
            correct_positions: 0,
            correct_digits: 0,
        };
    }

    let mut correct_positions = 0u8;
    let mut secret_counts = [0u8; 10];
    let mut guess_counts = [0u8; 10];

    for (s, g) in secret.bytes().zip(guess.bytes()) {
        if s == g {
            correct_positions += 1;
        } else {
            if s.is_ascii_digit() {
                secret_counts[(s - b'0') as usize] += 1;
            }
            if g.is_ascii_digit() {
                guess_counts[(g - b'0') as usize] += 1;
            }
        }
    }

    let matches_anywhere: u8 = (0..10)
        .map(|d| secret_counts[d].min(guess_counts[d]))
        .sum();

    Feedback {
        correct_positions,
        correct_digits: correct_positions + matches_anywhere,
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpponentInfo {
    pub display_name: String,
    pub elo_points: i32,
    pub division_tier: String,
    pub division_rank: String,
    pub avatar_asset: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnSnapshot {
    pub match_id: String,
    pub your_turn: bool,
    pub time_left_ms: u64,
    pub opponent: String,
    pub opponent_tier: String,
    pub opponent_rank: String,
    pub your_tier: String,
    pub your_rank: String,
    pub opponent_avatar_asset: Option<String>,
    pub your_avatar_asset: Option<String>,
    /// Most recent guess made by the recipient's opponent, if any.
    pub last_guess: Option<String>,
    pub last_feedback: Option<Feedback>,
    pub your_secret_set: bool,
    pub opponent_secret_set: bool,
    pub waiting_for_secrets: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EloSide {
    pub user_id: String,
    pub elo_points: i32,
    pub division_tier: String,
    pub division_rank: String,
    pub delta: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EloUpdate {
    pub winner: EloSide,
    pub loser: EloSide,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchOutcome {
    Win,
    Loss,
    Draw,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidSecret,
    InvalidGuess,
    NotYourTurn,
    OpponentSecretNotSet,
    SecretsNotReady,
    RankedPaused,
    AuthRequired,
    TooManyRequests,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KickReason {
    AnotherLogin,
    SessionRevoked,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomErrorKind {
    NotFound,
    Full,
    NotHost,
    NeedTwoPlayers,
}

/// Events a client may send over the socket.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "ranked.enqueue")]
    RankedEnqueue,
    #[serde(rename = "casual.enqueue")]
    CasualEnqueue,
    #[serde(rename = "match.setSecret")]
    SetSecret { secret: String },
    #[serde(rename = "match.guess")]
    Guess { guess: String },
    #[serde(rename = "match.leave")]
    LeaveMatch,
    #[serde(rename = "room.create", rename_all = "camelCase")]
    CreateRoom {
        #[serde(default)]
        name: Option<String>,
    },
    #[serde(rename = "room.join", rename_all = "camelCase")]
    JoinRoom { room_id: String },
    #[serde(rename = "room.start")]
    StartRoom,
    #[serde(rename = "auth.refresh")]
    RefreshAuth { token: String },
}

/// Events the server pushes to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "match.started", rename_all = "camelCase")]
    MatchStarted {
        match_id: String,
        ranked: bool,
        opponent: OpponentInfo,
    },
    #[serde(rename = "match.turn")]
    Turn(TurnSnapshot),
    #[serde(rename = "match.tick", rename_all = "camelCase")]
    Tick {
        match_id: String,
        time_left_ms: u64,
        your_turn: bool,
    },
    #[serde(rename = "match.timeout", rename_all = "camelCase")]
    TimedOut { timed_out_index: usize },
    #[serde(rename = "match.secretSet")]
    SecretSet,
    #[serde(rename = "match.secretStatus", rename_all = "camelCase")]
    SecretStatus {
        your_secret_set: bool,
        opponent_secret_set: bool,
    },
    #[serde(rename = "match.guessResult")]
    GuessResult { guess: String, feedback: Feedback },
    #[serde(rename = "match.opponentGuessed")]
    OpponentGuessed { guess: String, feedback: Feedback },
    #[serde(rename = "match.ended", rename_all = "camelCase")]
    MatchEnded {
        result: MatchOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        elo_update: Option<EloUpdate>,
    },
    #[serde(rename = "match.error")]
    MatchError { error: ErrorCode },
    #[serde(rename = "auth.kicked")]
    Kicked { reason: KickReason },
    #[serde(rename = "room.created", rename_all = "camelCase")]
    RoomCreated { room_id: String },
    #[serde(rename = "room.joined", rename_all = "camelCase")]
    RoomJoined { room_id: String },
    #[serde(rename = "room.status", rename_all = "camelCase")]
    RoomStatus {
        room_id: String,
        players: Vec<String>,
        you_are_host: bool,
    },
    #[serde(rename = "room.error")]
    RoomError { error: RoomErrorKind },
}
