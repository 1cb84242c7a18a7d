use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

pub mod view;

pub use view::*;

pub const STATEMENTS_PER_SET: usize = 3;
pub const MAX_NAME_LEN: usize = 32;
pub const MAX_STATEMENT_LEN: usize = 200;

pub const DEFAULT_ANSWER_TIME: u32 = 30;
pub const DEFAULT_ROUNDS_COUNT: u8 = 1;
pub const DEFAULT_COUNTDOWN_TIME: u32 = 60;
pub const ANSWER_TIME_RANGE: RangeInclusive<u32> = 5..=300;
pub const ROUNDS_COUNT_RANGE: RangeInclusive<u8> = 1..=5;
pub const COUNTDOWN_TIME_RANGE: RangeInclusive<u32> = 5..=600;

pub const DEFAULT_TEAM_COUNT: usize = 2;
pub const MAX_TEAM_COUNT: usize = 8;
pub const LEADERBOARD_SIZE: usize = 3;

/// Opaque per-participant token. Created once, survives reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityToken(pub String);

impl IdentityToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub u32);

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique identifier of one subject's statement set within a game.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundSetId(pub String);

impl RoundSetId {
    pub fn new(game_no: u32, owner: &IdentityToken, round: u8) -> Self {
        Self(format!("g{}-{}-r{}", game_no, owner, round))
    }
}

impl fmt::Display for RoundSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Setup,
    Countdown,
    Guessing,
    Results,
}

impl Phase {
    /// Forward transitions within one game cycle. Returning to `Setup` is a
    /// reset and is not covered here.
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Setup, Phase::Countdown)
                | (Phase::Countdown, Phase::Guessing)
                | (Phase::Countdown, Phase::Results)
                | (Phase::Guessing, Phase::Results)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "setup",
            Phase::Countdown => "countdown",
            Phase::Guessing => "guessing",
            Phase::Results => "results",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeamMode {
    #[default]
    None,
    Random,
    AdminAssigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerContext {
    GameStart,
    PerGuess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Active,
    Disconnected,
    Removed,
}

/// Two truths and a lie for one round, as typed by the participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementSet {
    pub round: u8,
    pub truths: [String; 2],
    pub lie: String,
}

impl StatementSet {
    pub fn new(round: u8, truths: [&str; 2], lie: &str) -> Self {
        Self {
            round,
            truths: [truths[0].to_string(), truths[1].to_string()],
            lie: lie.to_string(),
        }
    }

    /// Trims every statement and checks lengths.
    pub fn normalized(&self) -> Result<Self, String> {
        let clean = |text: &str| -> Result<String, String> {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(format!("round {}: statements must not be empty", self.round));
            }
            if trimmed.chars().count() > MAX_STATEMENT_LEN {
                return Err(format!(
                    "round {}: statements are limited to {} characters",
                    self.round, MAX_STATEMENT_LEN
                ));
            }
            Ok(trimmed.to_string())
        };

        Ok(Self {
            round: self.round,
            truths: [clean(&self.truths[0])?, clean(&self.truths[1])?],
            lie: clean(&self.lie)?,
        })
    }
}

pub fn example_statements() -> StatementSet {
    StatementSet::new(
        0,
        ["I have been to Iceland", "I can play the trumpet"],
        "I have never eaten pizza",
    )
}

pub fn normalize_name(name: &str) -> Result<String, String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(format!("name is limited to {} characters", MAX_NAME_LEN));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSettings {
    /// Seconds allowed per RoundSet while guessing
    pub answer_time: u32,
    /// Statement sets each participant writes
    pub rounds_count: u8,
    /// Seconds participants get to write statements after the start
    pub countdown_time: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            answer_time: DEFAULT_ANSWER_TIME,
            rounds_count: DEFAULT_ROUNDS_COUNT,
            countdown_time: DEFAULT_COUNTDOWN_TIME,
        }
    }
}

impl GameSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !ANSWER_TIME_RANGE.contains(&self.answer_time) {
            return Err(format!(
                "answerTime must be within {}..={}",
                ANSWER_TIME_RANGE.start(),
                ANSWER_TIME_RANGE.end()
            ));
        }
        if !ROUNDS_COUNT_RANGE.contains(&self.rounds_count) {
            return Err(format!(
                "roundsCount must be within {}..={}",
                ROUNDS_COUNT_RANGE.start(),
                ROUNDS_COUNT_RANGE.end()
            ));
        }
        if !COUNTDOWN_TIME_RANGE.contains(&self.countdown_time) {
            return Err(format!(
                "countdownTime must be within {}..={}",
                COUNTDOWN_TIME_RANGE.start(),
                COUNTDOWN_TIME_RANGE.end()
            ));
        }
        Ok(())
    }

    pub fn with_update(
        &self,
        answer_time: Option<u32>,
        rounds_count: Option<u8>,
        countdown_time: Option<u32>,
    ) -> Self {
        Self {
            answer_time: answer_time.unwrap_or(self.answer_time),
            rounds_count: rounds_count.unwrap_or(self.rounds_count),
            countdown_time: countdown_time.unwrap_or(self.countdown_time),
        }
    }
}

/// Answer of the external code-validation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationOutcome {
    Valid,
    InvalidCode,
    ExpiredCode,
    ValidationFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeStatus {
    #[default]
    NotRequired,
    Pending,
    Valid,
    Invalid,
    Expired,
    Failed,
}

impl CodeStatus {
    pub fn allows_gameplay(self) -> bool {
        matches!(self, CodeStatus::NotRequired | CodeStatus::Valid)
    }
}

impl From<ValidationOutcome> for CodeStatus {
    fn from(outcome: ValidationOutcome) -> Self {
        match outcome {
            ValidationOutcome::Valid => CodeStatus::Valid,
            ValidationOutcome::InvalidCode => CodeStatus::Invalid,
            ValidationOutcome::ExpiredCode => CodeStatus::Expired,
            ValidationOutcome::ValidationFailed => CodeStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMessage,
    NotBound,
    AlreadyBound,
    Forbidden,
    AdminExists,
    SessionNotFound,
    ServerRestart,
    UnknownPlayer,
    PlayerRemoved,
    UnknownTeam,
    TeamMode,
    WrongPhase,
    InvalidStatements,
    InvalidSettings,
    InvalidName,
    NotAcceptingGuesses,
    WrongTarget,
    InvalidIndex,
    OwnStatements,
    ValidationPending,
    CodeInvalid,
    CodeExpired,
    ApiError,
    SessionLimit,
    Internal,
}

/// Messages sent by clients. The `type` field selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    CreateSession {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        external_code: Option<String>,
    },
    JoinSession {
        code: String,
        name: String,
        #[serde(default)]
        identity: Option<IdentityToken>,
    },
    SubmitStatements {
        statements: Vec<StatementSet>,
    },
    SubmitGuess {
        target_id: IdentityToken,
        index: usize,
        #[serde(default)]
        round_set_id: Option<RoundSetId>,
    },
    SetReady {
        ready: bool,
    },
    SetTeamMode {
        mode: TeamMode,
        #[serde(default)]
        team_count: Option<usize>,
    },
    AssignPlayerToTeam {
        player_id: IdentityToken,
        #[serde(default)]
        team_id: Option<TeamId>,
    },
    UpdateTeamName {
        team_id: TeamId,
        name: String,
    },
    UpdateGameSettings {
        #[serde(default)]
        answer_time: Option<u32>,
        #[serde(default)]
        rounds_count: Option<u8>,
        #[serde(default)]
        countdown_time: Option<u32>,
    },
    StartGame,
    FinishGameEarly,
    ResetSession,
    PlayAgain,
    AdminNameUpdate {
        name: String,
    },
    RemovePlayer {
        player_id: IdentityToken,
    },
    RevalidateCode {
        external_code: String,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CreateSession { .. } => "create-session",
            ClientMessage::JoinSession { .. } => "join-session",
            ClientMessage::SubmitStatements { .. } => "submit-statements",
            ClientMessage::SubmitGuess { .. } => "submit-guess",
            ClientMessage::SetReady { .. } => "set-ready",
            ClientMessage::SetTeamMode { .. } => "set-team-mode",
            ClientMessage::AssignPlayerToTeam { .. } => "assign-player-to-team",
            ClientMessage::UpdateTeamName { .. } => "update-team-name",
            ClientMessage::UpdateGameSettings { .. } => "update-game-settings",
            ClientMessage::StartGame => "start-game",
            ClientMessage::FinishGameEarly => "finish-game-early",
            ClientMessage::ResetSession => "reset-session",
            ClientMessage::PlayAgain => "play-again",
            ClientMessage::AdminNameUpdate { .. } => "admin-name-update",
            ClientMessage::RemovePlayer { .. } => "remove-player",
            ClientMessage::RevalidateCode { .. } => "revalidate-code",
        }
    }

    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            ClientMessage::SetTeamMode { .. }
                | ClientMessage::AssignPlayerToTeam { .. }
                | ClientMessage::UpdateTeamName { .. }
                | ClientMessage::UpdateGameSettings { .. }
                | ClientMessage::StartGame
                | ClientMessage::FinishGameEarly
                | ClientMessage::ResetSession
                | ClientMessage::PlayAgain
                | ClientMessage::AdminNameUpdate { .. }
                | ClientMessage::RemovePlayer { .. }
                | ClientMessage::RevalidateCode { .. }
        )
    }
}

/// Messages pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    SessionCreated {
        code: String,
        identity: IdentityToken,
        server_instance: String,
        resumed: bool,
    },
    JoinedGame {
        code: String,
        identity: IdentityToken,
        team: Option<TeamId>,
        example: StatementSet,
        server_instance: String,
        resumed: bool,
    },
    PlayerJoined {
        id: IdentityToken,
        name: String,
        resumed: bool,
    },
    PlayerLeft {
        id: IdentityToken,
        name: String,
        removed: bool,
    },
    AdminLeft {
        name: String,
    },
    GameState(GameView),
    CountdownStarted {
        context: TimerContext,
        seconds: u32,
        deadline: u64,
    },
    ShowMessage {
        text: String,
        duration_ms: u64,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }

    pub fn toast(text: impl Into<String>, duration_ms: u64) -> Self {
        ServerMessage::ShowMessage {
            text: text.into(),
            duration_ms,
        }
    }
}
