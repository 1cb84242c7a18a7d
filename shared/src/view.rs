//! Per-recipient snapshots pushed in `game-state` messages.

use crate::{
    CodeStatus, GameSettings, IdentityToken, LifecycleState, Phase, RoundSetId, TeamId, TeamMode,
    TimerContext,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    pub code: String,
    pub phase: Phase,
    pub you: Option<SelfView>,
    pub roster: Vec<RosterEntry>,
    pub team_mode: TeamMode,
    pub teams: Vec<TeamView>,
    pub settings: GameSettings,
    pub countdown: Option<CountdownView>,
    pub round: Option<RoundView>,
    pub last_reveal: Option<RevealView>,
    /// Scores from resolved rounds only
    pub scores: Vec<ScoreEntry>,
    pub results: Option<ResultsView>,
    pub validation: CodeStatus,
    pub admin: Option<AdminDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfView {
    pub id: IdentityToken,
    pub name: String,
    pub is_admin: bool,
    pub team: Option<TeamId>,
    pub ready: bool,
    pub submitted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: IdentityToken,
    pub name: String,
    pub is_admin: bool,
    pub team: Option<TeamId>,
    pub connected: bool,
    pub ready: bool,
    pub submitted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamView {
    pub id: TeamId,
    pub name: String,
    pub members: Vec<IdentityToken>,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownView {
    pub context: TimerContext,
    pub remaining_seconds: f64,
    /// Epoch milliseconds
    pub deadline: u64,
}

/// What one recipient learns about the active round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RoundView {
    /// Sent to the subject: the others are guessing on your statements.
    BeingWatched {
        round_number: usize,
        total_rounds: usize,
    },
    Guessing {
        subject_id: IdentityToken,
        subject_name: String,
        round_set_id: RoundSetId,
        statements: Vec<String>,
        your_guess: Option<usize>,
        round_number: usize,
        total_rounds: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealView {
    pub round_set_id: RoundSetId,
    pub subject_id: IdentityToken,
    pub subject_name: String,
    pub statements: Vec<String>,
    pub lie_position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub id: IdentityToken,
    pub name: String,
    pub team: Option<TeamId>,
    pub score: u32,
    pub lies_detected: u32,
    pub deceptions: u32,
    pub guesses_received: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuesserEntry {
    pub id: IdentityToken,
    pub name: String,
    pub correct_guesses: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeceiverEntry {
    pub id: IdentityToken,
    pub name: String,
    pub deceptions: u32,
    pub guesses_received: u32,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsView {
    pub finished_early: bool,
    pub scores: Vec<ScoreEntry>,
    pub team_scores: Vec<TeamView>,
    pub best_guessers: Vec<GuesserEntry>,
    pub best_deceivers: Vec<DeceiverEntry>,
    pub reveals: Vec<RevealView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDetail {
    pub participants: Vec<AdminParticipantView>,
    pub pending_guessers: Vec<IdentityToken>,
    pub rounds_remaining: usize,
    pub external_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminParticipantView {
    pub id: IdentityToken,
    pub name: String,
    pub state: LifecycleState,
    pub team: Option<TeamId>,
    pub ready: bool,
    pub submitted: bool,
    pub statements_submitted: usize,
    pub guessed_current_round: bool,
    pub score: u32,
}
