//! Failure modes of session operations and their wire codes

use shared::{ErrorCode, IdentityToken, Phase, TeamId};
use thiserror::Error;

/// Coarse classes used to decide how a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or out-of-phase message; rejected, connection stays open
    ProtocolViolation,
    /// A second claimant for an identity that is already live
    IdentityConflict,
    /// External code validation is pending or failed
    ValidationFailure,
    /// The message refers to something that is no longer current
    StaleReference,
    /// Broken internal invariant; logged, never fatal
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("connection is not bound to a session")]
    NotBound,

    #[error("connection is already bound to session {0}")]
    AlreadyBound(String),

    #[error("only the admin may send {0}")]
    Forbidden(&'static str),

    #[error("the admin cannot be removed from its own session")]
    CannotRemoveAdmin,

    #[error("session {0} already has an active admin")]
    AdminAlreadyActive(String),

    #[error("session {0} does not exist")]
    SessionNotFound(String),

    #[error("the server restarted, discard your identity and join again")]
    ServerRestarted,

    #[error("too many sessions are open")]
    SessionLimit,

    #[error("unknown participant {0}")]
    UnknownParticipant(IdentityToken),

    #[error("participant {0} was removed from the session")]
    ParticipantRemoved(IdentityToken),

    #[error("unknown team {0}")]
    UnknownTeam(TeamId),

    #[error("team changes of this kind need team mode {0}")]
    TeamModeMismatch(&'static str),

    #[error("{action} is not allowed during {phase}")]
    WrongPhase { action: &'static str, phase: Phase },

    #[error("invalid statements: {0}")]
    InvalidStatements(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("guesses are only accepted while guessing")]
    NotAcceptingGuesses,

    #[error("that round is no longer being guessed")]
    WrongTarget,

    #[error("statement index {index} is out of range (0..{count})")]
    InvalidIndex { index: usize, count: usize },

    #[error("you cannot guess on your own statements")]
    OwnStatements,

    #[error("waiting for the session code to be validated")]
    ValidationPending,

    #[error("the session code is invalid")]
    CodeInvalid,

    #[error("the session code has expired")]
    CodeExpired,

    #[error("the code validation service failed")]
    ValidationUnavailable,

    #[error("a timer is already armed for this session")]
    TimerAlreadyArmed,

    #[error("illegal phase transition {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },
}

impl SessionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::AdminAlreadyActive(_) | SessionError::ParticipantRemoved(_) => {
                ErrorCategory::IdentityConflict
            }
            SessionError::ValidationPending
            | SessionError::CodeInvalid
            | SessionError::CodeExpired
            | SessionError::ValidationUnavailable => ErrorCategory::ValidationFailure,
            SessionError::WrongTarget
            | SessionError::SessionNotFound(_)
            | SessionError::ServerRestarted
            | SessionError::UnknownParticipant(_)
            | SessionError::UnknownTeam(_) => ErrorCategory::StaleReference,
            SessionError::TimerAlreadyArmed | SessionError::InvalidTransition { .. } => {
                ErrorCategory::Internal
            }
            _ => ErrorCategory::ProtocolViolation,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::Malformed(_) => ErrorCode::InvalidMessage,
            SessionError::NotBound => ErrorCode::NotBound,
            SessionError::AlreadyBound(_) => ErrorCode::AlreadyBound,
            SessionError::Forbidden(_) | SessionError::CannotRemoveAdmin => ErrorCode::Forbidden,
            SessionError::AdminAlreadyActive(_) => ErrorCode::AdminExists,
            SessionError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            SessionError::ServerRestarted => ErrorCode::ServerRestart,
            SessionError::SessionLimit => ErrorCode::SessionLimit,
            SessionError::UnknownParticipant(_) => ErrorCode::UnknownPlayer,
            SessionError::ParticipantRemoved(_) => ErrorCode::PlayerRemoved,
            SessionError::UnknownTeam(_) => ErrorCode::UnknownTeam,
            SessionError::TeamModeMismatch(_) => ErrorCode::TeamMode,
            SessionError::WrongPhase { .. } => ErrorCode::WrongPhase,
            SessionError::InvalidStatements(_) => ErrorCode::InvalidStatements,
            SessionError::InvalidSettings(_) => ErrorCode::InvalidSettings,
            SessionError::InvalidName(_) => ErrorCode::InvalidName,
            SessionError::NotAcceptingGuesses => ErrorCode::NotAcceptingGuesses,
            SessionError::WrongTarget => ErrorCode::WrongTarget,
            SessionError::InvalidIndex { .. } => ErrorCode::InvalidIndex,
            SessionError::OwnStatements => ErrorCode::OwnStatements,
            SessionError::ValidationPending => ErrorCode::ValidationPending,
            SessionError::CodeInvalid => ErrorCode::CodeInvalid,
            SessionError::CodeExpired => ErrorCode::CodeExpired,
            SessionError::ValidationUnavailable => ErrorCode::ApiError,
            SessionError::TimerAlreadyArmed | SessionError::InvalidTransition { .. } => {
                ErrorCode::Internal
            }
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
