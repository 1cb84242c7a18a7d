//! Timestamped record of what happened in a session, shipped to the log sink
//! when a game reaches its results.

use crate::utils::get_timestamp;
use serde::Serialize;
use shared::{IdentityToken, RoundSetId, ScoreEntry};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum JournalEvent {
    SessionCreated { admin: IdentityToken },
    PlayerJoined { id: IdentityToken, name: String, resumed: bool },
    PlayerLeft { id: IdentityToken },
    PlayerRemoved { id: IdentityToken },
    StatementsSubmitted { id: IdentityToken, sets: usize },
    GameStarted { game: u32, participants: usize },
    GuessingStarted { game: u32, round_sets: usize },
    RoundActivated { round_set: RoundSetId, subject: IdentityToken },
    GuessRecorded { guesser: IdentityToken, round_set: RoundSetId, index: usize, correct: bool },
    RoundResolved { round_set: RoundSetId },
    RoundAbandoned { round_set: RoundSetId },
    GameFinished { game: u32, early: bool, scores: Vec<ScoreEntry> },
    SessionReset { keep_teams: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub at: u64,
    #[serde(flatten)]
    pub event: JournalEvent,
}

#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: JournalEvent) {
        self.entries.push(JournalEntry {
            at: get_timestamp(),
            event,
        });
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Hands over everything recorded so far and starts a fresh journal.
    pub fn take(&mut self) -> Vec<JournalEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_serialize_flat() {
        let mut journal = Journal::new();
        journal.record(JournalEvent::PlayerJoined {
            id: IdentityToken::from("p1"),
            name: "Ada".into(),
            resumed: false,
        });

        let json = serde_json::to_value(&journal.entries()[0]).unwrap();
        assert_eq!(json["event"], "player-joined");
        assert_eq!(json["id"], "p1");
        assert!(json["at"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_take_drains() {
        let mut journal = Journal::new();
        journal.record(JournalEvent::SessionReset { keep_teams: true });
        journal.record(JournalEvent::PlayerLeft {
            id: IdentityToken::from("p1"),
        });
        assert_eq!(journal.take().len(), 2);
        assert!(journal.is_empty());
    }
}
