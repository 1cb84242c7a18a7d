//! Guess validation and scoring
//!
//! Scores are never kept as running totals. `Scoreboard::replay` walks every
//! resolved RoundSet and the guesses stored on participants, so the result is a
//! pure function of (guesses, lie positions). Active and abandoned sets never
//! contribute.

use crate::error::{SessionError, SessionResult};
use crate::participant::Roster;
use crate::rounds::{RoundSet, RoundSetStatus};
use crate::teams::Team;
use shared::{
    DeceiverEntry, GuesserEntry, IdentityToken, Phase, RoundSetId, ScoreEntry, TeamView,
    LEADERBOARD_SIZE,
};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticipantStats {
    pub score: u32,
    pub lies_detected: u32,
    /// Guesses on this participant's sets that missed the lie
    pub deceptions: u32,
    pub guesses_received: u32,
    pub guesses_made: u32,
}

impl ParticipantStats {
    pub fn deception_rate(&self) -> f64 {
        if self.guesses_received == 0 {
            0.0
        } else {
            self.deceptions as f64 / self.guesses_received as f64
        }
    }
}

/// Checks a guess against the active RoundSet.
///
/// Preconditions are checked in a fixed order and each has its own error:
/// phase, then target, then index. Guessing on one's own set comes last.
pub fn validate_guess(
    phase: Phase,
    active: Option<&RoundSet>,
    guesser: &IdentityToken,
    target: &IdentityToken,
    claimed_set: Option<&RoundSetId>,
    index: usize,
) -> SessionResult<RoundSetId> {
    if phase != Phase::Guessing {
        return Err(SessionError::NotAcceptingGuesses);
    }
    let set = active.ok_or(SessionError::NotAcceptingGuesses)?;

    let stale_set = claimed_set.map_or(false, |claimed| claimed != &set.id);
    if &set.owner != target || stale_set {
        return Err(SessionError::WrongTarget);
    }

    let count = set.statement_count();
    if index >= count {
        return Err(SessionError::InvalidIndex { index, count });
    }

    if &set.owner == guesser {
        return Err(SessionError::OwnStatements);
    }

    Ok(set.id.clone())
}

pub fn is_correct(set: &RoundSet, index: usize) -> bool {
    set.lie_position() == Some(index)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scoreboard {
    stats: HashMap<IdentityToken, ParticipantStats>,
}

impl Scoreboard {
    /// Rebuilds every counter from stored guesses and fixed lie positions.
    /// Guesses of removed participants no longer count.
    pub fn replay<'a, I>(sets: I, roster: &Roster) -> Self
    where
        I: IntoIterator<Item = &'a RoundSet>,
    {
        let mut stats: HashMap<IdentityToken, ParticipantStats> = HashMap::new();

        for set in sets {
            if set.status() != RoundSetStatus::Resolved {
                continue;
            }
            let Some(lie_position) = set.lie_position() else {
                continue;
            };

            for guesser in roster.visible() {
                if guesser.identity == set.owner {
                    continue;
                }
                let Some(index) = guesser.guess_for(&set.id) else {
                    continue;
                };

                let correct = index == lie_position;
                {
                    let g = stats.entry(guesser.identity.clone()).or_default();
                    g.guesses_made += 1;
                    if correct {
                        g.score += 1;
                        g.lies_detected += 1;
                    }
                }
                let owner = stats.entry(set.owner.clone()).or_default();
                owner.guesses_received += 1;
                if !correct {
                    owner.deceptions += 1;
                }
            }
        }

        Self { stats }
    }

    pub fn stats(&self, identity: &IdentityToken) -> ParticipantStats {
        self.stats.get(identity).copied().unwrap_or_default()
    }

    /// Scores of every visible participant, best first, join order on ties.
    pub fn score_entries(&self, roster: &Roster) -> Vec<ScoreEntry> {
        let mut entries: Vec<ScoreEntry> = roster
            .visible()
            .map(|p| {
                let s = self.stats(&p.identity);
                ScoreEntry {
                    id: p.identity.clone(),
                    name: p.name.clone(),
                    team: p.team,
                    score: s.score,
                    lies_detected: s.lies_detected,
                    deceptions: s.deceptions,
                    guesses_received: s.guesses_received,
                }
            })
            .collect();
        entries.sort_by(|a, b| b.score.cmp(&a.score));
        entries
    }

    /// Team score is the sum of its members' scores.
    pub fn team_scores(&self, teams: &[Team]) -> Vec<TeamView> {
        teams
            .iter()
            .map(|team| TeamView {
                id: team.id,
                name: team.name.clone(),
                members: team.members.clone(),
                score: team.members.iter().map(|m| self.stats(m).score).sum(),
            })
            .collect()
    }

    /// Participants with at least one correct guess, most correct first.
    pub fn best_guessers(&self, roster: &Roster) -> Vec<GuesserEntry> {
        let mut entries: Vec<GuesserEntry> = roster
            .visible()
            .filter_map(|p| {
                let s = self.stats(&p.identity);
                (s.lies_detected > 0).then(|| GuesserEntry {
                    id: p.identity.clone(),
                    name: p.name.clone(),
                    correct_guesses: s.lies_detected,
                })
            })
            .collect();
        entries.sort_by(|a, b| b.correct_guesses.cmp(&a.correct_guesses));
        entries.truncate(LEADERBOARD_SIZE);
        entries
    }

    /// Participants with a positive deception rate, highest rate first.
    pub fn best_deceivers(&self, roster: &Roster) -> Vec<DeceiverEntry> {
        let mut entries: Vec<DeceiverEntry> = roster
            .visible()
            .filter_map(|p| {
                let s = self.stats(&p.identity);
                let rate = s.deception_rate();
                (rate > 0.0).then(|| DeceiverEntry {
                    id: p.identity.clone(),
                    name: p.name.clone(),
                    deceptions: s.deceptions,
                    guesses_received: s.guesses_received,
                    rate,
                })
            })
            .collect();
        entries.sort_by(|a, b| b.rate.partial_cmp(&a.rate).unwrap_or(Ordering::Equal));
        entries.truncate(LEADERBOARD_SIZE);
        entries
    }
}
