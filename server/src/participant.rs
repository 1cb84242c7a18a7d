//! Participants (admin and players) and the per-session roster
//!
//! A participant is keyed by its identity token and never by its connection.
//! Disconnecting only flips the lifecycle state to `Disconnected` and clears the
//! connection slot; every submitted statement, guess and team binding stays in
//! place so a reconnect with the same token resumes exactly where it left off.
//! Explicit removal leaves a `Removed` tombstone so the token cannot be reused.

use crate::connection::ConnectionId;
use crate::error::{SessionError, SessionResult};
use crate::scoring::ParticipantStats;
use shared::{IdentityToken, LifecycleState, RoundSetId, StatementSet, TeamId};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Participant {
    pub identity: IdentityToken,
    pub name: String,
    pub is_admin: bool,
    pub team: Option<TeamId>,
    pub ready: bool,
    /// Submitted sets keyed by round index
    pub statements: BTreeMap<u8, StatementSet>,
    /// RoundSet id -> chosen display position
    pub guesses: HashMap<RoundSetId, usize>,
    /// Last full replay of the scoreboard, never updated incrementally
    pub stats: ParticipantStats,
    pub state: LifecycleState,
    pub connection: Option<ConnectionId>,
    pub last_seen: Instant,
}

impl Participant {
    pub fn new(identity: IdentityToken, name: String, is_admin: bool) -> Self {
        Self {
            identity,
            name,
            is_admin,
            team: None,
            ready: false,
            statements: BTreeMap::new(),
            guesses: HashMap::new(),
            stats: ParticipantStats::default(),
            state: LifecycleState::Active,
            connection: None,
            last_seen: Instant::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    pub fn is_removed(&self) -> bool {
        self.state == LifecycleState::Removed
    }

    pub fn has_submitted(&self, rounds_count: u8) -> bool {
        (0..rounds_count).all(|round| self.statements.contains_key(&round))
    }

    /// Replaces every previously submitted set.
    ///
    /// The submission must cover rounds `0..rounds_count` exactly once.
    pub fn replace_statements(
        &mut self,
        sets: &[StatementSet],
        rounds_count: u8,
    ) -> SessionResult<()> {
        if sets.len() != rounds_count as usize {
            return Err(SessionError::InvalidStatements(format!(
                "expected {} statement sets, got {}",
                rounds_count,
                sets.len()
            )));
        }

        let mut by_round = BTreeMap::new();
        for set in sets {
            if set.round >= rounds_count {
                return Err(SessionError::InvalidStatements(format!(
                    "round {} is outside 0..{}",
                    set.round, rounds_count
                )));
            }
            let clean = set.normalized().map_err(SessionError::InvalidStatements)?;
            if by_round.insert(set.round, clean).is_some() {
                return Err(SessionError::InvalidStatements(format!(
                    "round {} was submitted twice",
                    set.round
                )));
            }
        }

        self.statements = by_round;
        Ok(())
    }

    /// Records a guess, overwriting an earlier one for the same RoundSet.
    pub fn record_guess(&mut self, round_set: RoundSetId, index: usize) -> Option<usize> {
        self.guesses.insert(round_set, index)
    }

    pub fn guess_for(&self, round_set: &RoundSetId) -> Option<usize> {
        self.guesses.get(round_set).copied()
    }

    /// Drops everything tied to one game; identity, name and team survive.
    pub fn clear_game(&mut self) {
        self.statements.clear();
        self.guesses.clear();
        self.ready = false;
        self.stats = ParticipantStats::default();
    }
}

/// Participants of one session in join order.
#[derive(Debug, Default)]
pub struct Roster {
    members: HashMap<IdentityToken, Participant>,
    order: Vec<IdentityToken>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, participant: Participant) {
        if !self.members.contains_key(&participant.identity) {
            self.order.push(participant.identity.clone());
        }
        self.members
            .insert(participant.identity.clone(), participant);
    }

    pub fn get(&self, identity: &IdentityToken) -> Option<&Participant> {
        self.members.get(identity)
    }

    pub fn get_mut(&mut self, identity: &IdentityToken) -> Option<&mut Participant> {
        self.members.get_mut(identity)
    }

    /// Looks up a participant that has not been removed.
    pub fn member(&self, identity: &IdentityToken) -> SessionResult<&Participant> {
        match self.members.get(identity) {
            Some(p) if p.is_removed() => Err(SessionError::ParticipantRemoved(identity.clone())),
            Some(p) => Ok(p),
            None => Err(SessionError::UnknownParticipant(identity.clone())),
        }
    }

    pub fn member_mut(&mut self, identity: &IdentityToken) -> SessionResult<&mut Participant> {
        match self.members.get_mut(identity) {
            Some(p) if p.is_removed() => Err(SessionError::ParticipantRemoved(identity.clone())),
            Some(p) => Ok(p),
            None => Err(SessionError::UnknownParticipant(identity.clone())),
        }
    }

    /// Every record in join order, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.order.iter().filter_map(|id| self.members.get(id))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Participant> {
        self.members.values_mut()
    }

    /// Participants that were not removed, in join order.
    pub fn visible(&self) -> impl Iterator<Item = &Participant> {
        self.iter().filter(|p| !p.is_removed())
    }

    pub fn active(&self) -> impl Iterator<Item = &Participant> {
        self.iter().filter(|p| p.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.members.values().filter(|p| p.is_active()).count()
    }

    pub fn connected(&self) -> impl Iterator<Item = (&Participant, ConnectionId)> {
        self.iter()
            .filter_map(|p| p.connection.map(|conn| (p, conn)))
    }

    pub fn has_live_connection(&self) -> bool {
        self.members.values().any(|p| p.connection.is_some())
    }

    /// Moves a participant to the resumable holding state.
    ///
    /// Returns false when the participant was not active.
    pub fn disconnect(&mut self, identity: &IdentityToken) -> bool {
        match self.members.get_mut(identity) {
            Some(p) if p.is_active() => {
                p.state = LifecycleState::Disconnected;
                p.connection = None;
                p.last_seen = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Restores a held participant onto a fresh connection.
    pub fn reattach(
        &mut self,
        identity: &IdentityToken,
        connection: ConnectionId,
    ) -> SessionResult<&mut Participant> {
        let participant = self.member_mut(identity)?;
        participant.state = LifecycleState::Active;
        participant.connection = Some(connection);
        participant.last_seen = Instant::now();
        Ok(participant)
    }

    /// Turns the record into a tombstone. The name stays for history; scoring skips it.
    pub fn remove(&mut self, identity: &IdentityToken) -> SessionResult<&Participant> {
        let participant = self.member_mut(identity)?;
        participant.state = LifecycleState::Removed;
        participant.connection = None;
        participant.team = None;
        participant.ready = false;
        Ok(participant)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
