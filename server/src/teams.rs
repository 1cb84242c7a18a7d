//! Team assignment under the three team modes
//!
//! `deal_balanced` is the pure assignment step used by random mode. `TeamBoard`
//! owns the teams of one session and enforces that an identity belongs to at
//! most one team.

use crate::error::{SessionError, SessionResult};
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{IdentityToken, TeamId, TeamMode, MAX_TEAM_COUNT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub members: Vec<IdentityToken>,
}

/// Shuffles the participants and deals them round-robin into `team_count`
/// buckets, so bucket sizes differ by at most one. Empty buckets are dropped.
pub fn deal_balanced<R: Rng + ?Sized>(
    participants: &[IdentityToken],
    team_count: usize,
    rng: &mut R,
) -> Vec<Vec<IdentityToken>> {
    let team_count = team_count.max(1);
    let mut shuffled = participants.to_vec();
    shuffled.shuffle(rng);

    let mut buckets: Vec<Vec<IdentityToken>> = vec![Vec::new(); team_count];
    for (i, identity) in shuffled.into_iter().enumerate() {
        buckets[i % team_count].push(identity);
    }
    buckets.retain(|bucket| !bucket.is_empty());
    buckets
}

#[derive(Debug)]
pub struct TeamBoard {
    mode: TeamMode,
    teams: Vec<Team>,
    next_id: u32,
}

impl Default for TeamBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl TeamBoard {
    pub fn new() -> Self {
        Self {
            mode: TeamMode::None,
            teams: Vec::new(),
            next_id: 1,
        }
    }

    pub fn mode(&self) -> TeamMode {
        self.mode
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn get(&self, id: TeamId) -> Option<&Team> {
        self.teams.iter().find(|t| t.id == id)
    }

    pub fn team_of(&self, identity: &IdentityToken) -> Option<TeamId> {
        self.teams
            .iter()
            .find(|t| t.members.contains(identity))
            .map(|t| t.id)
    }

    /// Switches mode and rebuilds every team from scratch.
    pub fn configure<R: Rng + ?Sized>(
        &mut self,
        mode: TeamMode,
        team_count: usize,
        participants: &[IdentityToken],
        rng: &mut R,
    ) -> SessionResult<()> {
        if mode != TeamMode::None && !(1..=MAX_TEAM_COUNT).contains(&team_count) {
            return Err(SessionError::InvalidSettings(format!(
                "teamCount must be within 1..={}",
                MAX_TEAM_COUNT
            )));
        }

        self.mode = mode;
        self.teams.clear();

        match mode {
            TeamMode::None => {}
            TeamMode::Random => {
                for members in deal_balanced(participants, team_count, rng) {
                    self.push_team(members);
                }
            }
            TeamMode::AdminAssigned => {
                for _ in 0..team_count {
                    self.push_team(Vec::new());
                }
            }
        }

        debug!("Team mode {:?} with {} teams", mode, self.teams.len());
        Ok(())
    }

    /// Moves a participant to `team`, or out of every team with `None`.
    pub fn assign(&mut self, identity: &IdentityToken, team: Option<TeamId>) -> SessionResult<()> {
        if self.mode != TeamMode::AdminAssigned {
            return Err(SessionError::TeamModeMismatch("admin-assigned"));
        }
        if let Some(id) = team {
            if self.get(id).is_none() {
                return Err(SessionError::UnknownTeam(id));
            }
        }

        for t in &mut self.teams {
            t.members.retain(|m| m != identity);
        }
        if let Some(id) = team {
            if let Some(t) = self.teams.iter_mut().find(|t| t.id == id) {
                t.members.push(identity.clone());
            }
        }
        Ok(())
    }

    /// Seats a late joiner. Only random mode places people automatically.
    pub fn place_newcomer(&mut self, identity: &IdentityToken) -> Option<TeamId> {
        if self.mode != TeamMode::Random {
            return None;
        }
        if let Some(existing) = self.team_of(identity) {
            return Some(existing);
        }

        match self.teams.iter_mut().min_by_key(|t| t.members.len()) {
            Some(team) => {
                team.members.push(identity.clone());
                Some(team.id)
            }
            None => Some(self.push_team(vec![identity.clone()])),
        }
    }

    /// Drops a participant from its team. Empty teams disappear except in
    /// admin-assigned mode, where they stay as slots.
    pub fn remove_member(&mut self, identity: &IdentityToken) {
        for t in &mut self.teams {
            t.members.retain(|m| m != identity);
        }
        if self.mode != TeamMode::AdminAssigned {
            self.teams.retain(|t| !t.members.is_empty());
        }
    }

    pub fn rename(&mut self, id: TeamId, name: String) -> SessionResult<()> {
        let team = self
            .teams
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(SessionError::UnknownTeam(id))?;
        team.name = name;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.mode = TeamMode::None;
        self.teams.clear();
    }

    fn push_team(&mut self, members: Vec<IdentityToken>) -> TeamId {
        let id = TeamId(self.next_id);
        self.next_id += 1;
        let name = format!("Team {}", self.teams.len() + 1);
        self.teams.push(Team { id, name, members });
        id
    }
}
