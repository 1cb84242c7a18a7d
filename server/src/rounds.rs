//! Statement pool and round sequencing
//!
//! At game start every submitted statement set becomes a `RoundSet` and the
//! pool is shuffled exactly once. That order is the turn order of the whole
//! game: `advance` always takes the first pending set in pool order and never
//! reshuffles the pool.
//!
//! Activation shuffles the three statements of that one set into display
//! positions and fixes the lie position. The position never changes afterwards,
//! so every guess recorded against the set is scored against the same answer.

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{IdentityToken, RoundSetId, StatementSet, STATEMENTS_PER_SET};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundSetStatus {
    Pending,
    Active,
    Resolved,
    /// Cut short by finish-early or removal; its guesses never score
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presentation {
    pub statements: [String; STATEMENTS_PER_SET],
    pub lie_position: usize,
}

#[derive(Debug, Clone)]
pub struct RoundSet {
    pub id: RoundSetId,
    pub owner: IdentityToken,
    pub round: u8,
    pub truths: [String; 2],
    pub lie: String,
    status: RoundSetStatus,
    presentation: Option<Presentation>,
}

impl RoundSet {
    pub fn from_statements(game_no: u32, owner: &IdentityToken, set: &StatementSet) -> Self {
        Self {
            id: RoundSetId::new(game_no, owner, set.round),
            owner: owner.clone(),
            round: set.round,
            truths: set.truths.clone(),
            lie: set.lie.clone(),
            status: RoundSetStatus::Pending,
            presentation: None,
        }
    }

    pub fn status(&self) -> RoundSetStatus {
        self.status
    }

    pub fn is_consumed(&self) -> bool {
        self.status != RoundSetStatus::Pending
    }

    pub fn presentation(&self) -> Option<&Presentation> {
        self.presentation.as_ref()
    }

    pub fn lie_position(&self) -> Option<usize> {
        self.presentation.as_ref().map(|p| p.lie_position)
    }

    pub fn statement_count(&self) -> usize {
        STATEMENTS_PER_SET
    }

    fn activate<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        debug_assert_eq!(self.status, RoundSetStatus::Pending);

        // 0 and 1 are the truths, 2 is the lie
        let mut order = [0usize, 1, 2];
        order.shuffle(rng);

        let text = |original: usize| -> String {
            match original {
                0 => self.truths[0].clone(),
                1 => self.truths[1].clone(),
                _ => self.lie.clone(),
            }
        };
        let statements = [text(order[0]), text(order[1]), text(order[2])];
        let lie_position = order.iter().position(|&o| o == 2).unwrap_or(0);

        self.presentation = Some(Presentation {
            statements,
            lie_position,
        });
        self.status = RoundSetStatus::Active;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Activated(RoundSetId),
    Exhausted,
}

#[derive(Debug, Default)]
pub struct RoundSequencer {
    game_no: u32,
    pool: Vec<RoundSet>,
    active: Option<usize>,
}

impl RoundSequencer {
    pub fn empty(game_no: u32) -> Self {
        Self {
            game_no,
            pool: Vec::new(),
            active: None,
        }
    }

    /// Flattens every participant's sets into one pool and fixes the turn
    /// order. Only rounds below `rounds_count` are taken.
    pub fn gather<'a, I, R>(game_no: u32, sources: I, rounds_count: u8, rng: &mut R) -> Self
    where
        I: IntoIterator<Item = (&'a IdentityToken, &'a BTreeMap<u8, StatementSet>)>,
        R: Rng + ?Sized,
    {
        let mut pool: Vec<RoundSet> = sources
            .into_iter()
            .flat_map(|(owner, sets)| {
                sets.values()
                    .filter(move |set| set.round < rounds_count)
                    .map(move |set| RoundSet::from_statements(game_no, owner, set))
            })
            .collect();
        pool.shuffle(rng);

        debug!("Game {}: gathered {} round sets", game_no, pool.len());
        Self {
            game_no,
            pool,
            active: None,
        }
    }

    pub fn game_no(&self) -> u32 {
        self.game_no
    }

    /// Resolves the active set, if any, then activates the next pending one.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Advance {
        self.resolve_active();

        match self
            .pool
            .iter()
            .position(|set| set.status == RoundSetStatus::Pending)
        {
            Some(index) => {
                self.pool[index].activate(rng);
                self.active = Some(index);
                Advance::Activated(self.pool[index].id.clone())
            }
            None => Advance::Exhausted,
        }
    }

    pub fn active(&self) -> Option<&RoundSet> {
        self.active.map(|i| &self.pool[i])
    }

    pub fn resolve_active(&mut self) -> Option<RoundSetId> {
        self.finish_active(RoundSetStatus::Resolved)
    }

    pub fn abandon_active(&mut self) -> Option<RoundSetId> {
        self.finish_active(RoundSetStatus::Abandoned)
    }

    fn finish_active(&mut self, status: RoundSetStatus) -> Option<RoundSetId> {
        let index = self.active.take()?;
        let set = &mut self.pool[index];
        set.status = status;
        Some(set.id.clone())
    }

    /// Abandons the owner's sets that were not played yet.
    pub fn abandon_pending_of(&mut self, owner: &IdentityToken) -> usize {
        let mut count = 0;
        for set in &mut self.pool {
            if &set.owner == owner && set.status == RoundSetStatus::Pending {
                set.status = RoundSetStatus::Abandoned;
                count += 1;
            }
        }
        count
    }

    pub fn get(&self, id: &RoundSetId) -> Option<&RoundSet> {
        self.pool.iter().find(|set| &set.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoundSet> {
        self.pool.iter()
    }

    pub fn resolved(&self) -> impl Iterator<Item = &RoundSet> {
        self.pool
            .iter()
            .filter(|set| set.status == RoundSetStatus::Resolved)
    }

    pub fn last_resolved(&self) -> Option<&RoundSet> {
        // Pool order is play order, so the last resolved set is the latest.
        self.resolved().last()
    }

    pub fn total(&self) -> usize {
        self.pool.len()
    }

    pub fn consumed(&self) -> usize {
        self.pool.iter().filter(|set| set.is_consumed()).count()
    }

    pub fn remaining(&self) -> usize {
        self.pool.len() - self.consumed()
    }

    pub fn turn_order(&self) -> Vec<RoundSetId> {
        self.pool.iter().map(|set| set.id.clone()).collect()
    }
}
