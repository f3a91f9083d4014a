//! Decision-making collaborators.
//!
//! A battle blocks on a [`Participant`] whenever a player has to choose:
//! which units absorb hits, whether to retreat and where, whether subs
//! submerge. Calls are synchronous request/response; a participant that cannot
//! answer returns an error and the battle stops.
//!
//! Implementations must be deterministic given their seed so replays match.

use crate::battle::BattleId;
use crate::casualty::{self, CasualtyDetails, CasualtyQuery};
use crate::state::{PlayerId, TerritoryId, UnitId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParticipantError {
    #[error("{player} gave no answer to {request}")]
    NoAnswer { player: PlayerId, request: String },
    #[error("participant disconnected")]
    Disconnected,
}

/// Offer to withdraw the attacking force.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetreatQuery {
    pub battle: BattleId,
    pub territory: TerritoryId,
    pub player: PlayerId,
    pub round: u32,
    /// Territories the attack came from; any answer must be one of these.
    pub options: Vec<TerritoryId>,
    pub attackers_remaining: usize,
    pub defenders_remaining: usize,
}

/// Offer to submerge surviving subs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmergeQuery {
    pub battle: BattleId,
    pub territory: TerritoryId,
    pub player: PlayerId,
    pub round: u32,
    pub units: Vec<UnitId>,
}

/// Answers battle decisions for every player.
///
/// The query names the player being asked.
pub trait Participant: Send {
    fn name(&self) -> &str;

    fn select_casualties(
        &mut self,
        query: &CasualtyQuery,
    ) -> Result<CasualtyDetails, ParticipantError>;

    /// `None` keeps fighting.
    fn retreat_query(&mut self, query: &RetreatQuery)
        -> Result<Option<TerritoryId>, ParticipantError>;

    fn submerge_query(&mut self, query: &SubmergeQuery) -> Result<bool, ParticipantError>;
}

/// Takes the suggested casualties, never retreats, never submerges.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParticipant;

impl Participant for DefaultParticipant {
    fn name(&self) -> &str {
        "default"
    }

    fn select_casualties(
        &mut self,
        query: &CasualtyQuery,
    ) -> Result<CasualtyDetails, ParticipantError> {
        Ok(query.default.clone())
    }

    fn retreat_query(
        &mut self,
        _query: &RetreatQuery,
    ) -> Result<Option<TerritoryId>, ParticipantError> {
        Ok(None)
    }

    fn submerge_query(&mut self, _query: &SubmergeQuery) -> Result<bool, ParticipantError> {
        Ok(false)
    }
}

/// Picks casualties in random order and retreats with a fixed chance.
pub struct RandomParticipant {
    rng: StdRng,
    retreat_chance: f64,
}

impl RandomParticipant {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            retreat_chance: 0.25,
        }
    }

    pub fn with_retreat_chance(mut self, chance: f64) -> Self {
        self.retreat_chance = chance.clamp(0.0, 1.0);
        self
    }
}

impl Participant for RandomParticipant {
    fn name(&self) -> &str {
        "random"
    }

    fn select_casualties(
        &mut self,
        query: &CasualtyQuery,
    ) -> Result<CasualtyDetails, ParticipantError> {
        let mut order = query.candidates.clone();
        order.shuffle(&mut self.rng);
        Ok(casualty::allocate_in_order(
            &order,
            query.hits,
            query.allow_multiple_hits_per_unit,
        ))
    }

    fn retreat_query(
        &mut self,
        query: &RetreatQuery,
    ) -> Result<Option<TerritoryId>, ParticipantError> {
        if query.options.is_empty() || !self.rng.gen_bool(self.retreat_chance) {
            return Ok(None);
        }
        Ok(query.options.choose(&mut self.rng).copied())
    }

    fn submerge_query(&mut self, _query: &SubmergeQuery) -> Result<bool, ParticipantError> {
        Ok(self.rng.gen::<bool>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casualty::{validate_casualties, CasualtyCandidate};

    fn query() -> CasualtyQuery {
        let candidates: Vec<CasualtyCandidate> = (1..=5)
            .map(|i| CasualtyCandidate {
                unit: i,
                unit_type: "infantry".into(),
                cost: 3,
                remaining_hit_points: if i == 5 { 2 } else { 1 },
            })
            .collect();
        CasualtyQuery {
            battle: 1,
            territory: 7,
            player: "Germans".into(),
            step: "Germans select casualties".into(),
            hits: 3,
            default: casualty::default_casualties(&candidates, 3, false),
            candidates,
            allow_multiple_hits_per_unit: false,
        }
    }

    #[test]
    fn test_default_participant_takes_suggestion() {
        let q = query();
        let answer = DefaultParticipant.select_casualties(&q).unwrap();
        assert_eq!(answer, q.default);
    }

    #[test]
    fn test_random_participant_answers_are_valid_and_seeded() {
        let q = query();
        let mut a = RandomParticipant::new(9);
        let mut b = RandomParticipant::new(9);
        for _ in 0..20 {
            let x = a.select_casualties(&q).unwrap();
            assert_eq!(validate_casualties(&q.candidates, q.hits, &x, false), Ok(()));
            assert_eq!(x, b.select_casualties(&q).unwrap());
        }
    }

    #[test]
    fn test_random_retreat_only_to_offered_territories() {
        let mut p = RandomParticipant::new(3).with_retreat_chance(1.0);
        let mut q = RetreatQuery {
            battle: 1,
            territory: 7,
            player: "Germans".into(),
            round: 1,
            options: vec![2, 4],
            attackers_remaining: 3,
            defenders_remaining: 1,
        };
        let choice = p.retreat_query(&q).unwrap();
        assert!(matches!(choice, Some(2) | Some(4)));

        q.options.clear();
        assert_eq!(p.retreat_query(&q).unwrap(), None);
    }
}
