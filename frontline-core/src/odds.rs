//! Monte Carlo battle odds.
//!
//! Each trial resolves the same attacks against a fresh copy of the state
//! with its own seeded random source (`seed + trial`), so trials run in
//! parallel and the summary is the same for a given seed regardless of
//! thread count.

use crate::battle::{BattleContext, BattleError, BattleKey, BattleKind, BattleOutcome, Winner};
use crate::config::BattleConfig;
use crate::observer::ObserverRegistry;
use crate::participant::DefaultParticipant;
use crate::random::SeededRandomSource;
use crate::state::{GameState, TerritoryId};
use crate::tracker::{Attack, BattleTracker, FightOrder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::instrument;

/// Win/loss fractions for one battle site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleOdds {
    pub territory: TerritoryId,
    pub kind: BattleKind,
    pub attacker_wins: f64,
    pub defender_wins: f64,
    pub draws: f64,
    pub average_rounds: f64,
    pub average_attacker_survivors: f64,
    pub average_defender_survivors: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsSummary {
    pub trials: u32,
    pub seed: u64,
    pub battles: Vec<BattleOdds>,
}

#[derive(Default)]
struct Tally {
    attacker_wins: u32,
    defender_wins: u32,
    draws: u32,
    rounds: u64,
    attacker_survivors: u64,
    defender_survivors: u64,
}

impl Tally {
    fn add(&mut self, outcome: &BattleOutcome) {
        match outcome.winner {
            Winner::Attacker => self.attacker_wins += 1,
            Winner::Defender => self.defender_wins += 1,
            Winner::Draw => self.draws += 1,
        }
        self.rounds += u64::from(outcome.rounds);
        self.attacker_survivors += outcome.attacker_survivors.len() as u64;
        self.defender_survivors += outcome.defender_survivors.len() as u64;
    }

    fn odds(&self, key: BattleKey, trials: u32) -> BattleOdds {
        let n = f64::from(trials);
        BattleOdds {
            territory: key.territory,
            kind: key.kind,
            attacker_wins: f64::from(self.attacker_wins) / n,
            defender_wins: f64::from(self.defender_wins) / n,
            draws: f64::from(self.draws) / n,
            average_rounds: self.rounds as f64 / n,
            average_attacker_survivors: self.attacker_survivors as f64 / n,
            average_defender_survivors: self.defender_survivors as f64 / n,
        }
    }
}

/// Resolve `attacks` `trials` times and summarize every battle they start.
///
/// Trials use the default participant: default casualties, no retreats.
#[instrument(skip_all, name = "odds", fields(trials = trials))]
pub fn estimate(
    state: &GameState,
    attacks: &[Attack],
    config: &BattleConfig,
    trials: u32,
    seed: u64,
) -> Result<OddsSummary, BattleError> {
    config.validate()?;
    let results: Vec<Vec<BattleOutcome>> = (0..trials)
        .into_par_iter()
        .map(|trial| run_trial(state, attacks, config, seed.wrapping_add(u64::from(trial))))
        .collect::<Result<_, _>>()?;

    let mut tallies: BTreeMap<BattleKey, Tally> = BTreeMap::new();
    for outcomes in &results {
        for outcome in outcomes {
            tallies
                .entry(BattleKey::new(outcome.territory, outcome.kind))
                .or_default()
                .add(outcome);
        }
    }
    let battles = tallies
        .iter()
        .map(|(key, tally)| tally.odds(*key, trials))
        .collect();
    log::info!("Estimated odds over {} trials", trials);
    Ok(OddsSummary {
        trials,
        seed,
        battles,
    })
}

fn run_trial(
    state: &GameState,
    attacks: &[Attack],
    config: &BattleConfig,
    seed: u64,
) -> Result<Vec<BattleOutcome>, BattleError> {
    let mut state = state.clone();
    let mut tracker = BattleTracker::new();
    tracker.add_attacks(&mut state, attacks)?;

    let mut random = SeededRandomSource::new(seed);
    let mut participant = DefaultParticipant;
    let observers = ObserverRegistry::new();
    let mut ctx = BattleContext {
        config,
        random: &mut random,
        participant: &mut participant,
        observers: &observers,
    };
    tracker.fight_all(&FightOrder::Stable, &mut state, &mut ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::GameStateBuilder;
    use crate::tracker::Route;

    fn karelia(attackers: &[(u32, &str)]) -> (GameState, Vec<Attack>) {
        let mut builder = GameStateBuilder::classic()
            .land(1, "Karelia", Some("Russians"))
            .land(2, "East Poland", Some("Germans"))
            .neighbors(1, 2)
            .unit(1, 100, "infantry", "Russians");
        let mut ids = Vec::new();
        for (id, unit_type) in attackers {
            builder = builder.unit(1, *id, unit_type, "Germans");
            ids.push(*id);
        }
        let attack = Attack {
            route: Route::new(2, vec![1]),
            units: ids,
            kind: BattleKind::Normal,
        };
        (builder.build(), vec![attack])
    }

    #[test]
    fn test_same_seed_same_summary() {
        let (state, attacks) = karelia(&[(1, "infantry"), (2, "infantry")]);
        let config = BattleConfig::default();
        let a = estimate(&state, &attacks, &config, 64, 7).unwrap();
        let b = estimate(&state, &attacks, &config, 64, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fractions_cover_every_trial() {
        let (state, attacks) = karelia(&[(1, "infantry"), (2, "artillery")]);
        let summary = estimate(&state, &attacks, &BattleConfig::default(), 50, 3).unwrap();
        assert_eq!(summary.battles.len(), 1);
        let odds = &summary.battles[0];
        let total = odds.attacker_wins + odds.defender_wins + odds.draws;
        assert!((total - 1.0).abs() < 1e-9);
        assert!(odds.average_rounds >= 1.0);
    }

    #[test]
    fn test_low_luck_overwhelming_attack_always_wins() {
        // 3 armour = 9 power: one guaranteed hit kills the lone infantry.
        let (state, attacks) = karelia(&[(1, "armour"), (2, "armour"), (3, "armour")]);
        let summary = estimate(&state, &attacks, &BattleConfig::low_luck(), 20, 1).unwrap();
        let odds = &summary.battles[0];
        assert_eq!(odds.attacker_wins, 1.0);
        assert_eq!(odds.average_rounds, 1.0);
        assert_eq!(odds.average_defender_survivors, 0.0);
    }

    #[test]
    fn test_state_is_not_mutated() {
        let (state, attacks) = karelia(&[(1, "armour")]);
        estimate(&state, &attacks, &BattleConfig::default(), 8, 9).unwrap();
        assert_eq!(state.territory(1).unwrap().owner.as_deref(), Some("Russians"));
    }

    #[test]
    fn test_zero_trials_is_empty() {
        let (state, attacks) = karelia(&[(1, "armour")]);
        let summary = estimate(&state, &attacks, &BattleConfig::default(), 0, 9).unwrap();
        assert!(summary.battles.is_empty());
    }
}
