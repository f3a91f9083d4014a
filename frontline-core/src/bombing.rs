//! Strategic bombing raids.
//!
//! A raid is a one-round [`Battle`] of kind
//! [`BombingRaid`](crate::battle::BattleKind::BombingRaid): defending AA fires
//! at the bombers, then every surviving strategic bomber rolls damage against
//! the territory's production capacity. No unit other than AA casualties is
//! ever destroyed.

use crate::battle::steps;
use crate::battle::{
    Battle, BattleContext, BattleError, BattleOutcome, BattleResult, Flow, ProductionDamage,
    RoundState,
};
use crate::dice::{Die, DieKind};
use crate::fixed::Fixed;
use crate::observer::event_log::BattleEvent;
use crate::power::{self, Side};
use crate::state::GameState;

/// Die size and flat bonus for raid damage.
///
/// Low-luck damage on a die of 5 or more sides rolls a die a third the size
/// and adds the same amount, narrowing the spread around the same mean.
pub fn damage_die(sides: u32, low_luck_damage: bool) -> (u32, u32) {
    if low_luck_damage && sides >= 5 {
        let third = (sides + 1) / 3;
        (third, third)
    } else {
        (sides, 0)
    }
}

impl Battle {
    pub(crate) fn fight_raid(
        &mut self,
        state: &mut GameState,
        ctx: &mut BattleContext,
    ) -> Result<BattleOutcome, BattleError> {
        let has_aa = !self.aa_units(state)?.is_empty()
            && !self
                .units_where(state, Side::Attacker, |ut, _| ut.is_air)?
                .is_empty();
        let mut round = RoundState::default();
        for step in steps::build_raid(has_aa) {
            if let Flow::Retreated = self.execute(&step, state, ctx, &mut round)? {
                break;
            }
        }
        self.round += 1;

        let result = if self.combat_units(state, Side::Attacker)?.is_empty() {
            BattleResult::Lost
        } else {
            BattleResult::Bombed
        };
        self.conclude(state, ctx, result, None)
    }

    /// Roll damage for each surviving strategic bomber and apply it.
    pub(crate) fn raid_damage(
        &mut self,
        state: &mut GameState,
        ctx: &mut BattleContext,
    ) -> Result<(), BattleError> {
        let config = ctx.config;
        let (production, capacity_before) = {
            let t = state.territory(self.territory)?;
            (t.production, t.production_capacity())
        };

        let mut damage = 0u32;
        let mut dice = Vec::new();
        let mut expected = Fixed::ZERO;
        for unit in self.units_where(state, Side::Attacker, |ut, _| ut.strategic_bomber)? {
            let ut = state.type_of(unit)?;
            let tech = state.tech(&unit.owner);
            let sides = ut.dice_sides.unwrap_or(config.dice_sides);
            let (die_sides, bonus) = damage_die(sides, config.low_luck_damage);
            let rolls = power::rolls_for(state, unit, Side::Attacker, config)?.max(1);
            let keep_best =
                config.choose_best_roll && rolls > 1 && power::is_heavy_bomber(ut, unit, state);

            let draws = ctx.random.next_many(die_sides, rolls)?;
            let best = draws.iter().copied().max().unwrap_or(0);
            let mut bomber_damage: i64 = 0;
            let mut counted = false;
            for draw in &draws {
                let kind = if !keep_best || (!counted && *draw == best) {
                    counted = true;
                    bomber_damage += i64::from(draw + 1 + bonus);
                    DieKind::Hit
                } else {
                    DieKind::Ignored
                };
                dice.push(Die::new(*draw, None, kind).for_unit(unit.id));
            }
            let counted_dice = if keep_best { 1 } else { rolls };
            expected += Fixed::from_ratio(
                i64::from(counted_dice) * i64::from(die_sides + 1 + 2 * bonus),
                2,
            );

            bomber_damage += i64::from(tech.bombing_bonus);
            let mut bomber_damage = bomber_damage.max(0) as u32;
            if config.limit_damage_to_production {
                bomber_damage = bomber_damage.min(production);
            }
            log::trace!("bomber {} deals {}", unit.id, bomber_damage);
            damage += bomber_damage;
        }

        let t = state.territory_mut(self.territory)?;
        t.production_damage = t.production_damage.saturating_add(damage).min(t.production);
        let record = ProductionDamage {
            damage,
            capacity_before,
            capacity_after: t.production_capacity(),
        };
        log::info!(
            "Raid on {} deals {} damage ({} -> {})",
            t.name,
            damage,
            record.capacity_before,
            record.capacity_after
        );
        self.production_damage = Some(record);

        self.emit(
            ctx,
            BattleEvent::DiceRolled {
                battle: self.id,
                round: self.round,
                player: self.attacker.clone(),
                hits: damage,
                expected_hits: expected.to_f64(),
                dice: dice.iter().map(Die::compressed).collect(),
            },
        );
        self.emit(
            ctx,
            BattleEvent::ProductionDamaged {
                battle: self.id,
                territory: self.territory,
                damage,
                capacity_before: record.capacity_before,
                capacity_after: record.capacity_after,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::{BattleKind, BattleStatus};
    use crate::config::BattleConfig;
    use crate::observer::ObserverRegistry;
    use crate::participant::DefaultParticipant;
    use crate::random::ScriptedRandomSource;
    use crate::state::TechState;
    use crate::testing::GameStateBuilder;

    fn ruhr(bombers: u32, production: u32) -> GameState {
        let mut builder = GameStateBuilder::classic()
            .land(1, "Ruhr", Some("Germans"))
            .production(1, production)
            .sea(2, "North Sea")
            .unit(1, 100, "factory", "Germans");
        for i in 0..bombers {
            builder = builder.unit(1, i + 1, "bomber", "Americans");
        }
        builder.build()
    }

    fn raid(state: &mut GameState, config: &BattleConfig, script: Vec<u32>) -> BattleOutcome {
        let mut battle = Battle::new(1, 1, BattleKind::BombingRaid, "Americans");
        let ids: Vec<u32> = state
            .territory(1)
            .unwrap()
            .units
            .iter()
            .filter(|u| u.owner == "Americans")
            .map(|u| u.id)
            .collect();
        battle.add_attackers(&ids, Some(2));
        let mut random = ScriptedRandomSource::new(script);
        let mut participant = DefaultParticipant;
        let observers = ObserverRegistry::new();
        let mut ctx = BattleContext {
            config,
            random: &mut random,
            participant: &mut participant,
            observers: &observers,
        };
        let outcome = battle.fight(state, &mut ctx).unwrap();
        assert_eq!(battle.status(), BattleStatus::Finished);
        outcome
    }

    #[test]
    fn test_capacity_drops_by_rolled_damage() {
        let mut state = ruhr(2, 10);
        let outcome = raid(&mut state, &BattleConfig::default(), vec![2, 4]);
        // (2 + 1) + (4 + 1)
        let damage = outcome.production_damage.unwrap();
        assert_eq!(damage.damage, 8);
        assert_eq!(damage.capacity_after, 2);
        assert_eq!(state.territory(1).unwrap().production_capacity(), 2);
        assert_eq!(outcome.result, BattleResult::Bombed);
        assert_eq!(outcome.steps, vec!["raid damage"]);
    }

    #[test]
    fn test_capacity_floors_at_zero() {
        let mut state = ruhr(3, 4);
        let config = BattleConfig {
            limit_damage_to_production: false,
            ..Default::default()
        };
        let outcome = raid(&mut state, &config, vec![5, 5, 5]);
        let damage = outcome.production_damage.unwrap();
        assert_eq!(damage.damage, 18);
        assert_eq!(damage.capacity_after, 0);
    }

    #[test]
    fn test_per_bomber_damage_capped_at_production() {
        let mut state = ruhr(1, 3);
        let outcome = raid(&mut state, &BattleConfig::default(), vec![5]);
        assert_eq!(outcome.production_damage.unwrap().damage, 3);
    }

    #[test]
    fn test_heavy_bomber_keeps_best_die_and_bonus() {
        let mut state = ruhr(1, 20);
        state.techs.insert(
            "Americans".into(),
            TechState {
                heavy_bombers: true,
                bombing_bonus: 1,
                ..Default::default()
            },
        );
        let outcome = raid(&mut state, &BattleConfig::default(), vec![1, 4]);
        // best die 4 -> 5 damage, +1 tech
        assert_eq!(outcome.production_damage.unwrap().damage, 6);
    }

    #[test]
    fn test_negative_bonus_floors_each_bomber_at_zero() {
        let mut state = ruhr(1, 20);
        state.techs.insert(
            "Americans".into(),
            TechState {
                bombing_bonus: -3,
                ..Default::default()
            },
        );
        let outcome = raid(&mut state, &BattleConfig::default(), vec![0]);
        assert_eq!(outcome.production_damage.unwrap().damage, 0);
    }

    #[test]
    fn test_low_luck_damage_die() {
        assert_eq!(damage_die(6, true), (2, 2));
        assert_eq!(damage_die(12, true), (4, 4));
        assert_eq!(damage_die(4, true), (4, 0));
        assert_eq!(damage_die(6, false), (6, 0));

        let mut state = ruhr(1, 20);
        let config = BattleConfig {
            low_luck_damage: true,
            ..Default::default()
        };
        let outcome = raid(&mut state, &config, vec![1]);
        // 1 + 1 + 2
        assert_eq!(outcome.production_damage.unwrap().damage, 4);
    }

    #[test]
    fn test_aa_shoots_before_damage() {
        let mut state = ruhr(2, 10);
        state
            .territory_mut(1)
            .unwrap()
            .units
            .push(crate::state::Unit::new(101, "aa_gun", "Germans"));
        // AA: 2 dice at strength 1; first hits. Then one bomber rolls.
        let outcome = raid(&mut state, &BattleConfig::default(), vec![0, 3, 2]);
        assert_eq!(
            outcome.steps,
            vec![
                "Germans AA fire",
                "Americans select AA casualties",
                "remove AA casualties",
                "raid damage",
            ]
        );
        assert_eq!(outcome.attacker_casualties.len(), 1);
        assert_eq!(outcome.production_damage.unwrap().damage, 3);
        // Nothing but the bomber died; the factory stands.
        assert!(state.territory(1).unwrap().contains(100));
    }
}
