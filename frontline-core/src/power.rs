//! Combat power calculation.
//!
//! Turns a set of units into per-unit strengths and roll counts for one side
//! of a fight, then aggregates them. Strength is built in a fixed order:
//! base value, marine bonus, support, additive terrain, multiplicative
//! terrain, clamp to the die.

use crate::config::BattleConfig;
use crate::state::{GameState, StateError, TerrainModifier, Territory, Unit, UnitId, UnitType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which side of a battle a unit fights on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Attacker,
    Defender,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::Attacker => Side::Defender,
            Side::Defender => Side::Attacker,
        }
    }

    pub fn is_defending(self) -> bool {
        self == Side::Defender
    }
}

/// Effective firing numbers for one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPower {
    pub unit: UnitId,
    pub strength: u32,
    pub rolls: u32,
    pub dice_sides: u32,
    /// Roll several dice and keep the best one.
    pub choose_best: bool,
}

impl UnitPower {
    /// Power contributed under low luck.
    ///
    /// Choose-best units fold their extra dice into a strength bonus of
    /// `max(1, sides / 6)` per extra die, capped at the die size.
    pub fn low_luck_power(&self) -> u32 {
        if self.rolls == 0 {
            return 0;
        }
        if self.choose_best && self.rolls > 1 {
            let per_extra = (self.dice_sides / 6).max(1);
            return (self.strength + per_extra * (self.rolls - 1)).min(self.dice_sides);
        }
        self.strength * self.rolls
    }
}

/// Everything strength depends on besides the unit itself.
pub struct CombatContext<'a> {
    pub state: &'a GameState,
    pub territory: &'a Territory,
    pub side: Side,
    /// Friendly units present; supporters are drawn from these.
    pub friendly: &'a [&'a Unit],
    pub config: &'a BattleConfig,
    /// Ships firing at a land territory from the sea.
    pub bombarding: bool,
}

/// Support slots offered by friendly units, grouped by supporter type.
struct SupportPool<'a> {
    slots: Vec<(&'a UnitType, u32)>,
}

impl<'a> SupportPool<'a> {
    fn new(ctx: &CombatContext<'a>) -> Result<Self, StateError> {
        let mut by_type: BTreeMap<&str, (&'a UnitType, u32)> = BTreeMap::new();
        for unit in ctx.friendly {
            let ut = ctx.state.type_of(unit)?;
            if let Some(rule) = &ut.support {
                let applies = match ctx.side {
                    Side::Attacker => rule.offence,
                    Side::Defender => rule.defence,
                };
                if applies {
                    let entry = by_type.entry(ut.name.as_str()).or_insert((ut, 0));
                    entry.1 += rule.number;
                }
            }
        }
        Ok(Self {
            slots: by_type.into_values().collect(),
        })
    }

    /// Consume at most one slot per supporter type that covers `target`.
    fn take(&mut self, target: &str) -> i32 {
        let mut bonus = 0;
        for (ut, remaining) in self.slots.iter_mut() {
            if *remaining == 0 {
                continue;
            }
            if let Some(rule) = &ut.support {
                if rule.targets.iter().any(|t| t == target) {
                    *remaining -= 1;
                    bonus += rule.bonus;
                }
            }
        }
        bonus
    }
}

fn apply_terrain(strength: i32, ut: &UnitType, ctx: &CombatContext) -> i32 {
    let mut adjusted = strength;
    let mut multipliers = Vec::new();
    for effect in ctx.state.terrain_effects_for(ctx.territory) {
        if !effect.applies_to(&ut.name) {
            continue;
        }
        let modifier = match ctx.side {
            Side::Attacker => effect.offense,
            Side::Defender => effect.defense,
        };
        match modifier {
            Some(TerrainModifier::Add(v)) => adjusted += v,
            Some(TerrainModifier::Multiply(f)) => multipliers.push(f),
            None => {}
        }
    }
    for m in multipliers {
        adjusted = m.scale_int(adjusted as i64) as i32;
    }
    adjusted
}

pub(crate) fn is_heavy_bomber(ut: &UnitType, unit: &Unit, state: &GameState) -> bool {
    ut.heavy_bomber || (ut.strategic_bomber && state.tech(&unit.owner).heavy_bombers)
}

/// Dice a unit rolls on the given side, ignoring strength.
pub fn rolls_for(
    state: &GameState,
    unit: &Unit,
    side: Side,
    config: &BattleConfig,
) -> Result<u32, StateError> {
    let ut = state.type_of(unit)?;
    Ok(base_rolls(ut, unit, side, state, config))
}

fn base_rolls(
    ut: &UnitType,
    unit: &Unit,
    side: Side,
    state: &GameState,
    config: &BattleConfig,
) -> u32 {
    match side {
        Side::Defender => ut.defense_rolls,
        Side::Attacker if is_heavy_bomber(ut, unit, state) => {
            config.heavy_bomber_dice.max(ut.attack_rolls)
        }
        Side::Attacker => ut.attack_rolls,
    }
}

/// Per-unit strengths and rolls, in the order given.
pub fn unit_powers(units: &[&Unit], ctx: &CombatContext) -> Result<Vec<UnitPower>, StateError> {
    let mut support = SupportPool::new(ctx)?;
    let mut out = Vec::with_capacity(units.len());

    for unit in units {
        let ut = ctx.state.type_of(unit)?;
        let sides = ut.dice_sides.unwrap_or(ctx.config.dice_sides);

        let strength = if ctx.bombarding {
            ut.bombard.unwrap_or(ut.attack)
        } else {
            let mut s = match ctx.side {
                Side::Attacker => ut.attack,
                Side::Defender => ut.defense,
            };
            if ctx.side == Side::Attacker && unit.was_amphibious {
                s += ut.marine_bonus;
            }
            s += support.take(&ut.name);
            apply_terrain(s, ut, ctx)
        };
        let strength = strength.clamp(0, sides as i32) as u32;

        let rolls = if strength == 0 {
            0
        } else if ctx.bombarding {
            1
        } else {
            base_rolls(ut, unit, ctx.side, ctx.state, ctx.config)
        };
        let choose_best = ctx.config.choose_best_roll
            && ctx.side == Side::Attacker
            && !ctx.bombarding
            && rolls > 1
            && is_heavy_bomber(ut, unit, ctx.state);

        out.push(UnitPower {
            unit: unit.id,
            strength,
            rolls,
            dice_sides: sides,
            choose_best,
        });
    }
    Ok(out)
}

/// Sum of low-luck power over a set of unit powers.
pub fn total_power(powers: &[UnitPower]) -> u32 {
    powers.iter().map(UnitPower::low_luck_power).sum()
}

fn total_for(
    state: &GameState,
    units: &[&Unit],
    territory: &Territory,
    config: &BattleConfig,
    side: Side,
) -> Result<u32, StateError> {
    if units.is_empty() {
        return Ok(0);
    }
    let ctx = CombatContext {
        state,
        territory,
        side,
        friendly: units,
        config,
        bombarding: false,
    };
    Ok(total_power(&unit_powers(units, &ctx)?))
}

pub fn total_offense(
    state: &GameState,
    units: &[&Unit],
    territory: &Territory,
    config: &BattleConfig,
) -> Result<u32, StateError> {
    total_for(state, units, territory, config, Side::Attacker)
}

pub fn total_defense(
    state: &GameState,
    units: &[&Unit],
    territory: &Territory,
    config: &BattleConfig,
) -> Result<u32, StateError> {
    total_for(state, units, territory, config, Side::Defender)
}

/// Anti-air firing numbers against `targets` air units.
///
/// Rolls go to the strongest AA units first; each unit fires at most its
/// target cap (plus tech extra targets), and the total never exceeds the
/// number of targets.
pub fn aa_fire_power(
    state: &GameState,
    aa_units: &[&Unit],
    targets: u32,
    config: &BattleConfig,
) -> Result<Vec<UnitPower>, StateError> {
    let mut candidates = Vec::new();
    for unit in aa_units {
        let ut = state.type_of(unit)?;
        if let Some(aa) = &ut.anti_air {
            let tech = state.tech(&unit.owner);
            let sides = ut.dice_sides.unwrap_or(config.dice_sides);
            let radar = if tech.radar { config.radar_bonus } else { 0 };
            let strength = (aa.strength + radar).clamp(0, sides as i32) as u32;
            let cap = aa.max_targets.map(|m| m + tech.extra_aa_targets);
            candidates.push((strength, cap, unit.id, sides));
        }
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.2.cmp(&b.2)));

    let mut remaining = targets;
    let mut out = Vec::new();
    for (strength, cap, unit, sides) in candidates {
        if remaining == 0 {
            break;
        }
        let rolls = cap.unwrap_or(remaining).min(remaining);
        if rolls == 0 || strength == 0 {
            continue;
        }
        remaining -= rolls;
        out.push(UnitPower {
            unit,
            strength,
            rolls,
            dice_sides: sides,
            choose_best: false,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::Fixed;
    use crate::state::{TechState, TerrainEffect};
    use crate::testing::GameStateBuilder;

    fn units_in<'a>(state: &'a GameState, territory: u32, ids: &[u32]) -> Vec<&'a Unit> {
        let t = state.territory(territory).unwrap();
        ids.iter().map(|id| t.unit(*id).unwrap()).collect()
    }

    #[test]
    fn test_empty_collection_is_zero() {
        let state = GameStateBuilder::classic().land(1, "Poland", None).build();
        let t = state.territory(1).unwrap();
        let config = BattleConfig::default();
        assert_eq!(total_offense(&state, &[], t, &config).unwrap(), 0);
        assert_eq!(total_defense(&state, &[], t, &config).unwrap(), 0);
    }

    #[test]
    fn test_artillery_supports_one_infantry() {
        let state = GameStateBuilder::classic()
            .land(1, "Poland", None)
            .unit(1, 1, "infantry", "Germans")
            .unit(1, 2, "infantry", "Germans")
            .unit(1, 3, "artillery", "Germans")
            .build();
        let t = state.territory(1).unwrap();
        let units = units_in(&state, 1, &[1, 2, 3]);
        let config = BattleConfig::default();
        // 2 (supported inf) + 1 (inf) + 2 (art)
        assert_eq!(total_offense(&state, &units, t, &config).unwrap(), 5);
        // artillery support is offence only
        assert_eq!(total_defense(&state, &units, t, &config).unwrap(), 6);
    }

    #[test]
    fn test_marine_bonus_only_when_amphibious() {
        let mut state = GameStateBuilder::classic()
            .land(1, "Normandy", None)
            .unit(1, 1, "marine", "Americans")
            .unit(1, 2, "marine", "Americans")
            .build();
        state.territory_mut(1).unwrap().unit_mut(2).unwrap().was_amphibious = true;
        let t = state.territory(1).unwrap();
        let units = units_in(&state, 1, &[1, 2]);
        let config = BattleConfig::default();
        let ctx = CombatContext {
            state: &state,
            territory: t,
            side: Side::Attacker,
            friendly: &units,
            config: &config,
            bombarding: false,
        };
        let powers = unit_powers(&units, &ctx).unwrap();
        assert_eq!(powers[0].strength, 1);
        assert_eq!(powers[1].strength, 2);
    }

    #[test]
    fn test_terrain_add_then_multiply_and_clamp() {
        let state = GameStateBuilder::classic()
            .land(1, "Caucasus", None)
            .terrain(1, "mountain")
            .terrain(1, "fortress")
            .effect(
                "mountain",
                TerrainEffect {
                    defense: Some(TerrainModifier::Add(1)),
                    ..Default::default()
                },
            )
            .effect(
                "fortress",
                TerrainEffect {
                    defense: Some(TerrainModifier::Multiply(Fixed::from_f64(1.5))),
                    unit_types: vec!["infantry".into()],
                    ..Default::default()
                },
            )
            .unit(1, 1, "infantry", "Russians")
            .unit(1, 2, "armour", "Russians")
            .build();
        let t = state.territory(1).unwrap();
        let units = units_in(&state, 1, &[1, 2]);
        let config = BattleConfig::default();
        let ctx = CombatContext {
            state: &state,
            territory: t,
            side: Side::Defender,
            friendly: &units,
            config: &config,
            bombarding: false,
        };
        let powers = unit_powers(&units, &ctx).unwrap();
        // infantry: (2 + 1) * 1.5 = 4.5 -> 4
        assert_eq!(powers[0].strength, 4);
        // armour: 3 + 1, fortress does not apply
        assert_eq!(powers[1].strength, 4);
    }

    #[test]
    fn test_heavy_bomber_rolls_and_low_luck_power() {
        let state = GameStateBuilder::classic()
            .land(1, "Berlin", Some("Germans"))
            .unit(1, 1, "bomber", "Americans")
            .tech(
                "Americans",
                TechState {
                    heavy_bombers: true,
                    ..Default::default()
                },
            )
            .build();
        let config = BattleConfig::default();
        let unit = state.unit(1, 1).unwrap();
        assert_eq!(rolls_for(&state, unit, Side::Attacker, &config).unwrap(), 2);
        assert_eq!(rolls_for(&state, unit, Side::Defender, &config).unwrap(), 1);

        let t = state.territory(1).unwrap();
        let units = vec![unit];
        let ctx = CombatContext {
            state: &state,
            territory: t,
            side: Side::Attacker,
            friendly: &units,
            config: &config,
            bombarding: false,
        };
        let powers = unit_powers(&units, &ctx).unwrap();
        assert!(powers[0].choose_best);
        // 4 + max(1, 6/6) * 1
        assert_eq!(powers[0].low_luck_power(), 5);
    }

    #[test]
    fn test_zero_strength_rolls_nothing() {
        let state = GameStateBuilder::classic()
            .sea(1, "Atlantic")
            .unit(1, 1, "transport", "British")
            .build();
        let t = state.territory(1).unwrap();
        let units = units_in(&state, 1, &[1]);
        let config = BattleConfig::default();
        let ctx = CombatContext {
            state: &state,
            territory: t,
            side: Side::Defender,
            friendly: &units,
            config: &config,
            bombarding: false,
        };
        assert_eq!(unit_powers(&units, &ctx).unwrap()[0].rolls, 0);
    }

    fn flak() -> UnitType {
        UnitType {
            name: "flak".into(),
            is_infrastructure: true,
            anti_air: Some(crate::state::AntiAir {
                strength: 1,
                max_targets: Some(3),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_aa_rolls_capped_by_targets_and_units() {
        let state = GameStateBuilder::classic()
            .unit_type(flak())
            .land(1, "Moscow", Some("Russians"))
            .unit(1, 1, "flak", "Russians")
            .build();
        let config = BattleConfig::default();
        let aa = units_in(&state, 1, &[1]);

        let two_planes = aa_fire_power(&state, &aa, 2, &config).unwrap();
        assert_eq!(two_planes[0].rolls, 2);

        let six_planes = aa_fire_power(&state, &aa, 6, &config).unwrap();
        assert_eq!(six_planes[0].rolls, 3);
    }

    #[test]
    fn test_uncapped_aa_fires_at_every_plane() {
        let state = GameStateBuilder::classic()
            .land(1, "Moscow", Some("Russians"))
            .unit(1, 1, "aa_gun", "Russians")
            .build();
        let config = BattleConfig::default();
        let aa = units_in(&state, 1, &[1]);
        assert_eq!(aa_fire_power(&state, &aa, 6, &config).unwrap()[0].rolls, 6);
    }

    #[test]
    fn test_aa_radar_and_extra_targets() {
        let state = GameStateBuilder::classic()
            .unit_type(flak())
            .land(1, "Moscow", Some("Russians"))
            .unit(1, 1, "flak", "Russians")
            .tech(
                "Russians",
                TechState {
                    radar: true,
                    extra_aa_targets: 1,
                    ..Default::default()
                },
            )
            .build();
        let config = BattleConfig::default();
        let aa = units_in(&state, 1, &[1]);
        let powers = aa_fire_power(&state, &aa, 6, &config).unwrap();
        assert_eq!(powers[0].strength, 2);
        assert_eq!(powers[0].rolls, 4);
    }
}
