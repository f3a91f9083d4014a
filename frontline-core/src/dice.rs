//! Dice rolling for combat fire.
//!
//! A die value `v` is 0-based and hits iff `v < strength`. Every die rolled is
//! kept in the [`DiceRoll`], including the extra heavy-bomber dice, which are
//! marked [`DieKind::Ignored`] instead of being dropped.

use crate::battle::BattleError;
use crate::config::BattleConfig;
use crate::fixed::Fixed;
use crate::power::{self, CombatContext, UnitPower};
use crate::random::{RandomError, RandomSource};
use crate::state::{GameState, Unit, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DieKind {
    Miss = 0,
    Hit = 1,
    /// Rolled but not counted (extra heavy-bomber dice).
    Ignored = 2,
}

impl DieKind {
    fn from_bits(bits: u32) -> Option<DieKind> {
        match bits {
            0 => Some(DieKind::Miss),
            1 => Some(DieKind::Hit),
            2 => Some(DieKind::Ignored),
            _ => None,
        }
    }
}

/// Sentinel for "no threshold" in the compact form.
const NO_THRESHOLD: u32 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Die {
    pub value: u8,
    /// Strength the die was rolled against, if any.
    pub rolled_at: Option<u8>,
    pub kind: DieKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitId>,
}

impl Die {
    pub fn new(value: u32, rolled_at: Option<u32>, kind: DieKind) -> Self {
        Self {
            value: clamp_u8(value),
            rolled_at: rolled_at.map(|r| clamp_u8(r.min(NO_THRESHOLD - 1))),
            kind,
            unit: None,
        }
    }

    pub fn for_unit(mut self, unit: UnitId) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Pack value, threshold and kind into one integer for the wire.
    ///
    /// Layout: `value << 16 | rolled_at << 8 | kind`. The owning unit is not
    /// part of the compact form.
    pub fn compressed(&self) -> u32 {
        let rolled_at = self.rolled_at.map_or(NO_THRESHOLD, u32::from);
        (u32::from(self.value) << 16) | (rolled_at << 8) | self.kind as u32
    }

    pub fn from_compressed(packed: u32) -> Option<Die> {
        let value = (packed & 0xFF_0000) >> 16;
        let rolled_at = (packed & 0xFF00) >> 8;
        let kind = DieKind::from_bits(packed & 0x0F)?;
        Some(Die {
            value: clamp_u8(value),
            rolled_at: (rolled_at != NO_THRESHOLD).then(|| clamp_u8(rolled_at)),
            kind,
            unit: None,
        })
    }
}

fn clamp_u8(v: u32) -> u8 {
    u8::try_from(v).unwrap_or(u8::MAX)
}

/// Outcome of one firing step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRoll {
    pub dice: Vec<Die>,
    pub hits: u32,
    pub expected_hits: Fixed,
}

impl DiceRoll {
    pub fn compressed(&self) -> Vec<u32> {
        self.dice.iter().map(Die::compressed).collect()
    }

    /// Dice that were actually drawn from the random source.
    pub fn draws(&self) -> usize {
        self.dice.len()
    }
}

/// Roll for `units` on the side and in the territory described by `ctx`.
pub fn roll_combat(
    units: &[&Unit],
    ctx: &CombatContext,
    random: &mut dyn RandomSource,
) -> Result<DiceRoll, BattleError> {
    let powers = power::unit_powers(units, ctx)?;
    Ok(roll_powers(&powers, ctx.config.low_luck, random)?)
}

/// Anti-air fire from `aa_units` at `targets` air units.
pub fn roll_aa(
    state: &GameState,
    aa_units: &[&Unit],
    targets: u32,
    config: &BattleConfig,
    random: &mut dyn RandomSource,
) -> Result<DiceRoll, BattleError> {
    let powers = power::aa_fire_power(state, aa_units, targets, config)?;
    Ok(roll_powers(&powers, config.aa_low_luck(), random)?)
}

pub fn roll_powers(
    powers: &[UnitPower],
    low_luck: bool,
    random: &mut dyn RandomSource,
) -> Result<DiceRoll, RandomError> {
    if low_luck {
        roll_low_luck(powers, random)
    } else {
        roll_dice(powers, random)
    }
}

/// Deterministic hits plus at most one draw per die size.
///
/// Power is pooled by die size, so the number of draws does not depend on
/// the order of the units.
fn roll_low_luck(
    powers: &[UnitPower],
    random: &mut dyn RandomSource,
) -> Result<DiceRoll, RandomError> {
    let mut by_sides: BTreeMap<u32, u32> = BTreeMap::new();
    for p in powers {
        let ll = p.low_luck_power();
        if ll > 0 {
            *by_sides.entry(p.dice_sides).or_default() += ll;
        }
    }

    let mut roll = DiceRoll::default();
    for (sides, total) in by_sides {
        roll.hits += total / sides;
        roll.expected_hits += Fixed::from_ratio(total as i64, sides as i64);
        let remainder = total % sides;
        if remainder > 0 {
            let value = random.next(sides)?;
            let kind = if value < remainder {
                roll.hits += 1;
                DieKind::Hit
            } else {
                DieKind::Miss
            };
            roll.dice.push(Die::new(value, Some(remainder), kind));
        }
    }
    log::trace!(
        "low luck: {} hits from {} draws",
        roll.hits,
        roll.dice.len()
    );
    Ok(roll)
}

/// Chance that at least one of `rolls` dice hits at `strength`.
fn expected_best_of(strength: u32, sides: u32, rolls: u32) -> Fixed {
    let miss = Fixed::from_ratio((sides - strength) as i64, sides as i64);
    let mut all_miss = Fixed::ONE;
    for _ in 0..rolls {
        all_miss = all_miss * miss;
    }
    Fixed::ONE - all_miss
}

fn roll_dice(powers: &[UnitPower], random: &mut dyn RandomSource) -> Result<DiceRoll, RandomError> {
    let mut ordered: Vec<&UnitPower> = powers.iter().filter(|p| p.rolls > 0).collect();
    // Weakest first; sort is stable so equal strengths keep their order.
    ordered.sort_by_key(|p| p.strength);

    let mut roll = DiceRoll::default();
    for p in ordered {
        if p.choose_best && p.rolls > 1 {
            let values = random.next_many(p.dice_sides, p.rolls)?;
            let best = values
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| **v)
                .map(|(i, _)| i)
                .unwrap_or(0);
            for (i, value) in values.into_iter().enumerate() {
                let kind = if i != best {
                    DieKind::Ignored
                } else if value < p.strength {
                    roll.hits += 1;
                    DieKind::Hit
                } else {
                    DieKind::Miss
                };
                roll.dice
                    .push(Die::new(value, Some(p.strength), kind).for_unit(p.unit));
            }
            roll.expected_hits += expected_best_of(p.strength, p.dice_sides, p.rolls);
        } else {
            for _ in 0..p.rolls {
                let value = random.next(p.dice_sides)?;
                let kind = if value < p.strength {
                    roll.hits += 1;
                    DieKind::Hit
                } else {
                    DieKind::Miss
                };
                roll.dice
                    .push(Die::new(value, Some(p.strength), kind).for_unit(p.unit));
            }
            roll.expected_hits +=
                Fixed::from_ratio((p.strength * p.rolls) as i64, p.dice_sides as i64);
        }
    }
    Ok(roll)
}
