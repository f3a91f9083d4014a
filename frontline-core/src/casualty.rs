//! Casualty selection.
//!
//! Hits are resolved against a pool of eligible units. A unit with `r`
//! remaining hit points absorbs up to `r - 1` hits as damage and dies on the
//! `r`-th. Every answer, whether computed here or returned by a participant,
//! must account for exactly the hits it was asked to resolve.

use crate::battle::{BattleError, BattleId};
use crate::config::BattleConfig;
use crate::participant::Participant;
use crate::state::{GameState, PlayerId, StateError, TerritoryId, Unit, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Units chosen to die or absorb damage.
///
/// Each entry in `damaged` is one absorbed hit, so a unit may appear several
/// times.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasualtyDetails {
    pub killed: Vec<UnitId>,
    pub damaged: Vec<UnitId>,
}

impl CasualtyDetails {
    pub fn is_empty(&self) -> bool {
        self.killed.is_empty() && self.damaged.is_empty()
    }

    /// Damage entries per unit.
    pub fn damage_by_unit(&self) -> BTreeMap<UnitId, u32> {
        let mut out = BTreeMap::new();
        for id in &self.damaged {
            *out.entry(*id).or_insert(0) += 1;
        }
        out
    }
}

/// What a participant sees about one eligible unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasualtyCandidate {
    pub unit: UnitId,
    pub unit_type: String,
    pub cost: u32,
    pub remaining_hit_points: u32,
}

/// A casualty decision put to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasualtyQuery {
    pub battle: BattleId,
    pub territory: TerritoryId,
    /// Player whose units take the hits.
    pub player: PlayerId,
    /// Name of the step asking.
    pub step: String,
    pub hits: u32,
    pub candidates: Vec<CasualtyCandidate>,
    /// Cheapest-first suggestion; always a valid answer.
    pub default: CasualtyDetails,
    pub allow_multiple_hits_per_unit: bool,
}

/// Inputs of one casualty selection.
pub struct CasualtyRequest<'a> {
    pub battle: BattleId,
    pub territory: TerritoryId,
    pub player: &'a str,
    pub step: String,
    pub hits: u32,
    pub pool: &'a [&'a Unit],
}

pub fn candidates(state: &GameState, pool: &[&Unit]) -> Result<Vec<CasualtyCandidate>, StateError> {
    pool.iter()
        .map(|unit| {
            let ut = state.type_of(unit)?;
            Ok(CasualtyCandidate {
                unit: unit.id,
                unit_type: ut.name.clone(),
                cost: ut.cost,
                remaining_hit_points: unit.remaining_hit_points(ut),
            })
        })
        .collect()
}

/// Resolve `request.hits` against the pool.
///
/// Enough hits to exhaust the pool kill everything without asking. Under low
/// luck the default selection is used directly; otherwise the participant
/// chooses and its answer is validated.
pub fn select_casualties(
    request: &CasualtyRequest,
    state: &GameState,
    config: &BattleConfig,
    low_luck: bool,
    participant: &mut dyn Participant,
) -> Result<CasualtyDetails, BattleError> {
    let candidates = candidates(state, request.pool)?;
    if request.hits == 0 || candidates.is_empty() {
        return Ok(CasualtyDetails::default());
    }

    let total: u32 = candidates.iter().map(|c| c.remaining_hit_points).sum();
    if request.hits >= total {
        log::debug!(
            "{}: {} hits kill all {} units",
            request.player,
            request.hits,
            candidates.len()
        );
        return Ok(CasualtyDetails {
            killed: candidates.iter().map(|c| c.unit).collect(),
            damaged: Vec::new(),
        });
    }

    let default = default_casualties(
        &candidates,
        request.hits,
        config.allow_multiple_hits_per_unit,
    );
    if low_luck {
        return Ok(default);
    }

    let query = CasualtyQuery {
        battle: request.battle,
        territory: request.territory,
        player: request.player.to_string(),
        step: request.step.clone(),
        hits: request.hits,
        candidates,
        default,
        allow_multiple_hits_per_unit: config.allow_multiple_hits_per_unit,
    };
    let answer = participant.select_casualties(&query)?;
    validate_casualties(
        &query.candidates,
        query.hits,
        &answer,
        query.allow_multiple_hits_per_unit,
    )
    .map_err(|reason| {
        BattleError::InvalidCasualties {
            player: query.player.clone(),
            reason,
        }
    })?;
    Ok(answer)
}

/// Cheapest-first selection.
///
/// Multi-hit-point units soak non-lethal hits first, most expensive first.
/// Remaining hits then kill the cheapest units, ties broken by unit id.
pub fn default_casualties(
    candidates: &[CasualtyCandidate],
    hits: u32,
    allow_multiple_hits_per_unit: bool,
) -> CasualtyDetails {
    let mut details = CasualtyDetails::default();
    let mut damage: BTreeMap<UnitId, u32> = BTreeMap::new();
    let mut remaining = hits;

    let mut soakers: Vec<&CasualtyCandidate> = candidates
        .iter()
        .filter(|c| c.remaining_hit_points > 1)
        .collect();
    soakers.sort_by(|a, b| b.cost.cmp(&a.cost).then(a.unit.cmp(&b.unit)));
    for c in soakers {
        if remaining == 0 {
            break;
        }
        let absorb = if allow_multiple_hits_per_unit {
            c.remaining_hit_points - 1
        } else {
            1
        };
        let taken = absorb.min(remaining);
        details
            .damaged
            .extend(std::iter::repeat(c.unit).take(taken as usize));
        damage.insert(c.unit, taken);
        remaining -= taken;
    }

    let mut order: Vec<&CasualtyCandidate> = candidates.iter().collect();
    order.sort_by_key(|c| (c.cost, c.unit));
    allocate(
        &order,
        remaining,
        allow_multiple_hits_per_unit,
        &mut damage,
        &mut details,
    );
    details
}

/// Kill units in the given order, then spread any leftover hits as damage.
pub fn allocate_in_order(
    order: &[CasualtyCandidate],
    hits: u32,
    allow_multiple_hits_per_unit: bool,
) -> CasualtyDetails {
    let mut details = CasualtyDetails::default();
    let order: Vec<&CasualtyCandidate> = order.iter().collect();
    allocate(
        &order,
        hits,
        allow_multiple_hits_per_unit,
        &mut BTreeMap::new(),
        &mut details,
    );
    details
}

fn allocate(
    order: &[&CasualtyCandidate],
    mut remaining: u32,
    allow_multiple_hits_per_unit: bool,
    damage: &mut BTreeMap<UnitId, u32>,
    details: &mut CasualtyDetails,
) {
    let mut killed = BTreeSet::new();
    for c in order {
        if remaining == 0 {
            break;
        }
        let already = damage.get(&c.unit).copied().unwrap_or(0);
        let left = c.remaining_hit_points - already;
        if left <= remaining {
            details
                .damaged
                .extend(std::iter::repeat(c.unit).take(left as usize - 1));
            details.killed.push(c.unit);
            killed.insert(c.unit);
            remaining -= left;
        }
    }

    // Too few hits left to kill anyone else. Without multiple hits per unit
    // every untouched survivor takes one before any unit takes a second.
    if !allow_multiple_hits_per_unit {
        for c in order {
            if remaining == 0 {
                break;
            }
            if killed.contains(&c.unit) || damage.contains_key(&c.unit) || c.remaining_hit_points < 2 {
                continue;
            }
            details.damaged.push(c.unit);
            damage.insert(c.unit, 1);
            remaining -= 1;
        }
    }
    for c in order {
        if remaining == 0 {
            break;
        }
        if killed.contains(&c.unit) {
            continue;
        }
        let already = damage.get(&c.unit).copied().unwrap_or(0);
        let room = (c.remaining_hit_points - 1).saturating_sub(already);
        let taken = room.min(remaining);
        details
            .damaged
            .extend(std::iter::repeat(c.unit).take(taken as usize));
        *damage.entry(c.unit).or_insert(0) += taken;
        remaining -= taken;
    }
}

/// Check a participant's answer against the pool.
///
/// Without multiple hits per unit a survivor takes a second hit only once
/// every candidate is either killed or damaged.
pub fn validate_casualties(
    candidates: &[CasualtyCandidate],
    hits: u32,
    details: &CasualtyDetails,
    allow_multiple_hits_per_unit: bool,
) -> Result<(), String> {
    let by_id: BTreeMap<UnitId, &CasualtyCandidate> =
        candidates.iter().map(|c| (c.unit, c)).collect();

    let mut killed = BTreeSet::new();
    for id in &details.killed {
        if !by_id.contains_key(id) {
            return Err(format!("unit {id} is not an eligible casualty"));
        }
        if !killed.insert(*id) {
            return Err(format!("unit {id} killed twice"));
        }
    }

    let damage = details.damage_by_unit();
    for (id, count) in &damage {
        let Some(c) = by_id.get(id) else {
            return Err(format!("unit {id} is not an eligible casualty"));
        };
        if killed.contains(id) {
            if *count != c.remaining_hit_points - 1 {
                return Err(format!(
                    "unit {id} killed with {count} damage, needs {}",
                    c.remaining_hit_points - 1
                ));
            }
        } else if *count >= c.remaining_hit_points {
            return Err(format!("unit {id} takes {count} hits but is not killed"));
        }
    }
    for id in &killed {
        let needed = by_id[id].remaining_hit_points - 1;
        if needed > 0 && !damage.contains_key(id) {
            return Err(format!("unit {id} killed without {needed} prior damage"));
        }
    }

    if !allow_multiple_hits_per_unit {
        let concentrated = damage
            .iter()
            .find(|(id, count)| **count > 1 && !killed.contains(*id));
        let untouched = candidates
            .iter()
            .find(|c| !killed.contains(&c.unit) && !damage.contains_key(&c.unit));
        if let (Some((id, count)), Some(free)) = (concentrated, untouched) {
            return Err(format!(
                "unit {id} takes {count} hits while unit {} is untouched",
                free.unit
            ));
        }
    }

    let absorbed = (details.killed.len() + details.damaged.len()) as u32;
    if absorbed != hits {
        return Err(format!("{absorbed} hits assigned, {hits} required"));
    }
    Ok(())
}
