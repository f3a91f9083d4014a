//! Game state consumed and mutated by the battle engine.
//!
//! Territories own their units in insertion order. Unit types are static data
//! looked up by name; the engine only ever reads their capability flags.

use crate::fixed::Fixed;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub type TerritoryId = u32;
pub type UnitId = u32;
pub type PlayerId = String;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Unknown territory: {0}")]
    UnknownTerritory(TerritoryId),
    #[error("Unknown unit: {0}")]
    UnknownUnit(UnitId),
    #[error("Unknown unit type: {0}")]
    UnknownUnitType(String),
    #[error("Duplicate unit id: {0}")]
    DuplicateUnit(UnitId),
}

/// Anti-air capability of a unit type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiAir {
    pub strength: i32,
    /// Air units one AA unit may fire at. `None` means every air unit present.
    #[serde(default)]
    pub max_targets: Option<u32>,
}

/// Bonus a unit gives to friendly units of the listed types (e.g. artillery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportRule {
    pub bonus: i32,
    /// How many units one supporter can boost.
    #[serde(default = "default_support_number")]
    pub number: u32,
    #[serde(default)]
    pub offence: bool,
    #[serde(default)]
    pub defence: bool,
    pub targets: Vec<String>,
}

fn default_support_number() -> u32 {
    1
}

/// Static attributes shared by every unit of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitType {
    pub name: String,
    pub attack: i32,
    pub defense: i32,
    pub movement: u32,
    pub attack_rolls: u32,
    pub defense_rolls: u32,
    /// Overrides the configured die for this type.
    pub dice_sides: Option<u32>,
    pub hit_points: u32,
    pub cost: u32,
    /// Strength when bombarding from the sea; falls back to `attack`.
    pub bombard: Option<i32>,
    /// Added to attack when the unit landed from a transport.
    pub marine_bonus: i32,
    pub is_sub: bool,
    pub is_destroyer: bool,
    pub is_air: bool,
    pub is_sea: bool,
    pub is_transport: bool,
    pub can_blitz: bool,
    pub is_capital_ship: bool,
    pub heavy_bomber: bool,
    pub strategic_bomber: bool,
    pub is_infrastructure: bool,
    pub anti_air: Option<AntiAir>,
    pub carrier_capacity: u32,
    pub carrier_cost: u32,
    pub support: Option<SupportRule>,
}

impl Default for UnitType {
    fn default() -> Self {
        Self {
            name: String::new(),
            attack: 0,
            defense: 0,
            movement: 1,
            attack_rolls: 1,
            defense_rolls: 1,
            dice_sides: None,
            hit_points: 1,
            cost: 0,
            bombard: None,
            marine_bonus: 0,
            is_sub: false,
            is_destroyer: false,
            is_air: false,
            is_sea: false,
            is_transport: false,
            can_blitz: false,
            is_capital_ship: false,
            heavy_bomber: false,
            strategic_bomber: false,
            is_infrastructure: false,
            anti_air: None,
            carrier_capacity: 0,
            carrier_cost: 0,
            support: None,
        }
    }
}

impl UnitType {
    pub fn is_land(&self) -> bool {
        !self.is_air && !self.is_sea
    }

    pub fn is_anti_air(&self) -> bool {
        self.anti_air.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub unit_type: String,
    pub owner: PlayerId,
    #[serde(default)]
    pub movement_left: u32,
    /// Damage taken so far.
    #[serde(default)]
    pub hits: u32,
    #[serde(default)]
    pub submerged: bool,
    #[serde(default)]
    pub already_moved: bool,
    #[serde(default)]
    pub was_amphibious: bool,
    #[serde(default)]
    pub was_loaded_this_turn: bool,
    /// Transport carrying (or that just unloaded) this unit.
    #[serde(default)]
    pub transported_by: Option<UnitId>,
}

impl Unit {
    pub fn new(id: UnitId, unit_type: &str, owner: &str) -> Self {
        Self {
            id,
            unit_type: unit_type.to_string(),
            owner: owner.to_string(),
            movement_left: 0,
            hits: 0,
            submerged: false,
            already_moved: false,
            was_amphibious: false,
            was_loaded_this_turn: false,
            transported_by: None,
        }
    }

    /// Hits this unit can still take before dying (always at least 1).
    pub fn remaining_hit_points(&self, unit_type: &UnitType) -> u32 {
        unit_type.hit_points.saturating_sub(self.hits).max(1)
    }

    pub fn reset_turn_flags(&mut self, unit_type: &UnitType) {
        self.movement_left = unit_type.movement;
        self.submerged = false;
        self.already_moved = false;
        self.was_amphibious = false;
        self.was_loaded_this_turn = false;
    }
}

/// How a terrain tag changes a unit's strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerrainModifier {
    Add(i32),
    Multiply(Fixed),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainEffect {
    pub offense: Option<TerrainModifier>,
    pub defense: Option<TerrainModifier>,
    /// Unit types affected; empty means all.
    pub unit_types: Vec<String>,
}

impl TerrainEffect {
    pub fn applies_to(&self, unit_type: &str) -> bool {
        self.unit_types.is_empty() || self.unit_types.iter().any(|t| t == unit_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Territory {
    pub id: TerritoryId,
    pub name: String,
    #[serde(default)]
    pub owner: Option<PlayerId>,
    #[serde(default)]
    pub is_water: bool,
    #[serde(default)]
    pub units: Vec<Unit>,
    /// Terrain effect tags, looked up in [`GameState::terrain_effects`].
    #[serde(default)]
    pub terrain: Vec<String>,
    #[serde(default)]
    pub production: u32,
    /// Capacity lost to bombing; capacity never drops below zero.
    #[serde(default)]
    pub production_damage: u32,
    #[serde(default)]
    pub is_capital: bool,
    #[serde(default)]
    pub neighbors: Vec<TerritoryId>,
}

impl Territory {
    pub fn new(id: TerritoryId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            owner: None,
            is_water: false,
            units: Vec::new(),
            terrain: Vec::new(),
            production: 0,
            production_damage: 0,
            is_capital: false,
            neighbors: Vec::new(),
        }
    }

    pub fn is_land(&self) -> bool {
        !self.is_water
    }

    pub fn production_capacity(&self) -> u32 {
        self.production.saturating_sub(self.production_damage)
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| u.id == id)
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.units.iter().any(|u| u.id == id)
    }

    /// Remove the given units, returning them in territory order.
    pub fn take_units(&mut self, ids: &BTreeSet<UnitId>) -> Vec<Unit> {
        let (taken, kept): (Vec<Unit>, Vec<Unit>) = std::mem::take(&mut self.units)
            .into_iter()
            .partition(|u| ids.contains(&u.id));
        self.units = kept;
        taken
    }
}

/// Per-player technology relevant to combat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechState {
    /// AA units gain the configured radar bonus.
    pub radar: bool,
    /// Extra targets per AA unit.
    pub extra_aa_targets: u32,
    /// Added to each bomber's raid damage (may be negative).
    pub bombing_bonus: i32,
    /// Every strategic bomber gets the heavy-bomber bonus.
    pub heavy_bombers: bool,
}

/// Alliance groups. A player is always allied with itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Alliances {
    groups: Vec<BTreeSet<PlayerId>>,
}

impl Alliances {
    pub fn new(groups: Vec<BTreeSet<PlayerId>>) -> Self {
        Self { groups }
    }

    pub fn are_allied(&self, a: &str, b: &str) -> bool {
        a == b
            || self
                .groups
                .iter()
                .any(|g| g.contains(a) && g.contains(b))
    }
}

/// Result of a territory changing hands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipChange {
    pub territory: TerritoryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<PlayerId>,
    pub to: PlayerId,
    pub capital: bool,
    /// Enemy infrastructure that switched owner with the territory.
    pub captured_units: Vec<UnitId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameState {
    pub territories: BTreeMap<TerritoryId, Territory>,
    pub unit_types: FxHashMap<String, UnitType>,
    pub terrain_effects: FxHashMap<String, TerrainEffect>,
    pub alliances: Alliances,
    pub techs: FxHashMap<PlayerId, TechState>,
}

impl GameState {
    pub fn territory(&self, id: TerritoryId) -> Result<&Territory, StateError> {
        self.territories
            .get(&id)
            .ok_or(StateError::UnknownTerritory(id))
    }

    pub fn territory_mut(&mut self, id: TerritoryId) -> Result<&mut Territory, StateError> {
        self.territories
            .get_mut(&id)
            .ok_or(StateError::UnknownTerritory(id))
    }

    pub fn unit_type(&self, name: &str) -> Result<&UnitType, StateError> {
        self.unit_types
            .get(name)
            .ok_or_else(|| StateError::UnknownUnitType(name.to_string()))
    }

    pub fn type_of(&self, unit: &Unit) -> Result<&UnitType, StateError> {
        self.unit_type(&unit.unit_type)
    }

    pub fn are_allied(&self, a: &str, b: &str) -> bool {
        self.alliances.are_allied(a, b)
    }

    pub fn tech(&self, player: &str) -> TechState {
        self.techs.get(player).copied().unwrap_or_default()
    }

    /// Whether `player` is at war with the owner of `territory`.
    pub fn is_enemy_territory(&self, territory: &Territory, player: &str) -> bool {
        match &territory.owner {
            Some(owner) => !self.are_allied(owner, player),
            None => false,
        }
    }

    /// Look up a unit within a territory.
    pub fn unit(&self, territory: TerritoryId, id: UnitId) -> Result<&Unit, StateError> {
        self.territory(territory)?
            .unit(id)
            .ok_or(StateError::UnknownUnit(id))
    }

    pub fn locate_unit(&self, id: UnitId) -> Option<TerritoryId> {
        self.territories
            .values()
            .find(|t| t.contains(id))
            .map(|t| t.id)
    }

    /// Units hostile to `player` that can take part in a fight here.
    ///
    /// Excludes infrastructure, submerged subs and cargo still aboard a
    /// transport at sea.
    pub fn enemy_combat_units(
        &self,
        territory: TerritoryId,
        player: &str,
    ) -> Result<Vec<UnitId>, StateError> {
        let t = self.territory(territory)?;
        let mut out = Vec::new();
        for unit in &t.units {
            if self.are_allied(&unit.owner, player) || unit.submerged {
                continue;
            }
            if t.is_water && unit.transported_by.is_some() {
                continue;
            }
            if self.type_of(unit)?.is_infrastructure {
                continue;
            }
            out.push(unit.id);
        }
        Ok(out)
    }

    /// Apply terrain effect tags of a territory, in tag order.
    pub fn terrain_effects_for(&self, territory: &Territory) -> Vec<&TerrainEffect> {
        territory
            .terrain
            .iter()
            .filter_map(|tag| self.terrain_effects.get(tag))
            .collect()
    }

    pub fn move_units(
        &mut self,
        from: TerritoryId,
        to: TerritoryId,
        ids: &BTreeSet<UnitId>,
    ) -> Result<Vec<UnitId>, StateError> {
        // Check the destination before taking anything out.
        self.territory(to)?;
        let moved = self.territory_mut(from)?.take_units(ids);
        let moved_ids = moved.iter().map(|u| u.id).collect();
        self.territory_mut(to)?.units.extend(moved);
        Ok(moved_ids)
    }

    /// Transfer a land territory to `player`, capturing enemy infrastructure.
    ///
    /// Returns `None` when nothing changes hands (water, already ours, or held
    /// by an ally).
    pub fn take_over(
        &mut self,
        territory: TerritoryId,
        player: &str,
    ) -> Result<Option<OwnershipChange>, StateError> {
        let t = self.territory(territory)?;
        if t.is_water || t.owner.as_deref() == Some(player) {
            return Ok(None);
        }
        if let Some(owner) = &t.owner {
            if self.are_allied(owner, player) {
                return Ok(None);
            }
        }

        let mut captured = Vec::new();
        for unit in &t.units {
            if !self.are_allied(&unit.owner, player) && self.type_of(unit)?.is_infrastructure {
                captured.push(unit.id);
            }
        }

        let t = self.territory_mut(territory)?;
        let from = t.owner.replace(player.to_string());
        for unit in t.units.iter_mut() {
            if captured.contains(&unit.id) {
                unit.owner = player.to_string();
            }
        }
        log::info!(
            "{} takes {} from {}",
            player,
            t.name,
            from.as_deref().unwrap_or("nobody")
        );
        Ok(Some(OwnershipChange {
            territory,
            from,
            to: player.to_string(),
            capital: t.is_capital,
            captured_units: captured,
        }))
    }

    /// Start-of-turn reset of transient unit flags.
    pub fn reset_turn_flags(&mut self) -> Result<(), StateError> {
        let types = &self.unit_types;
        for t in self.territories.values_mut() {
            for unit in t.units.iter_mut() {
                let ut = types
                    .get(&unit.unit_type)
                    .ok_or_else(|| StateError::UnknownUnitType(unit.unit_type.clone()))?;
                unit.reset_turn_flags(ut);
            }
        }
        Ok(())
    }

    /// Check referential integrity: known unit types, unique unit ids.
    pub fn validate(&self) -> Result<(), StateError> {
        let mut seen = BTreeSet::new();
        for t in self.territories.values() {
            for unit in &t.units {
                self.type_of(unit)?;
                if !seen.insert(unit.id) {
                    return Err(StateError::DuplicateUnit(unit.id));
                }
            }
        }
        Ok(())
    }
}
