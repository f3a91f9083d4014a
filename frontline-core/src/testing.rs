//! Builders and doubles for deterministic tests.
//!
//! [`GameStateBuilder::classic`] preloads a small unit roster and two
//! alliances so tests only describe the map and the units on it.

use crate::casualty::{CasualtyDetails, CasualtyQuery};
use crate::observer::{BattleEvent, BattleObserver, ObserverError};
use crate::participant::{Participant, ParticipantError, RetreatQuery, SubmergeQuery};
use crate::state::{
    Alliances, AntiAir, GameState, SupportRule, TechState, TerrainEffect, Territory,
    TerritoryId, Unit, UnitId, UnitType,
};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

pub struct GameStateBuilder {
    state: GameState,
}

impl GameStateBuilder {
    pub fn new() -> Self {
        Self {
            state: GameState::default(),
        }
    }

    /// Classic roster, Axis vs Allies.
    pub fn classic() -> Self {
        let mut builder = Self::new();
        for ut in classic_unit_types() {
            builder = builder.unit_type(ut);
        }
        builder.state.alliances = Alliances::new(vec![
            group(&["Germans", "Italians", "Japanese"]),
            group(&["Russians", "British", "Americans"]),
        ]);
        builder
    }

    pub fn unit_type(mut self, ut: UnitType) -> Self {
        self.state.unit_types.insert(ut.name.clone(), ut);
        self
    }

    pub fn land(mut self, id: TerritoryId, name: &str, owner: Option<&str>) -> Self {
        let mut t = Territory::new(id, name);
        t.owner = owner.map(str::to_string);
        self.state.territories.insert(id, t);
        self
    }

    pub fn sea(mut self, id: TerritoryId, name: &str) -> Self {
        let mut t = Territory::new(id, name);
        t.is_water = true;
        self.state.territories.insert(id, t);
        self
    }

    /// Place a unit. Panics on an unknown territory; this is test setup.
    pub fn unit(mut self, territory: TerritoryId, id: UnitId, unit_type: &str, owner: &str) -> Self {
        self.territory(territory)
            .units
            .push(Unit::new(id, unit_type, owner));
        self
    }

    /// Place a unit aboard (or just unloaded from) `transport`.
    pub fn cargo(
        mut self,
        territory: TerritoryId,
        id: UnitId,
        unit_type: &str,
        owner: &str,
        transport: UnitId,
    ) -> Self {
        let mut unit = Unit::new(id, unit_type, owner);
        unit.transported_by = Some(transport);
        self.territory(territory).units.push(unit);
        self
    }

    pub fn terrain(mut self, territory: TerritoryId, tag: &str) -> Self {
        self.territory(territory).terrain.push(tag.to_string());
        self
    }

    pub fn effect(mut self, tag: &str, effect: TerrainEffect) -> Self {
        self.state.terrain_effects.insert(tag.to_string(), effect);
        self
    }

    pub fn tech(mut self, player: &str, tech: TechState) -> Self {
        self.state.techs.insert(player.to_string(), tech);
        self
    }

    pub fn production(mut self, territory: TerritoryId, production: u32) -> Self {
        self.territory(territory).production = production;
        self
    }

    pub fn capital(mut self, territory: TerritoryId) -> Self {
        self.territory(territory).is_capital = true;
        self
    }

    pub fn neighbors(mut self, a: TerritoryId, b: TerritoryId) -> Self {
        self.territory(a).neighbors.push(b);
        self.territory(b).neighbors.push(a);
        self
    }

    pub fn build(self) -> GameState {
        self.state
    }

    fn territory(&mut self, id: TerritoryId) -> &mut Territory {
        self.state
            .territories
            .get_mut(&id)
            .unwrap_or_else(|| panic!("territory {id} not added to builder"))
    }
}

impl Default for GameStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn group(players: &[&str]) -> BTreeSet<String> {
    players.iter().map(|p| p.to_string()).collect()
}

fn land_unit(name: &str, attack: i32, defense: i32, cost: u32) -> UnitType {
    UnitType {
        name: name.into(),
        attack,
        defense,
        cost,
        ..Default::default()
    }
}

fn sea_unit(name: &str, attack: i32, defense: i32, cost: u32) -> UnitType {
    UnitType {
        is_sea: true,
        movement: 2,
        ..land_unit(name, attack, defense, cost)
    }
}

fn air_unit(name: &str, attack: i32, defense: i32, cost: u32) -> UnitType {
    UnitType {
        is_air: true,
        movement: 4,
        ..land_unit(name, attack, defense, cost)
    }
}

pub fn classic_unit_types() -> Vec<UnitType> {
    vec![
        land_unit("infantry", 1, 2, 3),
        UnitType {
            support: Some(SupportRule {
                bonus: 1,
                number: 1,
                offence: true,
                defence: false,
                targets: vec!["infantry".into(), "marine".into()],
            }),
            ..land_unit("artillery", 2, 2, 4)
        },
        UnitType {
            movement: 2,
            can_blitz: true,
            ..land_unit("armour", 3, 3, 5)
        },
        UnitType {
            marine_bonus: 1,
            ..land_unit("marine", 1, 2, 4)
        },
        UnitType {
            carrier_cost: 1,
            ..air_unit("fighter", 3, 4, 10)
        },
        UnitType {
            strategic_bomber: true,
            movement: 6,
            ..air_unit("bomber", 4, 1, 12)
        },
        UnitType {
            is_infrastructure: true,
            movement: 0,
            anti_air: Some(AntiAir {
                strength: 1,
                max_targets: None,
            }),
            ..land_unit("aa_gun", 0, 0, 5)
        },
        UnitType {
            is_infrastructure: true,
            movement: 0,
            ..land_unit("factory", 0, 0, 15)
        },
        UnitType {
            hit_points: 2,
            is_capital_ship: true,
            bombard: Some(4),
            ..sea_unit("battleship", 4, 4, 20)
        },
        UnitType {
            is_destroyer: true,
            ..sea_unit("destroyer", 2, 2, 8)
        },
        UnitType {
            is_sub: true,
            ..sea_unit("submarine", 2, 1, 6)
        },
        UnitType {
            is_transport: true,
            ..sea_unit("transport", 0, 0, 7)
        },
        UnitType {
            carrier_capacity: 2,
            ..sea_unit("carrier", 1, 3, 14)
        },
    ]
}

/// Answers from a script, falling back to the defaults when it runs dry.
///
/// A strict participant fails instead of falling back.
#[derive(Debug, Default)]
pub struct ScriptedParticipant {
    pub casualties: VecDeque<CasualtyDetails>,
    pub retreats: VecDeque<Option<TerritoryId>>,
    pub submerges: VecDeque<bool>,
    pub strict: bool,
    /// Every query seen, as `(player, kind)`.
    pub asked: Vec<(String, &'static str)>,
}

impl ScriptedParticipant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn casualties(mut self, details: CasualtyDetails) -> Self {
        self.casualties.push_back(details);
        self
    }

    pub fn retreat(mut self, to: Option<TerritoryId>) -> Self {
        self.retreats.push_back(to);
        self
    }

    pub fn submerge(mut self, answer: bool) -> Self {
        self.submerges.push_back(answer);
        self
    }

    fn missing(&self, player: &str, request: &str) -> ParticipantError {
        ParticipantError::NoAnswer {
            player: player.to_string(),
            request: request.to_string(),
        }
    }
}

impl Participant for ScriptedParticipant {
    fn name(&self) -> &str {
        "scripted"
    }

    fn select_casualties(
        &mut self,
        query: &CasualtyQuery,
    ) -> Result<CasualtyDetails, ParticipantError> {
        self.asked.push((query.player.clone(), "casualties"));
        match self.casualties.pop_front() {
            Some(details) => Ok(details),
            None if self.strict => Err(self.missing(&query.player, "casualties")),
            None => Ok(query.default.clone()),
        }
    }

    fn retreat_query(
        &mut self,
        query: &RetreatQuery,
    ) -> Result<Option<TerritoryId>, ParticipantError> {
        self.asked.push((query.player.clone(), "retreat"));
        match self.retreats.pop_front() {
            Some(answer) => Ok(answer),
            None if self.strict => Err(self.missing(&query.player, "retreat")),
            None => Ok(None),
        }
    }

    fn submerge_query(&mut self, query: &SubmergeQuery) -> Result<bool, ParticipantError> {
        self.asked.push((query.player.clone(), "submerge"));
        match self.submerges.pop_front() {
            Some(answer) => Ok(answer),
            None if self.strict => Err(self.missing(&query.player, "submerge")),
            None => Ok(false),
        }
    }
}

/// Collects every event it sees; clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<BattleEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BattleEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn step_names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BattleEvent::Step { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }
}

impl BattleObserver for RecordingObserver {
    fn on_event(&self, event: &BattleEvent) -> Result<(), ObserverError> {
        self.events
            .lock()
            .map_err(|_| ObserverError::Poisoned("RecordingObserver"))?
            .push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "RecordingObserver"
    }
}
