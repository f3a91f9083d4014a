//! Pending battles for the current turn.
//!
//! Movement registers attacking forces with [`BattleTracker::add_battle`].
//! Forces arriving at a territory that already has a pending battle of the
//! same kind join it. Amphibious landings wait on the naval battle in the sea
//! zone they unloaded from, and [`BattleTracker::fight_all`] resolves
//! everything in dependency order, bombing raids first.

use crate::battle::{Battle, BattleContext, BattleError, BattleId, BattleKey, BattleKind, BattleOutcome};
use crate::state::{GameState, PlayerId, StateError, TerritoryId, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::instrument;

/// Path a force moved along, ending where it attacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub start: TerritoryId,
    /// Territories entered in order; empty when the force did not move.
    pub steps: Vec<TerritoryId>,
}

impl Route {
    pub fn new(start: TerritoryId, steps: Vec<TerritoryId>) -> Self {
        Self { start, steps }
    }

    pub fn end(&self) -> TerritoryId {
        self.steps.last().copied().unwrap_or(self.start)
    }

    /// Territories passed through without stopping.
    pub fn intermediates(&self) -> &[TerritoryId] {
        match self.steps.len() {
            0 => &[],
            n => &self.steps[..n - 1],
        }
    }

    /// The territory the force entered the end from.
    pub fn entered_from(&self) -> TerritoryId {
        match self.steps.len() {
            0 | 1 => self.start,
            n => self.steps[n - 2],
        }
    }

    /// Sea to land: cargo unloading onto a beach.
    pub fn is_unload(&self, state: &GameState) -> Result<bool, StateError> {
        Ok(state.territory(self.start)?.is_water && state.territory(self.end())?.is_land())
    }
}

/// One force handed over by movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attack {
    pub route: Route,
    pub units: Vec<UnitId>,
    #[serde(default)]
    pub kind: BattleKind,
}

/// Order in which independent battles are fought.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FightOrder {
    /// Territory id order.
    #[default]
    Stable,
    /// The listed territories first, in list order, then the rest by id.
    Preferred(Vec<TerritoryId>),
}

impl FightOrder {
    fn rank(&self, territory: TerritoryId) -> usize {
        match self {
            FightOrder::Stable => 0,
            FightOrder::Preferred(list) => list
                .iter()
                .position(|t| *t == territory)
                .unwrap_or(list.len()),
        }
    }
}

/// Units that unloaded into a battle from a sea zone.
#[derive(Debug, Clone)]
struct Landing {
    sea: TerritoryId,
    units: Vec<UnitId>,
}

#[derive(Debug, Default)]
pub struct BattleTracker {
    pending: BTreeMap<BattleKey, Battle>,
    next_id: BattleId,
    conquered: BTreeSet<TerritoryId>,
    blitzed: BTreeSet<TerritoryId>,
    landings: BTreeMap<BattleKey, Vec<Landing>>,
    outcomes: Vec<BattleOutcome>,
}

impl BattleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a force that has moved along `route` and now stands in its
    /// last territory.
    ///
    /// Returns the key of the battle the force joined, or `None` when no
    /// fight is needed (an undefended territory is taken on the spot).
    pub fn add_battle(
        &mut self,
        state: &mut GameState,
        route: &Route,
        units: &[UnitId],
        kind: BattleKind,
    ) -> Result<Option<BattleKey>, BattleError> {
        let end = route.end();
        let Some(first) = units.first() else {
            return Err(BattleError::EmptyAttack(end));
        };
        let player: PlayerId = state.unit(end, *first)?.owner.clone();
        let key = BattleKey::new(end, kind);

        if let Some(battle) = self.pending.get(&key) {
            if !state.are_allied(battle.attacker(), &player) {
                return Err(BattleError::AttackerMismatch {
                    territory: end,
                    attacker: battle.attacker().to_string(),
                    player,
                });
            }
        }

        let unload = kind == BattleKind::Normal && route.is_unload(state)?;
        // Cargo unloading from a contested sea zone lands only once the sea
        // battle is over, even on an empty beach.
        let waits_on_naval = unload && self.pending.contains_key(&BattleKey::normal(route.start));
        if kind == BattleKind::Normal {
            self.blitz_through(state, route, units, &player)?;
            if unload {
                mark_amphibious(state, end, units)?;
            }
            if !waits_on_naval
                && !self.pending.contains_key(&key)
                && state.enemy_combat_units(end, &player)?.is_empty()
            {
                self.take_undefended(state, end, units, &player)?;
                return Ok(None);
            }
        }

        let id = self.next_id + 1;
        let battle = self.pending.entry(key).or_insert_with(|| {
            log::debug!("New {:?} battle {} at {} for {}", kind, id, end, player);
            Battle::new(id, end, kind, &player)
        });
        if battle.id() == id {
            self.next_id = id;
        }
        battle.add_attackers(units, Some(route.entered_from()));

        if waits_on_naval {
            self.add_dependency(key, BattleKey::normal(route.start))?;
            let land_units = land_units(state, end, units)?;
            self.landings.entry(key).or_default().push(Landing {
                sea: route.start,
                units: land_units,
            });
        }
        Ok(Some(key))
    }

    /// Register several forces in order.
    pub fn add_attacks(
        &mut self,
        state: &mut GameState,
        attacks: &[Attack],
    ) -> Result<Vec<Option<BattleKey>>, BattleError> {
        attacks
            .iter()
            .map(|a| self.add_battle(state, &a.route, &a.units, a.kind))
            .collect()
    }

    /// Ships in `from` shelling the coast ahead of the assault on `territory`.
    pub fn add_bombardment(
        &mut self,
        territory: TerritoryId,
        from: TerritoryId,
        units: &[UnitId],
    ) -> Result<(), BattleError> {
        let key = BattleKey::normal(territory);
        let battle = self
            .pending
            .get_mut(&key)
            .ok_or(BattleError::UnknownBattle(key))?;
        battle.add_bombarding(from, units);
        let naval = BattleKey::normal(from);
        if self.pending.contains_key(&naval) {
            self.add_dependency(key, naval)?;
        }
        Ok(())
    }

    pub fn get_pending_battle(&self, territory: TerritoryId, kind: BattleKind) -> Option<&Battle> {
        self.pending.get(&BattleKey::new(territory, kind))
    }

    /// Battles that wait on `key`.
    pub fn get_dependent_on(&self, key: &BattleKey) -> Vec<BattleKey> {
        self.pending
            .iter()
            .filter(|(_, b)| b.dependencies().contains(key))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Battles that cannot be fought yet.
    pub fn get_blocked(&self) -> Vec<BattleKey> {
        self.pending
            .iter()
            .filter(|(_, b)| !b.dependencies().is_empty())
            .map(|(k, _)| *k)
            .collect()
    }

    /// Make `blocked` wait until `blocking` has been fought.
    pub fn add_dependency(&mut self, blocked: BattleKey, blocking: BattleKey) -> Result<(), BattleError> {
        if !self.pending.contains_key(&blocking) {
            return Err(BattleError::UnknownBattle(blocking));
        }
        if !self.pending.contains_key(&blocked) {
            return Err(BattleError::UnknownBattle(blocked));
        }
        if blocked == blocking || self.depends_on(blocking, blocked) {
            return Err(BattleError::DependencyCycle(blocked));
        }
        if let Some(battle) = self.pending.get_mut(&blocked) {
            battle.dependencies.insert(blocking);
        }
        Ok(())
    }

    /// Whether `from` waits on `target`, directly or transitively.
    fn depends_on(&self, from: BattleKey, target: BattleKey) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(key) = stack.pop() {
            if key == target {
                return true;
            }
            if !seen.insert(key) {
                continue;
            }
            if let Some(battle) = self.pending.get(&key) {
                stack.extend(battle.dependencies().iter().copied());
            }
        }
        false
    }

    /// Drop a pending battle unfought, releasing anything waiting on it.
    pub fn remove_battle(&mut self, key: &BattleKey) -> Option<Battle> {
        let removed = self.pending.remove(key)?;
        self.landings.remove(key);
        for battle in self.pending.values_mut() {
            battle.resolve_dependency(key);
        }
        Some(removed)
    }

    pub fn pending_battle_sites(&self, bombing: bool) -> Vec<TerritoryId> {
        let kind = if bombing {
            BattleKind::BombingRaid
        } else {
            BattleKind::Normal
        };
        self.pending
            .keys()
            .filter(|k| k.kind == kind)
            .map(|k| k.territory)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fight one battle whose dependencies are all resolved.
    ///
    /// A battle that cannot be fought stays pending.
    pub fn fight(
        &mut self,
        key: BattleKey,
        state: &mut GameState,
        ctx: &mut BattleContext,
    ) -> Result<BattleOutcome, BattleError> {
        let battle = self
            .pending
            .get_mut(&key)
            .ok_or(BattleError::UnknownBattle(key))?;
        let outcome = battle.fight(state, ctx)?;
        self.pending.remove(&key);
        self.landings.remove(&key);
        self.record(key, &outcome, state)?;
        Ok(outcome)
    }

    /// Fight every pending battle, dependencies first, raids before normal
    /// battles.
    #[instrument(skip_all, name = "fight_all", fields(pending = self.pending.len()))]
    pub fn fight_all(
        &mut self,
        order: &FightOrder,
        state: &mut GameState,
        ctx: &mut BattleContext,
    ) -> Result<Vec<BattleOutcome>, BattleError> {
        let mut keys: Vec<BattleKey> = self.pending.keys().copied().collect();
        keys.sort_by_key(|k| (k.kind, order.rank(k.territory), k.territory));

        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let mut visiting = BTreeSet::new();
            self.fight_with_dependencies(key, state, ctx, &mut visiting, &mut outcomes)?;
        }
        log::info!("Resolved {} battles", outcomes.len());
        Ok(outcomes)
    }

    fn fight_with_dependencies(
        &mut self,
        key: BattleKey,
        state: &mut GameState,
        ctx: &mut BattleContext,
        visiting: &mut BTreeSet<BattleKey>,
        outcomes: &mut Vec<BattleOutcome>,
    ) -> Result<(), BattleError> {
        let Some(battle) = self.pending.get(&key) else {
            // Already fought as someone's dependency.
            return Ok(());
        };
        if !visiting.insert(key) {
            return Err(BattleError::DependencyCycle(key));
        }
        let dependencies: Vec<BattleKey> = battle.dependencies().iter().copied().collect();
        for dependency in dependencies {
            self.fight_with_dependencies(dependency, state, ctx, visiting, outcomes)?;
        }
        visiting.remove(&key);
        outcomes.push(self.fight(key, state, ctx)?);
        Ok(())
    }

    /// Book a finished battle and release what waited on it.
    fn record(
        &mut self,
        key: BattleKey,
        outcome: &BattleOutcome,
        state: &mut GameState,
    ) -> Result<(), BattleError> {
        if outcome.ownership_change.is_some() {
            self.conquered.insert(key.territory);
        }
        for dependent in self.get_dependent_on(&key) {
            self.drop_stranded_landings(dependent, key.territory, state)?;
            if let Some(battle) = self.pending.get_mut(&dependent) {
                battle.resolve_dependency(&key);
            }
        }
        self.outcomes.push(outcome.clone());
        Ok(())
    }

    /// Cargo whose transport went down in the sea battle never reaches the beach.
    fn drop_stranded_landings(
        &mut self,
        dependent: BattleKey,
        sea: TerritoryId,
        state: &mut GameState,
    ) -> Result<(), BattleError> {
        let Some(landings) = self.landings.get(&dependent) else {
            return Ok(());
        };
        let mut stranded = BTreeSet::new();
        {
            let beach = state.territory(dependent.territory)?;
            for landing in landings.iter().filter(|l| l.sea == sea) {
                for id in &landing.units {
                    let transport = beach.unit(*id).and_then(|u| u.transported_by);
                    if let Some(transport) = transport {
                        if state.locate_unit(transport).is_none() {
                            stranded.insert(*id);
                        }
                    }
                }
            }
        }
        if stranded.is_empty() {
            return Ok(());
        }
        log::info!(
            "{} units lost with their transports off {}",
            stranded.len(),
            dependent.territory
        );
        state
            .territory_mut(dependent.territory)?
            .take_units(&stranded);
        if let Some(battle) = self.pending.get_mut(&dependent) {
            battle.remove_attackers(&stranded);
        }
        Ok(())
    }

    /// Reset for the next turn.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.conquered.clear();
        self.blitzed.clear();
        self.landings.clear();
        self.outcomes.clear();
    }

    pub fn conquered(&self) -> &BTreeSet<TerritoryId> {
        &self.conquered
    }

    pub fn blitzed(&self) -> &BTreeSet<TerritoryId> {
        &self.blitzed
    }

    pub fn outcomes(&self) -> &[BattleOutcome] {
        &self.outcomes
    }

    /// Take empty enemy land passed through by blitzing units.
    fn blitz_through(
        &mut self,
        state: &mut GameState,
        route: &Route,
        units: &[UnitId],
        player: &str,
    ) -> Result<(), BattleError> {
        let end = route.end();
        let mut blitzing = false;
        for id in units {
            let ut = state.type_of(state.unit(end, *id)?)?;
            blitzing |= ut.can_blitz && ut.is_land();
        }
        if !blitzing {
            return Ok(());
        }
        for t in route.intermediates() {
            let territory = state.territory(*t)?;
            if !territory.is_land()
                || !state.is_enemy_territory(territory, player)
                || !state.enemy_combat_units(*t, player)?.is_empty()
            {
                continue;
            }
            if state.take_over(*t, player)?.is_some() {
                log::debug!("{} blitzes through {}", player, t);
                self.conquered.insert(*t);
                self.blitzed.insert(*t);
            }
        }
        Ok(())
    }

    fn take_undefended(
        &mut self,
        state: &mut GameState,
        territory: TerritoryId,
        units: &[UnitId],
        player: &str,
    ) -> Result<(), BattleError> {
        let has_land = !land_units(state, territory, units)?.is_empty();
        let t = state.territory(territory)?;
        if has_land && t.is_land() && state.is_enemy_territory(t, player) {
            if state.take_over(territory, player)?.is_some() {
                self.conquered.insert(territory);
            }
        }
        Ok(())
    }
}

fn land_units(
    state: &GameState,
    territory: TerritoryId,
    units: &[UnitId],
) -> Result<Vec<UnitId>, StateError> {
    let mut out = Vec::new();
    for id in units {
        if state.type_of(state.unit(territory, *id)?)?.is_land() {
            out.push(*id);
        }
    }
    Ok(out)
}

fn mark_amphibious(
    state: &mut GameState,
    territory: TerritoryId,
    units: &[UnitId],
) -> Result<(), StateError> {
    let land = land_units(state, territory, units)?;
    let t = state.territory_mut(territory)?;
    for id in land {
        if let Some(unit) = t.unit_mut(id) {
            unit.was_amphibious = true;
        }
    }
    Ok(())
}
