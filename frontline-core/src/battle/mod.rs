//! Single-territory battle resolution.
//!
//! A [`Battle`] is created `Pending` by the tracker, collects attackers as
//! they arrive, and is fought to completion by [`Battle::fight`] once every
//! battle it depends on has finished. Each round is a list of
//! [`steps::BattleStep`]s computed from the capabilities present on both
//! sides, then executed in order.
//!
//! Everything that can vary between games (rules, dice, decisions, combat
//! log) arrives through [`BattleContext`]; a battle reads no global state.

pub mod steps;

use crate::casualty::{self, CasualtyDetails, CasualtyRequest};
use crate::config::{BattleConfig, ConfigError};
use crate::dice::{self, DiceRoll};
use crate::observer::event_log::BattleEvent;
use crate::observer::ObserverRegistry;
use crate::participant::{Participant, ParticipantError, RetreatQuery, SubmergeQuery};
use crate::power::{self, CombatContext, Side};
use crate::profiling;
use crate::random::{RandomError, RandomSource};
use crate::state::{
    GameState, OwnershipChange, PlayerId, StateError, Territory, TerritoryId, Unit, UnitId,
    UnitType,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use steps::{BattleStep, FireKind, RoundProfile, SideProfile};
use thiserror::Error;
use tracing::instrument;

pub type BattleId = u32;

/// Bombing raids sort before normal battles.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BattleKind {
    BombingRaid,
    #[default]
    Normal,
}

/// At most one pending battle exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BattleKey {
    pub territory: TerritoryId,
    pub kind: BattleKind,
}

impl BattleKey {
    pub fn new(territory: TerritoryId, kind: BattleKind) -> Self {
        Self { territory, kind }
    }

    pub fn normal(territory: TerritoryId) -> Self {
        Self::new(territory, BattleKind::Normal)
    }

    pub fn raid(territory: TerritoryId) -> Self {
        Self::new(territory, BattleKind::BombingRaid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    Pending,
    InProgress,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Attacker,
    Defender,
    Draw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleResult {
    /// Defender eliminated and the territory changed hands.
    Conquered,
    /// Defender eliminated, nothing to take (water, no land unit left, ally's land).
    WonWithoutConquering,
    Lost,
    Retreated,
    Stalemate,
    /// The attack evaporated before any fighting.
    NoBattle,
    /// Raid bombers reached the target.
    Bombed,
}

impl BattleResult {
    pub fn winner(self) -> Winner {
        match self {
            BattleResult::Conquered | BattleResult::WonWithoutConquering | BattleResult::Bombed => {
                Winner::Attacker
            }
            BattleResult::Lost | BattleResult::Retreated | BattleResult::NoBattle => {
                Winner::Defender
            }
            BattleResult::Stalemate => Winner::Draw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retreat {
    pub to: TerritoryId,
    pub units: Vec<UnitId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionDamage {
    pub damage: u32,
    pub capacity_before: u32,
    pub capacity_after: u32,
}

/// Everything a finished battle reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleOutcome {
    pub battle: BattleId,
    pub territory: TerritoryId,
    pub kind: BattleKind,
    pub attacker: PlayerId,
    pub defender: Option<PlayerId>,
    pub winner: Winner,
    pub result: BattleResult,
    pub rounds: u32,
    pub steps: Vec<String>,
    pub attacker_casualties: Vec<UnitId>,
    pub defender_casualties: Vec<UnitId>,
    pub attacker_survivors: Vec<UnitId>,
    pub defender_survivors: Vec<UnitId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retreat: Option<Retreat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ownership_change: Option<OwnershipChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production_damage: Option<ProductionDamage>,
}

/// Errors that stop battle resolution.
///
/// None of these are game outcomes: each means the caller broke a
/// precondition or a collaborator failed, and the battle cannot continue.
#[derive(Error, Debug)]
pub enum BattleError {
    #[error("battle {battle} fought with {pending} unresolved dependencies")]
    DependenciesUnresolved { battle: BattleId, pending: usize },
    #[error("battle {0} is already finished")]
    AlreadyFinished(BattleId),
    #[error("no pending battle at {0:?}")]
    UnknownBattle(BattleKey),
    #[error("battle dependencies form a cycle at {0:?}")]
    DependencyCycle(BattleKey),
    #[error("invalid casualties from {player}: {reason}")]
    InvalidCasualties { player: PlayerId, reason: String },
    #[error("battle {battle}: {territory} is not a valid retreat")]
    InvalidRetreat {
        battle: BattleId,
        territory: TerritoryId,
    },
    #[error("{player} cannot join {attacker}'s attack on {territory}")]
    AttackerMismatch {
        territory: TerritoryId,
        attacker: PlayerId,
        player: PlayerId,
    },
    #[error("attack on {0} has no units")]
    EmptyAttack(TerritoryId),
    #[error(transparent)]
    Random(#[from] RandomError),
    #[error(transparent)]
    Participant(#[from] ParticipantError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Collaborators a battle runs against.
pub struct BattleContext<'a> {
    pub config: &'a BattleConfig,
    pub random: &'a mut dyn RandomSource,
    pub participant: &'a mut dyn Participant,
    pub observers: &'a ObserverRegistry,
}

/// How a battle ended, before ownership is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    AttackerWon,
    DefenderWon,
    Withdrawn,
    Stalemate,
}

pub(crate) enum Flow {
    Continue,
    Retreated,
}

/// Hits and casualties in flight during one round.
#[derive(Default)]
pub(crate) struct RoundState {
    /// Hits scored, keyed by firing side.
    hits: BTreeMap<(Side, FireKind), u32>,
    /// Kills removed at "remove casualties"; these units still fire until then.
    pending: BTreeMap<Side, Vec<UnitId>>,
    /// Kills removed by the sneak attack step.
    sneak: BTreeMap<Side, Vec<UnitId>>,
    aa: Vec<UnitId>,
    /// Every unit already chosen to die this round.
    marked: BTreeSet<UnitId>,
    sneak_victims: BTreeSet<Side>,
}

#[derive(Debug, Clone)]
pub struct Battle {
    pub(crate) id: BattleId,
    pub(crate) territory: TerritoryId,
    pub(crate) kind: BattleKind,
    pub(crate) attacker: PlayerId,
    pub(crate) defender: Option<PlayerId>,
    pub(crate) attacking_units: Vec<UnitId>,
    pub(crate) defending_units: Vec<UnitId>,
    /// Ships firing in support, with the sea zone each sits in.
    pub(crate) bombarding_units: Vec<(TerritoryId, UnitId)>,
    pub(crate) attacked_from: BTreeSet<TerritoryId>,
    pub(crate) dependencies: BTreeSet<BattleKey>,
    pub(crate) round: u32,
    pub(crate) status: BattleStatus,
    pub(crate) steps_run: Vec<String>,
    pub(crate) attacker_casualties: Vec<UnitId>,
    pub(crate) defender_casualties: Vec<UnitId>,
    /// Attacker left by retreat or by submerging.
    pub(crate) withdrew: bool,
    pub(crate) retreat: Option<Retreat>,
    pub(crate) production_damage: Option<ProductionDamage>,
    pub(crate) outcome: Option<BattleOutcome>,
}

impl Battle {
    pub fn new(id: BattleId, territory: TerritoryId, kind: BattleKind, attacker: &str) -> Self {
        Self {
            id,
            territory,
            kind,
            attacker: attacker.to_string(),
            defender: None,
            attacking_units: Vec::new(),
            defending_units: Vec::new(),
            bombarding_units: Vec::new(),
            attacked_from: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            round: 1,
            status: BattleStatus::Pending,
            steps_run: Vec::new(),
            attacker_casualties: Vec::new(),
            defender_casualties: Vec::new(),
            withdrew: false,
            retreat: None,
            production_damage: None,
            outcome: None,
        }
    }

    pub fn id(&self) -> BattleId {
        self.id
    }

    pub fn territory(&self) -> TerritoryId {
        self.territory
    }

    pub fn kind(&self) -> BattleKind {
        self.kind
    }

    pub fn key(&self) -> BattleKey {
        BattleKey::new(self.territory, self.kind)
    }

    pub fn attacker(&self) -> &str {
        &self.attacker
    }

    pub fn defender(&self) -> Option<&str> {
        self.defender.as_deref()
    }

    pub fn status(&self) -> BattleStatus {
        self.status
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn attacking_units(&self) -> &[UnitId] {
        &self.attacking_units
    }

    pub fn bombarding_units(&self) -> &[(TerritoryId, UnitId)] {
        &self.bombarding_units
    }

    pub fn attacked_from(&self) -> &BTreeSet<TerritoryId> {
        &self.attacked_from
    }

    pub fn dependencies(&self) -> &BTreeSet<BattleKey> {
        &self.dependencies
    }

    pub fn steps_run(&self) -> &[String] {
        &self.steps_run
    }

    pub fn outcome(&self) -> Option<&BattleOutcome> {
        self.outcome.as_ref()
    }

    /// Merge another wave of attackers.
    pub fn add_attackers(&mut self, units: &[UnitId], from: Option<TerritoryId>) {
        for id in units {
            if !self.attacking_units.contains(id) {
                self.attacking_units.push(*id);
            }
        }
        if let Some(from) = from {
            if from != self.territory {
                self.attacked_from.insert(from);
            }
        }
    }

    pub fn add_bombarding(&mut self, from: TerritoryId, units: &[UnitId]) {
        for id in units {
            if !self.bombarding_units.iter().any(|(_, u)| u == id) {
                self.bombarding_units.push((from, *id));
            }
        }
    }

    /// Drop attackers that will never arrive (cargo of sunk transports).
    pub fn remove_attackers(&mut self, units: &BTreeSet<UnitId>) {
        self.attacking_units.retain(|id| !units.contains(id));
    }

    pub(crate) fn resolve_dependency(&mut self, key: &BattleKey) {
        self.dependencies.remove(key);
    }

    /// Fight to completion.
    ///
    /// Fails if the battle already finished or still waits on another battle.
    #[instrument(skip_all, name = "battle", fields(id = self.id, territory = self.territory))]
    pub fn fight(
        &mut self,
        state: &mut GameState,
        ctx: &mut BattleContext,
    ) -> Result<BattleOutcome, BattleError> {
        if self.status == BattleStatus::Finished {
            return Err(BattleError::AlreadyFinished(self.id));
        }
        if !self.dependencies.is_empty() {
            return Err(BattleError::DependenciesUnresolved {
                battle: self.id,
                pending: self.dependencies.len(),
            });
        }
        ctx.config.validate()?;
        self.status = BattleStatus::InProgress;
        self.refresh_sides(state)?;

        log::info!(
            "Battle {} at {}: {} ({} units) vs {} ({} units)",
            self.id,
            state.territory(self.territory)?.name,
            self.attacker,
            self.attacking_units.len(),
            self.defender.as_deref().unwrap_or("nobody"),
            self.defending_units.len()
        );
        self.emit(
            ctx,
            BattleEvent::BattleStarted {
                battle: self.id,
                territory: self.territory,
                kind: self.kind,
                attacker: self.attacker.clone(),
                defender: self.defender.clone(),
                attackers: self.attacking_units.clone(),
                defenders: self.defending_units.clone(),
            },
        );

        if self.attacking_units.is_empty() {
            return self.conclude(state, ctx, BattleResult::NoBattle, None);
        }
        match self.kind {
            BattleKind::BombingRaid => self.fight_raid(state, ctx),
            BattleKind::Normal => self.fight_rounds(state, ctx),
        }
    }

    fn fight_rounds(
        &mut self,
        state: &mut GameState,
        ctx: &mut BattleContext,
    ) -> Result<BattleOutcome, BattleError> {
        loop {
            if let Some(ending) = self.check_end(state, ctx.config)? {
                return self.settle(state, ctx, ending);
            }
            if let Some(max) = ctx.config.max_rounds {
                if self.round > max {
                    log::debug!("Battle {} hit the {} round cap", self.id, max);
                    return self.settle(state, ctx, Ending::Stalemate);
                }
            }

            let profile = self.profile(state, ctx.config)?;
            let steps = steps::build_round(&profile);
            let mut round = RoundState {
                sneak_victims: [Side::Attacker, Side::Defender]
                    .into_iter()
                    .filter(|s| {
                        steps.iter().any(|step| matches!(
                            step,
                            BattleStep::RemoveSneakCasualties { victims } if victims.contains(s)
                        ))
                    })
                    .collect(),
                ..Default::default()
            };
            log::debug!("Battle {} round {}: {} steps", self.id, self.round, steps.len());

            for step in &steps {
                if let Flow::Retreated = self.execute(step, state, ctx, &mut round)? {
                    self.round += 1;
                    return self.settle(state, ctx, Ending::Withdrawn);
                }
            }
            profiling::frame_mark_round();
            self.round += 1;
        }
    }

    /// Run one step, recording its name first.
    pub(crate) fn execute(
        &mut self,
        step: &BattleStep,
        state: &mut GameState,
        ctx: &mut BattleContext,
        round: &mut RoundState,
    ) -> Result<Flow, BattleError> {
        let name = step.name(&self.attacker, self.defender.as_deref().unwrap_or("neutral"));
        log::debug!("Battle {} round {}: {}", self.id, self.round, name);
        self.emit(
            ctx,
            BattleEvent::Step {
                battle: self.id,
                round: self.round,
                name: name.clone(),
            },
        );
        self.steps_run.push(name.clone());

        match step {
            BattleStep::Fire {
                side,
                kind,
                exclude_air,
            } => {
                let roll = self.fire(state, ctx, *side, *kind, *exclude_air)?;
                log::debug!("{}: {} hits from {} dice", name, roll.hits, roll.dice.len());
                self.emit(
                    ctx,
                    BattleEvent::DiceRolled {
                        battle: self.id,
                        round: self.round,
                        player: self.player(*side).to_string(),
                        hits: roll.hits,
                        expected_hits: roll.expected_hits.to_f64(),
                        dice: roll.compressed(),
                    },
                );
                round.hits.insert((*side, *kind), roll.hits);
            }
            BattleStep::SelectCasualties { side, kind } => {
                let hits = round
                    .hits
                    .get(&(side.opponent(), *kind))
                    .copied()
                    .unwrap_or(0);
                if hits > 0 {
                    self.choose_casualties(state, ctx, round, *side, *kind, hits, name)?;
                }
            }
            BattleStep::RemoveSneakCasualties { victims } => {
                for victim in victims {
                    let killed = round.sneak.remove(victim).unwrap_or_default();
                    self.remove_killed(state, ctx, *victim, &killed)?;
                }
            }
            BattleStep::RemoveAaCasualties => {
                let killed = std::mem::take(&mut round.aa);
                self.remove_killed(state, ctx, Side::Attacker, &killed)?;
            }
            BattleStep::RemoveCasualties => {
                for side in [Side::Attacker, Side::Defender] {
                    let killed = round.pending.remove(&side).unwrap_or_default();
                    self.remove_killed(state, ctx, side, &killed)?;
                }
            }
            BattleStep::Submerge { side } => self.offer_submerge(state, ctx, *side)?,
            BattleStep::Withdraw { side: _ } => {
                if self.offer_retreat(state, ctx)? {
                    return Ok(Flow::Retreated);
                }
            }
            BattleStep::RaidDamage => self.raid_damage(state, ctx)?,
        }
        Ok(Flow::Continue)
    }

    fn fire(
        &self,
        state: &GameState,
        ctx: &mut BattleContext,
        side: Side,
        kind: FireKind,
        exclude_air: bool,
    ) -> Result<DiceRoll, BattleError> {
        let territory = state.territory(self.territory)?;
        match kind {
            FireKind::AntiAir => {
                let aa = self.aa_units(state)?;
                let targets = self.units_where(state, Side::Attacker, |ut, _| ut.is_air)?;
                dice::roll_aa(state, &aa, targets.len() as u32, ctx.config, &mut *ctx.random)
            }
            FireKind::Bombard => {
                let mut ships = Vec::new();
                for (from, id) in &self.bombarding_units {
                    if let Some(unit) = state.territory(*from)?.unit(*id) {
                        ships.push(unit);
                    }
                }
                let cctx = CombatContext {
                    state,
                    territory,
                    side: Side::Attacker,
                    friendly: &ships,
                    config: ctx.config,
                    bombarding: true,
                };
                dice::roll_combat(&ships, &cctx, &mut *ctx.random)
            }
            FireKind::Sneak | FireKind::Standard | FireKind::Air => {
                let friendly = self.combat_units(state, side)?;
                let mut firers = Vec::new();
                for unit in &friendly {
                    let ut = state.type_of(unit)?;
                    let fires = match kind {
                        FireKind::Sneak => ut.is_sub,
                        FireKind::Air => ut.is_air,
                        _ => !ut.is_sub && !(exclude_air && ut.is_air),
                    };
                    if fires {
                        firers.push(*unit);
                    }
                }
                let cctx = CombatContext {
                    state,
                    territory,
                    side,
                    friendly: &friendly,
                    config: ctx.config,
                    bombarding: false,
                };
                dice::roll_combat(&firers, &cctx, &mut *ctx.random)
            }
        }
    }

    /// Units of `victim` that hits of this kind can land on.
    fn casualty_pool<'s>(
        &self,
        state: &'s GameState,
        victim: Side,
        kind: FireKind,
        round: &RoundState,
    ) -> Result<Vec<&'s Unit>, BattleError> {
        let units = match kind {
            FireKind::AntiAir => self.units_where(state, victim, |ut, _| ut.is_air)?,
            // Subs cannot hit air.
            FireKind::Sneak => self.units_where(state, victim, |ut, _| !ut.is_air)?,
            // Air without a destroyer cannot hit subs.
            FireKind::Air => self.units_where(state, victim, |ut, _| !ut.is_sub)?,
            FireKind::Bombard | FireKind::Standard => self.combat_units(state, victim)?,
        };
        Ok(units
            .into_iter()
            .filter(|u| !round.marked.contains(&u.id))
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn choose_casualties(
        &mut self,
        state: &mut GameState,
        ctx: &mut BattleContext,
        round: &mut RoundState,
        victim: Side,
        kind: FireKind,
        hits: u32,
        step: String,
    ) -> Result<(), BattleError> {
        let player = self.player(victim).to_string();
        let low_luck = match kind {
            FireKind::AntiAir => ctx.config.aa_low_luck(),
            _ => ctx.config.low_luck,
        };
        let details = {
            let pool = self.casualty_pool(state, victim, kind, round)?;
            let request = CasualtyRequest {
                battle: self.id,
                territory: self.territory,
                player: &player,
                step,
                hits,
                pool: &pool,
            };
            casualty::select_casualties(&request, state, ctx.config, low_luck, &mut *ctx.participant)?
        };
        log::debug!(
            "{} loses {:?}, damaged {:?}",
            player,
            details.killed,
            details.damaged
        );
        self.emit(
            ctx,
            BattleEvent::CasualtiesSelected {
                battle: self.id,
                player: player.clone(),
                killed: details.killed.clone(),
                damaged: details.damaged.clone(),
            },
        );
        self.apply_damage(state, &details)?;

        round.marked.extend(details.killed.iter().copied());
        let bucket = match kind {
            FireKind::AntiAir => &mut round.aa,
            FireKind::Sneak if round.sneak_victims.contains(&victim) => {
                round.sneak.entry(victim).or_default()
            }
            _ => round.pending.entry(victim).or_default(),
        };
        bucket.extend(details.killed);
        Ok(())
    }

    /// Damage never removes a unit, so it lands as soon as it is chosen.
    fn apply_damage(
        &self,
        state: &mut GameState,
        details: &CasualtyDetails,
    ) -> Result<(), BattleError> {
        let territory = state.territory_mut(self.territory)?;
        for id in &details.damaged {
            let unit = territory.unit_mut(*id).ok_or(StateError::UnknownUnit(*id))?;
            unit.hits += 1;
        }
        Ok(())
    }

    /// Remove dead units, taking transported cargo down with its transport.
    pub(crate) fn remove_killed(
        &mut self,
        state: &mut GameState,
        ctx: &BattleContext,
        side: Side,
        killed: &[UnitId],
    ) -> Result<(), BattleError> {
        if killed.is_empty() {
            return Ok(());
        }
        let mut doomed: BTreeSet<UnitId> = killed.iter().copied().collect();
        {
            let territory = state.territory(self.territory)?;
            for unit in &territory.units {
                if let Some(transport) = unit.transported_by {
                    if doomed.contains(&transport) && territory.is_water {
                        doomed.insert(unit.id);
                    }
                }
            }
        }
        let removed = state.territory_mut(self.territory)?.take_units(&doomed);
        let removed: Vec<UnitId> = removed.into_iter().map(|u| u.id).collect();

        self.attacking_units.retain(|id| !doomed.contains(id));
        match side {
            Side::Attacker => self.attacker_casualties.extend(&removed),
            Side::Defender => self.defender_casualties.extend(&removed),
        }
        log::debug!("{} removes {:?}", self.player(side), removed);
        self.emit(
            ctx,
            BattleEvent::CasualtiesRemoved {
                battle: self.id,
                player: self.player(side).to_string(),
                units: removed,
            },
        );
        Ok(())
    }

    fn offer_submerge(
        &mut self,
        state: &mut GameState,
        ctx: &mut BattleContext,
        side: Side,
    ) -> Result<(), BattleError> {
        if !ctx.config.subs_can_submerge {
            return Ok(());
        }
        let opposing_destroyer = !self
            .units_where(state, side.opponent(), |ut, _| ut.is_destroyer)?
            .is_empty();
        let subs: Vec<UnitId> = self
            .units_where(state, side, |ut, _| ut.is_sub)?
            .iter()
            .map(|u| u.id)
            .collect();
        if opposing_destroyer || subs.is_empty() || self.combat_units(state, side.opponent())?.is_empty() {
            return Ok(());
        }

        let query = SubmergeQuery {
            battle: self.id,
            territory: self.territory,
            player: self.player(side).to_string(),
            round: self.round,
            units: subs.clone(),
        };
        if !ctx.participant.submerge_query(&query)? {
            return Ok(());
        }
        let territory = state.territory_mut(self.territory)?;
        for unit in territory.units.iter_mut().filter(|u| subs.contains(&u.id)) {
            unit.submerged = true;
        }
        // Only a withdrawal when nothing else of the attacker stays to fight.
        if side == Side::Attacker && self.combat_units(state, Side::Attacker)?.is_empty() {
            self.withdrew = true;
        }
        log::debug!("{} submerges {:?}", query.player, subs);
        self.emit(
            ctx,
            BattleEvent::UnitsSubmerged {
                battle: self.id,
                player: query.player,
                units: subs,
            },
        );
        Ok(())
    }

    /// Where the attacker may withdraw to: friendly or neutral territories it came from.
    pub fn retreat_options(&self, state: &GameState) -> Vec<TerritoryId> {
        self.attacked_from
            .iter()
            .filter(|id| {
                state
                    .territory(**id)
                    .map(|t| !state.is_enemy_territory(t, &self.attacker))
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    /// Returns true when the attacker withdrew.
    fn offer_retreat(
        &mut self,
        state: &mut GameState,
        ctx: &mut BattleContext,
    ) -> Result<bool, BattleError> {
        let attackers = self.combat_units(state, Side::Attacker)?.len();
        let defenders = self.combat_units(state, Side::Defender)?.len();
        let options = self.retreat_options(state);
        if attackers == 0 || defenders == 0 || options.is_empty() {
            return Ok(false);
        }
        let query = RetreatQuery {
            battle: self.id,
            territory: self.territory,
            player: self.attacker.clone(),
            round: self.round,
            options,
            attackers_remaining: attackers,
            defenders_remaining: defenders,
        };
        let Some(to) = ctx.participant.retreat_query(&query)? else {
            return Ok(false);
        };
        if !query.options.contains(&to) {
            return Err(BattleError::InvalidRetreat {
                battle: self.id,
                territory: to,
            });
        }

        let leaving: BTreeSet<UnitId> = {
            let territory = state.territory(self.territory)?;
            self.attacking_units
                .iter()
                .filter(|id| territory.unit(**id).is_some_and(|u| !u.submerged))
                .copied()
                .collect()
        };
        let moved = state.move_units(self.territory, to, &leaving)?;
        log::info!("{} retreats {} units to {}", self.attacker, moved.len(), to);
        self.emit(
            ctx,
            BattleEvent::Retreated {
                battle: self.id,
                player: self.attacker.clone(),
                to,
                units: moved.clone(),
            },
        );
        self.retreat = Some(Retreat { to, units: moved });
        self.withdrew = true;
        Ok(true)
    }

    fn profile(&self, state: &GameState, config: &BattleConfig) -> Result<RoundProfile, BattleError> {
        let attackers = self.combat_units(state, Side::Attacker)?;
        let defenders = self.combat_units(state, Side::Defender)?;
        let first_round = self.round == 1;
        let amphibious = attackers.iter().any(|u| u.was_amphibious);
        let mut defender = side_profile(state, &defenders)?;
        defender.aa = first_round && !self.aa_units(state)?.is_empty();
        Ok(RoundProfile {
            first_round,
            bombard: first_round
                && !self.bombarding_units.is_empty()
                && state.territory(self.territory)?.is_land(),
            attacker: side_profile(state, &attackers)?,
            defender,
            subs_can_submerge: config.subs_can_submerge,
            can_withdraw: !amphibious && !self.retreat_options(state).is_empty(),
        })
    }

    fn check_end(
        &self,
        state: &GameState,
        config: &BattleConfig,
    ) -> Result<Option<Ending>, BattleError> {
        let attackers = self.combat_units(state, Side::Attacker)?;
        if attackers.is_empty() {
            return Ok(Some(if self.withdrew {
                Ending::Withdrawn
            } else {
                Ending::DefenderWon
            }));
        }
        let defenders = self.combat_units(state, Side::Defender)?;
        if defenders.is_empty() {
            return Ok(Some(Ending::AttackerWon));
        }
        let territory = state.territory(self.territory)?;
        if !can_hit(state, territory, config, Side::Attacker, &attackers, &defenders)?
            && !can_hit(state, territory, config, Side::Defender, &defenders, &attackers)?
        {
            log::debug!("Battle {}: neither side can hit", self.id);
            return Ok(Some(Ending::Stalemate));
        }
        Ok(None)
    }

    fn settle(
        &mut self,
        state: &mut GameState,
        ctx: &mut BattleContext,
        ending: Ending,
    ) -> Result<BattleOutcome, BattleError> {
        match ending {
            Ending::AttackerWon => {
                let land_survivor = {
                    let territory = state.territory(self.territory)?;
                    let mut found = false;
                    if territory.is_land() {
                        for unit in self.combat_units(state, Side::Attacker)? {
                            if state.type_of(unit)?.is_land() {
                                found = true;
                                break;
                            }
                        }
                    }
                    found
                };
                let change = if land_survivor {
                    state.take_over(self.territory, &self.attacker)?
                } else {
                    None
                };
                match change {
                    Some(change) => {
                        self.emit(
                            ctx,
                            BattleEvent::TerritoryConquered {
                                battle: self.id,
                                territory: self.territory,
                                from: change.from.clone(),
                                to: change.to.clone(),
                                capital: change.capital,
                            },
                        );
                        self.conclude(state, ctx, BattleResult::Conquered, Some(change))
                    }
                    None => self.conclude(state, ctx, BattleResult::WonWithoutConquering, None),
                }
            }
            Ending::DefenderWon => self.conclude(state, ctx, BattleResult::Lost, None),
            Ending::Withdrawn => self.conclude(state, ctx, BattleResult::Retreated, None),
            Ending::Stalemate => self.conclude(state, ctx, BattleResult::Stalemate, None),
        }
    }

    /// Build and store the outcome record.
    pub(crate) fn conclude(
        &mut self,
        state: &GameState,
        ctx: &BattleContext,
        result: BattleResult,
        ownership_change: Option<OwnershipChange>,
    ) -> Result<BattleOutcome, BattleError> {
        let territory = state.territory(self.territory)?;
        let attacker_survivors: Vec<UnitId> = match &self.retreat {
            Some(retreat) => retreat.units.clone(),
            None => self
                .attacking_units
                .iter()
                .filter(|id| territory.contains(**id))
                .copied()
                .collect(),
        };
        let defender_survivors: Vec<UnitId> = territory
            .units
            .iter()
            .filter(|u| !state.are_allied(&u.owner, &self.attacker))
            .map(|u| u.id)
            .collect();

        let rounds = match self.kind {
            BattleKind::BombingRaid => u32::from(result != BattleResult::NoBattle),
            BattleKind::Normal => self.round - 1,
        };
        let outcome = BattleOutcome {
            battle: self.id,
            territory: self.territory,
            kind: self.kind,
            attacker: self.attacker.clone(),
            defender: self.defender.clone(),
            winner: result.winner(),
            result,
            rounds,
            steps: self.steps_run.clone(),
            attacker_casualties: self.attacker_casualties.clone(),
            defender_casualties: self.defender_casualties.clone(),
            attacker_survivors,
            defender_survivors,
            retreat: self.retreat.clone(),
            ownership_change,
            production_damage: self.production_damage,
        };
        self.status = BattleStatus::Finished;
        self.outcome = Some(outcome.clone());

        log::info!(
            "Battle {} at {} ends: {:?} after {} rounds",
            self.id,
            territory.name,
            result,
            rounds
        );
        self.emit(
            ctx,
            BattleEvent::BattleEnded {
                battle: self.id,
                territory: self.territory,
                result,
                winner: outcome.winner,
                rounds,
            },
        );
        Ok(outcome)
    }

    /// Settle attacker and defender from the current state.
    ///
    /// Attackers that are no longer in the territory are dropped; the
    /// defender is the territory owner if hostile, else the first hostile
    /// unit's owner.
    fn refresh_sides(&mut self, state: &GameState) -> Result<(), BattleError> {
        let territory = state.territory(self.territory)?;
        self.attacking_units.retain(|id| {
            territory
                .unit(*id)
                .is_some_and(|u| state.are_allied(&u.owner, &self.attacker))
        });

        self.defender = match &territory.owner {
            Some(owner) if !state.are_allied(owner, &self.attacker) => Some(owner.clone()),
            _ => territory
                .units
                .iter()
                .find(|u| !state.are_allied(&u.owner, &self.attacker))
                .map(|u| u.owner.clone()),
        };
        self.defending_units = match self.kind {
            BattleKind::Normal => state.enemy_combat_units(self.territory, &self.attacker)?,
            BattleKind::BombingRaid => self.aa_units(state)?.iter().map(|u| u.id).collect(),
        };
        Ok(())
    }

    fn player(&self, side: Side) -> &str {
        match side {
            Side::Attacker => &self.attacker,
            Side::Defender => self.defender.as_deref().unwrap_or("neutral"),
        }
    }

    /// Units of one side able to fight this round.
    pub(crate) fn combat_units<'s>(
        &self,
        state: &'s GameState,
        side: Side,
    ) -> Result<Vec<&'s Unit>, BattleError> {
        match side {
            Side::Attacker => {
                let territory = state.territory(self.territory)?;
                let mut out = Vec::new();
                for id in &self.attacking_units {
                    let Some(unit) = territory.unit(*id) else {
                        continue;
                    };
                    if unit.submerged || (territory.is_water && unit.transported_by.is_some()) {
                        continue;
                    }
                    if state.type_of(unit)?.is_infrastructure {
                        continue;
                    }
                    out.push(unit);
                }
                Ok(out)
            }
            Side::Defender => {
                let ids = state.enemy_combat_units(self.territory, &self.attacker)?;
                let territory = state.territory(self.territory)?;
                Ok(ids.iter().filter_map(|id| territory.unit(*id)).collect())
            }
        }
    }

    pub(crate) fn units_where<'s>(
        &self,
        state: &'s GameState,
        side: Side,
        pred: impl Fn(&UnitType, &Unit) -> bool,
    ) -> Result<Vec<&'s Unit>, BattleError> {
        let mut out = Vec::new();
        for unit in self.combat_units(state, side)? {
            if pred(state.type_of(unit)?, unit) {
                out.push(unit);
            }
        }
        Ok(out)
    }

    /// Hostile anti-air units in the territory, including infrastructure.
    pub(crate) fn aa_units<'s>(&self, state: &'s GameState) -> Result<Vec<&'s Unit>, BattleError> {
        let territory = state.territory(self.territory)?;
        let mut out = Vec::new();
        for unit in &territory.units {
            if unit.submerged || state.are_allied(&unit.owner, &self.attacker) {
                continue;
            }
            if state.type_of(unit)?.is_anti_air() {
                out.push(unit);
            }
        }
        Ok(out)
    }

    pub(crate) fn emit(&self, ctx: &BattleContext, event: BattleEvent) {
        ctx.observers.notify(&event);
    }
}

fn side_profile(state: &GameState, units: &[&Unit]) -> Result<SideProfile, StateError> {
    let mut profile = SideProfile::default();
    for unit in units {
        let ut = state.type_of(unit)?;
        profile.subs |= ut.is_sub;
        profile.destroyer |= ut.is_destroyer;
        profile.air |= ut.is_air;
        profile.other |= !ut.is_sub && !ut.is_air;
    }
    Ok(profile)
}

/// Whether anything on `side` can ever score a hit on `targets`.
fn can_hit(
    state: &GameState,
    territory: &Territory,
    config: &BattleConfig,
    side: Side,
    firers: &[&Unit],
    targets: &[&Unit],
) -> Result<bool, BattleError> {
    let ctx = CombatContext {
        state,
        territory,
        side,
        friendly: firers,
        config,
        bombarding: false,
    };
    let powers = power::unit_powers(firers, &ctx)?;
    let mut has_destroyer = false;
    for unit in firers {
        has_destroyer |= state.type_of(unit)?.is_destroyer;
    }
    for (unit, p) in firers.iter().zip(&powers) {
        if p.rolls == 0 {
            continue;
        }
        let ut = state.type_of(unit)?;
        for target in targets {
            let tt = state.type_of(target)?;
            if ut.is_sub && tt.is_air {
                continue;
            }
            if ut.is_air && tt.is_sub && !has_destroyer {
                continue;
            }
            return Ok(true);
        }
    }
    Ok(false)
}
