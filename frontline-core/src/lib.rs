//! # Frontline Core
//!
//! Deterministic battle resolution for a turn-based strategy board game.
//!
//! Movement hands attacking forces to the [`BattleTracker`], which keeps one
//! pending [`Battle`] per territory and kind. Battles are fought in dependency
//! order; each round is planned as a list of steps and executed against the
//! shared [`GameState`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌─────────────┐
//! │  Movement   │────▶│ BattleTracker │────▶│   Battle    │
//! │  (attacks)  │     │ (pending map) │     │ (round loop)│
//! └─────────────┘     └───────────────┘     └──────┬──────┘
//!                                                  │
//!          ┌──────────────┬──────────────┬─────────┴────┐
//!          ▼              ▼              ▼              ▼
//!     ┌─────────┐   ┌──────────┐   ┌───────────┐  ┌───────────┐
//!     │  power  │   │   dice   │   │ casualty  │  │ observers │
//!     └─────────┘   └──────────┘   └───────────┘  └───────────┘
//! ```
//!
//! ## Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`GameState`] | Territories, units, unit types, alliances, tech |
//! | [`BattleTracker`] | Pending battles, dependencies, conquests this turn |
//! | [`Battle`] | One fight: normal combat or a strategic bombing raid |
//! | [`BattleContext`] | Rules, dice, decisions and combat log for a fight |
//! | [`BattleOutcome`] | Everything a finished battle reports back |
//!
//! ## Determinism
//!
//! Every random draw goes through a [`RandomSource`] and every decision
//! through a [`Participant`]. Swap in [`ScriptedRandomSource`] and a scripted
//! participant to replay a battle exactly.

pub mod battle;
pub mod bombing;
pub mod casualty;
pub mod config;
pub mod dice;
pub mod fixed;
pub mod observer;
pub mod odds;
pub mod participant;
pub mod power;
pub mod profiling;
pub mod random;
pub mod state;
pub mod testing;
pub mod tracker;

pub use battle::{
    Battle, BattleContext, BattleError, BattleKey, BattleKind, BattleOutcome, BattleResult,
    BattleStatus, Winner,
};
pub use casualty::{CasualtyDetails, CasualtyQuery};
pub use config::BattleConfig;
pub use dice::{DiceRoll, Die, DieKind};
pub use fixed::Fixed;
pub use observer::{BattleEvent, BattleObserver, EventLogObserver, ObserverError, ObserverRegistry};
pub use odds::{estimate, OddsSummary};
pub use participant::{DefaultParticipant, Participant, RandomParticipant};
pub use power::Side;
pub use random::{RandomError, RandomSource, ScriptedRandomSource, SeededRandomSource};
pub use state::{GameState, Territory, TerritoryId, Unit, UnitId, UnitType};
pub use tracker::{Attack, BattleTracker, FightOrder, Route};
