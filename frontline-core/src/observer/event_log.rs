//! Event log observer for recording combat events as JSONL.
//!
//! Every [`BattleEvent`] is written as one JSON line to any `Write`
//! destination (stdout, file, pipe).
//!
//! # Events
//!
//! - `battle_started` - Sides settled, fighting begins
//! - `step` - A battle step is about to run
//! - `dice_rolled` - A firing step rolled (compact dice)
//! - `casualties_selected` - A player chose who dies or absorbs damage
//! - `casualties_removed` - Dead units left the board
//! - `units_submerged` - Subs dived out of the fight
//! - `retreated` - The attacker withdrew
//! - `territory_conquered` - Ownership changed hands
//! - `production_damaged` - A bombing raid reduced production capacity
//! - `battle_ended` - Final result

use super::{BattleObserver, ObserverError};
use crate::battle::{BattleId, BattleKind, BattleResult, Winner};
use crate::state::{PlayerId, TerritoryId, UnitId};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Combat events in the order they happen.
///
/// Uses serde's tag format for clean JSONL output:
/// ```json
/// {"type":"step","battle":3,"round":1,"name":"Germans fire"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BattleEvent {
    BattleStarted {
        battle: BattleId,
        territory: TerritoryId,
        kind: BattleKind,
        attacker: PlayerId,
        #[serde(skip_serializing_if = "Option::is_none")]
        defender: Option<PlayerId>,
        attackers: Vec<UnitId>,
        defenders: Vec<UnitId>,
    },

    Step {
        battle: BattleId,
        round: u32,
        name: String,
    },

    DiceRolled {
        battle: BattleId,
        round: u32,
        player: PlayerId,
        /// Hits, or damage points for a bombing raid
        hits: u32,
        expected_hits: f64,
        /// Dice in compact form (`value << 16 | rolled_at << 8 | kind`)
        dice: Vec<u32>,
    },

    CasualtiesSelected {
        battle: BattleId,
        player: PlayerId,
        killed: Vec<UnitId>,
        /// One entry per absorbed hit
        damaged: Vec<UnitId>,
    },

    CasualtiesRemoved {
        battle: BattleId,
        player: PlayerId,
        units: Vec<UnitId>,
    },

    UnitsSubmerged {
        battle: BattleId,
        player: PlayerId,
        units: Vec<UnitId>,
    },

    Retreated {
        battle: BattleId,
        player: PlayerId,
        to: TerritoryId,
        units: Vec<UnitId>,
    },

    TerritoryConquered {
        battle: BattleId,
        territory: TerritoryId,
        /// Previous owner (None if unowned)
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<PlayerId>,
        to: PlayerId,
        capital: bool,
    },

    ProductionDamaged {
        battle: BattleId,
        territory: TerritoryId,
        damage: u32,
        capacity_before: u32,
        capacity_after: u32,
    },

    BattleEnded {
        battle: BattleId,
        territory: TerritoryId,
        result: BattleResult,
        winner: Winner,
        rounds: u32,
    },
}

/// Observer that writes combat events as JSON Lines.
///
/// # Example
///
/// ```ignore
/// // Write to stdout
/// let observer = EventLogObserver::stdout();
///
/// // Write to file
/// let observer = EventLogObserver::file("combat.jsonl")?;
/// ```
pub struct EventLogObserver {
    /// Destination for JSONL output
    writer: Mutex<Box<dyn Write + Send>>,
}

impl EventLogObserver {
    /// Create observer writing to stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(BufWriter::new(std::io::stdout())))
    }

    /// Create observer writing to a file.
    pub fn file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    /// Create observer with a custom writer.
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl BattleObserver for EventLogObserver {
    fn on_event(&self, event: &BattleEvent) -> Result<(), ObserverError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| ObserverError::Poisoned("EventLogObserver writer"))?;
        serde_json::to_writer(&mut *writer, event)?;
        writeln!(writer)?;
        // Keep the file readable after each battle.
        if matches!(event, BattleEvent::BattleEnded { .. }) {
            writer.flush()?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "EventLogObserver"
    }

    fn on_shutdown(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}
