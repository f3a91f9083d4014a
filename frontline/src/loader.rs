use anyhow::{bail, Context, Result};
use frontline_core::state::{Alliances, TechState, TerrainEffect};
use frontline_core::testing::classic_unit_types;
use frontline_core::{Attack, BattleConfig, FightOrder, GameState, Territory, TerritoryId, UnitType};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Scenario file layout.
#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    config: BattleConfig,
    /// Named unit roster loaded before `unit_types` ("classic").
    #[serde(default)]
    preset: Option<String>,
    #[serde(default)]
    unit_types: Vec<UnitType>,
    #[serde(default)]
    alliances: Vec<Vec<String>>,
    territories: Vec<Territory>,
    #[serde(default)]
    terrain_effects: BTreeMap<String, TerrainEffect>,
    #[serde(default)]
    techs: BTreeMap<String, TechState>,
    attacks: Vec<Attack>,
    /// Territories to fight first.
    #[serde(default)]
    fight_order: Vec<TerritoryId>,
}

pub struct Scenario {
    pub state: GameState,
    pub attacks: Vec<Attack>,
    pub config: BattleConfig,
    pub order: FightOrder,
}

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    log::info!("Loading scenario from {}", path.display());
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario {}", path.display()))?;
    parse_scenario(&text).with_context(|| format!("Invalid scenario {}", path.display()))
}

pub fn parse_scenario(text: &str) -> Result<Scenario> {
    let file: ScenarioFile = serde_json::from_str(text).context("Failed to parse scenario JSON")?;

    let mut state = GameState::default();
    match file.preset.as_deref() {
        Some("classic") => {
            for ut in classic_unit_types() {
                state.unit_types.insert(ut.name.clone(), ut);
            }
        }
        Some(other) => bail!("Unknown unit preset: {}", other),
        None => {}
    }
    for ut in file.unit_types {
        state.unit_types.insert(ut.name.clone(), ut);
    }
    state.alliances = Alliances::new(
        file.alliances
            .into_iter()
            .map(|group| group.into_iter().collect::<BTreeSet<_>>())
            .collect(),
    );
    for territory in file.territories {
        if state.territories.insert(territory.id, territory).is_some() {
            bail!("Duplicate territory id");
        }
    }
    state.terrain_effects.extend(file.terrain_effects);
    state.techs.extend(file.techs);
    state.validate().context("Scenario state is inconsistent")?;
    file.config.validate()?;

    log::info!(
        "Scenario: {} territories, {} unit types, {} attacks",
        state.territories.len(),
        state.unit_types.len(),
        file.attacks.len()
    );
    let order = if file.fight_order.is_empty() {
        FightOrder::Stable
    } else {
        FightOrder::Preferred(file.fight_order)
    };
    Ok(Scenario {
        state,
        attacks: file.attacks,
        config: file.config,
        order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "preset": "classic",
        "alliances": [["Germans"], ["Russians"]],
        "config": {"low_luck": true},
        "territories": [
            {"id": 1, "name": "Karelia", "owner": "Russians",
             "units": [{"id": 1, "unit_type": "armour", "owner": "Germans"}]}
        ],
        "attacks": [{"route": {"start": 1, "steps": []}, "units": [1]}]
    }"#;

    #[test]
    fn test_parse_minimal_scenario() {
        let scenario = parse_scenario(MINIMAL).unwrap();
        assert!(scenario.config.low_luck);
        assert_eq!(scenario.attacks.len(), 1);
        assert_eq!(scenario.order, FightOrder::Stable);
        assert!(!scenario.state.are_allied("Germans", "Russians"));
        assert!(scenario.state.unit_type("armour").is_ok());
    }

    #[test]
    fn test_unknown_unit_type_rejected() {
        let text = MINIMAL.replace("\"armour\"", "\"zeppelin\"");
        let err = parse_scenario(&text).err().unwrap();
        assert!(format!("{:#}", err).contains("zeppelin"));
    }

    #[test]
    fn test_unknown_preset_rejected() {
        let text = MINIMAL.replace("\"classic\"", "\"modern\"");
        assert!(parse_scenario(&text).is_err());
    }
}
