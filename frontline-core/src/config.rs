use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected battle configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("dice_sides must be in 1..=254, got {0}")]
    DiceSides(u32),
    #[error("heavy_bomber_dice must be at least 1")]
    HeavyBomberDice,
    #[error("max_rounds must be at least 1 when set")]
    MaxRounds,
}

/// Battle rule configuration.
///
/// Every rule toggle the engine honors lives here and is passed explicitly
/// through [`BattleContext`](crate::battle::BattleContext). Scenario files may
/// omit any field; missing fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleConfig {
    /// Sides of the standard combat die.
    pub dice_sides: u32,
    /// Deterministic hits for all combat fire.
    pub low_luck: bool,
    /// Deterministic hits for anti-air fire only.
    pub low_luck_aa_only: bool,
    /// Reduced-variance bombing damage.
    pub low_luck_damage: bool,
    /// Subs may submerge when the opponent has no destroyer.
    pub subs_can_submerge: bool,
    /// Several non-lethal hits may land on one multi-hit-point unit per selection.
    pub allow_multiple_hits_per_unit: bool,
    /// Dice rolled by a heavy bomber on offense.
    pub heavy_bomber_dice: u32,
    /// Heavy bombers keep their best die and mark the rest ignored.
    pub choose_best_roll: bool,
    /// Per-bomber raid damage may not exceed the territory's production.
    pub limit_damage_to_production: bool,
    /// Anti-air strength bonus granted by radar tech.
    pub radar_bonus: i32,
    /// Optional round cap; hitting it ends the battle in a stalemate.
    pub max_rounds: Option<u32>,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            dice_sides: 6,
            low_luck: false,
            low_luck_aa_only: false,
            low_luck_damage: false,
            subs_can_submerge: true,
            allow_multiple_hits_per_unit: false,
            heavy_bomber_dice: 2,
            choose_best_roll: true,
            limit_damage_to_production: true,
            radar_bonus: 1,
            max_rounds: None,
        }
    }
}

impl BattleConfig {
    /// Low-luck configuration with everything else at defaults.
    pub fn low_luck() -> Self {
        Self {
            low_luck: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Die values are carried as u8 with 0xFF reserved.
        if self.dice_sides == 0 || self.dice_sides > 254 {
            return Err(ConfigError::DiceSides(self.dice_sides));
        }
        if self.heavy_bomber_dice == 0 {
            return Err(ConfigError::HeavyBomberDice);
        }
        if self.max_rounds == Some(0) {
            return Err(ConfigError::MaxRounds);
        }
        Ok(())
    }

    /// Whether anti-air fire uses low luck.
    pub fn aa_low_luck(&self) -> bool {
        self.low_luck || self.low_luck_aa_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BattleConfig::default();
        assert_eq!(config.dice_sides, 6);
        assert!(!config.low_luck);
        assert!(config.subs_can_submerge);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BattleConfig = serde_json::from_str(r#"{"low_luck": true}"#).unwrap();
        assert!(config.low_luck);
        assert!(config.aa_low_luck());
        assert_eq!(config.heavy_bomber_dice, 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_sides = BattleConfig {
            dice_sides: 0,
            ..Default::default()
        };
        assert_eq!(bad_sides.validate(), Err(ConfigError::DiceSides(0)));

        let bad_rounds = BattleConfig {
            max_rounds: Some(0),
            ..Default::default()
        };
        assert_eq!(bad_rounds.validate(), Err(ConfigError::MaxRounds));
    }
}
