//! Declarative round construction.
//!
//! Each round the battle summarizes the capabilities present on both sides
//! into a [`RoundProfile`] and [`build_round`] turns that into an ordered list
//! of [`BattleStep`]s. The battle then interprets the list. Nothing here looks
//! at unit type names.

use crate::power::Side;
use serde::{Deserialize, Serialize};

/// Which rule a firing step fires under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireKind {
    /// Ships shelling the coast ahead of an amphibious landing.
    Bombard,
    /// Submarine opening fire.
    Sneak,
    AntiAir,
    Standard,
    /// Air firing apart from the rest because it cannot hit subs.
    Air,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum BattleStep {
    Fire {
        side: Side,
        kind: FireKind,
        /// Leave air units out of a standard volley; they fire in their own step.
        exclude_air: bool,
    },
    /// `side` chooses casualties from the hits its opponent scored under `kind`.
    SelectCasualties { side: Side, kind: FireKind },
    RemoveSneakCasualties { victims: Vec<Side> },
    RemoveAaCasualties,
    RemoveCasualties,
    Submerge { side: Side },
    Withdraw { side: Side },
    RaidDamage,
}

impl BattleStep {
    /// Display name, as shown in the combat log.
    pub fn name(&self, attacker: &str, defender: &str) -> String {
        let player = |side: Side| match side {
            Side::Attacker => attacker,
            Side::Defender => defender,
        };
        match self {
            BattleStep::Fire { side, kind, .. } => match kind {
                FireKind::Bombard => format!("{} naval bombard", player(*side)),
                FireKind::Sneak => format!("{} subs fire", player(*side)),
                FireKind::AntiAir => format!("{} AA fire", player(*side)),
                FireKind::Standard => format!("{} fire", player(*side)),
                FireKind::Air => format!("{} air fire", player(*side)),
            },
            BattleStep::SelectCasualties { side, kind } => match kind {
                FireKind::Bombard => format!("{} select bombardment casualties", player(*side)),
                FireKind::Sneak => format!("{} select sub casualties", player(*side)),
                FireKind::AntiAir => format!("{} select AA casualties", player(*side)),
                FireKind::Standard => format!("{} select casualties", player(*side)),
                FireKind::Air => format!("{} select air casualties", player(*side)),
            },
            BattleStep::RemoveSneakCasualties { .. } => "remove sneak attack casualties".into(),
            BattleStep::RemoveAaCasualties => "remove AA casualties".into(),
            BattleStep::RemoveCasualties => "remove casualties".into(),
            BattleStep::Submerge { side } => format!("{} subs submerge", player(*side)),
            BattleStep::Withdraw { side } => format!("{} withdraw", player(*side)),
            BattleStep::RaidDamage => "raid damage".into(),
        }
    }
}

/// Capabilities present on one side at the start of a round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideProfile {
    pub subs: bool,
    pub destroyer: bool,
    pub air: bool,
    /// Anything that is neither sub nor air.
    pub other: bool,
    /// Anti-air units able to fire this round.
    pub aa: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundProfile {
    pub first_round: bool,
    pub bombard: bool,
    pub attacker: SideProfile,
    pub defender: SideProfile,
    pub subs_can_submerge: bool,
    pub can_withdraw: bool,
}

impl RoundProfile {
    pub fn side(&self, side: Side) -> &SideProfile {
        match side {
            Side::Attacker => &self.attacker,
            Side::Defender => &self.defender,
        }
    }

    /// Whether `side`'s subs get their casualties off the board before the
    /// victim can fire back.
    pub fn is_sneak_victim(&self, victim: Side) -> bool {
        self.side(victim.opponent()).subs && !self.side(victim).destroyer
    }
}

/// Ordered steps for one round of a normal battle.
pub fn build_round(profile: &RoundProfile) -> Vec<BattleStep> {
    let mut steps = Vec::new();

    if profile.first_round && profile.bombard {
        steps.push(BattleStep::Fire {
            side: Side::Attacker,
            kind: FireKind::Bombard,
            exclude_air: false,
        });
        steps.push(BattleStep::SelectCasualties {
            side: Side::Defender,
            kind: FireKind::Bombard,
        });
    }

    for side in [Side::Attacker, Side::Defender] {
        if profile.side(side).subs {
            steps.push(BattleStep::Fire {
                side,
                kind: FireKind::Sneak,
                exclude_air: false,
            });
            steps.push(BattleStep::SelectCasualties {
                side: side.opponent(),
                kind: FireKind::Sneak,
            });
        }
    }
    let victims: Vec<Side> = [Side::Defender, Side::Attacker]
        .into_iter()
        .filter(|v| profile.is_sneak_victim(*v))
        .collect();
    if !victims.is_empty() {
        steps.push(BattleStep::RemoveSneakCasualties { victims });
    }

    if profile.first_round && profile.defender.aa && profile.attacker.air {
        steps.push(BattleStep::Fire {
            side: Side::Defender,
            kind: FireKind::AntiAir,
            exclude_air: false,
        });
        steps.push(BattleStep::SelectCasualties {
            side: Side::Attacker,
            kind: FireKind::AntiAir,
        });
        steps.push(BattleStep::RemoveAaCasualties);
    }

    for side in [Side::Attacker, Side::Defender] {
        let own = profile.side(side);
        let enemy = profile.side(side.opponent());
        let split_air = own.air && !own.destroyer && enemy.subs;
        if own.other || (own.air && !split_air) {
            steps.push(BattleStep::Fire {
                side,
                kind: FireKind::Standard,
                exclude_air: split_air,
            });
            steps.push(BattleStep::SelectCasualties {
                side: side.opponent(),
                kind: FireKind::Standard,
            });
        }
        if split_air {
            steps.push(BattleStep::Fire {
                side,
                kind: FireKind::Air,
                exclude_air: false,
            });
            steps.push(BattleStep::SelectCasualties {
                side: side.opponent(),
                kind: FireKind::Air,
            });
        }
    }

    steps.push(BattleStep::RemoveCasualties);

    if profile.subs_can_submerge {
        for side in [Side::Attacker, Side::Defender] {
            if profile.side(side).subs && !profile.side(side.opponent()).destroyer {
                steps.push(BattleStep::Submerge { side });
            }
        }
    }

    if profile.can_withdraw {
        steps.push(BattleStep::Withdraw {
            side: Side::Attacker,
        });
    }
    steps
}

/// Steps of a strategic bombing raid.
pub fn build_raid(defender_has_aa: bool) -> Vec<BattleStep> {
    let mut steps = Vec::new();
    if defender_has_aa {
        steps.push(BattleStep::Fire {
            side: Side::Defender,
            kind: FireKind::AntiAir,
            exclude_air: false,
        });
        steps.push(BattleStep::SelectCasualties {
            side: Side::Attacker,
            kind: FireKind::AntiAir,
        });
        steps.push(BattleStep::RemoveAaCasualties);
    }
    steps.push(BattleStep::RaidDamage);
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(steps: &[BattleStep]) -> Vec<String> {
        steps.iter().map(|s| s.name("Germans", "British")).collect()
    }

    fn subs_only() -> SideProfile {
        SideProfile {
            subs: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_land_round_one() {
        let profile = RoundProfile {
            first_round: true,
            attacker: SideProfile {
                other: true,
                air: true,
                ..Default::default()
            },
            defender: SideProfile {
                other: true,
                aa: true,
                ..Default::default()
            },
            can_withdraw: true,
            ..Default::default()
        };
        assert_eq!(
            names(&build_round(&profile)),
            vec![
                "British AA fire",
                "Germans select AA casualties",
                "remove AA casualties",
                "Germans fire",
                "British select casualties",
                "British fire",
                "Germans select casualties",
                "remove casualties",
                "Germans withdraw",
            ]
        );
    }

    #[test]
    fn test_aa_only_in_first_round() {
        let profile = RoundProfile {
            first_round: false,
            attacker: SideProfile {
                air: true,
                ..Default::default()
            },
            defender: SideProfile {
                other: true,
                aa: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!names(&build_round(&profile)).contains(&"British AA fire".to_string()));
    }

    #[test]
    fn test_subs_without_destroyers_sneak_attack() {
        let profile = RoundProfile {
            first_round: true,
            attacker: subs_only(),
            defender: subs_only(),
            subs_can_submerge: true,
            ..Default::default()
        };
        let steps = build_round(&profile);
        assert_eq!(
            names(&steps),
            vec![
                "Germans subs fire",
                "British select sub casualties",
                "British subs fire",
                "Germans select sub casualties",
                "remove sneak attack casualties",
                "remove casualties",
                "Germans subs submerge",
                "British subs submerge",
            ]
        );
        assert!(steps.contains(&BattleStep::RemoveSneakCasualties {
            victims: vec![Side::Defender, Side::Attacker]
        }));
    }

    #[test]
    fn test_destroyer_negates_sneak_attack() {
        let profile = RoundProfile {
            first_round: true,
            attacker: subs_only(),
            defender: SideProfile {
                subs: true,
                destroyer: true,
                other: true,
                ..Default::default()
            },
            subs_can_submerge: true,
            ..Default::default()
        };
        let steps = build_round(&profile);
        // Only the attacker is a sneak victim; the defender's sub losses are kept.
        assert!(steps.contains(&BattleStep::RemoveSneakCasualties {
            victims: vec![Side::Attacker]
        }));
        let names = names(&steps);
        assert!(names.contains(&"British fire".to_string()));
        // The attacker cannot submerge in front of a destroyer.
        assert!(!names.contains(&"Germans subs submerge".to_string()));
        assert!(names.contains(&"British subs submerge".to_string()));
    }

    #[test]
    fn test_air_fires_separately_against_subs_without_destroyer() {
        let profile = RoundProfile {
            attacker: SideProfile {
                air: true,
                other: true,
                ..Default::default()
            },
            defender: subs_only(),
            ..Default::default()
        };
        let steps = build_round(&profile);
        assert!(steps.contains(&BattleStep::Fire {
            side: Side::Attacker,
            kind: FireKind::Standard,
            exclude_air: true,
        }));
        assert!(names(&steps).contains(&"Germans air fire".to_string()));
        assert!(names(&steps).contains(&"British select air casualties".to_string()));
    }

    #[test]
    fn test_bombard_opens_first_round() {
        let profile = RoundProfile {
            first_round: true,
            bombard: true,
            attacker: SideProfile {
                other: true,
                ..Default::default()
            },
            defender: SideProfile {
                other: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let names = names(&build_round(&profile));
        assert_eq!(names[0], "Germans naval bombard");
        assert_eq!(names[1], "British select bombardment casualties");
    }

    #[test]
    fn test_raid_steps() {
        assert_eq!(
            names(&build_raid(true)),
            vec![
                "British AA fire",
                "Germans select AA casualties",
                "remove AA casualties",
                "raid damage",
            ]
        );
        assert_eq!(names(&build_raid(false)), vec!["raid damage"]);
    }
}
