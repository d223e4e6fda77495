use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::profile::{Position, Stat};

pub const WEIGHT_TABLE_VERSION: u32 = 2;

/// Features compared by the similarity search for outfield positions.
pub const OUTFIELD_SIMILARITY_STATS: [Stat; 11] = [
    Stat::Xg,
    Stat::Xa,
    Stat::ShotsOnTarget,
    Stat::ProgressivePasses,
    Stat::KeyPasses,
    Stat::Dribbles,
    Stat::Recoveries,
    Stat::Interceptions,
    Stat::Tackles,
    Stat::AerialsWon,
    Stat::Rating,
];

pub const GOALKEEPER_SIMILARITY_STATS: [Stat; 5] = [
    Stat::Saves,
    Stat::Claims,
    Stat::SweeperActions,
    Stat::ProgressivePasses,
    Stat::Rating,
];

pub fn similarity_stats(position: Position) -> &'static [Stat] {
    match position {
        Position::Goalkeeper => &GOALKEEPER_SIMILARITY_STATS,
        _ => &OUTFIELD_SIMILARITY_STATS,
    }
}

/// Position-specific multiplicative weights, keyed position -> stat.
/// Stats without an entry use `default_weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    pub version: u32,
    #[serde(default = "default_weight")]
    pub default_weight: f64,
    #[serde(default)]
    pub positions: BTreeMap<Position, BTreeMap<Stat, f64>>,
}

fn default_weight() -> f64 {
    1.0
}

impl Default for WeightTable {
    fn default() -> Self {
        let forward = [
            (Stat::Xg, 3.0),
            (Stat::Xa, 2.0),
            (Stat::ShotsOnTarget, 2.5),
            (Stat::Dribbles, 2.0),
            (Stat::ProgressivePasses, 1.0),
            (Stat::KeyPasses, 1.5),
            (Stat::Recoveries, 0.5),
            (Stat::Interceptions, 0.3),
            (Stat::Tackles, 0.3),
            (Stat::AerialsWon, 1.2),
            (Stat::Rating, 1.5),
        ];
        let midfielder = [
            (Stat::Xg, 1.5),
            (Stat::Xa, 2.5),
            (Stat::ShotsOnTarget, 1.0),
            (Stat::Dribbles, 2.0),
            (Stat::ProgressivePasses, 3.0),
            (Stat::KeyPasses, 3.0),
            (Stat::Recoveries, 2.5),
            (Stat::Interceptions, 2.0),
            (Stat::Tackles, 2.0),
            (Stat::AerialsWon, 1.0),
            (Stat::Rating, 2.0),
        ];
        let defender = [
            (Stat::Xg, 0.3),
            (Stat::Xa, 0.5),
            (Stat::ShotsOnTarget, 0.3),
            (Stat::Dribbles, 0.8),
            (Stat::ProgressivePasses, 1.5),
            (Stat::KeyPasses, 0.8),
            (Stat::Recoveries, 3.0),
            (Stat::Interceptions, 3.0),
            (Stat::Tackles, 3.0),
            (Stat::AerialsWon, 2.5),
            (Stat::Rating, 2.0),
        ];
        let goalkeeper = [
            (Stat::Saves, 3.0),
            (Stat::Claims, 2.0),
            (Stat::SweeperActions, 1.5),
            (Stat::ProgressivePasses, 1.0),
            (Stat::Rating, 2.0),
        ];

        let mut positions = BTreeMap::new();
        positions.insert(Position::Forward, forward.into_iter().collect());
        positions.insert(Position::Midfielder, midfielder.into_iter().collect());
        positions.insert(Position::Defender, defender.into_iter().collect());
        positions.insert(Position::Goalkeeper, goalkeeper.into_iter().collect());

        Self {
            version: WEIGHT_TABLE_VERSION,
            default_weight: 1.0,
            positions,
        }
    }
}

impl WeightTable {
    /// A table with no position entries; every weight is `default_weight`.
    pub fn uniform() -> Self {
        Self {
            version: WEIGHT_TABLE_VERSION,
            default_weight: 1.0,
            positions: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read weight table {}", path.display()))?;
        let table = serde_json::from_str::<WeightTable>(&raw)
            .with_context(|| format!("parse weight table {}", path.display()))?;
        table.validate()?;
        Ok(table)
    }

    pub fn weight(&self, position: Position, stat: Stat) -> f64 {
        self.positions
            .get(&position)
            .and_then(|m| m.get(&stat))
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// Weight vector aligned with `stats`.
    pub fn vector(&self, position: Position, stats: &[Stat]) -> Vec<f64> {
        stats.iter().map(|s| self.weight(position, *s)).collect()
    }

    /// Multiplies `row` in place; `row[i]` corresponds to `stats[i]`.
    pub fn apply(&self, position: Position, stats: &[Stat], row: &mut [f64]) {
        for (v, stat) in row.iter_mut().zip(stats) {
            *v *= self.weight(position, *stat);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.default_weight.is_finite() || self.default_weight < 0.0 {
            return Err(anyhow!(
                "default weight must be finite and non-negative, got {}",
                self.default_weight
            ));
        }
        for (position, entries) in &self.positions {
            for (stat, w) in entries {
                if !w.is_finite() || *w < 0.0 {
                    return Err(anyhow!(
                        "weight for {position}/{stat} must be finite and non-negative, got {w}"
                    ));
                }
            }
            let all_zero = similarity_stats(*position)
                .iter()
                .all(|s| self.weight(*position, *s) == 0.0);
            if all_zero {
                return Err(anyhow!("every similarity weight for {position} is zero"));
            }
        }
        Ok(())
    }
}
