use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

impl Position {
    pub const ALL: [Position; 4] = [
        Position::Goalkeeper,
        Position::Defender,
        Position::Midfielder,
        Position::Forward,
    ];

    /// Parses warehouse position labels. Accepts English and Spanish group
    /// names as well as two-letter codes.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim().to_lowercase();
        if s.is_empty() {
            return None;
        }
        if s == "gk" || s.contains("goalkeeper") || s.contains("keeper") || s.contains("arquero")
        {
            return Some(Position::Goalkeeper);
        }
        // Midfield first: "Defensive Midfielder" also contains "defens".
        if s == "mf" || s.contains("midfield") || s.contains("mediocampista") {
            return Some(Position::Midfielder);
        }
        if s == "df" || s.contains("defender") || s.contains("defens") || s.contains("back") {
            return Some(Position::Defender);
        }
        if s == "fw"
            || s.contains("forward")
            || s.contains("attacker")
            || s.contains("striker")
            || s.contains("wing")
            || s.contains("delantero")
        {
            return Some(Position::Forward);
        }
        None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Position::Goalkeeper => "goalkeeper",
            Position::Defender => "defender",
            Position::Midfielder => "midfielder",
            Position::Forward => "forward",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Goals,
    Assists,
    Xg,
    Xa,
    ShotsOnTarget,
    KeyPasses,
    ProgressivePasses,
    Dribbles,
    Recoveries,
    Interceptions,
    Tackles,
    AerialsWon,
    Clearances,
    Saves,
    Claims,
    SweeperActions,
    Rating,
}

impl Stat {
    pub const COUNT: usize = 17;

    pub const ALL: [Stat; Stat::COUNT] = [
        Stat::Goals,
        Stat::Assists,
        Stat::Xg,
        Stat::Xa,
        Stat::ShotsOnTarget,
        Stat::KeyPasses,
        Stat::ProgressivePasses,
        Stat::Dribbles,
        Stat::Recoveries,
        Stat::Interceptions,
        Stat::Tackles,
        Stat::AerialsWon,
        Stat::Clearances,
        Stat::Saves,
        Stat::Claims,
        Stat::SweeperActions,
        Stat::Rating,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stat::Goals => "goals",
            Stat::Assists => "assists",
            Stat::Xg => "xg",
            Stat::Xa => "xa",
            Stat::ShotsOnTarget => "shots_on_target",
            Stat::KeyPasses => "key_passes",
            Stat::ProgressivePasses => "progressive_passes",
            Stat::Dribbles => "dribbles",
            Stat::Recoveries => "recoveries",
            Stat::Interceptions => "interceptions",
            Stat::Tackles => "tackles",
            Stat::AerialsWon => "aerials_won",
            Stat::Clearances => "clearances",
            Stat::Saves => "saves",
            Stat::Claims => "claims",
            Stat::SweeperActions => "sweeper_actions",
            Stat::Rating => "rating",
        }
    }

    /// Warehouse column holding the per-90 value.
    pub fn column(self) -> &'static str {
        match self {
            Stat::Goals => "goals_p90",
            Stat::Assists => "assists_p90",
            Stat::Xg => "xg_p90",
            Stat::Xa => "xa_p90",
            Stat::ShotsOnTarget => "shots_on_target_p90",
            Stat::KeyPasses => "key_passes_p90",
            Stat::ProgressivePasses => "prog_passes_p90",
            Stat::Dribbles => "dribbles_p90",
            Stat::Recoveries => "recoveries_p90",
            Stat::Interceptions => "interceptions_p90",
            Stat::Tackles => "tackles_p90",
            Stat::AerialsWon => "aerial_won_p90",
            Stat::Clearances => "clearances_p90",
            Stat::Saves => "saves_p90",
            Stat::Claims => "claims_p90",
            Stat::SweeperActions => "sweeper_p90",
            Stat::Rating => "rating",
        }
    }

    /// Warehouse column holding the within-(season, position) percentile rank.
    pub fn percentile_column(self) -> &'static str {
        match self {
            Stat::Goals => "pct_goals",
            Stat::Assists => "pct_assists",
            Stat::Xg => "pct_xg",
            Stat::Xa => "pct_xa",
            Stat::ShotsOnTarget => "pct_shots_on_target",
            Stat::KeyPasses => "pct_key_passes",
            Stat::ProgressivePasses => "pct_prog_passes",
            Stat::Dribbles => "pct_dribbles",
            Stat::Recoveries => "pct_recoveries",
            Stat::Interceptions => "pct_interceptions",
            Stat::Tackles => "pct_tackles",
            Stat::AerialsWon => "pct_aerial_won",
            Stat::Clearances => "pct_clearances",
            Stat::Saves => "pct_saves",
            Stat::Claims => "pct_claims",
            Stat::SweeperActions => "pct_sweeper",
            Stat::Rating => "pct_rating",
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A model input column drawn from a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Stat(Stat),
    Percentile(Stat),
    Age,
    Minutes,
    Matches,
}

impl Feature {
    pub fn name(self) -> String {
        match self {
            Feature::Stat(stat) => stat.name().to_string(),
            Feature::Percentile(stat) => format!("pct_{}", stat.name()),
            Feature::Age => "age".to_string(),
            Feature::Minutes => "minutes_played".to_string(),
            Feature::Matches => "matches_played".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSeasonProfile {
    pub player_id: String,
    pub name: String,
    pub season: i32,
    pub position: Position,
    pub team: String,
    pub age: Option<f64>,
    pub market_value: Option<f64>,
    pub minutes_played: f64,
    pub matches_played: u32,
    pub stats: [Option<f64>; Stat::COUNT],
    pub percentiles: [Option<f64>; Stat::COUNT],
}

impl PlayerSeasonProfile {
    pub fn new(player_id: impl Into<String>, season: i32, position: Position) -> Self {
        Self {
            player_id: player_id.into(),
            name: String::new(),
            season,
            position,
            team: String::new(),
            age: None,
            market_value: None,
            minutes_played: 0.0,
            matches_played: 0,
            stats: [None; Stat::COUNT],
            percentiles: [None; Stat::COUNT],
        }
    }

    pub fn stat(&self, stat: Stat) -> Option<f64> {
        self.stats[stat.index()]
    }

    pub fn set_stat(&mut self, stat: Stat, value: f64) {
        self.stats[stat.index()] = Some(value);
    }

    pub fn percentile(&self, stat: Stat) -> Option<f64> {
        self.percentiles[stat.index()]
    }

    pub fn set_percentile(&mut self, stat: Stat, value: f64) {
        self.percentiles[stat.index()] = Some(value);
    }

    pub fn rating(&self) -> Option<f64> {
        self.stat(Stat::Rating)
    }

    /// Market value if known and strictly positive.
    pub fn known_value(&self) -> Option<f64> {
        self.market_value.filter(|v| v.is_finite() && *v > 0.0)
    }

    pub fn feature(&self, feature: Feature) -> Option<f64> {
        let value = match feature {
            Feature::Stat(stat) => self.stat(stat),
            Feature::Percentile(stat) => self.percentile(stat),
            Feature::Age => self.age,
            Feature::Minutes => Some(self.minutes_played),
            Feature::Matches => Some(self.matches_played as f64),
        };
        value.filter(|v| v.is_finite())
    }

    pub fn same_player_season(&self, other: &PlayerSeasonProfile) -> bool {
        self.player_id == other.player_id && self.season == other.season
    }
}

/// One row per (player, season). When a player has rows under several
/// positions in a season, the one with the most minutes wins, then the
/// earlier position.
pub fn primary_rows(
    profiles: &[PlayerSeasonProfile],
) -> BTreeMap<(&str, i32), &PlayerSeasonProfile> {
    let mut out: BTreeMap<(&str, i32), &PlayerSeasonProfile> = BTreeMap::new();
    for p in profiles {
        out.entry((p.player_id.as_str(), p.season))
            .and_modify(|cur| {
                let better = p.minutes_played > cur.minutes_played
                    || (p.minutes_played == cur.minutes_played && p.position < cur.position);
                if better {
                    *cur = p;
                }
            })
            .or_insert(p);
    }
    out
}

/// Latest season present in the snapshot.
pub fn latest_season(profiles: &[PlayerSeasonProfile]) -> Option<i32> {
    profiles.iter().map(|p| p.season).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_parse_accepts_spanish_and_codes() {
        assert_eq!(Position::parse("Delantero"), Some(Position::Forward));
        assert_eq!(Position::parse(" Mediocampista "), Some(Position::Midfielder));
        assert_eq!(Position::parse("Defensor"), Some(Position::Defender));
        assert_eq!(Position::parse("Arquero"), Some(Position::Goalkeeper));
        assert_eq!(Position::parse("GK"), Some(Position::Goalkeeper));
        assert_eq!(Position::parse("Centre-Back"), Some(Position::Defender));
        assert_eq!(Position::parse("Left Winger"), Some(Position::Forward));
        assert_eq!(Position::parse("Defensa"), Some(Position::Defender));
        assert_eq!(
            Position::parse("Defensive Midfielder"),
            Some(Position::Midfielder)
        );
        assert_eq!(Position::parse("Defensive Midfield"), Some(Position::Midfielder));
        assert_eq!(Position::parse("Left Wing-Back"), Some(Position::Defender));
        assert_eq!(Position::parse("Manager"), None);
        assert_eq!(Position::parse(""), None);
    }

    #[test]
    fn stat_index_matches_all_order() {
        for (idx, stat) in Stat::ALL.iter().enumerate() {
            assert_eq!(stat.index(), idx);
        }
    }

    #[test]
    fn non_finite_features_read_as_missing() {
        let mut p = PlayerSeasonProfile::new("p1", 2024, Position::Forward);
        p.set_stat(Stat::Xg, f64::NAN);
        p.age = Some(21.0);
        assert_eq!(p.feature(Feature::Stat(Stat::Xg)), None);
        assert_eq!(p.feature(Feature::Age), Some(21.0));
        assert_eq!(p.feature(Feature::Minutes), Some(0.0));
    }

    #[test]
    fn primary_rows_prefers_most_minutes() {
        let mut a = PlayerSeasonProfile::new("p1", 2024, Position::Forward);
        a.minutes_played = 300.0;
        let mut b = PlayerSeasonProfile::new("p1", 2024, Position::Midfielder);
        b.minutes_played = 900.0;
        let c = PlayerSeasonProfile::new("p1", 2023, Position::Forward);
        let rows = [a, b, c];
        let primary = primary_rows(&rows);
        assert_eq!(primary.len(), 2);
        assert_eq!(primary[&("p1", 2024)].position, Position::Midfielder);
    }

    #[test]
    fn known_value_requires_positive() {
        let mut p = PlayerSeasonProfile::new("p1", 2024, Position::Forward);
        assert_eq!(p.known_value(), None);
        p.market_value = Some(0.0);
        assert_eq!(p.known_value(), None);
        p.market_value = Some(5.0e6);
        assert_eq!(p.known_value(), Some(5.0e6));
    }
}
