use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::config::ArchetypeConfig;
use crate::features::{FeatureMatrix, StandardScaler};
use crate::kmeans::{self, KMeansParams};
use crate::profile::{Feature, PlayerSeasonProfile, Position, Stat, latest_season, primary_rows};

/// Clustering inputs, in column order.
pub const CLUSTER_FEATURES: [Stat; 14] = [
    Stat::Xg,
    Stat::Xa,
    Stat::Goals,
    Stat::Assists,
    Stat::ShotsOnTarget,
    Stat::KeyPasses,
    Stat::Dribbles,
    Stat::ProgressivePasses,
    Stat::Recoveries,
    Stat::Tackles,
    Stat::Interceptions,
    Stat::AerialsWon,
    Stat::Clearances,
    Stat::Rating,
];

const OFFENSE_STATS: [Stat; 6] = [
    Stat::Xg,
    Stat::Xa,
    Stat::Goals,
    Stat::Assists,
    Stat::ShotsOnTarget,
    Stat::Dribbles,
];
const CREATION_STATS: [Stat; 2] = [Stat::ProgressivePasses, Stat::KeyPasses];
const DEFENSE_STATS: [Stat; 5] = [
    Stat::Recoveries,
    Stat::Tackles,
    Stat::Interceptions,
    Stat::AerialsWon,
    Stat::Clearances,
];

/// Raw (unscaled) centroid of one cluster, keyed by stat.
#[derive(Debug, Clone, PartialEq)]
pub struct Centroid {
    values: Vec<(Stat, f64)>,
}

impl Centroid {
    pub fn new(values: Vec<(Stat, f64)>) -> Self {
        Self { values }
    }

    pub fn get(&self, stat: Stat) -> f64 {
        self.values
            .iter()
            .find(|(s, _)| *s == stat)
            .map(|(_, v)| *v)
            .unwrap_or(0.0)
    }

    fn mean_of(&self, stats: &[Stat]) -> f64 {
        stats.iter().map(|s| self.get(*s)).sum::<f64>() / stats.len() as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StyleScores {
    pub offense: f64,
    pub creation: f64,
    pub defense: f64,
    pub offense_share: f64,
    pub creation_share: f64,
    pub defense_share: f64,
}

impl StyleScores {
    pub fn from_centroid(centroid: &Centroid) -> Self {
        let offense = centroid.mean_of(&OFFENSE_STATS);
        let creation = centroid.mean_of(&CREATION_STATS);
        let defense = centroid.mean_of(&DEFENSE_STATS);
        let total = offense + creation + defense;
        let share = |v: f64| if total > 0.0 { v / total } else { 0.0 };
        Self {
            offense,
            creation,
            defense,
            offense_share: share(offense),
            creation_share: share(creation),
            defense_share: share(defense),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    OffenseScore,
    CreationScore,
    DefenseScore,
    OffenseShare,
    CreationShare,
    DefenseShare,
    Stat(Stat),
}

impl Metric {
    fn read(self, scores: &StyleScores, centroid: &Centroid) -> f64 {
        match self {
            Metric::OffenseScore => scores.offense,
            Metric::CreationScore => scores.creation,
            Metric::DefenseScore => scores.defense,
            Metric::OffenseShare => scores.offense_share,
            Metric::CreationShare => scores.creation_share,
            Metric::DefenseShare => scores.defense_share,
            Metric::Stat(stat) => centroid.get(stat),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub metric: Metric,
    pub op: Comparison,
    pub value: f64,
}

impl Condition {
    fn new(metric: Metric, op: Comparison, value: f64) -> Self {
        Self { metric, op, value }
    }

    fn holds(&self, scores: &StyleScores, centroid: &Centroid) -> bool {
        let v = self.metric.read(scores, centroid);
        match self.op {
            Comparison::Gt => v > self.value,
            Comparison::Ge => v >= self.value,
            Comparison::Lt => v < self.value,
            Comparison::Le => v <= self.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeRule {
    pub label: String,
    /// Empty means every position.
    #[serde(default)]
    pub positions: Vec<Position>,
    pub conditions: Vec<Condition>,
}

/// Ordered labelling rules; the first rule whose positions and conditions
/// all match names the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeRuleBook {
    pub version: u32,
    pub rules: Vec<ArchetypeRule>,
    pub fallback: String,
}

impl Default for ArchetypeRuleBook {
    fn default() -> Self {
        use Comparison::{Gt, Lt};
        use Metric::{CreationScore, DefenseShare, OffenseShare};
        use Position::{Defender, Forward, Midfielder};

        let attacking = || Condition::new(OffenseShare, Gt, 0.45);
        let balanced = || {
            vec![
                Condition::new(OffenseShare, Gt, 0.25),
                Condition::new(OffenseShare, Lt, 0.45),
                Condition::new(DefenseShare, Lt, 0.40),
            ]
        };
        let stat = |s: Stat, v: f64| Condition::new(Metric::Stat(s), Gt, v);
        let rule = |label: &str, positions: &[Position], conditions: Vec<Condition>| ArchetypeRule {
            label: label.to_string(),
            positions: positions.to_vec(),
            conditions,
        };
        let with = |mut base: Vec<Condition>, extra: Condition| {
            base.push(extra);
            base
        };

        Self {
            version: 1,
            rules: vec![
                rule(
                    "Prolific Finisher",
                    &[Forward, Midfielder],
                    vec![attacking(), stat(Stat::Xg, 0.5)],
                ),
                rule(
                    "Dribbling Winger",
                    &[Forward, Midfielder],
                    vec![attacking(), stat(Stat::Dribbles, 2.0)],
                ),
                rule("Complete Forward", &[Forward, Midfielder], vec![attacking()]),
                rule(
                    "Creative Playmaker",
                    &[Midfielder, Forward],
                    with(balanced(), stat(Stat::Xa, 0.25)),
                ),
                rule(
                    "Deep-Lying Playmaker",
                    &[Midfielder, Defender],
                    with(balanced(), stat(Stat::ProgressivePasses, 5.0)),
                ),
                rule("Box-to-Box Midfielder", &[Midfielder], balanced()),
                rule(
                    "Pressing Forward",
                    &[Forward],
                    vec![Condition::new(DefenseShare, Gt, 0.40)],
                ),
                rule(
                    "Ball-Playing Anchor",
                    &[Midfielder, Defender],
                    vec![
                        Condition::new(DefenseShare, Gt, 0.40),
                        Condition::new(CreationScore, Gt, 2.0),
                    ],
                ),
                rule(
                    "Aerial Specialist",
                    &[Defender, Midfielder],
                    vec![
                        Condition::new(DefenseShare, Gt, 0.50),
                        stat(Stat::AerialsWon, 2.5),
                    ],
                ),
                rule(
                    "Aggressive Marker",
                    &[Defender, Midfielder],
                    vec![
                        Condition::new(DefenseShare, Gt, 0.50),
                        stat(Stat::Tackles, 2.5),
                    ],
                ),
                rule(
                    "Reliable Defender",
                    &[Defender],
                    vec![Condition::new(DefenseShare, Gt, 0.50)],
                ),
            ],
            fallback: "Balanced Player".to_string(),
        }
    }
}

impl ArchetypeRuleBook {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read archetype rules {}", path.display()))?;
        let book = serde_json::from_str::<ArchetypeRuleBook>(&raw)
            .with_context(|| format!("parse archetype rules {}", path.display()))?;
        book.validate()?;
        Ok(book)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fallback.trim().is_empty() {
            return Err(anyhow!("archetype rule book needs a fallback label"));
        }
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.label.trim().is_empty() {
                return Err(anyhow!("archetype rule {i} has an empty label"));
            }
            if let Some(c) = rule.conditions.iter().find(|c| !c.value.is_finite()) {
                return Err(anyhow!(
                    "archetype rule '{}' has a non-finite threshold {}",
                    rule.label,
                    c.value
                ));
            }
        }
        Ok(())
    }

    pub fn label(&self, position: Position, scores: &StyleScores, centroid: &Centroid) -> &str {
        self.rules
            .iter()
            .find(|r| {
                (r.positions.is_empty() || r.positions.contains(&position))
                    && r.conditions.iter().all(|c| c.holds(scores, centroid))
            })
            .map(|r| r.label.as_str())
            .unwrap_or(&self.fallback)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Archetype {
    pub cluster_id: usize,
    pub position: Position,
    pub local_id: usize,
    pub label: String,
    pub members: usize,
    #[serde(flatten)]
    pub scores: StyleScores,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchetypeAssignment {
    pub player_id: String,
    pub name: String,
    pub season: i32,
    pub position: Position,
    pub team: String,
    pub cluster_id: usize,
    pub label: String,
    pub rating: Option<f64>,
    pub market_value: Option<f64>,
}

/// Clustering result for one position. Ids are local until
/// [`assign_global_ids`] offsets them.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupClusters {
    pub position: Position,
    pub k: usize,
    pub inertia: f64,
    pub archetypes: Vec<Archetype>,
    pub assignments: Vec<ArchetypeAssignment>,
}

pub fn is_cluster_eligible(profile: &PlayerSeasonProfile, cfg: &ArchetypeConfig) -> bool {
    !cfg.excluded_positions.contains(&profile.position)
        && profile.minutes_played >= cfg.min_minutes
        && profile.rating().is_some_and(|r| r >= cfg.min_rating)
}

/// Eligible latest-season profiles grouped by position, one row per
/// player-season.
pub fn archetype_groups<'a>(
    profiles: &'a [PlayerSeasonProfile],
    cfg: &ArchetypeConfig,
) -> Vec<(Position, Vec<&'a PlayerSeasonProfile>)> {
    let Some(season) = latest_season(profiles) else {
        return Vec::new();
    };
    let rows = primary_rows(profiles)
        .into_values()
        .filter(|p| p.season == season && is_cluster_eligible(p, cfg))
        .collect::<Vec<_>>();

    Position::ALL
        .iter()
        .filter(|pos| !cfg.excluded_positions.contains(pos))
        .map(|pos| {
            let members = rows
                .iter()
                .copied()
                .filter(|p| p.position == *pos)
                .collect::<Vec<_>>();
            (*pos, members)
        })
        .collect()
}

pub fn cluster_group(
    position: Position,
    members: &[&PlayerSeasonProfile],
    cfg: &ArchetypeConfig,
    rules: &ArchetypeRuleBook,
) -> Result<GroupClusters> {
    if members.len() < cfg.min_group_size {
        return Err(anyhow!(
            "{position} group has {} players, need {}",
            members.len(),
            cfg.min_group_size
        ));
    }
    let features = CLUSTER_FEATURES
        .iter()
        .map(|s| Feature::Stat(*s))
        .collect::<Vec<_>>();
    let matrix = FeatureMatrix::extract(members, &features);
    matrix.log_substitutions(&format!("archetypes/{position}"));
    let scaled = StandardScaler::fit(&matrix.rows).transform(&matrix.rows);

    let k = cfg.cluster_count(members.len());
    let fit = kmeans::fit(
        &scaled,
        &KMeansParams {
            k,
            n_init: cfg.n_init,
            max_iter: cfg.max_iter,
            tolerance: cfg.tolerance,
            seed: cfg.seed,
        },
    )
    .with_context(|| format!("cluster {position} group"))?;

    let sizes = fit.cluster_sizes();
    let mut archetypes = Vec::with_capacity(k);
    for (local_id, size) in sizes.iter().enumerate() {
        let mut sums = vec![0.0; CLUSTER_FEATURES.len()];
        for (row, label) in matrix.rows.iter().zip(&fit.labels) {
            if *label == local_id {
                for (s, v) in sums.iter_mut().zip(row) {
                    *s += v;
                }
            }
        }
        let denom = (*size).max(1) as f64;
        let centroid = Centroid::new(
            CLUSTER_FEATURES
                .iter()
                .zip(&sums)
                .map(|(stat, s)| (*stat, s / denom))
                .collect(),
        );
        let scores = StyleScores::from_centroid(&centroid);
        archetypes.push(Archetype {
            cluster_id: local_id,
            position,
            local_id,
            label: rules.label(position, &scores, &centroid).to_string(),
            members: *size,
            scores,
        });
    }

    let assignments = members
        .iter()
        .zip(&fit.labels)
        .map(|(p, &local)| ArchetypeAssignment {
            player_id: p.player_id.clone(),
            name: p.name.clone(),
            season: p.season,
            position,
            team: p.team.clone(),
            cluster_id: local,
            label: archetypes[local].label.clone(),
            rating: p.rating(),
            market_value: p.market_value,
        })
        .collect::<Vec<_>>();

    tracing::info!(
        %position,
        players = members.len(),
        k,
        inertia = fit.inertia,
        "archetype group clustered"
    );
    Ok(GroupClusters {
        position,
        k,
        inertia: fit.inertia,
        archetypes,
        assignments,
    })
}

/// Rewrites local cluster ids into one global range. Groups are taken in
/// position order; each group's ids start where the previous group's `k`
/// ended.
pub fn assign_global_ids(
    mut groups: Vec<GroupClusters>,
) -> (Vec<Archetype>, Vec<ArchetypeAssignment>) {
    groups.sort_by_key(|g| g.position);
    let mut offset = 0;
    let mut archetypes = Vec::new();
    let mut assignments = Vec::new();
    for group in groups {
        for mut a in group.archetypes {
            a.cluster_id = offset + a.local_id;
            archetypes.push(a);
        }
        for mut a in group.assignments {
            a.cluster_id += offset;
            assignments.push(a);
        }
        offset += group.k;
    }
    assignments.sort_by(|a, b| {
        a.player_id
            .cmp(&b.player_id)
            .then(a.season.cmp(&b.season))
            .then(a.position.cmp(&b.position))
    });
    (archetypes, assignments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centroid(values: &[(Stat, f64)]) -> Centroid {
        Centroid::new(values.to_vec())
    }

    #[test]
    fn shares_sum_to_one() {
        let c = centroid(&[(Stat::Xg, 0.6), (Stat::ProgressivePasses, 4.0), (Stat::Tackles, 2.0)]);
        let s = StyleScores::from_centroid(&c);
        assert!((s.offense - 0.1).abs() < 1e-12);
        assert!((s.creation - 2.0).abs() < 1e-12);
        assert!((s.defense - 0.4).abs() < 1e-12);
        let total = s.offense_share + s.creation_share + s.defense_share;
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_centroid_has_zero_shares() {
        let s = StyleScores::from_centroid(&centroid(&[]));
        assert_eq!(s, StyleScores::default());
    }

    #[test]
    fn first_matching_rule_wins() {
        let book = ArchetypeRuleBook::default();
        let scores = StyleScores {
            offense_share: 0.6,
            ..StyleScores::default()
        };
        let finisher = centroid(&[(Stat::Xg, 0.7), (Stat::Dribbles, 3.0)]);
        assert_eq!(book.label(Position::Forward, &scores, &finisher), "Prolific Finisher");
        let winger = centroid(&[(Stat::Xg, 0.2), (Stat::Dribbles, 3.0)]);
        assert_eq!(book.label(Position::Forward, &scores, &winger), "Dribbling Winger");
        // Attacking rules are not scoped to defenders.
        assert_eq!(book.label(Position::Defender, &scores, &finisher), "Balanced Player");
    }

    #[test]
    fn defensive_cascade() {
        let book = ArchetypeRuleBook::default();
        let scores = StyleScores {
            defense_share: 0.55,
            creation: 1.0,
            ..StyleScores::default()
        };
        let aerial = centroid(&[(Stat::AerialsWon, 3.0), (Stat::Tackles, 3.0)]);
        assert_eq!(book.label(Position::Defender, &scores, &aerial), "Aerial Specialist");
        let marker = centroid(&[(Stat::AerialsWon, 1.0), (Stat::Tackles, 3.0)]);
        assert_eq!(book.label(Position::Defender, &scores, &marker), "Aggressive Marker");
        let plain = centroid(&[]);
        assert_eq!(book.label(Position::Defender, &scores, &plain), "Reliable Defender");
        assert_eq!(book.label(Position::Forward, &scores, &plain), "Pressing Forward");
    }

    #[test]
    fn rule_book_parses_stat_metrics() {
        let raw = r#"{
            "version": 3,
            "rules": [
                { "label": "Shot Stopper", "positions": ["goalkeeper"],
                  "conditions": [ { "metric": { "stat": "saves" }, "op": "ge", "value": 3.0 } ] }
            ],
            "fallback": "Keeper"
        }"#;
        let book: ArchetypeRuleBook = serde_json::from_str(raw).expect("rules should parse");
        book.validate().expect("rules should validate");
        let hot = centroid(&[(Stat::Saves, 3.0)]);
        let s = StyleScores::default();
        assert_eq!(book.label(Position::Goalkeeper, &s, &hot), "Shot Stopper");
        assert_eq!(book.label(Position::Goalkeeper, &s, &centroid(&[])), "Keeper");
    }

    #[test]
    fn global_ids_follow_position_order() {
        let group = |position: Position, k: usize| GroupClusters {
            position,
            k,
            inertia: 0.0,
            archetypes: (0..k)
                .map(|local_id| Archetype {
                    cluster_id: local_id,
                    position,
                    local_id,
                    label: "x".into(),
                    members: 1,
                    scores: StyleScores::default(),
                })
                .collect(),
            assignments: Vec::new(),
        };
        let (archetypes, _) = assign_global_ids(vec![
            group(Position::Forward, 3),
            group(Position::Defender, 4),
            group(Position::Midfielder, 5),
        ]);
        let ids = archetypes
            .iter()
            .map(|a| (a.position, a.cluster_id))
            .collect::<Vec<_>>();
        assert_eq!(ids[0], (Position::Defender, 0));
        assert_eq!(ids[4], (Position::Midfielder, 4));
        assert_eq!(ids[9], (Position::Forward, 9));
        assert_eq!(ids.len(), 12);
    }
}
