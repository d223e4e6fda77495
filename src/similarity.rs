use std::cmp::Ordering;

use anyhow::{Result, anyhow};
use serde::Serialize;

use crate::config::{SimilarityConfig, WeightStage};
use crate::features::{FeatureMatrix, StandardScaler, euclidean};
use crate::profile::{Feature, PlayerSeasonProfile, Position};
use crate::weights::{WeightTable, similarity_stats};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityEdge {
    pub origin_player_id: String,
    pub origin_name: String,
    pub origin_season: i32,
    pub target_player_id: String,
    pub target_name: String,
    pub target_season: i32,
    pub position: Position,
    pub rank: u8,
    pub raw_distance: f64,
    pub decay_factor: f64,
    pub score: f64,
    pub target_team: String,
    pub target_age: Option<f64>,
    pub target_market_value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f64,
}

/// Exact Euclidean nearest-neighbour index. Equal distances are ordered by
/// the tie key (player id, then season), so results never depend on
/// iteration order.
#[derive(Debug, Clone)]
pub struct NeighborIndex<'a> {
    points: Vec<Vec<f64>>,
    keys: Vec<(&'a str, i32)>,
}

impl<'a> NeighborIndex<'a> {
    pub fn build(points: Vec<Vec<f64>>, keys: Vec<(&'a str, i32)>) -> Result<Self> {
        if points.len() != keys.len() {
            return Err(anyhow!(
                "neighbor index needs one key per point: points={} keys={}",
                points.len(),
                keys.len()
            ));
        }
        if let Some(row) = points.iter().position(|p| p.iter().any(|v| !v.is_finite())) {
            return Err(anyhow!("non-finite coordinate in neighbor index row {row}"));
        }
        Ok(Self { points, keys })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The `k` points closest to `points[origin]`. The origin itself is
    /// always returned first.
    pub fn query(&self, origin: usize, k: usize) -> Vec<Neighbor> {
        let k = k.min(self.points.len());
        if k == 0 || origin >= self.points.len() {
            return Vec::new();
        }
        let target = &self.points[origin];
        let mut all: Vec<Neighbor> = self
            .points
            .iter()
            .enumerate()
            .map(|(index, p)| Neighbor {
                index,
                distance: if index == origin { 0.0 } else { euclidean(target, p) },
            })
            .collect();

        let cmp = |a: &Neighbor, b: &Neighbor| -> Ordering {
            (b.index == origin)
                .cmp(&(a.index == origin))
                .then(quantise(a.distance).cmp(&quantise(b.distance)))
                .then_with(|| self.keys[a.index].cmp(&self.keys[b.index]))
        };
        if k < all.len() {
            all.select_nth_unstable_by(k - 1, cmp);
            all.truncate(k);
        }
        all.sort_by(cmp);
        all
    }
}

/// Distances and scores are compared at 1e-9 resolution so float noise from
/// scaling cannot override the id tie-break.
fn quantise(v: f64) -> i64 {
    (v * 1e9).round() as i64
}

pub fn decay_factor(lambda: f64, season_gap: i32) -> f64 {
    lambda.powi(season_gap.abs())
}

pub fn decayed_score(distance: f64, decay: f64) -> f64 {
    100.0 / (1.0 + distance) * decay
}

pub fn is_eligible(profile: &PlayerSeasonProfile, cfg: &SimilarityConfig) -> bool {
    if cfg.excluded_positions.contains(&profile.position) {
        return false;
    }
    let rating = profile.rating().unwrap_or(f64::NEG_INFINITY);
    profile.minutes_played > cfg.min_minutes && rating > cfg.min_rating
}

/// Eligible profiles grouped by position, in fixed position order. Groups
/// may be smaller than the configured minimum; callers decide whether to
/// skip them.
pub fn position_groups<'a>(
    profiles: &'a [PlayerSeasonProfile],
    cfg: &SimilarityConfig,
) -> Vec<(Position, Vec<&'a PlayerSeasonProfile>)> {
    Position::ALL
        .iter()
        .filter(|pos| !cfg.excluded_positions.contains(pos))
        .map(|pos| {
            let members = profiles
                .iter()
                .filter(|p| p.position == *pos && is_eligible(p, cfg))
                .collect::<Vec<_>>();
            (*pos, members)
        })
        .collect()
}

/// Weighted, standardised similarity vectors for one position group.
pub fn group_vectors(
    position: Position,
    members: &[&PlayerSeasonProfile],
    cfg: &SimilarityConfig,
    weights: &WeightTable,
) -> Vec<Vec<f64>> {
    let stats = similarity_stats(position);
    let features = stats.iter().map(|s| Feature::Stat(*s)).collect::<Vec<_>>();
    let mut matrix = FeatureMatrix::extract(members, &features);
    matrix.log_substitutions(&format!("similarity/{position}"));

    match cfg.weight_stage {
        WeightStage::BeforeScaling => {
            for row in &mut matrix.rows {
                weights.apply(position, stats, row);
            }
            let scaler = StandardScaler::fit(&matrix.rows);
            scaler.transform(&matrix.rows)
        }
        WeightStage::AfterScaling => {
            let scaler = StandardScaler::fit(&matrix.rows);
            let mut scaled = scaler.transform(&matrix.rows);
            for row in &mut scaled {
                weights.apply(position, stats, row);
            }
            scaled
        }
    }
}

/// Top neighbours for every member of one position group. Returns no edges
/// for groups below `min_group_size`.
pub fn edges_for_group(
    position: Position,
    members: &[&PlayerSeasonProfile],
    cfg: &SimilarityConfig,
    weights: &WeightTable,
) -> Result<Vec<SimilarityEdge>> {
    if members.len() < cfg.min_group_size {
        return Ok(Vec::new());
    }
    if let Some(bad) = members.iter().find(|p| p.position != position) {
        return Err(anyhow!(
            "profile {}/{} is {} but was grouped under {position}",
            bad.player_id,
            bad.season,
            bad.position
        ));
    }

    let vectors = group_vectors(position, members, cfg, weights);
    let keys = members
        .iter()
        .map(|p| (p.player_id.as_str(), p.season))
        .collect::<Vec<_>>();
    let index = NeighborIndex::build(vectors, keys)?;
    let k = cfg.search_k.min(index.len());

    let mut edges = Vec::with_capacity(members.len() * cfg.neighbors);
    for (i, origin) in members.iter().enumerate() {
        let hits = index.query(i, k);
        let mut scored = hits
            .iter()
            .skip(1)
            .filter(|n| !members[n.index].same_player_season(origin))
            .take(cfg.neighbors)
            .map(|n| {
                let target = members[n.index];
                let decay = decay_factor(cfg.decay_lambda, origin.season - target.season);
                (target, n.distance, decay, decayed_score(n.distance, decay))
            })
            .collect::<Vec<_>>();

        scored.sort_by(|a, b| {
            quantise(b.3)
                .cmp(&quantise(a.3))
                .then(quantise(a.1).cmp(&quantise(b.1)))
                .then_with(|| a.0.player_id.cmp(&b.0.player_id))
                .then(a.0.season.cmp(&b.0.season))
        });

        for (rank, (target, distance, decay, score)) in scored.into_iter().enumerate() {
            edges.push(SimilarityEdge {
                origin_player_id: origin.player_id.clone(),
                origin_name: origin.name.clone(),
                origin_season: origin.season,
                target_player_id: target.player_id.clone(),
                target_name: target.name.clone(),
                target_season: target.season,
                position,
                rank: (rank + 1) as u8,
                raw_distance: distance,
                decay_factor: decay,
                score,
                target_team: target.team.clone(),
                target_age: target.age,
                target_market_value: target.market_value,
            });
        }
    }

    tracing::info!(
        %position,
        players = members.len(),
        edges = edges.len(),
        "similarity group done"
    );
    Ok(edges)
}
