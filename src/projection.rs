use anyhow::{Context, Result, anyhow};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::boosting::{GradientBoostedRegressor, r2_score};
use crate::config::ProjectionConfig;
use crate::features::{FeatureMatrix, StandardScaler};
use crate::profile::{Feature, PlayerSeasonProfile, Position, Stat, latest_season, primary_rows};

/// Inputs to the value-change model, in column order.
pub const VALUE_FEATURES: [Feature; 17] = [
    Feature::Age,
    Feature::Stat(Stat::Rating),
    Feature::Stat(Stat::Xg),
    Feature::Stat(Stat::Xa),
    Feature::Stat(Stat::Goals),
    Feature::Stat(Stat::Assists),
    Feature::Stat(Stat::ProgressivePasses),
    Feature::Stat(Stat::KeyPasses),
    Feature::Stat(Stat::Dribbles),
    Feature::Stat(Stat::Recoveries),
    Feature::Stat(Stat::Tackles),
    Feature::Minutes,
    Feature::Matches,
    Feature::Percentile(Stat::Rating),
    Feature::Percentile(Stat::Xg),
    Feature::Percentile(Stat::Xa),
    Feature::Percentile(Stat::ProgressivePasses),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueProjection {
    pub player_id: String,
    pub name: String,
    pub season: i32,
    pub position: Position,
    pub team: String,
    pub age: f64,
    pub current_value: f64,
    pub projected_value: f64,
    pub projected_delta_pct: f64,
}

/// One season-to-season example: features from `from`, target is the
/// percent value change into `to`.
#[derive(Debug, Clone, Copy)]
pub struct Transition<'a> {
    pub from: &'a PlayerSeasonProfile,
    pub to: &'a PlayerSeasonProfile,
    pub delta_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectionReport {
    pub transitions: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub train_r2: f64,
    pub test_r2: f64,
    pub inference_season: Option<i32>,
    pub projected: usize,
}

#[derive(Debug, Clone)]
pub struct ProjectionModel {
    pub scaler: StandardScaler,
    pub regressor: GradientBoostedRegressor,
}

impl ProjectionModel {
    pub fn predict_delta(&self, profile: &PlayerSeasonProfile) -> f64 {
        let matrix = FeatureMatrix::extract(&[profile], &VALUE_FEATURES);
        let row = self.scaler.transform_row(&matrix.rows[0]);
        self.regressor.predict_row(&row)
    }
}

pub fn is_projection_eligible(profile: &PlayerSeasonProfile, cfg: &ProjectionConfig) -> bool {
    let age_ok = profile
        .age
        .is_some_and(|a| a.is_finite() && a <= cfg.age_ceiling);
    age_ok
        && profile.minutes_played >= cfg.inference_min_minutes
        && profile.known_value().is_some()
}

pub fn build_transitions<'a>(
    profiles: &'a [PlayerSeasonProfile],
    cfg: &ProjectionConfig,
) -> Vec<Transition<'a>> {
    let rows = primary_rows(profiles);
    let usable = |p: &PlayerSeasonProfile| {
        p.known_value().is_some() && p.minutes_played >= cfg.train_min_minutes
    };

    let mut out = Vec::new();
    for (&(player_id, season), &from) in &rows {
        let Some(&to) = rows.get(&(player_id, season + 1)) else {
            continue;
        };
        if !usable(from) || !usable(to) {
            continue;
        }
        let (Some(v0), Some(v1)) = (from.known_value(), to.known_value()) else {
            continue;
        };
        let young_enough = from
            .age
            .is_some_and(|a| a.is_finite() && a <= cfg.age_ceiling);
        if !young_enough || v0 < cfg.train_min_value {
            continue;
        }
        out.push(Transition {
            from,
            to,
            delta_pct: (v1 - v0) / v0 * 100.0,
        });
    }
    out
}

/// Seeded shuffle split. The first `ceil(n * test_fraction)` shuffled
/// indices form the test side.
pub fn split_indices(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut idx = (0..n).collect::<Vec<_>>();
    let mut rng = StdRng::seed_from_u64(seed);
    idx.shuffle(&mut rng);
    let n_test = ((n as f64) * test_fraction).ceil() as usize;
    let train = idx.split_off(n_test.min(n));
    (train, idx)
}

pub fn train(
    profiles: &[PlayerSeasonProfile],
    cfg: &ProjectionConfig,
) -> Result<(ProjectionModel, ProjectionReport)> {
    let transitions = build_transitions(profiles, cfg);
    let n = transitions.len();
    if n < cfg.min_training_examples {
        return Err(anyhow!(
            "only {n} season transitions available, need at least {}",
            cfg.min_training_examples
        ));
    }

    let (train_idx, test_idx) = split_indices(n, cfg.test_fraction, cfg.seed);
    if train_idx.is_empty() || test_idx.is_empty() {
        return Err(anyhow!(
            "degenerate split: train={} test={}",
            train_idx.len(),
            test_idx.len()
        ));
    }

    let sources = transitions.iter().map(|t| t.from).collect::<Vec<_>>();
    let matrix = FeatureMatrix::extract(&sources, &VALUE_FEATURES);
    matrix.log_substitutions("projection/train");
    let targets = transitions.iter().map(|t| t.delta_pct).collect::<Vec<_>>();

    let pick = |ids: &[usize]| -> (Vec<Vec<f64>>, Vec<f64>) {
        ids.iter()
            .map(|&i| (matrix.rows[i].clone(), targets[i]))
            .unzip()
    };
    let (x_train_raw, y_train) = pick(&train_idx);
    let (x_test_raw, y_test) = pick(&test_idx);

    let scaler = StandardScaler::fit(&x_train_raw);
    let x_train = scaler.transform(&x_train_raw);
    let x_test = scaler.transform(&x_test_raw);

    let regressor = GradientBoostedRegressor::fit(&x_train, &y_train, &cfg.boosting)
        .context("fit value-change model")?;
    let train_r2 = r2_score(&y_train, &regressor.predict(&x_train));
    let test_r2 = r2_score(&y_test, &regressor.predict(&x_test));
    tracing::info!(
        transitions = n,
        train = y_train.len(),
        test = y_test.len(),
        train_r2,
        test_r2,
        "value model trained"
    );

    let report = ProjectionReport {
        transitions: n,
        train_rows: y_train.len(),
        test_rows: y_test.len(),
        train_r2,
        test_r2,
        ..ProjectionReport::default()
    };
    Ok((ProjectionModel { scaler, regressor }, report))
}

/// Trains the model and projects every eligible player-season of the
/// latest season, ordered by player id.
pub fn project_values(
    profiles: &[PlayerSeasonProfile],
    cfg: &ProjectionConfig,
) -> Result<(Vec<ValueProjection>, ProjectionReport)> {
    let (model, mut report) = train(profiles, cfg)?;
    let Some(season) = latest_season(profiles) else {
        return Ok((Vec::new(), report));
    };

    let mut projections = Vec::new();
    for (&(_, row_season), &p) in &primary_rows(profiles) {
        if row_season != season || !is_projection_eligible(p, cfg) {
            continue;
        }
        let (Some(age), Some(current)) = (p.age, p.known_value()) else {
            continue;
        };
        let delta = model.predict_delta(p);
        projections.push(ValueProjection {
            player_id: p.player_id.clone(),
            name: p.name.clone(),
            season,
            position: p.position,
            team: p.team.clone(),
            age,
            current_value: current,
            projected_value: current * (1.0 + delta / 100.0),
            projected_delta_pct: delta,
        });
    }

    report.inference_season = Some(season);
    report.projected = projections.len();
    tracing::info!(season, projected = projections.len(), "value projections scored");
    Ok((projections, report))
}
