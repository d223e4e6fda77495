use serde::{Deserialize, Serialize};

use crate::profile::{Feature, PlayerSeasonProfile};

/// Dense row-major matrix extracted from profiles. Missing values are
/// written as 0.0 and counted per column.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub missing: Vec<usize>,
}

impl FeatureMatrix {
    pub fn extract(profiles: &[&PlayerSeasonProfile], features: &[Feature]) -> Self {
        let mut missing = vec![0usize; features.len()];
        let rows = profiles
            .iter()
            .map(|p| {
                features
                    .iter()
                    .enumerate()
                    .map(|(col, f)| match p.feature(*f) {
                        Some(v) => v,
                        None => {
                            missing[col] += 1;
                            0.0
                        }
                    })
                    .collect()
            })
            .collect();
        Self {
            names: features.iter().map(|f| f.name()).collect(),
            rows,
            missing,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn substitution_rate(&self, col: usize) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        self.missing.get(col).copied().unwrap_or(0) as f64 / self.rows.len() as f64
    }

    /// Logs how many nulls were replaced with zero, per column.
    pub fn log_substitutions(&self, context: &str) {
        for (col, name) in self.names.iter().enumerate() {
            let count = self.missing[col];
            if count == 0 {
                continue;
            }
            let rate = self.substitution_rate(col);
            if rate >= 0.25 {
                tracing::warn!(
                    context,
                    feature = %name,
                    count,
                    rate,
                    "null feature values defaulted to zero"
                );
            } else {
                tracing::debug!(
                    context,
                    feature = %name,
                    count,
                    rate,
                    "null feature values defaulted to zero"
                );
            }
        }
    }
}

/// Zero-mean, unit-variance column scaling. Population standard deviation;
/// constant columns keep a scale of 1.0 so they map to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut means = vec![0.0; cols];
        let mut stds = vec![1.0; cols];
        if rows.is_empty() {
            return Self { means, stds };
        }
        let n = rows.len() as f64;

        for row in rows {
            for (c, v) in row.iter().enumerate() {
                means[c] += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut var = vec![0.0; cols];
        for row in rows {
            for (c, v) in row.iter().enumerate() {
                let d = v - means[c];
                var[c] += d * d;
            }
        }
        for (c, v) in var.iter().enumerate() {
            let std = (v / n).sqrt();
            stds[c] = if std.is_finite() && std > 1e-12 { std } else { 1.0 };
        }

        Self { means, stds }
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(c, v)| (v - self.means[c]) / self.stds[c])
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    squared_distance(a, b).sqrt()
}

pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
