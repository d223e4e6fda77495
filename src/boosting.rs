use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::config::BoostingParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Least-squares regression tree. Samples with `x[feature] <= threshold`
/// go left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitChoice {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: &'a BoostingParams,
    goes_left: Vec<bool>,
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Fits a tree to `y`. `orders[f]` lists every sample index sorted by
    /// feature `f` ascending.
    fn fit(x: &[Vec<f64>], y: &[f64], orders: &[Vec<usize>], params: &BoostingParams) -> Self {
        let mut builder = TreeBuilder {
            x,
            y,
            params,
            goes_left: vec![false; y.len()],
            nodes: Vec::new(),
        };
        builder.build(orders.to_vec(), 0);
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() { 0 } else { walk(&self.nodes, 0) }
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

impl TreeBuilder<'_> {
    fn build(&mut self, orders: Vec<Vec<usize>>, depth: usize) -> usize {
        let samples = &orders[0];
        let n = samples.len();
        let sum: f64 = samples.iter().map(|&i| self.y[i]).sum();
        let mean = if n == 0 { 0.0 } else { sum / n as f64 };

        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= self.params.max_depth || n < self.params.min_samples_split.max(2) {
            return idx;
        }
        let Some(choice) = self.best_split(&orders, sum) else {
            return idx;
        };

        for &i in samples {
            self.goes_left[i] = self.x[i][choice.feature] <= choice.threshold;
        }
        let mut left_orders = Vec::with_capacity(orders.len());
        let mut right_orders = Vec::with_capacity(orders.len());
        for order in &orders {
            let (l, r): (Vec<usize>, Vec<usize>) =
                order.iter().copied().partition(|&i| self.goes_left[i]);
            left_orders.push(l);
            right_orders.push(r);
        }
        drop(orders);

        let left = self.build(left_orders, depth + 1);
        let right = self.build(right_orders, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: choice.feature,
            threshold: choice.threshold,
            left,
            right,
        };
        idx
    }

    /// Best variance-reduction split over all features. Ties keep the
    /// earliest feature and the lowest threshold.
    fn best_split(&self, orders: &[Vec<usize>], total: f64) -> Option<SplitChoice> {
        let n = orders[0].len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        if n < 2 * min_leaf {
            return None;
        }
        let parent = total * total / n as f64;
        let mut best: Option<SplitChoice> = None;

        for (feature, order) in orders.iter().enumerate() {
            let mut left_sum = 0.0;
            for pos in 0..n - 1 {
                let i = order[pos];
                left_sum += self.y[i];
                let n_left = pos + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let here = self.x[i][feature];
                let next = self.x[order[pos + 1]][feature];
                if next <= here {
                    continue;
                }
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / n_left as f64
                    + right_sum * right_sum / n_right as f64
                    - parent;
                if gain <= 1e-12 || best.as_ref().is_some_and(|b| gain <= b.gain) {
                    continue;
                }
                let mut threshold = here + (next - here) / 2.0;
                if threshold >= next {
                    threshold = here;
                }
                best = Some(SplitChoice {
                    feature,
                    threshold,
                    gain,
                });
            }
        }
        best
    }
}

/// Gradient boosting with squared loss, initialised at the target mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedRegressor {
    pub init: f64,
    pub learning_rate: f64,
    pub n_features: usize,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedRegressor {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &BoostingParams) -> Result<Self> {
        if x.is_empty() {
            return Err(anyhow!("cannot fit boosting model on zero rows"));
        }
        if x.len() != y.len() {
            return Err(anyhow!(
                "feature rows ({}) and targets ({}) differ in length",
                x.len(),
                y.len()
            ));
        }
        let n_features = x[0].len();
        if n_features == 0 {
            return Err(anyhow!("cannot fit boosting model without features"));
        }
        if let Some(row) = x.iter().position(|r| r.len() != n_features) {
            return Err(anyhow!("row {row} has a different feature count"));
        }
        if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
            return Err(anyhow!("training data contains non-finite values"));
        }

        let n = y.len();
        let init = y.iter().sum::<f64>() / n as f64;
        let orders = (0..n_features)
            .map(|f| {
                let mut order = (0..n).collect::<Vec<_>>();
                order.sort_by(|&a, &b| x[a][f].total_cmp(&x[b][f]).then(a.cmp(&b)));
                order
            })
            .collect::<Vec<_>>();

        let mut pred = vec![init; n];
        let mut residuals = vec![0.0; n];
        let mut trees = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators {
            for i in 0..n {
                residuals[i] = y[i] - pred[i];
            }
            let tree = RegressionTree::fit(x, &residuals, &orders, params);
            for i in 0..n {
                pred[i] += params.learning_rate * tree.predict_row(&x[i]);
            }
            trees.push(tree);
        }

        Ok(Self {
            init,
            learning_rate: params.learning_rate,
            n_features,
            trees,
        })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.trees
            .iter()
            .fold(self.init, |acc, t| acc + self.learning_rate * t.predict_row(row))
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.predict_row(r)).collect()
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}

/// Coefficient of determination. A constant target scores 1.0 when matched
/// exactly and 0.0 otherwise.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() || actual.len() != predicted.len() {
        return f64::NAN;
    }
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(n_estimators: usize, max_depth: usize) -> BoostingParams {
        BoostingParams {
            n_estimators,
            learning_rate: 0.1,
            max_depth,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }

    #[test]
    fn single_stump_splits_a_step() {
        let x = (0..10).map(|i| vec![i as f64]).collect::<Vec<_>>();
        let y = (0..10).map(|i| if i < 5 { 0.0 } else { 10.0 }).collect::<Vec<_>>();
        let orders = vec![(0..10).collect::<Vec<_>>()];
        let tree = RegressionTree::fit(&x, &y, &orders, &params(1, 1));
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.predict_row(&[2.0]), 0.0);
        assert_eq!(tree.predict_row(&[4.5]), 0.0);
        assert_eq!(tree.predict_row(&[5.0]), 10.0);
        assert_eq!(tree.predict_row(&[8.0]), 10.0);
    }

    #[test]
    fn boosting_fits_a_nonlinear_target() {
        let x = (0..60)
            .map(|i| vec![i as f64 / 10.0, (i % 7) as f64])
            .collect::<Vec<_>>();
        let y = x.iter().map(|r| r[0] * r[0] + r[1]).collect::<Vec<_>>();
        let model = GradientBoostedRegressor::fit(&x, &y, &params(150, 3)).expect("fit");
        let r2 = r2_score(&y, &model.predict(&x));
        assert!(r2 > 0.95, "train r2 was {r2}");
        assert!(model.trees().iter().all(|t| t.depth() <= 3));
    }

    #[test]
    fn constant_target_predicts_the_mean() {
        let x = (0..8).map(|i| vec![i as f64]).collect::<Vec<_>>();
        let y = vec![3.5; 8];
        let model = GradientBoostedRegressor::fit(&x, &y, &params(5, 2)).expect("fit");
        assert!((model.predict_row(&[100.0]) - 3.5).abs() < 1e-12);
        assert!(model.trees().iter().all(|t| t.leaf_count() == 1));
    }

    #[test]
    fn fit_rejects_bad_inputs() {
        assert!(GradientBoostedRegressor::fit(&[], &[], &params(1, 1)).is_err());
        assert!(GradientBoostedRegressor::fit(&[vec![1.0]], &[1.0, 2.0], &params(1, 1)).is_err());
        assert!(
            GradientBoostedRegressor::fit(&[vec![f64::NAN]], &[1.0], &params(1, 1)).is_err()
        );
    }

    #[test]
    fn min_samples_leaf_is_respected() {
        let x = (0..6).map(|i| vec![i as f64]).collect::<Vec<_>>();
        let y = vec![0.0, 0.0, 0.0, 0.0, 0.0, 50.0];
        let mut p = params(1, 1);
        p.min_samples_leaf = 2;
        let orders = vec![(0..6).collect::<Vec<_>>()];
        let tree = RegressionTree::fit(&x, &y, &orders, &p);
        // The outlier cannot be isolated on its own.
        assert_eq!(tree.predict_row(&[4.0]), 25.0);
    }

    #[test]
    fn r2_of_perfect_and_mean_predictions() {
        let y = [1.0, 2.0, 3.0];
        assert_eq!(r2_score(&y, &y), 1.0);
        assert!((r2_score(&y, &[2.0, 2.0, 2.0])).abs() < 1e-12);
    }
}
