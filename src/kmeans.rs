use anyhow::{Context, Result, anyhow};
use linfa::prelude::*;
use linfa_clustering::KMeans;
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::features::squared_distance;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansParams {
    pub k: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub tolerance: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub centroids: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    /// Sum of squared distances to the assigned centroid.
    pub inertia: f64,
}

impl KMeansFit {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for &l in &self.labels {
            sizes[l] += 1;
        }
        sizes
    }
}

/// k-means++ seeded k-means over `points`, best of `n_init` runs drawn from
/// one seeded generator.
pub fn fit(points: &[Vec<f64>], params: &KMeansParams) -> Result<KMeansFit> {
    let n = points.len();
    if n == 0 {
        return Err(anyhow!("k-means on an empty point set"));
    }
    if params.k == 0 || params.k > n {
        return Err(anyhow!("k-means needs 1 <= k <= n, got k={} n={n}", params.k));
    }
    let dims = points[0].len();
    if points.iter().any(|p| p.len() != dims) {
        return Err(anyhow!("k-means points have ragged dimensions"));
    }
    if points.iter().flatten().any(|v| !v.is_finite()) {
        return Err(anyhow!("k-means points contain non-finite values"));
    }

    let records = Array2::from_shape_vec((n, dims), points.concat())
        .context("build k-means matrix")?;
    let dataset = DatasetBase::new(records.clone(), Array1::from_elem(n, ()));

    let model = KMeans::params_with_rng(params.k, StdRng::seed_from_u64(params.seed))
        .n_runs(params.n_init.max(1))
        .max_n_iterations(params.max_iter.max(1) as u64)
        .tolerance(params.tolerance)
        .fit(&dataset)
        .map_err(|e| anyhow!("k-means fit failed: {e}"))?;

    let labels: Vec<usize> = model.predict(&records).iter().copied().collect();
    let centroids = model
        .centroids()
        .rows()
        .into_iter()
        .map(|row| row.to_vec())
        .collect::<Vec<_>>();
    let inertia = points
        .iter()
        .zip(&labels)
        .map(|(p, &l)| squared_distance(p, &centroids[l]))
        .sum();

    Ok(KMeansFit {
        centroids,
        labels,
        inertia,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(k: usize) -> KMeansParams {
        KMeansParams {
            k,
            n_init: 5,
            max_iter: 100,
            tolerance: 1e-8,
            seed: 7,
        }
    }

    fn blobs() -> Vec<Vec<f64>> {
        let mut pts = Vec::new();
        for (cx, cy) in [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)] {
            for i in 0..6 {
                let o = i as f64 * 0.1;
                pts.push(vec![cx + o, cy - o]);
            }
        }
        pts
    }

    #[test]
    fn separates_well_spaced_blobs() {
        let pts = blobs();
        let fit = fit(&pts, &params(3)).expect("fit");
        assert_eq!(fit.cluster_sizes().iter().filter(|&&s| s == 6).count(), 3);
        for chunk in fit.labels.chunks(6) {
            assert!(chunk.iter().all(|&l| l == chunk[0]));
        }
        assert!(fit.inertia < 1.0);
    }

    #[test]
    fn same_seed_same_result() {
        let pts = blobs();
        assert_eq!(fit(&pts, &params(3)).ok(), fit(&pts, &params(3)).ok());
    }

    #[test]
    fn labels_index_centroids() {
        let pts = blobs();
        let fit = fit(&pts, &params(2)).expect("fit");
        assert_eq!(fit.centroids.len(), 2);
        assert_eq!(fit.labels.len(), pts.len());
        assert!(fit.labels.iter().all(|&l| l < 2));
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(fit(&[vec![0.0]], &params(2)).is_err());
        assert!(fit(&[], &params(1)).is_err());
        assert!(fit(&[vec![f64::NAN], vec![1.0]], &params(1)).is_err());
    }
}
