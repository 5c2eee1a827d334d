//! K-Means clustering of standardized country indicators

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{ClusterParams, Indicator};
use crate::data::CountryTable;
use crate::error::PipelineError;

/// Fitted clustering of the country table
#[derive(Debug)]
pub struct ClusterModel {
    /// Fitted K-Means model from linfa
    pub model: KMeans<f64, L2Dist>,
    /// Number of clusters requested
    pub n_clusters: usize,
    /// Cluster id per table row, each in `0..n_clusters`
    pub labels: Array1<usize>,
    /// Cluster centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl ClusterModel {
    /// Number of rows assigned to each cluster id, including empty clusters
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Country code to cluster id, in table order
    pub fn assignments<'a>(&'a self, table: &'a CountryTable) -> Vec<(&'a str, usize)> {
        table
            .countries
            .iter()
            .zip(self.labels.iter())
            .map(|(country, &label)| (country.code.as_str(), label))
            .collect()
    }

    /// Mean silhouette coefficient over every row.
    ///
    /// Rows in singleton clusters score 0. Returns 0 with fewer than two
    /// non-empty clusters.
    pub fn silhouette_score(&self, features: &Array2<f64>) -> f64 {
        let n_samples = features.nrows();
        let non_empty = self.cluster_sizes().iter().filter(|&&s| s > 0).count();
        if n_samples < 2 || non_empty < 2 {
            return 0.0;
        }

        let mut silhouette_sum = 0.0;
        for i in 0..n_samples {
            let point = features.row(i);
            let own = self.labels[i];

            let mut distance_sums = vec![0.0; self.n_clusters];
            let mut counts = vec![0usize; self.n_clusters];
            for j in 0..n_samples {
                if i == j {
                    continue;
                }
                let label = self.labels[j];
                distance_sums[label] += euclidean_distance(&point, &features.row(j));
                counts[label] += 1;
            }

            if counts[own] == 0 {
                continue;
            }
            let a_i = distance_sums[own] / counts[own] as f64;
            let b_i = (0..self.n_clusters)
                .filter(|&c| c != own && counts[c] > 0)
                .map(|c| distance_sums[c] / counts[c] as f64)
                .fold(f64::INFINITY, f64::min);

            if b_i.is_finite() && a_i.max(b_i) > 0.0 {
                silhouette_sum += (b_i - a_i) / a_i.max(b_i);
            }
        }

        silhouette_sum / n_samples as f64
    }
}

/// Partition standardized features into `params.clusters` groups.
///
/// # Arguments
/// * `features` - Standardized matrix of shape (countries, indicators)
/// * `params` - Cluster count, seed, restarts, iteration limit and tolerance
///
/// # Returns
/// * Fitted `ClusterModel`; identical inputs and seed give identical labels
pub fn fit_kmeans(features: &Array2<f64>, params: &ClusterParams) -> crate::Result<ClusterModel> {
    if params.clusters == 0 {
        return Err(
            PipelineError::InvalidConfig("number of clusters must be at least 1".into()).into(),
        );
    }

    let n_samples = features.nrows();
    if n_samples < params.clusters {
        return Err(PipelineError::TooFewCountries {
            countries: n_samples,
            clusters: params.clusters,
        }
        .into());
    }

    // Dummy targets for unsupervised learning
    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(features.clone(), targets);
    let rng = StdRng::seed_from_u64(params.seed);

    let model = KMeans::params_with(params.clusters, rng, L2Dist)
        .n_runs(params.runs)
        .max_n_iterations(params.max_iters as u64)
        .tolerance(params.tolerance)
        .fit(&dataset)
        .map_err(|e| PipelineError::Clustering(e.to_string()))?;

    let labels: Array1<usize> = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    tracing::info!(
        "Clustered {} countries into {} clusters (inertia {:.3})",
        n_samples,
        params.clusters,
        inertia
    );

    Ok(ClusterModel {
        model,
        n_clusters: params.clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Per-cluster means of the raw indicators
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub cluster: usize,
    pub size: usize,
    /// Mean raw value per indicator, indexed by `Indicator::index`
    pub means: [f64; 4],
}

impl ClusterSummary {
    pub fn mean(&self, indicator: Indicator) -> f64 {
        self.means[indicator.index()]
    }
}

/// Average each indicator over the members of every non-empty cluster.
///
/// Summaries are in ascending cluster id order. Empty clusters are left out
/// and ids are never renumbered.
pub fn summarize_clusters(
    table: &CountryTable,
    labels: &Array1<usize>,
    n_clusters: usize,
) -> Vec<ClusterSummary> {
    let mut sums = vec![[0.0; 4]; n_clusters];
    let mut sizes = vec![0usize; n_clusters];

    for (country, &label) in table.countries.iter().zip(labels.iter()) {
        if label >= n_clusters {
            continue;
        }
        sizes[label] += 1;
        for (sum, value) in sums[label].iter_mut().zip(country.values) {
            *sum += value;
        }
    }

    sums.into_iter()
        .zip(sizes)
        .enumerate()
        .filter(|(_, (_, size))| *size > 0)
        .map(|(cluster, (sum, size))| ClusterSummary {
            cluster,
            size,
            means: sum.map(|s| s / size as f64),
        })
        .collect()
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| {
            features
                .row(i)
                .iter()
                .zip(centroids.row(cluster).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
        })
        .sum()
}

/// Calculate Euclidean distance between two points
fn euclidean_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountryRecord, JoinStats};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use serde_json::Value;

    fn params(clusters: usize) -> ClusterParams {
        ClusterParams {
            clusters,
            ..ClusterParams::default()
        }
    }

    fn create_test_features() -> Array2<f64> {
        array![
            [-1.0, -1.0, -1.0, -1.0],
            [-1.1, -0.9, -1.0, -1.0],
            [1.0, 1.0, 1.0, 1.0],
            [1.1, 0.9, 1.0, 1.0],
            [5.0, -5.0, 0.0, 0.0],
            [5.1, -5.1, 0.0, 0.0],
        ]
    }

    fn table_from_values(values: &[[f64; 4]]) -> CountryTable {
        let countries = values
            .iter()
            .enumerate()
            .map(|(i, v)| CountryRecord {
                code: format!("C{i:02}"),
                name: format!("Country {i}"),
                values: *v,
                geometry: Value::Null,
            })
            .collect::<Vec<_>>();
        CountryTable {
            stats: JoinStats {
                merged: countries.len(),
                complete: countries.len(),
                mapped: countries.len(),
            },
            countries,
        }
    }

    #[test]
    fn test_fit_kmeans() {
        let features = create_test_features();
        let model = fit_kmeans(&features, &params(3)).unwrap();

        assert_eq!(model.n_clusters, 3);
        assert_eq!(model.labels.len(), 6);
        assert_eq!(model.centroids.shape(), &[3, 4]);
        assert!(model.labels.iter().all(|&l| l < 3));

        // The three tight pairs end up together
        assert_eq!(model.labels[0], model.labels[1]);
        assert_eq!(model.labels[2], model.labels[3]);
        assert_eq!(model.labels[4], model.labels[5]);
        assert_ne!(model.labels[0], model.labels[2]);
        assert_ne!(model.labels[2], model.labels[4]);
    }

    #[test]
    fn test_fit_kmeans_is_deterministic() {
        let features = create_test_features();
        let first = fit_kmeans(&features, &params(3)).unwrap();
        let second = fit_kmeans(&features, &params(3)).unwrap();
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.centroids, second.centroids);
    }

    #[test]
    fn test_too_few_countries() {
        let features = create_test_features();
        let err = fit_kmeans(&features, &params(7)).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::TooFewCountries {
                countries,
                clusters,
            }) => {
                assert_eq!(*countries, 6);
                assert_eq!(*clusters, 7);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_zero_clusters_rejected() {
        let features = create_test_features();
        assert!(fit_kmeans(&features, &params(0)).is_err());
    }

    #[test]
    fn test_cluster_sizes() {
        let features = create_test_features();
        let model = fit_kmeans(&features, &params(3)).unwrap();

        let sizes = model.cluster_sizes();
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes.iter().sum::<usize>(), 6);
        assert!(sizes.iter().all(|&s| s == 2));
    }

    #[test]
    fn test_inertia_and_silhouette() {
        let features = create_test_features();
        let model = fit_kmeans(&features, &params(3)).unwrap();

        assert!(model.inertia >= 0.0);
        assert!(model.inertia.is_finite());
        // Tight, well separated pairs
        assert!(model.silhouette_score(&features) > 0.8);
    }

    #[test]
    fn test_silhouette_single_cluster_is_zero() {
        let features = create_test_features();
        let model = fit_kmeans(&features, &params(1)).unwrap();
        assert_eq!(model.silhouette_score(&features), 0.0);
    }

    #[test]
    fn test_summarize_clusters() {
        let table = table_from_values(&[
            [100.0, 1.0, 2.0, 3.0],
            [300.0, 3.0, 4.0, 5.0],
            [1000.0, 10.0, 0.0, 1.0],
        ]);
        let labels = array![2, 2, 0];

        let summaries = summarize_clusters(&table, &labels, 3);

        // Cluster 1 is empty and left out
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].cluster, 0);
        assert_eq!(summaries[0].size, 1);
        assert_eq!(summaries[0].means, [1000.0, 10.0, 0.0, 1.0]);
        assert_eq!(summaries[1].cluster, 2);
        assert_eq!(summaries[1].size, 2);
        assert_abs_diff_eq!(summaries[1].mean(Indicator::GdpPerCapita), 200.0);
        assert_abs_diff_eq!(summaries[1].mean(Indicator::UnemploymentRate), 4.0);
    }

    #[test]
    fn test_assignments_follow_table_order() {
        let table = table_from_values(&[[1.0; 4], [2.0; 4]]);
        let model = fit_kmeans(&table.raw_features(), &params(2)).unwrap();
        let assignments = model.assignments(&table);
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].0, "C00");
        assert_ne!(assignments[0].1, assignments[1].1);
    }
}
