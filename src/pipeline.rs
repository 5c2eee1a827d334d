//! Clean → standardize → cluster → summarize → render, over in-memory inputs

use ndarray::Array2;

use crate::config::Config;
use crate::data::{build_country_table, standardize, CountryTable, StandardScaler};
use crate::fetch::{Boundary, IndicatorSeries};
use crate::model::{fit_kmeans, summarize_clusters, ClusterModel, ClusterSummary};
use crate::viz::render_map;

/// Everything one run produces before the HTML is written
#[derive(Debug)]
pub struct Analysis {
    pub table: CountryTable,
    pub scaler: StandardScaler,
    /// Standardized features the model was fitted on
    pub features: Array2<f64>,
    pub model: ClusterModel,
    pub summaries: Vec<ClusterSummary>,
    pub html: String,
}

impl Analysis {
    pub fn silhouette_score(&self) -> f64 {
        self.model.silhouette_score(&self.features)
    }
}

/// Run every stage between fetching and writing.
///
/// Fails before rendering if any stage fails, so no partial map is produced.
pub fn analyze(
    series: &[IndicatorSeries],
    boundaries: &[Boundary],
    config: &Config,
) -> crate::Result<Analysis> {
    config.validate()?;

    let table = build_country_table(series, boundaries)?;
    let (scaler, features) = standardize(&table);
    let model = fit_kmeans(&features, &config.cluster)?;
    let summaries = summarize_clusters(&table, &model.labels, model.n_clusters);

    let empty: Vec<usize> = model
        .cluster_sizes()
        .iter()
        .enumerate()
        .filter(|(_, &size)| size == 0)
        .map(|(cluster, _)| cluster)
        .collect();
    if !empty.is_empty() {
        tracing::warn!("Clusters {:?} received no countries and are left out of the legend", empty);
    }

    let html = render_map(&table, &model.labels, &summaries, config)?;
    Ok(Analysis {
        table,
        scaler,
        features,
        model,
        summaries,
        html,
    })
}
