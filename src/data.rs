//! Merging indicator series, dropping incomplete rows and joining to geometry using Polars

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use serde_json::Value;

use crate::config::Indicator;
use crate::error::PipelineError;
use crate::fetch::{Boundary, IndicatorSeries};

/// Join key shared by every frame.
const KEY: &str = "country_code";

/// Standard deviations at or below this are treated as a constant column.
const MIN_STD_DEV: f64 = 1e-12;

/// A country with all four indicators and a boundary polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryRecord {
    pub code: String,
    pub name: String,
    /// Raw indicator values, indexed by `Indicator::index`.
    pub values: [f64; 4],
    pub geometry: Value,
}

impl CountryRecord {
    pub fn value(&self, indicator: Indicator) -> f64 {
        self.values[indicator.index()]
    }
}

/// Row counts observed while cleaning, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinStats {
    /// Distinct country codes across all four series.
    pub merged: usize,
    /// Rows with every indicator present.
    pub complete: usize,
    /// Complete rows that also have a boundary.
    pub mapped: usize,
}

/// The cleaned table every later stage works on, sorted by country code.
#[derive(Debug, Clone)]
pub struct CountryTable {
    pub countries: Vec<CountryRecord>,
    pub stats: JoinStats,
}

impl CountryTable {
    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    /// Raw indicator matrix of shape (countries, 4).
    pub fn raw_features(&self) -> Array2<f64> {
        let mut features = Array2::zeros((self.countries.len(), Indicator::ALL.len()));
        for (mut row, country) in features.outer_iter_mut().zip(&self.countries) {
            row.assign(&Array1::from(country.values.to_vec()));
        }
        features
    }
}

/// Merge the series on country code, drop incomplete rows and keep only
/// countries that have a boundary.
///
/// # Arguments
/// * `series` - One series per indicator; every `Indicator` must be present
/// * `boundaries` - Country polygons keyed by alpha-3 code
///
/// # Returns
/// * `CountryTable` sorted by country code
pub fn build_country_table(
    series: &[IndicatorSeries],
    boundaries: &[Boundary],
) -> crate::Result<CountryTable> {
    let merged = merge_series(series)?;
    let merged_rows = merged.height();

    // Completeness over coverage: any missing indicator excludes the country
    let complete_filter = Indicator::ALL
        .iter()
        .map(|i| col(i.column()).is_not_null())
        .reduce(|acc, e| acc.and(e))
        .unwrap_or_else(|| lit(true));
    let complete = merged.lazy().filter(complete_filter).collect()?;
    let complete_rows = complete.height();
    tracing::info!(
        "Merged {} countries; {} dropped for missing indicators",
        merged_rows,
        merged_rows - complete_rows
    );
    if complete_rows == 0 {
        return Err(PipelineError::EmptyResult {
            stage: "dropping incomplete rows",
        }
        .into());
    }

    let codes: Vec<&str> = boundaries.iter().map(|b| b.country_code.as_str()).collect();
    let boundary_frame = df!(KEY => codes)?;
    let mapped = complete
        .lazy()
        .join(
            boundary_frame.lazy(),
            [col(KEY)],
            [col(KEY)],
            JoinArgs::new(JoinType::Inner),
        )
        .sort([KEY], SortMultipleOptions::default())
        .collect()?;
    tracing::info!(
        "{} countries have a boundary; {} dropped without geometry",
        mapped.height(),
        complete_rows - mapped.height()
    );
    if mapped.height() == 0 {
        return Err(PipelineError::EmptyResult {
            stage: "joining indicators to boundaries",
        }
        .into());
    }

    let stats = JoinStats {
        merged: merged_rows,
        complete: complete_rows,
        mapped: mapped.height(),
    };
    let countries = collect_records(&mapped, series, boundaries)?;
    Ok(CountryTable { countries, stats })
}

/// Full outer merge of all series into one wide frame keyed by country code.
fn merge_series(series: &[IndicatorSeries]) -> crate::Result<DataFrame> {
    let mut frames = Vec::with_capacity(Indicator::ALL.len());
    for indicator in Indicator::ALL {
        let found = series
            .iter()
            .find(|s| s.indicator == indicator)
            .ok_or_else(|| anyhow::anyhow!("no data fetched for {}", indicator.code()))?;
        frames.push(series_frame(found)?);
    }

    let mut frames = frames.into_iter();
    let first = frames
        .next()
        .ok_or_else(|| anyhow::anyhow!("no indicator series to merge"))?;
    let merged = frames.fold(first.lazy(), |acc, frame| {
        acc.join(
            frame.lazy(),
            [col(KEY)],
            [col(KEY)],
            JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
        )
    });
    Ok(merged.collect()?)
}

fn series_frame(series: &IndicatorSeries) -> crate::Result<DataFrame> {
    let codes: Vec<&str> = series
        .observations
        .iter()
        .map(|o| o.country_code.as_str())
        .collect();
    let values: Vec<Option<f64>> = series.observations.iter().map(|o| o.value).collect();
    Ok(df!(
        KEY => codes,
        series.indicator.column() => values
    )?)
}

/// Turn the joined frame back into records carrying names and geometry.
fn collect_records(
    frame: &DataFrame,
    series: &[IndicatorSeries],
    boundaries: &[Boundary],
) -> crate::Result<Vec<CountryRecord>> {
    let codes = frame.column(KEY)?.str()?;
    let columns = Indicator::ALL
        .iter()
        .map(|i| frame.column(i.column())?.f64().cloned())
        .collect::<PolarsResult<Vec<_>>>()?;

    // Indicator names come from the API; the boundary name is the fallback
    let mut names: BTreeMap<&str, &str> = BTreeMap::new();
    for observation in series.iter().flat_map(|s| &s.observations) {
        if !observation.country_name.is_empty() {
            names
                .entry(observation.country_code.as_str())
                .or_insert(observation.country_name.as_str());
        }
    }
    let geometries: HashMap<&str, &Boundary> = boundaries
        .iter()
        .map(|b| (b.country_code.as_str(), b))
        .collect();

    let mut records = Vec::with_capacity(frame.height());
    for (row, code) in codes.into_iter().enumerate() {
        let code = code.ok_or_else(|| anyhow::anyhow!("null country code in row {row}"))?;
        let boundary = geometries
            .get(code)
            .ok_or_else(|| anyhow::anyhow!("no boundary for joined country {code}"))?;

        let mut values = [0.0; 4];
        for (slot, column) in values.iter_mut().zip(&columns) {
            *slot = column
                .get(row)
                .ok_or_else(|| anyhow::anyhow!("missing indicator for {code} after filtering"))?;
        }

        let name = names.get(code).copied().unwrap_or(boundary.name.as_str());
        records.push(CountryRecord {
            code: code.to_string(),
            name: name.to_string(),
            values,
            geometry: boundary.geometry.clone(),
        });
    }
    Ok(records)
}

/// Per-column standardization to zero mean and unit variance.
///
/// Uses the population standard deviation. A column with zero variance
/// standardizes to 0 everywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub std_dev: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(data: &Array2<f64>) -> Self {
        let n_features = data.ncols();
        if data.nrows() == 0 {
            return Self {
                mean: Array1::zeros(n_features),
                std_dev: Array1::zeros(n_features),
            };
        }
        let mean = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let std_dev = data.std_axis(Axis(0), 0.0);
        Self { mean, std_dev }
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut scaled = data.clone();
        for (j, mut column) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            let mean = self.mean[j];
            let std_dev = self.std_dev[j];
            if std_dev.is_finite() && std_dev > MIN_STD_DEV {
                column.mapv_inplace(|x| (x - mean) / std_dev);
            } else {
                column.fill(0.0);
            }
        }
        scaled
    }

    /// Indices of columns that carry no information.
    pub fn constant_columns(&self) -> Vec<usize> {
        self.std_dev
            .iter()
            .enumerate()
            .filter(|(_, s)| !(s.is_finite() && **s > MIN_STD_DEV))
            .map(|(j, _)| j)
            .collect()
    }
}

/// Fit a scaler on the table and return it with the standardized features.
pub fn standardize(table: &CountryTable) -> (StandardScaler, Array2<f64>) {
    let raw = table.raw_features();
    let scaler = StandardScaler::fit(&raw);
    for j in scaler.constant_columns() {
        tracing::warn!(
            "{} has the same value for every country; standardizing it to 0",
            Indicator::ALL[j].label()
        );
    }
    let features = scaler.transform(&raw);
    (scaler, features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::IndicatorObservation;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use serde_json::json;

    fn observation(code: &str, name: &str, value: Option<f64>) -> IndicatorObservation {
        IndicatorObservation {
            country_code: code.to_string(),
            country_name: name.to_string(),
            value,
        }
    }

    fn boundary(code: &str) -> Boundary {
        Boundary {
            country_code: code.to_string(),
            name: format!("{code} land"),
            geometry: json!({"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}),
        }
    }

    fn create_test_series() -> Vec<IndicatorSeries> {
        // NOR misses unemployment, JPN only appears in two series
        let rows = [
            ("USA", [Some(80_000.0), Some(4.1), Some(1.2), Some(3.6)]),
            ("DEU", [Some(52_000.0), Some(5.9), Some(2.0), Some(3.0)]),
            ("NOR", [Some(87_000.0), Some(5.5), Some(0.4), None]),
            ("BRA", [Some(10_000.0), Some(4.6), Some(3.1), Some(8.0)]),
        ];
        Indicator::ALL
            .iter()
            .map(|&indicator| {
                let mut observations: Vec<_> = rows
                    .iter()
                    .map(|(code, values)| {
                        observation(code, &format!("{code} name"), values[indicator.index()])
                    })
                    .collect();
                if indicator.index() < 2 {
                    observations.push(observation("JPN", "Japan", Some(1.0)));
                }
                IndicatorSeries {
                    indicator,
                    observations,
                }
            })
            .collect()
    }

    #[test]
    fn test_build_country_table() {
        let series = create_test_series();
        let boundaries = vec![boundary("USA"), boundary("BRA"), boundary("NOR"), boundary("JPN")];

        let table = build_country_table(&series, &boundaries).unwrap();

        let codes: Vec<&str> = table.countries.iter().map(|c| c.code.as_str()).collect();
        // DEU has no boundary, NOR and JPN are incomplete
        assert_eq!(codes, vec!["BRA", "USA"]);
        assert_eq!(
            table.stats,
            JoinStats {
                merged: 5,
                complete: 3,
                mapped: 2
            }
        );

        let usa = &table.countries[1];
        assert_eq!(usa.name, "USA name");
        assert_eq!(usa.values, [80_000.0, 4.1, 1.2, 3.6]);
        assert_eq!(usa.value(Indicator::UnemploymentRate), 3.6);
        assert_eq!(usa.geometry["type"], "Polygon");
    }

    #[test]
    fn test_build_country_table_empty_after_join() {
        let series = create_test_series();
        let err = build_country_table(&series, &[boundary("FRA")]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyResult { .. })
        ));
    }

    #[test]
    fn test_build_country_table_all_incomplete() {
        let mut series = create_test_series();
        for observation in &mut series[3].observations {
            observation.value = None;
        }
        let err = build_country_table(&series, &[boundary("USA")]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyResult { .. })
        ));
    }

    #[test]
    fn test_missing_series_is_an_error() {
        let series = create_test_series();
        assert!(build_country_table(&series[..3], &[boundary("USA")]).is_err());
    }

    #[test]
    fn test_raw_features_shape() {
        let series = create_test_series();
        let boundaries = vec![boundary("USA"), boundary("BRA"), boundary("DEU")];
        let table = build_country_table(&series, &boundaries).unwrap();
        let raw = table.raw_features();
        assert_eq!(raw.shape(), &[3, 4]);
        assert_eq!(raw.row(0).to_vec(), vec![10_000.0, 4.6, 3.1, 8.0]);
    }

    #[test]
    fn test_standard_scaler() {
        let data = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]];
        let scaler = StandardScaler::fit(&data);
        assert_abs_diff_eq!(scaler.mean[0], 2.0);
        assert_abs_diff_eq!(scaler.mean[1], 20.0);

        let scaled = scaler.transform(&data);
        for column in scaled.axis_iter(Axis(1)) {
            assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(column.std(0.0), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_standard_scaler_zero_variance_column() {
        let data = array![[1.0, 5.0], [2.0, 5.0], [4.0, 5.0]];
        let scaler = StandardScaler::fit(&data);
        assert_eq!(scaler.constant_columns(), vec![1]);

        let scaled = scaler.transform(&data);
        assert!(scaled.iter().all(|x| x.is_finite()));
        assert!(scaled.column(1).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_standard_scaler_single_row() {
        let data = array![[3.0, 7.0, 9.0]];
        let scaled = StandardScaler::fit(&data).transform(&data);
        assert_eq!(scaled, array![[0.0, 0.0, 0.0]]);
    }
}
