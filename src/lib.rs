//! econatlas: cluster countries by macroeconomic indicators and map the result
//!
//! Fetches GDP per capita, CPI inflation, FDI inflow and unemployment from the
//! World Bank API, groups countries with K-Means on the standardized values and
//! renders an interactive choropleth as a standalone HTML page.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod fetch;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use config::{ClusterParams, Config, Indicator, YearSelection};
pub use data::{build_country_table, CountryRecord, CountryTable, StandardScaler};
pub use error::PipelineError;
pub use fetch::{Boundary, DataFetcher, IndicatorObservation, IndicatorSeries};
pub use model::{fit_kmeans, summarize_clusters, ClusterModel, ClusterSummary};
pub use pipeline::{analyze, Analysis};
pub use viz::render_map;

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
