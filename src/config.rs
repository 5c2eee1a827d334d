//! Run configuration: indicators, clustering parameters, palette and paths

use std::fmt;
use std::path::PathBuf;

use chrono::{Datelike, Utc};

use crate::error::PipelineError;

/// Default World Bank API root.
pub const WORLD_BANK_API: &str = "https://api.worldbank.org/v2";

/// Default country boundary dataset (Natural Earth 1:110m).
pub const BOUNDARIES_URL: &str =
    "https://raw.githubusercontent.com/datasets/geo-boundaries-world-110m/master/countries.geojson";

/// Default output file, relative to the working directory.
pub const OUTPUT_PATH: &str = "global_economy_clusters.html";

pub const DEFAULT_CLUSTERS: usize = 5;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_RUNS: usize = 10;
pub const DEFAULT_MAX_ITERS: usize = 300;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// Cluster colors, indexed by cluster id.
pub const DEFAULT_PALETTE: [&str; 9] = [
    "#e41a1c", "#377eb8", "#4daf4a", "#984ea3", "#ff7f00", "#ffff33", "#a65628", "#f781bf",
    "#999999",
];

/// Earliest year the World Bank publishes these series for.
const FIRST_DATA_YEAR: i32 = 1960;

/// The four macroeconomic indicators every country is described by.
///
/// The declaration order is the column order of every feature matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Indicator {
    GdpPerCapita,
    CpiInflation,
    FdiInflow,
    UnemploymentRate,
}

impl Indicator {
    pub const ALL: [Indicator; 4] = [
        Indicator::GdpPerCapita,
        Indicator::CpiInflation,
        Indicator::FdiInflow,
        Indicator::UnemploymentRate,
    ];

    /// World Bank series code.
    pub fn code(self) -> &'static str {
        match self {
            Indicator::GdpPerCapita => "NY.GDP.PCAP.CD",
            Indicator::CpiInflation => "FP.CPI.TOTL.ZG",
            Indicator::FdiInflow => "BX.KLT.DINV.WD.GD.ZS",
            Indicator::UnemploymentRate => "SL.UEM.TOTL.ZS",
        }
    }

    /// Column name used in tables and in the map's feature properties.
    pub fn column(self) -> &'static str {
        match self {
            Indicator::GdpPerCapita => "gdp_per_capita",
            Indicator::CpiInflation => "cpi_inflation",
            Indicator::FdiInflow => "fdi_inflow",
            Indicator::UnemploymentRate => "unemployment_rate",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Indicator::GdpPerCapita => "GDP per capita",
            Indicator::CpiInflation => "Inflation",
            Indicator::FdiInflow => "FDI inflow (% of GDP)",
            Indicator::UnemploymentRate => "Unemployment",
        }
    }

    /// Legend column header.
    pub fn short_label(self) -> &'static str {
        match self {
            Indicator::GdpPerCapita => "GDP",
            Indicator::CpiInflation => "Inf.",
            Indicator::FdiInflow => "FDI",
            Indicator::UnemploymentRate => "Unemp",
        }
    }

    /// Position of this indicator in feature rows.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Human readable value: dollars for GDP, percentages otherwise.
    pub fn format(self, value: f64) -> String {
        match self {
            Indicator::GdpPerCapita => {
                let sign = if value.round() < 0.0 { "-" } else { "" };
                format!("{sign}${}", group_thousands(value.abs()))
            }
            _ => format!("{value:.1}%"),
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Rounds a non-negative value to a whole number and inserts thousands separators.
fn group_thousands(value: f64) -> String {
    let digits = format!("{:.0}", value.round());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

/// Which observation year to request from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearSelection {
    /// Most recent non-empty value per country (`mrnev=1`).
    MostRecent,
    Year(i32),
}

impl YearSelection {
    /// Query parameter selecting the observation year.
    pub fn query_param(self) -> (&'static str, String) {
        match self {
            YearSelection::MostRecent => ("mrnev", "1".to_string()),
            YearSelection::Year(year) => ("date", year.to_string()),
        }
    }
}

impl fmt::Display for YearSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YearSelection::MostRecent => f.write_str("most recent"),
            YearSelection::Year(year) => write!(f, "{year}"),
        }
    }
}

/// K-Means parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterParams {
    pub clusters: usize,
    pub seed: u64,
    /// Independent k-means++ restarts; the lowest-inertia run wins.
    pub runs: usize,
    pub max_iters: usize,
    pub tolerance: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            clusters: DEFAULT_CLUSTERS,
            seed: DEFAULT_SEED,
            runs: DEFAULT_RUNS,
            max_iters: DEFAULT_MAX_ITERS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Everything a run needs, passed explicitly to each stage.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub boundaries_url: String,
    pub year: YearSelection,
    pub cluster: ClusterParams,
    pub palette: Vec<String>,
    pub output: PathBuf,
    pub open_browser: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: WORLD_BANK_API.to_string(),
            boundaries_url: BOUNDARIES_URL.to_string(),
            year: YearSelection::MostRecent,
            cluster: ClusterParams::default(),
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
            output: PathBuf::from(OUTPUT_PATH),
            open_browser: true,
        }
    }
}

impl Config {
    /// Check every tunable before any network call is made.
    pub fn validate(&self) -> crate::Result<()> {
        let params = &self.cluster;
        if params.clusters == 0 {
            return Err(invalid("number of clusters must be at least 1"));
        }
        if params.clusters > self.palette.len() {
            return Err(invalid(format!(
                "{} clusters requested but the palette only has {} colors",
                params.clusters,
                self.palette.len()
            )));
        }
        if let Some(bad) = self.palette.iter().find(|c| !is_hex_color(c)) {
            return Err(invalid(format!("palette color {bad:?} is not #rrggbb")));
        }
        if params.runs == 0 {
            return Err(invalid("number of runs must be at least 1"));
        }
        if params.max_iters == 0 {
            return Err(invalid("max iterations must be at least 1"));
        }
        if !(params.tolerance.is_finite() && params.tolerance > 0.0) {
            return Err(invalid(format!(
                "tolerance must be a positive number, got {}",
                params.tolerance
            )));
        }
        if let YearSelection::Year(year) = self.year {
            let current = Utc::now().year();
            if !(FIRST_DATA_YEAR..=current).contains(&year) {
                return Err(invalid(format!(
                    "year {year} is outside {FIRST_DATA_YEAR}..={current}"
                )));
            }
        }
        if self.output.as_os_str().is_empty() {
            return Err(invalid("output path is empty"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    PipelineError::InvalidConfig(message.into()).into()
}

pub(crate) fn is_hex_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster.clusters, 5);
        assert_eq!(config.output, PathBuf::from("global_economy_clusters.html"));
        assert_eq!(config.year, YearSelection::MostRecent);
    }

    #[test]
    fn test_indicator_columns_follow_declaration_order() {
        for (i, indicator) in Indicator::ALL.iter().enumerate() {
            assert_eq!(indicator.index(), i);
        }
        assert_eq!(Indicator::FdiInflow.code(), "BX.KLT.DINV.WD.GD.ZS");
    }

    #[test]
    fn test_indicator_format() {
        assert_eq!(Indicator::GdpPerCapita.format(65_432.7), "$65,433");
        assert_eq!(Indicator::GdpPerCapita.format(999.4), "$999");
        assert_eq!(Indicator::GdpPerCapita.format(1_000_000.0), "$1,000,000");
        assert_eq!(Indicator::GdpPerCapita.format(-1234.0), "-$1,234");
        assert_eq!(Indicator::GdpPerCapita.format(-0.4), "$0");
        assert_eq!(Indicator::CpiInflation.format(3.26), "3.3%");
        assert_eq!(Indicator::FdiInflow.format(-12.34), "-12.3%");
    }

    #[test]
    fn test_year_query_param() {
        assert_eq!(
            YearSelection::MostRecent.query_param(),
            ("mrnev", "1".to_string())
        );
        assert_eq!(
            YearSelection::Year(2022).query_param(),
            ("date", "2022".to_string())
        );
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = Config::default();
        config.cluster.clusters = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cluster.clusters = 12;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidConfig(_))
        ));

        let mut config = Config::default();
        config.palette[0] = "red".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cluster.tolerance = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.year = YearSelection::Year(1900);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_hex_color() {
        assert!(is_hex_color("#A65628"));
        assert!(!is_hex_color("#a6562"));
        assert!(!is_hex_color("a656289"));
        assert!(!is_hex_color("#zzzzzz"));
    }
}
