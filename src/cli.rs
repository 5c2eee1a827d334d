//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::config::{self, ClusterParams, Config, YearSelection};

/// Cluster countries by GDP per capita, inflation, FDI inflow and
/// unemployment, and open the result as an interactive map.
///
/// Every option is optional; a bare invocation uses the built-in defaults.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path of the HTML map to write
    #[arg(short, long, default_value = config::OUTPUT_PATH)]
    pub output: PathBuf,

    /// Number of clusters for K-Means
    #[arg(short = 'k', long, default_value_t = config::DEFAULT_CLUSTERS)]
    pub clusters: usize,

    /// Observation year; defaults to each country's most recent value
    #[arg(short, long)]
    pub year: Option<i32>,

    /// Random seed for centroid initialisation
    #[arg(long, default_value_t = config::DEFAULT_SEED)]
    pub seed: u64,

    /// Number of K-Means restarts
    #[arg(long, default_value_t = config::DEFAULT_RUNS)]
    pub runs: usize,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value_t = config::DEFAULT_MAX_ITERS)]
    pub max_iters: usize,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value_t = config::DEFAULT_TOLERANCE)]
    pub tolerance: f64,

    /// Write the map without opening a browser
    #[arg(long)]
    pub no_open: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Build and validate the run configuration
    pub fn into_config(self) -> crate::Result<Config> {
        let config = Config {
            year: self
                .year
                .map_or(YearSelection::MostRecent, YearSelection::Year),
            cluster: ClusterParams {
                clusters: self.clusters,
                seed: self.seed,
                runs: self.runs,
                max_iters: self.max_iters,
                tolerance: self.tolerance,
            },
            output: self.output,
            open_browser: !self.no_open,
            ..Config::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_config() {
        let args = Args::parse_from(["econatlas"]);
        let config = args.into_config().unwrap();
        let defaults = Config::default();

        assert_eq!(config.cluster, defaults.cluster);
        assert_eq!(config.output, defaults.output);
        assert_eq!(config.year, YearSelection::MostRecent);
        assert!(config.open_browser);
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "econatlas",
            "-k",
            "3",
            "--year",
            "2021",
            "--seed",
            "7",
            "--output",
            "out/map.html",
            "--no-open",
        ]);
        let config = args.into_config().unwrap();

        assert_eq!(config.cluster.clusters, 3);
        assert_eq!(config.cluster.seed, 7);
        assert_eq!(config.year, YearSelection::Year(2021));
        assert_eq!(config.output, PathBuf::from("out/map.html"));
        assert!(!config.open_browser);
    }

    #[test]
    fn test_invalid_cluster_count() {
        let args = Args::parse_from(["econatlas", "-k", "0"]);
        assert!(args.into_config().is_err());

        let args = Args::parse_from(["econatlas", "-k", "10"]);
        assert!(args.into_config().is_err());
    }
}
