//! econatlas: fetch World Bank indicators, cluster countries and open the map
//!
//! This is the main entrypoint that orchestrates fetching, clustering,
//! rendering and writing the HTML map.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use econatlas::{analyze, fetch, output, Analysis, Args, Config, Indicator};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.into_config()?;
    run_full_pipeline(&config)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .with_target(false)
        .init();
}

/// Run the full pipeline: fetch, analyze, write, open
fn run_full_pipeline(config: &Config) -> Result<()> {
    println!("=== Global Economy Clusters ===\n");
    let start_time = Instant::now();

    // Step 1: Fetch indicators and boundaries
    let (series, boundaries) = fetch::fetch_all(config).context("fetching input data")?;
    println!(
        "✓ Fetched {} indicators ({}) and {} country boundaries",
        series.len(),
        config.year,
        boundaries.len()
    );

    // Step 2: Clean, cluster and render
    let analysis = analyze(&series, &boundaries, config)?;
    let stats = analysis.table.stats;
    println!(
        "✓ {} countries clustered ({} merged, {} complete, {} with a boundary)",
        analysis.table.len(),
        stats.merged,
        stats.complete,
        stats.mapped
    );
    print_cluster_statistics(&analysis);

    // Step 3: Write the map; browser failures do not fail the run
    let written = output::publish(config, &analysis.html)?;
    println!("\n✓ Map saved to: {}", written.display());

    println!(
        "\nTotal processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Print cluster statistics to console
fn print_cluster_statistics(analysis: &Analysis) {
    let total = analysis.table.len();
    println!("\n=== Cluster Statistics ===");
    println!("Within-cluster sum of squares (Inertia): {:.2}", analysis.model.inertia);
    println!("Silhouette score: {:.3}", analysis.silhouette_score());

    print!("\n  Cluster | Countries");
    for indicator in Indicator::ALL {
        print!(" | {:>9}", indicator.short_label());
    }
    println!();
    for summary in &analysis.summaries {
        let percentage = summary.size as f64 / total as f64 * 100.0;
        print!(
            "  {:7} | {:3} ({:4.1}%)",
            summary.cluster, summary.size, percentage
        );
        for indicator in Indicator::ALL {
            print!(" | {:>9}", indicator.format(summary.mean(indicator)));
        }
        println!();
    }
}
