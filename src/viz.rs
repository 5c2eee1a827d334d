//! Interactive choropleth rendering: colored country layers, tooltips and a cluster legend

use std::collections::BTreeMap;

use ndarray::Array1;
use plotters::prelude::*;
use serde_json::{json, Value};

use crate::config::{is_hex_color, Config, Indicator};
use crate::data::{CountryRecord, CountryTable};
use crate::model::ClusterSummary;

const MAP_TITLE: &str = "Global Economy Clusters";

/// Size of the cluster size chart embedded in the legend
const CHART_SIZE: (u32, u32) = (300, 80);

const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>__TITLE__</title>
<link rel="stylesheet" href="__LEAFLET_CSS__">
<script src="__LEAFLET_JS__"></script>
<style>
  html, body { height: 100%; margin: 0; }
  #map { position: absolute; top: 0; bottom: 0; left: 0; right: 0; }
  .legend {
    position: fixed; bottom: 50px; left: 50px; width: 340px;
    background-color: white; border: 2px solid grey; z-index: 9999;
    font: 12px sans-serif; padding: 10px;
  }
  .legend table { width: 100%; text-align: left; border-collapse: collapse; }
  .legend th { border-bottom: 1px solid black; }
  .legend .swatch {
    display: inline-block; width: 10px; height: 10px; margin-right: 4px;
    border: 1px solid #333;
  }
  .legend .chart svg { display: block; margin-top: 6px; }
</style>
</head>
<body>
<div id="map"></div>
__LEGEND__
<script>
const mapData = __MAP_DATA__;
const map = L.map("map", { center: [20, 0], zoom: 2, minZoom: 2, worldCopyJump: false });
L.tileLayer("https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}{r}.png", {
  attribution: "&copy; OpenStreetMap contributors &copy; CARTO",
  subdomains: "abcd",
  noWrap: true
}).addTo(map);
const overlays = {};
for (const group of mapData.groups) {
  const layer = L.geoJSON(group.features, {
    style: () => ({ fillColor: group.color, color: "black", weight: 0.5, fillOpacity: 0.7 }),
    onEachFeature: (feature, target) => target.bindTooltip(feature.properties.tooltip, { sticky: true })
  }).addTo(map);
  overlays[group.label] = layer;
}
L.control.layers(null, overlays, { collapsed: false }).addTo(map);
</script>
</body>
</html>
"#;

/// Render the complete standalone HTML page.
///
/// # Arguments
/// * `table` - Cleaned countries, one per label
/// * `labels` - Cluster id per table row
/// * `summaries` - Per-cluster means shown in the legend
/// * `config` - Palette and data year
///
/// # Returns
/// * HTML document; identical inputs produce identical output
pub fn render_map(
    table: &CountryTable,
    labels: &Array1<usize>,
    summaries: &[ClusterSummary],
    config: &Config,
) -> crate::Result<String> {
    if labels.len() != table.len() {
        anyhow::bail!(
            "{} cluster labels for {} countries",
            labels.len(),
            table.len()
        );
    }
    let summary_ids = summaries.iter().map(|s| s.cluster);
    if let Some(label) = labels
        .iter()
        .copied()
        .chain(summary_ids)
        .find(|&l| l >= config.palette.len())
    {
        anyhow::bail!(
            "cluster id {label} has no palette color ({} colors)",
            config.palette.len()
        );
    }

    let map_data = build_map_data(table, labels, &config.palette);
    let map_json = serde_json::to_string(&map_data)?.replace("</", "<\\/");
    let legend = render_legend(summaries, &config.palette, &config.year.to_string())?;

    let html = PAGE_TEMPLATE
        .replace("__TITLE__", MAP_TITLE)
        .replace("__LEAFLET_CSS__", LEAFLET_CSS)
        .replace("__LEAFLET_JS__", LEAFLET_JS)
        .replace("__LEGEND__", &legend)
        .replace("__MAP_DATA__", &map_json);
    Ok(html)
}

/// One GeoJSON layer per cluster, in ascending cluster id order
pub fn build_map_data(table: &CountryTable, labels: &Array1<usize>, palette: &[String]) -> Value {
    let mut groups: BTreeMap<usize, Vec<Value>> = BTreeMap::new();
    for (country, &cluster) in table.countries.iter().zip(labels.iter()) {
        groups
            .entry(cluster)
            .or_default()
            .push(country_feature(country, cluster, &palette[cluster]));
    }

    let groups: Vec<Value> = groups
        .into_iter()
        .map(|(cluster, features)| {
            json!({
                "cluster": cluster,
                "label": format!("Cluster {cluster}"),
                "color": palette[cluster],
                "features": {
                    "type": "FeatureCollection",
                    "features": features,
                },
            })
        })
        .collect();
    json!({ "groups": groups })
}

fn country_feature(country: &CountryRecord, cluster: usize, color: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert("iso_a3".into(), json!(country.code));
    properties.insert("name".into(), json!(country.name));
    properties.insert("cluster".into(), json!(cluster));
    properties.insert("fill".into(), json!(color));
    for indicator in Indicator::ALL {
        properties.insert(indicator.column().into(), json!(country.value(indicator)));
    }
    properties.insert("tooltip".into(), json!(tooltip_html(country, cluster)));

    json!({
        "type": "Feature",
        "id": country.code,
        "properties": properties,
        "geometry": country.geometry,
    })
}

/// Tooltip body: name, cluster id and the four formatted raw values
pub fn tooltip_html(country: &CountryRecord, cluster: usize) -> String {
    let mut html = format!(
        "<b>Country:</b> {}<br><b>Cluster ID:</b> {}",
        escape_html(&country.name),
        cluster
    );
    for indicator in Indicator::ALL {
        html.push_str(&format!(
            "<br><b>{}:</b> {}",
            indicator.label(),
            indicator.format(country.value(indicator))
        ));
    }
    html
}

/// Fixed overlay with one row of averages per non-empty cluster.
pub fn render_legend(
    summaries: &[ClusterSummary],
    palette: &[String],
    data_year: &str,
) -> crate::Result<String> {
    let mut html = String::from("<div class=\"legend\" id=\"legend\">\n");
    html.push_str("<b>Cluster Profiles (Averages)</b>\n<table>\n<tr><th>ID</th><th>n</th>");
    for indicator in Indicator::ALL {
        html.push_str(&format!("<th>{}</th>", indicator.short_label()));
    }
    html.push_str("</tr>\n");

    for summary in summaries {
        html.push_str(&legend_row(summary, &palette[summary.cluster]));
        html.push('\n');
    }
    html.push_str("</table>\n");

    html.push_str(&format!(
        "<div class=\"chart\">{}</div>\n",
        cluster_size_chart(summaries, palette)?
    ));
    html.push_str(&format!(
        "<small>Data year: {}. Countries with incomplete data are not shown.</small>\n",
        escape_html(data_year)
    ));
    html.push_str("</div>");
    Ok(html)
}

/// Legend table row for one cluster
pub fn legend_row(summary: &ClusterSummary, color: &str) -> String {
    let mut row = format!(
        "<tr data-cluster=\"{id}\"><td><span class=\"swatch\" style=\"background:{color}\"></span>\
         <b style=\"color:{color}\">{id}</b></td><td>{size}</td>",
        id = summary.cluster,
        size = summary.size,
    );
    for indicator in Indicator::ALL {
        row.push_str(&format!("<td>{}</td>", indicator.format(summary.mean(indicator))));
    }
    row.push_str("</tr>");
    row
}

/// Bar chart of cluster sizes as an inline SVG, bars in legend order
pub fn cluster_size_chart(
    summaries: &[ClusterSummary],
    palette: &[String],
) -> crate::Result<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE)?;

        let max_size = summaries.iter().map(|s| s.size).max().unwrap_or(1).max(1) as f64;
        let n_bars = summaries.len().max(1) as f64;
        let mut chart = ChartBuilder::on(&root)
            .margin(4)
            .build_cartesian_2d(0f64..n_bars, 0f64..(max_size * 1.05))?;

        for (i, summary) in summaries.iter().enumerate() {
            let color = parse_hex_color(&palette[summary.cluster]).unwrap_or(BLACK);
            chart.draw_series(std::iter::once(Rectangle::new(
                [(i as f64 + 0.1, 0.0), (i as f64 + 0.9, summary.size as f64)],
                color.filled(),
            )))?;
        }

        root.present()?;
    }
    Ok(svg)
}

/// `#rrggbb` to an RGB color
pub fn parse_hex_color(color: &str) -> Option<RGBColor> {
    if !is_hex_color(color) {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&color[range], 16).ok();
    Some(RGBColor(channel(1..3)?, channel(3..5)?, channel(5..7)?))
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
