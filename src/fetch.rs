//! World Bank indicator queries and the country boundary dataset

use std::collections::HashSet;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::config::{Config, Indicator, YearSelection};
use crate::error::PipelineError;

const PER_PAGE: usize = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Property keys that may carry the ISO 3166-1 alpha-3 code, in priority order.
const CODE_KEYS: [&str; 4] = ["iso_a3", "adm0_a3", "iso_3", "id"];
const NAME_KEYS: [&str; 3] = ["name", "admin", "name_long"];

// ============================================================================
// Fetched records
// ============================================================================

/// One country's value for one indicator; `value` is `None` when unreported.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorObservation {
    pub country_code: String,
    pub country_name: String,
    pub value: Option<f64>,
}

/// All observations of a single indicator, one per country code.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub indicator: Indicator,
    pub observations: Vec<IndicatorObservation>,
}

/// A country polygon from the boundary dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    pub country_code: String,
    pub name: String,
    /// GeoJSON geometry object (`Polygon` or `MultiPolygon`).
    pub geometry: Value,
}

// ============================================================================
// World Bank response types
// ============================================================================

/// Paging header of a World Bank response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageMeta {
    #[serde(deserialize_with = "number_or_string")]
    pub page: u32,
    #[serde(deserialize_with = "number_or_string")]
    pub pages: u32,
    #[serde(default, deserialize_with = "number_or_string")]
    pub total: u32,
}

#[derive(Deserialize)]
struct ApiRef {
    #[serde(default)]
    id: String,
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
struct ApiObservation {
    country: ApiRef,
    #[serde(default)]
    countryiso3code: String,
    value: Option<f64>,
}

/// The API reports some header fields as numbers and others as strings.
fn number_or_string<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Parse one page of an indicator query.
///
/// Returns the paging header and the observations with a usable country code.
pub fn parse_indicator_page(body: &str) -> crate::Result<(PageMeta, Vec<IndicatorObservation>)> {
    let parsed: Value = serde_json::from_str(body)?;
    let parts = parsed
        .as_array()
        .ok_or_else(|| PipelineError::Api("expected a JSON array".to_string()))?;

    let header = parts
        .first()
        .ok_or_else(|| PipelineError::Api("empty response".to_string()))?;
    if let Some(message) = header.get("message") {
        return Err(PipelineError::Api(api_message(message)).into());
    }
    let meta: PageMeta = serde_json::from_value(header.clone())?;

    let rows = match parts.get(1) {
        None | Some(Value::Null) => Vec::new(),
        Some(rows) => serde_json::from_value::<Vec<ApiObservation>>(rows.clone())?,
    };

    let observations = rows
        .into_iter()
        .filter_map(|row| {
            let code = if row.countryiso3code.trim().is_empty() {
                row.country.id.trim().to_string()
            } else {
                row.countryiso3code.trim().to_string()
            };
            if code.len() != 3 {
                return None;
            }
            Some(IndicatorObservation {
                country_code: code.to_ascii_uppercase(),
                country_name: row.country.value,
                value: row.value.filter(|v| v.is_finite()),
            })
        })
        .collect();

    Ok((meta, observations))
}

fn api_message(message: &Value) -> String {
    let parts: Vec<String> = message
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let key = item.get("key").and_then(Value::as_str).unwrap_or("error");
                    item.get("value")
                        .and_then(Value::as_str)
                        .map(|value| format!("{key}: {value}"))
                })
                .collect()
        })
        .unwrap_or_default();
    if parts.is_empty() {
        message.to_string()
    } else {
        parts.join("; ")
    }
}

/// Read every page of one indicator query from `fetch_page`.
///
/// Stops once the page counter reaches the `pages` header, whatever page
/// number the server echoes back. A country repeated on a later page keeps
/// its first observation.
pub fn collect_pages<F>(
    indicator: Indicator,
    mut fetch_page: F,
) -> crate::Result<Vec<IndicatorObservation>>
where
    F: FnMut(u32) -> crate::Result<String>,
{
    let mut seen = HashSet::new();
    let mut observations = Vec::new();
    let mut page = 1;
    loop {
        let body = fetch_page(page)?;
        let (meta, rows) = parse_indicator_page(&body)?;
        tracing::debug!(
            "{}: page {}/{} with {} rows",
            indicator.code(),
            page,
            meta.pages,
            rows.len()
        );
        observations.extend(rows.into_iter().filter(|o| seen.insert(o.country_code.clone())));
        if page >= meta.pages {
            break;
        }
        page += 1;
    }
    Ok(observations)
}

// ============================================================================
// Boundary dataset
// ============================================================================

/// Parse a GeoJSON `FeatureCollection` of country polygons.
///
/// Features without a geometry or a usable alpha-3 code are skipped, as is
/// Antarctica. When a code repeats the first feature wins.
pub fn parse_boundaries(body: &str) -> crate::Result<Vec<Boundary>> {
    let collection: Value = serde_json::from_str(body)?;
    let features = collection
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::Api("boundary dataset has no features array".to_string()))?;

    let mut seen = HashSet::new();
    let mut boundaries = Vec::with_capacity(features.len());
    for feature in features {
        let geometry = match feature.get("geometry") {
            Some(g) if g.is_object() => g.clone(),
            _ => continue,
        };
        let properties = lowercase_keys(feature.get("properties").and_then(Value::as_object));

        let name = NAME_KEYS
            .iter()
            .find_map(|key| properties.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        if name.eq_ignore_ascii_case("antarctica") {
            continue;
        }

        let Some(code) = feature_code(&properties, feature.get("id")) else {
            tracing::debug!("Skipping boundary without a country code: {name:?}");
            continue;
        };
        if !seen.insert(code.clone()) {
            tracing::debug!("Skipping duplicate boundary for {code}");
            continue;
        }

        boundaries.push(Boundary {
            country_code: code,
            name,
            geometry,
        });
    }
    Ok(boundaries)
}

fn lowercase_keys(properties: Option<&Map<String, Value>>) -> Map<String, Value> {
    properties
        .map(|props| {
            props
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn feature_code(properties: &Map<String, Value>, feature_id: Option<&Value>) -> Option<String> {
    CODE_KEYS
        .iter()
        .filter_map(|key| properties.get(*key))
        .chain(feature_id)
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|code| code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()))
        .map(str::to_ascii_uppercase)
}

// ============================================================================
// HTTP client
// ============================================================================

/// Blocking client for the World Bank API and the boundary dataset.
pub struct DataFetcher {
    client: Client,
    api_base: String,
}

impl DataFetcher {
    pub fn new(api_base: impl Into<String>) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch every indicator named in `Indicator::ALL`.
    pub fn fetch_indicators(&self, year: YearSelection) -> crate::Result<Vec<IndicatorSeries>> {
        Indicator::ALL
            .iter()
            .map(|&indicator| self.fetch_indicator(indicator, year))
            .collect()
    }

    /// Fetch one indicator for all countries, following the response paging.
    pub fn fetch_indicator(
        &self,
        indicator: Indicator,
        year: YearSelection,
    ) -> crate::Result<IndicatorSeries> {
        let url = format!(
            "{}/country/all/indicator/{}",
            self.api_base,
            indicator.code()
        );
        let (year_key, year_value) = year.query_param();

        let observations = collect_pages(indicator, |page| {
            let query = [
                ("format", "json".to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
                (year_key, year_value.clone()),
            ];
            self.get_text(&url, &query)
        })?;

        tracing::info!(
            "Fetched {} ({}): {} countries, {} with a value",
            indicator.label(),
            year,
            observations.len(),
            observations.iter().filter(|o| o.value.is_some()).count()
        );
        Ok(IndicatorSeries {
            indicator,
            observations,
        })
    }

    /// Fetch and parse the boundary GeoJSON.
    pub fn fetch_boundaries(&self, url: &str) -> crate::Result<Vec<Boundary>> {
        let body = self.get_text(url, &[])?;
        let boundaries = parse_boundaries(&body)?;
        tracing::info!("Fetched {} country boundaries", boundaries.len());
        Ok(boundaries)
    }

    fn get_text(&self, url: &str, query: &[(&str, String)]) -> crate::Result<String> {
        let network = |source: reqwest::Error| PipelineError::Network {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).query(query).send().map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PipelineError::Api(format!(
                "{url} returned status={status}, body={}",
                body.chars().take(200).collect::<String>()
            ))
            .into());
        }
        Ok(response.text().map_err(network)?)
    }
}

/// Fetch everything a run needs: four indicator series and the boundaries.
pub fn fetch_all(config: &Config) -> crate::Result<(Vec<IndicatorSeries>, Vec<Boundary>)> {
    let fetcher = DataFetcher::new(config.api_base.clone())?;
    let boundaries = fetcher.fetch_boundaries(&config.boundaries_url)?;
    let series = fetcher.fetch_indicators(config.year)?;
    Ok((series, boundaries))
}
