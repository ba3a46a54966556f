// src/fetch/bea.rs
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::http_client;
use crate::error::BuildError;
use crate::geo::{GeoLevel, GeoTable, GeoTableBuilder};

pub const BEA_API_URL: &str = "https://apps.bea.gov/api/data";

/// Metro-area price parities, requested with `GeoFips=MSA`.
pub const METRO_TABLE: &str = "MARPP";
/// State price parities, requested with `GeoFips=STATE`.
pub const STATE_TABLE: &str = "SARPP";

/// One observation from a `GetData` response.
#[derive(Clone, Debug, PartialEq)]
pub struct BeaDatum {
    pub geo_fips: String,
    pub line_code: String,
    pub data_value: String,
}

pub struct BeaClient {
    client: Client,
    api_key: String,
    base: Url,
}

impl BeaClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(BeaClient {
            client: http_client(timeout)?,
            api_key: api_key.into(),
            base: Url::parse(BEA_API_URL)?,
        })
    }

    async fn call(&self, table: &str, params: &[(&str, &str)]) -> Result<Value> {
        let mut query: Vec<(&str, &str)> = vec![
            ("UserID", self.api_key.as_str()),
            ("datasetname", "Regional"),
            ("ResultFormat", "json"),
        ];
        query.extend_from_slice(params);

        let body = self
            .client
            .get(self.base.clone())
            .query(&query)
            .send()
            .await
            .with_context(|| format!("GET {} ({})", self.base, table))?
            .error_for_status()
            .with_context(|| format!("Non-success status for {}", table))?
            .text()
            .await
            .with_context(|| format!("reading body for {}", table))?;

        serde_json::from_str(&body).map_err(|e| {
            BuildError::UnrecognizedResponse {
                table: table.to_string(),
                detail: format!("body is not JSON: {}", e),
            }
            .into()
        })
    }

    /// `GetData` for one table, every line code.
    #[instrument(level = "info", skip(self))]
    pub async fn get_data(&self, table: &str, year: u16, geo_fips: &str) -> Result<Vec<BeaDatum>> {
        let year = year.to_string();
        let body = self
            .call(
                table,
                &[
                    ("method", "GetData"),
                    ("TableName", table),
                    ("Year", year.as_str()),
                    ("GeoFips", geo_fips),
                    ("LineCode", "*"),
                ],
            )
            .await?;
        let data = parse_data(table, &body)?;
        info!(records = data.len(), "fetched");
        Ok(data)
    }

    /// `GetParameterValuesFiltered` for one parameter of `table`:
    /// (key, description) pairs.
    #[instrument(level = "info", skip(self))]
    pub async fn parameter_values(&self, table: &str, parameter: &str) -> Result<Vec<(String, String)>> {
        let body = self
            .call(
                table,
                &[
                    ("method", "GetParameterValuesFiltered"),
                    ("TargetParameter", parameter),
                    ("TableName", table),
                ],
            )
            .await?;
        parse_param_values(table, &body)
    }

    pub async fn line_codes(&self, table: &str) -> Result<Vec<(String, String)>> {
        self.parameter_values(table, "LineCode").await
    }

    /// Release years `table` is published for.
    pub async fn years(&self, table: &str) -> Result<Vec<(String, String)>> {
        self.parameter_values(table, "Year").await
    }
}

/// Most recent numeric year among parameter values; "LAST5"-style keys are ignored.
pub fn latest_year(values: &[(String, String)]) -> Option<u16> {
    values.iter().filter_map(|(key, _)| key.parse().ok()).max()
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `BEAAPI.Results`, or a fatal error if the source reported one or the
/// envelope is not what we expect.
fn results<'a>(table: &str, body: &'a Value) -> Result<&'a Value> {
    let unrecognized = |detail: String| BuildError::UnrecognizedResponse {
        table: table.to_string(),
        detail,
    };
    let api = body
        .get("BEAAPI")
        .ok_or_else(|| unrecognized("no BEAAPI envelope".into()))?;

    // errors show up either at the envelope or inside Results
    let results = api.get("Results");
    let error = api
        .get("Error")
        .or_else(|| results.and_then(|r| r.get("Error")));
    if let Some(err) = error {
        let message = err
            .get("APIErrorDescription")
            .and_then(scalar_to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(BuildError::Upstream {
            table: table.to_string(),
            message,
        }
        .into());
    }

    let results = results.ok_or_else(|| unrecognized("no Results".into()))?;
    // some methods wrap Results in a one-element array
    match results {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| unrecognized("empty Results".into()).into()),
        other => Ok(other),
    }
}

/// Pull observations out of a `GetData` body. Entries without a geo code or
/// line code are dropped; values are kept raw for the geo builder to judge.
pub fn parse_data(table: &str, body: &Value) -> Result<Vec<BeaDatum>> {
    let results = results(table, body)?;
    let data = results.get("Data").and_then(Value::as_array).ok_or_else(|| {
        let keys = results
            .as_object()
            .map(|o| o.keys().cloned().collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        BuildError::UnrecognizedResponse {
            table: table.to_string(),
            detail: format!("no Data array (keys: {})", keys),
        }
    })?;

    let mut out = Vec::with_capacity(data.len());
    let mut dropped = 0usize;
    for item in data {
        let geo_fips = item.get("GeoFips").and_then(scalar_to_string);
        // `LineCode` when present, else the suffix of `Code` ("MARPP-3")
        let line_code = item.get("LineCode").and_then(scalar_to_string).or_else(|| {
            item.get("Code")
                .and_then(Value::as_str)
                .and_then(|c| c.rsplit_once('-'))
                .map(|(_, n)| n.trim().to_string())
        });
        let data_value = item
            .get("DataValue")
            .and_then(scalar_to_string)
            .unwrap_or_default();
        match (geo_fips, line_code) {
            (Some(geo_fips), Some(line_code)) => out.push(BeaDatum {
                geo_fips,
                line_code,
                data_value,
            }),
            _ => {
                debug!(table, ?item, "observation without geo or line code");
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        warn!(table, dropped, "dropped incomplete observations");
    }
    Ok(out)
}

pub fn parse_param_values(table: &str, body: &Value) -> Result<Vec<(String, String)>> {
    let results = results(table, body)?;
    let values = results
        .get("ParamValue")
        .and_then(Value::as_array)
        .ok_or_else(|| BuildError::UnrecognizedResponse {
            table: table.to_string(),
            detail: "no ParamValue array".into(),
        })?;
    Ok(values
        .iter()
        .filter_map(|v| {
            let key = v.get("Key").and_then(scalar_to_string)?;
            let desc = v
                .get("Desc")
                .and_then(scalar_to_string)
                .unwrap_or_default();
            Some((key, desc))
        })
        .collect())
}

/// Feed observations of one table into the builder.
pub fn add_to_builder(builder: &mut GeoTableBuilder, level: GeoLevel, data: &[BeaDatum]) {
    for d in data {
        builder.add(level, &d.geo_fips, &d.line_code, &d.data_value);
    }
}

/// Fetch the metro and state tables for `year` and build the lookup.
pub async fn fetch_geo_table(bea: &BeaClient, year: u16) -> Result<GeoTable> {
    let metro = bea.get_data(METRO_TABLE, year, "MSA").await?;
    let state = bea.get_data(STATE_TABLE, year, "STATE").await?;

    let mut builder = GeoTable::builder();
    add_to_builder(&mut builder, GeoLevel::Metro, &metro);
    add_to_builder(&mut builder, GeoLevel::State, &state);
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_data_with_line_code_or_code_suffix() -> Result<()> {
        let body = json!({
            "BEAAPI": {
                "Request": {},
                "Results": {
                    "Statistic": "RPP",
                    "Data": [
                        {"Code": "MARPP-1", "GeoFips": "12420", "GeoName": "Austin", "TimePeriod": "2024", "DataValue": "95.8"},
                        {"LineCode": 3, "GeoFips": "12420", "DataValue": "(NA)"},
                        {"Code": "MARPP-2", "DataValue": "92.4"},
                        {"Code": "SARPP", "GeoFips": "26000", "DataValue": "1,000.0"}
                    ]
                }
            }
        });
        let data = parse_data(METRO_TABLE, &body)?;
        assert_eq!(
            data,
            vec![
                BeaDatum {
                    geo_fips: "12420".into(),
                    line_code: "1".into(),
                    data_value: "95.8".into()
                },
                BeaDatum {
                    geo_fips: "12420".into(),
                    line_code: "3".into(),
                    data_value: "(NA)".into()
                },
            ]
        );

        let mut b = GeoTable::builder();
        add_to_builder(&mut b, GeoLevel::Metro, &data);
        let table = b.build();
        let austin = table.get("12420").unwrap();
        assert_eq!(austin.all, Some(95.8));
        assert_eq!(austin.housing, None);
        Ok(())
    }

    #[test]
    fn error_object_is_fatal() {
        let body = json!({
            "BEAAPI": {
                "Results": {
                    "Error": {"APIErrorCode": "3", "APIErrorDescription": "Invalid API UserId"}
                }
            }
        });
        let err = parse_data(STATE_TABLE, &body).unwrap_err();
        match err.downcast_ref::<BuildError>() {
            Some(BuildError::Upstream { table, message }) => {
                assert_eq!(table, STATE_TABLE);
                assert_eq!(message, "Invalid API UserId");
            }
            other => panic!("unexpected: {:?}", other),
        }

        let top_level = json!({"BEAAPI": {"Error": {"APIErrorDescription": "bad"}}});
        assert!(parse_data(STATE_TABLE, &top_level).is_err());
    }

    #[test]
    fn unknown_shapes_are_fatal() {
        for body in [
            json!({"nope": 1}),
            json!({"BEAAPI": {}}),
            json!({"BEAAPI": {"Results": {"Notes": []}}}),
            json!({"BEAAPI": {"Results": []}}),
        ] {
            let err = parse_data(METRO_TABLE, &body).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<BuildError>(),
                Some(BuildError::UnrecognizedResponse { .. })
            ));
        }
    }

    #[test]
    fn parses_parameter_values() -> Result<()> {
        let body = json!({
            "BEAAPI": {"Results": [{"ParamValue": [
                {"Key": "1", "Desc": "[MARPP] RPPs: All items"},
                {"Key": 3, "Desc": "[MARPP] RPPs: Services: Housing"},
                {"Desc": "no key"}
            ]}]}
        });
        let values = parse_param_values(METRO_TABLE, &body)?;
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].0, "3");
        Ok(())
    }

    #[test]
    fn picks_latest_published_year() -> Result<()> {
        let body = json!({
            "BEAAPI": {"Results": {"ParamValue": [
                {"Key": "2008", "Desc": "2008"},
                {"Key": "2023", "Desc": "2023"},
                {"Key": "LAST5", "Desc": "Last five years"},
                {"Key": 2022, "Desc": "2022"}
            ]}}
        });
        let values = parse_param_values(METRO_TABLE, &body)?;
        assert_eq!(values.len(), 4);
        assert_eq!(latest_year(&values), Some(2023));
        assert_eq!(latest_year(&[]), None);
        Ok(())
    }
}
