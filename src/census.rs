use crate::store::Granularity;
use serde_json::Value;
use std::collections::BTreeMap;

/// Census sentinel codes (annotation values such as -666666666) sit below
/// this floor; anything at or under it is discarded along with non-finite
/// values.
pub const SENTINEL_FLOOR: f64 = -111_111_111.0;

#[derive(Debug, thiserror::Error)]
pub enum CensusError {
    #[error("census api request failed: {0}")]
    Request(String),
    #[error("census api response was not in the expected shape: {0}")]
    Response(String),
    #[error("variable `{variable}` is not available in {dataset} for {year}")]
    VariableUnavailable {
        dataset: String,
        variable: String,
        year: u16,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableMetadata {
    pub name: String,
    pub label: String,
    pub concept: String,
    pub predicate_type: String,
}

/// Port over the upstream statistical API: variable metadata, group search
/// and area-level value fetches at the two supported granularities.
pub trait CensusApi: Send + Sync {
    fn variable_metadata(
        &self,
        dataset: &str,
        year: u16,
        variable: &str,
    ) -> Result<Option<VariableMetadata>, CensusError>;

    /// Count of variables in a group that resolve for the given year; used
    /// as plan evidence, never for writes.
    fn group_variable_count(&self, dataset: &str, year: u16, group: &str)
        -> Result<u64, CensusError>;

    /// Raw per-area values for one variable at one granularity. Sentinel and
    /// non-finite filtering is the caller's business.
    fn area_values(
        &self,
        dataset: &str,
        year: u16,
        variable: &str,
        granularity: Granularity,
    ) -> Result<Vec<(String, f64)>, CensusError>;
}

/// Builds a per-area numeric map, discarding non-finite and sentinel values.
pub fn clean_area_values(raw: &[(String, f64)]) -> BTreeMap<String, f64> {
    let mut cleaned = BTreeMap::new();
    for (area, value) in raw {
        if !value.is_finite() || *value <= SENTINEL_FLOOR {
            continue;
        }
        cleaned.insert(area.clone(), *value);
    }
    cleaned
}

#[derive(Debug, Clone)]
pub struct HttpCensusApi {
    base_url: String,
    api_key: Option<String>,
}

impl HttpCensusApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
        }
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, CensusError> {
        let mut url = format!("{}/{path}", self.base_url.trim_end_matches('/'));
        let mut pairs = query
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>();
        if let Some(key) = self.api_key.as_ref() {
            pairs.push(format!("key={}", urlencoding::encode(key)));
        }
        if !pairs.is_empty() {
            url = format!("{url}?{}", pairs.join("&"));
        }
        let response = ureq::get(&url)
            .call()
            .map_err(|err| CensusError::Request(err.to_string()))?;
        response
            .into_json::<Value>()
            .map_err(|err| CensusError::Response(err.to_string()))
    }

    fn geography_clause(granularity: Granularity) -> &'static str {
        match granularity {
            Granularity::Tract => "tract:*",
            Granularity::County => "county:*",
        }
    }
}

impl CensusApi for HttpCensusApi {
    fn variable_metadata(
        &self,
        dataset: &str,
        year: u16,
        variable: &str,
    ) -> Result<Option<VariableMetadata>, CensusError> {
        let raw = self.get(&format!("{year}/{dataset}/variables.json"), &[])?;
        let Some(entry) = raw
            .get("variables")
            .and_then(|vars| vars.get(variable))
            .and_then(Value::as_object)
        else {
            return Ok(None);
        };
        let field = |key: &str| {
            entry
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Ok(Some(VariableMetadata {
            name: variable.to_string(),
            label: field("label"),
            concept: field("concept"),
            predicate_type: field("predicateType"),
        }))
    }

    fn group_variable_count(
        &self,
        dataset: &str,
        year: u16,
        group: &str,
    ) -> Result<u64, CensusError> {
        let raw = self.get(&format!("{year}/{dataset}/groups/{group}.json"), &[])?;
        let count = raw
            .get("variables")
            .and_then(Value::as_object)
            .map(|vars| vars.len() as u64)
            .unwrap_or(0);
        Ok(count)
    }

    fn area_values(
        &self,
        dataset: &str,
        year: u16,
        variable: &str,
        granularity: Granularity,
    ) -> Result<Vec<(String, f64)>, CensusError> {
        let raw = self.get(
            &format!("{year}/{dataset}"),
            &[
                ("get", variable.to_string()),
                ("for", Self::geography_clause(granularity).to_string()),
            ],
        )?;
        parse_area_table(&raw, variable)
    }
}

/// The Census values endpoint returns an array of arrays: a header row of
/// column names followed by data rows. The requested variable column carries
/// the value; every remaining column is a geography component, concatenated
/// in order to form the area id.
fn parse_area_table(raw: &Value, variable: &str) -> Result<Vec<(String, f64)>, CensusError> {
    let rows = raw
        .as_array()
        .ok_or_else(|| CensusError::Response("expected a json array of rows".to_string()))?;
    let mut iter = rows.iter();
    let header = iter
        .next()
        .and_then(Value::as_array)
        .ok_or_else(|| CensusError::Response("missing header row".to_string()))?;
    let columns = header
        .iter()
        .map(|cell| cell.as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    let value_idx = columns
        .iter()
        .position(|name| name == variable)
        .ok_or_else(|| {
            CensusError::Response(format!("variable column `{variable}` missing from header"))
        })?;

    let mut out = Vec::new();
    for row in iter {
        let Some(cells) = row.as_array() else {
            continue;
        };
        let mut area_parts = Vec::new();
        let mut value = f64::NAN;
        for (idx, cell) in cells.iter().enumerate() {
            let text = cell.as_str().unwrap_or_default();
            if idx == value_idx {
                value = text.parse::<f64>().unwrap_or(f64::NAN);
            } else {
                area_parts.push(text);
            }
        }
        if area_parts.is_empty() {
            continue;
        }
        out.push((area_parts.join(""), value));
    }
    Ok(out)
}
