pub mod http;
pub mod memory;

use serde::{Deserialize, Serialize};

pub use http::HttpStatStore;
pub use memory::MemoryStatStore;

/// Writes are merged in small fixed batches so each transact call stays
/// inside the store's payload/time budget.
pub const TRANSACT_BATCH_SIZE: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),
    #[error("store response was not valid json: {0}")]
    Response(String),
    #[error("store transact rejected: {0}")]
    Transact(String),
}

/// A top-level stat record. `external_id` is the upstream identity
/// (`dataset:variable` for imports, the display name for derived stats).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatRecord {
    pub id: String,
    pub name: String,
    pub external_id: String,
    pub stat_type: String,
    pub source: String,
    pub created_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Tract,
    County,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Tract => "tract",
            Granularity::County => "county",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "tract" => Ok(Granularity::Tract),
            "county" => Ok(Granularity::County),
            other => Err(format!("unknown granularity `{other}`")),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One time-series cell. The id is derived from
/// (stat, area, period, granularity), so merging the same cell twice is
/// last-write-wins rather than a duplicate row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatRow {
    pub id: String,
    pub stat_id: String,
    pub area_id: String,
    pub granularity: Granularity,
    pub period: String,
    pub value: f64,
}

impl StatRow {
    pub fn new(
        stat_id: &str,
        area_id: &str,
        granularity: Granularity,
        period: &str,
        value: f64,
    ) -> Self {
        let id = crate::shared::ids::content_id(&[
            "row",
            stat_id,
            area_id,
            period,
            granularity.as_str(),
        ]);
        Self {
            id,
            stat_id: stat_id.to_string(),
            area_id: area_id.to_string(),
            granularity,
            period: period.to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatSummary {
    pub id: String,
    pub stat_id: String,
    pub granularity: Granularity,
    pub row_count: u64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyLink {
    pub id: String,
    pub parent_id: String,
    pub child_id: String,
    pub attribute: String,
}

impl FamilyLink {
    pub fn new(parent_id: &str, child_id: &str, attribute: &str) -> Self {
        let id = crate::shared::ids::content_id(&["link", parent_id, child_id, attribute]);
        Self {
            id,
            parent_id: parent_id.to_string(),
            child_id: child_id.to_string(),
            attribute: attribute.to_string(),
        }
    }

    pub fn composite_key(&self) -> (String, String, String) {
        (
            self.parent_id.clone(),
            self.child_id.clone(),
            self.attribute.clone(),
        )
    }
}

/// Port over the shared document store. Every transact-style call is assumed
/// atomic per invocation; nothing stronger is relied on.
pub trait StatStore: Send + Sync {
    fn find_stats_by_external_ids(&self, ids: &[String]) -> Result<Vec<StatRecord>, StoreError>;
    fn find_stats_by_names(&self, names: &[String]) -> Result<Vec<StatRecord>, StoreError>;
    fn get_stat(&self, stat_id: &str) -> Result<Option<StatRecord>, StoreError>;
    fn rows_for_stat(&self, stat_id: &str) -> Result<Vec<StatRow>, StoreError>;
    fn create_stat(&self, stat: &StatRecord) -> Result<(), StoreError>;
    /// Upsert by row id (last-write-wins). Implementations chunk into
    /// `TRANSACT_BATCH_SIZE` pieces.
    fn merge_rows(&self, rows: &[StatRow]) -> Result<(), StoreError>;
    fn upsert_summaries(&self, summaries: &[StatSummary]) -> Result<(), StoreError>;
    fn existing_family_links(
        &self,
        parent_id: &str,
        child_ids: &[String],
    ) -> Result<Vec<FamilyLink>, StoreError>;
    fn insert_family_links(&self, links: &[FamilyLink]) -> Result<(), StoreError>;
}
