use super::{
    FamilyLink, StatRecord, StatRow, StatStore, StatSummary, StoreError, TRANSACT_BATCH_SIZE,
};
use crate::config::StoreCredentials;
use serde::Deserialize;
use serde_json::{json, Map, Value};

const STATS_NAMESPACE: &str = "stats";
const ROWS_NAMESPACE: &str = "statRows";
const SUMMARIES_NAMESPACE: &str = "statSummaries";
const LINKS_NAMESPACE: &str = "familyLinks";

/// ureq client over the document store's admin HTTP API: `POST /query` with
/// a filter document, `POST /transact` with upsert steps.
#[derive(Debug, Clone)]
pub struct HttpStatStore {
    base_url: String,
    app_id: String,
    admin_token: String,
}

#[derive(Debug, Deserialize)]
struct QueryEnvelope {
    #[serde(default)]
    entities: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct TransactEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl HttpStatStore {
    pub fn new(credentials: &StoreCredentials) -> Self {
        Self {
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
            app_id: credentials.app_id.clone(),
            admin_token: credentials.admin_token.clone(),
        }
    }

    fn post(&self, path: &str, body: Value) -> Result<Value, StoreError> {
        let url = format!("{}/{path}", self.base_url);
        let response = ureq::post(&url)
            .set("Authorization", &format!("Bearer {}", self.admin_token))
            .set("X-App-Id", &self.app_id)
            .send_json(body)
            .map_err(|err| StoreError::Request(err.to_string()))?;
        response
            .into_json::<Value>()
            .map_err(|err| StoreError::Response(err.to_string()))
    }

    fn query(&self, namespace: &str, filter: Value) -> Result<Vec<Map<String, Value>>, StoreError> {
        let body = json!({
            "namespace": namespace,
            "where": filter,
        });
        let raw = self.post("query", body)?;
        let envelope: QueryEnvelope =
            serde_json::from_value(raw).map_err(|err| StoreError::Response(err.to_string()))?;
        Ok(envelope.entities)
    }

    fn transact(&self, namespace: &str, entities: Vec<Value>) -> Result<(), StoreError> {
        for chunk in entities.chunks(TRANSACT_BATCH_SIZE) {
            let steps = chunk
                .iter()
                .map(|entity| json!(["merge", namespace, entity["id"], entity]))
                .collect::<Vec<_>>();
            let raw = self.post("transact", json!({ "steps": steps }))?;
            let envelope: TransactEnvelope =
                serde_json::from_value(raw).map_err(|err| StoreError::Response(err.to_string()))?;
            if !envelope.ok {
                return Err(StoreError::Transact(
                    envelope
                        .error
                        .unwrap_or_else(|| "transact failed".to_string()),
                ));
            }
        }
        Ok(())
    }

    fn parse_stats(entities: Vec<Map<String, Value>>) -> Result<Vec<StatRecord>, StoreError> {
        entities
            .into_iter()
            .map(|entity| {
                serde_json::from_value(Value::Object(entity))
                    .map_err(|err| StoreError::Response(err.to_string()))
            })
            .collect()
    }
}

impl StatStore for HttpStatStore {
    fn find_stats_by_external_ids(&self, ids: &[String]) -> Result<Vec<StatRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let entities = self.query(STATS_NAMESPACE, json!({ "externalId": { "in": ids } }))?;
        Self::parse_stats(entities)
    }

    fn find_stats_by_names(&self, names: &[String]) -> Result<Vec<StatRecord>, StoreError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let entities = self.query(STATS_NAMESPACE, json!({ "name": { "in": names } }))?;
        Self::parse_stats(entities)
    }

    fn get_stat(&self, stat_id: &str) -> Result<Option<StatRecord>, StoreError> {
        let entities = self.query(STATS_NAMESPACE, json!({ "id": stat_id }))?;
        Ok(Self::parse_stats(entities)?.into_iter().next())
    }

    fn rows_for_stat(&self, stat_id: &str) -> Result<Vec<StatRow>, StoreError> {
        let entities = self.query(ROWS_NAMESPACE, json!({ "statId": stat_id }))?;
        entities
            .into_iter()
            .map(|entity| {
                serde_json::from_value(Value::Object(entity))
                    .map_err(|err| StoreError::Response(err.to_string()))
            })
            .collect()
    }

    fn create_stat(&self, stat: &StatRecord) -> Result<(), StoreError> {
        let entity =
            serde_json::to_value(stat).map_err(|err| StoreError::Response(err.to_string()))?;
        self.transact(STATS_NAMESPACE, vec![entity])
    }

    fn merge_rows(&self, rows: &[StatRow]) -> Result<(), StoreError> {
        let entities = rows
            .iter()
            .map(|row| serde_json::to_value(row).map_err(|e| StoreError::Response(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        self.transact(ROWS_NAMESPACE, entities)
    }

    fn upsert_summaries(&self, summaries: &[StatSummary]) -> Result<(), StoreError> {
        let entities = summaries
            .iter()
            .map(|s| serde_json::to_value(s).map_err(|e| StoreError::Response(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        self.transact(SUMMARIES_NAMESPACE, entities)
    }

    fn existing_family_links(
        &self,
        parent_id: &str,
        child_ids: &[String],
    ) -> Result<Vec<FamilyLink>, StoreError> {
        if child_ids.is_empty() {
            return Ok(Vec::new());
        }
        let entities = self.query(
            LINKS_NAMESPACE,
            json!({ "parentId": parent_id, "childId": { "in": child_ids } }),
        )?;
        entities
            .into_iter()
            .map(|entity| {
                serde_json::from_value(Value::Object(entity))
                    .map_err(|err| StoreError::Response(err.to_string()))
            })
            .collect()
    }

    fn insert_family_links(&self, links: &[FamilyLink]) -> Result<(), StoreError> {
        let entities = links
            .iter()
            .map(|l| serde_json::to_value(l).map_err(|e| StoreError::Response(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        self.transact(LINKS_NAMESPACE, entities)
    }
}
