use crate::census::CensusApi;
use crate::plan::{Action, ActionType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const DEFAULT_DATASET: &str = "acs/acs5";
const DEFAULT_YEAR: u16 = 2023;
const DEFAULT_GROUP: &str = "B01001";

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("oracle request failed: {0}")]
    Request(String),
    #[error("oracle returned an unusable proposal: {0}")]
    InvalidProposal(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub prompt: String,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub year: Option<u16>,
    /// Variable group used to gather availability evidence.
    #[serde(default)]
    pub group: Option<String>,
}

/// Variable-availability counts backing the proposal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEvidence {
    pub dataset: String,
    pub year: u16,
    pub variable_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanProposal {
    /// Actions ready to be submitted for validation and execution.
    pub draft_actions: Vec<Action>,
    /// Oracle suggestions that did not map to an executable action type.
    pub unresolved: Vec<String>,
    pub confidence: f64,
    pub evidence: Vec<PlanEvidence>,
}

/// What the oracle is asked to return, before the planner filters it into
/// executable drafts and unresolved leftovers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleProposal {
    #[serde(default)]
    pub actions: Vec<Value>,
    #[serde(default)]
    pub unresolved: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// Port for the model call that drafts a plan from a prompt. Injected so
/// tests substitute a canned oracle.
pub trait PlanOracle: Send + Sync {
    fn propose(&self, prompt: &str, evidence: &[PlanEvidence]) -> Result<OracleProposal, PlannerError>;
}

/// Gathers upstream evidence, asks the oracle for a draft, and splits the
/// answer into executable actions versus unresolved suggestions. Confidence
/// is clamped into [0, 1].
pub fn propose_plan(
    oracle: &dyn PlanOracle,
    census: &dyn CensusApi,
    request: &PlanRequest,
) -> Result<PlanProposal, PlannerError> {
    let dataset = request.dataset.as_deref().unwrap_or(DEFAULT_DATASET);
    let year = request.year.unwrap_or(DEFAULT_YEAR);
    let group = request.group.as_deref().unwrap_or(DEFAULT_GROUP);

    // A flaky evidence lookup degrades to a zero count rather than failing
    // the whole proposal.
    let variable_count = census
        .group_variable_count(dataset, year, group)
        .unwrap_or(0);
    let evidence = vec![PlanEvidence {
        dataset: dataset.to_string(),
        year,
        variable_count,
    }];

    let proposal = oracle.propose(&request.prompt, &evidence)?;

    let mut draft_actions = Vec::new();
    let mut unresolved = proposal.unresolved;
    for (index, raw) in proposal.actions.into_iter().enumerate() {
        match parse_draft_action(&raw, index) {
            Some(action) => draft_actions.push(action),
            None => unresolved.push(raw.to_string()),
        }
    }

    Ok(PlanProposal {
        draft_actions,
        unresolved,
        confidence: proposal.confidence.clamp(0.0, 1.0),
        evidence,
    })
}

fn parse_draft_action(raw: &Value, index: usize) -> Option<Action> {
    let object = raw.as_object()?;
    let action_type = ActionType::parse(object.get("type")?.as_str()?)?;
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("a{}", index + 1));
    let payload = object
        .get("payload")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    Some(Action {
        id,
        action_type,
        payload,
    })
}

/// Chat-completions oracle. Sends the prompt plus evidence and expects one
/// JSON object back in the first choice's message content.
pub struct HttpPlanOracle {
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatEnvelope {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpPlanOracle {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn instructions() -> &'static str {
        "You draft data-import plans. Reply with one JSON object: \
         {\"actions\": [{\"type\": \"import_census_stat\"|\"create_derived_stat\"|\"create_family_links\"|\"research\", \"payload\": {...}}], \
         \"unresolved\": [string], \"confidence\": number between 0 and 1}. \
         Propose only additive actions; never propose deleting or modifying existing data."
    }
}

impl PlanOracle for HttpPlanOracle {
    fn propose(&self, prompt: &str, evidence: &[PlanEvidence]) -> Result<OracleProposal, PlannerError> {
        let mut user = Map::new();
        user.insert("prompt".to_string(), json!(prompt));
        user.insert("evidence".to_string(), json!(evidence));

        let body = json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": Self::instructions() },
                { "role": "user", "content": Value::Object(user).to_string() },
            ],
        });

        let url = format!("{}/chat/completions", self.base_url);
        let envelope: ChatEnvelope = ureq::post(&url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body)
            .map_err(|err| PlannerError::Request(err.to_string()))?
            .into_json()
            .map_err(|err| PlannerError::Request(err.to_string()))?;

        let content = envelope
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| PlannerError::InvalidProposal("no choices returned".to_string()))?;
        serde_json::from_str(content)
            .map_err(|err| PlannerError::InvalidProposal(err.to_string()))
    }
}
