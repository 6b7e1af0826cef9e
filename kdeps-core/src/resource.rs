//! Resource declarations and result records (§3).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::UnresolvedRef;

/// One of the five leaf kinds a resource's `run` may declare.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Exec,
    Python,
    #[serde(rename = "httpclient")]
    HttpClient,
    Llm,
    #[serde(rename = "apiresponse")]
    ApiResponse,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Exec => "exec",
            ResourceKind::Python => "python",
            ResourceKind::HttpClient => "httpclient",
            ResourceKind::Llm => "llm",
            ResourceKind::ApiResponse => "apiresponse",
        }
    }
}

/// Tool advertised to the LLM handler: name, description, parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The kind-specific payload of a resource's `run` block, still containing
/// unresolved `@(...)` reference text in string fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunSpec {
    Exec {
        command: String,
        #[serde(default)]
        env: HashMap<String, String>,
        /// Fire-and-forget mode (§4.3): the handler returns immediately with an empty
        /// record and a supervisory task logs the eventual outcome. Never used for a
        /// dependency of another resource (enforced by the executor, not this type).
        #[serde(default)]
        background: bool,
    },
    Python {
        script: String,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        environment: Option<String>,
        #[serde(default)]
        background: bool,
    },
    #[serde(rename = "httpclient")]
    HttpClient {
        method: String,
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        data: Vec<String>,
        #[serde(default)]
        params: HashMap<String, String>,
    },
    Llm {
        model: String,
        prompt: String,
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        json_response: bool,
        #[serde(default)]
        json_response_keys: Vec<String>,
        #[serde(default)]
        tools: Vec<LlmTool>,
    },
    #[serde(rename = "apiresponse")]
    ApiResponse {
        #[serde(default)]
        success: bool,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        properties: HashMap<String, Value>,
        #[serde(default)]
        data: Vec<Value>,
    },
}

impl RunSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            RunSpec::Exec { .. } => ResourceKind::Exec,
            RunSpec::Python { .. } => ResourceKind::Python,
            RunSpec::HttpClient { .. } => ResourceKind::HttpClient,
            RunSpec::Llm { .. } => ResourceKind::Llm,
            RunSpec::ApiResponse { .. } => ResourceKind::ApiResponse,
        }
    }
}

/// Request-gating filters evaluated per request (§9 open question: per-request, not
/// once at plan time, to match the request-scoped evaluator).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestGate {
    #[serde(default)]
    pub restrict_to_http_methods: Vec<String>,
    #[serde(default)]
    pub restrict_to_routes: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub allowed_params: Vec<String>,
}

impl RequestGate {
    pub fn is_empty(&self) -> bool {
        self.restrict_to_http_methods.is_empty()
            && self.restrict_to_routes.is_empty()
            && self.allowed_headers.is_empty()
            && self.allowed_params.is_empty()
    }
}

/// A parsed resource declaration (§3), still containing unresolved `@(...)` text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub action_id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires: Vec<String>,
    pub run: Option<RunSpec>,
    #[serde(default)]
    pub skip_condition: Vec<String>,
    #[serde(default)]
    pub preflight_check: Vec<String>,
    #[serde(default)]
    pub timeout_duration: Option<u64>,
    #[serde(default)]
    pub gate: RequestGate,
}

impl ResourceDecl {
    /// Parses each `requires` entry into its unresolved short/full form.
    pub fn requires_refs(&self) -> Result<Vec<UnresolvedRef>, crate::action::VersionError> {
        self.requires
            .iter()
            .map(|s| crate::action::parse_ref(s))
            .collect()
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_duration {
            None | Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        }
    }
}

/// The HTTPClient handler's captured response (§3: `response{headers, body}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Per-kind payload of a committed result record (§3 table).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResultPayload {
    Exec {
        command: String,
        env: HashMap<String, String>,
        stdout: String,
        stderr: String,
        exit_code: i32,
        file: Option<String>,
    },
    Python {
        script: String,
        env: HashMap<String, String>,
        stdout: String,
        stderr: String,
        exit_code: i32,
        file: Option<String>,
    },
    #[serde(rename = "httpclient")]
    HttpClient {
        method: String,
        url: String,
        headers: HashMap<String, String>,
        data: Vec<String>,
        params: HashMap<String, String>,
        response: HttpResponse,
        file: Option<String>,
    },
    Llm {
        model: String,
        prompt: String,
        role: Option<String>,
        json_response: bool,
        json_response_keys: Vec<String>,
        tools: Vec<LlmTool>,
        response: String,
        file: Option<String>,
    },
    #[serde(rename = "apiresponse")]
    ApiResponse {
        success: bool,
        headers: HashMap<String, String>,
        properties: HashMap<String, Value>,
        data: Vec<Value>,
        errors: Vec<ApiError>,
    },
    /// Written instead of a handler outcome when a skip/request-gate applies (§4.2 step 2–3).
    Skipped { reason: String },
    /// Written when a `preflightCheck` validation fails (§4.2 step 4); the plan stops
    /// after this unless the declaring resource is of kind APIResponse.
    PreflightFailed { predicate: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub action_id: Option<String>,
}

impl ResultPayload {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResultPayload::Exec { .. } => ResourceKind::Exec,
            ResultPayload::Python { .. } => ResourceKind::Python,
            ResultPayload::HttpClient { .. } => ResourceKind::HttpClient,
            ResultPayload::Llm { .. } => ResourceKind::Llm,
            ResultPayload::ApiResponse { .. } => ResourceKind::ApiResponse,
            // Skipped markers are filed under the kind of the resource that produced them
            // by the caller (the executor knows the declared kind); this variant alone
            // carries no kind of its own.
            ResultPayload::Skipped { .. } => ResourceKind::ApiResponse,
            ResultPayload::PreflightFailed { .. } => ResourceKind::ApiResponse,
        }
    }

    pub fn field(&self, leaf: &str) -> Option<Value> {
        let v = serde_json::to_value(self).ok()?;
        leaf.split('.').try_fold(v, |acc, seg| acc.get(seg).cloned())
    }
}

/// Committed store entry: common envelope plus kind-specific payload (§3, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub timeout_duration: Option<u64>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub payload: ResultPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_spec_kind_matches_variant() {
        let spec = RunSpec::Exec {
            command: "echo hi".into(),
            env: HashMap::new(),
            background: false,
        };
        assert_eq!(spec.kind(), ResourceKind::Exec);
    }

    #[test]
    fn result_payload_field_lookup_nested() {
        let payload = ResultPayload::HttpClient {
            method: "GET".into(),
            url: "http://x".into(),
            headers: HashMap::new(),
            data: vec![],
            params: HashMap::new(),
            response: HttpResponse {
                headers: HashMap::new(),
                body: "body-text".into(),
            },
            file: None,
        };
        assert_eq!(
            payload.field("response.body"),
            Some(Value::String("body-text".into()))
        );
    }

    #[test]
    fn timeout_zero_means_no_local_deadline() {
        let decl = ResourceDecl {
            action_id: "a".into(),
            name: "a".into(),
            category: "test".into(),
            description: String::new(),
            requires: vec![],
            run: None,
            skip_condition: vec![],
            preflight_check: vec![],
            timeout_duration: Some(0),
            gate: RequestGate::default(),
        };
        assert_eq!(decl.timeout(), None);
    }
}
