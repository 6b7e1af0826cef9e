//! LLM handler (§4.3): calls the configured backend and, if `jsonResponse` is set,
//! post-validates the response against `jsonResponseKeys`.
//!
//! Model hosting is explicitly out of scope (§1 Non-goals); [`LlmClient`] is the seam
//! a real backend would implement, grounded on the teacher's `LlmClient` trait
//! (`invoke(messages) -> LlmResponse`) and its `MockLlm`.

use async_trait::async_trait;
use serde_json::Value;

use crate::resource::{LlmTool, ResourceKind, ResultPayload, RunSpec};

use super::{DispatchContext, HandlerError, ResourceHandler};

/// One turn sent to the backend: the declared prompt plus an optional system role.
#[derive(Debug, Clone)]
pub struct LlmRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub role: Option<&'a str>,
    pub tools: &'a [LlmTool],
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, request: LlmRequest<'_>) -> Result<LlmResponse, HandlerError>;
}

/// Fixed-response backend for tests and for deployments with no configured model.
pub struct MockLlm {
    content: String,
}

impl MockLlm {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new("mock response")
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, _request: LlmRequest<'_>) -> Result<LlmResponse, HandlerError> {
        Ok(LlmResponse {
            content: self.content.clone(),
        })
    }
}

pub struct LlmHandler<C: LlmClient> {
    client: C,
}

impl<C: LlmClient> LlmHandler<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: LlmClient> ResourceHandler for LlmHandler<C> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Llm
    }

    async fn dispatch(
        &self,
        spec: &RunSpec,
        ctx: &DispatchContext<'_>,
    ) -> Result<ResultPayload, HandlerError> {
        let RunSpec::Llm {
            model,
            prompt,
            role,
            json_response,
            json_response_keys,
            tools,
        } = spec
        else {
            unreachable!("LlmHandler dispatched with a non-LLM RunSpec");
        };

        let request = LlmRequest {
            model,
            prompt,
            role: role.as_deref(),
            tools,
        };
        let call = self.client.invoke(request);
        let response = match ctx.deadline {
            Some(d) => tokio::time::timeout(d, call)
                .await
                .map_err(|_| HandlerError::LlmTimeout)??,
            None => call.await?,
        };

        if *json_response {
            let parsed: Value = serde_json::from_str(&response.content).map_err(|_| {
                HandlerError::LlmGeneration(format!(
                    "response is not valid JSON for action {}",
                    ctx.action_id
                ))
            })?;
            let obj = parsed.as_object().ok_or_else(|| {
                HandlerError::LlmGeneration("response is not a JSON object".to_string())
            })?;
            for key in json_response_keys {
                if !obj.contains_key(key) {
                    return Err(HandlerError::LlmGeneration(format!(
                        "response missing required key: {key}"
                    )));
                }
            }
        }

        Ok(ResultPayload::Llm {
            model: model.clone(),
            prompt: prompt.clone(),
            role: role.clone(),
            json_response: *json_response,
            json_response_keys: json_response_keys.clone(),
            tools: tools.clone(),
            response: response.content,
            file: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>() -> DispatchContext<'a> {
        DispatchContext {
            action_id: "a",
            request_id: "r1",
            workspace: std::path::Path::new("."),
            deadline: None,
        }
    }

    fn llm_spec(json_response: bool, keys: Vec<&str>) -> RunSpec {
        RunSpec::Llm {
            model: "gpt".into(),
            prompt: "hi".into(),
            role: None,
            json_response,
            json_response_keys: keys.into_iter().map(String::from).collect(),
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn plain_response_is_stored_verbatim() {
        let handler = LlmHandler::new(MockLlm::new("hello there"));
        let payload = handler.dispatch(&llm_spec(false, vec![]), &ctx()).await.unwrap();
        assert!(matches!(payload, ResultPayload::Llm { response, .. } if response == "hello there"));
    }

    #[tokio::test]
    async fn json_response_validates_required_keys() {
        let handler = LlmHandler::new(MockLlm::new(r#"{"summary":"ok","score":1}"#));
        let payload = handler
            .dispatch(&llm_spec(true, vec!["summary", "score"]), &ctx())
            .await
            .unwrap();
        assert!(matches!(payload, ResultPayload::Llm { .. }));
    }

    #[tokio::test]
    async fn json_response_missing_key_is_llm_generation_error() {
        let handler = LlmHandler::new(MockLlm::new(r#"{"summary":"ok"}"#));
        let err = handler.dispatch(&llm_spec(true, vec!["score"]), &ctx()).await;
        assert!(matches!(err, Err(HandlerError::LlmGeneration(_))));
    }

    #[tokio::test]
    async fn json_response_non_json_text_is_llm_generation_error() {
        let handler = LlmHandler::new(MockLlm::new("not json"));
        let err = handler.dispatch(&llm_spec(true, vec!["k"]), &ctx()).await;
        assert!(matches!(err, Err(HandlerError::LlmGeneration(_))));
    }

    struct SlowLlm;

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn invoke(&self, _: LlmRequest<'_>) -> Result<LlmResponse, HandlerError> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(LlmResponse {
                content: "late".into(),
            })
        }
    }

    #[tokio::test]
    async fn deadline_exceeded_is_llm_timeout() {
        let handler = LlmHandler::new(SlowLlm);
        let mut c = ctx();
        c.deadline = Some(std::time::Duration::from_millis(50));
        let err = handler.dispatch(&llm_spec(false, vec![]), &c).await;
        assert!(matches!(err, Err(HandlerError::LlmTimeout)));
    }
}
