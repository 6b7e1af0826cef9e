//! Executor (§4.2): walks a resolved plan strictly in order, evaluating references,
//! skip/gate/preflight checks, and dispatching to the declared kind's handler.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use kdeps_events::{to_json, EnvelopeState, ExecutionEvent};

use crate::error::KdepsError;
use crate::evaluator::{EvalError, ReferenceEvaluator, RequestContext};
use crate::handlers::{default_response, DispatchContext, ResourceHandler};
use crate::resolver::PlanStep;
use crate::resource::{ApiError, ResourceDecl, ResourceKind, ResultPayload, ResultRecord, RunSpec};
use crate::store::ResourceStore;

/// One `Arc<dyn ResourceHandler>` per leaf kind (§4.3); assembled once per process or
/// per test, not per request.
pub struct HandlerSet {
    pub exec: Arc<dyn ResourceHandler>,
    pub python: Arc<dyn ResourceHandler>,
    pub http_client: Arc<dyn ResourceHandler>,
    pub llm: Arc<dyn ResourceHandler>,
    pub api_response: Arc<dyn ResourceHandler>,
}

impl HandlerSet {
    fn get(&self, kind: ResourceKind) -> &Arc<dyn ResourceHandler> {
        match kind {
            ResourceKind::Exec => &self.exec,
            ResourceKind::Python => &self.python,
            ResourceKind::HttpClient => &self.http_client,
            ResourceKind::Llm => &self.llm,
            ResourceKind::ApiResponse => &self.api_response,
        }
    }
}

async fn resolve_map(
    evaluator: &ReferenceEvaluator<'_>,
    map: &HashMap<String, String>,
) -> Result<HashMap<String, String>, EvalError> {
    let mut out = HashMap::with_capacity(map.len());
    for (k, v) in map {
        out.insert(k.clone(), evaluator.resolve_text(v).await?);
    }
    Ok(out)
}

/// Rebuilds `spec` with every `@(...)` reference in its string/JSON fields resolved
/// against the current request and store (§4.2 step 1, §4.5).
async fn resolve_run_spec(
    evaluator: &ReferenceEvaluator<'_>,
    spec: &RunSpec,
) -> Result<RunSpec, EvalError> {
    Ok(match spec {
        RunSpec::Exec {
            command,
            env,
            background,
        } => RunSpec::Exec {
            command: evaluator.resolve_text(command).await?,
            env: resolve_map(evaluator, env).await?,
            background: *background,
        },
        RunSpec::Python {
            script,
            env,
            environment,
            background,
        } => RunSpec::Python {
            script: evaluator.resolve_text(script).await?,
            env: resolve_map(evaluator, env).await?,
            environment: match environment {
                Some(e) => Some(evaluator.resolve_text(e).await?),
                None => None,
            },
            background: *background,
        },
        RunSpec::HttpClient {
            method,
            url,
            headers,
            data,
            params,
        } => {
            let mut resolved_data = Vec::with_capacity(data.len());
            for line in data {
                resolved_data.push(evaluator.resolve_text(line).await?);
            }
            RunSpec::HttpClient {
                method: evaluator.resolve_text(method).await?,
                url: evaluator.resolve_text(url).await?,
                headers: resolve_map(evaluator, headers).await?,
                data: resolved_data,
                params: resolve_map(evaluator, params).await?,
            }
        }
        RunSpec::Llm {
            model,
            prompt,
            role,
            json_response,
            json_response_keys,
            tools,
        } => RunSpec::Llm {
            model: evaluator.resolve_text(model).await?,
            prompt: evaluator.resolve_text(prompt).await?,
            role: match role {
                Some(r) => Some(evaluator.resolve_text(r).await?),
                None => None,
            },
            json_response: *json_response,
            json_response_keys: json_response_keys.clone(),
            tools: tools.clone(),
        },
        RunSpec::ApiResponse {
            success,
            headers,
            properties,
            data,
        } => {
            let mut resolved_properties = HashMap::with_capacity(properties.len());
            for (k, v) in properties {
                resolved_properties.insert(k.clone(), evaluator.resolve_value(v).await?);
            }
            let mut resolved_data = Vec::with_capacity(data.len());
            for v in data {
                resolved_data.push(evaluator.resolve_value(v).await?);
            }
            RunSpec::ApiResponse {
                success: *success,
                headers: resolve_map(evaluator, headers).await?,
                properties: resolved_properties,
                data: resolved_data,
            }
        }
    })
}

/// True when the request filters (§4.2 step 3) exclude this resource: it restricts
/// to HTTP methods/routes the request doesn't match, or the request carries a
/// header/param outside the declared allow-list.
fn gate_blocks(gate: &crate::resource::RequestGate, request: &RequestContext) -> bool {
    if gate.is_empty() {
        return false;
    }
    if !gate.restrict_to_http_methods.is_empty()
        && !gate
            .restrict_to_http_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&request.method))
    {
        return true;
    }
    if !gate.restrict_to_routes.is_empty()
        && !gate.restrict_to_routes.iter().any(|r| r == &request.path)
    {
        return true;
    }
    if !gate.allowed_headers.is_empty()
        && !request
            .headers
            .keys()
            .all(|h| gate.allowed_headers.iter().any(|a| a.eq_ignore_ascii_case(h)))
    {
        return true;
    }
    if !gate.allowed_params.is_empty()
        && !request.params.keys().all(|p| gate.allowed_params.contains(p))
    {
        return true;
    }
    false
}

async fn commit(
    store: &ResourceStore,
    request_id: &str,
    kind: ResourceKind,
    action_id: &str,
    decl: &ResourceDecl,
    payload: ResultPayload,
) {
    let record = ResultRecord {
        id: action_id.to_string(),
        request_id: request_id.to_string(),
        timestamp: Utc::now(),
        timeout_duration: decl.timeout_duration,
        metadata: HashMap::new(),
        payload,
    };
    store.commit(request_id, kind, action_id, record).await;
}

/// Logs one execution event at the `kdeps::execution` target, envelope-wrapped.
fn emit(envelope: &mut EnvelopeState, event: ExecutionEvent) {
    match to_json(&event, envelope) {
        Ok(value) => tracing::info!(target: "kdeps::execution", event = %value),
        Err(err) => tracing::warn!(target: "kdeps::execution", %err, "failed to serialize execution event"),
    }
}

/// Runs a resolved plan strictly in order (§4.2, §5). Returns the last committed
/// APIResponse record, or a synthesized default-success response if none was
/// committed during the run.
pub async fn run_plan(
    plan: &[PlanStep],
    store: &ResourceStore,
    request_id: &str,
    request: &RequestContext,
    workspace: &Path,
    handlers: &HandlerSet,
) -> Result<ResultPayload, KdepsError> {
    let mut last_api_response: Option<ResultPayload> = None;
    let mut envelope = EnvelopeState::new(request_id.to_string());
    emit(
        &mut envelope,
        ExecutionEvent::PlanResolved {
            plan: plan.iter().map(|s| s.id.canonical()).collect(),
        },
    );

    for step in plan {
        let evaluator = ReferenceEvaluator {
            store,
            request_id,
            request,
        };
        let action_id = step.id.action.as_str();

        let Some(run) = &step.decl.run else {
            // No runnable declared: the resource exists purely to be depended on
            // (e.g. for its skip/preflight side effects); nothing to commit.
            continue;
        };
        emit(&mut envelope, ExecutionEvent::ActionStart { id: action_id.to_string() });
        let resolved_run = resolve_run_spec(&evaluator, run).await?;
        let kind = resolved_run.kind();

        let mut skip_reason = None;
        for condition in &step.decl.skip_condition {
            if evaluator.evaluate_predicate(condition).await? {
                skip_reason = Some(condition.clone());
                break;
            }
        }
        if skip_reason.is_none() && gate_blocks(&step.decl.gate, request) {
            skip_reason = Some("blocked by request gate".to_string());
        }
        if let Some(reason) = skip_reason {
            commit(store, request_id, kind, action_id, &step.decl, ResultPayload::Skipped { reason: reason.clone() }).await;
            emit(&mut envelope, ExecutionEvent::ActionSkipped { id: action_id.to_string(), reason });
            continue;
        }

        let mut preflight_failure = None;
        for predicate in &step.decl.preflight_check {
            if !evaluator.evaluate_predicate(predicate).await? {
                preflight_failure = Some(predicate.clone());
                break;
            }
        }
        if let Some(predicate) = preflight_failure {
            commit(
                store,
                request_id,
                kind,
                action_id,
                &step.decl,
                ResultPayload::PreflightFailed {
                    predicate: predicate.clone(),
                },
            )
            .await;
            emit(
                &mut envelope,
                ExecutionEvent::PreflightFailed { id: action_id.to_string(), predicate: predicate.clone() },
            );
            if kind != ResourceKind::ApiResponse {
                emit(&mut envelope, ExecutionEvent::RequestComplete { success: false });
                return Err(KdepsError::PreflightFailed {
                    action_id: step.id.canonical(),
                    predicate,
                });
            }
            // The failing resource is itself an APIResponse: it reports its own
            // failure downstream instead of aborting the request (§7).
            let response = ResultPayload::ApiResponse {
                success: false,
                headers: Default::default(),
                properties: Default::default(),
                data: vec![],
                errors: vec![ApiError {
                    code: "PREFLIGHT_FAILED".to_string(),
                    message: format!("preflight check failed: {predicate}"),
                    action_id: Some(action_id.to_string()),
                }],
            };
            last_api_response = Some(response);
            continue;
        }

        let dispatch_ctx = DispatchContext {
            action_id,
            request_id,
            workspace,
            deadline: step.decl.timeout(),
        };
        let payload = match handlers.get(kind).dispatch(&resolved_run, &dispatch_ctx).await {
            Ok(payload) => payload,
            Err(err) => {
                emit(&mut envelope, ExecutionEvent::ActionFailed { id: action_id.to_string(), error: err.to_string() });
                emit(&mut envelope, ExecutionEvent::RequestComplete { success: false });
                return Err(err.into());
            }
        };

        if matches!(payload, ResultPayload::ApiResponse { .. }) {
            last_api_response = Some(payload.clone());
        }
        let committed = serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null);
        commit(store, request_id, kind, action_id, &step.decl, payload).await;
        emit(&mut envelope, ExecutionEvent::ActionCommitted { id: action_id.to_string(), result: committed });
    }

    emit(&mut envelope, ExecutionEvent::RequestComplete { success: true });
    Ok(last_api_response.unwrap_or_else(default_response))
}
