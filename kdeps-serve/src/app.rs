//! Axum app: state, bootstrap, and router (§6.3). Replaces the teacher's single
//! WebSocket-upgrade route with one REST route per path the served workflow declares.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{MatchedPath, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;

use kdeps_core::action::{ActionId, Version};
use kdeps_core::evaluator::RequestContext;
use kdeps_core::executor::HandlerSet;
use kdeps_core::handlers::{ApiResponseHandler, ExecHandler, HttpClientHandler, LlmHandler, PythonHandler};
use kdeps_core::manifest::{ConfigEvaluator, FixtureEvaluator, LoadedFile, WorkflowManifest};
use kdeps_core::registry::FsAgentRegistry;
use kdeps_core::resolver::FsDeclLoader;
use kdeps_core::store::ResourceStore;
use thiserror::Error;

use crate::response::to_http_response;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("scan of {0} failed: {1}")]
    Scan(PathBuf, String),
    #[error("no agents found under {0}")]
    NoAgents(PathBuf),
    #[error("agent {0} has no registered version")]
    NoVersion(String),
    #[error("{0}: could not load workflow manifest: {1}")]
    LoadManifest(PathBuf, String),
}

/// Which agent/version to serve. `None` defaults to the latest version of whichever
/// single agent was discovered (or errors if more than one is present and none was named).
#[derive(Debug, Clone, Default)]
pub struct ServeSelection {
    pub agent: Option<String>,
    pub version: Option<Version>,
}

/// Everything a request handler needs: the registry and handler stack, the request-
/// scoped store, the workspace root for scratch files, and the target action plus its
/// manifest (routes, allowed methods) that this process serves (§4.6, §6.3).
pub struct AppState {
    pub registry: FsAgentRegistry,
    pub evaluator: Box<dyn ConfigEvaluator>,
    pub handlers: HandlerSet,
    pub store: ResourceStore,
    pub tmp_base: PathBuf,
    pub target: ActionId,
    pub manifest: WorkflowManifest,
}

impl AppState {
    /// Scans `kdeps_home/agents/...`, picks the agent/version named by `selection`
    /// (or the sole/latest one found), and loads its workflow manifest.
    pub async fn bootstrap(
        kdeps_home: &Path,
        selection: ServeSelection,
        evaluator: Box<dyn ConfigEvaluator>,
        handlers: HandlerSet,
        tmp_base: PathBuf,
    ) -> Result<Self, BootstrapError> {
        let registry = FsAgentRegistry::new();
        registry
            .scan(kdeps_home, evaluator.as_ref())
            .await
            .map_err(|e| BootstrapError::Scan(kdeps_home.to_path_buf(), e.to_string()))?;

        let agent = match selection.agent {
            Some(agent) => agent,
            None => {
                let known = registry.known_agents().await;
                known
                    .first()
                    .map(|(agent, _)| agent.clone())
                    .ok_or_else(|| BootstrapError::NoAgents(kdeps_home.to_path_buf()))?
            }
        };
        let version = match selection.version {
            Some(version) => version,
            None => registry
                .latest_agent_version(&agent)
                .await
                .ok_or_else(|| BootstrapError::NoVersion(agent.clone()))?,
        };

        let workflow_path = registry
            .workflow_path(&agent, &version)
            .await
            .ok_or_else(|| BootstrapError::NoVersion(agent.clone()))?;
        let loaded = evaluator
            .load(&workflow_path)
            .await
            .map_err(|e| BootstrapError::LoadManifest(workflow_path.clone(), e.to_string()))?;
        let LoadedFile::Workflow(manifest) = loaded else {
            return Err(BootstrapError::LoadManifest(
                workflow_path,
                "not a workflow file".into(),
            ));
        };

        let target = ActionId::new(agent, manifest.target_action_id.clone(), version);

        Ok(Self {
            registry,
            evaluator,
            handlers,
            store: ResourceStore::new(),
            tmp_base,
            target,
            manifest,
        })
    }
}

/// The default evaluator/handler stack used by [`crate::run_serve`]; exposed
/// separately so tests can build an `AppState` with fixture handlers instead.
pub fn default_evaluator() -> Box<dyn ConfigEvaluator> {
    Box::new(FixtureEvaluator)
}

pub fn default_handlers() -> HandlerSet {
    HandlerSet {
        exec: Arc::new(ExecHandler),
        python: Arc::new(PythonHandler),
        http_client: Arc::new(HttpClientHandler::default()),
        llm: Arc::new(LlmHandler::new(kdeps_core::handlers::MockLlm::new(""))),
        api_response: Arc::new(ApiResponseHandler),
    }
}

/// Collapses the manifest's declared routes into `path -> allowed methods`,
/// registering one handler per unique path (§6.3: "Routes are declared by the
/// workflow manifest (path, allowed methods)").
pub fn router(state: Arc<AppState>) -> Router {
    let mut by_path: HashMap<String, Vec<String>> = HashMap::new();
    for route in &state.manifest.routes {
        by_path
            .entry(route.path.clone())
            .or_default()
            .extend(route.methods.iter().cloned());
    }

    let mut router = Router::new();
    for path in by_path.keys() {
        router = router.route(path, any(handle));
    }
    router.with_state(RouterState {
        app: state,
        allowed_methods: Arc::new(by_path),
    })
}

#[derive(Clone)]
struct RouterState {
    app: Arc<AppState>,
    allowed_methods: Arc<HashMap<String, Vec<String>>>,
}

async fn handle(
    State(state): State<RouterState>,
    matched_path: MatchedPath,
    method: Method,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let path = matched_path.as_str().to_string();
    let allowed = state
        .allowed_methods
        .get(&path)
        .map(|m| m.iter().any(|allowed| allowed.eq_ignore_ascii_case(method.as_str())))
        .unwrap_or(false);
    if !allowed {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let header_map = headers
        .iter()
        .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
        .collect();
    let body_value = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(&body).ok()
    };

    let request = RequestContext {
        method: method.to_string(),
        path,
        headers: header_map,
        params,
        body: body_value,
    };

    let app = &state.app;
    let loader = FsDeclLoader {
        registry: &app.registry,
        evaluator: app.evaluator.as_ref(),
    };
    let outcome = kdeps_core::handle_request(
        &app.target,
        &app.registry,
        &loader,
        &app.handlers,
        app.store.clone(),
        &app.tmp_base,
        request,
    )
    .await;
    to_http_response(outcome)
}
