//! Top-level entry point (§2 dataflow, §6.3): binds a request scope, resolves the
//! target action into a plan, runs the plan, and tears the scope down again. This is
//! the single operation an HTTP edge (or any other transport) calls through.

use std::path::Path;

use crate::action::ActionId;
use crate::error::KdepsError;
use crate::evaluator::RequestContext;
use crate::executor::{run_plan, HandlerSet};
use crate::registry::AgentRegistry;
use crate::request::RequestScope;
use crate::resolver::{resolve, DeclLoader};
use crate::resource::ResultPayload;
use crate::store::ResourceStore;

/// Runs one request end to end: mint a `requestID`, resolve `target` against
/// `registry`/`loader` into a dependency-ordered plan, execute it, then release the
/// workspace and store partition regardless of outcome (§4.7).
pub async fn handle_request(
    target: &ActionId,
    registry: &dyn AgentRegistry,
    loader: &dyn DeclLoader,
    handlers: &HandlerSet,
    store: ResourceStore,
    tmp_base: &Path,
    request: RequestContext,
) -> Result<ResultPayload, KdepsError> {
    let mut scope = RequestScope::begin(tmp_base, store).await?;

    let outcome = async {
        let plan = resolve(target, registry, loader).await?;
        run_plan(
            &plan,
            scope.store(),
            &scope.request_id,
            &request,
            &scope.workspace,
            handlers,
        )
        .await
    }
    .await;

    scope.teardown().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{UnresolvedRef, Version};
    use crate::handlers::{ApiResponseHandler, ExecHandler, HttpClientHandler, LlmHandler, MockLlm, PythonHandler};
    use crate::registry::{RegistryError, ResolutionContext};
    use crate::resolver::ResolveError;
    use crate::resource::{RequestGate, ResourceDecl, RunSpec};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapRegistry;

    #[async_trait]
    impl AgentRegistry for MapRegistry {
        async fn register(&self, _id: ActionId, _path: std::path::PathBuf) -> Result<(), RegistryError> {
            Ok(())
        }
        async fn unregister(&self, _id: &ActionId) -> Result<(), RegistryError> {
            Ok(())
        }
        async fn latest_agent_version(&self, _agent: &str) -> Option<Version> {
            None
        }
        async fn latest_version_for_action(&self, _agent: &str, _action: &str) -> Option<Version> {
            None
        }
        async fn resolve(&self, r: &UnresolvedRef, ctx: &ResolutionContext) -> Result<ActionId, RegistryError> {
            let agent = r.agent.clone().unwrap_or_else(|| ctx.agent.clone());
            let action = r.action.clone().or_else(|| ctx.action.clone()).unwrap_or_default();
            let version = r.version.clone().unwrap_or_else(|| ctx.version.clone());
            Ok(ActionId::new(agent, action, version))
        }
        async fn declaration_path(&self, _id: &ActionId) -> Option<std::path::PathBuf> {
            None
        }
    }

    struct MapLoader {
        decls: Mutex<HashMap<String, ResourceDecl>>,
    }

    #[async_trait]
    impl DeclLoader for MapLoader {
        async fn load(&self, id: &ActionId) -> Result<ResourceDecl, ResolveError> {
            self.decls
                .lock()
                .unwrap()
                .get(&id.action)
                .cloned()
                .ok_or_else(|| ResolveError::UnknownAction(id.canonical()))
        }
    }

    fn decl(action: &str, requires: Vec<&str>, run: Option<RunSpec>) -> ResourceDecl {
        ResourceDecl {
            action_id: action.into(),
            name: action.into(),
            category: "test".into(),
            description: String::new(),
            requires: requires.into_iter().map(String::from).collect(),
            run,
            skip_condition: vec![],
            preflight_check: vec![],
            timeout_duration: None,
            gate: RequestGate::default(),
        }
    }

    fn handler_set() -> HandlerSet {
        HandlerSet {
            exec: std::sync::Arc::new(ExecHandler),
            python: std::sync::Arc::new(PythonHandler),
            http_client: std::sync::Arc::new(HttpClientHandler::default()),
            llm: std::sync::Arc::new(LlmHandler::new(MockLlm::new("ok"))),
            api_response: std::sync::Arc::new(ApiResponseHandler),
        }
    }

    #[tokio::test]
    async fn end_to_end_linear_plan_produces_api_response() {
        let mut decls = HashMap::new();
        decls.insert(
            "b".to_string(),
            decl(
                "b",
                vec![],
                Some(RunSpec::Exec {
                    command: "echo hi".into(),
                    env: HashMap::new(),
                    background: false,
                }),
            ),
        );
        decls.insert(
            "target".to_string(),
            decl(
                "target",
                vec!["b"],
                Some(RunSpec::ApiResponse {
                    success: true,
                    headers: HashMap::new(),
                    properties: HashMap::new(),
                    data: vec![],
                }),
            ),
        );

        let registry = MapRegistry;
        let loader = MapLoader { decls: Mutex::new(decls) };
        let target = ActionId::new("myAgent", "target", Version::parse("1.0.0").unwrap());
        let tmp = tempfile::tempdir().unwrap();

        let result = handle_request(
            &target,
            &registry,
            &loader,
            &handler_set(),
            ResourceStore::new(),
            tmp.path(),
            RequestContext::default(),
        )
        .await
        .unwrap();

        assert!(matches!(result, ResultPayload::ApiResponse { success: true, .. }));
    }

    #[tokio::test]
    async fn workspace_is_removed_after_handling_even_on_error() {
        let registry = MapRegistry;
        let loader = MapLoader { decls: Mutex::new(HashMap::new()) };
        let target = ActionId::new("myAgent", "missing", Version::parse("1.0.0").unwrap());
        let tmp = tempfile::tempdir().unwrap();

        let result = handle_request(
            &target,
            &registry,
            &loader,
            &handler_set(),
            ResourceStore::new(),
            tmp.path(),
            RequestContext::default(),
        )
        .await;

        assert!(result.is_err());
    }
}
