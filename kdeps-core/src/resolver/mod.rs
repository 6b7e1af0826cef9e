//! Dependency resolution (§4.1, §9): canonicalizes every `requires` reference against
//! the registry, then orders the transitive closure with a tri-color depth-first
//! search so cycles are caught before any handler runs — grounded on the teacher's
//! `StateGraph::compile_internal` edge/cycle validation, generalized from a linear
//! chain to an arbitrary DAG.

use std::collections::HashMap;

use thiserror::Error;

use crate::action::{ActionId, VersionError};
use crate::manifest::ConfigEvaluator;
use crate::registry::{AgentRegistry, ResolutionContext, RegistryError};
use crate::resource::ResourceDecl;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("cyclic dependency: {0}")]
    CyclicDependency(String),
    #[error("invalid version: {0}")]
    InvalidVersion(#[from] VersionError),
}

impl From<RegistryError> for ResolveError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownAction(a) => ResolveError::UnknownAction(a),
            RegistryError::AlreadyRegistered(a) => ResolveError::UnknownAction(a),
            RegistryError::ScanFailed(a) => ResolveError::UnknownAction(a),
        }
    }
}

/// Loads a [`ResourceDecl`] for a canonicalized [`ActionId`]; the resolver is generic
/// over this so tests can substitute an in-memory map instead of touching disk.
#[async_trait::async_trait]
pub trait DeclLoader: Send + Sync {
    async fn load(&self, id: &ActionId) -> Result<ResourceDecl, ResolveError>;
}

/// Loads declarations from disk via the registry's `declaration_path` and a
/// [`ConfigEvaluator`] (§4.6, §6.1).
pub struct FsDeclLoader<'a> {
    pub registry: &'a dyn AgentRegistry,
    pub evaluator: &'a dyn ConfigEvaluator,
}

#[async_trait::async_trait]
impl<'a> DeclLoader for FsDeclLoader<'a> {
    async fn load(&self, id: &ActionId) -> Result<ResourceDecl, ResolveError> {
        let path = self
            .registry
            .declaration_path(id)
            .await
            .ok_or_else(|| ResolveError::UnknownAction(id.canonical()))?;
        match self.evaluator.load(&path).await {
            Ok(crate::manifest::LoadedFile::Resource(decl)) => Ok(decl),
            Ok(crate::manifest::LoadedFile::Workflow(_)) => Err(ResolveError::UnknownAction(
                format!("{}: resolved to a workflow file, not a resource", id.canonical()),
            )),
            Err(e) => Err(ResolveError::UnknownAction(format!("{}: {e}", id.canonical()))),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// One entry in a resolved, topologically-ordered execution plan (§4.1).
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub id: ActionId,
    pub decl: ResourceDecl,
}

/// Resolves `target` and its transitive `requires` closure into a plan where every
/// step's dependencies appear strictly before it (§4.1). Cycles (including
/// self-reference) are rejected with [`ResolveError::CyclicDependency`] naming one
/// action on the cycle.
pub async fn resolve(
    target: &ActionId,
    registry: &dyn AgentRegistry,
    loader: &dyn DeclLoader,
) -> Result<Vec<PlanStep>, ResolveError> {
    let mut colors: HashMap<String, Color> = HashMap::new();
    let mut decls: HashMap<String, ResourceDecl> = HashMap::new();
    let mut order: Vec<ActionId> = Vec::new();

    visit(target, registry, loader, &mut colors, &mut decls, &mut order).await?;

    let mut plan = Vec::with_capacity(order.len());
    for id in order {
        let decl = decls.remove(&id.canonical()).expect("visited id has a decl");
        plan.push(PlanStep { id, decl });
    }
    Ok(plan)
}

fn visit<'a>(
    id: &'a ActionId,
    registry: &'a dyn AgentRegistry,
    loader: &'a dyn DeclLoader,
    colors: &'a mut HashMap<String, Color>,
    decls: &'a mut HashMap<String, ResourceDecl>,
    order: &'a mut Vec<ActionId>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ResolveError>> + Send + 'a>> {
    Box::pin(async move {
        let key = id.canonical();
        match colors.get(&key) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => return Err(ResolveError::CyclicDependency(key)),
            _ => {}
        }
        colors.insert(key.clone(), Color::Gray);

        let decl = loader.load(id).await?;
        let ctx = ResolutionContext {
            agent: id.agent.clone(),
            version: id.version.clone(),
            action: Some(id.action.clone()),
        };
        for r in decl.requires_refs()? {
            let dep_id = registry.resolve(&r, &ctx).await?;
            visit(&dep_id, registry, loader, colors, decls, order).await?;
        }

        colors.insert(key.clone(), Color::Black);
        decls.insert(key, decl);
        order.push(id.clone());
        Ok(())
    })
}
