//! Installed-agent registry (§4.6): a process-lifetime index of known agents,
//! versions, and advertised actions. The only process-wide mutable state in the
//! system (§9); everything else is request-scoped.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::action::{ActionId, UnresolvedRef, Version};
use crate::manifest::{ConfigEvaluator, LoadedFile};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("already registered: {0}")]
    AlreadyRegistered(String),
    #[error("scan failed: {0}")]
    ScanFailed(String),
}

/// Fills in defaults for short-form references: the agent/version currently
/// executing, and (for forms that omit an action entirely) that agent's own
/// action name (§4.1, §4.6 `resolve`).
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub agent: String,
    pub version: Version,
    pub action: Option<String>,
}

/// A small trait seam (not just free functions) so `kdeps-serve` can hold
/// `Arc<dyn AgentRegistry>` and tests can substitute an in-memory fixture without
/// touching the filesystem scanner — the same seam the teacher uses for its
/// `Store`/`Checkpointer`/`LlmClient` traits.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn register(&self, id: ActionId, path: PathBuf) -> Result<(), RegistryError>;
    async fn unregister(&self, id: &ActionId) -> Result<(), RegistryError>;
    async fn latest_agent_version(&self, agent: &str) -> Option<Version>;
    async fn latest_version_for_action(&self, agent: &str, action: &str) -> Option<Version>;
    async fn resolve(
        &self,
        r: &UnresolvedRef,
        ctx: &ResolutionContext,
    ) -> Result<ActionId, RegistryError>;
    async fn declaration_path(&self, id: &ActionId) -> Option<PathBuf>;
}

#[derive(Debug, Clone)]
struct AgentEntry {
    path: PathBuf,
    actions: Vec<String>,
}

/// Filesystem-backed registry: scans `<base>/agents/<name>/<version>/workflow.*` at
/// startup, then answers short-name and latest-version lookups from memory.
#[derive(Default)]
pub struct FsAgentRegistry {
    agents: RwLock<HashMap<(String, Version), AgentEntry>>,
    actions_index: RwLock<HashMap<(String, String, Version), ActionId>>,
}

impl FsAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `<base>/agents/<name>/<version>/workflow.*`, parsing each with `evaluator`
    /// and populating `(agent, version) -> {path, actions[]}` and the per-action index.
    /// Returns the number of agent/version directories discovered.
    pub async fn scan(
        &self,
        base: &std::path::Path,
        evaluator: &dyn ConfigEvaluator,
    ) -> Result<usize, RegistryError> {
        let agents_dir = base.join("agents");
        if !agents_dir.is_dir() {
            return Ok(0);
        }
        let mut count = 0;
        for agent_entry in
            std::fs::read_dir(&agents_dir).map_err(|e| RegistryError::ScanFailed(e.to_string()))?
        {
            let agent_entry = agent_entry.map_err(|e| RegistryError::ScanFailed(e.to_string()))?;
            if !agent_entry.path().is_dir() {
                continue;
            }
            let agent_name = agent_entry.file_name().to_string_lossy().to_string();

            for version_entry in std::fs::read_dir(agent_entry.path())
                .map_err(|e| RegistryError::ScanFailed(e.to_string()))?
            {
                let version_entry =
                    version_entry.map_err(|e| RegistryError::ScanFailed(e.to_string()))?;
                let version_path = version_entry.path();
                if !version_path.is_dir() {
                    continue;
                }
                let version_str = version_entry.file_name().to_string_lossy().to_string();
                let Ok(version) = Version::parse(&version_str) else {
                    continue;
                };

                let workflow_path = ["workflow.pkl", "workflow.yaml", "workflow.yml"]
                    .iter()
                    .map(|f| version_path.join(f))
                    .find(|p| p.is_file());
                let Some(workflow_path) = workflow_path else {
                    continue;
                };

                let loaded = evaluator
                    .load(&workflow_path)
                    .await
                    .map_err(|e| RegistryError::ScanFailed(e.to_string()))?;
                let LoadedFile::Workflow(manifest) = loaded else {
                    return Err(RegistryError::ScanFailed(format!(
                        "{}: not a workflow file",
                        workflow_path.display()
                    )));
                };

                let actions = manifest.advertised_actions();
                {
                    let mut agents = self.agents.write().await;
                    agents.insert(
                        (agent_name.clone(), version.clone()),
                        AgentEntry {
                            path: version_path.clone(),
                            actions: actions.clone(),
                        },
                    );
                }
                {
                    let mut idx = self.actions_index.write().await;
                    for action in &actions {
                        idx.insert(
                            (agent_name.clone(), action.clone(), version.clone()),
                            ActionId::new(agent_name.clone(), action.clone(), version.clone()),
                        );
                    }
                }
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl AgentRegistry for FsAgentRegistry {
    async fn register(&self, id: ActionId, path: PathBuf) -> Result<(), RegistryError> {
        let mut idx = self.actions_index.write().await;
        let key = (id.agent.clone(), id.action.clone(), id.version.clone());
        if idx.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(id.canonical()));
        }
        idx.insert(key, id.clone());
        drop(idx);

        let mut agents = self.agents.write().await;
        agents
            .entry((id.agent.clone(), id.version.clone()))
            .and_modify(|e| {
                if !e.actions.contains(&id.action) {
                    e.actions.push(id.action.clone());
                }
            })
            .or_insert_with(|| AgentEntry {
                path,
                actions: vec![id.action.clone()],
            });
        Ok(())
    }

    async fn unregister(&self, id: &ActionId) -> Result<(), RegistryError> {
        let mut idx = self.actions_index.write().await;
        let key = (id.agent.clone(), id.action.clone(), id.version.clone());
        idx.remove(&key)
            .map(|_| ())
            .ok_or_else(|| RegistryError::UnknownAction(id.canonical()))
    }

    async fn latest_agent_version(&self, agent: &str) -> Option<Version> {
        let agents = self.agents.read().await;
        agents
            .keys()
            .filter(|(a, _)| a == agent)
            .map(|(_, v)| v.clone())
            .max()
    }

    async fn latest_version_for_action(&self, agent: &str, action: &str) -> Option<Version> {
        let idx = self.actions_index.read().await;
        idx.keys()
            .filter(|(a, ac, _)| a == agent && ac == action)
            .map(|(_, _, v)| v.clone())
            .max()
    }

    async fn resolve(
        &self,
        r: &UnresolvedRef,
        ctx: &ResolutionContext,
    ) -> Result<ActionId, RegistryError> {
        let same_agent = r.agent.is_none();
        let agent = r.agent.clone().unwrap_or_else(|| ctx.agent.clone());

        match &r.action {
            Some(action) => match &r.version {
                Some(version) => {
                    let idx = self.actions_index.read().await;
                    idx.get(&(agent.clone(), action.clone(), version.clone()))
                        .cloned()
                        .ok_or_else(|| {
                            RegistryError::UnknownAction(format!(
                                "@{agent}/{action}:{version}"
                            ))
                        })
                }
                None if same_agent => {
                    let idx = self.actions_index.read().await;
                    idx.get(&(agent.clone(), action.clone(), ctx.version.clone()))
                        .cloned()
                        .ok_or_else(|| RegistryError::UnknownAction(action.clone()))
                }
                None => {
                    let version = self
                        .latest_version_for_action(&agent, action)
                        .await
                        .ok_or_else(|| {
                            RegistryError::UnknownAction(format!("@{agent}/{action}"))
                        })?;
                    Ok(ActionId::new(agent, action.clone(), version))
                }
            },
            None => {
                let action = ctx
                    .action
                    .clone()
                    .ok_or_else(|| RegistryError::UnknownAction(agent.clone()))?;
                let version = match &r.version {
                    Some(v) => v.clone(),
                    None => self
                        .latest_agent_version(&agent)
                        .await
                        .ok_or_else(|| RegistryError::UnknownAction(agent.clone()))?,
                };
                Ok(ActionId::new(agent, action, version))
            }
        }
    }

    async fn declaration_path(&self, id: &ActionId) -> Option<PathBuf> {
        let agents = self.agents.read().await;
        let entry = agents.get(&(id.agent.clone(), id.version.clone()))?;
        for ext in ["yaml", "yml", "pkl"] {
            let p = entry.path.join("resources").join(format!("{}.{}", id.action, ext));
            if p.is_file() {
                return Some(p);
            }
        }
        None
    }
}

impl FsAgentRegistry {
    /// Re-locates `<base>/agents/<agent>/<version>/workflow.*` for an already-scanned
    /// agent/version, the same file `scan` found, so callers can reload the full
    /// manifest (routes, target action) rather than just the advertised action list
    /// cached in the index.
    pub async fn workflow_path(&self, agent: &str, version: &Version) -> Option<PathBuf> {
        let agents = self.agents.read().await;
        let entry = agents.get(&(agent.to_string(), version.clone()))?;
        ["workflow.pkl", "workflow.yaml", "workflow.yml"]
            .iter()
            .map(|f| entry.path.join(f))
            .find(|p| p.is_file())
    }

    /// All `(agent, version)` pairs currently known to the registry.
    pub async fn known_agents(&self) -> Vec<(String, Version)> {
        self.agents.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FixtureEvaluator;

    fn write_workflow(dir: &std::path::Path, agent: &str, version: &str, target: &str) {
        let path = dir.join("agents").join(agent).join(version);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(
            path.join("workflow.yaml"),
            format!(
                "agent: {agent}\nversion: \"{version}\"\ntarget_action_id: {target}\naction_ids: []\nroutes: []\n"
            ),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn scan_discovers_agents_and_latest_is_numeric() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "myAgent", "1.0.0", "target");
        write_workflow(dir.path(), "myAgent", "2.0.0", "target");
        write_workflow(dir.path(), "myAgent", "10.0.0", "target");

        let registry = FsAgentRegistry::new();
        let n = registry.scan(dir.path(), &FixtureEvaluator).await.unwrap();
        assert_eq!(n, 3);

        let latest = registry.latest_agent_version("myAgent").await.unwrap();
        assert_eq!(latest, Version::parse("10.0.0").unwrap());
    }

    #[tokio::test]
    async fn resolve_short_ref_picks_latest_numerically() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "myAgent", "1.0.0", "target");
        write_workflow(dir.path(), "myAgent", "2.0.0", "target");
        write_workflow(dir.path(), "myAgent", "10.0.0", "target");
        let registry = FsAgentRegistry::new();
        registry.scan(dir.path(), &FixtureEvaluator).await.unwrap();

        let ctx = ResolutionContext {
            agent: "myAgent".into(),
            version: Version::parse("1.0.0").unwrap(),
            action: Some("target".into()),
        };
        let r = crate::action::parse_ref("@myAgent/target").unwrap();
        let id = registry.resolve(&r, &ctx).await.unwrap();
        assert_eq!(id.version, Version::parse("10.0.0").unwrap());

        let explicit = crate::action::parse_ref("@myAgent/target:1.0.0").unwrap();
        let id2 = registry.resolve(&explicit, &ctx).await.unwrap();
        assert_eq!(id2.version, Version::parse("1.0.0").unwrap());
    }

    #[tokio::test]
    async fn register_then_resolve_then_unregister_then_unknown() {
        let registry = FsAgentRegistry::new();
        let id = ActionId::new("a", "x", Version::parse("1.0.0").unwrap());
        registry.register(id.clone(), PathBuf::from("/tmp/a")).await.unwrap();

        let ctx = ResolutionContext {
            agent: "a".into(),
            version: Version::parse("1.0.0").unwrap(),
            action: None,
        };
        let r = crate::action::parse_ref("@a/x:1.0.0").unwrap();
        let resolved = registry.resolve(&r, &ctx).await.unwrap();
        assert_eq!(resolved, id);

        registry.unregister(&id).await.unwrap();
        let err = registry.resolve(&r, &ctx).await;
        assert!(matches!(err, Err(RegistryError::UnknownAction(_))));
    }

    #[tokio::test]
    async fn bare_action_resolves_same_agent_same_version() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "myAgent", "1.0.0", "b");
        let registry = FsAgentRegistry::new();
        registry.scan(dir.path(), &FixtureEvaluator).await.unwrap();

        let ctx = ResolutionContext {
            agent: "myAgent".into(),
            version: Version::parse("1.0.0").unwrap(),
            action: Some("target".into()),
        };
        let r = crate::action::parse_ref("b").unwrap();
        let id = registry.resolve(&r, &ctx).await.unwrap();
        assert_eq!(id.agent, "myAgent");
        assert_eq!(id.version, Version::parse("1.0.0").unwrap());
    }

    #[tokio::test]
    async fn workflow_path_relocates_the_scanned_file() {
        let dir = tempfile::tempdir().unwrap();
        write_workflow(dir.path(), "myAgent", "1.0.0", "target");
        let registry = FsAgentRegistry::new();
        registry.scan(dir.path(), &FixtureEvaluator).await.unwrap();

        let version = Version::parse("1.0.0").unwrap();
        let path = registry.workflow_path("myAgent", &version).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "workflow.yaml");

        assert!(registry.workflow_path("nope", &version).await.is_none());

        let agents = registry.known_agents().await;
        assert_eq!(agents, vec![("myAgent".to_string(), version)]);
    }
}
