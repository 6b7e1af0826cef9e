//! Workflow manifest, bundle-folder validation, and the declarative-configuration-
//! evaluator seam (§6.1, §6.2). The evaluator itself (schema grammar, Pkl parsing)
//! is out of scope (§1 Non-goals); this module defines the seam the core calls
//! through, plus a `serde_yaml`-backed [`FixtureEvaluator`] standing in for it.

use std::cmp::Ordering;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::ResourceDecl;

pub const CURRENT_SCHEMA_VERSION: &str = "1.0.0";
pub const SCHEMA_URL_PREFIX: &str = "package://schema.kdeps.com/core";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("blank or missing amends statement")]
    MissingAmends,
    #[error("amends statement must reference {0}")]
    WrongSchemaOrigin(String),
    #[error("unrecognized version segment: {0}")]
    InvalidVersion(String),
    #[error("{0} must be named {1}")]
    WrongFilename(String, String),
    #[error("load failed: {0}")]
    LoadFailed(String),
    #[error("evaluate failed: {0}")]
    EvaluateFailed(String),
    #[error("bundle invalid: {0}")]
    InvalidBundle(String),
}

/// Declared HTTP route surface for one workflow (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    pub methods: Vec<String>,
}

/// The parsed `workflow.pkl` (§4.6, §6.3): target action plus the agent's advertised
/// actions and declared route surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowManifest {
    pub agent: String,
    pub version: String,
    pub target_action_id: String,
    #[serde(default)]
    pub action_ids: Vec<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl WorkflowManifest {
    /// `TargetActionID` plus any additional `ActionID = "..."` lines (§4.6), deduplicated.
    pub fn advertised_actions(&self) -> Vec<String> {
        let mut actions = vec![self.target_action_id.clone()];
        for id in &self.action_ids {
            if !actions.contains(id) {
                actions.push(id.clone());
            }
        }
        actions
    }
}

/// Either of the two file shapes the evaluator's `load` can return (§6.1's generic
/// `load(path) -> Declaration`, split here into its two concrete Rust shapes).
#[derive(Debug, Clone)]
pub enum LoadedFile {
    Workflow(WorkflowManifest),
    Resource(ResourceDecl),
}

/// Resolves one custom URI scheme (`resource://`, `session://`, `memory://`,
/// `agent://`) to text, on behalf of the evaluator's `evaluateText` (§6.1, §9).
#[async_trait]
pub trait UriReader: Send + Sync {
    async fn read(&self, uri: &str) -> Result<String, ManifestError>;
}

/// The external declarative-configuration evaluator's interface (§6.1). Grammar and
/// schema validation are out of scope; only this seam is specified.
#[async_trait]
pub trait ConfigEvaluator: Send + Sync {
    async fn load(&self, path: &Path) -> Result<LoadedFile, ManifestError>;
    async fn evaluate_text(&self, text: &str, readers: &dyn UriReader) -> Result<String, ManifestError>;
}

/// `serde_yaml`-backed stand-in for the real evaluator, used by tests and demos.
/// Not a Pkl parser — no Pkl crate exists in the corpus's dependency stack.
pub struct FixtureEvaluator;

#[async_trait]
impl ConfigEvaluator for FixtureEvaluator {
    async fn load(&self, path: &Path) -> Result<LoadedFile, ManifestError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ManifestError::LoadFailed(e.to_string()))?;
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if file_name.starts_with("workflow.") {
            let manifest: WorkflowManifest = serde_yaml::from_str(&text)
                .map_err(|e| ManifestError::LoadFailed(e.to_string()))?;
            Ok(LoadedFile::Workflow(manifest))
        } else {
            let decl: ResourceDecl = serde_yaml::from_str(&text)
                .map_err(|e| ManifestError::LoadFailed(e.to_string()))?;
            Ok(LoadedFile::Resource(decl))
        }
    }

    async fn evaluate_text(&self, text: &str, _readers: &dyn UriReader) -> Result<String, ManifestError> {
        // The real evaluator would substitute custom-scheme URIs here. kdeps-core's own
        // reference evaluator (§4.5) performs `@(...)` resolution directly against the
        // stores, so the fixture evaluator passes text through unchanged.
        Ok(text.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    Current,
    Warn,
    Debug,
}

fn parse_dotted(version: &str) -> Result<Vec<u64>, ManifestError> {
    version
        .split('.')
        .map(|t| t.parse::<u64>().map_err(|_| ManifestError::InvalidVersion(version.to_string())))
        .collect()
}

/// Lower than [`CURRENT_SCHEMA_VERSION`] warns, higher debug-logs, non-integer fails (§6.1).
pub fn check_amends_version(version: &str) -> Result<VersionCheck, ManifestError> {
    let tokens = parse_dotted(version)?;
    let current = parse_dotted(CURRENT_SCHEMA_VERSION).expect("constant is valid");
    Ok(match tokens.cmp(&current) {
        Ordering::Less => VersionCheck::Warn,
        Ordering::Equal => VersionCheck::Current,
        Ordering::Greater => VersionCheck::Debug,
    })
}

/// Validates the "amends" header rule (§6.1): a non-blank file must begin with an
/// `amends` statement referencing [`SCHEMA_URL_PREFIX`] and a version of the form
/// `@<version>#/<FileName>.pkl`, whose filename must match `file_name`'s role.
pub fn validate_amends_header(text: &str, file_name: &str) -> Result<VersionCheck, ManifestError> {
    let first_non_blank = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or(ManifestError::MissingAmends)?;
    let trimmed = first_non_blank.trim();
    if !trimmed.starts_with("amends") {
        return Err(ManifestError::MissingAmends);
    }
    if !trimmed.contains(SCHEMA_URL_PREFIX) {
        return Err(ManifestError::WrongSchemaOrigin(SCHEMA_URL_PREFIX.to_string()));
    }
    let (_, after_at) = trimmed
        .split_once('@')
        .ok_or_else(|| ManifestError::WrongSchemaOrigin(SCHEMA_URL_PREFIX.to_string()))?;
    let (version, after_hash) = after_at
        .split_once("#/")
        .ok_or_else(|| ManifestError::WrongSchemaOrigin(SCHEMA_URL_PREFIX.to_string()))?;
    let schema_file = after_hash.trim().trim_matches('"').trim_matches('\'');

    match schema_file {
        "Kdeps.pkl" => {
            if file_name != ".kdeps.pkl" {
                return Err(ManifestError::WrongFilename(
                    schema_file.to_string(),
                    ".kdeps.pkl".to_string(),
                ));
            }
        }
        "Workflow.pkl" => {
            if file_name != "workflow.pkl" {
                return Err(ManifestError::WrongFilename(
                    schema_file.to_string(),
                    "workflow.pkl".to_string(),
                ));
            }
        }
        "Resource.pkl" => {
            if file_name == ".kdeps.pkl" || file_name == "workflow.pkl" {
                return Err(ManifestError::WrongFilename(
                    schema_file.to_string(),
                    "anything but .kdeps.pkl or workflow.pkl".to_string(),
                ));
            }
        }
        other => {
            return Err(ManifestError::WrongSchemaOrigin(format!(
                "unrecognized schema filename: {other}"
            )))
        }
    }

    check_amends_version(version.trim())
}

/// Validates the agent bundle folder shape (§6.2): must contain a workflow file;
/// may contain `resources/` (files of `resource_ext` plus an optional `external/`
/// subdirectory, no other subdirectories); may contain `data/` (arbitrary contents);
/// a top-level `.kdeps.pkl` is ignored. `resource_ext` is parameterized because this
/// fixture harness substitutes `yaml` for the real deployment's `pkl`.
pub fn validate_bundle_dir(dir: &Path, resource_ext: &str) -> Result<(), ManifestError> {
    let has_workflow = ["workflow.pkl", "workflow.yaml", "workflow.yml"]
        .iter()
        .any(|f| dir.join(f).is_file());
    if !has_workflow {
        return Err(ManifestError::InvalidBundle(format!(
            "{}: missing workflow file",
            dir.display()
        )));
    }

    let resources_dir = dir.join("resources");
    if resources_dir.is_dir() {
        for entry in std::fs::read_dir(&resources_dir)
            .map_err(|e| ManifestError::InvalidBundle(e.to_string()))?
        {
            let entry = entry.map_err(|e| ManifestError::InvalidBundle(e.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                if path.file_name().and_then(|n| n.to_str()) != Some("external") {
                    return Err(ManifestError::InvalidBundle(format!(
                        "unexpected subdirectory under resources/: {}",
                        path.display()
                    )));
                }
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(resource_ext) {
                return Err(ManifestError::InvalidBundle(format!(
                    "unexpected file under resources/: {}",
                    path.display()
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amends_header_accepts_workflow_file() {
        let text = format!("amends \"{SCHEMA_URL_PREFIX}@1.0.0#/Workflow.pkl\"\n");
        let check = validate_amends_header(&text, "workflow.pkl").unwrap();
        assert_eq!(check, VersionCheck::Current);
    }

    #[test]
    fn amends_header_rejects_wrong_filename_for_kind() {
        let text = format!("amends \"{SCHEMA_URL_PREFIX}@1.0.0#/Workflow.pkl\"\n");
        assert!(validate_amends_header(&text, "not_workflow.pkl").is_err());
    }

    #[test]
    fn amends_header_missing_statement_fails() {
        assert!(validate_amends_header("\n\nsomething_else\n", "workflow.pkl").is_err());
    }

    #[test]
    fn amends_version_lower_warns_higher_debugs() {
        assert_eq!(check_amends_version("0.9.0").unwrap(), VersionCheck::Warn);
        assert_eq!(check_amends_version("9.0.0").unwrap(), VersionCheck::Debug);
        assert!(check_amends_version("1.x").is_err());
    }

    #[test]
    fn bundle_dir_requires_workflow_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_bundle_dir(dir.path(), "yaml").is_err());
        std::fs::write(dir.path().join("workflow.yaml"), "agent: a\n").unwrap();
        assert!(validate_bundle_dir(dir.path(), "yaml").is_ok());
    }

    #[test]
    fn bundle_dir_rejects_unexpected_resources_subdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("workflow.yaml"), "agent: a\n").unwrap();
        std::fs::create_dir_all(dir.path().join("resources").join("nested")).unwrap();
        assert!(validate_bundle_dir(dir.path(), "yaml").is_err());
    }

    #[test]
    fn bundle_dir_allows_external_subdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("workflow.yaml"), "agent: a\n").unwrap();
        std::fs::create_dir_all(dir.path().join("resources").join("external")).unwrap();
        assert!(validate_bundle_dir(dir.path(), "yaml").is_ok());
    }

    #[tokio::test]
    async fn fixture_evaluator_loads_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.yaml");
        std::fs::write(
            &path,
            "agent: myAgent\nversion: \"1.0.0\"\ntarget_action_id: target\naction_ids: []\nroutes: []\n",
        )
        .unwrap();
        let loaded = FixtureEvaluator.load(&path).await.unwrap();
        match loaded {
            LoadedFile::Workflow(m) => assert_eq!(m.agent, "myAgent"),
            _ => panic!("expected workflow"),
        }
    }

    #[test]
    fn advertised_actions_dedup_and_lead_with_target() {
        let m = WorkflowManifest {
            agent: "a".into(),
            version: "1.0.0".into(),
            target_action_id: "target".into(),
            action_ids: vec!["target".into(), "extra".into()],
            routes: vec![],
        };
        assert_eq!(m.advertised_actions(), vec!["target", "extra"]);
    }
}
