//! Top-level error taxonomy (§7): one `thiserror` enum per component, rolled up here
//! the way the teacher rolls `CompilationError`/`ChannelError`/`CacheError` into `AgentError`.

use thiserror::Error;

use crate::evaluator::EvalError;
use crate::handlers::HandlerError;
use crate::registry::RegistryError;
use crate::resolver::ResolveError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum KdepsError {
    #[error("resolve: {0}")]
    Resolve(#[from] ResolveError),

    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("evaluate: {0}")]
    Evaluate(#[from] EvalError),

    #[error("handler: {0}")]
    Handler(#[from] HandlerError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("preflight failed for {action_id}: {predicate}")]
    PreflightFailed {
        action_id: String,
        predicate: String,
    },

    #[error("request setup failed: {0}")]
    RequestSetup(#[from] std::io::Error),
}

impl KdepsError {
    /// A stable error code for the `{code, message, actionID?}` shape in §7's
    /// user-visible failure response.
    pub fn code(&self) -> &'static str {
        match self {
            KdepsError::Resolve(ResolveError::UnknownAction(_)) => "UNKNOWN_ACTION",
            KdepsError::Resolve(ResolveError::CyclicDependency(_)) => "CYCLIC_DEPENDENCY",
            KdepsError::Resolve(ResolveError::InvalidVersion(_)) => "INVALID_VERSION",
            KdepsError::Registry(_) => "UNKNOWN_ACTION",
            KdepsError::Evaluate(EvalError::ReferenceUnresolved(_)) => "REFERENCE_UNRESOLVED",
            KdepsError::Evaluate(_) => "REFERENCE_UNRESOLVED",
            KdepsError::Handler(HandlerError::ExecTimeout) => "EXEC_TIMEOUT",
            KdepsError::Handler(HandlerError::PythonExecution(_)) => "PYTHON_EXECUTION",
            KdepsError::Handler(HandlerError::HttpRequestFailed(_)) => "HTTP_REQUEST_FAILED",
            KdepsError::Handler(HandlerError::HttpTimeout) => "HTTP_TIMEOUT",
            KdepsError::Handler(HandlerError::LlmGeneration(_)) => "LLM_GENERATION",
            KdepsError::Handler(HandlerError::LlmTimeout) => "LLM_TIMEOUT",
            KdepsError::Store(_) => "STORE_ACCESS_FAILED",
            KdepsError::PreflightFailed { .. } => "PREFLIGHT_FAILED",
            KdepsError::RequestSetup(_) => "REQUEST_SETUP_FAILED",
        }
    }

    pub fn action_id(&self) -> Option<&str> {
        match self {
            KdepsError::PreflightFailed { action_id, .. } => Some(action_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preflight_error_code_matches_taxonomy() {
        let err = KdepsError::PreflightFailed {
            action_id: "a".into(),
            predicate: "1==2".into(),
        };
        assert_eq!(err.code(), "PREFLIGHT_FAILED");
        assert_eq!(err.action_id(), Some("a"));
    }
}
