//! Resource handlers (§4.3): the five leaf kinds a plan step's `run` block can
//! dispatch to. `ResourceHandler` is the single-method seam, grounded on the
//! teacher's `Agent` trait (state in, state out, one `run` method) and its blanket
//! `Node<S>` wrapping.

mod api_response;
mod exec;
mod http_client;
mod llm;
mod python;

pub use api_response::{default_response, ApiResponseHandler};
pub use exec::ExecHandler;
pub use http_client::HttpClientHandler;
pub use llm::{LlmClient, LlmHandler, LlmResponse, MockLlm};
pub use python::PythonHandler;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::{ResourceKind, ResultPayload, RunSpec};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("exec timed out")]
    ExecTimeout,
    #[error("python script exited with code {0}")]
    PythonExecution(i32),
    #[error("http request failed: {0}")]
    HttpRequestFailed(String),
    #[error("http request timed out")]
    HttpTimeout,
    #[error("llm generation failed: {0}")]
    LlmGeneration(String),
    #[error("llm call timed out")]
    LlmTimeout,
}

/// Everything a handler needs beyond the already-`@(...)`-resolved `RunSpec` (§4.3, §4.7).
pub struct DispatchContext<'a> {
    pub action_id: &'a str,
    pub request_id: &'a str,
    pub workspace: &'a Path,
    /// `None` when `timeoutDuration` is 0: run without a local deadline (still subject
    /// to request-level cancellation upstream, which this type does not itself carry).
    pub deadline: Option<Duration>,
}

/// One resource kind's executor: state (a resolved `RunSpec`) in, a committed
/// `ResultPayload` out (§4.3).
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn kind(&self) -> ResourceKind;
    async fn dispatch(
        &self,
        spec: &RunSpec,
        ctx: &DispatchContext<'_>,
    ) -> Result<ResultPayload, HandlerError>;
}

/// Loads `key=value` lines from `<workspace>/.env`, ignoring blank lines and
/// `#`-comments (§4.3). Absence of the file is not an error.
pub(crate) async fn load_dotenv(workspace: &Path) -> std::collections::HashMap<String, String> {
    let mut out = std::collections::HashMap::new();
    let Ok(text) = tokio::fs::read_to_string(workspace.join(".env")).await else {
        return out;
    };
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            out.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    out
}
