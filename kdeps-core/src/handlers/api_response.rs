//! APIResponse handler (§4.3): never calls outward. Composes the run's visible
//! output from literal (already `@(...)`-resolved) fields in the declaration.

use async_trait::async_trait;

use crate::resource::{ResourceKind, ResultPayload, RunSpec};

use super::{DispatchContext, HandlerError, ResourceHandler};

#[derive(Default)]
pub struct ApiResponseHandler;

#[async_trait]
impl ResourceHandler for ApiResponseHandler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ApiResponse
    }

    async fn dispatch(
        &self,
        spec: &RunSpec,
        _ctx: &DispatchContext<'_>,
    ) -> Result<ResultPayload, HandlerError> {
        let RunSpec::ApiResponse {
            success,
            headers,
            properties,
            data,
        } = spec
        else {
            unreachable!("ApiResponseHandler dispatched with a non-APIResponse RunSpec");
        };

        Ok(ResultPayload::ApiResponse {
            success: *success,
            headers: headers.clone(),
            properties: properties.clone(),
            data: data.clone(),
            errors: vec![],
        })
    }
}

/// The default response synthesized when the plan completes without a committed
/// APIResponse record (§4.2, §4.3).
pub fn default_response() -> ResultPayload {
    ResultPayload::ApiResponse {
        success: true,
        headers: Default::default(),
        properties: Default::default(),
        data: vec![],
        errors: vec![],
    }
}
