//! Maps `handle_request`'s outcome onto an HTTP response (§6.3, §7 "User-visible
//! behavior"): a committed `APIResponse` record becomes the success body; a
//! `KdepsError` becomes `{success:false, errors:[...]}`, with the HTTP status chosen
//! from the first (only, here) error's code.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use kdeps_core::resource::ResultPayload;
use kdeps_core::KdepsError;

/// §7's error-code-to-status mapping. Resolution/registry failures are the caller's
/// fault (404); preflight/validation failures are unprocessable (422); everything a
/// handler does while talking to the outside world is a 502 gateway failure.
fn code_to_status(code: &str) -> StatusCode {
    match code {
        "UNKNOWN_ACTION" | "CYCLIC_DEPENDENCY" | "INVALID_VERSION" => StatusCode::NOT_FOUND,
        "REFERENCE_UNRESOLVED" | "PREFLIGHT_FAILED" => StatusCode::UNPROCESSABLE_ENTITY,
        "EXEC_TIMEOUT" | "HTTP_TIMEOUT" | "LLM_TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
        "PYTHON_EXECUTION" | "HTTP_REQUEST_FAILED" | "LLM_GENERATION" => StatusCode::BAD_GATEWAY,
        "STORE_ACCESS_FAILED" | "REQUEST_SETUP_FAILED" => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turns the outcome of one `handle_request` call into an HTTP response.
pub fn to_http_response(outcome: Result<ResultPayload, KdepsError>) -> Response {
    match outcome {
        Ok(ResultPayload::ApiResponse {
            success,
            headers,
            properties,
            data,
            errors,
        }) => {
            let status = if success {
                StatusCode::OK
            } else {
                errors
                    .first()
                    .map(|e| code_to_status(&e.code))
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            };
            let body = json!({
                "success": success,
                "properties": properties,
                "data": data,
                "errors": errors.into_iter().map(|e| json!({
                    "code": e.code,
                    "message": e.message,
                    "actionID": e.action_id,
                })).collect::<Vec<_>>(),
            });
            let mut response = (status, axum::Json(body)).into_response();
            apply_headers(&mut response, headers);
            response
        }
        // run_plan only ever commits ApiResponse payloads as its returned Ok value
        // (the default-success synthesis lives there too); any other variant here
        // would be a defect upstream, not a request failure.
        Ok(_) => (StatusCode::INTERNAL_SERVER_ERROR, "non-APIResponse outcome").into_response(),
        Err(err) => {
            let status = code_to_status(err.code());
            let body = json!({
                "success": false,
                "properties": {},
                "data": [],
                "errors": [{
                    "code": err.code(),
                    "message": err.to_string(),
                    "actionID": err.action_id(),
                }],
            });
            (status, axum::Json(body)).into_response()
        }
    }
}

fn apply_headers(response: &mut Response<Body>, headers: std::collections::HashMap<String, String>) {
    let map = response.headers_mut();
    for (k, v) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(k.as_str()),
            HeaderValue::try_from(v.as_str()),
        ) {
            map.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdeps_core::resource::ApiError;
    use std::collections::HashMap;

    #[test]
    fn success_payload_maps_to_200() {
        let payload = ResultPayload::ApiResponse {
            success: true,
            headers: HashMap::new(),
            properties: HashMap::new(),
            data: vec![json!("hi")],
            errors: vec![],
        };
        let response = to_http_response(Ok(payload));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn preflight_error_maps_to_422() {
        let err = KdepsError::PreflightFailed {
            action_id: "a".into(),
            predicate: "1==2".into(),
        };
        let response = to_http_response(Err(err));
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn unsuccessful_api_response_uses_first_error_code() {
        let payload = ResultPayload::ApiResponse {
            success: false,
            headers: HashMap::new(),
            properties: HashMap::new(),
            data: vec![],
            errors: vec![ApiError {
                code: "PREFLIGHT_FAILED".into(),
                message: "nope".into(),
                action_id: Some("a".into()),
            }],
        };
        let response = to_http_response(Ok(payload));
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
