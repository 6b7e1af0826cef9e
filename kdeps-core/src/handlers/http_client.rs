//! HTTPClient handler (§4.3): issues the declared request and captures the response.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::resource::{HttpResponse, ResourceKind, ResultPayload, RunSpec};

use super::{DispatchContext, HandlerError, ResourceHandler};

pub struct HttpClientHandler {
    client: reqwest::Client,
}

impl Default for HttpClientHandler {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl HttpClientHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceHandler for HttpClientHandler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::HttpClient
    }

    async fn dispatch(
        &self,
        spec: &RunSpec,
        ctx: &DispatchContext<'_>,
    ) -> Result<ResultPayload, HandlerError> {
        let RunSpec::HttpClient {
            method,
            url,
            headers,
            data,
            params,
        } = spec
        else {
            unreachable!("HttpClientHandler dispatched with a non-HTTPClient RunSpec");
        };

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| HandlerError::HttpRequestFailed(e.to_string()))?;
        let mut builder = self.client.request(method, url).query(
            &params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Vec<_>>(),
        );
        for (k, v) in headers {
            builder = builder.header(k, v);
        }
        if !data.is_empty() {
            builder = builder.body(data.join("\n"));
        }
        if let Some(d) = ctx.deadline {
            builder = builder.timeout(d);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HandlerError::HttpTimeout
            } else {
                HandlerError::HttpRequestFailed(e.to_string())
            }
        })?;

        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        let response_body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                HandlerError::HttpTimeout
            } else {
                HandlerError::HttpRequestFailed(e.to_string())
            }
        })?;

        Ok(ResultPayload::HttpClient {
            method: method.to_string(),
            url: url.clone(),
            headers: headers.clone(),
            data: data.clone(),
            params: params.clone(),
            response: HttpResponse {
                headers: response_headers,
                body: response_body,
            },
            file: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_reports_http_request_failed() {
        let handler = HttpClientHandler::default();
        let spec = RunSpec::HttpClient {
            method: "GET".into(),
            url: "http://127.0.0.1:0/".into(),
            headers: HashMap::new(),
            data: vec![],
            params: HashMap::new(),
        };
        let ctx = DispatchContext {
            action_id: "a",
            request_id: "r1",
            workspace: std::path::Path::new("."),
            deadline: None,
        };
        let err = handler.dispatch(&spec, &ctx).await;
        assert!(matches!(err, Err(HandlerError::HttpRequestFailed(_))));
    }
}
