//! JSON-RPC over HTTP transport
//!
//! Every request is a JSON-RPC 2.0 call POSTed to `{endpoint}/mcp`.

use crate::transport::{Operation, Request, Response, Transport};
use changeplan::{Error, Resource, ResourceStatus, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// JSON-RPC error code the endpoint uses for unknown resources.
const RPC_NOT_FOUND: i64 = -32001;
/// JSON-RPC "invalid params".
const RPC_INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    status: ResourceStatus,
}

/// Blocking HTTP transport built on a shared `ureq` agent.
pub struct HttpTransport {
    agent: ureq::Agent,
    endpoint: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a transport whose every attempt is bounded by `timeout`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(true)
            .build()
            .into();
        Self {
            agent,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    fn url(&self) -> String {
        format!("{}/mcp", self.endpoint)
    }

    fn envelope(&self, request: &Request) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: request.operation.method(),
            params: params(request),
        }
    }

    fn transport_error(&self, request: &Request, err: ureq::Error) -> Error {
        match err {
            ureq::Error::Timeout(_) => Error::Timeout {
                target: self.endpoint.clone(),
                timeout_secs: self.timeout.as_secs_f64(),
            },
            ureq::Error::StatusCode(404) => Error::ResourceNotFound {
                resource_id: request.resource_id.clone(),
            },
            ureq::Error::StatusCode(code) if code == 429 || code >= 500 => {
                Error::ConnectionFailure {
                    target: self.endpoint.clone(),
                    message: format!("HTTP {code}"),
                }
            }
            ureq::Error::StatusCode(code) => Error::validation(
                format!("{} rejected by {}: HTTP {code}", request.operation, self.endpoint),
                vec![request.resource_id.clone()],
            ),
            other => Error::ConnectionFailure {
                target: self.endpoint.clone(),
                message: other.to_string(),
            },
        }
    }
}

fn params(request: &Request) -> Value {
    match (&request.operation, &request.config) {
        (Operation::Health, _) => json!({}),
        (_, Some(config)) => json!({
            "resource_type": config.resource_type,
            "resource_id": config.id,
            "name": config.name,
            "region": config.region,
            "properties": config.properties,
            "tags": config.tags,
        }),
        (_, None) => json!({
            "resource_type": request.resource_type,
            "resource_id": request.resource_id,
        }),
    }
}

/// Turn a JSON-RPC reply into a typed response.
fn decode(target: &str, request: &Request, reply: RpcResponse) -> Result<Response> {
    let invalid = |message: String| Error::InvalidResponse {
        target: target.to_string(),
        message,
    };

    if let Some(error) = reply.error {
        return Err(match error.code {
            RPC_NOT_FOUND => Error::ResourceNotFound {
                resource_id: request.resource_id.clone(),
            },
            RPC_INVALID_PARAMS => {
                Error::validation(error.message, vec![request.resource_id.clone()])
            }
            code => Error::ConnectionFailure {
                target: target.to_string(),
                message: format!("remote error {code}: {}", error.message),
            },
        });
    }

    let result = reply.result.unwrap_or(Value::Null);
    match request.operation {
        Operation::Create | Operation::Read | Operation::Update => {
            serde_json::from_value::<Resource>(result)
                .map(Response::Resource)
                .map_err(|e| invalid(format!("malformed resource: {e}")))
        }
        Operation::Status => serde_json::from_value::<StatusResult>(result)
            .map(|s| Response::Status(s.status))
            .map_err(|e| invalid(format!("malformed status: {e}"))),
        Operation::Delete => Ok(Response::Deleted),
        Operation::Health => Ok(Response::Healthy),
    }
}

impl Transport for HttpTransport {
    fn target(&self) -> &str {
        &self.endpoint
    }

    fn send(&self, request: &Request) -> Result<Response> {
        let envelope = self.envelope(request);
        log::debug!("POST {} {} (id {})", self.url(), envelope.method, envelope.id);

        let mut response = self
            .agent
            .post(&self.url())
            .header("User-Agent", "remotekit")
            .send_json(&envelope)
            .map_err(|e| self.transport_error(request, e))?;

        let reply: RpcResponse =
            response
                .body_mut()
                .read_json()
                .map_err(|e| Error::InvalidResponse {
                    target: self.endpoint.clone(),
                    message: e.to_string(),
                })?;

        decode(&self.endpoint, request, reply)
    }
}
