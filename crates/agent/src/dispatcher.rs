//! Tool dispatcher: runs one batch of tool calls concurrently and hands the
//! results back in request order.
//!
//! Every failure is converted into an `"Error: ..."` result. Nothing a tool
//! does can abort the turn.

use futures::StreamExt;
use futures::stream::FuturesOrdered;
use jarvis_core::error::ToolError;
use jarvis_core::message::ToolCallRequest;
use jarvis_core::tool::{ToolRegistry, ToolResult};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Returned when a batch is abandoned because the turn was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Option<Duration>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            timeout: None,
        }
    }

    /// Bound each invocation. An overrun becomes an error result.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Start every call in `requests` on its own task.
    pub fn start(&self, requests: &[ToolCallRequest]) -> Batch {
        let mut pending = FuturesOrdered::new();
        let mut calls = VecDeque::with_capacity(requests.len());
        let mut aborts = Vec::with_capacity(requests.len());

        for request in requests {
            let handle = self.spawn_call(request);
            aborts.push(handle.abort_handle());
            pending.push_back(handle);
            calls.push_back((request.id.clone(), request.name.clone()));
        }

        Batch {
            pending,
            calls,
            aborts,
        }
    }

    /// Run a batch to completion. Results match `requests` one to one, in order.
    pub async fn dispatch(
        &self,
        requests: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolResult>, Cancelled> {
        let mut batch = self.start(requests);
        let mut results = Vec::with_capacity(requests.len());
        while let Some(result) = batch.next(cancel).await? {
            results.push(result);
        }
        Ok(results)
    }

    fn spawn_call(&self, request: &ToolCallRequest) -> JoinHandle<ToolResult> {
        let request = request.clone();
        let tool = self.registry.resolve(&request.name);
        let timeout = self.timeout;

        tokio::spawn(async move {
            let tool = match tool {
                Ok(tool) => tool,
                Err(e) => {
                    warn!(tool = %request.name, "Model requested an unknown tool");
                    return ToolResult::error(&request.id, &request.name, e);
                }
            };

            debug!(tool = %request.name, id = %request.id, "Invoking tool");
            let call = tool.execute(request.arguments.clone());
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                    Err(ToolError::Timeout {
                        tool_name: request.name.clone(),
                        timeout_secs: limit.as_secs(),
                    })
                }),
                None => call.await,
            };

            match outcome {
                Ok(output) => ToolResult::success(&request.id, &request.name, output),
                Err(e) => {
                    warn!(tool = %request.name, error = %e, "Tool call failed");
                    ToolResult::error(&request.id, &request.name, e)
                }
            }
        })
    }
}

/// Tool calls in flight. Yields results in request order as soon as each
/// one and all before it have finished. Dropping the batch aborts whatever
/// is still running.
pub struct Batch {
    pending: FuturesOrdered<JoinHandle<ToolResult>>,
    calls: VecDeque<(String, String)>,
    aborts: Vec<AbortHandle>,
}

impl Batch {
    /// The next result in request order, `Ok(None)` once all are delivered.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<ToolResult>, Cancelled> {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            joined = self.pending.next() => joined,
        };
        let Some(joined) = joined else {
            return Ok(None);
        };
        let (id, name) = self.calls.pop_front().unwrap_or_default();
        Ok(Some(joined.unwrap_or_else(|e| {
            warn!(tool = %name, error = %e, "Tool task died");
            ToolResult::error(id, &name, format!("{name} crashed: {e}"))
        })))
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        for handle in &self.aborts {
            handle.abort();
        }
    }
}
