//! Scripted providers and toy tools for exercising the loop without a model.

use async_trait::async_trait;
use jarvis_core::error::{ProviderError, ToolError};
use jarvis_core::message::ToolCallRequest;
use jarvis_core::provider::{ChunkStream, Provider, ProviderRequest, StreamChunk};
use jarvis_core::tool::Tool;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted action of a streamed model round.
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(StreamChunk),
    Fail(ProviderError),
    Sleep(Duration),
}

pub fn text(s: &str) -> Step {
    Step::Chunk(StreamChunk::text(s))
}

pub fn reasoning(s: &str) -> Step {
    Step::Chunk(StreamChunk::reasoning(s))
}

pub fn native_calls(calls: Vec<ToolCallRequest>) -> Step {
    Step::Chunk(StreamChunk::tool_calls(calls))
}

pub fn done() -> Step {
    Step::Chunk(StreamChunk::done())
}

/// A model round: either a stream of steps or a refusal to open.
#[derive(Debug, Clone)]
pub enum Round {
    Stream(Vec<Step>),
    OpenError(ProviderError),
}

/// A provider that plays back one scripted round per `stream` call and
/// records every request it receives.
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<Round>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<Round>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Each string is one round, streamed in a single chunk.
    pub fn replies(replies: &[&str]) -> Self {
        Self::new(
            replies
                .iter()
                .map(|r| Round::Stream(vec![text(r), done()]))
                .collect(),
        )
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining_rounds(&self) -> usize {
        self.rounds.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::NotConfigured("script exhausted".into()))?;

        let steps = match round {
            Round::OpenError(e) => return Err(e),
            Round::Stream(steps) => steps,
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for step in steps {
                let item = match step {
                    Step::Sleep(d) => {
                        tokio::time::sleep(d).await;
                        continue;
                    }
                    Step::Chunk(chunk) => Ok(chunk),
                    Step::Fail(e) => Err(e),
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

pub fn call(name: &str, args: Value) -> ToolCallRequest {
    ToolCallRequest::new(name, args.as_object().cloned().unwrap_or_default())
}

/// Sleeps, then answers `"{name} done"`.
pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Waits, then reports completion"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Map<String, Value>) -> Result<String, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("{} done", self.name))
    }
}

/// Answers `"{name} #{n}"` for its n-th invocation.
pub struct CountingTool {
    name: String,
    calls: Arc<AtomicUsize>,
}

impl CountingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared view of the invocation count.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Counts its invocations"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Map<String, Value>) -> Result<String, ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{} #{n}", self.name))
    }
}

pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Map<String, Value>) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "failing".into(),
            reason: "service offline".into(),
        })
    }
}

pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panicking"
    }

    fn description(&self) -> &str {
        "Panics"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Map<String, Value>) -> Result<String, ToolError> {
        panic!("tool blew up")
    }
}
