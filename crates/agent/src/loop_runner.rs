//! The conversation loop.
//!
//! One turn:
//!
//! 1. **Append** the user's message to the transcript
//! 2. **Generate**: stream the model's answer through the tokenizer,
//!    forwarding every event as it appears
//! 3. **If tool calls**: dispatch the batch, then commit the assistant call
//!    message and all of its results together, and go back to step 2
//! 4. **Otherwise**: commit the assistant reply and finish
//!
//! The transcript only ever grows by whole units: the user message, a
//! call message with all of its results, or the final reply. Cancellation
//! and model failures roll back to the last committed length.

use jarvis_config::AppConfig;
use jarvis_core::error::ProviderError;
use jarvis_core::message::{Conversation, Message, ToolCallRequest};
use jarvis_core::provider::{Provider, ProviderRequest};
use jarvis_core::tool::ToolRegistry;
use jarvis_core::tool::ToolResult;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::TurnContext;
use crate::dispatcher::ToolDispatcher;
use crate::protocol::{self, InlineTags, ToolProtocol};
use crate::stream_event::StreamEvent;
use crate::tokenizer::Segment;

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model gave a final answer.
    Completed,
    /// Stopped from outside, or the event receiver went away.
    Cancelled,
    /// The model backend failed or the tool-round limit was hit.
    Failed,
}

/// Why a round stopped early.
enum Interrupt {
    Cancelled,
    Failed(String),
}

impl From<ProviderError> for Interrupt {
    fn from(e: ProviderError) -> Self {
        Self::Failed(e.to_string())
    }
}

/// What one model round produced.
#[derive(Default)]
struct Generated {
    text: String,
    calls: Vec<ToolCallRequest>,
    /// Fingerprints of `calls`
    seen: HashSet<String>,
}

/// Per-turn bookkeeping shared by all rounds.
struct TurnState<'a> {
    events: &'a mpsc::Sender<StreamEvent>,
    context: &'a TurnContext,
    /// Results of calls committed earlier in this turn, by fingerprint
    answered: HashMap<String, String>,
}

impl TurnState<'_> {
    async fn emit(&self, event: StreamEvent) -> Result<(), Interrupt> {
        self.events.send(event).await.map_err(|_| {
            debug!("Event receiver dropped; treating as cancellation");
            Interrupt::Cancelled
        })
    }
}

/// The agent loop: owns no conversation state, so one instance serves
/// every session.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    protocol: Box<dyn ToolProtocol>,
    dispatcher: ToolDispatcher,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: String,
    /// Model rounds ending in tool calls allowed per turn; `None` is unbounded
    max_tool_iterations: Option<u32>,
    dedupe_tool_calls: bool,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        Self {
            provider,
            protocol: Box::new(InlineTags),
            dispatcher: ToolDispatcher::new(tools),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: String::new(),
            max_tool_iterations: None,
            dedupe_tool_calls: true,
        }
    }

    /// Build from the `[llm]` and `[agent]` sections.
    pub fn from_config(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, config: &AppConfig) -> Self {
        let agent = Self::new(provider, tools, &config.llm.model)
            .with_protocol(protocol::from_config(config.llm.tool_protocol))
            .with_temperature(config.llm.temperature)
            .with_system_prompt(&config.agent.system_prompt)
            .with_max_tool_iterations(config.agent.max_tool_iterations)
            .with_dedupe(config.agent.dedupe_tool_calls)
            .with_tool_timeout(Duration::from_secs(config.agent.tool_timeout_secs));
        match config.llm.max_tokens {
            Some(max) => agent.with_max_tokens(max),
            None => agent,
        }
    }

    pub fn with_protocol(mut self, protocol: Box<dyn ToolProtocol>) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_tool_iterations(mut self, max: Option<u32>) -> Self {
        self.max_tool_iterations = max;
        self
    }

    pub fn with_dedupe(mut self, enabled: bool) -> Self {
        self.dedupe_tool_calls = enabled;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher = self.dispatcher.with_timeout(timeout);
        self
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        self.dispatcher.registry()
    }

    pub fn protocol_name(&self) -> &'static str {
        self.protocol.name()
    }

    /// Run one turn for `input` against `conversation`, streaming events to
    /// `events`. On return the transcript holds only committed units.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        input: &str,
        cancel: &CancellationToken,
        events: &mpsc::Sender<StreamEvent>,
    ) -> TurnOutcome {
        self.run_turn_in(conversation, input, &TurnContext::default(), cancel, events)
            .await
    }

    /// [`run_turn`](Self::run_turn) with facts about the user added to the
    /// system prompt of every request in the turn.
    pub async fn run_turn_in(
        &self,
        conversation: &mut Conversation,
        input: &str,
        context: &TurnContext,
        cancel: &CancellationToken,
        events: &mpsc::Sender<StreamEvent>,
    ) -> TurnOutcome {
        conversation.push(Message::user(input));
        let mut committed = conversation.len();
        let mut turn = TurnState {
            events,
            context,
            answered: HashMap::new(),
        };
        let mut tool_rounds = 0u32;

        info!(
            conversation_id = %conversation.id,
            protocol = self.protocol.name(),
            "Starting turn"
        );

        loop {
            let round = match self.generate(conversation, cancel, &mut turn).await {
                Ok(round) => round,
                Err(interrupt) => return self.abort(conversation, committed, interrupt, &turn).await,
            };

            if round.calls.is_empty() {
                conversation.push(Message::assistant(round.text.trim()));
                info!(conversation_id = %conversation.id, tool_rounds, "Turn complete");
                return TurnOutcome::Completed;
            }

            tool_rounds += 1;
            if let Some(max) = self.max_tool_iterations
                && tool_rounds > max
            {
                warn!(max, "Tool round limit reached");
                let message = format!("Stopped after {max} rounds of tool calls without a final answer.");
                return self
                    .abort(conversation, committed, Interrupt::Failed(message), &turn)
                    .await;
            }

            // Staged: nothing reaches the transcript until every result is in.
            let call_message = Message::assistant_with_calls(round.text.trim(), round.calls.clone());
            let fresh: Vec<ToolCallRequest> = round
                .calls
                .iter()
                .filter(|call| self.earlier_result(call, &turn).is_none())
                .cloned()
                .collect();
            let mut batch = self.dispatcher.start(&fresh);
            let mut results = Vec::with_capacity(round.calls.len());
            for call in &round.calls {
                let result = match self.earlier_result(call, &turn) {
                    Some(content) => {
                        debug!(tool = %call.name, "Answering repeated tool call from earlier result");
                        ToolResult::success(&call.id, &call.name, content)
                    }
                    None => match batch.next(cancel).await {
                        Ok(Some(result)) => result,
                        Ok(None) => break,
                        Err(_) => {
                            return self
                                .abort(conversation, committed, Interrupt::Cancelled, &turn)
                                .await;
                        }
                    },
                };
                let event = StreamEvent::ToolResult {
                    tool_call_id: result.tool_call_id.clone(),
                    name: result.name.clone(),
                    content: result.content.clone(),
                };
                if let Err(interrupt) = turn.emit(event).await {
                    return self.abort(conversation, committed, interrupt, &turn).await;
                }
                results.push(result);
            }

            if self.dedupe_tool_calls {
                for (call, result) in round.calls.iter().zip(&results) {
                    turn.answered
                        .entry(call.fingerprint())
                        .or_insert_with(|| result.content.clone());
                }
            }
            let results = results
                .into_iter()
                .map(|result| Message::tool_result(result.tool_call_id, result.name, result.content));
            conversation.push(call_message);
            conversation.extend(results);
            committed = conversation.len();
            debug!(conversation_id = %conversation.id, committed, "Tool batch committed");
        }
    }

    /// Roll back to `committed` and report how the turn ended.
    async fn abort(
        &self,
        conversation: &mut Conversation,
        committed: usize,
        interrupt: Interrupt,
        turn: &TurnState<'_>,
    ) -> TurnOutcome {
        conversation.truncate(committed);
        match interrupt {
            Interrupt::Cancelled => {
                info!(conversation_id = %conversation.id, "Turn cancelled");
                TurnOutcome::Cancelled
            }
            Interrupt::Failed(message) => {
                warn!(conversation_id = %conversation.id, error = %message, "Turn failed");
                // Nobody left to tell if this fails.
                let _ = turn.emit(StreamEvent::Error { message }).await;
                TurnOutcome::Failed
            }
        }
    }

    fn request(&self, conversation: &Conversation, context: &TurnContext) -> ProviderRequest {
        let definitions = self.tools().definitions();
        let base = match context.prompt_line() {
            Some(line) => format!("{}\n\n{line}", self.system_prompt.trim_end()),
            None => self.system_prompt.clone(),
        };
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(self.protocol.system_prompt(&base, &definitions)));
        messages.extend(conversation.messages.iter().cloned());

        ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self.protocol.request_tools(&definitions),
            stop: Vec::new(),
        }
    }

    /// Stream one model round, forwarding events as they are produced.
    async fn generate(
        &self,
        conversation: &Conversation,
        cancel: &CancellationToken,
        turn: &mut TurnState<'_>,
    ) -> Result<Generated, Interrupt> {
        let request = self.request(conversation, turn.context);
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
            opened = self.provider.stream(request) => opened?,
        };

        let mut tokenizer = self.protocol.tokenizer();
        let mut round = Generated::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
                next = stream.recv() => next,
            };

            let Some(chunk) = next else {
                let tail = tokenizer.flush();
                self.absorb(tail, &mut round, turn).await?;
                break;
            };
            let chunk = chunk?;

            let mut segments = Vec::new();
            if let Some(reasoning) = &chunk.reasoning {
                segments.extend(tokenizer.push_reasoning(reasoning));
            }
            if let Some(text) = &chunk.text {
                segments.extend(tokenizer.push(text));
            }
            if chunk.done {
                segments.extend(tokenizer.flush());
            }
            self.absorb(segments, &mut round, turn).await?;

            if !chunk.tool_calls.is_empty() {
                if self.protocol.accepts_native_calls() {
                    for call in chunk.tool_calls {
                        self.accept_call(call, &mut round, turn).await?;
                    }
                } else {
                    warn!(
                        count = chunk.tool_calls.len(),
                        protocol = self.protocol.name(),
                        "Ignoring structured tool calls"
                    );
                }
            }

            if chunk.done {
                break;
            }
        }

        Ok(round)
    }

    async fn absorb(
        &self,
        segments: Vec<Segment>,
        round: &mut Generated,
        turn: &mut TurnState<'_>,
    ) -> Result<(), Interrupt> {
        for segment in segments {
            match segment {
                Segment::Response(text) => {
                    round.text.push_str(&text);
                    turn.emit(StreamEvent::Response { text }).await?;
                }
                Segment::Thought(text) => turn.emit(StreamEvent::Thought { text }).await?,
                Segment::ToolCall { request, .. } => self.accept_call(request, round, turn).await?,
            }
        }
        Ok(())
    }

    /// The result a repeated call already got earlier in this turn.
    fn earlier_result<'t>(&self, call: &ToolCallRequest, turn: &'t TurnState<'_>) -> Option<&'t str> {
        if !self.dedupe_tool_calls {
            return None;
        }
        turn.answered.get(&call.fingerprint()).map(String::as_str)
    }

    async fn accept_call(
        &self,
        call: ToolCallRequest,
        round: &mut Generated,
        turn: &mut TurnState<'_>,
    ) -> Result<(), Interrupt> {
        if self.dedupe_tool_calls && !round.seen.insert(call.fingerprint()) {
            debug!(tool = %call.name, "Skipping repeated tool call");
            return Ok(());
        }
        turn.emit(StreamEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            args: serde_json::Value::Object(call.arguments.clone()),
        })
        .await?;
        round.calls.push(call);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use jarvis_core::message::Role;
    use jarvis_core::provider::StreamChunk;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry
            .register(Box::new(SlowTool::new("slow", Duration::from_millis(300))))
            .unwrap();
        registry
            .register(Box::new(SlowTool::new("fast", Duration::from_millis(1))))
            .unwrap();
        registry.register(Box::new(FailingTool)).unwrap();
        Arc::new(registry)
    }

    fn agent(provider: Arc<ScriptedProvider>) -> AgentLoop {
        AgentLoop::new(provider, registry(), "mock-model").with_system_prompt("You are JARVIS.")
    }

    async fn run(agent: &AgentLoop, conv: &mut Conversation, input: &str) -> (TurnOutcome, Vec<StreamEvent>) {
        let (tx, mut rx) = mpsc::channel(256);
        let outcome = agent.run_turn(conv, input, &CancellationToken::new(), &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (outcome, events)
    }

    fn tool_call_text(name: &str) -> String {
        format!(r#"<tool_call>{{"name":"{name}","arguments":{{}}}}</tool_call>"#)
    }

    #[tokio::test]
    async fn simple_text_response() {
        let provider = Arc::new(ScriptedProvider::new(vec![Round::Stream(vec![
            text("Hello! "),
            text("How can I help?"),
            done(),
        ])]));
        let agent = agent(provider.clone());
        let mut conv = Conversation::new();

        let (outcome, events) = run(&agent, &mut conv, "Hi").await;
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(
            events,
            vec![
                StreamEvent::Response { text: "Hello! ".into() },
                StreamEvent::Response { text: "How can I help?".into() },
            ]
        );
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages[1].content, "Hello! How can I help?");

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.starts_with("You are JARVIS."));
        assert!(request.messages[0].content.contains("<tools>"));
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn inline_tool_call_loops_back_to_the_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Round::Stream(vec![
                text("<think>need a tool</think>Checking.<tool_"),
                text(r#"call>{"name":"fast","arguments":{"x":1}}</tool_call>"#),
                done(),
            ]),
            Round::Stream(vec![text("All done."), done()]),
        ]));
        let agent = agent(provider.clone());
        let mut conv = Conversation::new();

        let (outcome, events) = run(&agent, &mut conv, "do it").await;
        assert_eq!(outcome, TurnOutcome::Completed);

        let kinds: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["thought", "response", "tool_call", "tool_result", "response"]);
        assert!(matches!(&events[3], StreamEvent::ToolResult { content, .. } if content == "fast done"));

        // user, assistant(call), tool, assistant
        assert_eq!(conv.len(), 4);
        assert_eq!(conv.messages[1].content, "Checking.");
        assert_eq!(conv.messages[1].tool_calls[0].name, "fast");
        assert_eq!(conv.messages[2].role, Role::Tool);
        assert_eq!(conv.messages[2].tool_call_id.as_deref(), Some(conv.messages[1].tool_calls[0].id.as_str()));
        assert_eq!(conv.messages[3].content, "All done.");
        conv.check_consistency().unwrap();

        // The second round sees the tool result.
        let second = &provider.requests()[1];
        assert_eq!(second.messages.last().unwrap().content, "fast done");
    }

    #[tokio::test]
    async fn native_calls_and_reasoning_field() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Round::Stream(vec![
                reasoning("Use the tool."),
                Step::Chunk(StreamChunk {
                    tool_calls: vec![call("fast", serde_json::json!({}))],
                    done: true,
                    ..Default::default()
                }),
            ]),
            Round::Stream(vec![text("<tool_call>not parsed here</tool_call>"), done()]),
        ]));
        let agent = agent(provider.clone()).with_protocol(Box::new(protocol::NativeCalls));
        let mut conv = Conversation::new();

        let (outcome, events) = run(&agent, &mut conv, "go").await;
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(events[0], StreamEvent::Thought { text: "Use the tool.".into() });
        assert_eq!(events[1].event_type(), "tool_call");
        assert_eq!(events[2].event_type(), "tool_result");
        assert_eq!(
            events[3],
            StreamEvent::Response { text: "<tool_call>not parsed here</tool_call>".into() }
        );
        assert_eq!(provider.requests()[0].tools.len(), 3);
        conv.check_consistency().unwrap();
    }

    #[tokio::test]
    async fn tool_failures_are_conversation_content() {
        let provider = Arc::new(ScriptedProvider::replies(&[
            &format!("{}{}", tool_call_text("failing"), tool_call_text("ghost")),
            "Sorry, the service is down.",
        ]));
        let agent = agent(provider);
        let mut conv = Conversation::new();

        let (outcome, events) = run(&agent, &mut conv, "try").await;
        assert_eq!(outcome, TurnOutcome::Completed);
        let results: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolResult { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            results,
            vec!["Error: failing failed: service offline", "Error: Tool ghost not found."]
        );
        assert!(!events.iter().any(|e| e.event_type() == "error"));
        assert_eq!(conv.len(), 5);
    }

    #[tokio::test]
    async fn malformed_call_is_ignored() {
        let provider = Arc::new(ScriptedProvider::replies(&["<tool_call>{oops}</tool_call>Fine."]));
        let agent = agent(provider.clone());
        let mut conv = Conversation::new();

        let (outcome, events) = run(&agent, &mut conv, "x").await;
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(events, vec![StreamEvent::Response { text: "Fine.".into() }]);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn repeat_within_a_round_is_dropped() {
        let provider = Arc::new(ScriptedProvider::replies(&[&format!("{0}{0}", tool_call_text("fast")), "Done."]));
        let agent = agent(provider);
        let mut conv = Conversation::new();

        let (_, events) = run(&agent, &mut conv, "x").await;
        assert_eq!(events.iter().filter(|e| e.event_type() == "tool_call").count(), 1);
        assert_eq!(conv.len(), 4);
        conv.check_consistency().unwrap();
    }

    #[tokio::test]
    async fn repeat_in_a_later_round_reuses_the_earlier_result() {
        let counting = CountingTool::new("counter");
        let invocations = counting.counter();
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(counting)).unwrap();
        let provider = Arc::new(ScriptedProvider::replies(&[
            &tool_call_text("counter"),
            &tool_call_text("counter"),
            "The answer is 42.",
        ]));
        let agent = AgentLoop::new(provider.clone(), Arc::new(registry), "mock-model");
        let mut conv = Conversation::new();

        let (outcome, events) = run(&agent, &mut conv, "x").await;
        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 1);

        let results: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolResult { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec!["counter #1", "counter #1"]);

        // The model got an answer to its repeat and went on to reply.
        assert_eq!(provider.remaining_rounds(), 0);
        assert_eq!(conv.messages.last().unwrap().content, "The answer is 42.");
        assert!(events.contains(&StreamEvent::Response { text: "The answer is 42.".into() }));
        assert_eq!(conv.len(), 6);
        conv.check_consistency().unwrap();
    }

    #[tokio::test]
    async fn repeats_run_when_dedupe_is_off() {
        let provider = Arc::new(ScriptedProvider::replies(&[&format!("{0}{0}", tool_call_text("fast")), "Done."]));
        let agent = agent(provider).with_dedupe(false);
        let mut conv = Conversation::new();

        let (_, events) = run(&agent, &mut conv, "x").await;
        assert_eq!(events.iter().filter(|e| e.event_type() == "tool_call").count(), 2);
        assert_eq!(conv.len(), 5);
    }

    #[tokio::test]
    async fn model_failure_rolls_back_to_last_commit() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Round::Stream(vec![text(&tool_call_text("fast")), done()]),
            Round::Stream(vec![
                text("Partial ans"),
                Step::Fail(ProviderError::StreamInterrupted("connection reset".into())),
            ]),
        ]));
        let agent = agent(provider);
        let mut conv = Conversation::new();

        let (outcome, events) = run(&agent, &mut conv, "x").await;
        assert_eq!(outcome, TurnOutcome::Failed);
        assert!(matches!(events.last(), Some(StreamEvent::Error { message }) if message.contains("connection reset")));
        // user + committed tool batch; the partial answer is gone
        assert_eq!(conv.len(), 3);
        conv.check_consistency().unwrap();
    }

    #[tokio::test]
    async fn stream_open_failure_keeps_only_the_user_message() {
        let provider = Arc::new(ScriptedProvider::new(vec![Round::OpenError(
            ProviderError::Network("refused".into()),
        )]));
        let agent = agent(provider);
        let mut conv = Conversation::new();

        let (outcome, events) = run(&agent, &mut conv, "x").await;
        assert_eq!(outcome, TurnOutcome::Failed);
        assert_eq!(events.len(), 1);
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn tool_round_limit_stops_the_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Round::Stream(vec![text(&tool_call_text("fast")), done()]),
            Round::Stream(vec![text(&tool_call_text("slow")), done()]),
        ]));
        let agent = agent(provider).with_max_tool_iterations(Some(1));
        let mut conv = Conversation::new();

        let (outcome, events) = run(&agent, &mut conv, "x").await;
        assert_eq!(outcome, TurnOutcome::Failed);
        assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
        assert_eq!(conv.len(), 3);
        conv.check_consistency().unwrap();
    }

    #[tokio::test]
    async fn cancel_mid_dispatch_restores_committed_length() {
        let provider = Arc::new(ScriptedProvider::replies(&[&format!(
            "{}{}",
            tool_call_text("fast"),
            tool_call_text("slow")
        )]));
        let agent = agent(provider);
        let mut conv = Conversation::new();
        conv.push(Message::user("earlier"));
        conv.push(Message::assistant("earlier reply"));
        let before = conv.len();

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        let trigger = cancel.clone();
        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                // Stop once the first result is out and the second is pending.
                if event.event_type() == "tool_result" {
                    trigger.cancel();
                }
                seen.push(event);
            }
            seen
        });

        let outcome = agent.run_turn(&mut conv, "go", &cancel, &tx).await;
        drop(tx);
        let seen = watcher.await.unwrap();

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(seen.iter().filter(|e| e.event_type() == "tool_result").count(), 1);
        // Only the user message of this turn survives.
        assert_eq!(conv.len(), before + 1);
        conv.check_consistency().unwrap();
    }

    #[tokio::test]
    async fn cancel_mid_stream_discards_partial_reply() {
        let provider = Arc::new(ScriptedProvider::new(vec![Round::Stream(vec![
            text("Once upon"),
            Step::Sleep(Duration::from_secs(5)),
            text(" a time"),
            done(),
        ])]));
        let agent = agent(provider);
        let mut conv = Conversation::new();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(64);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = agent.run_turn(&mut conv, "story", &cancel, &tx).await;
        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(rx.recv().await, Some(StreamEvent::Response { text: "Once upon".into() }));
        assert_eq!(conv.len(), 1);
    }

    #[tokio::test]
    async fn dropped_receiver_counts_as_cancellation() {
        let provider = Arc::new(ScriptedProvider::replies(&["Hello"]));
        let agent = agent(provider);
        let mut conv = Conversation::new();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        let outcome = agent.run_turn(&mut conv, "hi", &CancellationToken::new(), &tx).await;
        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(conv.len(), 1);
    }

    #[tokio::test]
    async fn from_config_applies_protocol_and_limits() {
        let mut config = AppConfig::default();
        config.llm.tool_protocol = jarvis_config::ToolProtocol::None;
        config.agent.system_prompt = "Be brief.".into();
        let provider = Arc::new(ScriptedProvider::replies(&["ok"]));
        let agent = AgentLoop::from_config(provider.clone(), registry(), &config);
        assert_eq!(agent.protocol_name(), "none");

        let mut conv = Conversation::new();
        run(&agent, &mut conv, "hi").await;
        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].content, "Be brief.");
        assert!(request.tools.is_empty());
        assert_eq!(request.model, config.llm.model);
    }

    #[tokio::test]
    async fn user_location_reaches_every_request_of_the_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Round::Stream(vec![text(&tool_call_text("fast")), done()]),
            Round::Stream(vec![text("Sunny in Berlin."), done()]),
        ]));
        let agent = agent(provider.clone());
        let context = TurnContext {
            location: Some("Berlin, Germany".into()),
            coordinates: None,
        };
        let mut conv = Conversation::new();
        let (tx, _rx) = mpsc::channel(64);
        let outcome = agent
            .run_turn_in(&mut conv, "Weather here?", &context, &CancellationToken::new(), &tx)
            .await;
        assert_eq!(outcome, TurnOutcome::Completed);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            let system = &request.messages[0].content;
            assert!(system.starts_with("You are JARVIS."));
            assert!(system.contains("The user is currently in Berlin, Germany."));
        }
        assert!(conv.messages.iter().all(|m| !m.content.contains("currently in")));
    }
}
