//! `jarvis chat` — Interactive or single-message chat in the terminal.
//!
//! Ctrl+C stops the reply being generated; `exit` or end of input quits.

use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use jarvis_agent::{SessionRunner, StreamEvent, TurnOutcome};
use jarvis_core::message::ConversationId;
use jarvis_gateway::GatewayState;

use super::one_line;

pub async fn run(
    config_path: Option<&Path>,
    message: Option<String>,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let state = GatewayState::from_config(&config).await?;
    let runner = state.runner.clone();

    let session = match session {
        Some(id) => {
            let id = ConversationId::from(id);
            runner
                .store()
                .get_session(&id)
                .await?
                .ok_or_else(|| format!("No session with id {id}"))?;
            id
        }
        None => runner.store().create_session(None).await?,
    };

    if let Some(msg) = message {
        chat_turn(&runner, &session, &msg).await?;
        println!();
        return Ok(());
    }

    println!();
    println!("  Jarvis — interactive chat");
    println!();
    println!("  Model:    {}", config.llm.model);
    println!("  Tools:    {}", runner.agent().tools().names().join(", "));
    println!("  Session:  {session}");
    println!();
    println!("  Ctrl+C stops a reply. Type 'exit' to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        print!("  Jarvis > ");
        std::io::stdout().flush()?;
        if let Err(e) = chat_turn(&runner, &session, input).await {
            eprintln!("  [Error] {e}");
        }
        println!();
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Run one turn, printing events as they stream. Ctrl+C cancels it.
async fn chat_turn(
    runner: &SessionRunner,
    session: &ConversationId,
    input: &str,
) -> Result<TurnOutcome, Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(64);
    let printer = tokio::spawn(print_events(rx));

    let report = {
        let turn = runner.run_turn(session, input, &cancel, &tx);
        tokio::pin!(turn);
        loop {
            tokio::select! {
                report = &mut turn => break report,
                _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => cancel.cancel(),
            }
        }
    };
    drop(tx);
    let _ = printer.await;

    let report = report?;
    if report.outcome == TurnOutcome::Cancelled {
        eprint!("\n  [Generation stopped.]");
    }
    Ok(report.outcome)
}

async fn print_events(mut rx: mpsc::Receiver<StreamEvent>) {
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Response { text } => {
                print!("{text}");
                let _ = stdout.flush();
            }
            StreamEvent::Thought { text } => {
                eprintln!("\n  (thinking) {}", one_line(&text, 120));
            }
            StreamEvent::ToolCall { name, args, .. } => {
                eprintln!("\n  [tool] {name} {args}");
            }
            StreamEvent::ToolResult { name, content, .. } => {
                eprintln!("  [result] {name}: {}", one_line(&content, 120));
            }
            StreamEvent::Error { message } => {
                eprintln!("\n  [Error] {message}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarvis_agent::AgentLoop;
    use jarvis_agent::test_helpers::ScriptedProvider;
    use jarvis_core::session::SessionStore;
    use jarvis_core::tool::ToolRegistry;
    use jarvis_store::InMemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn chat_turn_streams_and_stores_the_reply() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemoryStore::new());
        let provider = Arc::new(ScriptedProvider::replies(&["Hello there."]));
        let agent = AgentLoop::new(provider, Arc::new(ToolRegistry::new()), "mock-model");
        let runner = SessionRunner::new(Arc::new(agent), store.clone());
        let session = store.create_session(None).await.unwrap();

        let outcome = chat_turn(&runner, &session, "hi").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Completed);

        let messages = store.load_messages(&session).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Hello there.");
    }
}
