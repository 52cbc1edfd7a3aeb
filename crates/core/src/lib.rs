//! # Jarvis Core
//!
//! Domain types, traits, and error definitions for the Jarvis voice assistant.
//! This crate has **no framework dependencies**: it defines the transcript
//! model and the collaborator contracts that every other crate implements
//! against.
//!
//! - [`message`]: messages, tool-call requests, and the conversation transcript
//! - [`tool`]: the `Tool` trait and the deterministic `ToolRegistry`
//! - [`provider`]: the streaming model backend contract
//! - [`session`]: long-term session storage
//! - [`voice`]: speech-to-text and text-to-speech collaborators

pub mod error;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;
pub mod voice;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{Conversation, ConversationId, Message, Role, ToolCallRequest};
pub use provider::{Provider, ProviderRequest, StreamChunk, ToolDefinition};
pub use session::{SessionStore, SessionSummary};
pub use tool::{Tool, ToolRegistry, ToolResult};
pub use voice::{AudioInput, Synthesizer, Transcriber};
