//! The Jarvis conversation loop.
//!
//! A turn streams the model's output through a [`StreamTokenizer`] that
//! splits it into response, thought and tool-call segments. Tool calls are
//! run as one concurrent batch by the [`ToolDispatcher`], their results fed
//! back, and the model asked again until it answers in plain text.
//!
//! Everything observable leaves the loop as a [`StreamEvent`]. A turn can be
//! cancelled at any await point through its `CancellationToken`.

pub mod context;
pub mod dispatcher;
pub mod loop_runner;
pub mod protocol;
pub mod session;
pub mod stream_event;
pub mod tokenizer;

#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use context::{Coordinates, TurnContext};
pub use dispatcher::{Batch, Cancelled, ToolDispatcher};
pub use loop_runner::{AgentLoop, TurnOutcome};
pub use protocol::{InlineTags, NativeCalls, NoTools, ToolProtocol};
pub use session::{SessionRunner, TurnReport};
pub use stream_event::StreamEvent;
pub use tokenizer::{Segment, StreamTokenizer, TokenizerState, parse_tool_call};
