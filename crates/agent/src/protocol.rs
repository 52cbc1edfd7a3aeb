//! How tool calls travel between the loop and the model.
//!
//! One implementation per backend capability, chosen once from config:
//! inline `<tool_call>` tags, the native `tools` field, or no tools at all.

use jarvis_config::ToolProtocol as ProtocolKind;
use jarvis_core::provider::ToolDefinition;

use crate::tokenizer::StreamTokenizer;

pub trait ToolProtocol: Send + Sync {
    fn name(&self) -> &'static str;

    /// The system prompt sent with every request.
    fn system_prompt(&self, base: &str, tools: &[ToolDefinition]) -> String;

    /// Schemas for the request's native `tools` field.
    fn request_tools(&self, tools: &[ToolDefinition]) -> Vec<ToolDefinition>;

    /// A fresh tokenizer for one model round.
    fn tokenizer(&self) -> StreamTokenizer;

    /// Whether structured tool calls from the backend are honored.
    fn accepts_native_calls(&self) -> bool;
}

/// Tool calls embedded in the text stream (Hermes / Qwen chat templates).
pub struct InlineTags;

impl ToolProtocol for InlineTags {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn system_prompt(&self, base: &str, tools: &[ToolDefinition]) -> String {
        if tools.is_empty() {
            return base.to_string();
        }
        let mut prompt = String::from(base);
        prompt.push_str(
            "\n\n# Tools\n\n\
             You may call one or more functions to assist with the user query.\n\n\
             You are provided with function signatures within <tools></tools> XML tags:\n<tools>\n",
        );
        for tool in tools {
            let signature = serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            });
            prompt.push_str(&signature.to_string());
            prompt.push('\n');
        }
        prompt.push_str(
            "</tools>\n\n\
             For each function call, return a json object with function name and arguments \
             within <tool_call></tool_call> XML tags:\n\
             <tool_call>\n{\"name\": <function-name>, \"arguments\": <args-json-object>}\n</tool_call>",
        );
        prompt
    }

    fn request_tools(&self, _tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
        Vec::new()
    }

    fn tokenizer(&self) -> StreamTokenizer {
        StreamTokenizer::new()
    }

    fn accepts_native_calls(&self) -> bool {
        false
    }
}

/// Tool calls in the backend's structured field.
pub struct NativeCalls;

impl ToolProtocol for NativeCalls {
    fn name(&self) -> &'static str {
        "native"
    }

    fn system_prompt(&self, base: &str, _tools: &[ToolDefinition]) -> String {
        base.to_string()
    }

    fn request_tools(&self, tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
        tools.to_vec()
    }

    fn tokenizer(&self) -> StreamTokenizer {
        StreamTokenizer::without_tool_tags()
    }

    fn accepts_native_calls(&self) -> bool {
        true
    }
}

/// Plain chat: no tools advertised, none honored.
pub struct NoTools;

impl ToolProtocol for NoTools {
    fn name(&self) -> &'static str {
        "none"
    }

    fn system_prompt(&self, base: &str, _tools: &[ToolDefinition]) -> String {
        base.to_string()
    }

    fn request_tools(&self, _tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
        Vec::new()
    }

    fn tokenizer(&self) -> StreamTokenizer {
        StreamTokenizer::without_tool_tags()
    }

    fn accepts_native_calls(&self) -> bool {
        false
    }
}

pub fn from_config(kind: ProtocolKind) -> Box<dyn ToolProtocol> {
    match kind {
        ProtocolKind::Inline => Box::new(InlineTags),
        ProtocolKind::Native => Box::new(NativeCalls),
        ProtocolKind::None => Box::new(NoTools),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "calculator".into(),
            description: "Do math".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]
    }

    #[test]
    fn inline_advertises_in_prompt_only() {
        let protocol = InlineTags;
        let prompt = protocol.system_prompt("You are JARVIS.", &tools());
        assert!(prompt.starts_with("You are JARVIS."));
        assert!(prompt.contains("<tools>\n{"));
        assert!(prompt.contains(r#""name":"calculator""#));
        assert!(prompt.contains("<tool_call>"));
        assert!(protocol.request_tools(&tools()).is_empty());
    }

    #[test]
    fn inline_without_tools_keeps_prompt() {
        assert_eq!(InlineTags.system_prompt("Base", &[]), "Base");
    }

    #[test]
    fn native_sends_schemas_in_request() {
        let protocol = NativeCalls;
        assert_eq!(protocol.system_prompt("Base", &tools()), "Base");
        assert_eq!(protocol.request_tools(&tools()).len(), 1);
        assert!(protocol.accepts_native_calls());
    }

    #[test]
    fn none_sends_nothing() {
        let protocol = NoTools;
        assert_eq!(protocol.system_prompt("Base", &tools()), "Base");
        assert!(protocol.request_tools(&tools()).is_empty());
        assert!(!protocol.accepts_native_calls());
    }

    #[test]
    fn selected_from_config() {
        assert_eq!(from_config(ProtocolKind::Inline).name(), "inline");
        assert_eq!(from_config(ProtocolKind::Native).name(), "native");
        assert_eq!(from_config(ProtocolKind::None).name(), "none");
    }
}
