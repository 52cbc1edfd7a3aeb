//! A toy tool that adds two to an integer.
//!
//! Its output is impossible to guess without calling it, which makes it a
//! quick check that a model actually exercises the tool-call path.

use async_trait::async_trait;
use jarvis_core::error::ToolError;
use jarvis_core::tool::Tool;
use serde_json::{Map, Value};

pub struct MagicFunctionTool;

#[async_trait]
impl Tool for MagicFunctionTool {
    fn name(&self) -> &str {
        "magic_function"
    }

    fn description(&self) -> &str {
        "Applies a magic function to an input integer and returns the result."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": {
                    "type": "integer",
                    "description": "The integer to transform"
                }
            },
            "required": ["input"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<String, ToolError> {
        let input = match arguments.get("input") {
            Some(Value::Number(n)) => n.as_i64(),
            // Models sometimes quote numbers
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| ToolError::InvalidArguments("'input' must be an integer".into()))?;

        let result = input.checked_add(2).ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: "integer overflow".into(),
        })?;
        Ok(serde_json::json!({ "result": result }).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn adds_two() {
        let out = MagicFunctionTool.execute(args(serde_json::json!({"input": 40}))).await.unwrap();
        assert_eq!(out, r#"{"result":42}"#);
    }

    #[tokio::test]
    async fn accepts_quoted_integers() {
        let out = MagicFunctionTool.execute(args(serde_json::json!({"input": "1"}))).await.unwrap();
        assert_eq!(out, r#"{"result":3}"#);
    }

    #[tokio::test]
    async fn rejects_non_integers() {
        let err = MagicFunctionTool
            .execute(args(serde_json::json!({"input": 1.5})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
